//! Error types for dpbmgrd operations.

use std::collections::BTreeMap;
use std::time::Duration;

use sonic_orch_common::{DbId, StoreError};
use thiserror::Error;

use crate::dependency::Dependency;

/// Result type alias for dpbmgrd operations.
pub type DpbResult<T> = Result<T, DpbError>;

/// Errors raised while planning or reconciling port changes.
#[derive(Debug, Error)]
pub enum DpbError {
    /// Incomplete or malformed port record, or a lane conflict.
    #[error("Invalid port '{port}': {message}")]
    Validation { port: String, message: String },

    /// Lanes cannot be partitioned into the requested mode.
    #[error("Invalid breakout mode '{mode}' for port '{port}': {message}")]
    InvalidMode {
        port: String,
        mode: String,
        message: String,
    },

    /// Non-forced removal attempted while dependents are live.
    #[error("Breakout of '{port}' blocked by dependencies: {}", describe_blocked(.blocked))]
    DependencyBlocked {
        port: String,
        blocked: BTreeMap<String, Vec<Dependency>>,
    },

    /// Forced removal met a dependency it cannot clear.
    #[error("Cannot clear {dependency} bound to port '{port}'")]
    UnresolvedDependency { port: String, dependency: Dependency },

    /// A stage did not reach the expected state in time.
    #[error("Port '{port}' did not converge in {stage} within {timeout:?}")]
    ConvergenceTimeout {
        port: String,
        stage: DbId,
        timeout: Duration,
    },

    /// The daemon did not answer a submitted breakout request in time.
    #[error("Breakout request {id} got no answer within {timeout:?}")]
    RequestTimeout { id: String, timeout: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Platform catalog, defaults template or settings are unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn describe_blocked(blocked: &BTreeMap<String, Vec<Dependency>>) -> String {
    blocked
        .iter()
        .map(|(port, deps)| {
            let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
            format!("{} [{}]", port, deps.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl DpbError {
    pub fn validation(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            port: port.into(),
            message: message.into(),
        }
    }

    pub fn invalid_mode(
        port: impl Into<String>,
        mode: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidMode {
            port: port.into(),
            mode: mode.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Only store failures can succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_blocked_message_lists_dependencies() {
        let mut blocked = BTreeMap::new();
        blocked.insert(
            "Ethernet0".to_string(),
            vec![
                Dependency::VlanMember {
                    vlan: "Vlan100".to_string(),
                },
                Dependency::AclTableBinding {
                    table: "DATAACL".to_string(),
                },
            ],
        );
        let err = DpbError::DependencyBlocked {
            port: "Ethernet0".to_string(),
            blocked,
        };

        assert_eq!(
            err.to_string(),
            "Breakout of 'Ethernet0' blocked by dependencies: \
             Ethernet0 [VLAN member Vlan100, ACL table DATAACL]"
        );
    }

    #[test]
    fn test_timeout_names_stage() {
        let err = DpbError::ConvergenceTimeout {
            port: "Ethernet2".to_string(),
            stage: DbId::AsicDb,
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "Port 'Ethernet2' did not converge in ASIC_DB within 5s");
    }
}
