//! Breakout requests handed to the running daemon through the store.
//!
//! A client writes CONFIG_DB `BREAKOUT_REQUEST|<id>` and waits for STATE_DB
//! `BREAKOUT_STATUS|<id>`. The daemon runs every request through its one
//! [`ReconciliationEngine`](crate::ReconciliationEngine), so breakouts of a
//! group never overlap no matter how many clients submit them.

use std::time::Duration;

use tracing::{debug, info, warn};

use sonic_cfgmgr_common::{field_values, FieldValue, FieldValues, FieldValuesExt};
use sonic_orch_common::{wait_for_key, ObjectStore, Presence};

use crate::engine::BreakoutRequest;
use crate::error::{DpbError, DpbResult};
use crate::tables::{self, fields};

const STATUS_OK: &str = "ok";
const STATUS_FAILED: &str = "failed";

/// Fresh key for a `BREAKOUT_REQUEST` entry.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn parse_flag(id: &str, field: &str, value: Option<&str>) -> DpbResult<bool> {
    match value {
        None | Some("false") => Ok(false),
        Some("true") => Ok(true),
        Some(other) => Err(DpbError::validation(
            id,
            format!("{} must be true or false, got '{}'", field, other),
        )),
    }
}

impl BreakoutRequest {
    /// CONFIG_DB `BREAKOUT_REQUEST` encoding.
    pub fn to_fields(&self) -> FieldValues {
        field_values! {
            fields::PORT => self.port,
            fields::MODE => self.mode,
            fields::FORCE => self.force,
            fields::LOAD_DEFAULTS => self.load_defaults,
        }
    }

    pub fn from_fields(id: &str, fvs: &[FieldValue]) -> DpbResult<Self> {
        let required = |field: &str| {
            fvs.get_field(field)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| DpbError::validation(id, format!("request is missing '{}'", field)))
        };
        Ok(BreakoutRequest::new(required(fields::PORT)?, required(fields::MODE)?)
            .force(parse_flag(id, fields::FORCE, fvs.get_field(fields::FORCE))?)
            .load_defaults(parse_flag(
                id,
                fields::LOAD_DEFAULTS,
                fvs.get_field(fields::LOAD_DEFAULTS),
            )?))
    }
}

/// Outcome the daemon publishes for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakoutStatus {
    /// The breakout finished; carries the printed report.
    Completed(String),
    /// The breakout was refused or failed; carries the error message.
    Failed(String),
}

impl BreakoutStatus {
    fn to_fields(&self) -> FieldValues {
        match self {
            Self::Completed(report) => field_values! {
                fields::STATUS => STATUS_OK,
                fields::REPORT => report,
            },
            Self::Failed(error) => field_values! {
                fields::STATUS => STATUS_FAILED,
                fields::ERROR => error,
            },
        }
    }

    fn from_fields(id: &str, fvs: &[FieldValue]) -> DpbResult<Self> {
        match fvs.get_field(fields::STATUS) {
            Some(STATUS_OK) => Ok(Self::Completed(fvs.get_field_or(fields::REPORT, "").to_string())),
            Some(STATUS_FAILED) => Ok(Self::Failed(fvs.get_field_or(fields::ERROR, "").to_string())),
            other => Err(DpbError::validation(
                id,
                format!("unknown breakout status {:?}", other),
            )),
        }
    }
}

/// Records the outcome of request `id`.
pub async fn publish_status(store: &dyn ObjectStore, id: &str, status: &BreakoutStatus) -> DpbResult<()> {
    store
        .set(&tables::state_breakout_status(), id, &status.to_fields())
        .await?;
    debug!("Published status of breakout request {}", id);
    Ok(())
}

/// True once request `id` has an outcome.
pub async fn is_answered(store: &dyn ObjectStore, id: &str) -> DpbResult<bool> {
    Ok(store.exists(&tables::state_breakout_status(), id).await?)
}

/// Submits `request` to the daemon and waits up to `timeout` for its outcome.
///
/// The request and status entries are removed once the outcome is read, or
/// when the daemon does not answer in time.
pub async fn submit_breakout(
    store: &dyn ObjectStore,
    request: &BreakoutRequest,
    timeout: Duration,
) -> DpbResult<BreakoutStatus> {
    let id = new_request_id();
    let requests = tables::cfg_breakout_request();
    let statuses = tables::state_breakout_status();

    store.set(&requests, &id, &request.to_fields()).await?;
    info!(
        "Submitted breakout request {}: {} -> {}",
        id, request.port, request.mode
    );

    let outcome = wait_for_key(store, &statuses, &id, Presence::Present, timeout).await?;
    if !outcome.is_ready() {
        warn!("Breakout request {} got no answer within {:?}", id, timeout);
        store.del(&requests, &id).await?;
        return Err(DpbError::RequestTimeout { id, timeout });
    }

    let fvs = store.get(&statuses, &id).await?.unwrap_or_default();
    let status = BreakoutStatus::from_fields(&id, &fvs);
    store.del(&requests, &id).await?;
    store.del(&statuses, &id).await?;
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sonic_orch_common::MemoryStore;

    fn fv(f: &str, v: &str) -> (String, String) {
        (f.to_string(), v.to_string())
    }

    #[test]
    fn test_request_fields() {
        let request = BreakoutRequest::new("Ethernet0", "4x25G[10G]").force(true);
        let fvs = request.to_fields();
        assert_eq!(
            fvs,
            vec![
                fv("port", "Ethernet0"),
                fv("mode", "4x25G[10G]"),
                fv("force", "true"),
                fv("load_defaults", "false"),
            ]
        );
        assert_eq!(BreakoutRequest::from_fields("r1", &fvs).unwrap(), request);

        let minimal = BreakoutRequest::from_fields("r2", &[fv("port", "Ethernet4"), fv("mode", "2x50G")]).unwrap();
        assert_eq!(minimal, BreakoutRequest::new("Ethernet4", "2x50G"));
    }

    #[test]
    fn test_malformed_request() {
        assert!(BreakoutRequest::from_fields("r1", &[fv("port", "Ethernet0")]).is_err());
        assert!(BreakoutRequest::from_fields(
            "r2",
            &[fv("port", "Ethernet0"), fv("mode", "2x50G"), fv("force", "yes")]
        )
        .is_err());
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(new_request_id(), new_request_id());
    }

    #[tokio::test]
    async fn test_submit_reads_and_clears_status() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let responder = store.clone();
        let mut events = store.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if event.table == tables::cfg_breakout_request() && event.op.is_set() {
                    let status = BreakoutStatus::Failed("Invalid breakout mode".to_string());
                    publish_status(responder.as_ref(), &event.key, &status).await.unwrap();
                    return;
                }
            }
        });

        let status = submit_breakout(
            store.as_ref(),
            &BreakoutRequest::new("Ethernet0", "3x33G"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(status, BreakoutStatus::Failed("Invalid breakout mode".to_string()));
        assert!(store.keys(&tables::cfg_breakout_request()).await.unwrap().is_empty());
        assert!(store.keys(&tables::state_breakout_status()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_daemon_times_out() {
        let store = MemoryStore::new();
        let err = submit_breakout(
            &store,
            &BreakoutRequest::new("Ethernet0", "2x50G"),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DpbError::RequestTimeout { .. }));
        assert!(store.keys(&tables::cfg_breakout_request()).await.unwrap().is_empty());
    }
}
