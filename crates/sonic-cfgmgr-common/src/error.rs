//! Error types for cfgmgr operations.

use std::io;

use sonic_orch_common::StoreError;
use thiserror::Error;

/// Result type alias for cfgmgr operations.
pub type CfgMgrResult<T> = Result<T, CfgMgrError>;

/// Errors that can occur during cfgmgr operations.
#[derive(Debug, Error)]
pub enum CfgMgrError {
    /// The shell could not be spawned.
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        command: String,
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Object store operation failed.
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    /// The manager loop lost its input (e.g. notification channel closed).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CfgMgrError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CfgMgrError::Store(_) | CfgMgrError::ShellCommandFailed { .. }
        )
    }
}
