//! Common infrastructure for SONiC configuration manager daemons.
//!
//! This crate provides shared functionality for the cfgmgr daemons
//! (portmgrd, dpbmgrd):
//!
//! - [`shell`]: Safe shell command execution with proper quoting
//! - [`CfgMgr`]: Base trait extending `Orch` for config managers
//! - [`runner`]: The event loop driving a manager from store notifications
//! - [`error`]: Error types for cfgmgr operations
//!
//! # Architecture
//!
//! Configuration managers follow this pattern:
//!
//! 1. Subscribe to the tables they reconcile (CONFIG_DB, STATE_DB, ...)
//! 2. Queue observed changes in per-table Consumers
//! 3. Reconcile queued changes in `do_task()`
//! 4. Write results downstream (APPL_DB, ASIC_DB, the kernel)
//!
//! # Example
//!
//! ```ignore
//! use sonic_cfgmgr_common::{runner, CfgMgr};
//! use tokio_util::sync::CancellationToken;
//!
//! let mut mgr = PortMgr::new(store.clone(), Arc::new(IpLink));
//! runner::run(&mut mgr, store, CancellationToken::new()).await?;
//! ```

pub mod error;
pub mod manager;
pub mod runner;
pub mod shell;

// Re-export commonly used items at crate root
pub use error::{CfgMgrError, CfgMgrResult};
pub use manager::{defaults, CfgMgr, DbId, FieldValue, FieldValues, FieldValuesExt};

// Re-export the Orch trait for convenience
pub use sonic_orch_common::Orch;
