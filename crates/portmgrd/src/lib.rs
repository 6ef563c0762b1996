//! Port configuration manager daemon for SONiC.
//!
//! This crate implements the `portmgrd` daemon, the convergence gate
//! between port configuration and the Linux network stack.
//!
//! # Responsibilities
//!
//! - Set port MTU via `ip link set dev <port> mtu <mtu>`
//! - Set port admin status via `ip link set dev <port> up|down`
//! - Hold settings back until STATE_DB reports the netdev ready,
//!   coalescing writes that arrive meanwhile
//!
//! # Tables
//!
//! | Database | Table | Purpose |
//! |----------|-------|---------|
//! | CONFIG_DB | PORT | Port configuration source |
//! | STATE_DB | PORT_TABLE | Port readiness state (`state=ok`) |
//!
//! # Example
//!
//! ```ignore
//! use sonic_portmgrd::{IpLink, PortMgr};
//!
//! let mut mgr = PortMgr::new(store.clone(), Arc::new(IpLink));
//! runner::run(&mut mgr, store, shutdown).await?;
//! ```

mod kernel;
mod port_mgr;
mod tables;

pub use kernel::{IpLink, KernelCommand, KernelLink, RecordingLink};
pub use port_mgr::{KernelSettings, PortMgr};
pub use tables::*;
