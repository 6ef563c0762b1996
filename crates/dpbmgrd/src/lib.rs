//! Dynamic port breakout manager for SONiC.
//!
//! This crate implements the `dpbmgrd` daemon, which splits ports into
//! breakout children and merges them back while keeping the configuration,
//! application and hardware stages consistent.
//!
//! # Responsibilities
//!
//! - Validate CONFIG_DB port records and mirror them into APPL_DB
//! - Request hardware port objects and observe them in ASIC_DB
//! - Hold port removal while VLAN, ACL, interface, neighbor or route
//!   entries still reference the port
//! - Run breakout requests: plan, check or clear dependencies, delete and
//!   create ports, wait for each stage to converge
//!
//! # Tables
//!
//! | Database | Table | Purpose |
//! |----------|-------|---------|
//! | CONFIG_DB | PORT | Port configuration source |
//! | CONFIG_DB | BREAKOUT_CFG | Current breakout mode per root port |
//! | CONFIG_DB | BREAKOUT_REQUEST | Breakout requests for the daemon |
//! | CONFIG_DB | VLAN_MEMBER, ACL_TABLE, INTERFACE, STATIC_ROUTE | Port dependencies |
//! | APPL_DB | PORT_TABLE | Validated port records (written here) |
//! | APPL_DB | NEIGH_TABLE, ROUTE_TABLE | Port dependencies |
//! | ASIC_DB | ASIC_STATE:SAI_OBJECT_TYPE_PORT | Hardware port objects |
//! | STATE_DB | BREAKOUT_STATUS | Outcome of each breakout request (written here) |
//!
//! # Example
//!
//! ```ignore
//! use sonic_dpbmgrd::{submit_breakout, BreakoutRequest, DpbMgr, ReconciliationEngine};
//!
//! let engine = Arc::new(ReconciliationEngine::new(store.clone(), device, catalog, defaults, config));
//! let mut mgr = DpbMgr::new(engine.clone());
//! let loop_store = store.clone();
//! tokio::spawn(async move { runner::run(&mut mgr, loop_store, shutdown).await });
//!
//! // From any process sharing the store
//! let status = submit_breakout(store.as_ref(), &BreakoutRequest::new("Ethernet0", "4x25G[10G]"), timeout).await?;
//! ```

mod config;
mod dependency;
mod device;
mod dpb_mgr;
mod engine;
mod error;
mod mode;
mod planner;
mod record;
mod request;
pub mod tables;

pub use config::{BreakoutGroup, DefaultsTemplate, EngineConfig, PlatformCatalog, PortDefaults, VlanBinding};
pub use dependency::{Dependency, DependencyKind, DependencyTracker};
pub use device::{PortDevice, VirtualSwitch, VirtualSwitchConfig};
pub use dpb_mgr::DpbMgr;
pub use engine::{BreakoutReport, BreakoutRequest, PortState, ReconciliationEngine};
pub use error::{DpbError, DpbResult};
pub use mode::{BreakoutMode, ModeSegment};
pub use planner::{ensure_lane_conservation, BreakoutPlanner, ConfigurationDelta};
pub use record::{
    format_lanes, mtu_to_hardware, parse_hardware_lanes, parse_lanes, split_port_name, AdminStatus,
    PortRecord, MTU_HW_OFFSET,
};
pub use request::{is_answered, new_request_id, publish_status, submit_breakout, BreakoutStatus};
