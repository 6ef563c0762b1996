//! Table name constants for portmgrd.

/// CONFIG_DB table for port configuration.
pub const CFG_PORT_TABLE_NAME: &str = "PORT";

/// STATE_DB table for port readiness.
pub const STATE_PORT_TABLE_NAME: &str = "PORT_TABLE";

/// Field names used in port tables.
pub mod fields {
    pub const MTU: &str = "mtu";

    /// up/down
    pub const ADMIN_STATUS: &str = "admin_status";

    /// Readiness field in STATE_DB.
    pub const STATE: &str = "state";
}

/// Value of [`fields::STATE`] once the kernel netdev exists.
pub const STATE_OK: &str = "ok";
