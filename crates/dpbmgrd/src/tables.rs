//! Table name constants for dpbmgrd.

use sonic_orch_common::TableId;

/// CONFIG_DB table for port configuration.
pub const CFG_PORT_TABLE_NAME: &str = "PORT";

/// CONFIG_DB table holding the current breakout mode per root port.
pub const CFG_BREAKOUT_CFG_TABLE_NAME: &str = "BREAKOUT_CFG";

/// CONFIG_DB table of breakout requests for the running daemon, keyed by request id.
pub const CFG_BREAKOUT_REQUEST_TABLE_NAME: &str = "BREAKOUT_REQUEST";

/// CONFIG_DB table for VLANs.
pub const CFG_VLAN_TABLE_NAME: &str = "VLAN";

/// CONFIG_DB table for VLAN membership (`Vlan<id>|<port>`).
pub const CFG_VLAN_MEMBER_TABLE_NAME: &str = "VLAN_MEMBER";

/// CONFIG_DB table for ACL tables and their bound ports.
pub const CFG_ACL_TABLE_TABLE_NAME: &str = "ACL_TABLE";

/// CONFIG_DB table for router interfaces (`<port>` or `<port>|<prefix>`).
pub const CFG_INTF_TABLE_NAME: &str = "INTERFACE";

/// CONFIG_DB table for static routes.
pub const CFG_STATIC_ROUTE_TABLE_NAME: &str = "STATIC_ROUTE";

/// APPL_DB table for port configuration (written by dpbmgrd).
pub const APP_PORT_TABLE_NAME: &str = "PORT_TABLE";

/// APPL_DB table for neighbors (`<port>:<ip>`).
pub const APP_NEIGH_TABLE_NAME: &str = "NEIGH_TABLE";

/// APPL_DB table for routes.
pub const APP_ROUTE_TABLE_NAME: &str = "ROUTE_TABLE";

/// ASIC_DB table for port objects.
pub const ASIC_PORT_TABLE_NAME: &str = "ASIC_STATE:SAI_OBJECT_TYPE_PORT";

/// STATE_DB table for port readiness.
pub const STATE_PORT_TABLE_NAME: &str = "PORT_TABLE";

/// STATE_DB table with the outcome of each breakout request.
pub const STATE_BREAKOUT_STATUS_TABLE_NAME: &str = "BREAKOUT_STATUS";

/// Field names used in dpbmgrd tables.
pub mod fields {
    pub const ALIAS: &str = "alias";
    pub const LANES: &str = "lanes";
    pub const SPEED: &str = "speed";
    pub const INDEX: &str = "index";
    pub const MTU: &str = "mtu";
    pub const ADMIN_STATUS: &str = "admin_status";

    /// Hardware object id.
    pub const OID: &str = "oid";
    /// Hardware admin state (`true`/`false`).
    pub const ADMIN_STATE: &str = "admin_state";

    pub const BRKOUT_MODE: &str = "brkout_mode";
    pub const TAGGING_MODE: &str = "tagging_mode";
    pub const PORTS: &str = "ports";
    /// Alternate spelling of [`PORTS`] used by list-valued fields.
    pub const PORTS_LIST: &str = "ports@";
    pub const IFNAME: &str = "ifname";

    pub const PORT: &str = "port";
    pub const MODE: &str = "mode";
    pub const FORCE: &str = "force";
    pub const LOAD_DEFAULTS: &str = "load_defaults";
    /// Request outcome, `ok` or `failed`.
    pub const STATUS: &str = "status";
    pub const REPORT: &str = "report";
    pub const ERROR: &str = "error";
    pub const STATE: &str = "state";
}

/// Value of [`fields::STATE`] once the port is operationally ready.
pub const STATE_OK: &str = "ok";

pub fn cfg_port() -> TableId {
    TableId::config(CFG_PORT_TABLE_NAME)
}

pub fn cfg_breakout_cfg() -> TableId {
    TableId::config(CFG_BREAKOUT_CFG_TABLE_NAME)
}

pub fn cfg_breakout_request() -> TableId {
    TableId::config(CFG_BREAKOUT_REQUEST_TABLE_NAME)
}

pub fn cfg_vlan() -> TableId {
    TableId::config(CFG_VLAN_TABLE_NAME)
}

pub fn cfg_vlan_member() -> TableId {
    TableId::config(CFG_VLAN_MEMBER_TABLE_NAME)
}

pub fn cfg_acl_table() -> TableId {
    TableId::config(CFG_ACL_TABLE_TABLE_NAME)
}

pub fn cfg_interface() -> TableId {
    TableId::config(CFG_INTF_TABLE_NAME)
}

pub fn cfg_static_route() -> TableId {
    TableId::config(CFG_STATIC_ROUTE_TABLE_NAME)
}

pub fn app_port() -> TableId {
    TableId::appl(APP_PORT_TABLE_NAME)
}

pub fn app_neigh() -> TableId {
    TableId::appl(APP_NEIGH_TABLE_NAME)
}

pub fn app_route() -> TableId {
    TableId::appl(APP_ROUTE_TABLE_NAME)
}

pub fn asic_port() -> TableId {
    TableId::asic(ASIC_PORT_TABLE_NAME)
}

pub fn state_port() -> TableId {
    TableId::state(STATE_PORT_TABLE_NAME)
}

pub fn state_breakout_status() -> TableId {
    TableId::state(STATE_BREAKOUT_STATUS_TABLE_NAME)
}

/// Tables whose changes can unblock a pending port removal.
pub fn dependency_tables() -> Vec<TableId> {
    vec![
        cfg_vlan_member(),
        cfg_acl_table(),
        cfg_interface(),
        cfg_static_route(),
        app_neigh(),
        app_route(),
    ]
}
