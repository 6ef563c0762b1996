//! Configuration manager trait and common abstractions.
//!
//! Extends the `Orch` trait from `sonic-orch-common` with what the shared
//! run loop needs: the tables a manager subscribes to and a way to hand
//! it observed changes.

use sonic_orch_common::{KeyOpFieldsValues, Orch, TableId};

pub use sonic_orch_common::{DbId, FieldValue};

/// Default values for port configuration.
pub mod defaults {
    /// Admin status of a port that never had one configured.
    pub const DEFAULT_ADMIN_STATUS: &str = "down";

    /// MTU of a port that never had one configured.
    pub const DEFAULT_MTU: u32 = 9100;

    /// Idle tick of the run loop, in milliseconds.
    pub const SELECT_TIMEOUT_MS: u64 = 1000;
}

/// Base trait for configuration manager daemons.
///
/// ```ignore
/// use sonic_cfgmgr_common::CfgMgr;
///
/// impl CfgMgr for MyMgr {
///     fn daemon_name(&self) -> &str { "mymgrd" }
///     fn config_table_names(&self) -> &[&str] { &["PORT"] }
///     fn add_to_sync(&mut self, table: &TableId, entries: Vec<KeyOpFieldsValues>) {
///         self.port_consumer.add_to_sync(entries);
///     }
/// }
/// ```
pub trait CfgMgr: Orch {
    /// Returns the daemon name (e.g., "portmgrd", "dpbmgrd").
    fn daemon_name(&self) -> &str;

    /// Subscribed CONFIG_DB table names.
    fn config_table_names(&self) -> &[&str];

    /// Subscribed STATE_DB table names.
    fn state_table_names(&self) -> &[&str] {
        &[]
    }

    /// Every table whose changes must be delivered to [`CfgMgr::add_to_sync`].
    ///
    /// Managers watching APPL_DB or ASIC_DB tables override this.
    fn subscriptions(&self) -> Vec<TableId> {
        self.config_table_names()
            .iter()
            .map(|name| TableId::config(*name))
            .chain(self.state_table_names().iter().map(|name| TableId::state(*name)))
            .collect()
    }

    /// Queues changes observed on `table`.
    fn add_to_sync(&mut self, table: &TableId, entries: Vec<KeyOpFieldsValues>);
}

/// Collection of field-value pairs for a table entry.
pub type FieldValues = Vec<FieldValue>;

/// Helper trait for working with field-value collections.
pub trait FieldValuesExt {
    fn get_field(&self, field: &str) -> Option<&str>;

    fn get_field_or<'a>(&'a self, field: &str, default: &'a str) -> &'a str;

    fn has_field(&self, field: &str) -> bool;
}

impl FieldValuesExt for [FieldValue] {
    fn get_field(&self, field: &str) -> Option<&str> {
        self.iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    fn get_field_or<'a>(&'a self, field: &str, default: &'a str) -> &'a str {
        self.get_field(field).unwrap_or(default)
    }

    fn has_field(&self, field: &str) -> bool {
        self.iter().any(|(f, _)| f == field)
    }
}

/// Builds a FieldValues collection from key-value pairs.
#[macro_export]
macro_rules! field_values {
    ($($field:expr => $value:expr),* $(,)?) => {
        vec![
            $(($field.to_string(), $value.to_string()),)*
        ]
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct GateLike;

    #[async_trait]
    impl Orch for GateLike {
        fn name(&self) -> &str {
            "GateLike"
        }

        async fn do_task(&mut self) {}
    }

    impl CfgMgr for GateLike {
        fn daemon_name(&self) -> &str {
            "gatelike"
        }

        fn config_table_names(&self) -> &[&str] {
            &["PORT"]
        }

        fn state_table_names(&self) -> &[&str] {
            &["PORT_TABLE"]
        }

        fn add_to_sync(&mut self, _table: &TableId, _entries: Vec<KeyOpFieldsValues>) {}
    }

    #[test]
    fn test_default_subscriptions() {
        assert_eq!(
            GateLike.subscriptions(),
            vec![TableId::config("PORT"), TableId::state("PORT_TABLE")]
        );
    }

    #[test]
    fn test_field_values_ext() {
        let fvs: FieldValues = field_values! {
            "mtu" => 9100,
            "admin_status" => "up",
        };

        assert_eq!(fvs.get_field("mtu"), Some("9100"));
        assert_eq!(fvs.get_field("speed"), None);
        assert_eq!(fvs.get_field_or("speed", "100000"), "100000");
        assert!(fvs.has_field("admin_status"));
        assert!(!fvs.has_field("lanes"));
    }
}
