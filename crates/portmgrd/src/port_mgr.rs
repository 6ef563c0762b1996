//! PortMgr implementation - the convergence gate for kernel port settings.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use sonic_cfgmgr_common::{defaults, CfgMgr, CfgMgrResult, FieldValuesExt, Orch};
use sonic_orch_common::{Consumer, KeyOpFieldsValues, ObjectStore, TableId};

use crate::kernel::KernelLink;
use crate::tables::{self, fields};

/// Kernel settings of one port waiting for the gate to open.
///
/// Later writes overwrite earlier ones, so only the latest value of each
/// setting is ever applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelSettings {
    pub mtu: Option<String>,
    pub admin_status: Option<String>,
}

impl KernelSettings {
    pub fn is_empty(&self) -> bool {
        self.mtu.is_none() && self.admin_status.is_none()
    }

    /// Overwrites with every setting present in `newer`.
    fn merge(&mut self, newer: KernelSettings) {
        if newer.mtu.is_some() {
            self.mtu = newer.mtu;
        }
        if newer.admin_status.is_some() {
            self.admin_status = newer.admin_status;
        }
    }

    /// Fills only settings that are not pending already.
    fn backfill(&mut self, older: KernelSettings) {
        if self.mtu.is_none() {
            self.mtu = older.mtu;
        }
        if self.admin_status.is_none() {
            self.admin_status = older.admin_status;
        }
    }
}

/// Port configuration manager.
///
/// Applies MTU and admin status of configured ports to their kernel
/// netdevs. Settings are held back until STATE_DB reports the port
/// `state=ok`; while held, successive writes coalesce so that only the
/// most recent value of each setting is applied once the port is ready.
pub struct PortMgr {
    daemon_name: String,
    store: Arc<dyn ObjectStore>,
    kernel: Arc<dyn KernelLink>,

    port_consumer: Consumer,
    state_consumer: Consumer,

    /// Ports that have been configured at least once.
    port_list: HashSet<String>,

    /// Settings waiting for the port to become ready.
    kernel_settings: BTreeMap<String, KernelSettings>,
}

impl PortMgr {
    pub fn new(store: Arc<dyn ObjectStore>, kernel: Arc<dyn KernelLink>) -> Self {
        Self {
            daemon_name: "portmgrd".to_string(),
            store,
            kernel,
            port_consumer: Consumer::new(TableId::config(tables::CFG_PORT_TABLE_NAME)),
            state_consumer: Consumer::new(TableId::state(tables::STATE_PORT_TABLE_NAME)),
            port_list: HashSet::new(),
            kernel_settings: BTreeMap::new(),
        }
    }

    /// Checks STATE_DB for `state=ok` on the port.
    #[instrument(skip(self), fields(port = %alias))]
    pub async fn is_port_state_ok(&self, alias: &str) -> CfgMgrResult<bool> {
        let table = TableId::state(tables::STATE_PORT_TABLE_NAME);
        let ok = self
            .store
            .get(&table, alias)
            .await?
            .map(|fvs| fvs.get_field(fields::STATE) == Some(tables::STATE_OK))
            .unwrap_or(false);
        Ok(ok)
    }

    /// Settings currently held back for `alias`.
    pub fn pending_settings(&self, alias: &str) -> Option<&KernelSettings> {
        self.kernel_settings.get(alias)
    }

    /// Returns the number of ports with held back settings.
    pub fn pending_count(&self) -> usize {
        self.kernel_settings.len()
    }

    /// Returns the set of known ports.
    pub fn ports(&self) -> &HashSet<String> {
        &self.port_list
    }

    /// Processes a SET of a CONFIG_DB PORT entry.
    ///
    /// The first time a port is seen, defaults are queued for settings
    /// the entry does not carry.
    #[instrument(skip(self, fvs), fields(port = %alias))]
    pub async fn process_port_set(&mut self, alias: &str, fvs: &[(String, String)]) -> CfgMgrResult<()> {
        let mut settings = KernelSettings::default();
        if self.port_list.insert(alias.to_string()) {
            settings.mtu = Some(defaults::DEFAULT_MTU.to_string());
            settings.admin_status = Some(defaults::DEFAULT_ADMIN_STATUS.to_string());
        }
        if let Some(mtu) = fvs.get_field(fields::MTU) {
            settings.mtu = Some(mtu.to_string());
        }
        if let Some(status) = fvs.get_field(fields::ADMIN_STATUS) {
            settings.admin_status = Some(status.to_string());
        }

        if settings.is_empty() {
            return Ok(());
        }
        self.kernel_settings
            .entry(alias.to_string())
            .or_default()
            .merge(settings);

        if self.is_port_state_ok(alias).await? {
            self.apply_kernel_settings(alias).await;
        } else {
            info!("Port {} is not ready, pending kernel settings", alias);
        }
        Ok(())
    }

    /// Processes a DEL of a CONFIG_DB PORT entry.
    #[instrument(skip(self), fields(port = %alias))]
    pub async fn process_port_del(&mut self, alias: &str) -> CfgMgrResult<()> {
        info!("Deleting port {}", alias);
        self.port_list.remove(alias);
        self.kernel_settings.remove(alias);
        Ok(())
    }

    /// Processes a SET of a STATE_DB PORT_TABLE entry.
    async fn process_state_set(&mut self, alias: &str, fvs: &[(String, String)]) {
        if fvs.get_field(fields::STATE) == Some(tables::STATE_OK)
            && self.kernel_settings.contains_key(alias)
        {
            debug!("Port {} became ready", alias);
            self.apply_kernel_settings(alias).await;
        }
    }

    /// Applies the held back settings of `alias`.
    ///
    /// Settings that fail stay pending, unless a newer value arrived meanwhile.
    async fn apply_kernel_settings(&mut self, alias: &str) {
        let Some(settings) = self.kernel_settings.remove(alias) else {
            return;
        };

        let mut failed = KernelSettings::default();
        if let Some(mtu) = settings.mtu {
            if let Err(e) = self.kernel.set_mtu(alias, &mtu).await {
                warn!("Setting MTU for {} failed: {}", alias, e);
                failed.mtu = Some(mtu);
            }
        }
        if let Some(status) = settings.admin_status {
            let up = status == "up";
            if let Err(e) = self.kernel.set_admin_status(alias, up).await {
                warn!("Setting admin status for {} failed: {}", alias, e);
                failed.admin_status = Some(status);
            }
        }

        if !failed.is_empty() {
            self.kernel_settings
                .entry(alias.to_string())
                .or_default()
                .backfill(failed);
        }
    }

    /// Retries every held back port that is ready by now.
    async fn do_kernel_setting_task(&mut self) {
        let aliases: Vec<String> = self.kernel_settings.keys().cloned().collect();
        for alias in aliases {
            match self.is_port_state_ok(&alias).await {
                Ok(true) => self.apply_kernel_settings(&alias).await,
                Ok(false) => {}
                Err(e) => error!("Failed to read state of {}: {}", alias, e),
            }
        }
    }
}

#[async_trait]
impl Orch for PortMgr {
    fn name(&self) -> &str {
        "PortMgr"
    }

    async fn do_task(&mut self) {
        for entry in self.port_consumer.drain() {
            let result = if entry.op.is_set() {
                self.process_port_set(&entry.key, &entry.fvs).await
            } else {
                self.process_port_del(&entry.key).await
            };
            if let Err(e) = result {
                error!("Failed to process PORT {}: {}", entry.key, e);
                if e.is_retryable() {
                    self.port_consumer.retry(entry);
                }
            }
        }

        for entry in self.state_consumer.drain() {
            if entry.op.is_set() {
                self.process_state_set(&entry.key, &entry.fvs).await;
            }
        }

        if !self.kernel_settings.is_empty() {
            self.do_kernel_setting_task().await;
        }
    }

    fn has_pending_tasks(&self) -> bool {
        !self.kernel_settings.is_empty() || self.port_consumer.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.kernel_settings
            .iter()
            .map(|(alias, s)| format!("PORT:{} {:?}", alias, s))
            .chain(self.port_consumer.dump())
            .collect()
    }
}

impl CfgMgr for PortMgr {
    fn daemon_name(&self) -> &str {
        &self.daemon_name
    }

    fn config_table_names(&self) -> &[&str] {
        &[tables::CFG_PORT_TABLE_NAME]
    }

    fn state_table_names(&self) -> &[&str] {
        &[tables::STATE_PORT_TABLE_NAME]
    }

    fn add_to_sync(&mut self, table: &TableId, entries: Vec<KeyOpFieldsValues>) {
        if table == self.port_consumer.table() {
            self.port_consumer.add_to_sync(entries);
        } else if table == self.state_consumer.table() {
            self.state_consumer.add_to_sync(entries);
        }
    }
}
