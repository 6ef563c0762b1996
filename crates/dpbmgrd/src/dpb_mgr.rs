//! DpbMgr: feeds observed store changes to the reconciliation engine.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use sonic_cfgmgr_common::{CfgMgr, Orch};
use sonic_orch_common::{Consumer, KeyOpFieldsValues, TableId};

use crate::engine::{BreakoutRequest, PortState, ReconciliationEngine};
use crate::error::DpbResult;
use crate::request::{self, BreakoutStatus};
use crate::tables;

/// Port breakout manager.
///
/// Consumes CONFIG_DB `PORT` and the ASIC_DB port objects, and re-evaluates
/// blocked removals whenever a table that can hold a port dependency
/// changes. Breakout requests from CONFIG_DB `BREAKOUT_REQUEST` run on
/// their own tasks, since they wait on stages this loop reconciles.
pub struct DpbMgr {
    daemon_name: String,
    engine: Arc<ReconciliationEngine>,

    port_consumer: Consumer,
    hardware_consumer: Consumer,
    request_consumer: Consumer,
    dependency_tables: Vec<TableId>,

    /// Breakout requests in progress, each task yielding its request id.
    requests: JoinSet<String>,
    in_flight: HashSet<String>,

    /// A dependency table changed since the last re-evaluation.
    dependencies_changed: bool,
}

impl DpbMgr {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self {
            daemon_name: "dpbmgrd".to_string(),
            engine,
            port_consumer: Consumer::new(tables::cfg_port()),
            hardware_consumer: Consumer::new(tables::asic_port()),
            request_consumer: Consumer::new(tables::cfg_breakout_request()),
            dependency_tables: tables::dependency_tables(),
            requests: JoinSet::new(),
            in_flight: HashSet::new(),
            dependencies_changed: false,
        }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// Ports waiting for their dependencies to clear.
    pub async fn blocked_ports(&self) -> Vec<String> {
        self.engine.ports_in(PortState::PendingDelete).await
    }

    /// Number of breakout requests still running.
    pub fn requests_in_progress(&self) -> usize {
        self.requests.len()
    }

    /// Reads request `id` and starts it unless it is gone, running or already answered.
    async fn start_request(&mut self, id: &str) -> DpbResult<()> {
        let store = self.engine.store().clone();
        if self.in_flight.contains(id) || request::is_answered(store.as_ref(), id).await? {
            debug!("Breakout request {} already answered", id);
            return Ok(());
        }
        let Some(fvs) = store.get(&tables::cfg_breakout_request(), id).await? else {
            return Ok(());
        };

        let request = match BreakoutRequest::from_fields(id, &fvs) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting breakout request {}: {}", id, e);
                return request::publish_status(store.as_ref(), id, &BreakoutStatus::Failed(e.to_string())).await;
            }
        };

        info!("Starting breakout request {}: {} -> {}", id, request.port, request.mode);
        let engine = self.engine.clone();
        let id = id.to_string();
        self.in_flight.insert(id.clone());
        self.requests.spawn(async move {
            let status = match engine.breakout(&request).await {
                Ok(report) => BreakoutStatus::Completed(report.to_string()),
                Err(e) => {
                    error!("Breakout request {} failed: {}", id, e);
                    BreakoutStatus::Failed(e.to_string())
                }
            };
            if let Err(e) = request::publish_status(store.as_ref(), &id, &status).await {
                error!("Failed to publish status of breakout request {}: {}", id, e);
            }
            id
        });
        Ok(())
    }

    async fn process_port_entry(&mut self, entry: KeyOpFieldsValues) {
        let result = if entry.op.is_set() {
            self.engine.handle_port_set(&entry.key).await
        } else {
            self.engine.handle_port_del(&entry.key).await
        };
        if let Err(e) = result {
            error!("Failed to process PORT {}: {}", entry.key, e);
            if e.is_retryable() {
                self.port_consumer.retry(entry);
            }
        }
    }
}

#[async_trait]
impl Orch for DpbMgr {
    fn name(&self) -> &str {
        "DpbMgr"
    }

    async fn do_task(&mut self) {
        for entry in self.hardware_consumer.drain() {
            self.engine.handle_hardware_event(&entry.key, entry.op).await;
        }

        for entry in self.port_consumer.drain() {
            self.process_port_entry(entry).await;
        }

        for entry in self.request_consumer.drain() {
            if entry.op.is_del() {
                continue;
            }
            if let Err(e) = self.start_request(&entry.key).await {
                error!("Failed to start breakout request {}: {}", entry.key, e);
                if e.is_retryable() {
                    self.request_consumer.retry(entry);
                }
            }
        }
        while let Some(result) = self.requests.try_join_next() {
            match result {
                Ok(id) => {
                    self.in_flight.remove(&id);
                }
                Err(e) => error!("Breakout request task ended abnormally: {}", e),
            }
        }

        if self.dependencies_changed {
            self.dependencies_changed = false;
            if let Err(e) = self.engine.reevaluate_pending_deletes().await {
                error!("Failed to re-evaluate pending port removals: {}", e);
                self.dependencies_changed = true;
            }
        }
    }

    fn has_pending_tasks(&self) -> bool {
        self.port_consumer.has_pending()
            || self.request_consumer.has_pending()
            || !self.requests.is_empty()
            || self.dependencies_changed
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.port_consumer
            .dump()
            .into_iter()
            .chain(self.request_consumer.dump())
            .collect()
    }
}

impl CfgMgr for DpbMgr {
    fn daemon_name(&self) -> &str {
        &self.daemon_name
    }

    fn config_table_names(&self) -> &[&str] {
        &[tables::CFG_PORT_TABLE_NAME, tables::CFG_BREAKOUT_REQUEST_TABLE_NAME]
    }

    fn subscriptions(&self) -> Vec<TableId> {
        let mut tables = vec![
            self.port_consumer.table().clone(),
            self.hardware_consumer.table().clone(),
            self.request_consumer.table().clone(),
        ];
        tables.extend(self.dependency_tables.iter().cloned());
        tables
    }

    fn add_to_sync(&mut self, table: &TableId, entries: Vec<KeyOpFieldsValues>) {
        if table == self.port_consumer.table() {
            self.port_consumer.add_to_sync(entries);
        } else if table == self.hardware_consumer.table() {
            self.hardware_consumer.add_to_sync(entries);
        } else if table == self.request_consumer.table() {
            self.request_consumer.add_to_sync(entries);
        } else if self.dependency_tables.contains(table) {
            debug!("{} changed, {} entries", table, entries.len());
            self.dependencies_changed = true;
        }
    }
}
