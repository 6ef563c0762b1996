//! Per-port reconciliation across the pipeline stages and breakout
//! orchestration.
//!
//! A port moves through the stages as follows:
//!
//! ```text
//! Absent -> ConfigPending -> ConfigPresent -> AppPresent -> HardwarePresent
//!                                                                 |
//! Absent <------------------------------------------------ PendingDelete
//! ```
//!
//! Configuration writes are the only trigger. The engine mirrors accepted
//! records into APPL_DB and asks the device to realize them; the hardware
//! stage is observed, never written.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use sonic_cfgmgr_common::FieldValuesExt;
use sonic_orch_common::{wait_for_key, DbId, ObjectStore, Operation, Presence, TableId};

use crate::config::{BreakoutGroup, DefaultsTemplate, EngineConfig, PlatformCatalog};
use crate::dependency::{Dependency, DependencyTracker};
use crate::device::PortDevice;
use crate::error::{DpbError, DpbResult};
use crate::planner::{BreakoutPlanner, ConfigurationDelta};
use crate::record::{AdminStatus, PortRecord};
use crate::tables::{self, fields};

/// Lifecycle state of one port name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortState {
    Absent,
    /// Configuration entry written, not yet validated.
    ConfigPending,
    /// Configuration entry validated.
    ConfigPresent,
    /// Mirrored into APPL_DB, waiting for the hardware object.
    AppPresent,
    HardwarePresent,
    /// Configuration entry deleted; removal waits for dependencies.
    PendingDelete,
}

impl PortState {
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            PortState::ConfigPresent | PortState::AppPresent | PortState::HardwarePresent
        )
    }
}

#[derive(Debug)]
struct PortEntry {
    state: PortState,
    record: Option<PortRecord>,
    /// The blocked diagnostic was logged for the current episode.
    blocked_logged: bool,
    /// APPL_DB entry removed and hardware removal requested.
    removal_requested: bool,
}

impl PortEntry {
    fn new(state: PortState) -> Self {
        Self {
            state,
            record: None,
            blocked_logged: false,
            removal_requested: false,
        }
    }

    /// Lanes still claimed by this port.
    fn claimed_record(&self) -> Option<&PortRecord> {
        if self.removal_requested {
            return None;
        }
        self.record.as_ref()
    }
}

/// A breakout or merge of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakoutRequest {
    /// Root port of the group, or any of its ports.
    pub port: String,
    pub mode: String,
    /// Clear dependencies of removed ports instead of refusing.
    pub force: bool,
    /// Bind created ports per the defaults template.
    pub load_defaults: bool,
}

impl BreakoutRequest {
    pub fn new(port: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            mode: mode.into(),
            force: false,
            load_defaults: false,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn load_defaults(mut self, load_defaults: bool) -> Self {
        self.load_defaults = load_defaults;
        self
    }
}

/// Outcome of a completed breakout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakoutReport {
    pub root: String,
    pub from_mode: String,
    pub to_mode: String,
    pub removed: Vec<String>,
    pub created: Vec<String>,
    /// Resources force-cleared, by port.
    pub cleared: Vec<(String, Dependency)>,
    /// Resources bound from the defaults template, by port.
    pub bound: Vec<(String, Dependency)>,
}

impl BreakoutReport {
    /// True when the group was already in the requested mode.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.created.is_empty()
    }
}

impl fmt::Display for BreakoutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {} -> {}", self.root, self.from_mode, self.to_mode)?;
        writeln!(f, "  removed: {}", self.removed.join(", "))?;
        writeln!(f, "  created: {}", self.created.join(", "))?;
        for (port, dep) in &self.cleared {
            writeln!(f, "  cleared: {} {}", port, dep)?;
        }
        for (port, dep) in &self.bound {
            writeln!(f, "  bound: {} {}", port, dep)?;
        }
        Ok(())
    }
}

/// Drives ports from configuration to hardware.
pub struct ReconciliationEngine {
    store: Arc<dyn ObjectStore>,
    device: Arc<dyn PortDevice>,
    tracker: DependencyTracker,
    planner: BreakoutPlanner,
    catalog: PlatformCatalog,
    defaults: DefaultsTemplate,
    config: EngineConfig,

    ports: Mutex<HashMap<String, PortEntry>>,

    /// Serializes breakouts per group index.
    group_locks: DashMap<u32, Arc<Mutex<()>>>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        device: Arc<dyn PortDevice>,
        catalog: PlatformCatalog,
        defaults: DefaultsTemplate,
        config: EngineConfig,
    ) -> Self {
        Self {
            tracker: DependencyTracker::new(store.clone()),
            store,
            device,
            planner: BreakoutPlanner::new(),
            catalog,
            defaults,
            config,
            ports: Mutex::new(HashMap::new()),
            group_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn catalog(&self) -> &PlatformCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    pub async fn port_state(&self, name: &str) -> PortState {
        self.ports
            .lock()
            .await
            .get(name)
            .map(|e| e.state)
            .unwrap_or(PortState::Absent)
    }

    /// Names of ports in `state`, sorted.
    pub async fn ports_in(&self, state: PortState) -> Vec<String> {
        let ports = self.ports.lock().await;
        let mut names: Vec<String> = ports
            .iter()
            .filter(|(_, e)| e.state == state)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Records that a configuration entry is about to be written.
    async fn mark_config_pending(&self, name: &str) {
        let mut ports = self.ports.lock().await;
        ports
            .entry(name.to_string())
            .or_insert_with(|| PortEntry::new(PortState::ConfigPending));
    }

    /// Handles a SET of the configuration entry `name`.
    ///
    /// The full record is read back from the store, validated and mirrored
    /// into APPL_DB. A record that fails validation is rolled back unless
    /// the port is already live, in which case the update is dropped.
    #[instrument(skip(self), fields(port = %name))]
    pub async fn handle_port_set(&self, name: &str) -> DpbResult<()> {
        let Some(fvs) = self.store.get(&tables::cfg_port(), name).await? else {
            debug!("Port {} vanished before it was handled", name);
            return Ok(());
        };

        let mut ports = self.ports.lock().await;
        let entry = ports
            .entry(name.to_string())
            .or_insert_with(|| PortEntry::new(PortState::ConfigPending));
        let previous = entry.state;

        let validated = match PortRecord::from_config(name, &fvs) {
            Ok(record) => {
                let overlap = ports
                    .iter()
                    .filter(|(other, _)| other.as_str() != name)
                    .filter_map(|(_, e)| e.claimed_record())
                    .find(|other| other.shares_lanes_with(&record))
                    .map(|other| other.name.clone());
                match overlap {
                    Some(other) => Err(DpbError::validation(
                        name,
                        format!("lanes {:?} overlap port {}", record.lanes, other),
                    )),
                    None => Ok(record),
                }
            }
            Err(e) => Err(e),
        };

        let record = match validated {
            Ok(record) => record,
            Err(e) if previous.is_live() => {
                error!("Rejected update of port {}: {}", name, e);
                return Err(e);
            }
            Err(e) => {
                error!("Rejected port {}: {}", name, e);
                ports.remove(name);
                drop(ports);
                self.store.del(&tables::cfg_port(), name).await?;
                return Err(e);
            }
        };

        let entry = ports
            .entry(name.to_string())
            .or_insert_with(|| PortEntry::new(PortState::ConfigPending));
        let default_admin = self.config.default_admin_status;
        let was_up = entry
            .record
            .as_ref()
            .is_some_and(|r| r.admin_status.unwrap_or(default_admin) == AdminStatus::Up);
        if previous == PortState::PendingDelete {
            info!("Configuration of port {} restored, cancelling its removal", name);
        }
        entry.state = PortState::ConfigPresent;
        entry.blocked_logged = false;
        entry.removal_requested = false;
        entry.record = Some(record.clone());

        let effective = record.with_defaults(self.config.default_mtu, self.config.default_admin_status);
        self.store
            .set(&tables::app_port(), name, &effective.to_config_fields())
            .await?;
        entry.state = PortState::AppPresent;
        self.device.apply_port(&effective).await?;

        if self.store.exists(&tables::asic_port(), name).await? {
            entry.state = PortState::HardwarePresent;
        }
        debug!("Port {} {:?} -> {:?}", name, previous, entry.state);
        drop(ports);

        if was_up && effective.admin_status == Some(AdminStatus::Down) {
            self.tracker.flush_neighbors(name).await?;
        }
        Ok(())
    }

    /// Handles a DEL of the configuration entry `name`.
    #[instrument(skip(self), fields(port = %name))]
    pub async fn handle_port_del(&self, name: &str) -> DpbResult<()> {
        {
            let mut ports = self.ports.lock().await;
            let Some(entry) = ports.get_mut(name) else {
                debug!("Port {} is not known, nothing to remove", name);
                return Ok(());
            };
            if entry.state == PortState::PendingDelete {
                return Ok(());
            }
            entry.state = PortState::PendingDelete;
            entry.blocked_logged = false;
            entry.removal_requested = false;
        }
        self.try_remove(name).await?;
        Ok(())
    }

    /// Removes a pending-delete port once nothing references it.
    ///
    /// Returns whether removal was requested.
    async fn try_remove(&self, name: &str) -> DpbResult<bool> {
        let deps = self.tracker.dependencies_of(name).await?;

        let mut ports = self.ports.lock().await;
        let Some(entry) = ports.get_mut(name) else {
            return Ok(false);
        };
        if entry.state != PortState::PendingDelete || entry.removal_requested {
            return Ok(false);
        }

        if !deps.is_empty() {
            if !entry.blocked_logged {
                let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
                warn!("Cannot remove port {}: dependency present ({})", name, deps.join(", "));
                entry.blocked_logged = true;
            }
            return Ok(false);
        }

        self.store.del(&tables::app_port(), name).await?;
        self.device.remove_port(name).await?;
        entry.removal_requested = true;

        if !self.store.exists(&tables::asic_port(), name).await? {
            ports.remove(name);
            info!("Port {} removed", name);
        } else {
            info!("Port {} removal requested", name);
        }
        Ok(true)
    }

    /// Retries removal of every blocked port.
    pub async fn reevaluate_pending_deletes(&self) -> DpbResult<()> {
        for name in self.ports_in(PortState::PendingDelete).await {
            if self.try_remove(&name).await? {
                debug!("Port {} unblocked", name);
            }
        }
        Ok(())
    }

    /// Tracks the hardware object of `name` appearing or disappearing.
    pub async fn handle_hardware_event(&self, name: &str, op: Operation) {
        let mut ports = self.ports.lock().await;
        let Some(entry) = ports.get_mut(name) else {
            return;
        };

        match (op, entry.state) {
            (Operation::Set, PortState::ConfigPresent | PortState::AppPresent) => {
                entry.state = PortState::HardwarePresent;
                info!("Port {} is present in hardware", name);
            }
            (Operation::Del, PortState::PendingDelete) if entry.removal_requested => {
                ports.remove(name);
                info!("Port {} removed", name);
            }
            (Operation::Del, PortState::HardwarePresent) => {
                warn!("Hardware object of port {} disappeared", name);
                entry.state = PortState::AppPresent;
            }
            _ => {}
        }
    }

    async fn await_stage(&self, port: &str, table: &TableId, presence: Presence) -> DpbResult<()> {
        let timeout = self.config.convergence_timeout;
        let outcome = wait_for_key(self.store.as_ref(), table, port, presence, timeout).await?;
        if outcome.is_ready() {
            Ok(())
        } else {
            Err(DpbError::ConvergenceTimeout {
                port: port.to_string(),
                stage: table.db,
                timeout,
            })
        }
    }

    /// Configured ports belonging to `group`, in name order.
    async fn group_ports(&self, group: &BreakoutGroup) -> DpbResult<Vec<PortRecord>> {
        let table = tables::cfg_port();
        let mut ports = Vec::new();
        for entry in self.store.read_table(&table).await? {
            let in_group = self
                .catalog
                .group_of_port(&entry.key)
                .is_some_and(|g| g.root == group.root);
            if in_group {
                ports.push(PortRecord::from_config(&entry.key, &entry.fvs)?);
            }
        }
        Ok(ports)
    }

    async fn current_mode(&self, group: &BreakoutGroup) -> DpbResult<String> {
        let mode = self
            .store
            .get(&tables::cfg_breakout_cfg(), &group.root)
            .await?
            .and_then(|fvs| fvs.get_field(fields::BRKOUT_MODE).map(str::to_string));
        Ok(mode.unwrap_or_else(|| group.default_mode.clone()))
    }

    /// Moves the group of `request.port` to `request.mode`.
    ///
    /// Without `force`, fails with [`DpbError::DependencyBlocked`] and
    /// changes nothing if a port to be removed is still referenced.
    /// Configuration writes are commit points: a failure after them leaves
    /// the stages reached so far in place.
    #[instrument(skip(self, request), fields(port = %request.port, mode = %request.mode))]
    pub async fn breakout(&self, request: &BreakoutRequest) -> DpbResult<BreakoutReport> {
        let group = self
            .catalog
            .group_of_port(&request.port)
            .ok_or_else(|| DpbError::validation(&request.port, "not part of any breakout group"))?
            .clone();
        let target_mode = group.mode(&request.mode)?;

        let lock = self.group_locks.entry(group.index).or_default().clone();
        let _guard = lock.lock().await;

        let from_mode = self.current_mode(&group).await?;
        let mut report = BreakoutReport {
            root: group.root.clone(),
            from_mode: from_mode.clone(),
            to_mode: request.mode.clone(),
            ..Default::default()
        };
        if from_mode == request.mode {
            info!("Port {} is already in mode {}", group.root, from_mode);
            return Ok(report);
        }

        let current = self.group_ports(&group).await?;
        let target = self.planner.split_mode(&group.parent_record(), &target_mode)?;
        let delta = if current.is_empty() {
            ConfigurationDelta {
                removed: Vec::new(),
                created: target,
            }
        } else {
            let merged = self.planner.merge(&current)?;
            if merged.lanes != group.lanes {
                return Err(DpbError::validation(
                    &group.root,
                    format!("configured lanes {:?} differ from group lanes {:?}", merged.lanes, group.lanes),
                ));
            }
            ConfigurationDelta::between(&current, &target)?
        };
        info!(
            "Breakout {} {} -> {}: removing {}, creating {}",
            group.root,
            from_mode,
            request.mode,
            delta.removed.len(),
            delta.created.len()
        );

        let mut blocked = BTreeMap::new();
        for port in &delta.removed {
            let deps = self.tracker.dependencies_of(&port.name).await?;
            if !deps.is_empty() {
                blocked.insert(port.name.clone(), deps.into_iter().collect::<Vec<_>>());
            }
        }
        if !blocked.is_empty() {
            if !request.force {
                return Err(DpbError::DependencyBlocked {
                    port: request.port.clone(),
                    blocked,
                });
            }
            for (port, deps) in &blocked {
                if let Some(dep) = deps.iter().find(|d| !d.is_force_clearable()) {
                    return Err(DpbError::UnresolvedDependency {
                        port: port.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            for port in blocked.keys() {
                for dep in self.tracker.force_clear(port).await? {
                    report.cleared.push((port.clone(), dep));
                }
            }
        }

        for port in &delta.removed {
            self.store.del(&tables::cfg_port(), &port.name).await?;
        }
        for port in &delta.removed {
            self.await_stage(&port.name, &tables::app_port(), Presence::Absent).await?;
            self.await_stage(&port.name, &tables::asic_port(), Presence::Absent).await?;
            report.removed.push(port.name.clone());
        }

        for port in &delta.created {
            self.mark_config_pending(&port.name).await;
            self.store
                .set(&tables::cfg_port(), &port.name, &port.to_config_fields())
                .await?;
        }
        for port in &delta.created {
            self.await_stage(&port.name, &tables::asic_port(), Presence::Present).await?;
            report.created.push(port.name.clone());
        }

        self.store
            .set(
                &tables::cfg_breakout_cfg(),
                &group.root,
                &[(fields::BRKOUT_MODE.to_string(), request.mode.clone())],
            )
            .await?;

        if request.load_defaults {
            for port in &delta.created {
                let Some(defaults) = self.defaults.get(&port.name) else {
                    continue;
                };
                for dep in self.tracker.bind_defaults(&port.name, defaults).await? {
                    report.bound.push((port.name.clone(), dep));
                }
            }
        }

        info!(
            "Breakout {} -> {} complete: removed {:?}, created {:?}",
            group.root, request.mode, report.removed, report.created
        );
        Ok(report)
    }

    /// Stage a port has reached in the store, for diagnostics.
    pub async fn observed_stage(&self, name: &str) -> DpbResult<Option<DbId>> {
        for (table, db) in [
            (tables::asic_port(), DbId::AsicDb),
            (tables::app_port(), DbId::ApplDb),
            (tables::cfg_port(), DbId::ConfigDb),
        ] {
            if self.store.exists(&table, name).await? {
                return Ok(Some(db));
            }
        }
        Ok(None)
    }
}
