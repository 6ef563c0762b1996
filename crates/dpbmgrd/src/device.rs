//! Device abstraction realizing port objects in the hardware stage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use sonic_cfgmgr_common::FieldValuesExt;
use sonic_orch_common::ObjectStore;

use crate::error::{DpbError, DpbResult};
use crate::record::{parse_hardware_lanes, PortRecord};
use crate::tables::{self, fields};

/// Asynchronous sink for port object requests.
///
/// Requests are fire-and-forget: completion is observed in the hardware
/// stage, never returned.
#[async_trait]
pub trait PortDevice: Send + Sync {
    async fn apply_port(&self, port: &PortRecord) -> DpbResult<()>;

    async fn remove_port(&self, name: &str) -> DpbResult<()>;
}

#[derive(Debug)]
enum DeviceRequest {
    Apply(PortRecord),
    Remove(String),
}

#[derive(Debug, Clone)]
pub struct VirtualSwitchConfig {
    /// Delay before each request takes effect.
    pub latency: Duration,
    /// Also asserts STATE_DB `PORT_TABLE|<port>` `state=ok` when a port is created.
    pub assert_gate: bool,
}

impl Default for VirtualSwitchConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(10),
            assert_gate: false,
        }
    }
}

const OID_BASE: u64 = 0x1000000000000;

/// Simulated switch writing port objects into ASIC_DB.
///
/// Requests are processed in order by a single worker task.
pub struct VirtualSwitch {
    requests: mpsc::UnboundedSender<DeviceRequest>,
    worker: JoinHandle<()>,
}

impl VirtualSwitch {
    pub fn spawn(store: Arc<dyn ObjectStore>, config: VirtualSwitchConfig) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(
            SwitchWorker {
                store,
                config,
                next_oid: AtomicU64::new(1),
            }
            .run(rx),
        );
        Self { requests, worker }
    }

    fn submit(&self, request: DeviceRequest) -> DpbResult<()> {
        self.requests
            .send(request)
            .map_err(|e| DpbError::config(format!("virtual switch stopped, dropped {:?}", e.0)))
    }
}

impl Drop for VirtualSwitch {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[async_trait]
impl PortDevice for VirtualSwitch {
    async fn apply_port(&self, port: &PortRecord) -> DpbResult<()> {
        self.submit(DeviceRequest::Apply(port.clone()))
    }

    async fn remove_port(&self, name: &str) -> DpbResult<()> {
        self.submit(DeviceRequest::Remove(name.to_string()))
    }
}

struct SwitchWorker {
    store: Arc<dyn ObjectStore>,
    config: VirtualSwitchConfig,
    next_oid: AtomicU64,
}

impl SwitchWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<DeviceRequest>) {
        while let Some(request) = rx.recv().await {
            tokio::time::sleep(self.config.latency).await;
            let result = match &request {
                DeviceRequest::Apply(port) => self.create_or_update(port).await,
                DeviceRequest::Remove(name) => self.remove(name).await,
            };
            if let Err(e) = result {
                error!("Virtual switch failed to handle {:?}: {}", request, e);
            }
        }
        debug!("Virtual switch request channel closed");
    }

    /// Name of a hardware port other than `port` that owns one of its lanes.
    async fn lane_owner(&self, port: &PortRecord) -> DpbResult<Option<String>> {
        let table = tables::asic_port();
        for name in self.store.keys(&table).await? {
            if name == port.name {
                continue;
            }
            let Some(fvs) = self.store.get(&table, &name).await? else {
                continue;
            };
            let lanes = fvs
                .get_field(fields::LANES)
                .map(parse_hardware_lanes)
                .transpose()
                .map_err(|e| DpbError::validation(&name, e))?
                .unwrap_or_default();
            if lanes.iter().any(|l| port.lanes.contains(l)) {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    async fn create_or_update(&self, port: &PortRecord) -> DpbResult<()> {
        if let Some(owner) = self.lane_owner(port).await? {
            warn!(
                "Refusing to create port {}: lanes {:?} overlap hardware port {}",
                port.name, port.lanes, owner
            );
            return Ok(());
        }

        let table = tables::asic_port();
        let existing = self.store.get(&table, &port.name).await?;
        let oid = match existing.as_deref().and_then(|fvs| fvs.get_field(fields::OID)) {
            Some(oid) => oid.to_string(),
            None => format!("oid:{:#x}", OID_BASE + self.next_oid.fetch_add(1, Ordering::Relaxed)),
        };

        self.store.set(&table, &port.name, &port.to_hardware_fields(&oid)).await?;
        if existing.is_none() {
            info!("Created hardware port {} ({})", port.name, oid);
        } else {
            debug!("Updated hardware port {}", port.name);
        }

        if self.config.assert_gate && existing.is_none() {
            self.store
                .set(
                    &tables::state_port(),
                    &port.name,
                    &[(fields::STATE.to_string(), tables::STATE_OK.to_string())],
                )
                .await?;
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> DpbResult<()> {
        if self.config.assert_gate {
            self.store.del(&tables::state_port(), name).await?;
        }
        self.store.del(&tables::asic_port(), name).await?;
        info!("Removed hardware port {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AdminStatus;
    use pretty_assertions::assert_eq;
    use sonic_orch_common::{wait_for_key, MemoryStore, Presence};

    const WAIT: Duration = Duration::from_secs(5);

    fn setup(assert_gate: bool) -> (VirtualSwitch, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let switch = VirtualSwitch::spawn(
            store.clone(),
            VirtualSwitchConfig {
                latency: Duration::from_millis(1),
                assert_gate,
            },
        );
        (switch, store)
    }

    async fn wait(store: &MemoryStore, name: &str, presence: Presence) {
        let outcome = wait_for_key(store, &tables::asic_port(), name, presence, WAIT).await.unwrap();
        assert!(outcome.is_ready(), "{} never became {:?}", name, presence);
    }

    #[tokio::test]
    async fn test_apply_writes_hardware_record() {
        let (switch, store) = setup(false);
        let port = PortRecord::new("Ethernet0", "Eth0", vec![0, 1, 2, 3], 100000, 0)
            .with_defaults(9100, AdminStatus::Down);

        switch.apply_port(&port).await.unwrap();
        wait(&store, "Ethernet0", Presence::Present).await;

        let fvs = store.get(&tables::asic_port(), "Ethernet0").await.unwrap().unwrap();
        assert_eq!(fvs.get_field("oid"), Some("oid:0x1000000000001"));
        assert_eq!(fvs.get_field("lanes"), Some("4:0,1,2,3"));
        assert_eq!(fvs.get_field("mtu"), Some("9122"));
        assert_eq!(fvs.get_field("admin_state"), Some("false"));
        assert!(!store.exists(&tables::state_port(), "Ethernet0").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_keeps_oid() {
        let (switch, store) = setup(false);
        let port = PortRecord::new("Ethernet0", "Eth0", vec![0, 1], 50000, 0);

        switch.apply_port(&port).await.unwrap();
        switch.apply_port(&port.clone().with_mtu(1500)).await.unwrap();
        switch.apply_port(&PortRecord::new("Ethernet4", "Eth4", vec![4], 25000, 1)).await.unwrap();
        wait(&store, "Ethernet4", Presence::Present).await;

        let fvs = store.get(&tables::asic_port(), "Ethernet0").await.unwrap().unwrap();
        assert_eq!(fvs.get_field("oid"), Some("oid:0x1000000000001"));
        assert_eq!(fvs.get_field("mtu"), Some("1522"));
    }

    #[tokio::test]
    async fn test_overlapping_lanes_refused() {
        let (switch, store) = setup(false);
        switch
            .apply_port(&PortRecord::new("Ethernet0", "Eth0", vec![0, 1, 2, 3], 100000, 0))
            .await
            .unwrap();
        switch.apply_port(&PortRecord::new("Ethernet1", "Eth0/1", vec![1], 25000, 0)).await.unwrap();
        switch.apply_port(&PortRecord::new("Ethernet8", "Eth8", vec![8], 25000, 2)).await.unwrap();
        wait(&store, "Ethernet8", Presence::Present).await;

        assert!(!store.exists(&tables::asic_port(), "Ethernet1").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_is_ordered_after_apply() {
        let (switch, store) = setup(true);
        let port = PortRecord::new("Ethernet0", "Eth0", vec![0], 25000, 0);

        switch.apply_port(&port).await.unwrap();
        let outcome = wait_for_key(store.as_ref(), &tables::state_port(), "Ethernet0", Presence::Present, WAIT)
            .await
            .unwrap();
        assert!(outcome.is_ready());
        assert!(store.exists(&tables::asic_port(), "Ethernet0").await.unwrap());
        assert_eq!(
            store.get(&tables::state_port(), "Ethernet0").await.unwrap(),
            Some(vec![("state".to_string(), "ok".to_string())])
        );

        switch.remove_port("Ethernet0").await.unwrap();
        wait(&store, "Ethernet0", Presence::Absent).await;
        assert!(!store.exists(&tables::state_port(), "Ethernet0").await.unwrap());
    }
}
