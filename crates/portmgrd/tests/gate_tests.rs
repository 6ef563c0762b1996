//! Convergence gate behavior driven through the daemon run loop.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sonic_cfgmgr_common::runner;
use sonic_orch_common::{MemoryStore, ObjectStore, TableId};
use sonic_portmgrd::{KernelCommand, PortMgr, RecordingLink};

struct TestSetup {
    store: Arc<MemoryStore>,
    link: Arc<RecordingLink>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestSetup {
    async fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let link = Arc::new(RecordingLink::new());
        let shutdown = CancellationToken::new();

        let mut mgr = PortMgr::new(store.clone(), link.clone());
        let loop_store: Arc<dyn ObjectStore> = store.clone();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            runner::run(&mut mgr, loop_store, token).await.unwrap();
        });
        // Let the loop finish its initial load
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            store,
            link,
            shutdown,
            handle,
        }
    }

    async fn set_port(&self, alias: &str, field: &str, value: &str) {
        self.store
            .set(&TableId::config("PORT"), alias, &[(field.to_string(), value.to_string())])
            .await
            .unwrap();
    }

    async fn mark_ready(&self, alias: &str) {
        self.store
            .set(&TableId::state("PORT_TABLE"), alias, &[("state".to_string(), "ok".to_string())])
            .await
            .unwrap();
    }

    /// Polls until `alias` has `count` applied commands.
    async fn wait_for_commands(&self, alias: &str, count: usize) -> Vec<KernelCommand> {
        for _ in 0..200 {
            let commands = self.link.commands_for(alias).await;
            if commands.len() >= count {
                return commands;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.link.commands_for(alias).await
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap();
    }
}

fn mtu(port: &str, mtu: &str) -> KernelCommand {
    KernelCommand::Mtu {
        port: port.to_string(),
        mtu: mtu.to_string(),
    }
}

fn admin(port: &str, up: bool) -> KernelCommand {
    KernelCommand::AdminStatus {
        port: port.to_string(),
        up,
    }
}

#[tokio::test]
async fn test_settings_wait_for_gate_and_coalesce() {
    let setup = TestSetup::start().await;

    setup.set_port("Ethernet0", "mtu", "1500").await;
    setup.set_port("Ethernet0", "mtu", "1600").await;
    setup.set_port("Ethernet0", "mtu", "1700").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(setup.link.commands().await.is_empty());

    setup.mark_ready("Ethernet0").await;
    let commands = setup.wait_for_commands("Ethernet0", 2).await;

    assert_eq!(commands, vec![mtu("Ethernet0", "1700"), admin("Ethernet0", false)]);
    setup.stop().await;
}

#[tokio::test]
async fn test_ready_port_applies_immediately() {
    let setup = TestSetup::start().await;
    setup.mark_ready("Ethernet8").await;

    setup.set_port("Ethernet8", "admin_status", "up").await;
    let commands = setup.wait_for_commands("Ethernet8", 2).await;
    assert_eq!(commands, vec![mtu("Ethernet8", "9100"), admin("Ethernet8", true)]);

    setup.set_port("Ethernet8", "mtu", "4000").await;
    let commands = setup.wait_for_commands("Ethernet8", 3).await;
    assert_eq!(commands[2], mtu("Ethernet8", "4000"));

    setup.stop().await;
}

#[tokio::test]
async fn test_existing_config_is_loaded_at_startup() {
    let store = Arc::new(MemoryStore::new());
    let link = Arc::new(RecordingLink::new());
    store
        .set(&TableId::config("PORT"), "Ethernet4", &[("mtu".to_string(), "2000".to_string())])
        .await
        .unwrap();
    store
        .set(&TableId::state("PORT_TABLE"), "Ethernet4", &[("state".to_string(), "ok".to_string())])
        .await
        .unwrap();

    let mut mgr = PortMgr::new(store.clone(), link.clone());
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    runner::run(&mut mgr, store, shutdown).await.unwrap();

    assert_eq!(link.commands().await, vec![mtu("Ethernet4", "2000"), admin("Ethernet4", false)]);
}
