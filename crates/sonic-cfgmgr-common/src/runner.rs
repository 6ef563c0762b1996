//! Shared event loop of the configuration manager daemons.
//!
//! 1. Replay every subscribed table as SET changes (initial load)
//! 2. Feed each store notification to the manager's consumers
//! 3. Call `do_task()` after each batch of changes and on every idle tick
//! 4. Return once the shutdown token is cancelled

use std::sync::Arc;
use std::time::Duration;

use sonic_orch_common::{ObjectStore, StoreEvent, TableId};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CfgMgrError, CfgMgrResult};
use crate::manager::{defaults, CfgMgr};

async fn load_tables<M: CfgMgr>(
    mgr: &mut M,
    store: &dyn ObjectStore,
    tables: &[TableId],
) -> CfgMgrResult<()> {
    for table in tables {
        let entries = store.read_table(table).await?;
        debug!(table = %table, count = entries.len(), "Loaded table");
        if !entries.is_empty() {
            mgr.add_to_sync(table, entries);
        }
    }
    Ok(())
}

fn dispatch<M: CfgMgr>(mgr: &mut M, tables: &[TableId], event: StoreEvent) {
    if tables.contains(&event.table) {
        let table = event.table.clone();
        mgr.add_to_sync(&table, vec![event.into_entry()]);
    }
}

/// Runs `mgr` against `store` until `shutdown` is cancelled.
pub async fn run<M: CfgMgr>(
    mgr: &mut M,
    store: Arc<dyn ObjectStore>,
    shutdown: CancellationToken,
) -> CfgMgrResult<()> {
    let tables = mgr.subscriptions();
    // Subscribe before loading so nothing written in between is lost.
    let mut events = store.subscribe();

    load_tables(mgr, store.as_ref(), &tables).await?;
    mgr.do_task().await;
    info!(daemon = mgr.daemon_name(), tables = tables.len(), "Initial load complete");

    let mut ticker = tokio::time::interval(Duration::from_millis(defaults::SELECT_TIMEOUT_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(daemon = mgr.daemon_name(), "Shutting down");
                return Ok(());
            }
            received = events.recv() => match received {
                Ok(event) => {
                    dispatch(mgr, &tables, event);
                    loop {
                        match events.try_recv() {
                            Ok(event) => dispatch(mgr, &tables, event),
                            Err(TryRecvError::Lagged(missed)) => {
                                warn!(missed, "Notifications lagged, reloading subscribed tables");
                                load_tables(mgr, store.as_ref(), &tables).await?;
                            }
                            Err(_) => break,
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Notifications lagged, reloading subscribed tables");
                    load_tables(mgr, store.as_ref(), &tables).await?;
                }
                Err(RecvError::Closed) => {
                    return Err(CfgMgrError::internal("store notification channel closed"));
                }
            },
            _ = ticker.tick() => {}
        }

        mgr.do_task().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use sonic_orch_common::{Consumer, KeyOpFieldsValues, MemoryStore, Orch};

    struct Recorder {
        consumer: Consumer,
        seen: Vec<String>,
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl Orch for Recorder {
        fn name(&self) -> &str {
            "Recorder"
        }

        async fn do_task(&mut self) {
            for entry in self.consumer.drain() {
                self.seen.push(format!("{} {}", entry.op, entry.key));
            }
            if self.seen.len() >= 3 {
                self.shutdown.cancel();
            }
        }
    }

    impl CfgMgr for Recorder {
        fn daemon_name(&self) -> &str {
            "recorder"
        }

        fn config_table_names(&self) -> &[&str] {
            &["PORT"]
        }

        fn add_to_sync(&mut self, _table: &TableId, entries: Vec<KeyOpFieldsValues>) {
            self.consumer.add_to_sync(entries);
        }
    }

    #[tokio::test]
    async fn test_run_replays_then_follows_changes() {
        let store = Arc::new(MemoryStore::new());
        let port = TableId::config("PORT");
        store
            .set(&port, "Ethernet0", &[("lanes".to_string(), "0".to_string())])
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let mut recorder = Recorder {
            consumer: Consumer::new(port.clone()),
            seen: Vec::new(),
            shutdown: shutdown.clone(),
        };

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let port = TableId::config("PORT");
            // Not subscribed, must not be delivered
            writer
                .set(&TableId::config("VLAN"), "Vlan100", &[("vlanid".to_string(), "100".to_string())])
                .await
                .unwrap();
            writer
                .set(&port, "Ethernet4", &[("lanes".to_string(), "4".to_string())])
                .await
                .unwrap();
            writer.del(&port, "Ethernet0").await.unwrap();
        });

        tokio::time::timeout(Duration::from_secs(5), run(&mut recorder, store, shutdown))
            .await
            .unwrap()
            .unwrap();

        // The two later changes may be drained in one batch, in key order.
        assert_eq!(recorder.seen[0], "SET Ethernet0");
        let mut seen = recorder.seen.clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                "DEL Ethernet0".to_string(),
                "SET Ethernet0".to_string(),
                "SET Ethernet4".to_string(),
            ]
        );
    }
}
