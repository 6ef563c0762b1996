//! Object store boundary shared by the configuration daemons.
//!
//! Four logical databases hold the pipeline stages of a port:
//!
//! | Database  | Id | Separator | Stage                                  |
//! |-----------|----|-----------|----------------------------------------|
//! | CONFIG_DB | 4  | `\|`      | operator intent                        |
//! | APPL_DB   | 0  | `:`       | validated application state            |
//! | ASIC_DB   | 1  | `:`       | hardware objects                       |
//! | STATE_DB  | 6  | `\|`      | operational readiness (kernel netdevs) |
//!
//! Every successful write publishes a [`StoreEvent`] to subscribers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

use crate::consumer::{FieldValue, KeyOpFieldsValues, Operation};

/// Capacity of the change notification channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Store command '{operation}' failed: {message}")]
    Command { operation: String, message: String },

    #[error("Invalid store data: {0}")]
    InvalidData(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Logical database identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DbId {
    ConfigDb,
    ApplDb,
    AsicDb,
    StateDb,
}

impl DbId {
    pub const ALL: [DbId; 4] = [DbId::ConfigDb, DbId::ApplDb, DbId::AsicDb, DbId::StateDb];

    pub fn name(&self) -> &'static str {
        match self {
            DbId::ConfigDb => "CONFIG_DB",
            DbId::ApplDb => "APPL_DB",
            DbId::AsicDb => "ASIC_DB",
            DbId::StateDb => "STATE_DB",
        }
    }

    /// Redis database number.
    pub fn id(&self) -> u8 {
        match self {
            DbId::ConfigDb => 4,
            DbId::ApplDb => 0,
            DbId::AsicDb => 1,
            DbId::StateDb => 6,
        }
    }

    /// Separator between table name and key.
    pub fn separator(&self) -> char {
        match self {
            DbId::ConfigDb | DbId::StateDb => '|',
            DbId::ApplDb | DbId::AsicDb => ':',
        }
    }
}

impl fmt::Display for DbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A table inside one logical database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    pub db: DbId,
    pub name: String,
}

impl TableId {
    pub fn new(db: DbId, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
        }
    }

    pub fn config(name: impl Into<String>) -> Self {
        Self::new(DbId::ConfigDb, name)
    }

    pub fn appl(name: impl Into<String>) -> Self {
        Self::new(DbId::ApplDb, name)
    }

    pub fn asic(name: impl Into<String>) -> Self {
        Self::new(DbId::AsicDb, name)
    }

    pub fn state(name: impl Into<String>) -> Self {
        Self::new(DbId::StateDb, name)
    }

    /// Flat key used by key-value backends, e.g. `PORT|Ethernet0`.
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}{}", self.name, self.db.separator(), key)
    }

    /// Inverse of [`TableId::full_key`].
    pub fn strip_key<'a>(&self, full_key: &'a str) -> Option<&'a str> {
        full_key
            .strip_prefix(self.name.as_str())?
            .strip_prefix(self.db.separator())
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.db, self.name)
    }
}

/// Change notification published after a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEvent {
    pub table: TableId,
    pub key: String,
    pub op: Operation,
    /// Fields written by a SET; empty for DEL.
    pub fvs: Vec<FieldValue>,
}

impl StoreEvent {
    pub fn set(table: TableId, key: impl Into<String>, fvs: Vec<FieldValue>) -> Self {
        Self {
            table,
            key: key.into(),
            op: Operation::Set,
            fvs,
        }
    }

    pub fn del(table: TableId, key: impl Into<String>) -> Self {
        Self {
            table,
            key: key.into(),
            op: Operation::Del,
            fvs: Vec::new(),
        }
    }

    pub fn into_entry(self) -> KeyOpFieldsValues {
        KeyOpFieldsValues::new(self.key, self.op, self.fvs)
    }
}

/// Keyed record store with change notifications.
///
/// `set` merges the given fields into the record, creating it if needed.
/// `del` of a missing key is a no-op and publishes nothing.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, table: &TableId, key: &str) -> StoreResult<Option<Vec<FieldValue>>>;

    async fn set(&self, table: &TableId, key: &str, fvs: &[FieldValue]) -> StoreResult<()>;

    async fn del(&self, table: &TableId, key: &str) -> StoreResult<()>;

    async fn keys(&self, table: &TableId) -> StoreResult<Vec<String>>;

    /// Subscribes to change notifications published from now on.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    async fn exists(&self, table: &TableId, key: &str) -> StoreResult<bool> {
        Ok(self.get(table, key).await?.is_some())
    }

    /// Reads a whole table as SET changes, keys in lexical order.
    async fn read_table(&self, table: &TableId) -> StoreResult<Vec<KeyOpFieldsValues>> {
        let mut keys = self.keys(table).await?;
        keys.sort();

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(fvs) = self.get(table, &key).await? {
                entries.push(KeyOpFieldsValues::set(key, fvs));
            }
        }
        Ok(entries)
    }
}

type Table = BTreeMap<String, Vec<FieldValue>>;

/// In-process store used by tests and the simulated switch.
pub struct MemoryStore {
    tables: RwLock<HashMap<TableId, Table>>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tables: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn publish(&self, event: StoreEvent) {
        trace!("{} {}{}{}", event.op, event.table, event.table.db.separator(), event.key);
        // No receivers is not an error.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, table: &TableId, key: &str) -> StoreResult<Option<Vec<FieldValue>>> {
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    async fn set(&self, table: &TableId, key: &str, fvs: &[FieldValue]) -> StoreResult<()> {
        {
            let mut tables = self.tables.write().await;
            let record = tables
                .entry(table.clone())
                .or_default()
                .entry(key.to_string())
                .or_default();
            for (field, value) in fvs {
                match record.iter_mut().find(|(f, _)| f == field) {
                    Some(slot) => slot.1 = value.clone(),
                    None => record.push((field.clone(), value.clone())),
                }
            }
        }
        self.publish(StoreEvent::set(table.clone(), key, fvs.to_vec()));
        Ok(())
    }

    async fn del(&self, table: &TableId, key: &str) -> StoreResult<()> {
        let removed = {
            let mut tables = self.tables.write().await;
            tables
                .get_mut(table)
                .and_then(|t| t.remove(key))
                .is_some()
        };
        if removed {
            self.publish(StoreEvent::del(table.clone(), key));
        }
        Ok(())
    }

    async fn keys(&self, table: &TableId) -> StoreResult<Vec<String>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

/// Whether a wait expects the key to appear or to disappear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready)
    }
}

/// Waits until `key` reaches `presence` in `table`, or `timeout` elapses.
///
/// Subscribes before the first check so no transition can be missed.
pub async fn wait_for_key(
    store: &dyn ObjectStore,
    table: &TableId,
    key: &str,
    presence: Presence,
    timeout: Duration,
) -> StoreResult<WaitOutcome> {
    let deadline = Instant::now() + timeout;
    let mut events = store.subscribe();

    loop {
        let present = store.exists(table, key).await?;
        if present == (presence == Presence::Present) {
            return Ok(WaitOutcome::Ready);
        }

        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Err(_) => {
                    debug!("Timed out waiting for {} {} to be {:?}", table, key, presence);
                    return Ok(WaitOutcome::TimedOut);
                }
                Ok(Ok(event)) if event.table == *table && event.key == key => break,
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(missed))) => {
                    warn!("Missed {} store notifications while waiting on {}", missed, key);
                    break;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(StoreError::Connection(
                        "store notification channel closed".to_string(),
                    ));
                }
            }
        }
    }
}
