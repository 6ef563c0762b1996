//! Redis backend for [`ObjectStore`].
//!
//! Each logical database maps to its numbered Redis database; records are
//! hashes stored under `TABLE<sep>key`. Change notifications are JSON
//! encoded [`StoreEvent`]s published on [`NOTIFY_CHANNEL`], so every
//! process sharing the server observes writes made through a `RedisStore`.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use log::{debug, info, warn};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::consumer::FieldValue;
use crate::store::{
    DbId, ObjectStore, StoreError, StoreEvent, StoreResult, TableId, EVENT_CHANNEL_CAPACITY,
};

/// Pub/sub channel carrying store change notifications.
pub const NOTIFY_CHANNEL: &str = "dpb-store";

/// Placeholder field for records written without fields; Redis has no empty hashes.
const NULL_FIELD: (&str, &str) = ("NULL", "NULL");

/// Redis server location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
}

impl RedisConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Connection URI selecting the database of `db`.
    pub fn uri(&self, db: DbId) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, db.id())
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 6379)
    }
}

/// Store backed by a Redis server.
pub struct RedisStore {
    config: RedisConfig,
    connections: HashMap<DbId, ConnectionManager>,
    events: broadcast::Sender<StoreEvent>,
    forwarder: JoinHandle<()>,
}

fn command_error(operation: &str, err: redis::RedisError) -> StoreError {
    StoreError::Command {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}

fn open_client(config: &RedisConfig, db: DbId) -> StoreResult<redis::Client> {
    let uri = config.uri(db);
    redis::Client::open(uri.as_str()).map_err(|e| StoreError::Connection(format!("{}: {}", uri, e)))
}

/// Decodes a notification payload.
pub fn decode_event(payload: &str) -> StoreResult<StoreEvent> {
    serde_json::from_str(payload).map_err(|e| StoreError::InvalidData(format!("{}: {}", payload, e)))
}

impl RedisStore {
    /// Connects to every logical database and starts the notification forwarder.
    pub async fn connect(config: RedisConfig) -> StoreResult<Self> {
        let mut connections = HashMap::new();
        for db in DbId::ALL {
            let client = open_client(&config, db)?;
            let connection = client.get_connection_manager().await.map_err(|e| {
                StoreError::Connection(format!("Failed to connect to {}: {}", db, e))
            })?;
            connections.insert(db, connection);
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut pubsub = open_client(&config, DbId::ConfigDb)?
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open pub/sub: {}", e)))?;
        pubsub
            .subscribe(NOTIFY_CHANNEL)
            .await
            .map_err(|e| command_error("SUBSCRIBE", e))?;

        let sender = events.clone();
        let forwarder = tokio::spawn(async move {
            let mut messages = std::pin::pin!(pubsub.into_on_message());
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Dropping undecodable notification: {}", e);
                        continue;
                    }
                };
                match decode_event(&payload) {
                    Ok(event) => {
                        let _ = sender.send(event);
                    }
                    Err(e) => debug!("Ignoring foreign notification: {}", e),
                }
            }
            warn!("Redis notification stream ended");
        });

        info!("Connected to Redis {}:{}", config.host, config.port);
        Ok(Self {
            config,
            connections,
            events,
            forwarder,
        })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    fn connection(&self, db: DbId) -> StoreResult<ConnectionManager> {
        self.connections
            .get(&db)
            .cloned()
            .ok_or_else(|| StoreError::Connection(format!("No connection for {}", db)))
    }

    async fn publish(&self, event: StoreEvent) -> StoreResult<()> {
        let payload = serde_json::to_string(&event)
            .map_err(|e| StoreError::InvalidData(format!("Failed to encode event: {}", e)))?;
        let mut conn = self.connection(event.table.db)?;
        let _: i64 = conn
            .publish(NOTIFY_CHANNEL, payload)
            .await
            .map_err(|e| command_error("PUBLISH", e))?;
        Ok(())
    }
}

impl Drop for RedisStore {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

#[async_trait]
impl ObjectStore for RedisStore {
    async fn get(&self, table: &TableId, key: &str) -> StoreResult<Option<Vec<FieldValue>>> {
        let mut conn = self.connection(table.db)?;
        let fields: BTreeMap<String, String> = conn
            .hgetall(table.full_key(key))
            .await
            .map_err(|e| command_error("HGETALL", e))?;

        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(fields.into_iter().collect()))
    }

    async fn set(&self, table: &TableId, key: &str, fvs: &[FieldValue]) -> StoreResult<()> {
        let mut conn = self.connection(table.db)?;
        let full_key = table.full_key(key);

        if fvs.is_empty() {
            let _: () = conn
                .hset(&full_key, NULL_FIELD.0, NULL_FIELD.1)
                .await
                .map_err(|e| command_error("HSET", e))?;
        } else {
            let _: () = conn
                .hset_multiple(&full_key, fvs)
                .await
                .map_err(|e| command_error("HSET", e))?;
        }

        self.publish(StoreEvent::set(table.clone(), key, fvs.to_vec())).await
    }

    async fn del(&self, table: &TableId, key: &str) -> StoreResult<()> {
        let mut conn = self.connection(table.db)?;
        let removed: i64 = conn
            .del(table.full_key(key))
            .await
            .map_err(|e| command_error("DEL", e))?;

        if removed > 0 {
            self.publish(StoreEvent::del(table.clone(), key)).await?;
        }
        Ok(())
    }

    async fn keys(&self, table: &TableId) -> StoreResult<Vec<String>> {
        let mut conn = self.connection(table.db)?;
        let pattern = format!("{}{}*", table.name, table.db.separator());
        let full_keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| command_error("KEYS", e))?;

        Ok(full_keys
            .iter()
            .filter_map(|k| table.strip_key(k))
            .map(str::to_string)
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
