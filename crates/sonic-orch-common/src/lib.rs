//! Common orchestration abstractions for SONiC.
//!
//! This crate provides the core traits and types shared by the
//! configuration daemons:
//!
//! - [`Orch`]: Base trait for reconciliation agents
//! - [`Consumer`]: Coalescing queue of pending table changes
//! - [`ObjectStore`]: Keyed record store with change notifications
//! - [`MemoryStore`] / `RedisStore`: In-process and Redis backends
//! - [`wait_for_key`]: Bounded wait for a key to appear or disappear
//!
//! # Architecture
//!
//! 1. Operators write intent to CONFIG_DB
//! 2. Daemons subscribe to the tables they own and queue changes in Consumers
//! 3. `do_task()` reconciles queued changes into APPL_DB / ASIC_DB
//! 4. Readiness is reported back through STATE_DB
//!
//! # Example
//!
//! ```ignore
//! use sonic_orch_common::{Consumer, Orch, TableId};
//!
//! struct MyOrch {
//!     port_consumer: Consumer,
//! }
//!
//! #[async_trait]
//! impl Orch for MyOrch {
//!     fn name(&self) -> &str { "MyOrch" }
//!
//!     async fn do_task(&mut self) {
//!         for entry in self.port_consumer.drain() {
//!             if let Err(e) = self.process_entry(&entry).await {
//!                 log::error!("Failed to process {}: {}", entry.key, e);
//!             }
//!         }
//!     }
//! }
//! ```

mod consumer;
mod orch;
mod store;

#[cfg(feature = "redis")]
mod redis_backend;

pub use consumer::{Consumer, FieldValue, KeyOpFieldsValues, Operation};
pub use orch::Orch;
pub use store::{
    wait_for_key, DbId, MemoryStore, ObjectStore, Presence, StoreError, StoreEvent, StoreResult,
    TableId, WaitOutcome, EVENT_CHANNEL_CAPACITY,
};

#[cfg(feature = "redis")]
pub use redis_backend::{decode_event, RedisConfig, RedisStore, NOTIFY_CHANNEL};
