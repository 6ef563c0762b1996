//! Coalescing queue of table changes waiting to be reconciled.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::TableId;

/// Kind of change observed on a table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Key created or fields merged
    Set,
    /// Key removed
    Del,
}

impl Operation {
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set)
    }

    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Set => write!(f, "SET"),
            Operation::Del => write!(f, "DEL"),
        }
    }
}

/// A single `(field, value)` pair of a table record.
pub type FieldValue = (String, String);

/// One observed change: key, operation and the fields written.
///
/// `fvs` is empty for [`Operation::Del`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOpFieldsValues {
    pub key: String,
    pub op: Operation,
    pub fvs: Vec<FieldValue>,
}

impl KeyOpFieldsValues {
    pub fn new(key: impl Into<String>, op: Operation, fvs: Vec<FieldValue>) -> Self {
        Self {
            key: key.into(),
            op,
            fvs,
        }
    }

    pub fn set(key: impl Into<String>, fvs: Vec<FieldValue>) -> Self {
        Self::new(key, Operation::Set, fvs)
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self::new(key, Operation::Del, Vec::new())
    }

    /// Returns the value of `field`, if it was written.
    pub fn get_field(&self, field: &str) -> Option<&str> {
        self.fvs
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.get_field(field).is_some()
    }
}

/// Per-table queue of pending changes.
///
/// Changes to the same key are coalesced while they wait:
///
/// - a DEL discards every change queued before it
/// - a SET following a SET is merged into it, newer values winning
/// - a SET following a DEL is queued behind it so the removal is still observed
///
/// Keys are drained in lexical order; changes of one key keep arrival order.
#[derive(Debug)]
pub struct Consumer {
    table: TableId,
    pending: BTreeMap<String, VecDeque<KeyOpFieldsValues>>,
    len: usize,
}

impl Consumer {
    pub fn new(table: TableId) -> Self {
        Self {
            table,
            pending: BTreeMap::new(),
            len: 0,
        }
    }

    /// Table this consumer queues changes for.
    pub fn table(&self) -> &TableId {
        &self.table
    }

    pub fn has_pending(&self) -> bool {
        self.len > 0
    }

    pub fn pending_count(&self) -> usize {
        self.len
    }

    /// Queues `entries`, coalescing them with what is already waiting.
    pub fn add_to_sync(&mut self, entries: impl IntoIterator<Item = KeyOpFieldsValues>) {
        for entry in entries {
            self.push(entry);
        }
    }

    fn push(&mut self, entry: KeyOpFieldsValues) {
        let queue = self.pending.entry(entry.key.clone()).or_default();

        if entry.op.is_del() {
            self.len -= queue.len();
            queue.clear();
            queue.push_back(entry);
            self.len += 1;
            return;
        }

        match queue.back_mut() {
            Some(last) if last.op.is_set() => {
                for (field, value) in entry.fvs {
                    match last.fvs.iter_mut().find(|(f, _)| *f == field) {
                        Some(slot) => slot.1 = value,
                        None => last.fvs.push((field, value)),
                    }
                }
            }
            _ => {
                queue.push_back(entry);
                self.len += 1;
            }
        }
    }

    /// Removes and returns everything queued.
    pub fn drain(&mut self) -> Vec<KeyOpFieldsValues> {
        let drained: Vec<_> = std::mem::take(&mut self.pending)
            .into_values()
            .flatten()
            .collect();
        self.len = 0;
        drained
    }

    /// Puts a change back in front of its key so it is retried first.
    pub fn retry(&mut self, entry: KeyOpFieldsValues) {
        self.pending
            .entry(entry.key.clone())
            .or_default()
            .push_front(entry);
        self.len += 1;
    }

    /// Human readable listing of queued changes.
    pub fn dump(&self) -> Vec<String> {
        self.pending
            .values()
            .flatten()
            .map(|e| format!("{}|{} {} {:?}", self.table, e.key, e.op, e.fvs))
            .collect()
    }
}
