//! Local record buffers kept in the durable store
//!
//! Each buffer is a JSON array under one key. Appends are read-modify-write,
//! so they go through a mutex shared by every clone of the buffer.

use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::store::SharedStore;
use crate::types::EventRecord;

/// Every record ever submitted, kept for audit and recovery
pub const BACKUP_KEY: &str = "mird_analytics_data";

/// Records whose submission failed, waiting for a retry sweep
pub const FAILED_KEY: &str = "mird_failed_analytics";

/// A capped JSON-array buffer of [`EventRecord`]s.
#[derive(Clone)]
pub struct RecordBuffer {
    store: SharedStore,
    key: &'static str,
    capacity: usize,
    lock: Arc<Mutex<()>>,
}

impl RecordBuffer {
    pub fn new(store: SharedStore, key: &'static str, capacity: usize) -> Self {
        Self {
            store,
            key,
            capacity,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Appends a record, dropping the oldest ones beyond capacity.
    pub fn push(&self, record: &EventRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.read()?;
        records.push(record.clone());
        if records.len() > self.capacity {
            let overflow = records.len() - self.capacity;
            records.drain(..overflow);
            tracing::debug!(key = self.key, dropped = overflow, "Buffer over capacity");
        }
        self.write(&records)
    }

    /// All buffered records, oldest first.
    pub fn records(&self) -> Result<Vec<EventRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read()
    }

    /// Removes and returns all buffered records.
    pub fn take(&self) -> Result<Vec<EventRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let records = self.read()?;
        self.store.remove(self.key)?;
        Ok(records)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.records()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<Vec<EventRecord>> {
        match self.store.get(self.key)? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(records) => Ok(records),
                Err(e) => {
                    tracing::warn!(key = self.key, error = %e, "Discarding unreadable buffer");
                    Ok(Vec::new())
                }
            },
            None => Ok(Vec::new()),
        }
    }

    fn write(&self, records: &[EventRecord]) -> Result<()> {
        self.store.set(self.key, &serde_json::to_string(records)?)
    }
}
