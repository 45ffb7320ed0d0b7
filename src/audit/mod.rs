//! Observability recorder
//!
//! Append-only, ordered event log shared by every stage of the pipeline.
//! Entries are never removed or reordered; losing the recorder costs
//! traceability only.

use crate::models::{Event, EventTag, RowSet};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Process-wide event log. Clone to share; clones append to the same log.
#[derive(Clone)]
pub struct EventRecorder {
    events: Arc<RwLock<Vec<Event>>>,
    digest_key: Arc<[u8; 16]>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            digest_key: Arc::new(Uuid::new_v4().into_bytes()),
        }
    }

    /// Row-set digest keyed with this recorder's random key. Stable for the
    /// recorder's lifetime; not reproducible from guessed values outside it.
    pub fn digest(&self, rows: &RowSet) -> String {
        digest_rows(self.digest_key.as_slice(), rows)
    }

    /// Append an event. The sequence number is assigned under the write
    /// lock, so it matches the position in the log.
    pub async fn record(
        &self,
        tag: EventTag,
        correlation_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> u64 {
        let mut events = self.events.write().await;
        let sequence = events.len() as u64;

        debug!(sequence, %tag, correlation_id = ?correlation_id, "Event recorded");

        events.push(Event {
            sequence,
            timestamp: Utc::now(),
            tag,
            correlation_id,
            payload,
        });

        sequence
    }

    /// Full log in emission order. Does not remove anything.
    pub async fn drain(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }

    /// Events of a single request, in emission order.
    pub async fn events_for(&self, correlation_id: Uuid) -> Vec<Event> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| event.correlation_id == Some(correlation_id))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA256 of `key` followed by the serialized row-set, hex encoded.
/// Streams JSON directly into the hasher (no intermediate String).
pub fn digest_rows(key: &[u8], rows: &RowSet) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key);

    if serde_json::to_writer(&mut HashWriter(&mut hasher), rows).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
