//! Durable request store: the queue as one JSON array in key/value storage.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::record::RequestRecord;
use crate::domain::Request;
use crate::ports::{Clock, IdGenerator, KeyValueStore, StorageError};

/// Storage key holding the serialized queue.
pub const QUEUE_KEY: &str = "BNCServerRequestQueue";

pub struct RequestStore {
    kv: Arc<dyn KeyValueStore>,
    capacity: usize,
}

impl RequestStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self { kv, capacity }
    }

    /// Writes the persistable requests, in order, replacing the stored list.
    pub fn save(&self, requests: &[Request]) -> Result<(), StorageError> {
        let records: Vec<RequestRecord> = requests
            .iter()
            .filter(|r| r.kind().is_persistable())
            .map(RequestRecord::from_request)
            .collect();
        let encoded = serde_json::to_string(&records).map_err(|e| StorageError::Encode {
            key: QUEUE_KEY.to_string(),
            message: e.to_string(),
        })?;
        self.kv.set_string(QUEUE_KEY, &encoded)
    }

    /// Reads the stored list back in order.
    ///
    /// Corrupt storage never fails the load: an unreadable array yields an
    /// empty queue and unreadable elements are skipped.
    pub fn load(&self, ids: &dyn IdGenerator, clock: &dyn Clock) -> Vec<Request> {
        let Some(raw) = self.kv.get_string(QUEUE_KEY) else {
            return Vec::new();
        };
        let elements: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(elements) => elements,
            Err(e) => {
                warn!(error = %e, "stored request queue is unreadable, starting empty");
                return Vec::new();
            }
        };

        let mut requests = Vec::with_capacity(elements.len().min(self.capacity));
        for (index, element) in elements.into_iter().enumerate() {
            if requests.len() >= self.capacity {
                debug!(index, "stored queue exceeds capacity, dropping the rest");
                break;
            }
            let request = serde_json::from_value::<RequestRecord>(element)
                .ok()
                .and_then(|record| record.into_request(ids, clock));
            match request {
                Some(request) => requests.push(request),
                None => debug!(index, "skipping malformed queue record"),
            }
        }
        requests
    }
}
