//! Request queue: the ordered list of pending API calls, mirrored to storage.
//!
//! Design:
//! - One `std::sync::Mutex` guards the in-memory list; no lock is held
//!   across an await, so every operation is short and synchronous.
//! - Every mutation publishes a snapshot on a `watch` channel. A writer task
//!   persists the latest snapshot, so callers never wait on storage and
//!   bursts of mutations collapse into one write.
//! - Without a tokio runtime (e.g. in a plain unit test) snapshots are
//!   written inline instead.

mod record;
mod store;

pub use record::RequestRecord;
pub use store::{QUEUE_KEY, RequestStore};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::domain::{Request, RequestId, RequestKind, SessionIds};
use crate::ports::StorageError;

pub struct RequestQueue {
    items: Mutex<VecDeque<Request>>,
    store: Arc<RequestStore>,
    capacity: usize,
    persist_tx: Option<watch::Sender<Vec<Request>>>,
}

impl RequestQueue {
    /// Creates a queue holding `initial` (typically what the store loaded).
    pub fn new(store: RequestStore, capacity: usize, initial: Vec<Request>) -> Self {
        let store = Arc::new(store);
        let persist_tx = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (tx, rx) = watch::channel(initial.clone());
                handle.spawn(persist_loop(Arc::clone(&store), rx));
                Some(tx)
            }
            Err(_) => None,
        };
        Self {
            items: Mutex::new(initial.into_iter().collect()),
            store,
            capacity,
            persist_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Request>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes the current contents. Called with the lock held so
    /// snapshots are published in mutation order.
    fn persist(&self, items: &VecDeque<Request>) {
        let snapshot: Vec<Request> = items.iter().cloned().collect();
        match &self.persist_tx {
            Some(tx) => {
                tx.send_replace(snapshot);
            }
            None => {
                if let Err(e) = self.store.save(&snapshot) {
                    warn!(error = %e, "failed to persist request queue");
                }
            }
        }
    }

    /// Appends to the tail.
    ///
    /// When the queue is over capacity the oldest request that is neither the
    /// head nor a session-establishing request is evicted and returned.
    pub fn enqueue(&self, request: Request) -> Option<Request> {
        let mut items = self.lock();
        items.push_back(request);
        let evicted = if items.len() > self.capacity {
            let victim = items
                .iter()
                .enumerate()
                .skip(1)
                .find(|(_, r)| !r.kind().is_session_init())
                .map(|(i, _)| i);
            victim.and_then(|i| items.remove(i))
        } else {
            None
        };
        if let Some(evicted) = &evicted {
            debug!(id = %evicted.id(), kind = %evicted.kind(), "queue full, evicted request");
        }
        self.persist(&items);
        evicted
    }

    /// Inserts at position 0, or 1 when the head is currently in flight.
    /// The index is clamped to the queue length.
    pub fn insert_at_front(&self, request: Request, in_flight: bool) {
        let mut items = self.lock();
        let index = usize::from(in_flight).min(items.len());
        items.insert(index, request);
        self.persist(&items);
    }

    pub fn dequeue(&self) -> Option<Request> {
        let mut items = self.lock();
        let head = items.pop_front();
        if head.is_some() {
            self.persist(&items);
        }
        head
    }

    pub fn remove(&self, id: RequestId) -> Option<Request> {
        let mut items = self.lock();
        let index = items.iter().position(|r| r.id() == id)?;
        let removed = items.remove(index);
        self.persist(&items);
        removed
    }

    pub fn peek(&self) -> Option<Request> {
        self.lock().front().cloned()
    }

    pub fn peek_at(&self, index: usize) -> Option<Request> {
        self.lock().get(index).cloned()
    }

    pub fn get(&self, id: RequestId) -> Option<Request> {
        self.lock().iter().find(|r| r.id() == id).cloned()
    }

    /// Relocates the queued install/open to the front (position 1 when the
    /// head is in flight) and returns its id.
    ///
    /// An install/open that is itself the in-flight head is left in place.
    pub fn move_install_or_open_to_front(&self, in_flight: bool) -> Option<RequestId> {
        let mut items = self.lock();
        let index = items.iter().position(|r| r.kind().is_session_init())?;
        let id = items[index].id();
        let target = usize::from(in_flight);
        if index != target && !(in_flight && index == 0) {
            if let Some(request) = items.remove(index) {
                let target = target.min(items.len());
                items.insert(target, request);
                self.persist(&items);
            }
        }
        Some(id)
    }

    pub fn install_or_open_id(&self) -> Option<RequestId> {
        self.lock()
            .iter()
            .find(|r| r.kind().is_session_init())
            .map(Request::id)
    }

    pub fn contains_install_or_open(&self) -> bool {
        self.install_or_open_id().is_some()
    }

    pub fn contains_close(&self) -> bool {
        self.lock()
            .iter()
            .any(|r| r.kind() == RequestKind::RegisterClose)
    }

    /// Removes the head if it is an install/open.
    pub fn purge_install_or_open_head(&self) -> Option<Request> {
        let mut items = self.lock();
        if !items.front().is_some_and(|r| r.kind().is_session_init()) {
            return None;
        }
        let head = items.pop_front();
        self.persist(&items);
        head
    }

    /// Rewrites session fields on every queued request.
    pub fn refresh_session_fields(&self, ids: &SessionIds) {
        let mut items = self.lock();
        for request in items.iter_mut() {
            request.refresh_session_fields(ids);
        }
        self.persist(&items);
    }

    pub fn set_waiting(&self, id: RequestId, waiting: bool) {
        let mut items = self.lock();
        if let Some(request) = items.iter_mut().find(|r| r.id() == id) {
            if request.is_waiting() != waiting {
                request.set_waiting(waiting);
                self.persist(&items);
            }
        }
    }

    /// Clears the waiting flag everywhere. Returns how many were released.
    pub fn release_waiting(&self) -> usize {
        let mut items = self.lock();
        let mut released = 0;
        for request in items.iter_mut().filter(|r| r.is_waiting()) {
            request.set_waiting(false);
            released += 1;
        }
        if released > 0 {
            self.persist(&items);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Request> {
        self.lock().iter().cloned().collect()
    }

    pub fn kinds(&self) -> Vec<RequestKind> {
        self.lock().iter().map(Request::kind).collect()
    }

    /// Writes the current contents synchronously.
    pub fn flush(&self) -> Result<(), StorageError> {
        let items = self.lock();
        let snapshot: Vec<Request> = items.iter().cloned().collect();
        self.store.save(&snapshot)
    }
}

async fn persist_loop(store: Arc<RequestStore>, mut rx: watch::Receiver<Vec<Request>>) {
    // Ends once the queue (and its sender) is dropped.
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        if let Err(e) = store.save(&snapshot) {
            warn!(error = %e, "failed to persist request queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::MemoryStore;
    use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
    use chrono::Utc;
    use serde_json::Map;

    fn queue_with_capacity(capacity: usize) -> (RequestQueue, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        let store = RequestStore::new(kv.clone(), capacity);
        (RequestQueue::new(store, capacity, Vec::new()), kv)
    }

    fn request(kind: RequestKind) -> Request {
        let ids = UlidGenerator::new(SystemClock);
        Request::new(ids.generate_request_id(), kind, Map::new(), Utc::now())
    }

    fn ids(queue: &RequestQueue) -> Vec<RequestId> {
        queue.snapshot().iter().map(Request::id).collect()
    }

    #[test]
    fn front_insertion_without_call_in_flight() {
        let (queue, _) = queue_with_capacity(25);
        let (a, b, c) = (
            request(RequestKind::CompleteAction),
            request(RequestKind::CreateLink),
            request(RequestKind::GetRewards),
        );
        let d = request(RequestKind::RegisterOpen);
        for r in [&a, &b, &c] {
            queue.enqueue(r.clone());
        }

        queue.insert_at_front(d.clone(), false);

        assert_eq!(ids(&queue), vec![d.id(), a.id(), b.id(), c.id()]);
    }

    #[test]
    fn front_insertion_with_call_in_flight() {
        let (queue, _) = queue_with_capacity(25);
        let (a, b, c) = (
            request(RequestKind::CompleteAction),
            request(RequestKind::CreateLink),
            request(RequestKind::GetRewards),
        );
        let d = request(RequestKind::RegisterInstall);
        for r in [&a, &b, &c] {
            queue.enqueue(r.clone());
        }

        queue.insert_at_front(d.clone(), true);

        assert_eq!(ids(&queue), vec![a.id(), d.id(), b.id(), c.id()]);
    }

    #[test]
    fn insert_index_is_clamped() {
        let (queue, _) = queue_with_capacity(25);
        let d = request(RequestKind::RegisterInstall);
        queue.insert_at_front(d.clone(), true);
        assert_eq!(ids(&queue), vec![d.id()]);
    }

    #[test]
    fn dequeue_and_peek_on_empty() {
        let (queue, _) = queue_with_capacity(25);
        assert!(queue.dequeue().is_none());
        assert!(queue.peek().is_none());
        assert!(queue.peek_at(3).is_none());
    }

    #[test]
    fn move_relocates_existing_install() {
        let (queue, _) = queue_with_capacity(25);
        let a = request(RequestKind::CompleteAction);
        let b = request(RequestKind::CreateLink);
        let install = request(RequestKind::RegisterInstall);
        queue.enqueue(a.clone());
        queue.enqueue(b.clone());
        queue.enqueue(install.clone());

        assert_eq!(queue.move_install_or_open_to_front(false), Some(install.id()));
        assert_eq!(ids(&queue), vec![install.id(), a.id(), b.id()]);

        // with the head in flight the install lands behind it
        assert_eq!(queue.move_install_or_open_to_front(true), Some(install.id()));
        assert_eq!(queue.peek().map(|r| r.id()), Some(install.id()));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn move_without_install_is_none() {
        let (queue, _) = queue_with_capacity(25);
        queue.enqueue(request(RequestKind::CompleteAction));
        assert_eq!(queue.move_install_or_open_to_front(false), None);
        assert!(!queue.contains_install_or_open());
    }

    #[test]
    fn membership_by_kind() {
        let (queue, _) = queue_with_capacity(25);
        queue.enqueue(request(RequestKind::RegisterClose));
        assert!(queue.contains_close());
        assert!(!queue.contains_install_or_open());

        queue.enqueue(request(RequestKind::RegisterOpen));
        assert!(queue.contains_install_or_open());
    }

    #[test]
    fn purge_only_touches_install_or_open_head() {
        let (queue, _) = queue_with_capacity(25);
        queue.enqueue(request(RequestKind::CompleteAction));
        assert!(queue.purge_install_or_open_head().is_none());

        queue.insert_at_front(request(RequestKind::RegisterOpen), false);
        let purged = queue.purge_install_or_open_head().unwrap();
        assert_eq!(purged.kind(), RequestKind::RegisterOpen);
        assert_eq!(queue.kinds(), vec![RequestKind::CompleteAction]);
    }

    #[test]
    fn eviction_spares_head_and_install() {
        let (queue, _) = queue_with_capacity(3);
        let head = request(RequestKind::CompleteAction);
        let install = request(RequestKind::RegisterInstall);
        let oldest = request(RequestKind::CreateLink);
        queue.enqueue(head.clone());
        queue.enqueue(install.clone());
        queue.enqueue(oldest.clone());

        let evicted = queue.enqueue(request(RequestKind::GetRewards));

        assert_eq!(evicted.map(|r| r.id()), Some(oldest.id()));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.peek_at(0).map(|r| r.id()), Some(head.id()));
        assert_eq!(queue.peek_at(1).map(|r| r.id()), Some(install.id()));
    }

    #[test]
    fn waiting_flags() {
        let (queue, _) = queue_with_capacity(25);
        let a = request(RequestKind::CompleteAction);
        queue.enqueue(a.clone());
        queue.set_waiting(a.id(), true);
        assert!(queue.get(a.id()).unwrap().is_waiting());

        assert_eq!(queue.release_waiting(), 1);
        assert!(!queue.get(a.id()).unwrap().is_waiting());
    }

    #[test]
    fn refresh_rewrites_all_queued_payloads() {
        let (queue, _) = queue_with_capacity(25);
        let a = request(RequestKind::CompleteAction);
        queue.enqueue(a.clone());

        queue.refresh_session_fields(&SessionIds {
            identity_id: Some("U1".into()),
            ..SessionIds::default()
        });

        assert_eq!(queue.get(a.id()).unwrap().str_field("identity_id"), Some("U1"));
    }

    #[test]
    fn writes_inline_without_runtime() {
        let (queue, kv) = queue_with_capacity(25);
        queue.enqueue(request(RequestKind::CompleteAction));

        let reloaded = RequestStore::new(kv, 25).load(&UlidGenerator::new(SystemClock), &SystemClock);
        assert_eq!(reloaded, queue.snapshot());
    }

    #[tokio::test]
    async fn writer_task_persists_latest_snapshot() {
        let (queue, kv) = queue_with_capacity(25);
        queue.enqueue(request(RequestKind::CompleteAction));
        queue.enqueue(request(RequestKind::CreateLink));

        // let the writer task run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let reloaded = RequestStore::new(kv.clone(), 25).load(&UlidGenerator::new(SystemClock), &SystemClock);
        assert_eq!(reloaded, queue.snapshot());

        queue.dequeue();
        queue.flush().unwrap();
        let reloaded = RequestStore::new(kv, 25).load(&UlidGenerator::new(SystemClock), &SystemClock);
        assert_eq!(reloaded.len(), 1);
    }
}
