//! SessionOrchestrator - セッション状態機械とキューの排出
//!
//! # 責務
//! - install / open の判定と、二重登録の防止（既存のものを先頭へ移動）
//! - 1 本ずつの送信（in-flight は常に最大 1）
//! - 一時的失敗のリトライと、打ち切り時の「ネットワークなし」停止
//! - セッション確立前のリクエストを `waiting` で止めておく
//! - close / keep-alive タイマー
//!
//! # ロック順序
//! `state` → `queue` の順でのみ取る。どちらも await を跨いで保持しない。
//! 送信の直列化は `permit`（permit 数 1 の Semaphore）で行う。

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{Notify, Semaphore, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SdkConfig;
use crate::domain::{
    Decider, Decision, DefaultDecider, FinalOutcome, InitOptions, NetworkState, Request,
    RequestId, RequestKind, RetryPolicy, SdkError, SessionPhase, keys,
};
use crate::network::NetworkExecutor;
use crate::ports::{AdvertisingId, Clock, DeviceInfoProvider, IdGenerator};
use crate::queue::RequestQueue;

use super::dispatcher::{Reply, ResponseDispatcher, SessionEffect};
use super::session_store::SessionStore;

pub type ReplyResult = Result<Reply, SdkError>;
type Responder = oneshot::Sender<ReplyResult>;

/// Resolves once with the result of one action.
///
/// The request is already queued when this is created; dropping it only
/// discards the result.
#[must_use = "the request is queued either way; await this to get its result"]
pub struct PendingReply {
    rx: oneshot::Receiver<ReplyResult>,
}

impl PendingReply {
    pub(crate) fn ready(result: ReplyResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for PendingReply {
    type Output = ReplyResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(SdkError::Cancelled)))
    }
}

/// What one pass of the dispatch loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A request was taken off the queue (sent or completed locally).
    Dispatched,
    /// Nothing dispatchable right now.
    Idle,
    /// Retries were exhausted earlier; waiting for a connectivity signal.
    Paused,
}

struct State {
    phase: SessionPhase,
    network: NetworkState,
    in_flight: Option<RequestId>,
    /// One dispatch attempt is allowed while the network is marked lost.
    probe: bool,
    keep_alive_until: Option<Instant>,
    close_timer: Option<JoinHandle<()>>,
    /// Bumped whenever a pending close is scheduled or cancelled. A timer
    /// only closes if its generation is still current.
    close_generation: u64,
}

/// Collaborators the orchestrator is wired with.
pub struct OrchestratorParts {
    pub queue: Arc<RequestQueue>,
    pub executor: NetworkExecutor,
    pub session: Arc<SessionStore>,
    pub ids: Arc<dyn IdGenerator>,
    pub clock: Arc<dyn Clock>,
    pub device: Arc<dyn DeviceInfoProvider>,
    pub config: SdkConfig,
}

enum SendResult {
    Completed(Request, FinalOutcome),
    GaveUp(Request, SdkError),
    Unsendable(Request, SdkError),
    /// The request left the queue while being retried (purged by close).
    Gone,
}

pub struct SessionOrchestrator {
    queue: Arc<RequestQueue>,
    executor: NetworkExecutor,
    dispatcher: ResponseDispatcher,
    session: Arc<SessionStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    device: Arc<dyn DeviceInfoProvider>,
    config: SdkConfig,
    permit: Semaphore,
    state: Mutex<State>,
    responders: Mutex<HashMap<RequestId, Vec<Responder>>>,
    kick: Notify,
}

impl SessionOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            dispatcher: ResponseDispatcher::new(Arc::clone(&parts.session)),
            queue: parts.queue,
            executor: parts.executor,
            session: parts.session,
            ids: parts.ids,
            clock: parts.clock,
            device: parts.device,
            config: parts.config,
            permit: Semaphore::new(1),
            state: Mutex::new(State {
                phase: SessionPhase::Uninitialized,
                network: NetworkState::Available,
                in_flight: None,
                probe: false,
                keep_alive_until: None,
                close_timer: None,
                close_generation: 0,
            }),
            responders: Mutex::new(HashMap::new()),
            kick: Notify::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_responders(&self) -> MutexGuard<'_, HashMap<RequestId, Vec<Responder>>> {
        self.responders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn dispatcher(&self) -> &ResponseDispatcher {
        &self.dispatcher
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock_state().phase
    }

    pub fn network_state(&self) -> NetworkState {
        self.lock_state().network
    }

    /// Wakes the dispatch worker.
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    pub(crate) async fn kicked(&self) {
        self.kick.notified().await;
    }

    fn established(&self, state: &State) -> bool {
        state.phase == SessionPhase::Initialized && self.session.ids().is_complete()
    }

    fn head_in_flight(&self, state: &State) -> bool {
        match state.in_flight {
            Some(id) => self.queue.peek().is_some_and(|head| head.id() == id),
            None => false,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        let mut policy = self.config.retry.clone();
        if let Some(count) = self.session.retry_count() {
            policy.max_retries = count;
        }
        if let Some(interval) = self.session.retry_interval() {
            policy.interval = interval;
        }
        policy
    }

    fn timeout(&self) -> Duration {
        self.session.timeout().unwrap_or(self.config.timeout)
    }

    fn new_request(&self, kind: RequestKind, payload: Map<String, Value>) -> Request {
        let mut request = Request::new(self.ids.generate_request_id(), kind, payload, self.clock.now());
        request.refresh_session_fields(&self.session.ids());
        request
    }

    fn attach(&self, id: RequestId) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        self.lock_responders().entry(id).or_default().push(tx);
        PendingReply { rx }
    }

    /// Delivers `result` to everyone waiting on `id`. Later deliveries for the
    /// same id find nobody.
    fn respond(&self, id: RequestId, result: ReplyResult) {
        let Some(waiters) = self.lock_responders().remove(&id) else {
            return;
        };
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
    }

    /// Explicit session start.
    ///
    /// - INITIALIZED: resolves immediately with the latest referring params,
    ///   cancels a pending close and refreshes keep-alive.
    /// - INITIALIZING: attaches to the queued install/open.
    /// - UNINITIALIZED: queues install or open at the front.
    pub fn init_session(&self, options: InitOptions) -> PendingReply {
        let mut state = self.lock_state();
        if state.phase == SessionPhase::Initialized {
            if let Some(timer) = state.close_timer.take() {
                timer.abort();
                state.close_generation += 1;
            }
            state.keep_alive_until = Some(Instant::now() + self.config.keep_alive);
            return PendingReply::ready(Ok(Reply::ReferringParams(self.session.session_params())));
        }

        let existing = match state.phase {
            SessionPhase::Initializing => self.queue.install_or_open_id(),
            _ => None,
        };
        let id = match existing {
            Some(id) => id,
            None => match self.begin_session(&mut state, &options) {
                Ok(id) => id,
                Err(e) => return PendingReply::ready(Err(e)),
            },
        };
        if state.network == NetworkState::Lost {
            state.probe = true;
        }
        let pending = self.attach(id);
        drop(state);
        self.kick();
        pending
    }

    /// UNINITIALIZED → INITIALIZING. Relocates a queued install/open instead
    /// of creating a second one. Caller holds the state lock.
    fn begin_session(&self, state: &mut State, options: &InitOptions) -> Result<RequestId, SdkError> {
        state.phase = SessionPhase::Initializing;
        let in_flight = self.head_in_flight(state);
        if let Some(id) = self.queue.move_install_or_open_to_front(in_flight) {
            debug!(%id, "session init already queued, moved to front");
            return Ok(id);
        }

        let kind = if self.session.identity_id().is_some() {
            RequestKind::RegisterOpen
        } else {
            RequestKind::RegisterInstall
        };
        let payload = match self.session_payload(kind, options) {
            Ok(payload) => payload,
            Err(e) => {
                state.phase = SessionPhase::Uninitialized;
                return Err(e);
            }
        };
        let request = self.new_request(kind, payload);
        let id = request.id();
        self.queue.insert_at_front(request, in_flight);
        info!(%id, %kind, "session initializing");
        Ok(id)
    }

    fn session_payload(&self, kind: RequestKind, options: &InitOptions) -> Result<Map<String, Value>, SdkError> {
        if let Some(raw) = &options.deep_link_url {
            match link_click_id_from(raw) {
                Some(click_id) => self.session.set_link_click_identifier(Some(&click_id))?,
                None => debug!(url = %raw, "deep link carries no link_click_id"),
            }
        }
        let referrable = options
            .is_referrable
            .unwrap_or(kind == RequestKind::RegisterInstall);
        self.session.set_referrable(referrable)?;

        let mut payload = self.device.device_info();
        payload.insert(keys::IS_REFERRABLE.into(), referrable.into());
        payload.insert(keys::DEBUG.into(), self.config.debug.into());
        if let Some(identifier) = self.session.link_click_identifier() {
            payload.insert(keys::LINK_IDENTIFIER.into(), identifier.into());
        }
        if let AdvertisingId::Available { id, limit_ad_tracking } = self.device.advertising_id() {
            payload.insert(keys::ADVERTISING_ID.into(), id.into());
            payload.insert(keys::LAT_VAL.into(), i32::from(limit_ad_tracking).into());
        }
        Ok(payload)
    }

    /// Queues an action request.
    ///
    /// While no session exists the request is queued `waiting` and a session
    /// start is triggered. Logout without a session fails with `NoSession`
    /// and is not queued.
    pub fn submit(&self, kind: RequestKind, payload: Map<String, Value>) -> PendingReply {
        let mut state = self.lock_state();
        if state.phase != SessionPhase::Initialized && !kind.is_session_init() {
            match kind {
                RequestKind::Logout => return PendingReply::ready(Err(SdkError::NoSession)),
                RequestKind::RegisterClose => return PendingReply::ready(Ok(Reply::Done)),
                _ if kind.requires_session() => {
                    if state.phase == SessionPhase::Uninitialized || !self.queue.contains_install_or_open() {
                        if let Err(e) = self.begin_session(&mut state, &InitOptions::default()) {
                            return PendingReply::ready(Err(e));
                        }
                    }
                }
                _ => {}
            }
        }

        let mut request = self.new_request(kind, payload);
        if kind.requires_session() && !self.established(&state) {
            request.set_waiting(true);
        }
        let id = request.id();
        let pending = self.attach(id);
        let evicted = self.queue.enqueue(request);
        if state.network == NetworkState::Lost {
            state.probe = true;
        }
        drop(state);

        if let Some(evicted) = evicted {
            self.respond(evicted.id(), Err(SdkError::QueueFull));
        }
        debug!(%id, %kind, "request queued");
        self.kick();
        pending
    }

    /// Host went to background (or explicit close).
    ///
    /// With smart sessions the close is ignored inside the keep-alive window
    /// and otherwise deferred by `close_delay`, so a quick re-init cancels it.
    pub fn close_session(self: &Arc<Self>) {
        let mut state = self.lock_state();
        if state.phase == SessionPhase::Uninitialized {
            return;
        }
        if !self.config.smart_session {
            drop(state);
            self.execute_close();
            return;
        }
        if state.keep_alive_until.is_some_and(|until| Instant::now() < until) {
            debug!("close ignored inside keep-alive window");
            return;
        }
        if let Some(timer) = state.close_timer.take() {
            timer.abort();
        }
        state.close_generation += 1;
        let generation = state.close_generation;
        let orchestrator = Arc::clone(self);
        let delay = self.config.close_delay;
        state.close_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            orchestrator.fire_close_timer(generation);
        }));
    }

    /// Runs a deferred close unless it was cancelled or superseded after
    /// the timer was armed. `abort()` cannot stop a timer that already woke.
    fn fire_close_timer(&self, generation: u64) {
        let mut state = self.lock_state();
        if state.close_generation != generation {
            debug!(generation, "stale close timer ignored");
            return;
        }
        state.close_timer = None;
        self.close_locked(state);
    }

    /// Tears the session down now.
    ///
    /// Offline, a pending install/open at the head is purged instead of
    /// queueing a close behind it. Online, a close is queued unless one
    /// already is; requests queued before it still go out first.
    pub fn execute_close(&self) {
        self.close_locked(self.lock_state());
    }

    fn close_locked(&self, mut state: MutexGuard<'_, State>) {
        if state.phase == SessionPhase::Uninitialized {
            return;
        }
        let mut purged = None;
        let mut evicted = None;
        if state.network == NetworkState::Lost {
            purged = self.queue.purge_install_or_open_head();
        } else if !self.queue.contains_close() {
            let close = self.new_request(RequestKind::RegisterClose, Map::new());
            evicted = self.queue.enqueue(close);
        }
        state.phase = SessionPhase::Uninitialized;
        state.keep_alive_until = None;
        drop(state);
        info!("session closed");

        if let Some(purged) = purged {
            self.respond(purged.id(), Err(SdkError::NoConnectivity));
        }
        if let Some(evicted) = evicted {
            self.respond(evicted.id(), Err(SdkError::QueueFull));
        }
        self.kick();
    }

    /// Host reports connectivity. Resumes dispatch and queues a ping that
    /// resolves once the loop reaches it.
    pub fn on_connectivity_restored(&self) -> PendingReply {
        {
            let mut state = self.lock_state();
            if state.network == NetworkState::Lost {
                info!("connectivity restored, resuming dispatch");
            }
            state.network = NetworkState::Available;
        }
        self.submit(RequestKind::Ping, Map::new())
    }

    /// One pass of the dispatch loop: pick the first dispatchable request,
    /// send it (with retries) and apply the outcome.
    ///
    /// The permit is held from the pick until the caller has been answered.
    pub async fn process_next_queue_item(&self) -> Progress {
        let Ok(_permit) = self.permit.acquire().await else {
            return Progress::Idle;
        };

        let (picked, no_session) = {
            let mut state = self.lock_state();
            if state.network == NetworkState::Lost && !state.probe {
                return Progress::Paused;
            }
            let (picked, no_session) = self.pick(self.established(&state));
            if let Some(request) = &picked {
                state.probe = false;
                state.in_flight = Some(request.id());
            }
            (picked, no_session)
        };
        for id in no_session {
            self.respond(id, Err(SdkError::NoSession));
        }
        let Some(request) = picked else {
            return Progress::Idle;
        };

        if request.kind() == RequestKind::Ping {
            self.finish(&request, Ok(Reply::Done), SessionEffect::None, None);
            return Progress::Dispatched;
        }

        match self.send_with_retries(request.id()).await {
            SendResult::Completed(request, outcome) => self.apply_outcome(&request, outcome),
            SendResult::GaveUp(request, error) => {
                warn!(id = %request.id(), kind = %request.kind(), %error, "giving up, pausing dispatch");
                self.finish(&request, Err(error), SessionEffect::None, Some(NetworkState::Lost));
            }
            SendResult::Unsendable(request, error) => {
                warn!(id = %request.id(), kind = %request.kind(), %error, "dropping unsendable request");
                self.finish(&request, Err(error), SessionEffect::None, None);
            }
            SendResult::Gone => {
                self.lock_state().in_flight = None;
            }
        }
        Progress::Dispatched
    }

    /// Scans from the front. Returns the first request allowed to go, plus
    /// ids that need a `NoSession` answer because no session can arrive.
    ///
    /// Requests ahead of a queued close belong to the session being closed:
    /// they still go while its ids are stored.
    fn pick(&self, established: bool) -> (Option<Request>, Vec<RequestId>) {
        let snapshot = self.queue.snapshot();
        let init_queued = snapshot.iter().any(|r| r.kind().is_session_init());
        let close_at = snapshot.iter().position(|r| r.kind() == RequestKind::RegisterClose);
        let closing_session_live = close_at.is_some() && self.session.ids().is_complete();
        let mut no_session = Vec::new();

        for (index, request) in snapshot.into_iter().enumerate() {
            if request.kind().bypasses_session_check() {
                return (Some(request), no_session);
            }
            let ahead_of_close = close_at.is_some_and(|at| index < at);
            if established || (closing_session_live && ahead_of_close) {
                if request.is_waiting() {
                    self.queue.set_waiting(request.id(), false);
                }
                return (Some(request), no_session);
            }
            if !request.is_waiting() {
                self.queue.set_waiting(request.id(), true);
            }
            if !init_queued {
                no_session.push(request.id());
            }
        }
        (None, no_session)
    }

    async fn send_with_retries(&self, id: RequestId) -> SendResult {
        let decider = DefaultDecider::new(self.retry_policy());
        let timeout = self.timeout();
        let mut failures = 0u32;
        loop {
            // re-read every attempt: the payload may have been rewritten
            let Some(mut request) = self.queue.get(id) else {
                return SendResult::Gone;
            };
            request.refresh_session_fields(&self.session.ids());

            let outcome = match self.executor.execute(&request, failures, timeout).await {
                Ok(outcome) => outcome,
                Err(e) => return SendResult::Unsendable(request, e),
            };
            let reason = match outcome.into_final() {
                Ok(outcome) => return SendResult::Completed(request, outcome),
                Err(reason) => reason,
            };

            failures += 1;
            match decider.decide(failures, &reason) {
                Decision::Retry { delay, reason } => {
                    debug!(%id, %reason, "retrying");
                    tokio::time::sleep(delay).await;
                }
                Decision::GiveUp { .. } => return SendResult::GaveUp(request, reason.into()),
            }
        }
    }

    fn apply_outcome(&self, request: &Request, outcome: FinalOutcome) {
        let available = Some(NetworkState::Available);
        match outcome {
            FinalOutcome::Success { body, .. } => match self.dispatcher.on_success(request, &body) {
                Ok((reply, effect)) => self.finish(request, Ok(reply), effect, available),
                Err(e) => self.finish(request, Err(e), SessionEffect::None, available),
            },
            FinalOutcome::Conflict { status } => {
                let result = self.dispatcher.on_conflict(request, status);
                self.finish(request, result, SessionEffect::None, available);
            }
            FinalOutcome::ClientError { status, body } => {
                warn!(id = %request.id(), kind = %request.kind(), status, "request rejected");
                let error = SdkError::ClientError { status, message: body };
                self.finish(request, Err(error), SessionEffect::None, available);
            }
        }
    }

    /// Dequeues `request`, applies phase/network changes, then answers the
    /// caller. Dequeue and phase change happen under the state lock so an
    /// `init_session` racing with this never attaches to a finished request.
    fn finish(
        &self,
        request: &Request,
        result: ReplyResult,
        effect: SessionEffect,
        network: Option<NetworkState>,
    ) {
        {
            let mut state = self.lock_state();
            self.queue.remove(request.id());
            state.in_flight = None;

            if let Some(network) = network {
                if state.network != network {
                    match network {
                        NetworkState::Available => info!("backend reachable again"),
                        NetworkState::Lost => warn!("backend unreachable, dispatch paused"),
                    }
                }
                state.network = network;
            }

            if request.kind().is_session_init() && result.is_err() {
                state.phase = SessionPhase::Uninitialized;
            }
            match effect {
                SessionEffect::Established => {
                    state.phase = SessionPhase::Initialized;
                    state.keep_alive_until = Some(Instant::now() + self.config.keep_alive);
                    self.queue.refresh_session_fields(&self.session.ids());
                    let released = self.queue.release_waiting();
                    debug!(released, "session established, waiting requests released");
                }
                SessionEffect::IdsChanged => {
                    self.queue.refresh_session_fields(&self.session.ids());
                }
                SessionEffect::LoggedOut => {
                    self.queue.refresh_session_fields(&self.session.ids());
                    if !self.session.ids().is_complete() {
                        state.phase = SessionPhase::Uninitialized;
                    }
                }
                SessionEffect::None => {}
            }
        }
        self.respond(request.id(), result);
    }
}

/// `link_click_id` query parameter of a deep-link URI.
fn link_click_id_from(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == keys::LINK_CLICK_ID)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{MemoryStore, Scripted, ScriptedTransport};
    use crate::ports::{NoDeviceInfo, SystemClock, TransportError, UlidGenerator};
    use crate::queue::RequestStore;
    use serde_json::json;

    fn orchestrator(transport: Arc<ScriptedTransport>) -> Arc<SessionOrchestrator> {
        let kv = Arc::new(MemoryStore::new());
        let config = SdkConfig::new("key_test_abc");
        let queue = Arc::new(RequestQueue::new(RequestStore::new(kv.clone(), 25), 25, Vec::new()));
        let executor = NetworkExecutor::new(transport, config.base_url().unwrap(), "key_test_abc", "rust-test");
        Arc::new(SessionOrchestrator::new(OrchestratorParts {
            queue,
            executor,
            session: Arc::new(SessionStore::new(kv)),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            clock: Arc::new(SystemClock),
            device: Arc::new(NoDeviceInfo),
            config,
        }))
    }

    fn session_body() -> Value {
        json!({ "identity_id": "U1", "session_id": "S1", "device_fingerprint_id": "F1" })
    }

    async fn drain(orch: &SessionOrchestrator) {
        while orch.process_next_queue_item().await == Progress::Dispatched {}
    }

    #[test]
    fn link_click_id_is_read_from_query() {
        assert_eq!(
            link_click_id_from("myapp://open?link_click_id=123&x=1").as_deref(),
            Some("123")
        );
        assert_eq!(link_click_id_from("myapp://open"), None);
        assert_eq!(link_click_id_from("not a url"), None);
    }

    #[tokio::test]
    async fn install_is_chosen_without_identity() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(RequestKind::RegisterInstall, Scripted::ok(session_body()));
        let orch = orchestrator(transport.clone());

        let pending = orch.init_session(InitOptions::default());
        assert_eq!(orch.phase(), SessionPhase::Initializing);
        assert_eq!(orch.queue().kinds(), vec![RequestKind::RegisterInstall]);

        drain(&orch).await;
        assert!(matches!(pending.await, Ok(Reply::ReferringParams(_))));
        assert_eq!(orch.phase(), SessionPhase::Initialized);
        assert_eq!(transport.calls_for(RequestKind::RegisterInstall)[0].field("is_referrable"), Some(json!(true)));
    }

    #[tokio::test]
    async fn open_is_chosen_with_identity() {
        let orch = orchestrator(Arc::new(ScriptedTransport::new()));
        orch.session().set_identity_id(Some("U1")).unwrap();

        let _pending = orch.init_session(InitOptions::default());

        assert_eq!(orch.queue().kinds(), vec![RequestKind::RegisterOpen]);
    }

    #[tokio::test]
    async fn repeated_init_attaches_to_one_request() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(RequestKind::RegisterInstall, Scripted::ok(session_body()));
        let orch = orchestrator(transport.clone());

        let first = orch.init_session(InitOptions::default());
        let second = orch.init_session(InitOptions::default());
        assert_eq!(orch.queue().len(), 1);

        drain(&orch).await;
        assert!(first.await.is_ok());
        assert!(second.await.is_ok());
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn logout_without_session_is_rejected() {
        let orch = orchestrator(Arc::new(ScriptedTransport::new()));
        let result = orch.submit(RequestKind::Logout, Map::new()).await;
        assert_eq!(result, Err(SdkError::NoSession));
        assert!(orch.queue().is_empty());
    }

    #[tokio::test]
    async fn failed_install_resets_phase_and_answers_no_session() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(RequestKind::RegisterInstall, Scripted::status(400, json!({ "error": "bad key" })));
        let orch = orchestrator(transport.clone());

        let init = orch.init_session(InitOptions::default());
        let event = orch.submit(RequestKind::CompleteAction, Map::new());
        drain(&orch).await;

        assert!(matches!(init.await, Err(SdkError::ClientError { status: 400, .. })));
        assert_eq!(event.await, Err(SdkError::NoSession));
        assert_eq!(orch.phase(), SessionPhase::Uninitialized);
        // the action stays queued until a session exists
        let queued = orch.queue().snapshot();
        assert_eq!(queued.len(), 1);
        assert!(queued[0].is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_network_pauses_until_restored() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_times(
            RequestKind::RegisterInstall,
            6,
            Scripted::fail(TransportError::NoConnectivity),
        );
        let orch = orchestrator(transport.clone());

        let init = orch.init_session(InitOptions::default());
        assert_eq!(orch.process_next_queue_item().await, Progress::Dispatched);
        assert_eq!(init.await, Err(SdkError::NoConnectivity));
        assert_eq!(orch.network_state(), NetworkState::Lost);
        assert_eq!(orch.process_next_queue_item().await, Progress::Paused);

        let ping = orch.on_connectivity_restored();
        drain(&orch).await;
        assert_eq!(ping.await, Ok(Reply::Done));
        assert_eq!(orch.network_state(), NetworkState::Available);
    }

    #[tokio::test]
    async fn close_offline_purges_pending_install() {
        let orch = orchestrator(Arc::new(ScriptedTransport::new()));
        let init = orch.init_session(InitOptions::default());
        orch.lock_state().network = NetworkState::Lost;

        orch.execute_close();

        assert!(orch.queue().is_empty());
        assert_eq!(orch.phase(), SessionPhase::Uninitialized);
        assert_eq!(init.await, Err(SdkError::NoConnectivity));
    }

    #[tokio::test]
    async fn requests_queued_before_close_go_out_first() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(RequestKind::RegisterInstall, Scripted::ok(session_body()));
        let orch = orchestrator(transport.clone());
        let init = orch.init_session(InitOptions::default());
        drain(&orch).await;
        init.await.unwrap();

        let event = orch.submit(RequestKind::CompleteAction, Map::new());
        orch.execute_close();
        assert_eq!(orch.phase(), SessionPhase::Uninitialized);
        drain(&orch).await;

        let sent: Vec<_> = transport.calls().into_iter().map(|c| c.kind).collect();
        assert_eq!(
            sent,
            vec![
                Some(RequestKind::RegisterInstall),
                Some(RequestKind::CompleteAction),
                Some(RequestKind::RegisterClose),
            ]
        );
        assert_eq!(event.await, Ok(Reply::Done));
        assert!(orch.queue().is_empty());
    }

    #[tokio::test]
    async fn requests_after_close_wait_for_next_session() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(RequestKind::RegisterInstall, Scripted::ok(session_body()));
        let orch = orchestrator(transport.clone());
        let init = orch.init_session(InitOptions::default());
        drain(&orch).await;
        init.await.unwrap();

        transport.push(
            RequestKind::RegisterOpen,
            Scripted::ok(json!({ "identity_id": "U1", "session_id": "S2", "device_fingerprint_id": "F1" })),
        );

        orch.execute_close();
        let event = orch.submit(RequestKind::CompleteAction, Map::new());
        assert!(orch.queue().snapshot().iter().any(|r| r.is_waiting()));
        drain(&orch).await;

        // the action started a new session and went out inside it
        let sent: Vec<_> = transport.calls().into_iter().map(|c| c.kind).collect();
        let open_at = sent.iter().position(|k| *k == Some(RequestKind::RegisterOpen));
        let action_at = sent.iter().position(|k| *k == Some(RequestKind::CompleteAction));
        assert!(open_at.is_some() && open_at < action_at);
        assert_eq!(event.await, Ok(Reply::Done));
        assert_eq!(
            transport.calls_for(RequestKind::CompleteAction)[0].field("session_id"),
            Some(json!("S2"))
        );
    }

    #[tokio::test]
    async fn stale_close_timer_does_not_close() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(RequestKind::RegisterInstall, Scripted::ok(session_body()));
        let orch = orchestrator(transport.clone());
        let init = orch.init_session(InitOptions::default());
        drain(&orch).await;
        init.await.unwrap();
        orch.lock_state().keep_alive_until = None;

        orch.close_session();
        let armed = orch.lock_state().close_generation;
        // re-init cancels; a timer that already woke must not close anyway
        let again = orch.init_session(InitOptions::default());
        assert!(matches!(again.await, Ok(Reply::ReferringParams(_))));
        orch.fire_close_timer(armed);

        assert_eq!(orch.phase(), SessionPhase::Initialized);
        assert!(!orch.queue().contains_close());
    }

    #[tokio::test(start_paused = true)]
    async fn smart_close_respects_keep_alive_and_delay() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(RequestKind::RegisterInstall, Scripted::ok(session_body()));
        let orch = orchestrator(transport.clone());
        let init = orch.init_session(InitOptions::default());
        drain(&orch).await;
        init.await.unwrap();

        // inside keep-alive: ignored
        orch.close_session();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(orch.phase(), SessionPhase::Initialized);

        // after keep-alive: deferred, then cancelled by a re-init
        tokio::time::sleep(Duration::from_secs(2)).await;
        orch.close_session();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let again = orch.init_session(InitOptions::default());
        assert!(matches!(again.await, Ok(Reply::ReferringParams(_))));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(orch.phase(), SessionPhase::Initialized);

        // and once more, left alone this time
        orch.close_session();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(orch.phase(), SessionPhase::Uninitialized);
        assert!(orch.queue().contains_close());
    }
}
