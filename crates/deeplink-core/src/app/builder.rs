//! DeepLinkBuilder - クライアントの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 永続化されたキューの復元は build() の中で一度だけ行う

use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigError, SdkConfig};
use crate::network::NetworkExecutor;
use crate::ports::{
    Clock, DeviceInfoProvider, HttpTransport, IdGenerator, KeyValueStore, NoDeviceInfo, SystemClock,
    UlidGenerator,
};
use crate::queue::{RequestQueue, RequestStore};

use super::client::DeepLink;
use super::orchestrator::{OrchestratorParts, SessionOrchestrator};
use super::session_store::SessionStore;
use super::worker_loop::DispatchWorker;

/// DeepLinkBuilder はクライアントを構築
///
/// # 使用例
/// ```ignore
/// let client = DeepLinkBuilder::new(SdkConfig::new("key_live_xxx"))
///     .storage(Arc::new(MemoryStore::new()))
///     .transport(Arc::new(my_http_client))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - storage と transport は必須。無ければ BuildError
/// - config.validate() の失敗もそのまま BuildError
/// - ディスパッチループを spawn するので tokio ランタイム内で呼ぶこと
pub struct DeepLinkBuilder {
    config: SdkConfig,
    storage: Option<Arc<dyn KeyValueStore>>,
    transport: Option<Arc<dyn HttpTransport>>,
    device: Option<Arc<dyn DeviceInfoProvider>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はクライアント構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no key/value storage configured")]
    MissingStorage,

    #[error("no http transport configured")]
    MissingTransport,

    #[error("build() must be called inside a tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl DeepLinkBuilder {
    pub fn new(config: SdkConfig) -> Self {
        Self {
            config,
            storage: None,
            transport: None,
            device: None,
            clock: None,
            ids: None,
        }
    }

    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 省略時は NoDeviceInfo
    pub fn device_info(mut self, device: Arc<dyn DeviceInfoProvider>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// 検証 → キュー復元 → ディスパッチループ起動
    pub fn build(self) -> Result<DeepLink, BuildError> {
        self.config.validate()?;
        let base_url = self.config.base_url()?;
        let storage = self.storage.ok_or(BuildError::MissingStorage)?;
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BuildError::NoRuntime);
        }

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let device: Arc<dyn DeviceInfoProvider> = self.device.unwrap_or_else(|| Arc::new(NoDeviceInfo));

        let capacity = self.config.max_queue_items;
        let store = RequestStore::new(Arc::clone(&storage), capacity);
        let restored = store.load(ids.as_ref(), clock.as_ref());
        if !restored.is_empty() {
            info!(restored = restored.len(), "replaying persisted requests");
        }
        let queue = Arc::new(RequestQueue::new(store, capacity, restored));

        let executor = NetworkExecutor::new(
            transport,
            base_url,
            self.config.branch_key.clone(),
            self.config.sdk_tag.clone(),
        );
        let orchestrator = Arc::new(SessionOrchestrator::new(OrchestratorParts {
            queue,
            executor,
            session: Arc::new(SessionStore::new(storage)),
            ids,
            clock,
            device,
            config: self.config,
        }));

        let worker = DispatchWorker::spawn(Arc::clone(&orchestrator));
        orchestrator.kick();
        Ok(DeepLink::new(orchestrator, worker))
    }
}
