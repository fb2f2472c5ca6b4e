//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて SDK のセッション処理を実装します。
//!
//! # 主要コンポーネント
//! - **DeepLinkBuilder**: クライアントの構築とワイヤリング
//! - **DeepLink**: ホストアプリ向けの公開 API
//! - **SessionOrchestrator**: セッション状態機械とキュー排出（in-flight 1 本）
//! - **ResponseDispatcher**: 種別ごとのレスポンス処理とセッション状態の更新
//! - **SessionStore**: KV ストア上のセッション状態
//! - **DispatchWorker**: キュー排出ループのタスク

pub mod builder;
pub mod client;
pub mod dispatcher;
pub mod orchestrator;
pub mod session_store;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, DeepLinkBuilder};
pub use self::client::DeepLink;
pub use self::dispatcher::{Reply, ResponseDispatcher, SessionEffect};
pub use self::orchestrator::{OrchestratorParts, PendingReply, Progress, SessionOrchestrator};
pub use self::session_store::SessionStore;
pub use self::worker_loop::DispatchWorker;
