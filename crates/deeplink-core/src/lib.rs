//! deeplink-core
//!
//! Core of a mobile attribution / deep-linking SDK: a durable request queue,
//! a session state machine that drains it one call at a time, and the
//! response handling that keeps the local session state current.
//!
//! # モジュール構成
//! - **config**: SdkConfig（JSON + 環境変数）と検証
//! - **domain**: ドメインモデル（ids, request kind, request, outcome, decision, session, errors）
//! - **ports**: 抽象化レイヤー（KeyValueStore, HttpTransport, DeviceInfoProvider, Clock, IdGenerator）
//! - **queue**: 永続化付きリクエストキュー
//! - **network**: 1 リクエスト = 1 HTTP 呼び出しの実行器
//! - **app**: オーケストレーター、ディスパッチャー、公開クライアント
//! - **impls**: 実装（MemoryStore, ScriptedTransport など開発・テスト用）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod network;
pub mod ports;
pub mod queue;

pub use app::{BuildError, DeepLink, DeepLinkBuilder, Reply};
pub use config::{ConfigError, SdkConfig};
pub use domain::{
    CreditHistoryQuery, InitOptions, LinkProperties, ReferralCodeOptions, RequestKind, SdkError,
    SessionPhase, SessionState,
};
