//! Impls - 実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **MemoryStore**: プロセス内の KeyValueStore
//! - **ScriptedTransport**: 応答を台本どおりに返す HttpTransport
//! - **StaticDeviceInfo**: 固定の端末情報
//!
//! 本番ではホストアプリがプラットフォームの KV ストアと HTTP クライアントを
//! ports の trait 越しに差し込みます。

pub mod device;
pub mod memory_store;
pub mod scripted_transport;

pub use self::device::StaticDeviceInfo;
pub use self::memory_store::MemoryStore;
pub use self::scripted_transport::{RecordedCall, Scripted, ScriptedTransport};
