//! Ports - 抽象化レイヤー
//!
//! 外部コラボレータ（永続 KV ストア、HTTP トランスポート、端末情報、時刻、ID 生成）
//! へのインターフェースを定義します。コアはこれらの trait だけに依存し、
//! 実装はホストアプリ（またはテスト用の `impls`）が差し込みます。

pub mod clock;
pub mod device;
pub mod id_generator;
pub mod storage;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::device::{AdvertisingId, DeviceInfoProvider, NoDeviceInfo};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::storage::{KeyValueStore, StorageError};
pub use self::transport::{HttpResponse, HttpTransport, TransportError};
