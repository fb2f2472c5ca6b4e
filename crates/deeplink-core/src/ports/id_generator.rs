//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース。Clock を差し替えるとタイムスタンプ部分を固定できる

use ulid::Ulid;

use crate::domain::RequestId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_request_id(&self) -> RequestId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_request_id(&self) -> RequestId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        RequestId::from(ulid)
    }
}
