//! StaticDeviceInfo - 固定の端末情報を返す DeviceInfoProvider

use serde_json::{Map, Value};

use crate::ports::{AdvertisingId, DeviceInfoProvider};

#[derive(Debug, Clone, Default)]
pub struct StaticDeviceInfo {
    info: Map<String, Value>,
    advertising_id: AdvertisingId,
}

impl StaticDeviceInfo {
    pub fn new(info: Map<String, Value>) -> Self {
        Self {
            info,
            advertising_id: AdvertisingId::NotAvailable,
        }
    }

    pub fn with_advertising_id(mut self, advertising_id: AdvertisingId) -> Self {
        self.advertising_id = advertising_id;
        self
    }
}

impl DeviceInfoProvider for StaticDeviceInfo {
    fn device_info(&self) -> Map<String, Value> {
        self.info.clone()
    }

    fn advertising_id(&self) -> AdvertisingId {
        self.advertising_id.clone()
    }
}
