//! Device capabilities injected by the host.
//!
//! Both are optional: hosts that cannot (or may not) collect device data
//! plug in [`NoDeviceInfo`], and the advertising id defaults to
//! [`AdvertisingId::NotAvailable`].

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AdvertisingId {
    Available { id: String, limit_ad_tracking: bool },
    #[default]
    NotAvailable,
}

pub trait DeviceInfoProvider: Send + Sync {
    /// Opaque key/value map attached verbatim to install/open payloads.
    fn device_info(&self) -> Map<String, Value>;

    fn advertising_id(&self) -> AdvertisingId {
        AdvertisingId::NotAvailable
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeviceInfo;

impl DeviceInfoProvider for NoDeviceInfo {
    fn device_info(&self) -> Map<String, Value> {
        Map::new()
    }
}
