//! JSON field names shared by request payloads and backend responses.

pub const BRANCH_KEY: &str = "branch_key";
pub const SDK: &str = "sdk";
pub const RETRY_NUMBER: &str = "retryNumber";

pub const IDENTITY_ID: &str = "identity_id";
pub const IDENTITY: &str = "identity";
pub const DEVICE_FINGERPRINT_ID: &str = "device_fingerprint_id";
pub const SESSION_ID: &str = "session_id";
pub const LINK_CLICK_ID: &str = "link_click_id";
pub const LINK_IDENTIFIER: &str = "link_identifier";
pub const IS_REFERRABLE: &str = "is_referrable";
pub const DEBUG: &str = "debug";
pub const ADVERTISING_ID: &str = "google_advertising_id";
pub const LAT_VAL: &str = "lat_val";

pub const LINK: &str = "link";
pub const URL: &str = "url";
pub const DATA: &str = "data";
pub const REFERRING_DATA: &str = "referring_data";

pub const BUCKET: &str = "bucket";
pub const AMOUNT: &str = "amount";
pub const EVENT: &str = "event";
pub const METADATA: &str = "metadata";
pub const TOTAL: &str = "total";
pub const UNIQUE: &str = "unique";
pub const LENGTH: &str = "length";
pub const DIRECTION: &str = "direction";
pub const BEGIN_AFTER_ID: &str = "begin_after_id";

pub const REFERRAL_CODE: &str = "referral_code";
pub const PREFIX: &str = "prefix";
pub const EXPIRATION: &str = "expiration";
pub const CALCULATION_TYPE: &str = "calculation_type";
pub const LOCATION: &str = "location";
pub const TYPE: &str = "type";

/// Link-property fields; together they identify a short link in the cache.
pub const LINK_PROPERTY_KEYS: [&str; 8] = [
    "alias", "type", "duration", "tags", "channel", "feature", "stage", "data",
];
