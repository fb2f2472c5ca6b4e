//! Caller-facing parameter types for the action methods.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};

use super::keys;

/// Options for an explicit session start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitOptions {
    /// Overrides the default referrability (install: true, open: false).
    pub is_referrable: Option<bool>,

    /// Deep link the app was opened with. A `link_click_id` query parameter
    /// is forwarded with the next install/open.
    pub deep_link_url: Option<String>,
}

/// Properties of a short link. Two identical sets share one cached URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub link_type: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryOrder {
    #[default]
    MostRecentFirst,
    LeastRecentFirst,
}

impl HistoryOrder {
    fn direction(self) -> u8 {
        match self {
            HistoryOrder::MostRecentFirst => 0,
            HistoryOrder::LeastRecentFirst => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreditHistoryQuery {
    pub bucket: Option<String>,
    pub begin_after_id: Option<String>,
    pub length: u32,
    pub order: HistoryOrder,
}

impl Default for CreditHistoryQuery {
    fn default() -> Self {
        Self {
            bucket: None,
            begin_after_id: None,
            length: 100,
            order: HistoryOrder::default(),
        }
    }
}

impl CreditHistoryQuery {
    pub(crate) fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert(keys::LENGTH.into(), self.length.into());
        payload.insert(keys::DIRECTION.into(), self.order.direction().into());
        if let Some(bucket) = &self.bucket {
            payload.insert(keys::BUCKET.into(), bucket.clone().into());
        }
        if let Some(after) = &self.begin_after_id {
            payload.insert(keys::BEGIN_AFTER_ID.into(), after.clone().into());
        }
        payload
    }
}

/// How often a referral code can award credits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CalculationType {
    UniquePerUser,
    #[default]
    Unlimited,
}

/// Who gets rewarded when a referral code is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CodeLocation {
    Referree,
    #[default]
    ReferringUser,
    Both,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferralCodeOptions {
    pub prefix: Option<String>,
    pub amount: i64,
    pub expiration: Option<NaiveDate>,
    pub bucket: String,
    pub calculation_type: CalculationType,
    pub location: CodeLocation,
}

impl Default for ReferralCodeOptions {
    fn default() -> Self {
        Self {
            prefix: None,
            amount: 0,
            expiration: None,
            bucket: "default".to_string(),
            calculation_type: CalculationType::default(),
            location: CodeLocation::default(),
        }
    }
}

impl ReferralCodeOptions {
    pub(crate) fn to_payload(&self) -> Map<String, Value> {
        let calculation_type = match self.calculation_type {
            CalculationType::UniquePerUser => 0,
            CalculationType::Unlimited => 1,
        };
        let location = match self.location {
            CodeLocation::Referree => 0,
            CodeLocation::ReferringUser => 2,
            CodeLocation::Both => 3,
        };

        let mut payload = Map::new();
        payload.insert(keys::CALCULATION_TYPE.into(), calculation_type.into());
        payload.insert(keys::LOCATION.into(), location.into());
        payload.insert(keys::TYPE.into(), "credit".into());
        payload.insert(keys::EVENT.into(), format!("$redeem_code-{}", self.amount).into());
        payload.insert(keys::AMOUNT.into(), self.amount.into());
        payload.insert(keys::BUCKET.into(), self.bucket.clone().into());
        if let Some(prefix) = self.prefix.as_deref().filter(|p| !p.is_empty()) {
            payload.insert(keys::PREFIX.into(), prefix.into());
        }
        if let Some(date) = self.expiration {
            payload.insert(
                keys::EXPIRATION.into(),
                date.format("%Y-%m-%d").to_string().into(),
            );
        }
        payload
    }
}

/// Cache key for a link: the link-property fields of a payload, serialized.
///
/// `serde_json::Map` is ordered, so equal property sets give equal keys.
pub(crate) fn link_cache_key(payload: &Map<String, Value>) -> String {
    let props: Map<String, Value> = keys::LINK_PROPERTY_KEYS
        .iter()
        .filter_map(|k| payload.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect();
    Value::Object(props).to_string()
}
