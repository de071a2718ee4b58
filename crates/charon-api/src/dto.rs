//! Wire shapes of the RPC surface

use charon_core::models::{BalanceFilter, BalanceType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request envelope: a method name plus its JSON parameter object
#[derive(Debug, Deserialize)]
pub struct ApiRequest {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub kind: String,
    pub message: String,
}

/// Reply envelope: exactly one of result or error is set
#[derive(Debug, Serialize)]
pub struct ApiReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiReply {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(err: &charon_core::AppError) -> Self {
        Self {
            result: None,
            error: Some(ApiError {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AttrAccount {
    pub tenant: String,
    pub account: String,
}

#[derive(Debug, Deserialize)]
pub struct AttrSetAccount {
    pub tenant: String,
    pub account: String,
    #[serde(default)]
    pub action_plan: Option<String>,
    #[serde(default)]
    pub allow_negative: Option<bool>,
    #[serde(default)]
    pub disabled: Option<bool>,
    #[serde(default)]
    pub trigger_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AttrBalance {
    pub tenant: String,
    pub account: String,
    #[serde(rename = "type")]
    pub balance_type: BalanceType,
    #[serde(default)]
    pub filter: BalanceFilter,
    #[serde(default)]
    pub value: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct AttrRemoveActionPlan {
    pub tenant: String,
    pub action_plan: String,
}

#[derive(Debug, Deserialize)]
pub struct AttrRemoveActionTiming {
    pub tenant: String,
    pub action_plan: String,
    pub timing_uuid: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AttrExecute {
    pub tenant: String,
    #[serde(default)]
    pub action_plan: Option<String>,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
}
