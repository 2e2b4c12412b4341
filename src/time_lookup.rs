//! Current-time lookup behind the gateway's `get-current-time` target.
//!
//! Pure apart from reading the clock: every failure is turned into the
//! error payload, nothing escapes as `Err`.

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub const DEFAULT_TIMEZONE: &str = "Asia/Tokyo";
pub const VALID_EXAMPLE: &str = "Asia/Tokyo, UTC, America/New_York";

/// Name of the tool as registered on the gateway target
pub const TOOL_NAME: &str = "get-current-time";

#[derive(Error, Debug)]
pub enum TimeLookupError {
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TimeLookupError {
    pub fn error_type(&self) -> &'static str {
        match self {
            TimeLookupError::InvalidTimezone(_) => "INVALID_TIMEZONE",
            TimeLookupError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeResponse {
    Success {
        current_time: String,
        timezone: String,
    },
    Failure {
        error: String,
        error_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        valid_example: Option<String>,
    },
}

impl From<TimeLookupError> for TimeResponse {
    fn from(err: TimeLookupError) -> Self {
        let valid_example = match err {
            TimeLookupError::InvalidTimezone(_) => Some(VALID_EXAMPLE.to_string()),
            TimeLookupError::Internal(_) => None,
        };
        TimeResponse::Failure {
            error: err.to_string(),
            error_type: err.error_type().to_string(),
            valid_example,
        }
    }
}

/// Look up the current time for `event`, e.g. `{"timezone": "UTC"}`.
pub fn lookup(event: &Value) -> TimeResponse {
    lookup_at(event, Utc::now())
}

/// Same as [`lookup`] with a fixed instant.
pub fn lookup_at(event: &Value, now: DateTime<Utc>) -> TimeResponse {
    match resolve(event, now) {
        Ok((current_time, timezone)) => TimeResponse::Success { current_time, timezone },
        Err(e) => e.into(),
    }
}

fn resolve(event: &Value, now: DateTime<Utc>) -> Result<(String, String), TimeLookupError> {
    let name = match event.get("timezone") {
        None => DEFAULT_TIMEZONE,
        Some(Value::String(name)) => name.as_str(),
        Some(other) => {
            return Err(TimeLookupError::Internal(format!(
                "timezone must be a string, got {}",
                other
            )))
        }
    };

    let tz: Tz = name
        .parse()
        .map_err(|_| TimeLookupError::InvalidTimezone(name.to_string()))?;

    let local = now.with_timezone(&tz);
    Ok((local.to_rfc3339_opts(SecondsFormat::Micros, false), name.to_string()))
}

/// Tool definition registered on the gateway's lambda target.
pub fn tool_spec() -> Value {
    json!({
        "name": TOOL_NAME,
        "description": "Returns the current time in the given timezone in ISO 8601 format",
        "inputSchema": {
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "Timezone (e.g. Asia/Tokyo, UTC, America/New_York). Defaults to Asia/Tokyo"
                }
            }
        },
        "outputSchema": {
            "type": "object",
            "properties": {
                "current_time": {"type": "string", "description": "Current time in ISO 8601 format"},
                "timezone": {"type": "string", "description": "Timezone that was used"}
            }
        }
    })
}
