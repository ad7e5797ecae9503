//! Vigil Reading Payload
//!
//! JSON body of a published reading: a required numeric `result` with
//! optional `phenomenonTime`, `resultTime` (RFC 3339) and `parameters`.
//! The parsed document is kept verbatim as the observation's raw payload.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use vigil_common::VigilError;

// =============================================================================
// Reading Payload
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingPayload {
    pub result: f64,
    pub phenomenon_time: Option<DateTime<Utc>>,
    pub result_time: Option<DateTime<Utc>>,
    pub parameters: Value,
    pub raw: Value,
}

impl ReadingPayload {
    pub fn parse(bytes: &[u8]) -> Result<Self, ReadingError> {
        let raw: Value = serde_json::from_slice(bytes).map_err(|e| ReadingError::Json(e.to_string()))?;
        let body = raw.as_object().ok_or(ReadingError::NotAnObject)?;

        let result = match body.get("result") {
            None | Some(Value::Null) => return Err(ReadingError::MissingResult),
            Some(value) => value
                .as_f64()
                .filter(|f| f.is_finite())
                .ok_or_else(|| ReadingError::NonNumericResult(value.to_string()))?,
        };

        let parameters = match body.get("parameters") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(Value::Object(map)) => Value::Object(map.clone()),
            Some(_) => return Err(ReadingError::InvalidParameters),
        };

        Ok(Self {
            result,
            phenomenon_time: timestamp(body, "phenomenonTime")?,
            result_time: timestamp(body, "resultTime")?,
            parameters,
            raw,
        })
    }
}

fn timestamp(body: &Map<String, Value>, field: &'static str) -> Result<Option<DateTime<Utc>>, ReadingError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| ReadingError::InvalidTime {
                field,
                value: text.clone(),
            }),
        Some(other) => Err(ReadingError::InvalidTime {
            field,
            value: other.to_string(),
        }),
    }
}

// =============================================================================
// Reading Error
// =============================================================================

/// Reasons a reading is malformed and dropped before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadingError {
    Topic(String),
    Json(String),
    NotAnObject,
    MissingResult,
    NonNumericResult(String),
    InvalidTime { field: &'static str, value: String },
    InvalidParameters,
}

impl std::fmt::Display for ReadingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic(topic) => write!(f, "malformed topic: {}", topic),
            Self::Json(msg) => write!(f, "payload is not JSON: {}", msg),
            Self::NotAnObject => write!(f, "payload must be a JSON object"),
            Self::MissingResult => write!(f, "payload is missing \"result\""),
            Self::NonNumericResult(v) => write!(f, "result is not a number: {}", v),
            Self::InvalidTime { field, value } => write!(f, "{} is not RFC 3339: {}", field, value),
            Self::InvalidParameters => write!(f, "parameters must be a JSON object"),
        }
    }
}

impl std::error::Error for ReadingError {}

impl From<ReadingError> for VigilError {
    fn from(err: ReadingError) -> Self {
        VigilError::Validation(err.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
