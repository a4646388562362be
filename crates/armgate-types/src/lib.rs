use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single primitive parameter value carried by an operation request.
///
/// Tool-calling agents send loosely typed JSON; `untagged` lets `1`, `2.5`
/// and `"text"` all deserialize without a wrapper object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Name of the JSON type, used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "number",
            ParamValue::Str(_) => "string",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v}"),
        }
    }
}

/// Raw named parameters as received from the front end.
pub type OperationParams = BTreeMap<String, ParamValue>;

/// Error taxonomy for the dispatch core.
///
/// Every variant is converted into a structured `{status: error, message}`
/// response at the front-end boundary; none of them terminate the process.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GateError {
    #[error("Capture device '{role}' unavailable: {details}")]
    DeviceUnavailable { role: String, details: String },

    #[error("No capture device configured for role '{0}'")]
    DeviceMisconfigured(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Unknown operation {0}")]
    UnknownOperation(String),

    #[error("Invalid parameters for {operation}: {reason}")]
    InvalidParameters { operation: String, reason: String },

    #[error("Operation {operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Invalid image payload: {0}")]
    InvalidImage(String),

    #[error("Operation {0} registered twice")]
    DuplicateOperation(String),

    #[error("Dispatcher is shutting down")]
    ShuttingDown,
}

impl GateError {
    /// Stable snake_case label, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::DeviceUnavailable { .. } => "device_unavailable",
            GateError::DeviceMisconfigured(_) => "device_misconfigured",
            GateError::CaptureFailed(_) => "capture_failed",
            GateError::UnknownOperation(_) => "unknown_operation",
            GateError::InvalidParameters { .. } => "invalid_parameters",
            GateError::OperationFailed { .. } => "operation_failed",
            GateError::PersistenceFailed(_) => "persistence_failed",
            GateError::InvalidImage(_) => "invalid_image",
            GateError::DuplicateOperation(_) => "duplicate_operation",
            GateError::ShuttingDown => "shutting_down",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Front-end response payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome tag shared by capture and observation responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Outcome tag for operation responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Completed,
    Error,
}

/// Reply to a `capture()` request. `image` is base64-encoded PNG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CaptureResponse {
    pub fn success(image: String) -> Self {
        Self {
            status: ResponseStatus::Success,
            image: Some(image),
            message: None,
        }
    }

    pub fn error(err: &GateError) -> Self {
        Self {
            status: ResponseStatus::Error,
            image: None,
            message: Some(format!("Camera capture error: {err}")),
        }
    }
}

/// Reply to an `execute_operation()` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub status: OperationStatus,
    pub operation_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperationResponse {
    pub fn completed(operation_name: impl Into<String>, result: String) -> Self {
        Self {
            status: OperationStatus::Completed,
            operation_name: operation_name.into(),
            result: Some(result),
            message: None,
        }
    }

    pub fn error(operation_name: impl Into<String>, err: &GateError) -> Self {
        Self {
            status: OperationStatus::Error,
            operation_name: operation_name.into(),
            result: None,
            message: Some(err.to_string()),
        }
    }
}

/// Reply to a `record_observation()` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ObservationResponse {
    pub fn success(timestamp_key: String) -> Self {
        Self {
            status: ResponseStatus::Success,
            timestamp_key: Some(timestamp_key),
            message: None,
        }
    }

    pub fn error(err: &GateError) -> Self {
        Self {
            status: ResponseStatus::Error,
            timestamp_key: None,
            message: Some(err.to_string()),
        }
    }
}

/// Liveness snapshot of the dispatch core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Always `"ok"` while the process is answering.
    pub status: String,
    /// Name of the operation currently holding the execution lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_with: Option<String>,
    pub camera_open: bool,
    pub accepting: bool,
}
