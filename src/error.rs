// Error taxonomy and classification of single request attempts

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

// Coarse failure category used to decide retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ClientError,
    ServerError,
    Network,
    Unknown,
    UpstreamApplication,
}

// Errors surfaced by request execution
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("API error: {status_code} - {message}")]
    ApiResponseError {
        status_code: u16,
        message: String,
        is_retryable: bool,
    },

    #[error("Upstream error {code} ({error_type}): {info}")]
    UpstreamApplicationError {
        status_code: u16,
        code: String,
        error_type: String,
        info: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::NetworkError(_) | ApiError::Timeout(_) => ErrorKind::Network,
            ApiError::ApiResponseError { status_code, .. } if *status_code >= 500 => {
                ErrorKind::ServerError
            }
            ApiError::ApiResponseError { status_code, .. } if (400..500).contains(status_code) => {
                ErrorKind::ClientError
            }
            ApiError::ApiResponseError { .. } => ErrorKind::Unknown,
            ApiError::UpstreamApplicationError { .. } => ErrorKind::UpstreamApplication,
            ApiError::InvalidResponse(_) => ErrorKind::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::ApiResponseError { is_retryable, .. } => *is_retryable,
            // The body was read and understood; only a failing transport status makes it transient
            ApiError::UpstreamApplicationError { status_code, .. } => *status_code >= 500,
            ApiError::NetworkError(_) | ApiError::Timeout(_) | ApiError::InvalidResponse(_) => true,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::ApiResponseError { status_code, .. }
            | ApiError::UpstreamApplicationError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

// Raw result of one transport-level attempt
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Response { status: u16, body: Bytes },
    NoResponse { reason: String, timed_out: bool },
}

// Classified result of one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success(Value),
    Failure(ApiError),
}

impl RequestOutcome {
    pub fn into_result(self) -> Result<Value, ApiError> {
        match self {
            RequestOutcome::Success(value) => Ok(value),
            RequestOutcome::Failure(err) => Err(err),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: UpstreamErrorBody,
}

#[derive(Debug, Deserialize)]
struct UpstreamErrorBody {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn render_code(code: Option<Value>) -> String {
    match code {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => "unknown".to_string(),
        Some(other) => other.to_string(),
    }
}

fn upstream_error(status: u16, body: &Value) -> Option<ApiError> {
    if !body.get("error").map_or(false, Value::is_object) {
        return None;
    }

    let envelope: ErrorEnvelope = serde_json::from_value(body.clone()).ok()?;
    let err = envelope.error;

    Some(ApiError::UpstreamApplicationError {
        status_code: status,
        code: render_code(err.code),
        error_type: err.error_type.unwrap_or_else(|| "unknown".to_string()),
        info: err
            .info
            .or(err.message)
            .unwrap_or_else(|| "no details provided".to_string()),
    })
}

fn status_message(status: u16, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        format!("HTTP {}", status)
    } else {
        text.chars().take(200).collect()
    }
}

/// Classifies the outcome of a single HTTP attempt.
///
/// An application-level error object in the body takes precedence over the
/// transport status; its retryability still follows the status.
pub fn classify(outcome: &AttemptOutcome) -> RequestOutcome {
    let (status, body) = match outcome {
        AttemptOutcome::NoResponse { reason, timed_out } => {
            let err = if *timed_out {
                ApiError::Timeout(reason.clone())
            } else {
                ApiError::NetworkError(reason.clone())
            };
            return RequestOutcome::Failure(err);
        }
        AttemptOutcome::Response { status, body } => (*status, body),
    };

    let parsed = serde_json::from_slice::<Value>(body).ok();

    if let Some(err) = parsed.as_ref().and_then(|v| upstream_error(status, v)) {
        return RequestOutcome::Failure(err);
    }

    match status {
        400..=499 => RequestOutcome::Failure(ApiError::ApiResponseError {
            status_code: status,
            message: status_message(status, body),
            is_retryable: false,
        }),
        500..=u16::MAX => RequestOutcome::Failure(ApiError::ApiResponseError {
            status_code: status,
            message: status_message(status, body),
            is_retryable: true,
        }),
        200..=299 => match parsed {
            Some(value) => RequestOutcome::Success(value),
            None => RequestOutcome::Failure(ApiError::InvalidResponse(format!(
                "HTTP {} body is not valid JSON",
                status
            ))),
        },
        _ => RequestOutcome::Failure(ApiError::InvalidResponse(format!(
            "unexpected HTTP status {}",
            status
        ))),
    }
}
