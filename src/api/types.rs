use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// HTTP 401. Handled by the session gate, never shown as a generic failure.
    #[error("Session expired")]
    SessionExpired,

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::SessionExpired => Some(401),
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired)
    }

    /// Text suitable for a retry-suggesting notice.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { message, .. } if !message.is_empty() => message.clone(),
            _ => crate::models::notice::SEND_FAILED.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendRequest {
    pub message: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certification_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SendResponse {
    pub response: String,
}
