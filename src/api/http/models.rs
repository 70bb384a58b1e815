use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::Message;

// --- History ---

#[derive(Debug, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    pub content: String,
    #[serde(alias = "isUser")]
    pub is_user: bool,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HistoryMessage {
    /// Server records are always settled, whatever the payload claims.
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            content: self.content,
            is_user: self.is_user,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            is_loading: false,
        }
    }
}

// --- Errors ---

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub detail: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Text(String),
    Validation(Vec<ValidationIssue>),
}

#[derive(Debug, Deserialize)]
pub struct ValidationIssue {
    #[serde(default)]
    pub msg: Option<String>,
}

impl ErrorDetail {
    pub fn message(self) -> String {
        match self {
            ErrorDetail::Text(text) => text,
            ErrorDetail::Validation(issues) => issues
                .into_iter()
                .next()
                .and_then(|issue| issue.msg)
                .unwrap_or_else(|| "Validation error".to_string()),
        }
    }
}
