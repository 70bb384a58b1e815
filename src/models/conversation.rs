use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registry entry for a conversation. Its message log lives elsewhere and may
/// be empty or not yet fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: new_conversation_id(),
            label: label.into(),
            created_at: Utc::now(),
        }
    }
}

pub fn new_conversation_id() -> String {
    Uuid::new_v4().to_string()
}
