use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const GREETING: &str = "Hi! I'm your assistant specialized in ISTQB certifications. \
I'm here to help with any question about software testing, certifications, testing \
techniques and much more. How can I assist you today?";

/// One entry of a conversation log.
///
/// Logs are kept in insertion order. `timestamp` is display metadata only and
/// is never used to reorder a log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_loading: bool,
}

impl Message {
    /// A message authored locally by the user.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(content.into(), true, false)
    }

    /// A settled assistant reply built from a backend response.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(content.into(), false, false)
    }

    /// The pending-reply marker shown while the backend is working.
    pub fn placeholder() -> Self {
        Self::new(String::new(), false, true)
    }

    /// Seed message for a freshly created conversation.
    pub fn greeting() -> Self {
        Self::assistant(GREETING)
    }

    fn new(content: String, is_user: bool, is_loading: bool) -> Self {
        Self {
            id: new_message_id(),
            content,
            is_user,
            timestamp: Utc::now(),
            is_loading,
        }
    }
}

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}
