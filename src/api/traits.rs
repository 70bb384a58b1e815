use async_trait::async_trait;

use super::types::{ApiError, SendRequest, SendResponse};
use crate::models::Message;

/// Remote side of the chat: the assistant RPC and the history store.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send_message(&self, request: SendRequest) -> Result<SendResponse, ApiError>;

    /// Server-side history for one conversation, oldest first.
    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError>;
}
