use std::collections::HashMap;

use anyhow::Result;

use super::database::Database;
use crate::models::{ConversationRecord, Message};

const LOG_PREFIX: &str = "conversation_log:";
const ACTIVE_ID_KEY: &str = "active_conversation_id";
const REGISTRY_KEY: &str = "conversations";

/// Durable mirror of the conversation state.
///
/// Storage is best-effort. Writes that fail are logged and dropped without
/// touching other keys; reads of a corrupt medium come back empty instead of
/// failing start-up. In-memory state stays authoritative for the session.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    db: Database,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn log_key(conversation_id: &str) -> String {
        format!("{}{}", LOG_PREFIX, conversation_id)
    }

    // --- Conversation logs ---

    pub fn save(&self, conversation_id: &str, log: &[Message]) {
        let result = serde_json::to_string(log)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.db.set(&Self::log_key(conversation_id), &json));
        if let Err(e) = result {
            tracing::error!("Failed to persist conversation {}: {}", conversation_id, e);
        }
    }

    pub fn remove(&self, conversation_id: &str) {
        if let Err(e) = self.db.delete(&Self::log_key(conversation_id)) {
            tracing::error!("Failed to remove conversation {}: {}", conversation_id, e);
        }
    }

    pub fn load_all(&self) -> HashMap<String, Vec<Message>> {
        let entries = match self.db.scan_prefix(LOG_PREFIX) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Conversation storage unreadable, starting empty: {}", e);
                return HashMap::new();
            }
        };

        let mut logs = HashMap::with_capacity(entries.len());
        for (key, value) in entries {
            let id = &key[LOG_PREFIX.len()..];
            match serde_json::from_str::<Vec<Message>>(&value) {
                Ok(log) => {
                    logs.insert(id.to_string(), log);
                }
                Err(e) => tracing::warn!("Skipping malformed log for {}: {}", id, e),
            }
        }
        logs
    }

    pub fn clear_logs(&self) -> Result<()> {
        self.db.delete_prefix(LOG_PREFIX)?;
        Ok(())
    }

    // --- Active conversation ---

    pub fn save_active_id(&self, conversation_id: Option<&str>) {
        let result = match conversation_id {
            Some(id) => self.db.set(ACTIVE_ID_KEY, id),
            None => self.db.delete(ACTIVE_ID_KEY),
        };
        if let Err(e) = result {
            tracing::error!("Failed to persist active conversation: {}", e);
        }
    }

    pub fn load_active_id(&self) -> Option<String> {
        match self.db.get(ACTIVE_ID_KEY) {
            Ok(id) => id.filter(|id| !id.is_empty()),
            Err(e) => {
                tracing::warn!("Failed to read active conversation: {}", e);
                None
            }
        }
    }

    pub fn clear_active_id(&self) -> Result<()> {
        self.db.delete(ACTIVE_ID_KEY)
    }

    // --- Registry ---

    pub fn save_registry(&self, records: &[ConversationRecord]) {
        let result = serde_json::to_string(records)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.db.set(REGISTRY_KEY, &json));
        if let Err(e) = result {
            tracing::error!("Failed to persist conversation list: {}", e);
        }
    }

    pub fn load_registry(&self) -> Vec<ConversationRecord> {
        let json = match self.db.get(REGISTRY_KEY) {
            Ok(Some(json)) => json,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to read conversation list: {}", e);
                return Vec::new();
            }
        };
        serde_json::from_str(&json).unwrap_or_else(|e| {
            tracing::warn!("Discarding malformed conversation list: {}", e);
            Vec::new()
        })
    }

    pub fn clear_registry(&self) -> Result<()> {
        self.db.delete(REGISTRY_KEY)
    }

    /// Remove every conversation log, the active pointer and the registry in
    /// one transaction.
    pub fn clear_all(&self) {
        if let Err(e) = self
            .db
            .delete_many(&[ACTIVE_ID_KEY, REGISTRY_KEY], &[LOG_PREFIX])
        {
            // Fall back to clearing category by category.
            tracing::error!("Atomic storage clear failed, retrying per category: {}", e);
            for result in [self.clear_logs(), self.clear_active_id(), self.clear_registry()] {
                if let Err(e) = result {
                    tracing::error!("Failed to clear conversation storage: {}", e);
                }
            }
        }
    }
}
