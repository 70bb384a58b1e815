use std::sync::{Mutex, MutexGuard, PoisonError};

use super::revision::Revision;
use super::store::ConversationStore;
use crate::models::ConversationRecord;

#[derive(Debug, Default)]
struct RegistryState {
    /// Insertion order.
    records: Vec<ConversationRecord>,
    active: Option<String>,
}

/// Conversations available for navigation, plus the active pointer.
/// Knows nothing about message content.
pub struct ConversationRegistry {
    store: ConversationStore,
    state: Mutex<RegistryState>,
    revision: Revision,
}

impl ConversationRegistry {
    pub fn load(store: ConversationStore, revision: Revision) -> Self {
        let records = store.load_registry();
        let active = store
            .load_active_id()
            .filter(|id| records.iter().any(|r| &r.id == id));

        Self {
            store,
            state: Mutex::new(RegistryState { records, active }),
            revision,
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new conversation. A blank label becomes `Chat <n>`.
    pub fn create(&self, label: Option<&str>) -> ConversationRecord {
        let mut state = self.state();
        let label = match label.map(str::trim) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => format!("Chat {}", state.records.len() + 1),
        };
        let record = ConversationRecord::new(label);
        state.records.push(record.clone());
        self.store.save_registry(&state.records);
        drop(state);

        self.revision.bump();
        record
    }

    /// Remove an entry. Clears the active pointer if it pointed here; no
    /// replacement is picked. Returns false for an unknown id.
    pub fn remove(&self, conversation_id: &str) -> bool {
        let mut state = self.state();
        let before = state.records.len();
        state.records.retain(|r| r.id != conversation_id);
        if state.records.len() == before {
            return false;
        }
        self.store.save_registry(&state.records);
        if state.active.as_deref() == Some(conversation_id) {
            state.active = None;
            self.store.save_active_id(None);
        }
        drop(state);

        self.revision.bump();
        true
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.state().records.iter().any(|r| r.id == conversation_id)
    }

    pub fn is_empty(&self) -> bool {
        self.state().records.is_empty()
    }

    /// Newest first by creation time; later insertions win ties.
    pub fn list(&self) -> Vec<ConversationRecord> {
        let mut records: Vec<ConversationRecord> =
            self.state().records.iter().rev().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn active(&self) -> Option<String> {
        self.state().active.clone()
    }

    /// Point at a registered conversation, or clear with `None`. Returns
    /// false for an unknown id.
    pub fn set_active(&self, conversation_id: Option<&str>) -> bool {
        let mut state = self.state();
        if let Some(id) = conversation_id {
            if !state.records.iter().any(|r| r.id == id) {
                return false;
            }
        }
        state.active = conversation_id.map(str::to_string);
        self.store.save_active_id(conversation_id);
        drop(state);

        self.revision.bump();
        true
    }

    /// Forget everything in memory. Persisted state is cleared by the
    /// caller as part of the session teardown.
    pub fn reset(&self) {
        let mut state = self.state();
        state.records.clear();
        state.active = None;
        drop(state);
        self.revision.bump();
    }
}
