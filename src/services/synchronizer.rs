use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::revision::Revision;
use super::store::ConversationStore;
use crate::models::Message;

/// Identifies one signed-in session. Async completions carry the epoch they
/// started under and are dropped if a teardown happened in between.
pub type SessionEpoch = u64;

/// Ids of the optimistic pair appended for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReply {
    pub user_message_id: String,
    pub placeholder_id: String,
}

#[derive(Debug, Default)]
struct SyncState {
    logs: HashMap<String, Vec<Message>>,
    epoch: SessionEpoch,
}

/// Owner of every conversation log.
///
/// All log mutations go through here and are mirrored to the store while
/// the state lock is held, so a teardown can never interleave with a write.
pub struct MessageSynchronizer {
    store: ConversationStore,
    state: Mutex<SyncState>,
    revision: Revision,
}

impl MessageSynchronizer {
    /// Load persisted logs. Placeholders left behind by an interrupted
    /// session can never be resolved and are dropped.
    pub fn load(store: ConversationStore, revision: Revision) -> Self {
        let mut logs = store.load_all();
        for (id, log) in logs.iter_mut() {
            let before = log.len();
            log.retain(|m| !m.is_loading);
            if log.len() != before {
                tracing::debug!("Dropped stale placeholder from conversation {}", id);
                store.save(id, log);
            }
        }

        Self {
            store,
            state: Mutex::new(SyncState { logs, epoch: 0 }),
            revision,
        }
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        // Log mutations are single assignments; a panic elsewhere cannot
        // leave a half-written log behind.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn epoch(&self) -> SessionEpoch {
        self.state().epoch
    }

    /// Snapshot of one conversation's log, empty if unknown.
    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.state()
            .logs
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.state().logs.contains_key(conversation_id)
    }

    /// Replace a conversation's log with a single greeting.
    pub fn seed(&self, conversation_id: &str) {
        self.replace(conversation_id, vec![Message::greeting()]);
    }

    fn replace(&self, conversation_id: &str, log: Vec<Message>) {
        let mut state = self.state();
        self.store.save(conversation_id, &log);
        state.logs.insert(conversation_id.to_string(), log);
        drop(state);
        self.revision.bump();
    }

    /// Append the user's message and the pending-reply placeholder. Returns
    /// `None`, writing nothing, when the conversation is unknown or the send
    /// began under a previous session.
    pub fn append_pending(
        &self,
        epoch: SessionEpoch,
        conversation_id: &str,
        text: &str,
    ) -> Option<PendingReply> {
        let user = Message::user(text);
        let placeholder = Message::placeholder();
        let pending = PendingReply {
            user_message_id: user.id.clone(),
            placeholder_id: placeholder.id.clone(),
        };

        let mut state = self.state();
        if state.epoch != epoch {
            tracing::debug!("Refusing send to {} from a previous session", conversation_id);
            return None;
        }
        let Some(log) = state.logs.get_mut(conversation_id) else {
            tracing::debug!("Refusing send to unknown conversation {}", conversation_id);
            return None;
        };
        log.push(user);
        log.push(placeholder);
        self.store.save(conversation_id, log);
        drop(state);

        self.revision.bump();
        Some(pending)
    }

    /// Swap the placeholder for the settled reply. Returns false when the
    /// completion is stale (other session, deleted conversation, placeholder
    /// already gone).
    pub fn settle(
        &self,
        epoch: SessionEpoch,
        conversation_id: &str,
        placeholder_id: &str,
        reply: Message,
    ) -> bool {
        self.with_placeholder(epoch, conversation_id, placeholder_id, |log, idx| {
            log[idx] = reply;
        })
    }

    /// Remove the placeholder, leaving the user's message in place.
    pub fn rollback(&self, epoch: SessionEpoch, conversation_id: &str, placeholder_id: &str) -> bool {
        self.with_placeholder(epoch, conversation_id, placeholder_id, |log, idx| {
            log.remove(idx);
        })
    }

    fn with_placeholder<F>(
        &self,
        epoch: SessionEpoch,
        conversation_id: &str,
        placeholder_id: &str,
        apply: F,
    ) -> bool
    where
        F: FnOnce(&mut Vec<Message>, usize),
    {
        let mut state = self.state();
        if state.epoch != epoch {
            tracing::debug!("Ignoring reply for {} from a previous session", conversation_id);
            return false;
        }
        let Some(log) = state.logs.get_mut(conversation_id) else {
            tracing::debug!("Ignoring reply for removed conversation {}", conversation_id);
            return false;
        };
        let Some(idx) = log
            .iter()
            .position(|m| m.is_loading && m.id == placeholder_id)
        else {
            tracing::debug!("Placeholder {} no longer in {}", placeholder_id, conversation_id);
            return false;
        };

        apply(&mut *log, idx);
        self.store.save(conversation_id, log);
        drop(state);

        self.revision.bump();
        true
    }

    /// Merge freshly fetched server history into the local log. Returns the
    /// number of messages added, or `None` when the fetch belongs to a
    /// previous session or the conversation is gone.
    pub fn merge(
        &self,
        epoch: SessionEpoch,
        conversation_id: &str,
        server: Vec<Message>,
    ) -> Option<usize> {
        let mut state = self.state();
        if state.epoch != epoch {
            tracing::debug!("Ignoring history for {} from a previous session", conversation_id);
            return None;
        }

        let Some(log) = state.logs.get_mut(conversation_id) else {
            tracing::debug!("Ignoring history for removed conversation {}", conversation_id);
            return None;
        };
        let before = log.len();
        let merged = merge_history(log, server);
        *log = merged;
        let added = log.len() - before;
        self.store.save(conversation_id, log);
        drop(state);

        if added > 0 {
            self.revision.bump();
        }
        Some(added)
    }

    pub fn remove(&self, conversation_id: &str) {
        let mut state = self.state();
        state.logs.remove(conversation_id);
        self.store.remove(conversation_id);
        drop(state);
        self.revision.bump();
    }

    /// Drop logs whose id fails `keep`.
    pub fn retain<F>(&self, keep: F)
    where
        F: Fn(&str) -> bool,
    {
        let mut state = self.state();
        let orphans: Vec<String> = state
            .logs
            .keys()
            .filter(|id| !keep(id.as_str()))
            .cloned()
            .collect();
        for id in &orphans {
            tracing::debug!("Pruning orphaned conversation log {}", id);
            state.logs.remove(id);
            self.store.remove(id);
        }
    }

    /// Forget every log, in memory and on disk, and start a new epoch.
    pub fn teardown(&self) {
        let mut state = self.state();
        state.logs.clear();
        state.epoch += 1;
        self.store.clear_all();
        drop(state);
        self.revision.bump();
    }
}

/// Local log first, then every server message whose id is not already
/// present. Never re-sorts by timestamp.
///
/// A trailing pending pair (user message + placeholder) stays at the tail so
/// the placeholder remains the most recent entry.
pub fn merge_history(local: &[Message], server: Vec<Message>) -> Vec<Message> {
    let (settled, pending) = local.split_at(pending_tail_start(local));

    let mut seen: HashSet<String> = local.iter().map(|m| m.id.clone()).collect();
    let mut merged = Vec::with_capacity(local.len() + server.len());
    merged.extend_from_slice(settled);
    for msg in server {
        if msg.is_loading {
            continue;
        }
        if seen.insert(msg.id.clone()) {
            merged.push(msg);
        }
    }
    merged.extend_from_slice(pending);
    merged
}

fn pending_tail_start(log: &[Message]) -> usize {
    match log {
        [.., user, last] if last.is_loading && user.is_user => log.len() - 2,
        [.., last] if last.is_loading => log.len() - 1,
        _ => log.len(),
    }
}
