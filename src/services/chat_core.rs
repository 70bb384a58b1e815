use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::chat::{ChatPipeline, InFlight, SendOutcome};
use super::database::Database;
use super::registry::ConversationRegistry;
use super::revision::Revision;
use super::session::SessionGate;
use super::store::ConversationStore;
use super::synchronizer::{MessageSynchronizer, SessionEpoch};
use crate::api::{ApiError, ChatBackend};
use crate::models::{ConversationRecord, Message, Notice};

/// How a history fetch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Merged { added: usize },
    /// Fetch failed; the local log was left untouched.
    Unavailable(Notice),
    SessionExpired,
    UnknownConversation,
    /// The conversation was deleted or the session ended while fetching.
    Discarded,
}

impl SyncOutcome {
    pub fn notice(&self) -> Option<Notice> {
        match self {
            SyncOutcome::Unavailable(notice) => Some(notice.clone()),
            SyncOutcome::SessionExpired => Some(Notice::SessionExpired),
            _ => None,
        }
    }
}

/// Read-only view for the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSnapshot {
    pub revision: u64,
    pub active_id: Option<String>,
    pub conversations: Vec<ConversationRecord>,
    /// Log of the active conversation, empty when none is active.
    pub messages: Vec<Message>,
    pub awaiting_reply: bool,
}

/// Client-side conversation state: registry, logs, persistence and the
/// send pipeline behind one API.
pub struct ChatCore {
    sync: Arc<MessageSynchronizer>,
    registry: ConversationRegistry,
    pipeline: ChatPipeline,
    in_flight: Arc<InFlight>,
    backend: Arc<dyn ChatBackend>,
    session: Arc<SessionGate>,
    certification: Mutex<Option<String>>,
    revision: Revision,
}

impl ChatCore {
    /// Restore persisted state. A first start with nothing registered gets
    /// one fresh conversation.
    pub fn open(db: Database, backend: Arc<dyn ChatBackend>, session: Arc<SessionGate>) -> Self {
        let revision = Revision::new();
        let store = ConversationStore::new(db);
        let sync = Arc::new(MessageSynchronizer::load(store.clone(), revision.clone()));
        let registry = ConversationRegistry::load(store, revision.clone());
        let in_flight = Arc::new(InFlight::new(revision.clone()));
        let pipeline = ChatPipeline::new(backend.clone(), sync.clone(), in_flight.clone());

        sync.retain(|id| registry.contains(id));

        let core = Self {
            sync,
            registry,
            pipeline,
            in_flight,
            backend,
            session,
            certification: Mutex::new(None),
            revision,
        };
        if core.registry.is_empty() {
            core.create_conversation(None);
        }
        tracing::info!(
            "Restored {} conversation(s)",
            core.registry.list().len()
        );
        core
    }

    // --- Registry ---

    /// Register a conversation seeded with a greeting and make it active.
    pub fn create_conversation(&self, label: Option<&str>) -> String {
        let record = self.registry.create(label);
        self.sync.seed(&record.id);
        self.registry.set_active(Some(&record.id));
        tracing::debug!("Created conversation {} ({})", record.id, record.label);
        record.id
    }

    /// Remove a conversation and its log. Returns false for an unknown id.
    pub fn delete_conversation(&self, conversation_id: &str) -> bool {
        if !self.registry.remove(conversation_id) {
            return false;
        }
        self.sync.remove(conversation_id);
        tracing::debug!("Deleted conversation {}", conversation_id);
        true
    }

    pub fn list_conversations(&self) -> Vec<ConversationRecord> {
        self.registry.list()
    }

    /// Reset a conversation to its greeting. A reply still in flight for it
    /// is discarded when it lands.
    pub fn clear_conversation(&self, conversation_id: &str) -> bool {
        if !self.registry.contains(conversation_id) {
            return false;
        }
        self.sync.seed(conversation_id);
        true
    }

    pub fn active_conversation_id(&self) -> Option<String> {
        self.registry.active()
    }

    /// Switch the active conversation, then pull its server history.
    pub async fn select_conversation(&self, conversation_id: &str) -> SyncOutcome {
        if !self.registry.set_active(Some(conversation_id)) {
            return SyncOutcome::UnknownConversation;
        }
        self.sync_history(conversation_id).await
    }

    /// Fetch server history and merge it behind the local log.
    pub async fn sync_history(&self, conversation_id: &str) -> SyncOutcome {
        let epoch = self.sync.epoch();
        if !self.registry.contains(conversation_id) {
            return SyncOutcome::UnknownConversation;
        }

        match self.backend.fetch_history(conversation_id).await {
            Ok(history) => {
                if !self.registry.contains(conversation_id) {
                    return SyncOutcome::Discarded;
                }
                match self.sync.merge(epoch, conversation_id, history) {
                    Some(added) => SyncOutcome::Merged { added },
                    None => SyncOutcome::Discarded,
                }
            }
            Err(ApiError::SessionExpired) => {
                self.expire_session(epoch);
                SyncOutcome::SessionExpired
            }
            Err(e) => {
                tracing::warn!("Failed to load history for {}: {}", conversation_id, e);
                SyncOutcome::Unavailable(Notice::HistoryUnavailable(e.to_string()))
            }
        }
    }

    // --- Messages ---

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.sync.messages(conversation_id)
    }

    /// Send to the active conversation.
    pub async fn send(&self, text: &str) -> SendOutcome {
        match self.active_conversation_id() {
            Some(id) => self.send_to(&id, text).await,
            None if text.trim().is_empty() => SendOutcome::Skipped,
            None => SendOutcome::UnknownConversation,
        }
    }

    pub async fn send_to(&self, conversation_id: &str, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Skipped;
        }
        let epoch = self.sync.epoch();
        if !self.registry.contains(conversation_id) {
            return SendOutcome::UnknownConversation;
        }

        let outcome = self
            .pipeline
            .send(epoch, conversation_id, text, self.certification())
            .await;
        if outcome == SendOutcome::SessionExpired {
            self.expire_session(epoch);
        }
        outcome
    }

    pub fn awaiting_reply(&self) -> bool {
        self.in_flight.any()
    }

    pub fn awaiting_reply_for(&self, conversation_id: &str) -> bool {
        self.in_flight.contains(conversation_id)
    }

    pub fn set_certification(&self, code: Option<String>) {
        *self
            .certification
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = code.filter(|c| !c.trim().is_empty());
        self.revision.bump();
    }

    pub fn certification(&self) -> Option<String> {
        self.certification
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // --- Observation ---

    pub fn snapshot(&self) -> ChatSnapshot {
        let revision = self.revision.current();
        let active_id = self.registry.active();
        let messages = active_id
            .as_deref()
            .map(|id| self.sync.messages(id))
            .unwrap_or_default();
        ChatSnapshot {
            revision,
            active_id,
            conversations: self.registry.list(),
            messages,
            awaiting_reply: self.in_flight.any(),
        }
    }

    /// Revision counter bumped after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // --- Session ---

    /// Begin a session after sign-in. Makes sure there is a conversation to
    /// talk in.
    pub fn start_session(&self) {
        self.session.renew();
        if self.registry.is_empty() {
            self.create_conversation(None);
        }
    }

    /// Drop all conversation state, in memory and on disk.
    pub fn end_session(&self) {
        self.registry.reset();
        self.sync.teardown();
        self.in_flight.clear();
        *self
            .certification
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        tracing::info!("Conversation state cleared");
    }

    pub fn sign_out(&self) -> Notice {
        self.expire_session(self.sync.epoch());
        Notice::SignedOut
    }

    /// Expire the session observed at `epoch`. Later sessions are left alone.
    fn expire_session(&self, epoch: SessionEpoch) {
        if self.sync.epoch() != epoch {
            return;
        }
        self.session.expire();
        self.end_session();
    }

    /// Tear down when the current session's expiry signal fires.
    pub fn watch_session(self: &Arc<Self>) -> JoinHandle<()> {
        let token = self.session.current();
        let epoch = self.sync.epoch();
        let core = Arc::clone(self);
        tokio::spawn(async move {
            token.cancelled().await;
            core.expire_session(epoch);
        })
    }
}
