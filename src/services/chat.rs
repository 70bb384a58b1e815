use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::revision::Revision;
use super::synchronizer::{MessageSynchronizer, SessionEpoch};
use crate::api::{ApiError, ChatBackend, SendRequest};
use crate::models::{Message, Notice};

/// How a single send ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank text; nothing happened.
    Skipped,
    /// A reply is already pending for this conversation.
    Busy,
    UnknownConversation,
    /// The placeholder was replaced by the assistant reply.
    Settled { reply_id: String },
    /// The conversation was deleted or the session ended before the send
    /// landed or before its reply arrived; the result was dropped.
    Discarded,
    /// The placeholder was removed; the user's message stays.
    RolledBack(Notice),
    SessionExpired,
}

impl SendOutcome {
    pub fn notice(&self) -> Option<Notice> {
        match self {
            SendOutcome::RolledBack(notice) => Some(notice.clone()),
            SendOutcome::SessionExpired => Some(Notice::SessionExpired),
            _ => None,
        }
    }
}

/// Conversations with a send in flight.
#[derive(Debug, Default)]
pub struct InFlight {
    ids: Mutex<HashSet<String>>,
    revision: Revision,
}

impl InFlight {
    pub fn new(revision: Revision) -> Self {
        Self {
            ids: Mutex::default(),
            revision,
        }
    }

    fn ids(&self) -> MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a conversation busy. The mark is released when the guard drops,
    /// whichever way the send ends.
    pub fn try_begin(self: &Arc<Self>, conversation_id: &str) -> Option<InFlightGuard> {
        if !self.ids().insert(conversation_id.to_string()) {
            return None;
        }
        self.revision.bump();
        Some(InFlightGuard {
            owner: Arc::clone(self),
            conversation_id: conversation_id.to_string(),
        })
    }

    pub fn any(&self) -> bool {
        !self.ids().is_empty()
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.ids().contains(conversation_id)
    }

    pub fn clear(&self) {
        self.ids().clear();
        self.revision.bump();
    }
}

pub struct InFlightGuard {
    owner: Arc<InFlight>,
    conversation_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.owner.ids().remove(&self.conversation_id);
        self.owner.revision.bump();
    }
}

/// One optimistic round trip to the assistant.
#[derive(Clone)]
pub struct ChatPipeline {
    backend: Arc<dyn ChatBackend>,
    sync: Arc<MessageSynchronizer>,
    in_flight: Arc<InFlight>,
}

impl ChatPipeline {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        sync: Arc<MessageSynchronizer>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self {
            backend,
            sync,
            in_flight,
        }
    }

    /// Run one send under the session `epoch` the caller observed before
    /// checking that the conversation exists.
    pub async fn send(
        &self,
        epoch: SessionEpoch,
        conversation_id: &str,
        text: &str,
        certification_code: Option<String>,
    ) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Skipped;
        }

        let Some(_busy) = self.in_flight.try_begin(conversation_id) else {
            tracing::debug!("Send to {} ignored, reply pending", conversation_id);
            return SendOutcome::Busy;
        };

        let Some(pending) = self.sync.append_pending(epoch, conversation_id, text) else {
            return SendOutcome::Discarded;
        };

        let request = SendRequest {
            message: text.to_string(),
            conversation_id: conversation_id.to_string(),
            certification_code,
        };

        match self.backend.send_message(request).await {
            Ok(response) => {
                let reply = Message::assistant(response.response);
                let reply_id = reply.id.clone();
                if self
                    .sync
                    .settle(epoch, conversation_id, &pending.placeholder_id, reply)
                {
                    SendOutcome::Settled { reply_id }
                } else {
                    SendOutcome::Discarded
                }
            }
            Err(ApiError::SessionExpired) => {
                self.sync
                    .rollback(epoch, conversation_id, &pending.placeholder_id);
                SendOutcome::SessionExpired
            }
            Err(e) => {
                tracing::warn!(status = ?e.status(), "Send to {} failed: {}", conversation_id, e);
                self.sync
                    .rollback(epoch, conversation_id, &pending.placeholder_id);
                SendOutcome::RolledBack(Notice::SendFailed(e.user_message()))
            }
        }
    }
}

/// Certification code carried by a `certification:<code>` context string.
pub fn certification_from_context(context: &str) -> Option<String> {
    context
        .strip_prefix("certification:")
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::ScriptedBackend;
    use crate::api::SendResponse;
    use crate::services::database::Database;
    use crate::services::store::ConversationStore;

    struct Fixture {
        backend: Arc<ScriptedBackend>,
        sync: Arc<MessageSynchronizer>,
        in_flight: Arc<InFlight>,
        pipeline: ChatPipeline,
    }

    fn fixture(backend: ScriptedBackend) -> Fixture {
        let revision = Revision::new();
        let store = ConversationStore::new(Database::new_in_memory().unwrap());
        let sync = Arc::new(MessageSynchronizer::load(store, revision.clone()));
        let in_flight = Arc::new(InFlight::new(revision));
        let backend = Arc::new(backend);
        let pipeline = ChatPipeline::new(backend.clone(), sync.clone(), in_flight.clone());
        sync.seed("c");
        Fixture {
            backend,
            sync,
            in_flight,
            pipeline,
        }
    }

    #[tokio::test]
    async fn test_blank_send_is_noop() {
        let f = fixture(ScriptedBackend::new().reply("unused"));

        assert_eq!(f.pipeline.send(0, "c", "", None).await, SendOutcome::Skipped);
        assert_eq!(f.pipeline.send(0, "c", "   ", None).await, SendOutcome::Skipped);

        assert_eq!(f.sync.messages("c").len(), 1);
        assert!(f.backend.sent().is_empty());
        assert!(!f.in_flight.any());
    }

    #[tokio::test]
    async fn test_success_replaces_placeholder() {
        let f = fixture(ScriptedBackend::new().reply("ISTQB is..."));

        let outcome = f
            .pipeline
            .send(0, "c", "What is ISTQB?", Some("CTFL".to_string()))
            .await;
        assert!(matches!(outcome, SendOutcome::Settled { .. }));

        let log = f.sync.messages("c");
        assert_eq!(log.len(), 3);
        assert!(log[1].is_user);
        assert_eq!(log[1].content, "What is ISTQB?");
        assert_eq!(log[2].content, "ISTQB is...");
        assert!(!log[2].is_user && !log[2].is_loading);

        let sent = f.backend.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].conversation_id, "c");
        assert_eq!(sent[0].certification_code.as_deref(), Some("CTFL"));
        assert!(!f.in_flight.any());
    }

    #[tokio::test]
    async fn test_failure_rolls_back_placeholder_only() {
        let f = fixture(ScriptedBackend::new().fail(ApiError::Status {
            status: 500,
            message: "Backend unavailable".to_string(),
        }));

        let outcome = f.pipeline.send(0, "c", "hello", None).await;
        assert_eq!(
            outcome,
            SendOutcome::RolledBack(Notice::SendFailed("Backend unavailable".to_string()))
        );

        let log = f.sync.messages("c");
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].content, "hello");
        assert!(log.iter().all(|m| !m.is_loading));
        assert!(!f.in_flight.any());
    }

    #[tokio::test]
    async fn test_unauthorized_is_distinct() {
        let f = fixture(ScriptedBackend::new().fail(ApiError::SessionExpired));

        let outcome = f.pipeline.send(0, "c", "hello", None).await;
        assert_eq!(outcome, SendOutcome::SessionExpired);
        assert_eq!(outcome.notice(), Some(Notice::SessionExpired));
        assert!(!f.in_flight.any());
    }

    #[tokio::test]
    async fn test_optimistic_pair_visible_while_suspended() {
        let f = fixture(ScriptedBackend::new());
        let release = f.backend.hold();

        let pipeline = f.pipeline.clone();
        let task = tokio::spawn(async move { pipeline.send(0, "c", "What is ISTQB?", None).await });
        f.backend.started().await;

        let log = f.sync.messages("c");
        assert_eq!(log.len(), 3);
        assert!(log[2].is_loading);
        assert!(f.in_flight.contains("c"));

        // Second send to the same conversation is refused without mutation
        assert_eq!(f.pipeline.send(0, "c", "again", None).await, SendOutcome::Busy);
        assert_eq!(f.sync.messages("c").len(), 3);

        release
            .send(Ok(SendResponse {
                response: "ISTQB is...".to_string(),
            }))
            .unwrap();
        assert!(matches!(task.await.unwrap(), SendOutcome::Settled { .. }));
        assert!(!f.in_flight.contains("c"));
    }

    #[tokio::test]
    async fn test_send_after_teardown_is_discarded() {
        let f = fixture(ScriptedBackend::new().reply("unused"));
        let epoch = f.sync.epoch();
        f.sync.teardown();

        assert_eq!(
            f.pipeline.send(epoch, "c", "secret text", None).await,
            SendOutcome::Discarded
        );
        assert!(f.backend.sent().is_empty());
        assert!(f.sync.messages("c").is_empty());
        assert!(!f.in_flight.any());
    }

    #[tokio::test]
    async fn test_dropped_send_releases_busy_flag() {
        let f = fixture(ScriptedBackend::new());
        let _release = f.backend.hold();

        let pipeline = f.pipeline.clone();
        let task = tokio::spawn(async move { pipeline.send(0, "c", "hi", None).await });
        f.backend.started().await;
        assert!(f.in_flight.any());

        task.abort();
        let _ = task.await;
        assert!(!f.in_flight.any());
    }

    #[test]
    fn test_certification_from_context() {
        assert_eq!(
            certification_from_context("certification:CTFL").as_deref(),
            Some("CTFL")
        );
        assert_eq!(certification_from_context("certification:  "), None);
        assert_eq!(certification_from_context("general"), None);
    }
}
