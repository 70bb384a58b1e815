use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};

use super::traits::ChatBackend;
use super::types::{ApiError, SendRequest, SendResponse};
use crate::models::Message;

type Reply = Result<SendResponse, ApiError>;

enum Step {
    Now(Reply),
    Held(oneshot::Receiver<Reply>),
}

/// In-process backend that plays back queued replies. Held replies let a
/// test observe the log while a send is suspended.
#[derive(Default)]
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    history: Mutex<VecDeque<Result<Vec<Message>, ApiError>>>,
    sent: Mutex<Vec<SendRequest>>,
    history_calls: Mutex<Vec<String>>,
    started: Notify,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.push(Step::Now(Ok(SendResponse {
            response: text.to_string(),
        })));
        self
    }

    pub fn fail(self, err: ApiError) -> Self {
        self.push(Step::Now(Err(err)));
        self
    }

    pub fn history(self, result: Result<Vec<Message>, ApiError>) -> Self {
        self.history.lock().unwrap().push_back(result);
        self
    }

    /// Queue a reply the test releases later.
    pub fn hold(&self) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        self.push(Step::Held(rx));
        tx
    }

    fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    /// Resolves once a send has reached the backend.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    pub fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn history_calls(&self) -> Vec<String> {
        self.history_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send_message(&self, request: SendRequest) -> Result<SendResponse, ApiError> {
        self.sent.lock().unwrap().push(request);
        let step = self.steps.lock().unwrap().pop_front();
        self.started.notify_one();
        match step {
            Some(Step::Now(reply)) => reply,
            Some(Step::Held(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(ApiError::NetworkError("reply dropped".to_string()))),
            None => Err(ApiError::NetworkError("no scripted reply".to_string())),
        }
    }

    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        self.history_calls
            .lock()
            .unwrap()
            .push(conversation_id.to_string());
        self.history
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
