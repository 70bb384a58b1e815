use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use url::Url;

use super::models::{ErrorResponse, HistoryMessage};
use crate::api::traits::ChatBackend;
use crate::api::types::{ApiError, SendRequest, SendResponse};
use crate::models::Message;

pub struct HttpBackend {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: Url, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ApiError::NetworkError(format!("Base URL cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn check_status(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::error_for_status(status, &body))
    }

    fn error_for_status(status: StatusCode, body: &str) -> ApiError {
        if status == StatusCode::UNAUTHORIZED {
            return ApiError::SessionExpired;
        }
        ApiError::Status {
            status: status.as_u16(),
            message: Self::parse_error_message(status, body),
        }
    }

    fn parse_error_message(status: StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
            return parsed.detail.message();
        }
        format!("HTTP {}: Request failed", status.as_u16())
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn send_message(&self, request: SendRequest) -> Result<SendResponse, ApiError> {
        // Trailing slash matters to the backend router.
        let url = self.endpoint(&["chat", ""])?;

        let response = self
            .authorize(self.client.post(url).json(&request))
            .send()
            .await
            .map_err(|e| ApiError::NetworkError(e.to_string()))?;

        Self::check_status(response)
            .await?
            .json::<SendResponse>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let url = self.endpoint(&["chat", "history", conversation_id])?;

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| ApiError::NetworkError(e.to_string()))?;

        let history: Vec<HistoryMessage> = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        Ok(history.into_iter().map(HistoryMessage::into_message).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(
            Url::parse(base).unwrap(),
            Some("tok".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoints() {
        let b = backend("http://localhost:8001");
        assert_eq!(
            b.endpoint(&["chat", ""]).unwrap().as_str(),
            "http://localhost:8001/chat/"
        );
        assert_eq!(
            b.endpoint(&["chat", "history", "abc"]).unwrap().as_str(),
            "http://localhost:8001/chat/history/abc"
        );

        let b = backend("https://api.example.com/v1/");
        assert_eq!(
            b.endpoint(&["chat", "history", "abc"]).unwrap().as_str(),
            "https://api.example.com/v1/chat/history/abc"
        );
    }

    #[test]
    fn test_unauthorized_maps_to_session_expired() {
        let err = HttpBackend::error_for_status(StatusCode::UNAUTHORIZED, "");
        assert!(err.is_session_expired());

        let err = HttpBackend::error_for_status(StatusCode::FORBIDDEN, "");
        assert!(!err.is_session_expired());
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn test_error_detail_extraction() {
        let err = HttpBackend::error_for_status(
            StatusCode::BAD_REQUEST,
            r#"{"detail": "Certification not found"}"#,
        );
        assert_eq!(err.user_message(), "Certification not found");

        let err = HttpBackend::error_for_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"detail": [{"msg": "field required", "loc": ["body", "message"]}]}"#,
        );
        assert_eq!(err.user_message(), "field required");

        let err = HttpBackend::error_for_status(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(err.user_message(), "HTTP 502: Request failed");
    }

    #[test]
    fn test_history_records_are_never_loading() {
        let records: Vec<HistoryMessage> = serde_json::from_str(
            r#"[{"id": "1", "content": "hi", "isUser": true},
                {"id": "2", "content": "hello", "is_user": false, "timestamp": "2024-05-01T10:00:00Z"}]"#,
        )
        .unwrap();
        let messages: Vec<Message> = records.into_iter().map(HistoryMessage::into_message).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].is_user);
        assert!(messages.iter().all(|m| !m.is_loading));
    }
}
