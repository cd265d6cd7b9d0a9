//! services/api/src/adapters/lesson_stream.rs
//!
//! This module contains the adapter for the streamed lesson generation service.
//! It implements the `LessonGenerationService` port from the `core` crate and
//! hands the raw response body to the core decoder untouched.

use async_trait::async_trait;
use course_builder_core::{
    domain::LessonRequest,
    ports::{ByteStream, LessonGenerationService, PortError, PortResult},
};
use futures::TryStreamExt;
use serde::Deserialize;
use tracing::{error, info};

/// The body returned alongside a non-success status.
#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// An adapter that POSTs lesson requests to an HTTP endpoint and streams the reply.
#[derive(Clone)]
pub struct HttpLessonAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpLessonAdapter {
    /// Creates a new `HttpLessonAdapter`.
    pub fn new(client: reqwest::Client, endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

/// Extracts the message of an `{error: string}` body, falling back to the status.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| format!("Lesson service returned {}", status))
}

#[async_trait]
impl LessonGenerationService for HttpLessonAdapter {
    async fn stream_lesson(&self, request: &LessonRequest) -> PortResult<ByteStream> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(status, &body);
            error!(%status, lesson_id = %request.lesson_id, "Lesson service rejected request: {}", message);
            return Err(PortError::Unexpected(message));
        }

        info!(lesson_id = %request.lesson_id, "Lesson stream opened");
        let stream = response
            .bytes_stream()
            .map_err(|e| PortError::Unexpected(e.to_string()));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::error_message;
    use reqwest::StatusCode;

    #[test]
    fn prefers_the_service_error_text() {
        let message = error_message(StatusCode::TOO_MANY_REQUESTS, r#"{"error":"Rate limit exceeded"}"#);
        assert_eq!(message, "Rate limit exceeded");
    }

    #[test]
    fn falls_back_to_status() {
        let message = error_message(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert!(message.contains("502"));
    }
}
