//! services/api/src/adapters/outline_llm.rs
//!
//! This module contains the adapter for the Outline-Generating LLM.
//! It implements the `OutlineGenerationService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use course_builder_core::{
    domain::Outline,
    ports::{OutlineGenerationService, PortError, PortResult},
};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

const SYSTEM_INSTRUCTIONS: &str = r#"You are an expert curriculum designer. Given a topic, design a structured learning path.

Respond with ONLY a JSON object, no prose, in exactly this shape:
{
  "outline": {
    "title": "Course title",
    "description": "One or two sentences describing the course",
    "modules": [
      {
        "id": "module-1",
        "title": "Module title",
        "description": "What this module covers",
        "lessons": [
          { "id": "lesson-1-1", "title": "Lesson title", "estimatedMinutes": 10 }
        ]
      }
    ]
  }
}

Rules:
- 3 to 6 modules, each with 2 to 5 lessons, ordered from fundamentals to advanced material.
- Every module id and lesson id is unique across the whole outline.
- estimatedMinutes is a positive whole number between 5 and 30.
- If the topic cannot be taught (empty, harmful or nonsensical), respond with {"error": "<short reason>"} instead."#;

/// The shapes the model is allowed to answer with.
#[derive(Deserialize)]
#[serde(untagged)]
enum OutlinePayload {
    Wrapped { outline: Outline },
    Error { error: String },
    Bare(Outline),
}

/// Parses the model's answer, tolerating a surrounding markdown code fence.
pub(crate) fn parse_outline_payload(raw: &str) -> PortResult<Outline> {
    let fence = Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$")
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
    let json = fence
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map_or(raw.trim(), |m| m.as_str());

    match serde_json::from_str::<OutlinePayload>(json) {
        Ok(OutlinePayload::Wrapped { outline }) | Ok(OutlinePayload::Bare(outline)) => Ok(outline),
        Ok(OutlinePayload::Error { error }) => Err(PortError::Unexpected(error)),
        Err(e) => Err(PortError::InvalidPayload(e.to_string())),
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `OutlineGenerationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiOutlineAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiOutlineAdapter {
    /// Creates a new `OpenAiOutlineAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `OutlineGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl OutlineGenerationService for OpenAiOutlineAdapter {
    async fn generate_outline(&self, topic: &str) -> PortResult<Outline> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(format!("TOPIC: {}", topic))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let raw = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::InvalidPayload("Outline LLM response contained no text content.".to_string())
            })?;
        debug!(chars = raw.len(), "Outline LLM responded");

        parse_outline_payload(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::parse_outline_payload;
    use course_builder_core::ports::PortError;

    const OUTLINE: &str = r#"{"title":"Rust","description":"d","modules":[{"id":"m1","title":"Basics","description":"","lessons":[{"id":"l1","title":"Ownership","estimatedMinutes":12}]}]}"#;

    #[test]
    fn accepts_wrapped_and_bare_outlines() {
        let wrapped = format!(r#"{{"outline":{}}}"#, OUTLINE);
        let outline = parse_outline_payload(&wrapped).unwrap();
        assert_eq!(outline.modules[0].lessons[0].estimated_minutes, 12);
        assert!(outline.modules[0].lessons[0].content.is_none());

        assert_eq!(parse_outline_payload(OUTLINE).unwrap(), outline);
    }

    #[test]
    fn strips_markdown_fences() {
        let fenced = format!("```json\n{}\n```", OUTLINE);
        assert_eq!(parse_outline_payload(&fenced).unwrap().title, "Rust");
    }

    #[test]
    fn surfaces_error_payloads() {
        let err = parse_outline_payload(r#"{"error":"topic is empty"}"#).unwrap_err();
        assert!(matches!(err, PortError::Unexpected(msg) if msg == "topic is empty"));
    }

    #[test]
    fn structurally_invalid_payload_is_rejected() {
        let err = parse_outline_payload(r#"{"title":"x","modules":"none"}"#).unwrap_err();
        assert!(matches!(err, PortError::InvalidPayload(_)));
    }
}
