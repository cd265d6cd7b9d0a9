//! crates/course_builder_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{LessonRequest, LoadedPlan, Outline, PersistedOutline, SavedPlan};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Remote service returned an invalid payload: {0}")]
    InvalidPayload(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// The raw, unframed bytes of a streamed lesson response.
pub type ByteStream = Pin<Box<dyn Stream<Item = PortResult<Bytes>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Plans ---
    /// Persists a full outline (plan, module and lesson rows) for a user.
    async fn save_plan(
        &self,
        user_id: Uuid,
        topic: &str,
        outline: &Outline,
    ) -> PortResult<PersistedOutline>;

    /// Loads a plan owned by `user_id`. Plans of other users are `NotFound`.
    async fn load_plan(&self, user_id: Uuid, plan_id: Uuid) -> PortResult<LoadedPlan>;

    /// Deletes a plan owned by `user_id`. Plans of other users are `NotFound`.
    async fn delete_plan(&self, user_id: Uuid, plan_id: Uuid) -> PortResult<()>;

    /// Lists a user's plans, most recently updated first.
    async fn list_plans(&self, user_id: Uuid) -> PortResult<Vec<SavedPlan>>;

    // --- Lessons ---
    async fn mark_lesson_complete(&self, lesson_id: &str) -> PortResult<()>;

    /// Idempotent upsert keyed by lesson id.
    async fn save_lesson_content(&self, lesson_id: &str, content: &str) -> PortResult<()>;
}

#[async_trait]
pub trait OutlineGenerationService: Send + Sync {
    /// Generates a complete curriculum outline for a topic in a single round trip.
    async fn generate_outline(&self, topic: &str) -> PortResult<Outline>;
}

#[async_trait]
pub trait LessonGenerationService: Send + Sync {
    /// Opens a streamed lesson body. The stream carries `data: <JSON>` framed records.
    async fn stream_lesson(&self, request: &LessonRequest) -> PortResult<ByteStream>;
}
