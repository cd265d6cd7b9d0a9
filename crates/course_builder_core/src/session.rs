//! crates/course_builder_core/src/session.rs
//!
//! The function-based interface the UI layer calls into. Each operation takes the
//! caller's current `LearningState` snapshot and returns the next one; the
//! ports injected at construction perform the remote and persistence work.

use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::{LessonCoord, SavedPlan};
use crate::generation::{GenerationHandle, LessonGenerator};
use crate::learning::{LearningError, LearningResult, LearningState, Phase};
use crate::ports::{
    DatabaseService, LessonGenerationService, OutlineGenerationService, PortResult,
};
use crate::stream::DecoderConfig;

/// The outcome of moving to a lesson.
#[derive(Debug)]
pub enum LessonSelection {
    /// The lesson content was already in the tree (or nothing needs generating).
    Cached(LearningState),
    /// A generation stream is running; follow `generation` and commit its result.
    Streaming {
        state: LearningState,
        generation: GenerationHandle,
    },
}

impl LessonSelection {
    pub fn state(&self) -> &LearningState {
        match self {
            LessonSelection::Cached(state) => state,
            LessonSelection::Streaming { state, .. } => state,
        }
    }

    pub fn into_parts(self) -> (LearningState, Option<GenerationHandle>) {
        match self {
            LessonSelection::Cached(state) => (state, None),
            LessonSelection::Streaming { state, generation } => (state, Some(generation)),
        }
    }
}

pub struct LearningSession {
    outlines: Arc<dyn OutlineGenerationService>,
    db: Arc<dyn DatabaseService>,
    generator: LessonGenerator,
}

impl LearningSession {
    pub fn new(
        outlines: Arc<dyn OutlineGenerationService>,
        lessons: Arc<dyn LessonGenerationService>,
        db: Arc<dyn DatabaseService>,
        config: DecoderConfig,
    ) -> Self {
        Self {
            outlines,
            generator: LessonGenerator::new(lessons, db.clone(), config),
            db,
        }
    }

    pub fn generator(&self) -> &LessonGenerator {
        &self.generator
    }

    /// Asks the generation service for an outline and proposes it.
    pub async fn generate_outline(
        &self,
        state: &LearningState,
        topic: &str,
    ) -> LearningResult<LearningState> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(LearningError::EmptyTopic);
        }
        if state.is_approved() {
            return Err(LearningError::AlreadyActive);
        }

        info!(%topic, "Generating outline");
        let outline = self.outlines.generate_outline(topic).await?;
        let next = state.propose(topic, outline)?;
        if let Some(outline) = next.outline() {
            info!(
                modules = outline.modules.len(),
                lessons = outline.total_lessons(),
                "Outline proposed"
            );
        }
        Ok(next)
    }

    /// Persists the proposed outline and opens the approval gate.
    pub async fn approve_outline(
        &self,
        state: &LearningState,
        user_id: Uuid,
    ) -> LearningResult<LearningState> {
        let outline = match (state.phase(), state.outline()) {
            (Phase::Proposed, Some(outline)) => outline,
            _ => return Err(LearningError::NotProposed),
        };
        let persisted = self.db.save_plan(user_id, state.topic(), outline).await?;
        info!(plan_id = %persisted.plan_id, "Outline approved and saved");
        state.approve(persisted)
    }

    /// Replaces the session with one of the user's stored plans.
    pub async fn load_saved_plan(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
    ) -> LearningResult<LearningState> {
        let plan = self.db.load_plan(user_id, plan_id).await?;
        let next = LearningState::from_saved_plan(plan)?;
        self.generator.cancel_all().await;
        info!(%plan_id, completed = next.completed_lessons().len(), "Saved plan loaded");
        Ok(next)
    }

    pub async fn list_plans(&self, user_id: Uuid) -> PortResult<Vec<SavedPlan>> {
        self.db.list_plans(user_id).await
    }

    pub async fn delete_plan(&self, user_id: Uuid, plan_id: Uuid) -> PortResult<()> {
        self.db.delete_plan(user_id, plan_id).await?;
        info!(%plan_id, "Plan deleted");
        Ok(())
    }

    pub async fn select_lesson(
        &self,
        state: &LearningState,
        coord: LessonCoord,
    ) -> LearningResult<LessonSelection> {
        let next = state.select(coord)?;
        self.begin(next).await
    }

    /// Completes the current lesson and moves on.
    ///
    /// Completion is persisted in the background; a failed write is logged,
    /// local progress stands, and the next advance over the lesson writes again.
    pub async fn advance(&self, state: &LearningState) -> LearningResult<LessonSelection> {
        let step = state.advance()?;
        self.persist_completion(step.completed_lesson);
        if !step.moved {
            info!("Advanced past the final lesson; course complete");
            return Ok(LessonSelection::Cached(step.state));
        }
        self.begin(step.state).await
    }

    pub async fn retreat(&self, state: &LearningState) -> LearningResult<LessonSelection> {
        let next = state.retreat()?;
        if next.current() == state.current() {
            return Ok(LessonSelection::Cached(next));
        }
        self.begin(next).await
    }

    pub async fn reset(&self, state: &LearningState) -> LearningState {
        self.generator.cancel_all().await;
        state.reset()
    }

    async fn begin(&self, next: LearningState) -> LearningResult<LessonSelection> {
        let coord = next.current();
        self.generator.cancel_except(coord).await;
        if !next.is_generating() {
            return Ok(LessonSelection::Cached(next));
        }

        let request = next
            .outline()
            .and_then(|outline| outline.lesson_request(next.topic(), coord))
            .ok_or(LearningError::LessonNotFound(coord))?;
        let generation = self.generator.generate(coord, request).await;
        Ok(LessonSelection::Streaming {
            state: next.track_generation(generation.generation_id),
            generation,
        })
    }

    fn persist_completion(&self, lesson_id: String) {
        let db = self.db.clone();
        tokio::spawn(async move {
            if let Err(e) = db.mark_lesson_complete(&lesson_id).await {
                error!(%lesson_id, "Failed to persist lesson completion: {}", e);
            }
        });
    }
}
