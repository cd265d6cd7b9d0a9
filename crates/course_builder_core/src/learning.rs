//! crates/course_builder_core/src/learning.rs
//!
//! The navigation and progress state machine, written as a reducer over
//! immutable snapshots.
//!
//! Every transition takes `&self` and returns the next `LearningState` (or an
//! error, in which case the caller simply keeps the snapshot it already holds).
//! Side effects such as network calls and persistence live in `session`.

use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::curriculum::OutlineDefect;
use crate::domain::{Lesson, LessonCoord, LoadedPlan, Module, Outline, PersistedOutline};
use crate::ports::PortError;

//=========================================================================================
// Errors
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum LearningError {
    #[error("A topic is required")]
    EmptyTopic,
    #[error("No learning plan is active")]
    NoOutline,
    #[error("There is no proposed outline awaiting approval")]
    NotProposed,
    #[error("The outline has not been approved yet")]
    NotApproved,
    #[error("A learning plan is already active; reset it first")]
    AlreadyActive,
    #[error("No lesson exists at {0}")]
    LessonNotFound(LessonCoord),
    #[error("Generated outline is invalid: {0}")]
    InvalidOutline(#[from] OutlineDefect),
    #[error(transparent)]
    Port(#[from] PortError),
}

pub type LearningResult<T> = Result<T, LearningError>;

//=========================================================================================
// State
//=========================================================================================

/// Where the session stands relative to the approval gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    NoOutline,
    /// An outline was generated but not yet committed.
    Proposed,
    /// The outline is persisted and lessons may be generated.
    Active { plan_id: Uuid },
}

/// An immutable snapshot of one learner's session.
///
/// Whenever an outline is present, `current` indexes an existing lesson.
#[derive(Debug, Clone, Default)]
pub struct LearningState {
    phase: Phase,
    topic: String,
    outline: Option<Arc<Outline>>,
    current: LessonCoord,
    completed_lessons: BTreeSet<String>,
    generating: bool,
    /// The generation whose updates the current view follows.
    generation: Option<u64>,
    current_content: String,
}

/// The result of `LearningState::advance`.
#[derive(Debug, Clone)]
pub struct Advance {
    pub state: LearningState,
    /// Id of the departed lesson. Reported on every advance so that a
    /// completion write which failed earlier is issued again.
    pub completed_lesson: String,
    /// False when advancing from the final lesson.
    pub moved: bool,
}

impl LearningState {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Accessors ---

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn outline(&self) -> Option<&Arc<Outline>> {
        self.outline.as_ref()
    }

    pub fn current(&self) -> LessonCoord {
        self.current
    }

    pub fn completed_lessons(&self) -> &BTreeSet<String> {
        &self.completed_lessons
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn active_generation(&self) -> Option<u64> {
        self.generation
    }

    pub fn current_content(&self) -> &str {
        &self.current_content
    }

    pub fn is_approved(&self) -> bool {
        matches!(self.phase, Phase::Active { .. })
    }

    pub fn plan_id(&self) -> Option<Uuid> {
        match self.phase {
            Phase::Active { plan_id } => Some(plan_id),
            _ => None,
        }
    }

    pub fn current_lesson(&self) -> Option<&Arc<Lesson>> {
        self.outline.as_ref()?.lookup(self.current)
    }

    pub fn current_module(&self) -> Option<&Arc<Module>> {
        self.outline.as_ref()?.module(self.current.module_index)
    }

    /// Percentage of lessons completed; zero with no outline or no lessons.
    pub fn progress(&self) -> f64 {
        self.outline
            .as_ref()
            .map_or(0.0, |outline| outline.progress(&self.completed_lessons))
    }

    /// True once the learner stands on the final lesson and has completed it.
    pub fn course_complete(&self) -> bool {
        match (&self.outline, self.current_lesson()) {
            (Some(outline), Some(lesson)) => {
                outline.is_last(self.current) && self.completed_lessons.contains(&lesson.id)
            }
            _ => false,
        }
    }

    // --- Transitions ---

    /// NoOutline (or a previous proposal) -> Proposed.
    pub fn propose(&self, topic: &str, outline: Outline) -> LearningResult<Self> {
        if self.is_approved() {
            return Err(LearningError::AlreadyActive);
        }
        outline.validate()?;
        let current = outline.first_coord().unwrap_or_default();
        Ok(Self {
            phase: Phase::Proposed,
            topic: topic.to_string(),
            outline: Some(Arc::new(outline)),
            current,
            ..Self::default()
        })
    }

    /// Proposed -> Active, adopting the ids assigned by the store.
    pub fn approve(&self, persisted: PersistedOutline) -> LearningResult<Self> {
        if self.phase != Phase::Proposed {
            return Err(LearningError::NotProposed);
        }
        persisted.outline.validate()?;
        let current = persisted.outline.first_coord().unwrap_or_default();
        Ok(Self {
            phase: Phase::Active {
                plan_id: persisted.plan_id,
            },
            topic: self.topic.clone(),
            outline: Some(Arc::new(persisted.outline)),
            current,
            ..Self::default()
        })
    }

    /// Builds an active state straight from a stored plan.
    ///
    /// The learner is placed on the first lesson not yet completed, or on the
    /// final lesson when every lesson is done.
    pub fn from_saved_plan(plan: LoadedPlan) -> LearningResult<Self> {
        plan.outline.validate()?;
        let completed_lessons = plan.outline.completed_ids();
        let flat = plan.outline.flatten();
        let current = flat
            .iter()
            .find(|entry| !completed_lessons.contains(&entry.lesson.id))
            .or_else(|| flat.last())
            .map(|entry| entry.coord)
            .unwrap_or_default();
        let current_content = plan
            .outline
            .lookup(current)
            .and_then(|lesson| lesson.content.clone())
            .unwrap_or_default();

        Ok(Self {
            phase: Phase::Active {
                plan_id: plan.plan_id,
            },
            topic: plan.topic,
            outline: Some(Arc::new(plan.outline)),
            current,
            completed_lessons,
            generating: false,
            generation: None,
            current_content,
        })
    }

    fn require_active(&self) -> LearningResult<&Arc<Outline>> {
        match (&self.phase, &self.outline) {
            (Phase::Active { .. }, Some(outline)) => Ok(outline),
            (Phase::Proposed, _) => Err(LearningError::NotApproved),
            _ => Err(LearningError::NoOutline),
        }
    }

    /// Moves to `coord`, serving cached content or flagging that generation is needed.
    pub fn select(&self, coord: LessonCoord) -> LearningResult<Self> {
        let outline = self.require_active()?;
        let lesson = outline
            .lookup(coord)
            .ok_or(LearningError::LessonNotFound(coord))?;

        let (current_content, generating) = match &lesson.content {
            Some(content) => (content.clone(), false),
            None => (String::new(), true),
        };
        Ok(Self {
            current: coord,
            current_content,
            generating,
            generation: None,
            ..self.clone()
        })
    }

    /// Binds the current view to `generation`; ignored when nothing is being generated.
    pub fn track_generation(&self, generation: u64) -> Self {
        if !self.generating {
            return self.clone();
        }
        Self {
            generation: Some(generation),
            ..self.clone()
        }
    }

    fn follows(&self, generation: u64) -> bool {
        self.generating && self.generation == Some(generation)
    }

    /// Shows partial content, but only from the generation the view follows.
    pub fn apply_partial(&self, generation: u64, content: &str) -> Self {
        if !self.follows(generation) {
            return self.clone();
        }
        Self {
            current_content: content.to_string(),
            ..self.clone()
        }
    }

    /// Writes finished content into the tree.
    ///
    /// The write is skipped when the lesson at `coord` is no longer `lesson_id`
    /// (the outline was replaced meanwhile) or already has content. The current
    /// view only changes when it follows `generation`.
    pub fn commit_content(
        &self,
        coord: LessonCoord,
        lesson_id: &str,
        generation: u64,
        content: &str,
    ) -> Self {
        let mut next = self.clone();
        if let Some(outline) = &self.outline {
            let fresh = outline
                .lookup(coord)
                .is_some_and(|lesson| lesson.id == lesson_id && lesson.content.is_none());
            if fresh {
                if let Some(updated) = outline.with_lesson_content(coord, content) {
                    next.outline = Some(Arc::new(updated));
                }
            }
        }
        if self.follows(generation) {
            next.generating = false;
            next.generation = None;
            next.current_content = content.to_string();
        }
        next
    }

    /// Ends a failed or cancelled generation, if it is the one the view follows.
    pub fn fail_generation(&self, generation: u64) -> Self {
        if !self.follows(generation) {
            return self.clone();
        }
        Self {
            generating: false,
            generation: None,
            ..self.clone()
        }
    }

    /// Completes the current lesson and moves to the next one in document order.
    ///
    /// From the final lesson the completion is still recorded but the
    /// position does not change.
    pub fn advance(&self) -> LearningResult<Advance> {
        let outline = self.require_active()?;
        let departed = outline
            .lookup(self.current)
            .ok_or(LearningError::LessonNotFound(self.current))?;

        let mut completed_lessons = self.completed_lessons.clone();
        completed_lessons.insert(departed.id.clone());
        let marked = if departed.completed {
            outline.clone()
        } else {
            outline
                .with_lesson_completed(self.current)
                .map(Arc::new)
                .unwrap_or_else(|| outline.clone())
        };
        let completed = Self {
            outline: Some(marked),
            completed_lessons,
            ..self.clone()
        };

        let completed_lesson = departed.id.clone();
        match outline.next_coord(self.current) {
            Some(next) => Ok(Advance {
                state: completed.select(next)?,
                completed_lesson,
                moved: true,
            }),
            None => Ok(Advance {
                state: completed,
                completed_lesson,
                moved: false,
            }),
        }
    }

    /// Moves to the previous lesson; a no-op on the first lesson.
    pub fn retreat(&self) -> LearningResult<Self> {
        let outline = self.require_active()?;
        match outline.prev_coord(self.current) {
            Some(prev) => self.select(prev),
            None => Ok(self.clone()),
        }
    }

    pub fn reset(&self) -> Self {
        Self::default()
    }
}
