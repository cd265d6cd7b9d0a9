//! crates/course_builder_core/src/domain.rs
//!
//! Defines the core data structures for the application: the curriculum tree
//! (outline, modules, lessons), saved plan summaries and the request shapes
//! handed to the generation ports.
//!
//! Tree nodes are held behind `Arc` so that updating one lesson produces a new
//! outline sharing every untouched node with the previous one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// An atomic unit of content within a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub title: String,
    pub estimated_minutes: u32,
    /// Absent until the lesson body has been generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

impl Lesson {
    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }
}

/// A named group of ordered lessons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub lessons: Vec<Arc<Lesson>>,
}

/// The root of the curriculum tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outline {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub modules: Vec<Arc<Module>>,
}

/// A (module, lesson) position within an outline.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LessonCoord {
    pub module_index: usize,
    pub lesson_index: usize,
}

impl LessonCoord {
    pub const START: LessonCoord = LessonCoord::new(0, 0);

    pub const fn new(module_index: usize, lesson_index: usize) -> Self {
        Self {
            module_index,
            lesson_index,
        }
    }
}

impl std::fmt::Display for LessonCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.module_index, self.lesson_index)
    }
}

/// One entry of the linear lesson ordering produced by `Outline::flatten`.
#[derive(Debug, Clone)]
pub struct FlatLesson {
    pub coord: LessonCoord,
    pub lesson: Arc<Lesson>,
    pub module: Arc<Module>,
}

/// A lightweight summary of a persisted outline, used by plan pickers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPlan {
    pub id: Uuid,
    pub topic: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A plan rehydrated from storage, with content and completion flags per lesson.
#[derive(Debug, Clone)]
pub struct LoadedPlan {
    pub plan_id: Uuid,
    pub topic: String,
    pub outline: Outline,
}

/// The result of persisting a freshly approved outline.
///
/// Module and lesson ids are the ones assigned by the store, so later
/// per-lesson writes address the stored rows.
#[derive(Debug, Clone)]
pub struct PersistedOutline {
    pub plan_id: Uuid,
    pub outline: Outline,
}

/// The request body sent to the lesson generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonRequest {
    pub topic: String,
    pub module_title: String,
    pub lesson_title: String,
    pub lesson_id: String,
}
