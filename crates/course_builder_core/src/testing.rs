//! In-memory fixtures and port fakes shared by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::channel::mpsc;
use futures::stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    Lesson, LessonRequest, LoadedPlan, Module, Outline, PersistedOutline, SavedPlan,
};
use crate::ports::{
    ByteStream, DatabaseService, LessonGenerationService, OutlineGenerationService, PortError,
    PortResult,
};

/// Builds an outline with `counts[i]` lessons in module `i`.
///
/// Module ids are `m{i}`, lesson ids `m{i}-l{j}`, every lesson is 10 minutes.
pub fn outline_with_lessons(counts: &[usize]) -> Outline {
    Outline {
        title: "Learning Rust".to_string(),
        description: "From ownership to async".to_string(),
        modules: counts
            .iter()
            .enumerate()
            .map(|(i, &count)| {
                Arc::new(Module {
                    id: format!("m{i}"),
                    title: format!("Module {i}"),
                    description: String::new(),
                    lessons: (0..count)
                        .map(|j| {
                            Arc::new(Lesson {
                                id: format!("m{i}-l{j}"),
                                title: format!("Lesson {i}.{j}"),
                                estimated_minutes: 10,
                                content: None,
                                completed: false,
                            })
                        })
                        .collect(),
                })
            })
            .collect(),
    }
}

/// Frames `parts` as a complete streamed lesson response.
pub fn sse_body(parts: &[&str]) -> String {
    let mut body = String::new();
    for part in parts {
        body.push_str(&format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [{ "delta": { "content": part } }] })
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Polls `check` until it holds or roughly a second has passed.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

//=========================================================================================
// Outline generation
//=========================================================================================

pub struct FakeOutlines {
    pub result: Mutex<PortResult<Outline>>,
}

impl FakeOutlines {
    pub fn returning(outline: Outline) -> Self {
        Self {
            result: Mutex::new(Ok(outline)),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Mutex::new(Err(PortError::Unexpected(message.to_string()))),
        }
    }
}

#[async_trait]
impl OutlineGenerationService for FakeOutlines {
    async fn generate_outline(&self, _topic: &str) -> PortResult<Outline> {
        self.result.lock().unwrap().clone()
    }
}

//=========================================================================================
// Lesson generation
//=========================================================================================

/// Serves scripted bodies, or hands out channel-backed streams the test drives.
#[derive(Default)]
pub struct FakeLessons {
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<LessonRequest>>,
    bodies: Mutex<HashMap<String, Vec<String>>>,
    gated: Mutex<Vec<mpsc::UnboundedSender<PortResult<Bytes>>>>,
    pub fail: AtomicBool,
}

impl FakeLessons {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the chunks served for `lesson_id`.
    pub fn with_body(self, lesson_id: &str, chunks: Vec<String>) -> Self {
        self.bodies
            .lock()
            .unwrap()
            .insert(lesson_id.to_string(), chunks);
        self
    }

    /// Sender feeding the `index`-th gated stream opened so far.
    pub fn gate(&self, index: usize) -> Option<mpsc::UnboundedSender<PortResult<Bytes>>> {
        self.gated.lock().unwrap().get(index).cloned()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LessonGenerationService for FakeLessons {
    async fn stream_lesson(&self, request: &LessonRequest) -> PortResult<ByteStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("generation service unavailable".to_string()));
        }

        if let Some(chunks) = self.bodies.lock().unwrap().get(&request.lesson_id) {
            let items: Vec<PortResult<Bytes>> = chunks
                .iter()
                .map(|chunk| Ok(Bytes::from(chunk.clone())))
                .collect();
            return Ok(Box::pin(stream::iter(items)));
        }

        let (tx, rx) = mpsc::unbounded();
        self.gated.lock().unwrap().push(tx);
        Ok(Box::pin(rx))
    }
}

//=========================================================================================
// Persistence
//=========================================================================================

struct StoredPlan {
    user_id: Uuid,
    summary: SavedPlan,
    outline: Outline,
}

#[derive(Default)]
pub struct MemoryStore {
    plans: Mutex<HashMap<Uuid, StoredPlan>>,
    pub completed: Mutex<Vec<String>>,
    pub contents: Mutex<HashMap<String, String>>,
    pub fail_plan_writes: AtomicBool,
    pub fail_lesson_writes: AtomicBool,
    /// Lesson writes refused while `fail_lesson_writes` was set.
    pub rejected_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_plan(&self, user_id: Uuid, topic: &str, outline: Outline) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let summary = SavedPlan {
            id,
            topic: topic.to_string(),
            title: outline.title.clone(),
            description: Some(outline.description.clone()),
            created_at: now,
            updated_at: now,
        };
        self.plans.lock().unwrap().insert(
            id,
            StoredPlan {
                user_id,
                summary,
                outline,
            },
        );
        id
    }

    pub fn completed_ids(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn content_of(&self, lesson_id: &str) -> Option<String> {
        self.contents.lock().unwrap().get(lesson_id).cloned()
    }
}

#[async_trait]
impl DatabaseService for MemoryStore {
    async fn save_plan(
        &self,
        user_id: Uuid,
        topic: &str,
        outline: &Outline,
    ) -> PortResult<PersistedOutline> {
        if self.fail_plan_writes.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("database unavailable".to_string()));
        }
        let stored = Outline {
            title: outline.title.clone(),
            description: outline.description.clone(),
            modules: outline
                .modules
                .iter()
                .map(|module| {
                    Arc::new(Module {
                        id: format!("db-{}", module.id),
                        title: module.title.clone(),
                        description: module.description.clone(),
                        lessons: module
                            .lessons
                            .iter()
                            .map(|lesson| {
                                Arc::new(Lesson {
                                    id: format!("db-{}", lesson.id),
                                    ..Lesson::clone(lesson)
                                })
                            })
                            .collect(),
                    })
                })
                .collect(),
        };
        let plan_id = self.insert_plan(user_id, topic, stored.clone());
        Ok(PersistedOutline {
            plan_id,
            outline: stored,
        })
    }

    async fn load_plan(&self, user_id: Uuid, plan_id: Uuid) -> PortResult<LoadedPlan> {
        let plans = self.plans.lock().unwrap();
        let plan = plans
            .get(&plan_id)
            .filter(|plan| plan.user_id == user_id)
            .ok_or_else(|| PortError::NotFound(format!("Plan {} not found", plan_id)))?;
        Ok(LoadedPlan {
            plan_id,
            topic: plan.summary.topic.clone(),
            outline: plan.outline.clone(),
        })
    }

    async fn delete_plan(&self, user_id: Uuid, plan_id: Uuid) -> PortResult<()> {
        let mut plans = self.plans.lock().unwrap();
        if !plans.get(&plan_id).is_some_and(|plan| plan.user_id == user_id) {
            return Err(PortError::NotFound(format!("Plan {} not found", plan_id)));
        }
        plans.remove(&plan_id);
        Ok(())
    }

    async fn list_plans(&self, user_id: Uuid) -> PortResult<Vec<SavedPlan>> {
        let mut plans: Vec<SavedPlan> = self
            .plans
            .lock()
            .unwrap()
            .values()
            .filter(|plan| plan.user_id == user_id)
            .map(|plan| plan.summary.clone())
            .collect();
        plans.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(plans)
    }

    async fn mark_lesson_complete(&self, lesson_id: &str) -> PortResult<()> {
        if self.fail_lesson_writes.load(Ordering::SeqCst) {
            self.rejected_writes.fetch_add(1, Ordering::SeqCst);
            return Err(PortError::Unexpected("database unavailable".to_string()));
        }
        self.completed.lock().unwrap().push(lesson_id.to_string());
        Ok(())
    }

    async fn save_lesson_content(&self, lesson_id: &str, content: &str) -> PortResult<()> {
        if self.fail_lesson_writes.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("database unavailable".to_string()));
        }
        self.contents
            .lock()
            .unwrap()
            .insert(lesson_id.to_string(), content.to_string());
        Ok(())
    }
}
