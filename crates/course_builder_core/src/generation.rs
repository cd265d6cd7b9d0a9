//! crates/course_builder_core/src/generation.rs
//!
//! Runs lesson generation streams in the background and keeps a registry of the
//! ones in flight.
//!
//! Generations are keyed by coordinate. A repeat request for a lesson that is
//! already streaming attaches to the running generation instead of opening a
//! second stream, and every generation carries a `CancellationToken` so that
//! navigating away releases the stream promptly.

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::accumulator::ContentAccumulator;
use crate::domain::{LessonCoord, LessonRequest};
use crate::ports::{DatabaseService, LessonGenerationService};
use crate::stream::{decode_stream, DecoderConfig};

/// The observable state of one lesson generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationUpdate {
    Pending,
    /// The full content accumulated so far.
    Partial(String),
    Finished(String),
    Failed(String),
    Cancelled,
}

impl GenerationUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationUpdate::Finished(_) | GenerationUpdate::Failed(_) | GenerationUpdate::Cancelled
        )
    }
}

/// A subscription to a running (or just finished) generation.
#[derive(Debug)]
pub struct GenerationHandle {
    pub coord: LessonCoord,
    pub lesson_id: String,
    /// Registry id of the underlying stream; unique per `LessonGenerator`.
    pub generation_id: u64,
    shared: bool,
    updates: watch::Receiver<GenerationUpdate>,
}

impl GenerationHandle {
    /// True when this handle attached to a generation another caller started.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn latest(&self) -> GenerationUpdate {
        self.updates.borrow().clone()
    }

    /// Follows the generation to its end, reporting each partial value seen.
    ///
    /// Intermediate values may be coalesced when the observer falls behind;
    /// each partial value is the complete text so far, so nothing is lost.
    pub async fn wait(mut self, mut on_partial: impl FnMut(&str)) -> GenerationUpdate {
        loop {
            let update = self.updates.borrow_and_update().clone();
            match update {
                GenerationUpdate::Pending => {}
                GenerationUpdate::Partial(ref content) => on_partial(content),
                terminal => return terminal,
            }
            if self.updates.changed().await.is_err() {
                let last = self.updates.borrow().clone();
                return if last.is_terminal() {
                    last
                } else {
                    GenerationUpdate::Failed("generation ended without a result".to_string())
                };
            }
        }
    }
}

struct InFlight {
    id: u64,
    lesson_id: String,
    updates: watch::Receiver<GenerationUpdate>,
    cancel: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<LessonCoord, InFlight>>>;

/// Starts, deduplicates and cancels lesson generation streams.
pub struct LessonGenerator {
    service: Arc<dyn LessonGenerationService>,
    db: Arc<dyn DatabaseService>,
    config: DecoderConfig,
    in_flight: Registry,
    next_id: AtomicU64,
}

impl LessonGenerator {
    pub fn new(
        service: Arc<dyn LessonGenerationService>,
        db: Arc<dyn DatabaseService>,
        config: DecoderConfig,
    ) -> Self {
        Self {
            service,
            db,
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Starts generating the lesson at `coord`, or attaches to the running generation.
    pub async fn generate(&self, coord: LessonCoord, request: LessonRequest) -> GenerationHandle {
        let mut in_flight = self.in_flight.lock().await;

        if let Some(existing) = in_flight.get(&coord) {
            if existing.lesson_id == request.lesson_id && !existing.cancel.is_cancelled() {
                info!(%coord, lesson_id = %request.lesson_id, "Attaching to in-flight lesson generation");
                return GenerationHandle {
                    coord,
                    lesson_id: request.lesson_id,
                    generation_id: existing.id,
                    shared: true,
                    updates: existing.updates.clone(),
                };
            }
            existing.cancel.cancel();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(GenerationUpdate::Pending);
        let cancel = CancellationToken::new();
        in_flight.insert(
            coord,
            InFlight {
                id,
                lesson_id: request.lesson_id.clone(),
                updates: rx.clone(),
                cancel: cancel.clone(),
            },
        );
        drop(in_flight);

        info!(%coord, lesson_id = %request.lesson_id, "Starting lesson generation");
        let handle = GenerationHandle {
            coord,
            lesson_id: request.lesson_id.clone(),
            generation_id: id,
            shared: false,
            updates: rx,
        };

        let task = GenerationTask {
            id,
            coord,
            request,
            service: self.service.clone(),
            db: self.db.clone(),
            config: self.config,
            in_flight: self.in_flight.clone(),
        };
        tokio::spawn(task.run(tx, cancel));

        handle
    }

    /// Cancels every in-flight generation except the one at `keep`.
    pub async fn cancel_except(&self, keep: LessonCoord) {
        let in_flight = self.in_flight.lock().await;
        for (coord, entry) in in_flight.iter() {
            if *coord != keep && !entry.cancel.is_cancelled() {
                info!(%coord, "Cancelling lesson generation after navigation");
                entry.cancel.cancel();
            }
        }
    }

    pub async fn cancel_all(&self) {
        let in_flight = self.in_flight.lock().await;
        for entry in in_flight.values() {
            entry.cancel.cancel();
        }
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

struct GenerationTask {
    id: u64,
    coord: LessonCoord,
    request: LessonRequest,
    service: Arc<dyn LessonGenerationService>,
    db: Arc<dyn DatabaseService>,
    config: DecoderConfig,
    in_flight: Registry,
}

impl GenerationTask {
    async fn run(self, tx: watch::Sender<GenerationUpdate>, cancel: CancellationToken) {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => GenerationUpdate::Cancelled,
            outcome = self.stream_content(&tx) => outcome,
        };

        match &outcome {
            GenerationUpdate::Finished(content) => {
                info!(coord = %self.coord, chars = content.len(), "Lesson generation finished")
            }
            GenerationUpdate::Failed(reason) => {
                warn!(coord = %self.coord, %reason, "Lesson generation failed")
            }
            GenerationUpdate::Cancelled => info!(coord = %self.coord, "Lesson generation cancelled"),
            _ => {}
        }
        tx.send_replace(outcome.clone());

        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.get(&self.coord).is_some_and(|entry| entry.id == self.id) {
                in_flight.remove(&self.coord);
            }
        }

        if let GenerationUpdate::Finished(content) = outcome {
            if let Err(e) = self
                .db
                .save_lesson_content(&self.request.lesson_id, &content)
                .await
            {
                error!(
                    lesson_id = %self.request.lesson_id,
                    "Failed to persist lesson content: {}", e
                );
            }
        }
    }

    async fn stream_content(&self, tx: &watch::Sender<GenerationUpdate>) -> GenerationUpdate {
        let bytes = match self.service.stream_lesson(&self.request).await {
            Ok(bytes) => bytes,
            Err(e) => return GenerationUpdate::Failed(e.to_string()),
        };

        let deltas = decode_stream(bytes, self.config);
        futures::pin_mut!(deltas);

        let mut accumulator = ContentAccumulator::new();
        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(delta) => {
                    let content = accumulator.push(&delta);
                    tx.send_replace(GenerationUpdate::Partial(content.to_string()));
                }
                Err(e) => return GenerationUpdate::Failed(e.to_string()),
            }
        }

        if accumulator.is_empty() {
            return GenerationUpdate::Failed("lesson stream carried no content".to_string());
        }
        GenerationUpdate::Finished(accumulator.into_content())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eventually, sse_body, FakeLessons, MemoryStore};
    use bytes::Bytes;

    fn request(lesson_id: &str) -> LessonRequest {
        LessonRequest {
            topic: "rust".to_string(),
            module_title: "Basics".to_string(),
            lesson_title: "Ownership".to_string(),
            lesson_id: lesson_id.to_string(),
        }
    }

    fn generator(lessons: Arc<FakeLessons>, store: Arc<MemoryStore>) -> LessonGenerator {
        LessonGenerator::new(lessons, store, DecoderConfig::default())
    }

    #[tokio::test]
    async fn streams_partials_and_persists_final_content() {
        let body = sse_body(&["Own", "ership"]);
        let (a, b) = body.split_at(body.len() / 2);
        let lessons = Arc::new(FakeLessons::new().with_body("l1", vec![a.into(), b.into()]));
        let store = Arc::new(MemoryStore::new());
        let generator = generator(lessons.clone(), store.clone());

        let handle = generator.generate(LessonCoord::START, request("l1")).await;
        let mut partials = Vec::new();
        let outcome = handle.wait(|content| partials.push(content.to_string())).await;

        assert_eq!(outcome, GenerationUpdate::Finished("Ownership".to_string()));
        assert!(partials.iter().all(|p| "Ownership".starts_with(p.as_str())));
        assert!(eventually(|| store.content_of("l1").as_deref() == Some("Ownership")).await);
    }

    #[tokio::test]
    async fn repeat_request_attaches_to_running_stream() {
        let lessons = Arc::new(FakeLessons::new());
        let store = Arc::new(MemoryStore::new());
        let generator = generator(lessons.clone(), store);

        let first = generator.generate(LessonCoord::START, request("l1")).await;
        let second = generator.generate(LessonCoord::START, request("l1")).await;
        assert!(!first.is_shared());
        assert!(second.is_shared());
        assert_eq!(first.generation_id, second.generation_id);

        assert!(eventually(|| lessons.gate(0).is_some()).await);
        let gate = lessons.gate(0).unwrap();
        gate.unbounded_send(Ok(Bytes::from(sse_body(&["shared"])))).unwrap();
        gate.close_channel();

        let (a, b) = tokio::join!(first.wait(|_| {}), second.wait(|_| {}));
        assert_eq!(a, GenerationUpdate::Finished("shared".to_string()));
        assert_eq!(b, a);
        assert_eq!(lessons.call_count(), 1);
        assert!(eventually(|| generator_is_idle(&generator)).await);
    }

    fn generator_is_idle(generator: &LessonGenerator) -> bool {
        generator
            .in_flight
            .try_lock()
            .map(|map| map.is_empty())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn navigating_away_cancels_the_stream() {
        let lessons = Arc::new(FakeLessons::new());
        let generator = generator(lessons.clone(), Arc::new(MemoryStore::new()));

        let handle = generator.generate(LessonCoord::START, request("l1")).await;
        generator.cancel_except(LessonCoord::new(0, 1)).await;

        assert_eq!(handle.wait(|_| {}).await, GenerationUpdate::Cancelled);
        assert!(eventually(|| generator_is_idle(&generator)).await);
    }

    #[tokio::test]
    async fn cancel_except_keeps_the_target() {
        let lessons = Arc::new(FakeLessons::new());
        let generator = generator(lessons.clone(), Arc::new(MemoryStore::new()));

        let kept = generator.generate(LessonCoord::START, request("l1")).await;
        generator.cancel_except(LessonCoord::START).await;
        assert_eq!(generator.in_flight_count().await, 1);
        assert_eq!(kept.latest(), GenerationUpdate::Pending);
        generator.cancel_all().await;
        assert_eq!(kept.wait(|_| {}).await, GenerationUpdate::Cancelled);
    }

    #[tokio::test]
    async fn service_error_fails_generation_without_persisting() {
        let lessons = Arc::new(FakeLessons::new());
        lessons.fail.store(true, Ordering::SeqCst);
        let store = Arc::new(MemoryStore::new());
        let generator = generator(lessons, store.clone());

        let outcome = generator
            .generate(LessonCoord::START, request("l1"))
            .await
            .wait(|_| {})
            .await;

        assert!(matches!(outcome, GenerationUpdate::Failed(_)));
        assert!(store.content_of("l1").is_none());
    }

    #[tokio::test]
    async fn empty_stream_is_a_failure() {
        let lessons = Arc::new(FakeLessons::new().with_body("l1", vec![sse_body(&[])]));
        let generator = generator(lessons, Arc::new(MemoryStore::new()));

        let outcome = generator
            .generate(LessonCoord::START, request("l1"))
            .await
            .wait(|_| {})
            .await;
        assert!(matches!(outcome, GenerationUpdate::Failed(_)));
    }

    #[tokio::test]
    async fn different_lesson_at_same_coord_replaces_stale_entry() {
        let lessons = Arc::new(FakeLessons::new());
        let generator = generator(lessons.clone(), Arc::new(MemoryStore::new()));

        let stale = generator.generate(LessonCoord::START, request("old")).await;
        let fresh = generator.generate(LessonCoord::START, request("new")).await;

        assert!(!fresh.is_shared());
        assert_ne!(stale.generation_id, fresh.generation_id);
        assert_eq!(stale.wait(|_| {}).await, GenerationUpdate::Cancelled);
        assert!(eventually(|| {
            lessons
                .requests
                .lock()
                .unwrap()
                .iter()
                .any(|r| r.lesson_id == "new")
        })
        .await);
    }
}
