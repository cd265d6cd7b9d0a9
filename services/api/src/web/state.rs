//! services/api/src/web/state.rs
//!
//! Defines the application's shared and session-specific states.

use crate::config::Config;
use course_builder_core::{
    ports::{DatabaseService, LessonGenerationService, OutlineGenerationService},
    LearningSession, LearningState,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub outline_adapter: Arc<dyn OutlineGenerationService>,
    pub lesson_adapter: Arc<dyn LessonGenerationService>,
}

//=========================================================================================
// SessionState (Specific to One WebSocket Connection)
//=========================================================================================

/// The state for a single, active WebSocket connection.
///
/// Each connection owns its `LearningSession`, so in-flight lesson generations
/// are keyed per learner and die with the socket.
pub struct SessionState {
    pub user_id: Uuid,
    pub learning: LearningState,
    pub learning_session: LearningSession,
    /// Tasks relaying generation updates back into the connection loop.
    pub followers: Vec<JoinHandle<()>>,
}

impl SessionState {
    pub fn new(app_state: &AppState, user_id: Uuid) -> Self {
        Self {
            user_id,
            learning: LearningState::new(),
            learning_session: LearningSession::new(
                app_state.outline_adapter.clone(),
                app_state.lesson_adapter.clone(),
                app_state.db.clone(),
                app_state.config.decoder,
            ),
            followers: Vec::new(),
        }
    }

    /// Drops finished relay tasks.
    pub fn prune_followers(&mut self) {
        self.followers.retain(|task| !task.is_finished());
    }

    pub fn abort_followers(&mut self) {
        for task in self.followers.drain(..) {
            task.abort();
        }
    }
}
