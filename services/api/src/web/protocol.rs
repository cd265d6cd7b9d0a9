//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for an interactive learning session.

use course_builder_core::{LearningState, LessonCoord, Outline};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Asks for a new outline on a topic. The outline is proposed, not saved.
    GenerateOutline { topic: String },

    /// Commits the proposed outline, saving it and opening it for learning.
    ApproveOutline,

    /// Opens a previously saved plan.
    LoadPlan { plan_id: Uuid },

    /// Moves to a lesson, generating its content when it has none yet.
    SelectLesson {
        module_index: usize,
        lesson_index: usize,
    },

    /// Completes the current lesson and moves to the next one.
    NextLesson,

    PreviousLesson,

    /// Discards the current plan from the session (the saved copy is kept).
    Reset,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Completion figures sent after every change in progress.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProgressView {
    pub completed_lessons: Vec<String>,
    pub total_lessons: usize,
    pub percent: f64,
}

impl ProgressView {
    pub fn of(state: &LearningState) -> Self {
        Self {
            completed_lessons: state.completed_lessons().iter().cloned().collect(),
            total_lessons: state.outline().map_or(0, |o| o.total_lessons()),
            percent: state.progress(),
        }
    }
}

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A freshly generated outline awaiting the learner's approval.
    OutlineProposed {
        topic: String,
        outline: Arc<Outline>,
        total_lessons: usize,
        total_minutes: u64,
    },

    /// The plan is saved (or was loaded) and lessons may now be opened.
    PlanActivated {
        plan_id: Uuid,
        topic: String,
        outline: Arc<Outline>,
        progress: ProgressView,
    },

    /// The learner is now on a lesson. `content` is complete when `cached`.
    LessonStarted {
        coord: LessonCoord,
        lesson_id: String,
        step: usize,
        total_steps: usize,
        cached: bool,
        content: String,
    },

    /// The full lesson content generated so far.
    LessonDelta { coord: LessonCoord, content: String },

    /// Generation finished; `content` is final.
    LessonReady { coord: LessonCoord, content: String },

    LessonFailed { coord: LessonCoord, message: String },

    Progress(ProgressView),

    /// The learner completed the final lesson.
    CourseComplete,

    Reset,

    /// Reports an error to the client, which should display an error message.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_messages() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"select_lesson","module_index":1,"lesson_index":0}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::SelectLesson {
                module_index: 1,
                lesson_index: 0
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"generate_outline","topic":"Rust"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::GenerateOutline {
                topic: "Rust".to_string()
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"next_lesson"}"#).unwrap();
        assert_eq!(msg, ClientMessage::NextLesson);
    }

    #[test]
    fn tags_server_messages() {
        let json = serde_json::to_value(ServerMessage::LessonDelta {
            coord: LessonCoord::new(0, 2),
            content: "Hello".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "lesson_delta");
        assert_eq!(json["coord"]["lesson_index"], 2);

        let json = serde_json::to_value(ServerMessage::Progress(ProgressView {
            completed_lessons: vec!["a".to_string()],
            total_lessons: 4,
            percent: 25.0,
        }))
        .unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["percent"], 25.0);
    }
}
