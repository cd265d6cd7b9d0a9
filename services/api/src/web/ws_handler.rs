//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! The loop owns the learner's `LearningState`; client messages and generation
//! updates are both applied here, one at a time.

use crate::web::{
    protocol::{ClientMessage, ProgressView, ServerMessage},
    state::{AppState, SessionState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use course_builder_core::{
    GenerationHandle, GenerationUpdate, LearningResult, LearningState, LessonCoord,
    LessonSelection,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::{
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// An update relayed from a running lesson generation into the connection loop.
///
/// `generation_id` names the stream the update came from; only the stream the
/// learner's view is bound to may change what the learner sees.
#[derive(Debug)]
pub enum GenerationEvent {
    Partial {
        coord: LessonCoord,
        generation_id: u64,
        content: String,
    },
    Done {
        coord: LessonCoord,
        lesson_id: String,
        generation_id: u64,
        update: GenerationUpdate,
    },
}

type EventSender = UnboundedSender<GenerationEvent>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!(%user_id, "New WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<GenerationEvent>();
    let mut session = SessionState::new(&app_state, user_id);

    loop {
        let replies = tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => {
                        debug!(?msg, "Client message received");
                        handle_client_message(&mut session, msg, &events_tx).await
                    }
                    Err(e) => {
                        warn!("Failed to parse client message: {}", e);
                        vec![ServerMessage::Error {
                            message: format!("Unrecognised message: {}", e),
                        }]
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            },
            Some(event) = events_rx.recv() => handle_generation_event(&mut session, event),
        };

        if !send_all(&mut sender, replies).await {
            break;
        }
    }

    // --- Cleanup ---
    session.abort_followers();
    session.learning_session.generator().cancel_all().await;
    info!(%user_id, "WebSocket connection closed");
}

async fn send_all(sender: &mut SplitSink<WebSocket, Message>, messages: Vec<ServerMessage>) -> bool {
    for msg in messages {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize server message: {}", e);
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            warn!("Client went away while sending");
            return false;
        }
    }
    true
}

//=========================================================================================
// Client Messages
//=========================================================================================

/// Applies one client message and returns the replies to send, in order.
pub async fn handle_client_message(
    session: &mut SessionState,
    msg: ClientMessage,
    events: &EventSender,
) -> Vec<ServerMessage> {
    match dispatch(session, msg, events).await {
        Ok(replies) => replies,
        Err(e) => {
            warn!(user_id = %session.user_id, "Request rejected: {}", e);
            vec![ServerMessage::Error {
                message: e.to_string(),
            }]
        }
    }
}

async fn dispatch(
    session: &mut SessionState,
    msg: ClientMessage,
    events: &EventSender,
) -> LearningResult<Vec<ServerMessage>> {
    match msg {
        ClientMessage::GenerateOutline { topic } => {
            session.learning = session
                .learning_session
                .generate_outline(&session.learning, &topic)
                .await?;
            Ok(outline_proposed(&session.learning).into_iter().collect())
        }
        ClientMessage::ApproveOutline => {
            session.learning = session
                .learning_session
                .approve_outline(&session.learning, session.user_id)
                .await?;
            open_current_lesson(session, events).await
        }
        ClientMessage::LoadPlan { plan_id } => {
            session.learning = session
                .learning_session
                .load_saved_plan(session.user_id, plan_id)
                .await?;
            open_current_lesson(session, events).await
        }
        ClientMessage::SelectLesson {
            module_index,
            lesson_index,
        } => {
            let coord = LessonCoord::new(module_index, lesson_index);
            let selection = session
                .learning_session
                .select_lesson(&session.learning, coord)
                .await?;
            Ok(apply_selection(session, selection, events))
        }
        ClientMessage::NextLesson => {
            let before = session.learning.current();
            let selection = session.learning_session.advance(&session.learning).await?;
            let mut replies = if selection.state().current() == before {
                session.learning = selection.into_parts().0;
                Vec::new()
            } else {
                apply_selection(session, selection, events)
            };
            replies.push(ServerMessage::Progress(ProgressView::of(&session.learning)));
            if session.learning.course_complete() {
                replies.push(ServerMessage::CourseComplete);
            }
            Ok(replies)
        }
        ClientMessage::PreviousLesson => {
            let before = session.learning.current();
            let selection = session.learning_session.retreat(&session.learning).await?;
            if selection.state().current() == before {
                return Ok(Vec::new());
            }
            Ok(apply_selection(session, selection, events))
        }
        ClientMessage::Reset => {
            session.abort_followers();
            session.learning = session.learning_session.reset(&session.learning).await;
            Ok(vec![ServerMessage::Reset])
        }
    }
}

/// Announces the active plan and opens the lesson the learner stands on.
async fn open_current_lesson(
    session: &mut SessionState,
    events: &EventSender,
) -> LearningResult<Vec<ServerMessage>> {
    let mut replies = Vec::new();
    if let (Some(plan_id), Some(outline)) = (session.learning.plan_id(), session.learning.outline()) {
        replies.push(ServerMessage::PlanActivated {
            plan_id,
            topic: session.learning.topic().to_string(),
            outline: outline.clone(),
            progress: ProgressView::of(&session.learning),
        });
    }
    let coord = session.learning.current();
    let selection = session
        .learning_session
        .select_lesson(&session.learning, coord)
        .await?;
    replies.extend(apply_selection(session, selection, events));
    Ok(replies)
}

fn apply_selection(
    session: &mut SessionState,
    selection: LessonSelection,
    events: &EventSender,
) -> Vec<ServerMessage> {
    let (state, generation) = selection.into_parts();
    session.learning = state;

    let replies = lesson_started(&session.learning).into_iter().collect();
    if let Some(handle) = generation {
        // An attached handle means a relay for this generation is already running.
        if !handle.is_shared() {
            session.prune_followers();
            session.followers.push(follow(handle, events.clone()));
        }
    }
    replies
}

fn outline_proposed(state: &LearningState) -> Option<ServerMessage> {
    let outline = state.outline()?;
    Some(ServerMessage::OutlineProposed {
        topic: state.topic().to_string(),
        outline: outline.clone(),
        total_lessons: outline.total_lessons(),
        total_minutes: outline.total_minutes(),
    })
}

fn lesson_started(state: &LearningState) -> Option<ServerMessage> {
    let outline = state.outline()?;
    let lesson = state.current_lesson()?;
    let coord = state.current();
    Some(ServerMessage::LessonStarted {
        coord,
        lesson_id: lesson.id.clone(),
        step: outline.step_number(coord)?,
        total_steps: outline.total_lessons(),
        cached: !state.is_generating(),
        content: state.current_content().to_string(),
    })
}

//=========================================================================================
// Generation Events
//=========================================================================================

/// Spawns a task relaying a generation's updates into the connection loop.
fn follow(handle: GenerationHandle, events: EventSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        let coord = handle.coord;
        let lesson_id = handle.lesson_id.clone();
        let generation_id = handle.generation_id;
        let partial_events = events.clone();

        let update = handle
            .wait(|content| {
                let _ = partial_events.send(GenerationEvent::Partial {
                    coord,
                    generation_id,
                    content: content.to_string(),
                });
            })
            .await;
        let _ = events.send(GenerationEvent::Done {
            coord,
            lesson_id,
            generation_id,
            update,
        });
    })
}

/// Folds a generation update into the learner's state.
///
/// Finished content is kept for its lesson whichever stream produced it; the
/// view only follows the stream it is bound to.
pub fn handle_generation_event(
    session: &mut SessionState,
    event: GenerationEvent,
) -> Vec<ServerMessage> {
    match event {
        GenerationEvent::Partial {
            coord,
            generation_id,
            content,
        } => {
            if session.learning.active_generation() != Some(generation_id) {
                return Vec::new();
            }
            session.learning = session.learning.apply_partial(generation_id, &content);
            vec![ServerMessage::LessonDelta { coord, content }]
        }
        GenerationEvent::Done {
            coord,
            lesson_id,
            generation_id,
            update,
        } => {
            let current = session.learning.active_generation() == Some(generation_id);
            match update {
                GenerationUpdate::Finished(content) => {
                    session.learning =
                        session
                            .learning
                            .commit_content(coord, &lesson_id, generation_id, &content);
                    if current {
                        vec![ServerMessage::LessonReady { coord, content }]
                    } else {
                        Vec::new()
                    }
                }
                GenerationUpdate::Failed(message) if current => {
                    session.learning = session.learning.fail_generation(generation_id);
                    vec![ServerMessage::LessonFailed { coord, message }]
                }
                GenerationUpdate::Cancelled if current => {
                    session.learning = session.learning.fail_generation(generation_id);
                    Vec::new()
                }
                _ => Vec::new(),
            }
        }
    }
}
