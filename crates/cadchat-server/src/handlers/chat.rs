//! Streaming chat endpoint
//!
//! `POST /api/v1/sessions/:session_id/chat` answers with `text/event-stream`;
//! each frame is `data: <AgentEvent JSON>`. The stream ends after the
//! terminal frame of the turn.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use cadchat_agent::AgentError;
use cadchat_core::{AgentEvent, Message, Part, Role};
use cadchat_session::validate_session_id;
use futures::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::ApiError;
use crate::state::AppState;

const EVENT_BUFFER: usize = 256;

/// Full conversation as the client sees it; the last entry is the new
/// user message.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub messages: Vec<IncomingMessage>,
}

/// Either a complete message or the `{role, content}` shorthand
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IncomingMessage {
    Shorthand {
        #[serde(default)]
        id: Option<String>,
        role: Role,
        content: String,
    },
    Full(Message),
}

impl From<IncomingMessage> for Message {
    fn from(incoming: IncomingMessage) -> Self {
        match incoming {
            IncomingMessage::Full(message) => message,
            IncomingMessage::Shorthand { id, role, content } => {
                let message = Message::with_parts(role, vec![Part::text(content)]);
                match id {
                    Some(id) => message.with_id(id),
                    None => message,
                }
            }
        }
    }
}

pub async fn chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    validate_session_id(&session_id)?;
    let Json(body) = payload?;
    if body.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".to_string()));
    }
    let posted: Vec<Message> = body.messages.into_iter().map(Message::from).collect();

    let (event_tx, mut event_rx) = mpsc::channel(EVENT_BUFFER);
    let cancel_token = CancellationToken::new();
    // Dropping the response stream (client gone) cancels the turn
    let disconnect = cancel_token.clone().drop_guard();

    tokio::spawn(run_session_turn(state, session_id, posted, event_tx, cancel_token));

    let stream = async_stream::stream! {
        let _disconnect = disconnect;
        while let Some(event) = event_rx.recv().await {
            yield Event::default().json_data(&event);
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Wait for the session slot, then run the turn. Requests for a busy
/// session queue here in arrival order.
async fn run_session_turn(
    state: AppState,
    session_id: String,
    posted: Vec<Message>,
    event_tx: mpsc::Sender<AgentEvent>,
    cancel_token: CancellationToken,
) {
    let acquired = tokio::select! {
        _ = cancel_token.cancelled() => {
            debug!(%session_id, "client left while waiting for the session");
            return;
        }
        acquired = state.registry.acquire(&session_id) => acquired,
    };

    let mut guard = match acquired {
        Ok(guard) => guard,
        Err(e) => {
            let err = AgentError::from(e);
            error!(%session_id, "cannot open session: {}", err);
            if event_tx
                .send(AgentEvent::error(err.to_string(), Some(err.code())))
                .await
                .is_err()
            {
                debug!(%session_id, "client left before the session error was sent");
            }
            return;
        }
    };

    state
        .active_turns
        .insert(session_id.clone(), cancel_token.clone());
    let result = state
        .orchestrator
        .run_chat(&mut guard, posted, event_tx, cancel_token)
        .await;
    state.active_turns.remove(&session_id);

    match result {
        Ok(outcome) => info!(%session_id, ?outcome, "turn finished"),
        Err(e) => error!(%session_id, "turn aborted: {}", e),
    }
}
