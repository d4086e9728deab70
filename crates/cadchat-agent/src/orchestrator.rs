use std::collections::BTreeMap;
use std::sync::Arc;

use cadchat_core::chat::ChatRequest;
use cadchat_core::conversation::{call_ids, reconcile};
use cadchat_core::{
    AgentEvent, DocumentTracker, Message, Part, TokenUsage, ToolCallRequest, ToolCallResult, TurnMachine,
    TurnState,
};
use cadchat_llm::LLMProvider;
use cadchat_session::TurnGuard;
use cadchat_tool::ToolExecutor;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::accumulator::ResponseAccumulator;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::projection::project;

/// How a turn ended. Every outcome has already been reported to the client
/// through a terminal frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model finished without pending tool calls
    Completed { rounds: usize },
    /// The posted history was rejected before the turn started
    Rejected,
    /// The turn stopped on a recoverable error
    Failed,
    /// The client cancelled; listed calls never resolved
    Cancelled { unresolved: Vec<String> },
}

enum Generation {
    Done(ResponseAccumulator),
    Cancelled(ResponseAccumulator),
    Failed(ResponseAccumulator, AgentError),
}

enum Dispatch {
    Done(Vec<ToolCallResult>),
    Cancelled {
        completed: Vec<ToolCallResult>,
        unresolved: Vec<String>,
        documents: BTreeMap<String, String>,
    },
}

/// Drives one session turn at a time.
///
/// The tool table is injected at construction; the orchestrator never
/// looks tools up anywhere else.
pub struct Orchestrator {
    provider: Arc<dyn LLMProvider>,
    tools: Arc<dyn ToolExecutor>,
    config: AgentConfig,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn LLMProvider>, tools: Arc<dyn ToolExecutor>, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Reconcile a client-posted history with the stored one, then run a
    /// turn for its last message.
    pub async fn run_chat(
        &self,
        session: &mut TurnGuard,
        posted: Vec<Message>,
        event_tx: mpsc::Sender<AgentEvent>,
        cancel_token: CancellationToken,
    ) -> Result<TurnOutcome> {
        let reconciled = match reconcile(&session.messages, posted) {
            Ok(reconciled) => reconciled,
            Err(e) => {
                warn!(session_id = %session.session_id(), "rejected chat request: {}", e);
                let err = AgentError::from(e);
                emit(&event_tx, AgentEvent::error(err.to_string(), Some(err.code()))).await;
                return Ok(TurnOutcome::Rejected);
            }
        };

        if reconciled.replaced {
            info!(
                session_id = %session.session_id(),
                stored = session.messages.len(),
                posted = reconciled.history.len(),
                "client history replaces stored history"
            );
        }
        session.messages = reconciled.history;
        session.prune_unresolved();
        let pending = session.pending_call_ids();
        session.mark_unresolved(pending);

        self.run_turn(session, reconciled.user_message, event_tx, cancel_token)
            .await
    }

    /// Run one turn: the user message, then model rounds until the model
    /// answers without tool calls.
    ///
    /// Exactly one terminal frame (`complete`, `error` or `cancelled`) is sent
    /// unless the receiver is gone. `Err` is returned only for storage
    /// failures.
    pub async fn run_turn(
        &self,
        session: &mut TurnGuard,
        user_message: Message,
        event_tx: mpsc::Sender<AgentEvent>,
        cancel_token: CancellationToken,
    ) -> Result<TurnOutcome> {
        let span = info_span!("session", session_id = %session.session_id());
        async {
            let result = self
                .drive(session, user_message, &event_tx, &cancel_token)
                .await;
            if let Err(e) = &result {
                error!("turn aborted: {}", e);
                emit(&event_tx, AgentEvent::error(e.to_string(), Some(e.code()))).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        session: &mut TurnGuard,
        user_message: Message,
        event_tx: &mpsc::Sender<AgentEvent>,
        cancel_token: &CancellationToken,
    ) -> Result<TurnOutcome> {
        if session.state != TurnState::AwaitingUserInput {
            warn!(state = %session.state, "session not idle at turn start; normalizing");
            session.normalize();
        }
        let mut machine = TurnMachine::from_state(session.state);

        let unreported = session.take_unreported();
        if !unreported.is_empty() {
            emit(
                event_tx,
                AgentEvent::Unresolved {
                    message: format!(
                        "{} tool call(s) from an earlier turn were cancelled before finishing and will not be retried",
                        unreported.len()
                    ),
                    tool_call_ids: unreported,
                },
            )
            .await;
        }

        let message_id = user_message.id.clone();
        session.push(user_message);
        self.transition(&mut machine, session, TurnState::Generating, event_tx)
            .await?;
        session.persist().await?;
        info!(message_id = %message_id, "turn started");
        emit(
            event_tx,
            AgentEvent::TurnStart {
                session_id: session.session_id().to_string(),
                message_id,
            },
        )
        .await;

        let mut usage = TokenUsage::default();

        for round in 1..=self.config.max_rounds {
            debug!(round, "model round");

            let accumulated = match self.generate(session, event_tx, cancel_token).await {
                Generation::Done(acc) => acc,
                Generation::Cancelled(acc) => {
                    let text = acc.text();
                    if !text.is_empty() {
                        session.push(Message::assistant(vec![Part::text(text)]));
                    }
                    return self
                        .abort_cancelled(&mut machine, session, Vec::new(), BTreeMap::new(), event_tx)
                        .await;
                }
                Generation::Failed(acc, err) => {
                    let text = acc.text();
                    if !text.is_empty() {
                        session.push(Message::assistant(vec![Part::text(text)]));
                    }
                    return self.abort_failed(&mut machine, session, err, event_tx).await;
                }
            };

            let (prompt, completion) = accumulated.usage();
            usage.add(prompt, completion);

            let mut used_ids = call_ids(&session.messages);
            let parts = accumulated.into_parts(&mut used_ids);
            let assistant = Message::assistant(parts);
            let calls: Vec<ToolCallRequest> = assistant.tool_calls().cloned().collect();
            let assistant_id = if assistant.is_empty() {
                None
            } else {
                let id = assistant.id.clone();
                session.push(assistant);
                Some(id)
            };

            if calls.is_empty() {
                self.transition(&mut machine, session, TurnState::Finalized, event_tx)
                    .await?;
                self.transition(&mut machine, session, TurnState::AwaitingUserInput, event_tx)
                    .await?;
                session.persist().await?;
                info!(rounds = round, "turn complete");
                emit(
                    event_tx,
                    AgentEvent::Complete {
                        message_id: assistant_id,
                        usage,
                    },
                )
                .await;
                return Ok(TurnOutcome::Completed { rounds: round });
            }

            self.transition(&mut machine, session, TurnState::ToolPending, event_tx)
                .await?;
            session.persist().await?;
            self.transition(&mut machine, session, TurnState::ToolExecuting, event_tx)
                .await?;

            match self.dispatch(&calls, event_tx, cancel_token).await {
                Dispatch::Done(results) => {
                    session.push(Message::tool_results(results));
                    self.transition(&mut machine, session, TurnState::Generating, event_tx)
                        .await?;
                    session.persist().await?;
                }
                Dispatch::Cancelled {
                    completed,
                    unresolved,
                    documents,
                } => {
                    if !completed.is_empty() {
                        session.push(Message::tool_results(completed));
                    }
                    session.mark_unresolved(unresolved.clone());
                    return self
                        .abort_cancelled(&mut machine, session, unresolved, documents, event_tx)
                        .await;
                }
            }
        }

        let err = AgentError::MaxRounds(self.config.max_rounds);
        self.abort_failed(&mut machine, session, err, event_tx).await
    }

    /// One streaming model request
    async fn generate(
        &self,
        session: &TurnGuard,
        event_tx: &mpsc::Sender<AgentEvent>,
        cancel_token: &CancellationToken,
    ) -> Generation {
        let mut acc = ResponseAccumulator::new();

        let request = ChatRequest::new(self.config.model.clone())
            .with_messages(project(&self.config.system_prompt, &session.messages))
            .with_tools(self.tools.definitions());

        let opened = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return Generation::Cancelled(acc),
            opened = timeout(self.config.model_timeout, self.provider.chat_stream(request)) => opened,
        };
        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Generation::Failed(acc, e.into()),
            Err(_) => {
                return Generation::Failed(acc, AgentError::ModelTimeout(self.config.model_timeout.as_secs()))
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return Generation::Cancelled(acc),
                next = timeout(self.config.idle_timeout, stream.next()) => next,
            };

            match next {
                Ok(Some(Ok(chunk))) => {
                    if let Some(text) = acc.push(chunk) {
                        emit(event_tx, AgentEvent::token(text)).await;
                    }
                }
                Ok(Some(Err(e))) => return Generation::Failed(acc, e.into()),
                Ok(None) => return Generation::Done(acc),
                Err(_) => {
                    return Generation::Failed(acc, AgentError::IdleTimeout(self.config.idle_timeout.as_secs()))
                }
            }
        }
    }

    /// Run all calls of one model round concurrently. Results come back in
    /// request order whatever order they finish in.
    async fn dispatch(
        &self,
        calls: &[ToolCallRequest],
        event_tx: &mpsc::Sender<AgentEvent>,
        cancel_token: &CancellationToken,
    ) -> Dispatch {
        for call in calls {
            emit(
                event_tx,
                AgentEvent::ToolStart {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            )
            .await;
        }

        let mut slots: Vec<Option<ToolCallResult>> = vec![None; calls.len()];
        let trackers: Vec<DocumentTracker> = calls.iter().map(|_| DocumentTracker::new()).collect();
        let mut in_flight: FuturesUnordered<_> = calls
            .iter()
            .zip(&trackers)
            .enumerate()
            .map(|(position, (call, tracker))| {
                let tools = Arc::clone(&self.tools);
                async move { (position, tools.execute_tracked(call, tracker).await) }
            })
            .collect();

        loop {
            let finished = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                finished = in_flight.next() => finished,
            };
            let Some((position, result)) = finished else {
                return Dispatch::Done(slots.into_iter().flatten().collect());
            };

            emit(
                event_tx,
                AgentEvent::ToolComplete {
                    tool_call_id: result.call_id.clone(),
                    result: result.outcome.clone(),
                },
            )
            .await;
            slots[position] = Some(result);
        }

        // dropping the remaining futures cancels their external calls
        drop(in_flight);

        let mut unresolved = Vec::new();
        let mut documents = BTreeMap::new();
        for ((call, slot), tracker) in calls.iter().zip(&slots).zip(&trackers) {
            if slot.is_some() {
                continue;
            }
            unresolved.push(call.id.clone());
            if let Some(document_id) = tracker.document_id() {
                warn!(call_id = %call.id, %document_id, "cancelled call had already created a document");
                documents.insert(call.id.clone(), document_id);
            }
        }
        Dispatch::Cancelled {
            completed: slots.into_iter().flatten().collect(),
            unresolved,
            documents,
        }
    }

    async fn transition(
        &self,
        machine: &mut TurnMachine,
        session: &mut TurnGuard,
        to: TurnState,
        event_tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<()> {
        let from = machine.transition(to)?;
        session.set_state(to);
        emit(event_tx, AgentEvent::state_change(from, to)).await;
        Ok(())
    }

    async fn abort_cancelled(
        &self,
        machine: &mut TurnMachine,
        session: &mut TurnGuard,
        unresolved: Vec<String>,
        documents: BTreeMap<String, String>,
        event_tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<TurnOutcome> {
        self.transition(machine, session, TurnState::AwaitingUserInput, event_tx)
            .await?;
        session.persist().await?;
        info!(unresolved = ?unresolved, "turn cancelled");
        emit(
            event_tx,
            AgentEvent::Cancelled {
                unresolved: unresolved.clone(),
                documents,
            },
        )
        .await;
        Ok(TurnOutcome::Cancelled { unresolved })
    }

    async fn abort_failed(
        &self,
        machine: &mut TurnMachine,
        session: &mut TurnGuard,
        err: AgentError,
        event_tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<TurnOutcome> {
        warn!("turn failed: {}", err);
        self.transition(machine, session, TurnState::AwaitingUserInput, event_tx)
            .await?;
        session.persist().await?;
        emit(event_tx, AgentEvent::error(err.to_string(), Some(err.code()))).await;
        Ok(TurnOutcome::Failed)
    }
}

/// Send a frame; a departed client is not an error for the turn
async fn emit(event_tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    if event_tx.send(event).await.is_err() {
        debug!("event receiver dropped");
    }
}
