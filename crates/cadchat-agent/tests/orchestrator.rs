use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadchat_agent::{AgentConfig, AgentError, Orchestrator, TurnOutcome};
use cadchat_core::chat::{ChatChunk, ChatRequest, FinishReason};
use cadchat_core::conversation::{pending_calls, validate_history};
use cadchat_core::{AgentEvent, DocumentTracker, ErrorCode, Message, ModelReference, Role, ToolOutcome, TurnState};
use cadchat_llm::{LLMError, LLMProvider, LLMStream};
use cadchat_pipeline::{ConversionPipeline, ConversionRequest, PipelineError, PipelineFailure, PipelineStep};
use cadchat_session::{MemoryStore, Session, SessionError, SessionRegistry, SessionResult, SessionStore};
use cadchat_tool::{CreateModelTool, ToolGateway, ToolRegistry};
use futures::stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// scripted model
// ---------------------------------------------------------------------------

enum Script {
    Chunks(Vec<ChatChunk>),
    /// Chunks, then a stream that never ends
    Hang(Vec<ChatChunk>),
    Error(LLMError),
}

#[derive(Default)]
struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    async fn chat_stream(&self, request: ChatRequest) -> cadchat_llm::Result<LLMStream> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Chunks(chunks)) => Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok::<ChatChunk, LLMError>)))),
            Some(Script::Hang(chunks)) => {
                use futures::StreamExt;
                Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok::<ChatChunk, LLMError>)).chain(stream::pending())))
            }
            Some(Script::Error(e)) => Err(e),
            None => Err(LLMError::Stream("script exhausted".to_string())),
        }
    }
}

fn tool_call(index: usize, id: &str, arguments: &str) -> Vec<ChatChunk> {
    vec![
        ChatChunk::ToolCallStart {
            index,
            call_id: id.to_string(),
            name: "create_model".to_string(),
        },
        ChatChunk::ToolCallDelta {
            index,
            arguments_delta: arguments.to_string(),
        },
    ]
}

fn source_args(source: &str) -> String {
    serde_json::json!({ "geometrySource": source }).to_string()
}

fn text_reply(text: &str) -> Script {
    Script::Chunks(vec![ChatChunk::content(text), ChatChunk::finish(FinishReason::Stop)])
}

fn calls_reply(calls: &[(&str, &str)]) -> Script {
    let mut chunks = Vec::new();
    for (index, (id, source)) in calls.iter().enumerate() {
        chunks.extend(tool_call(index, id, &source_args(source)));
    }
    chunks.push(ChatChunk::finish(FinishReason::ToolCalls));
    Script::Chunks(chunks)
}

// ---------------------------------------------------------------------------
// fake pipeline
// ---------------------------------------------------------------------------

/// Answers by source text; unknown sources succeed with a numbered document
#[derive(Default)]
struct FakePipeline {
    calls: AtomicUsize,
    sources: Mutex<Vec<String>>,
    failures: HashMap<String, PipelineFailure>,
    delays: HashMap<String, Duration>,
    /// Sources that never finish
    blocked: Vec<String>,
    /// Sources that create their document, then never finish
    blocked_after_create: Vec<String>,
    fixed: Option<ModelReference>,
}

#[async_trait]
impl ConversionPipeline for FakePipeline {
    async fn convert(&self, request: ConversionRequest) -> Result<ModelReference, PipelineFailure> {
        self.convert_tracked(request, &DocumentTracker::new()).await
    }

    async fn convert_tracked(
        &self,
        request: ConversionRequest,
        tracker: &DocumentTracker,
    ) -> Result<ModelReference, PipelineFailure> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let source = request.geometry_source.clone();
        self.sources.lock().unwrap().push(source.clone());

        if self.blocked_after_create.contains(&source) {
            tracker.record(format!("doc{}", n));
            futures::future::pending::<()>().await;
        }
        if self.blocked.contains(&source) {
            futures::future::pending::<()>().await;
        }
        if let Some(delay) = self.delays.get(&source) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(failure) = self.failures.get(&source) {
            return Err(failure.clone());
        }
        if let Some(fixed) = &self.fixed {
            return Ok(fixed.clone());
        }
        Ok(ModelReference {
            document_id: format!("doc{}", n),
            url: format!("https://cad.onshape.com/documents/doc{}", n),
            summary: format!("Created document doc{}", n),
        })
    }
}

impl FakePipeline {
    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// harness
// ---------------------------------------------------------------------------

struct Harness {
    orchestrator: Arc<Orchestrator>,
    provider: Arc<ScriptedProvider>,
    pipeline: Arc<FakePipeline>,
    registry: Arc<SessionRegistry>,
}

fn harness(scripts: Vec<Script>, pipeline: FakePipeline) -> Harness {
    harness_with(scripts, pipeline, AgentConfig::new("test-model"), Arc::new(MemoryStore::new()))
}

fn harness_with(
    scripts: Vec<Script>,
    pipeline: FakePipeline,
    config: AgentConfig,
    store: Arc<dyn SessionStore>,
) -> Harness {
    let provider = ScriptedProvider::new(scripts);
    let pipeline = Arc::new(pipeline);
    let tools = ToolRegistry::with_tools(vec![Arc::new(CreateModelTool::new(pipeline.clone()))]);
    let gateway = ToolGateway::new(tools).with_timeout(Duration::from_secs(5));
    let orchestrator = Orchestrator::new(provider.clone(), Arc::new(gateway), config);

    Harness {
        orchestrator: Arc::new(orchestrator),
        provider,
        pipeline,
        registry: Arc::new(SessionRegistry::new(store)),
    }
}

impl Harness {
    /// Run a turn to completion and collect its frames
    async fn turn(&self, session_id: &str, text: &str) -> (cadchat_agent::Result<TurnOutcome>, Vec<AgentEvent>) {
        let mut guard = self.registry.acquire(session_id).await.unwrap();
        let (tx, mut rx) = mpsc::channel(512);
        let outcome = self
            .orchestrator
            .run_turn(&mut guard, Message::user(text), tx, CancellationToken::new())
            .await;
        drop(guard);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (outcome, events)
    }

    async fn session(&self, session_id: &str) -> Session {
        self.registry.snapshot(session_id).await.unwrap().unwrap()
    }
}

fn tool_results(session: &Session) -> Vec<cadchat_core::ToolCallResult> {
    session
        .messages
        .iter()
        .flat_map(|m| m.results().cloned().collect::<Vec<_>>())
        .collect()
}

fn tool_requests(session: &Session) -> Vec<cadchat_core::ToolCallRequest> {
    session
        .messages
        .iter()
        .flat_map(|m| m.tool_calls().cloned().collect::<Vec<_>>())
        .collect()
}

fn last_frame(events: &[AgentEvent]) -> &AgentEvent {
    events.last().expect("at least one frame")
}

fn compile_failure(message: &str) -> PipelineFailure {
    PipelineFailure::new(PipelineStep::Compile, PipelineError::Compile(message.to_string()))
}

// ---------------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_scenario_cube_link_reaches_final_message() {
    let pipeline = FakePipeline {
        fixed: Some(ModelReference {
            document_id: "doc123".to_string(),
            url: "https://cad.onshape.com/documents/doc123".to_string(),
            summary: "Created Onshape document \"Cube\" (ID: doc123).".to_string(),
        }),
        ..Default::default()
    };
    let h = harness(
        vec![
            calls_reply(&[("call_1", "cube([20,20,20]);")]),
            text_reply("Your cube is ready: https://cad.onshape.com/documents/doc123"),
        ],
        pipeline,
    );

    let (outcome, events) = h.turn("scenario-a", "create a 20mm cube").await;

    assert_eq!(outcome.unwrap(), TurnOutcome::Completed { rounds: 2 });
    assert_eq!(h.pipeline.call_count(), 1);
    assert_eq!(h.pipeline.sources.lock().unwrap()[0], "cube([20,20,20]);");

    let session = h.session("scenario-a").await;
    let final_message = session.messages.last().unwrap();
    assert_eq!(final_message.role, Role::Assistant);
    assert!(final_message.text().contains("https://cad.onshape.com/documents/doc123"));
    assert_eq!(session.state, TurnState::AwaitingUserInput);

    // reference reaches the model verbatim
    let requests = h.provider.requests();
    assert_eq!(requests.len(), 2);
    let tool_message = requests[1].messages.last().unwrap();
    assert_eq!(tool_message.role, Role::Tool);
    match &tool_message.results().next().unwrap().outcome {
        ToolOutcome::Success(reference) => assert_eq!(reference.document_id, "doc123"),
        other => panic!("expected success, got {:?}", other),
    }

    assert!(matches!(events[0], AgentEvent::StateChange { .. }));
    assert!(events.iter().any(|e| matches!(e, AgentEvent::TurnStart { .. })));
    assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolStart { tool_call_id, .. } if tool_call_id == "call_1")));
    assert!(matches!(last_frame(&events), AgentEvent::Complete { .. }));
}

#[tokio::test]
async fn test_scenario_compile_failure_is_fed_back() {
    let mut failures = HashMap::new();
    failures.insert("cube([20,20,20]".to_string(), compile_failure("syntax error line 3"));
    let h = harness(
        vec![
            calls_reply(&[("call_1", "cube([20,20,20]")]),
            text_reply("The program did not compile (syntax error line 3). Let me know if I should retry."),
        ],
        FakePipeline {
            failures,
            ..Default::default()
        },
    );

    let (outcome, events) = h.turn("scenario-b", "create a 20mm cube").await;
    assert_eq!(outcome.unwrap(), TurnOutcome::Completed { rounds: 2 });

    let complete = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::ToolComplete { result, .. } => Some(result.clone()),
            _ => None,
        })
        .unwrap();
    match complete {
        ToolOutcome::Failure(failure) => {
            assert_eq!(failure.error_code, ErrorCode::CompileError);
            assert!(failure.message.contains("syntax error line 3"));
        }
        other => panic!("expected failure, got {:?}", other),
    }

    let requests = h.provider.requests();
    let fed_back = requests[1].messages.last().unwrap().results().next().unwrap().content_for_model();
    assert!(fed_back.contains("compile_error"));
    assert!(fed_back.contains("syntax error line 3"));
}

#[tokio::test]
async fn test_scenario_two_calls_resolve_before_resuming() {
    let mut delays = HashMap::new();
    delays.insert("cube(10);".to_string(), Duration::from_millis(80));
    delays.insert("translate([0,0,10]) cylinder(h=5, r=2);".to_string(), Duration::from_millis(5));
    let h = harness(
        vec![
            calls_reply(&[
                ("call_shape", "cube(10);"),
                ("call_fixture", "translate([0,0,10]) cylinder(h=5, r=2);"),
            ]),
            text_reply("Both parts are ready."),
        ],
        FakePipeline {
            delays,
            ..Default::default()
        },
    );

    let (outcome, events) = h.turn("scenario-c", "a block with a peg").await;
    assert_eq!(outcome.unwrap(), TurnOutcome::Completed { rounds: 2 });
    assert_eq!(h.pipeline.call_count(), 2);

    // the fixture finished first
    let completed: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolComplete { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec!["call_fixture", "call_shape"]);

    // but results are stored in request order, in one message
    let session = h.session("scenario-c").await;
    let tool_message = session.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    let ids: Vec<&str> = tool_message.results().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, vec!["call_shape", "call_fixture"]);

    // generation resumed only once both had resolved
    let second = &h.provider.requests()[1];
    assert_eq!(second.messages.last().unwrap().results().count(), 2);
}

#[tokio::test]
async fn test_same_source_twice_creates_two_documents() {
    let h = harness(
        vec![
            calls_reply(&[("call_1", "cube(5);")]),
            text_reply("first"),
            calls_reply(&[("call_2", "cube(5);")]),
            text_reply("second"),
        ],
        FakePipeline::default(),
    );

    h.turn("dup", "make a cube").await.0.unwrap();
    h.turn("dup", "make it again").await.0.unwrap();

    let session = h.session("dup").await;
    let docs: Vec<String> = tool_results(&session)
        .into_iter()
        .map(|r| match r.outcome {
            ToolOutcome::Success(reference) => reference.document_id,
            other => panic!("expected success, got {:?}", other),
        })
        .collect();
    assert_eq!(h.pipeline.call_count(), 2);
    assert_eq!(docs.len(), 2);
    assert_ne!(docs[0], docs[1]);
}

// ---------------------------------------------------------------------------
// protocol properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_every_request_resolved_when_finalized() {
    let h = harness(
        vec![
            calls_reply(&[("a", "cube(1);"), ("b", "sphere(1);"), ("c", "")]),
            calls_reply(&[("d", "cylinder(h=1, r=1);")]),
            text_reply("done"),
        ],
        FakePipeline::default(),
    );

    let (outcome, _) = h.turn("counts", "three things").await;
    assert_eq!(outcome.unwrap(), TurnOutcome::Completed { rounds: 3 });

    let session = h.session("counts").await;
    assert_eq!(tool_requests(&session).len(), tool_results(&session).len());
    assert!(pending_calls(&session.messages).is_empty());
    validate_history(&session.messages).unwrap();

    // the empty source never reached the pipeline
    assert_eq!(h.pipeline.call_count(), 3);
}

#[tokio::test]
async fn test_streamed_text_order_preserved_in_history() {
    let h = harness(
        vec![Script::Chunks(vec![
            ChatChunk::content("Hello"),
            ChatChunk::content(", "),
            ChatChunk::content("world"),
            ChatChunk::finish(FinishReason::Stop),
        ])],
        FakePipeline::default(),
    );

    let (_, events) = h.turn("order", "hi").await;

    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Token { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    let session = h.session("order").await;
    assert_eq!(streamed, "Hello, world");
    assert_eq!(session.messages.last().unwrap().text(), streamed);

    let replayed: Session = serde_json::from_str(&serde_json::to_string(&session).unwrap()).unwrap();
    assert_eq!(replayed.messages, session.messages);
}

#[tokio::test]
async fn test_duplicate_call_ids_are_replaced() {
    let h = harness(
        vec![
            calls_reply(&[("call_1", "cube(1);")]),
            calls_reply(&[("call_1", "cube(2);")]),
            text_reply("done"),
        ],
        FakePipeline::default(),
    );

    h.turn("ids", "two cubes").await.0.unwrap();

    let session = h.session("ids").await;
    let ids: Vec<String> = tool_requests(&session).into_iter().map(|c| c.id).collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], "call_1");
    assert_ne!(ids[1], "call_1");
    validate_history(&session.messages).unwrap();
}

#[tokio::test]
async fn test_malformed_arguments_fail_validation() {
    let h = harness(
        vec![
            Script::Chunks({
                let mut chunks = tool_call(0, "call_1", "{\"geometrySource\": \"cube(");
                chunks.push(ChatChunk::finish(FinishReason::ToolCalls));
                chunks
            }),
            text_reply("Sorry, let me fix that."),
        ],
        FakePipeline::default(),
    );

    h.turn("bad-json", "cube").await.0.unwrap();

    let session = h.session("bad-json").await;
    let results = tool_results(&session);
    assert_eq!(results.len(), 1);
    match &results[0].outcome {
        ToolOutcome::Failure(failure) => assert_eq!(failure.error_code, ErrorCode::InvalidInput),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.pipeline.call_count(), 0);
}

#[tokio::test]
async fn test_max_rounds_ends_with_error_frame() {
    let h = harness_with(
        vec![
            calls_reply(&[("a", "cube(1);")]),
            calls_reply(&[("b", "cube(2);")]),
            calls_reply(&[("c", "cube(3);")]),
        ],
        FakePipeline::default(),
        AgentConfig::new("test-model").with_max_rounds(2),
        Arc::new(MemoryStore::new()),
    );

    let (outcome, events) = h.turn("loop", "keep going").await;

    assert_eq!(outcome.unwrap(), TurnOutcome::Failed);
    match last_frame(&events) {
        AgentEvent::Error { code, .. } => assert_eq!(code.as_deref(), Some("max_rounds_exceeded")),
        other => panic!("expected error frame, got {:?}", other),
    }
    assert_eq!(h.provider.requests().len(), 2);

    let session = h.session("loop").await;
    assert_eq!(session.state, TurnState::AwaitingUserInput);
    assert!(pending_calls(&session.messages).is_empty());
}

#[tokio::test]
async fn test_model_error_is_an_error_frame_and_session_recovers() {
    let h = harness(
        vec![
            Script::Error(LLMError::Api {
                status: 503,
                message: "overloaded".to_string(),
            }),
            text_reply("back again"),
        ],
        FakePipeline::default(),
    );

    let (outcome, events) = h.turn("flaky", "hello").await;
    assert_eq!(outcome.unwrap(), TurnOutcome::Failed);
    match last_frame(&events) {
        AgentEvent::Error { code, message } => {
            assert_eq!(code.as_deref(), Some("model_api_error"));
            assert!(message.contains("overloaded"));
        }
        other => panic!("expected error frame, got {:?}", other),
    }

    let (outcome, _) = h.turn("flaky", "hello again").await;
    assert_eq!(outcome.unwrap(), TurnOutcome::Completed { rounds: 1 });
    let session = h.session("flaky").await;
    let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::User, Role::Assistant]);
}

#[tokio::test]
async fn test_idle_stream_times_out_keeping_partial_text() {
    let h = harness_with(
        vec![Script::Hang(vec![ChatChunk::content("Thinking")])],
        FakePipeline::default(),
        AgentConfig::new("test-model").with_idle_timeout(Duration::from_millis(50)),
        Arc::new(MemoryStore::new()),
    );

    let (outcome, events) = h.turn("idle", "hi").await;

    assert_eq!(outcome.unwrap(), TurnOutcome::Failed);
    match last_frame(&events) {
        AgentEvent::Error { code, .. } => assert_eq!(code.as_deref(), Some("model_idle_timeout")),
        other => panic!("expected error frame, got {:?}", other),
    }
    let session = h.session("idle").await;
    assert_eq!(session.messages.last().unwrap().text(), "Thinking");
}

// ---------------------------------------------------------------------------
// cancellation
// ---------------------------------------------------------------------------

async fn wait_for<F>(rx: &mut mpsc::Receiver<AgentEvent>, seen: &mut Vec<AgentEvent>, mut done: F)
where
    F: FnMut(&[AgentEvent]) -> bool,
{
    while !done(seen) {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("frame in time")
            .expect("channel open");
        seen.push(event);
    }
}

#[tokio::test]
async fn test_cancel_during_tool_execution() {
    let h = harness(
        vec![
            calls_reply(&[("call_fast", "cube(1);"), ("call_stuck", "sphere(100);")]),
            text_reply("What next?"),
        ],
        FakePipeline {
            blocked: vec!["sphere(100);".to_string()],
            ..Default::default()
        },
    );

    let guard = h.registry.acquire("cancel-tools").await.unwrap();
    let (tx, mut rx) = mpsc::channel(512);
    let token = CancellationToken::new();
    let orchestrator = h.orchestrator.clone();
    let task_token = token.clone();
    let task = tokio::spawn(async move {
        let mut guard = guard;
        orchestrator
            .run_turn(&mut guard, Message::user("two things"), tx, task_token)
            .await
    });

    let mut seen = Vec::new();
    wait_for(&mut rx, &mut seen, |events| {
        events
            .iter()
            .any(|e| matches!(e, AgentEvent::ToolComplete { tool_call_id, .. } if tool_call_id == "call_fast"))
    })
    .await;
    token.cancel();

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::Cancelled {
            unresolved: vec!["call_stuck".to_string()]
        }
    );
    while let Some(event) = rx.recv().await {
        seen.push(event);
    }
    assert!(matches!(
        last_frame(&seen),
        AgentEvent::Cancelled { unresolved, documents }
            if unresolved == &vec!["call_stuck".to_string()] && documents.is_empty()
    ));

    let session = h.session("cancel-tools").await;
    assert_eq!(session.state, TurnState::AwaitingUserInput);
    assert_eq!(session.unresolved, vec!["call_stuck"]);
    let results = tool_results(&session);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].call_id, "call_fast");
    assert_eq!(h.pipeline.call_count(), 2);

    // next user message is accepted and nothing is re-issued
    let (outcome, events) = h.turn("cancel-tools", "never mind").await;
    assert_eq!(outcome.unwrap(), TurnOutcome::Completed { rounds: 1 });
    assert_eq!(h.pipeline.call_count(), 2);
    match &events[0] {
        AgentEvent::Unresolved { tool_call_ids, .. } => assert_eq!(tool_call_ids, &vec!["call_stuck".to_string()]),
        other => panic!("expected unresolved frame first, got {:?}", other),
    }

    // the model never sees the dangling call, only a note about it
    let last_request = h.provider.requests().pop().unwrap();
    let offered: Vec<String> = last_request
        .messages
        .iter()
        .flat_map(|m| m.tool_calls().map(|c| c.id.clone()).collect::<Vec<_>>())
        .collect();
    assert_eq!(offered, vec!["call_fast"]);
    assert!(last_request
        .messages
        .iter()
        .any(|m| m.role == Role::Assistant && m.text().contains("call_stuck")));

    // reported once only
    let (_, events) = h.turn("cancel-tools", "thanks").await;
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::Unresolved { .. })));
}

#[tokio::test]
async fn test_cancel_after_document_creation_reports_document() {
    let h = harness(
        vec![calls_reply(&[("call_slow", "cube(30);")])],
        FakePipeline {
            blocked_after_create: vec!["cube(30);".to_string()],
            ..Default::default()
        },
    );

    let guard = h.registry.acquire("cancel-created").await.unwrap();
    let (tx, mut rx) = mpsc::channel(512);
    let token = CancellationToken::new();
    let orchestrator = h.orchestrator.clone();
    let task_token = token.clone();
    let task = tokio::spawn(async move {
        let mut guard = guard;
        orchestrator
            .run_turn(&mut guard, Message::user("a big cube"), tx, task_token)
            .await
    });

    let mut seen = Vec::new();
    wait_for(&mut rx, &mut seen, |events| {
        events.iter().any(|e| matches!(e, AgentEvent::ToolStart { .. }))
    })
    .await;
    while h.pipeline.call_count() == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    token.cancel();

    task.await.unwrap().unwrap();
    while let Some(event) = rx.recv().await {
        seen.push(event);
    }
    match last_frame(&seen) {
        AgentEvent::Cancelled { unresolved, documents } => {
            assert_eq!(unresolved, &vec!["call_slow".to_string()]);
            assert_eq!(documents.get("call_slow").map(String::as_str), Some("doc1"));
        }
        other => panic!("expected cancelled frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_during_generation_keeps_partial_text() {
    let h = harness(
        vec![
            Script::Hang(vec![ChatChunk::content("Let me think about ")]),
            text_reply("ok"),
        ],
        FakePipeline::default(),
    );

    let guard = h.registry.acquire("cancel-gen").await.unwrap();
    let (tx, mut rx) = mpsc::channel(512);
    let token = CancellationToken::new();
    let orchestrator = h.orchestrator.clone();
    let task_token = token.clone();
    let task = tokio::spawn(async move {
        let mut guard = guard;
        orchestrator
            .run_turn(&mut guard, Message::user("design a gear"), tx, task_token)
            .await
    });

    let mut seen = Vec::new();
    wait_for(&mut rx, &mut seen, |events| {
        events.iter().any(|e| matches!(e, AgentEvent::Token { .. }))
    })
    .await;
    token.cancel();

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, TurnOutcome::Cancelled { unresolved: vec![] });

    let session = h.session("cancel-gen").await;
    let last = session.messages.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.text(), "Let me think about ");
    assert_eq!(session.state, TurnState::AwaitingUserInput);

    let (outcome, _) = h.turn("cancel-gen", "continue").await;
    assert_eq!(outcome.unwrap(), TurnOutcome::Completed { rounds: 1 });
}

// ---------------------------------------------------------------------------
// posted histories
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_run_chat_rejects_history_without_user_message() {
    let h = harness(vec![], FakePipeline::default());
    let mut guard = h.registry.acquire("posted").await.unwrap();
    let (tx, mut rx) = mpsc::channel(16);

    let outcome = h
        .orchestrator
        .run_chat(
            &mut guard,
            vec![Message::assistant(vec![cadchat_core::Part::text("hi")])],
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Rejected);
    match rx.recv().await.unwrap() {
        AgentEvent::Error { code, .. } => assert_eq!(code.as_deref(), Some("protocol_error")),
        other => panic!("expected error frame, got {:?}", other),
    }
    assert!(h.provider.requests().is_empty());
}

#[tokio::test]
async fn test_run_chat_appends_to_stored_history() {
    let h = harness(vec![text_reply("one"), text_reply("two")], FakePipeline::default());

    let first = Message::user("first");
    {
        let mut guard = h.registry.acquire("posted").await.unwrap();
        let (tx, _rx) = mpsc::channel(64);
        h.orchestrator
            .run_chat(&mut guard, vec![first.clone()], tx, CancellationToken::new())
            .await
            .unwrap();
    }

    let stored = h.session("posted").await.messages;
    let mut posted = stored.clone();
    posted.push(Message::user("second"));

    let mut guard = h.registry.acquire("posted").await.unwrap();
    let (tx, _rx) = mpsc::channel(64);
    let outcome = h
        .orchestrator
        .run_chat(&mut guard, posted, tx, CancellationToken::new())
        .await
        .unwrap();
    drop(guard);

    assert_eq!(outcome, TurnOutcome::Completed { rounds: 1 });
    let texts: Vec<String> = h.session("posted").await.messages.iter().map(|m| m.text()).collect();
    assert_eq!(texts, vec!["first", "one", "second", "two"]);
}

#[tokio::test]
async fn test_run_chat_text_transcript_keeps_tool_history() {
    let h = harness(
        vec![
            calls_reply(&[("call_1", "cube([20,20,20]);")]),
            text_reply("Your cube is ready: https://cad.onshape.com/documents/doc1"),
            text_reply("Sure, I will make it taller."),
        ],
        FakePipeline::default(),
    );
    h.turn("transcript", "a 20mm cube").await.0.unwrap();

    // what a text-only client posts back, with its own message ids
    let posted = vec![
        Message::user("a 20mm cube"),
        Message::assistant(vec![cadchat_core::Part::text(
            "Your cube is ready: https://cad.onshape.com/documents/doc1",
        )]),
        Message::user("make it taller"),
    ];
    let mut guard = h.registry.acquire("transcript").await.unwrap();
    let (tx, _rx) = mpsc::channel(64);
    let outcome = h
        .orchestrator
        .run_chat(&mut guard, posted, tx, CancellationToken::new())
        .await
        .unwrap();
    drop(guard);
    assert_eq!(outcome, TurnOutcome::Completed { rounds: 1 });

    let session = h.session("transcript").await;
    assert_eq!(tool_requests(&session).len(), 1);
    assert_eq!(tool_results(&session).len(), 1);
    validate_history(&session.messages).unwrap();

    // the model still sees the program it wrote
    let last_request = h.provider.requests().pop().unwrap();
    let sources: Vec<String> = last_request
        .messages
        .iter()
        .flat_map(|m| m.tool_calls().cloned().collect::<Vec<_>>())
        .map(|c| c.arguments["geometrySource"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(sources, vec!["cube([20,20,20]);"]);
    assert_eq!(last_request.messages.last().unwrap().text(), "make it taller");
}

// ---------------------------------------------------------------------------
// storage failure
// ---------------------------------------------------------------------------

struct BrokenStore;

#[async_trait]
impl SessionStore for BrokenStore {
    async fn load(&self, _session_id: &str) -> SessionResult<Option<Session>> {
        Ok(None)
    }

    async fn save(&self, _session: &Session) -> SessionResult<()> {
        Err(SessionError::other("disk full"))
    }

    async fn delete(&self, _session_id: &str) -> SessionResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_storage_failure_is_fatal_with_error_frame() {
    let h = harness_with(
        vec![text_reply("never sent")],
        FakePipeline::default(),
        AgentConfig::new("test-model"),
        Arc::new(BrokenStore),
    );

    let (outcome, events) = h.turn("broken", "hello").await;

    assert!(matches!(outcome, Err(AgentError::Storage(_))));
    match last_frame(&events) {
        AgentEvent::Error { code, .. } => assert_eq!(code.as_deref(), Some("storage_error")),
        other => panic!("expected error frame, got {:?}", other),
    }
    assert!(h.provider.requests().is_empty());
}
