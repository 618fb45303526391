//! End-to-end turn loop tests against scripted providers.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;

use drost_domain::config::{FailoverConfig, HistoryBudget, ProviderProfile, RouteConfig};
use drost_domain::message::Role;
use drost_domain::stream::{StreamEvent, TurnEvent, Usage};
use drost_domain::tool::{ToolDefinition, ToolOutcome};
use drost_providers::mock::{MockTurn, ScriptedAdapter};
use drost_providers::{FailoverState, ProviderAdapter, ProviderManager};
use drost_sessions::{LockOptions, SessionFileStore, TranscriptWriter};
use drost_tools::registry::ToolRegistry;
use drost_tools::{Tool, ToolContext, ToolRuntime};

use drost_gateway::lifecycle::DegradedReasons;
use drost_gateway::runtime::manager::EventSink;
use drost_gateway::runtime::{SessionManager, TurnRunRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo_tool".into(),
            description: "Echo the input back.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        }
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolOutcome {
        ToolOutcome::success(serde_json::json!({ "echoed": input }))
    }
}

/// Stand-in for the web built-in that records every call instead of
/// touching the network.
struct RecordingWebTool {
    calls: Arc<Mutex<Vec<Value>>>,
}

#[async_trait::async_trait]
impl Tool for RecordingWebTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web".into(),
            description: "Fetch a URL or search the web.".into(),
            parameters: serde_json::json!({ "type": "object" }),
        }
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolOutcome {
        self.calls.lock().push(input);
        ToolOutcome::success(serde_json::json!({ "results": ["stub result"] }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    manager: Arc<SessionManager>,
    events: Arc<Mutex<Vec<TurnEvent>>>,
    web_calls: Arc<Mutex<Vec<Value>>>,
    _dir: TempDir,
}

fn build(
    adapters: Vec<(ProviderProfile, Arc<dyn ProviderAdapter>)>,
    routes: Vec<RouteConfig>,
    failover: FailoverConfig,
    max_tool_calls: u32,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let sessions_dir = dir.path().join("sessions");
    let store = Arc::new(
        SessionFileStore::open(&sessions_dir, LockOptions::default(), HistoryBudget::default())
            .unwrap(),
    );
    let transcripts = Arc::new(TranscriptWriter::new(&sessions_dir));

    let mut providers = ProviderManager::from_profiles(&[]);
    for (profile, adapter) in adapters {
        providers.bind(profile, adapter);
    }

    let web_calls: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry.register_builtin(Arc::new(EchoTool));
    registry.register_builtin(Arc::new(RecordingWebTool {
        calls: web_calls.clone(),
    }));
    let tools = Arc::new(ToolRuntime::new(
        Arc::new(registry),
        Default::default(),
        None,
        dir.path().to_path_buf(),
        vec![dir.path().to_path_buf()],
    ));

    let manager = Arc::new(SessionManager::new(
        store,
        transcripts,
        Arc::new(providers),
        Arc::new(FailoverState::new(failover)),
        tools,
        routes,
        max_tool_calls,
        Arc::new(DegradedReasons::default()),
    ));

    Harness {
        manager,
        events: Arc::new(Mutex::new(Vec::new())),
        web_calls,
        _dir: dir,
    }
}

fn text_profile(id: &str) -> ProviderProfile {
    ProviderProfile::named(id)
}

fn request(harness: &Harness, session_id: &str, input: &str) -> TurnRunRequest {
    let events = harness.events.clone();
    let sink: EventSink = Arc::new(move |event| events.lock().push(event));
    let mut req = TurnRunRequest::text(session_id, input);
    req.on_event = Some(sink);
    req
}

fn roles(harness: &Harness, session_id: &str) -> Vec<Role> {
    harness
        .manager
        .get_history(session_id)
        .unwrap()
        .iter()
        .map(|m| m.role)
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1: text-mode tool loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn text_mode_tool_loop() {
    let adapter = Arc::new(ScriptedAdapter::new(
        "mock",
        vec![
            MockTurn::text(r#"TOOL_CALL {"name":"echo_tool","input":{"text":"hello"}}"#),
            MockTurn::text("Final answer after tool execution."),
        ],
    ));
    let harness = build(
        vec![(text_profile("mock"), adapter)],
        vec![],
        FailoverConfig::default(),
        10,
    );

    harness
        .manager
        .ensure_session("s1", None, None, None)
        .unwrap();
    let mut req = request(&harness, "s1", "please echo hello");
    req.available_tools = Some(vec!["echo_tool".into()]);
    let outcome = harness.manager.run_turn(req).await.unwrap();

    assert_eq!(outcome.response, "Final answer after tool execution.");
    assert_eq!(roles(&harness, "s1"), vec![Role::User, Role::Tool, Role::Assistant]);

    let history = harness.manager.get_history("s1").unwrap();
    assert!(history[1].content.starts_with("TOOL_RESULT "));
    let result: Value =
        serde_json::from_str(history[1].content.strip_prefix("TOOL_RESULT ").unwrap()).unwrap();
    assert_eq!(result["ok"], true);
    assert_eq!(result["output"]["echoed"]["text"], "hello");
    assert_eq!(history[2].content, "Final answer after tool execution.");
    assert!(!harness.manager.turn_in_progress("s1"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2: budget exceeded
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn tool_budget_exceeded() {
    let call = || MockTurn::native_tool_call("echo_tool", serde_json::json!({"text": "again"}));
    let adapter = Arc::new(
        ScriptedAdapter::new("mock", vec![call(), call(), call()]).with_native_tool_calls(true),
    );
    let harness = build(
        vec![(text_profile("mock"), adapter)],
        vec![],
        FailoverConfig::default(),
        1,
    );

    harness
        .manager
        .ensure_session("s1", None, None, None)
        .unwrap();
    let outcome = harness
        .manager
        .run_turn(request(&harness, "s1", "loop forever"))
        .await
        .unwrap();

    assert!(outcome.response.contains("Tool call budget exceeded (1)"));
    let history = harness.manager.get_history("s1").unwrap();
    assert!(history
        .last()
        .unwrap()
        .content
        .contains("Tool call budget exceeded (1)"));

    let events = harness.events.lock();
    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::ProviderError { message, .. }
            if message.contains("Tool call budget exceeded"))));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3: auto-web heuristic
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn auto_web_heuristic() {
    let adapter = Arc::new(ScriptedAdapter::new(
        "mock",
        vec![
            MockTurn::text("I don't have live data."),
            MockTurn::text("Here is what I found."),
        ],
    ));
    let harness = build(
        vec![(text_profile("mock"), adapter)],
        vec![],
        FailoverConfig::default(),
        10,
    );

    let user_input = "Can you search for today's news on Iran?";
    harness
        .manager
        .ensure_session("s1", None, None, None)
        .unwrap();
    let mut req = request(&harness, "s1", user_input);
    req.available_tools = Some(vec!["web".into()]);
    let outcome = harness.manager.run_turn(req).await.unwrap();

    // Exactly one synthesized web.search call with the full user text.
    let calls = harness.web_calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["action"], "search");
    assert_eq!(calls[0]["query"], user_input);

    assert_eq!(outcome.response, "Here is what I found.");
    assert_eq!(roles(&harness, "s1"), vec![Role::User, Role::Tool, Role::Assistant]);
}

#[tokio::test]
async fn auto_web_not_triggered_without_keywords() {
    let adapter = Arc::new(ScriptedAdapter::new(
        "mock",
        vec![MockTurn::text("Sure, refactoring now.")],
    ));
    let harness = build(
        vec![(text_profile("mock"), adapter)],
        vec![],
        FailoverConfig::default(),
        10,
    );

    harness
        .manager
        .ensure_session("s1", None, None, None)
        .unwrap();
    let mut req = request(&harness, "s1", "please refactor this function");
    req.available_tools = Some(vec!["web".into()]);
    harness.manager.run_turn(req).await.unwrap();

    assert!(harness.web_calls.lock().is_empty());
    assert_eq!(roles(&harness, "s1"), vec![Role::User, Role::Assistant]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 4: snapshot-delta dedup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn snapshot_delta_dedup() {
    let adapter = Arc::new(ScriptedAdapter::new(
        "mock",
        vec![MockTurn::Events(vec![
            StreamEvent::Delta {
                text: "When debugg".into(),
            },
            StreamEvent::Delta {
                text: "When debugging, I usually do four things.".into(),
            },
            StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 4,
                    completion_tokens: 9,
                    total_tokens: 13,
                }),
                finish_reason: Some("stop".into()),
            },
        ])],
    ));
    let harness = build(
        vec![(text_profile("mock"), adapter)],
        vec![],
        FailoverConfig::default(),
        10,
    );

    harness
        .manager
        .ensure_session("s1", None, None, None)
        .unwrap();
    let outcome = harness
        .manager
        .run_turn(request(&harness, "s1", "how do you debug?"))
        .await
        .unwrap();

    assert_eq!(outcome.response, "When debugging, I usually do four things.");
    let history = harness.manager.get_history("s1").unwrap();
    assert_eq!(
        history.last().unwrap().content,
        "When debugging, I usually do four things."
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation loop stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn repeated_validation_failures_stop_the_loop() {
    // `text` must be a string; the model keeps sending a number.
    let bad_call = || MockTurn::text(r#"TOOL_CALL {"name":"echo_tool","input":{"text":42}}"#);
    let adapter = Arc::new(ScriptedAdapter::new(
        "mock",
        vec![bad_call(), bad_call(), bad_call(), MockTurn::text("unreached")],
    ));
    let harness = build(
        vec![(text_profile("mock"), adapter)],
        vec![],
        FailoverConfig::default(),
        10,
    );

    harness
        .manager
        .ensure_session("s1", None, None, None)
        .unwrap();
    let outcome = harness
        .manager
        .run_turn(request(&harness, "s1", "go"))
        .await
        .unwrap();

    assert!(outcome.response.contains("Stopping"));
    assert!(outcome.response.contains("echo_tool"));
    // Three TOOL_RESULT failures recorded, then the abort message.
    let history = harness.manager.get_history("s1").unwrap();
    let failures = history
        .iter()
        .filter(|m| m.role == Role::Tool && m.content.contains("\"ok\":false"))
        .count();
    assert_eq!(failures, 3);
    assert_eq!(history.last().unwrap().role, Role::Assistant);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Failover
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn retryable_failure_walks_fallback_and_rebinds() {
    let primary = Arc::new(ScriptedAdapter::new(
        "primary",
        vec![MockTurn::Fail {
            message: "HTTP 503 - overloaded".into(),
            retryable: true,
        }],
    ));
    let backup = Arc::new(ScriptedAdapter::new(
        "backup",
        vec![MockTurn::text("from backup"), MockTurn::text("still backup")],
    ));

    let route = RouteConfig {
        id: "main-route".into(),
        primary_provider_id: "primary".into(),
        fallback_provider_ids: vec!["backup".into()],
    };
    let harness = build(
        vec![
            (text_profile("primary"), primary),
            (text_profile("backup"), backup),
        ],
        vec![route],
        FailoverConfig {
            max_retries: 0,
            retry_delay_ms: 0,
            ..Default::default()
        },
        10,
    );

    harness
        .manager
        .ensure_session("s1", Some("primary"), None, None)
        .unwrap();
    let mut req = request(&harness, "s1", "hello");
    req.route_id = Some("main-route".into());
    let outcome = harness.manager.run_turn(req).await.unwrap();

    assert_eq!(outcome.provider_id, "backup");
    assert_eq!(outcome.response, "from backup");

    // The rebinding sticks for subsequent turns.
    let record = harness.manager.get_record("s1").unwrap();
    assert_eq!(record.active_provider_id.as_deref(), Some("backup"));

    // A provider.error event surfaced for the failing primary.
    assert!(harness.events.lock().iter().any(|e| matches!(
        e,
        TurnEvent::ProviderError { provider_id, .. } if provider_id == "primary"
    )));
}

#[tokio::test]
async fn terminal_auth_failure_does_not_fail_over() {
    let primary = Arc::new(ScriptedAdapter::new(
        "primary",
        vec![MockTurn::Fail {
            message: "bad api key".into(),
            retryable: false,
        }],
    ));
    let backup = Arc::new(ScriptedAdapter::new("backup", vec![MockTurn::text("nope")]));

    let route = RouteConfig {
        id: "r".into(),
        primary_provider_id: "primary".into(),
        fallback_provider_ids: vec!["backup".into()],
    };
    let harness = build(
        vec![
            (text_profile("primary"), primary),
            (text_profile("backup"), backup.clone()),
        ],
        vec![route],
        FailoverConfig {
            max_retries: 2,
            retry_delay_ms: 0,
            ..Default::default()
        },
        10,
    );

    harness
        .manager
        .ensure_session("s1", Some("primary"), None, None)
        .unwrap();
    let mut req = request(&harness, "s1", "hello");
    req.route_id = Some("r".into());
    let err = harness.manager.run_turn(req).await.unwrap_err();

    assert_eq!(err.code(), "provider_auth");
    // The fallback was never consulted.
    assert!(backup.requests.lock().is_empty());
    assert!(!harness.manager.turn_in_progress("s1"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider switch at the turn boundary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn queued_provider_switch_applies_at_next_turn() {
    let first = Arc::new(ScriptedAdapter::new("first", vec![MockTurn::text("one")]));
    let second = Arc::new(ScriptedAdapter::new("second", vec![MockTurn::text("two")]));
    let harness = build(
        vec![
            (text_profile("first"), first),
            (text_profile("second"), second),
        ],
        vec![],
        FailoverConfig::default(),
        10,
    );

    harness
        .manager
        .ensure_session("s1", Some("first"), None, None)
        .unwrap();

    harness
        .manager
        .queue_provider_switch("s1", "second")
        .unwrap();
    // The switch is pending, not applied.
    let record = harness.manager.get_record("s1").unwrap();
    assert_eq!(record.active_provider_id.as_deref(), Some("first"));
    assert_eq!(record.pending_provider_id.as_deref(), Some("second"));

    let outcome = harness
        .manager
        .run_turn(request(&harness, "s1", "hi"))
        .await
        .unwrap();
    assert_eq!(outcome.provider_id, "second");
    assert_eq!(outcome.response, "two");

    let record = harness.manager.get_record("s1").unwrap();
    assert_eq!(record.active_provider_id.as_deref(), Some("second"));
    assert!(record.pending_provider_id.is_none());
}

#[tokio::test]
async fn switch_to_unknown_provider_rejected() {
    let adapter = Arc::new(ScriptedAdapter::always_text("mock", "x"));
    let harness = build(
        vec![(text_profile("mock"), adapter)],
        vec![],
        FailoverConfig::default(),
        10,
    );
    harness
        .manager
        .ensure_session("s1", None, None, None)
        .unwrap();

    let err = harness
        .manager
        .queue_provider_switch("s1", "ghost")
        .unwrap_err();
    assert_eq!(err.code(), "unknown_provider");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Contract edges
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn run_turn_on_unknown_session_fails() {
    let adapter = Arc::new(ScriptedAdapter::always_text("mock", "x"));
    let harness = build(
        vec![(text_profile("mock"), adapter)],
        vec![],
        FailoverConfig::default(),
        10,
    );

    let err = harness
        .manager
        .run_turn(TurnRunRequest::text("nobody", "hi"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unknown_session");
}

#[tokio::test]
async fn second_turn_while_running_is_rejected() {
    // A provider that stalls long enough for the second call to land.
    struct Stall;
    #[async_trait::async_trait]
    impl ProviderAdapter for Stall {
        fn id(&self) -> &str {
            "stall"
        }
        async fn probe(&self) -> drost_providers::ProbeResult {
            drost_providers::ProbeResult::ok()
        }
        async fn run_turn(
            &self,
            _req: &drost_providers::TurnRequest,
        ) -> drost_domain::Result<
            drost_domain::stream::BoxStream<'static, drost_domain::Result<StreamEvent>>,
        > {
            let stream = async_stream::stream! {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                yield Ok(StreamEvent::Delta { text: "done".into() });
                yield Ok(StreamEvent::Done { usage: None, finish_reason: None });
            };
            Ok(Box::pin(stream))
        }
    }

    let harness = build(
        vec![(text_profile("stall"), Arc::new(Stall))],
        vec![],
        FailoverConfig::default(),
        10,
    );
    harness
        .manager
        .ensure_session("s1", None, None, None)
        .unwrap();

    let manager = harness.manager.clone();
    let running = tokio::spawn(async move {
        manager.run_turn(TurnRunRequest::text("s1", "first")).await
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let err = harness
        .manager
        .run_turn(TurnRunRequest::text("s1", "second"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "turn_in_progress");

    running.await.unwrap().unwrap();
    assert!(!harness.manager.turn_in_progress("s1"));
}

#[tokio::test]
async fn metadata_update_and_hydrate() {
    let adapter = Arc::new(ScriptedAdapter::always_text("mock", "x"));
    let harness = build(
        vec![(text_profile("mock"), adapter)],
        vec![],
        FailoverConfig::default(),
        10,
    );
    harness
        .manager
        .ensure_session("s1", None, None, None)
        .unwrap();

    let updated = harness
        .manager
        .update_session_metadata(
            "s1",
            drost_gateway::runtime::manager::MetadataPatch {
                title: Some("renamed chat".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.metadata.title.as_deref(), Some("renamed chat"));

    // Hydrate drops the in-memory copy and reloads what was persisted.
    let hydrated = harness.manager.hydrate_session("s1").unwrap();
    assert_eq!(hydrated.metadata.title.as_deref(), Some("renamed chat"));
    assert_eq!(hydrated.revision, updated.revision);
}

#[tokio::test]
async fn rename_moves_history() {
    let adapter = Arc::new(ScriptedAdapter::always_text("mock", "reply"));
    let harness = build(
        vec![(text_profile("mock"), adapter)],
        vec![],
        FailoverConfig::default(),
        10,
    );
    harness
        .manager
        .ensure_session("old-name", None, None, None)
        .unwrap();
    harness
        .manager
        .run_turn(request(&harness, "old-name", "hello"))
        .await
        .unwrap();

    harness.manager.rename_session("old-name", "new-name").unwrap();
    let history = harness.manager.get_history("new-name").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        harness.manager.get_history("old-name").unwrap_err().code(),
        "unknown_session"
    );
}

#[tokio::test]
async fn ensure_session_is_idempotent_across_reload() {
    let adapter = Arc::new(ScriptedAdapter::always_text("mock", "x"));
    let harness = build(
        vec![(text_profile("mock"), adapter)],
        vec![],
        FailoverConfig::default(),
        10,
    );

    let created = harness
        .manager
        .ensure_session("s1", None, Some("my chat".into()), None)
        .unwrap();
    assert_eq!(created.metadata.title.as_deref(), Some("my chat"));

    // Second ensure returns the same session untouched.
    let again = harness
        .manager
        .ensure_session("s1", None, Some("other title".into()), None)
        .unwrap();
    assert_eq!(again.metadata.title.as_deref(), Some("my chat"));
    assert_eq!(again.revision, created.revision);
}
