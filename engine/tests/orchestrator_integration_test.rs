//! Integration tests for the conversation orchestrator
//!
//! These tests drive whole runs against scripted providers:
//! - write, shell, answer in three iterations
//! - iteration ceiling
//! - repetition abort in the middle of a batch
//! - denied and unknown calls fed back as error results
//! - generation failure and cancellation

use async_trait::async_trait;
use futures::stream;
use sdk::capability::{Capability, CapabilityContext};
use sdk::types::{CallParams, CapabilityResult, CapabilitySpec, ToolError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use pilot_engine::agent::runner::{Orchestrator, RunOutcome, DENIED_BY_POLICY};
use pilot_engine::agent::{AgentProfile, ContextLimits, EngineContext, LoopPattern, RunConfig};
use pilot_engine::llm::{
    CallRequest, EventStream, GenerationProvider, GenerationRequest, LLMError, ScriptedProvider,
    StreamEvent,
};
use pilot_engine::record::{CallStatus, Role, Session};
use pilot_engine::storage::MemoryStorage;
use pilot_engine::tools::CapabilityRegistry;

/// Capability that counts its invocations
struct Counter {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Capability for Counter {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "count",
            "Increment a counter",
            json!({"type": "object", "properties": {"step": {"type": "integer"}}}),
        )
    }

    async fn execute(
        &self,
        _params: &CallParams,
        _ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CapabilityResult::success("count", n.to_string()))
    }
}

/// Provider whose stream never produces anything
struct HangingProvider;

#[async_trait]
impl GenerationProvider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn stream(&self, _request: GenerationRequest) -> pilot_engine::llm::Result<EventStream> {
        Ok(Box::pin(stream::pending::<
            pilot_engine::llm::Result<StreamEvent>,
        >()))
    }
}

fn call(name: &str, args: serde_json::Value, id: &str) -> pilot_engine::llm::Result<StreamEvent> {
    Ok(StreamEvent::CapabilityCall(
        CallRequest::new(name, args).with_id(id),
    ))
}

fn text(t: &str) -> pilot_engine::llm::Result<StreamEvent> {
    Ok(StreamEvent::TextDelta(t.to_string()))
}

fn auto_approving(max_iterations: usize, loop_detection: bool) -> EngineContext {
    EngineContext::in_memory().with_run_config(RunConfig {
        max_iterations,
        auto_approve: true,
        loop_detection,
        ..RunConfig::default()
    })
}

fn counter_registry() -> (Arc<CapabilityRegistry>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::new(Counter {
        calls: Arc::clone(&calls),
    }));
    (Arc::new(registry), calls)
}

#[tokio::test]
async fn test_write_shell_answer_run() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![
            text("Creating the file."),
            call(
                "write_file",
                json!({"path": "hello.txt", "content": "hello pilot\n"}),
                "w1",
            ),
        ],
        vec![call("run_command", json!({"command": "cat hello.txt"}), "s1")],
        vec![text("The file says hello.")],
    ]));
    let registry = Arc::new(CapabilityRegistry::with_builtins(
        None,
        Duration::from_secs(30),
    ));

    let ctx = auto_approving(10, true);
    let mut orchestrator = Orchestrator::new(
        &ctx,
        Arc::clone(&provider) as Arc<dyn GenerationProvider>,
        registry,
        Session::new("project", dir.path()),
        "test-model",
    );

    let (output, outcome) = orchestrator
        .run_to_completion("create hello.txt and show it", CancellationToken::new())
        .await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(orchestrator.iteration_count(), 3);
    assert!(output.contains("Creating the file."));
    assert!(output.ends_with("The file says hello."));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
        "hello pilot\n"
    );

    let messages = orchestrator
        .history()
        .load(&orchestrator.session().id, None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, Role::User);
    assert!(messages[1..].iter().all(|m| m.role == Role::Assistant));

    let write = messages[1].capability_calls().next().unwrap();
    assert_eq!(write.call_id, "w1");
    assert_eq!(write.state.status, CallStatus::Success);

    let shell = messages[2].capability_calls().next().unwrap();
    assert_eq!(shell.state.status, CallStatus::Success);
    assert!(shell.state.output.as_deref().unwrap().contains("hello pilot"));

    // The last generation saw both calls and both results
    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    let last = &requests[2].context;
    assert_eq!(last.len(), 5);
    assert_eq!(last[0].text(), "create hello.txt and show it");
    let results: Vec<_> = last[4].call_results().collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "s1");
    assert!(!results[0].2);
}

#[tokio::test]
async fn test_iteration_ceiling_stops_run() {
    let (registry, calls) = counter_registry();
    let provider = Arc::new(ScriptedProvider::repeating(vec![call(
        "count",
        json!({}),
        "c",
    )]));
    let ctx = auto_approving(4, false);
    let mut orchestrator = Orchestrator::new(
        &ctx,
        Arc::clone(&provider) as Arc<dyn GenerationProvider>,
        registry,
        Session::new("project", std::env::temp_dir()),
        "test-model",
    );

    let (output, outcome) = orchestrator
        .run_to_completion("count forever", CancellationToken::new())
        .await;

    assert_eq!(outcome, RunOutcome::Stopped);
    assert!(output.contains("[stopped] reached maximum iterations (4)"));
    assert_eq!(provider.calls(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_pruned_context_counts_every_removed_entry() {
    let (registry, _calls) = counter_registry();
    let provider = Arc::new(ScriptedProvider::repeating(vec![call(
        "count",
        json!({}),
        "c",
    )]));
    let ctx = EngineContext::new(
        Arc::new(MemoryStorage::new()),
        RunConfig {
            max_iterations: 6,
            auto_approve: true,
            loop_detection: false,
            ..RunConfig::default()
        },
        ContextLimits {
            max_messages: 20,
            max_tokens: 1,
        },
    );
    let mut orchestrator = Orchestrator::new(
        &ctx,
        Arc::clone(&provider) as Arc<dyn GenerationProvider>,
        registry,
        Session::new("project", std::env::temp_dir()),
        "test-model",
    );

    let (_, outcome) = orchestrator
        .run_to_completion("keep counting", CancellationToken::new())
        .await;
    assert_eq!(outcome, RunOutcome::Stopped);

    // Each iteration adds a call request and its result
    let requests = provider.requests();
    assert_eq!(requests.len(), 6);
    assert_eq!(requests[2].context.len(), 5);
    for (request, removed) in [(&requests[3], 1), (&requests[4], 3), (&requests[5], 5)] {
        let context = &request.context;
        assert_eq!(context.len(), 7);
        assert_eq!(context[0].text(), "keep counting");
        assert_eq!(
            context[1].text(),
            format!("[{} messages removed to save context]", removed)
        );
        let placeholders = context
            .iter()
            .filter(|e| e.text().contains("messages removed"))
            .count();
        assert_eq!(placeholders, 1);
    }
}

#[tokio::test]
async fn test_repetition_aborts_mid_batch() {
    let (registry, calls) = counter_registry();
    let provider = Arc::new(ScriptedProvider::new(vec![vec![
        call("count", json!({"step": 1}), "a"),
        call("count", json!({"step": 1}), "b"),
        call("count", json!({"step": 1}), "c"),
        call("count", json!({"step": 1}), "d"),
    ]]));
    let ctx = auto_approving(10, true);
    let mut orchestrator = Orchestrator::new(
        &ctx,
        Arc::clone(&provider) as Arc<dyn GenerationProvider>,
        registry,
        Session::new("project", std::env::temp_dir()),
        "test-model",
    );

    let (output, outcome) = orchestrator
        .run_to_completion("count", CancellationToken::new())
        .await;

    assert_eq!(
        outcome,
        RunOutcome::Aborted(LoopPattern::Identical {
            name: "count".into(),
            count: 3
        })
    );
    assert!(output.contains("[loop detected]"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(provider.calls(), 1);

    let messages = orchestrator
        .history()
        .load(&orchestrator.session().id, None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    let ids: Vec<_> = messages[1]
        .capability_calls()
        .map(|c| c.call_id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_denied_call_is_fed_back() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![call(
            "write_file",
            json!({"path": "nope.txt", "content": "x"}),
            "w1",
        )],
        vec![text("Understood, I will not write it.")],
    ]));
    // Default prompter denies everything that is not auto-approved
    let ctx = EngineContext::in_memory();
    let mut orchestrator = Orchestrator::new(
        &ctx,
        Arc::clone(&provider) as Arc<dyn GenerationProvider>,
        Arc::new(CapabilityRegistry::with_builtins(None, Duration::from_secs(5))),
        Session::new("project", dir.path()),
        "test-model",
    );

    let (_, outcome) = orchestrator
        .run_to_completion("write nope.txt", CancellationToken::new())
        .await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert!(!dir.path().join("nope.txt").exists());

    let messages = orchestrator
        .history()
        .load(&orchestrator.session().id, None)
        .await
        .unwrap();
    let denied = messages[1].capability_calls().next().unwrap();
    assert_eq!(denied.state.status, CallStatus::Rejected);
    assert_eq!(denied.state.error.as_deref(), Some(DENIED_BY_POLICY));

    let second = &provider.requests()[1].context;
    let (call_id, content, is_error) = second.last().unwrap().call_results().next().unwrap();
    assert_eq!(call_id, "w1");
    assert_eq!(content, DENIED_BY_POLICY);
    assert!(is_error);
}

#[tokio::test]
async fn test_profile_restricts_capabilities() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![call(
            "write_file",
            json!({"path": "plan.txt", "content": "x"}),
            "w1",
        )],
        vec![text("ok")],
    ]));
    let ctx = auto_approving(10, true);
    let mut orchestrator = Orchestrator::new(
        &ctx,
        Arc::clone(&provider) as Arc<dyn GenerationProvider>,
        Arc::new(CapabilityRegistry::with_builtins(None, Duration::from_secs(5))),
        Session::new("project", dir.path()),
        "test-model",
    )
    .with_profile(AgentProfile::plan());

    let (_, outcome) = orchestrator
        .run_to_completion("write a plan", CancellationToken::new())
        .await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert!(!dir.path().join("plan.txt").exists());

    // Only read-only capabilities are offered to the plan agent
    let manifest: Vec<_> = provider.requests()[0]
        .manifest
        .iter()
        .map(|spec| spec.name.clone())
        .collect();
    assert!(manifest.contains(&"read_file".to_string()));
    assert!(!manifest.contains(&"write_file".to_string()));

    let messages = orchestrator
        .history()
        .load(&orchestrator.session().id, None)
        .await
        .unwrap();
    let refused = messages[1].capability_calls().next().unwrap();
    assert_eq!(refused.state.status, CallStatus::Error);
    assert!(refused
        .state
        .error
        .as_deref()
        .unwrap()
        .contains("not available to agent 'plan'"));
}

#[tokio::test]
async fn test_generation_failure_keeps_partial_text() {
    let provider = Arc::new(ScriptedProvider::new(vec![vec![
        text("Half an ans"),
        Err(LLMError::StreamInterrupted("connection reset".into())),
    ]]));
    let (registry, _) = counter_registry();
    let ctx = auto_approving(10, true);
    let mut orchestrator = Orchestrator::new(
        &ctx,
        Arc::clone(&provider) as Arc<dyn GenerationProvider>,
        registry,
        Session::new("project", std::env::temp_dir()),
        "test-model",
    );

    let (output, outcome) = orchestrator
        .run_to_completion("answer", CancellationToken::new())
        .await;

    assert!(matches!(outcome, RunOutcome::Failed(ref reason) if reason.contains("connection reset")));
    assert!(output.starts_with("Half an ans"));
    assert!(output.contains("[error] generation failed"));

    let messages = orchestrator
        .history()
        .load(&orchestrator.session().id, None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].text_content(), "Half an ans");
    assert_eq!(messages[1].error.as_ref().unwrap().kind, "generation");
}

#[tokio::test]
async fn test_cancellation_ends_run() {
    let (registry, _) = counter_registry();
    let ctx = auto_approving(10, true);
    let mut orchestrator = Orchestrator::new(
        &ctx,
        Arc::new(HangingProvider),
        registry,
        Session::new("project", std::env::temp_dir()),
        "test-model",
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let (output, outcome) = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run_to_completion("wait", cancel),
    )
    .await
    .expect("run should end once cancelled");

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(outcome.exit_code(), 130);
    assert!(output.contains("[cancelled]"));

    let last = orchestrator
        .history()
        .last_message(&orchestrator.session().id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.error.unwrap().kind, "cancelled");
}

#[tokio::test]
async fn test_follow_up_turn_sees_earlier_history() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![text("First answer")],
        vec![text("Second answer")],
    ]));
    let (registry, _) = counter_registry();
    let ctx = auto_approving(10, true);
    let mut orchestrator = Orchestrator::new(
        &ctx,
        Arc::clone(&provider) as Arc<dyn GenerationProvider>,
        registry,
        Session::new("project", std::env::temp_dir()),
        "test-model",
    );

    let (_, first) = orchestrator
        .run_to_completion("one", CancellationToken::new())
        .await;
    let (_, second) = orchestrator
        .run_to_completion("two", CancellationToken::new())
        .await;
    assert!(first.is_completed());
    assert!(second.is_completed());

    let context = &provider.requests()[1].context;
    let texts: Vec<String> = context.iter().map(|e| e.text()).collect();
    assert_eq!(texts, vec!["one", "First answer", "two"]);
}
