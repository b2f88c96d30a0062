#![allow(clippy::unwrap_used, clippy::panic)] // Integration tests use unwrap for brevity

//! End-to-end orchestration tests against a scripted attempt executor.
//!
//! No real processes are spawned: each attempt is answered by a script that
//! chooses stdout lines and an exit from the launch spec it receives.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use delegate_core::config::Config;
use delegate_core::models::ModelResolution;
use delegate_core::subagents::{SubagentRegistry, builtin_subagents};
use delegate_engine::orchestration::{
    FailureKind, InMemoryStateTracker, ObserverError, ProgressEvent, ProgressObserver,
    StateTracker,
};
use delegate_engine::resolver::{ModelResolver, ResolveError, ResolveRequest};
use delegate_engine::subprocess::{
    AttemptExecutor, ExitReport, LaunchSpec, ProcessExit, SpawnError,
};
use delegate_engine::{EngineContext, Orchestrator, ParentContext, SpawnRequest};

const RESULT_DONE: &str = r#"{"type":"result","subtype":"success","result":"done","is_error":false,"duration_ms":120,"usage":{"total_tokens":42}}"#;

/// How the fake child behaves for one attempt.
enum Script {
    Exit {
        lines: Vec<String>,
        code: i32,
        stderr: String,
    },
    /// Run until cancelled, after emitting `lines`.
    Hang { lines: Vec<String> },
}

impl Script {
    fn success(lines: &[&str]) -> Self {
        Self::Exit {
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
            code: 0,
            stderr: String::new(),
        }
    }

    fn failure(lines: &[&str], stderr: &str) -> Self {
        Self::Exit {
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
            code: 1,
            stderr: stderr.to_string(),
        }
    }
}

type Responder = dyn Fn(&LaunchSpec, usize) -> Script + Send + Sync;

struct ScriptedExecutor {
    launches: Mutex<Vec<LaunchSpec>>,
    respond: Box<Responder>,
}

impl ScriptedExecutor {
    fn new(respond: impl Fn(&LaunchSpec, usize) -> Script + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            launches: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttemptExecutor for ScriptedExecutor {
    async fn run_attempt(
        &self,
        spec: &LaunchSpec,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ExitReport, SpawnError> {
        let index = {
            let mut launches = self.launches.lock().unwrap();
            launches.push(spec.clone());
            launches.len() - 1
        };
        match (self.respond)(spec, index) {
            Script::Exit {
                lines,
                code,
                stderr,
            } => {
                for line in &lines {
                    on_line(line);
                }
                Ok(ExitReport {
                    exit: ProcessExit::Exited { code: Some(code) },
                    stderr,
                })
            }
            Script::Hang { lines } => {
                for line in &lines {
                    on_line(line);
                }
                cancel.cancelled().await;
                Ok(ExitReport {
                    exit: ProcessExit::Interrupted,
                    stderr: String::new(),
                })
            }
        }
    }
}

/// Remote resolver answering every request with the same chain.
struct FixedChain(Vec<String>);

#[async_trait]
impl ModelResolver for FixedChain {
    async fn resolve(&self, _request: &ResolveRequest) -> Result<ModelResolution, ResolveError> {
        Ok(ModelResolution {
            resolved_handle: self.0[0].clone(),
            expansion_chain: self.0.clone(),
        })
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<ProgressEvent>>);

impl Recorder {
    fn events(&self) -> Vec<ProgressEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl ProgressObserver for Recorder {
    fn on_event(&self, _: &str, event: &ProgressEvent) -> Result<(), ObserverError> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct Panicking;

impl ProgressObserver for Panicking {
    fn on_event(&self, _: &str, _: &ProgressEvent) -> Result<(), ObserverError> {
        panic!("observer blew up");
    }
}

fn fast_retry_config() -> Config {
    let mut config = Config::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.retry.max_jitter_ms = 0;
    config
}

fn orchestrator(config: &Config, executor: Arc<ScriptedExecutor>) -> Orchestrator {
    let registry = Arc::new(SubagentRegistry::with_agents(builtin_subagents()));
    Orchestrator::new(EngineContext::new(config, registry, executor))
}

fn orchestrator_with_chain(
    config: &Config,
    executor: Arc<ScriptedExecutor>,
    chain: &[&str],
) -> Orchestrator {
    let registry = Arc::new(SubagentRegistry::with_agents(builtin_subagents()));
    let remote = FixedChain(chain.iter().map(|m| (*m).to_string()).collect());
    Orchestrator::new(
        EngineContext::new(config, registry, executor).with_model_resolver(Arc::new(remote)),
    )
}

fn arg_after<'a>(spec: &'a LaunchSpec, flag: &str) -> Option<&'a str> {
    spec.args
        .iter()
        .position(|a| a == flag)
        .and_then(|i| spec.args.get(i + 1))
        .map(String::as_str)
}

fn env_value<'a>(spec: &'a LaunchSpec, key: &str) -> Option<&'a str> {
    spec.env
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[tokio::test]
async fn unknown_type_fails_without_spawning() {
    let executor = ScriptedExecutor::new(|_, _| Script::success(&[RESULT_DONE]));
    let orch = orchestrator(&Config::default(), Arc::clone(&executor));

    let result = orch
        .spawn_subagent(SpawnRequest::new("ghost", "hi"), None, &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Unknown subagent type: ghost"));
    assert!(executor.launches().is_empty());
}

#[tokio::test]
async fn spawn_waits_for_the_registry_to_be_published() {
    let executor = ScriptedExecutor::new(|_, _| Script::success(&[RESULT_DONE]));
    let registry = Arc::new(SubagentRegistry::new());
    let orch = Orchestrator::new(EngineContext::new(
        &Config::default(),
        Arc::clone(&registry),
        Arc::clone(&executor) as Arc<dyn AttemptExecutor>,
    ));

    let publisher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.publish(builtin_subagents());
    });
    let result = orch
        .spawn_subagent(SpawnRequest::new("explore", "scan"), None, &CancellationToken::new())
        .await;
    publisher.await.unwrap();

    assert!(result.success, "{result:?}");
    assert_eq!(executor.launches().len(), 1);
}

#[tokio::test]
async fn cancellation_while_registry_is_unpublished_is_interrupted() {
    let executor = ScriptedExecutor::new(|_, _| Script::success(&[RESULT_DONE]));
    let orch = Orchestrator::new(EngineContext::new(
        &Config::default(),
        Arc::new(SubagentRegistry::new()),
        Arc::clone(&executor) as Arc<dyn AttemptExecutor>,
    ));
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let result = orch
        .spawn_subagent(SpawnRequest::new("explore", "scan"), None, &cancel)
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Interrupted by user"));
    assert!(executor.launches().is_empty());
}

#[tokio::test]
async fn successful_result_is_reported_with_usage() {
    let executor = ScriptedExecutor::new(|_, _| Script::success(&[RESULT_DONE]));
    let orch = orchestrator(&Config::default(), Arc::clone(&executor));

    let result = orch
        .spawn_subagent(SpawnRequest::new("explore", "find main"), None, &CancellationToken::new())
        .await;

    assert!(result.success);
    assert_eq!(result.report, "done");
    assert_eq!(result.total_tokens, Some(42));
    assert_eq!(result.error, None);

    let launches = executor.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(arg_after(&launches[0], "-p"), Some("find main"));
    assert_eq!(arg_after(&launches[0], "--output-format"), Some("stream-json"));
    assert_eq!(env_value(&launches[0], "DELEGATE_ROLE"), Some("subagent"));
    assert_eq!(env_value(&launches[0], "DELEGATE_SUBAGENT_TYPE"), Some("explore"));
}

#[tokio::test]
async fn rate_limit_advances_to_next_model_exactly_once() {
    let executor = ScriptedExecutor::new(|_, index| {
        if index == 0 {
            Script::failure(&[], "Error: 429 Too Many Requests")
        } else {
            Script::success(&[RESULT_DONE])
        }
    });
    let orch = orchestrator_with_chain(
        &fast_retry_config(),
        Arc::clone(&executor),
        &["provider-a/fast", "provider-b/fast"],
    );
    let recorder = Arc::new(Recorder::default());

    let result = orch
        .spawn_subagent(
            SpawnRequest::new("explore", "scan"),
            Some(Arc::clone(&recorder) as Arc<dyn ProgressObserver>),
            &CancellationToken::new(),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.report, "done");

    let launches = executor.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(arg_after(&launches[0], "--model"), Some("provider-a/fast"));
    assert_eq!(arg_after(&launches[1], "--model"), Some("provider-b/fast"));
    assert!(launches[1].args.iter().any(|a| a == "--new-agent"));

    let fallback = recorder
        .events()
        .into_iter()
        .find(|e| matches!(e, ProgressEvent::Fallback { .. }))
        .unwrap();
    let ProgressEvent::Fallback {
        kind,
        from_model,
        to_model,
        ..
    } = fallback
    else {
        unreachable!()
    };
    assert_eq!(kind, FailureKind::RateLimited);
    assert_eq!(from_model.as_deref(), Some("provider-a/fast"));
    assert_eq!(to_model, "provider-b/fast");
}

#[tokio::test]
async fn rate_limit_after_advancing_the_chain_is_final() {
    let executor = ScriptedExecutor::new(|_, _| Script::failure(&[], "rate limit exceeded"));
    let config = fast_retry_config();
    assert!(config.retry.max_retries > 0);
    let orch = orchestrator_with_chain(
        &config,
        Arc::clone(&executor),
        &["provider-a/fast", "provider-b/fast"],
    );

    let result = orch
        .spawn_subagent(SpawnRequest::new("explore", "scan"), None, &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("rate limit exceeded"));
    let models: Vec<_> = executor
        .launches()
        .iter()
        .map(|spec| arg_after(spec, "--model").map(String::from))
        .collect();
    assert_eq!(
        models,
        vec![Some("provider-a/fast".to_string()), Some("provider-b/fast".to_string())]
    );
}

#[tokio::test]
async fn cancellation_mid_execution_is_interrupted_without_retry() {
    let executor = ScriptedExecutor::new(|_, _| Script::Hang {
        lines: vec![r#"{"type":"init","agent_id":"agent-1"}"#.to_string()],
    });
    let orch = orchestrator(&fast_retry_config(), Arc::clone(&executor));
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let result = orch
        .spawn_subagent(SpawnRequest::new("explore", "scan"), None, &cancel)
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Interrupted by user"));
    assert_eq!(result.agent_id, "agent-1");
    assert_eq!(executor.launches().len(), 1);
}

#[tokio::test]
async fn cancelled_before_spawn_never_launches() {
    let executor = ScriptedExecutor::new(|_, _| Script::success(&[RESULT_DONE]));
    let orch = orchestrator(&Config::default(), Arc::clone(&executor));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orch
        .spawn_subagent(SpawnRequest::new("explore", "scan"), None, &cancel)
        .await;

    assert_eq!(result.error.as_deref(), Some("Interrupted by user"));
    assert!(executor.launches().is_empty());
}

#[tokio::test]
async fn cancellation_during_backoff_returns_promptly() {
    let executor = ScriptedExecutor::new(|_, _| Script::failure(&[], "connection reset by peer"));
    let mut config = Config::default();
    config.retry.base_delay_ms = 60_000;
    config.retry.max_delay_ms = 60_000;
    config.retry.max_jitter_ms = 0;
    let orch = orchestrator(&config, Arc::clone(&executor));
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = orch
        .spawn_subagent(SpawnRequest::new("explore", "scan"), None, &cancel)
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.error.as_deref(), Some("Interrupted by user"));
    assert_eq!(executor.launches().len(), 1);
}

#[tokio::test]
async fn transient_failure_resumes_discovered_conversation() {
    let executor = ScriptedExecutor::new(|_, index| {
        if index == 0 {
            Script::failure(
                &[r#"{"type":"init","agent_id":"agent-1","conversation_id":"conv-1"}"#],
                "ECONNRESET",
            )
        } else {
            Script::success(&[RESULT_DONE])
        }
    });
    let orch = orchestrator(&fast_retry_config(), Arc::clone(&executor));
    let recorder = Arc::new(Recorder::default());

    let result = orch
        .spawn_subagent(
            SpawnRequest::new("explore", "scan"),
            Some(Arc::clone(&recorder) as Arc<dyn ProgressObserver>),
            &CancellationToken::new(),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.agent_id, "agent-1");
    assert_eq!(result.conversation_id.as_deref(), Some("conv-1"));

    let launches = executor.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(arg_after(&launches[1], "--conversation"), Some("conv-1"));
    assert!(!launches[1].args.iter().any(|a| a == "--new-agent"));

    let events = recorder.events();
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Retry {
            kind: FailureKind::TransientTransport,
            resume: true,
            ..
        }
    )));
    assert!(events.iter().any(|e| matches!(e, ProgressEvent::Backoff { attempt: 1, .. })));
}

#[tokio::test]
async fn transient_failures_stop_after_retry_budget() {
    let executor = ScriptedExecutor::new(|_, _| Script::failure(&[], "503 Service Unavailable"));
    let orch = orchestrator(&fast_retry_config(), Arc::clone(&executor));

    let result = orch
        .spawn_subagent(SpawnRequest::new("explore", "scan"), None, &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("503 Service Unavailable"));
    // First attempt plus the default budget of two retries.
    assert_eq!(executor.launches().len(), 3);
}

#[tokio::test]
async fn generic_failure_is_not_retried() {
    let executor = ScriptedExecutor::new(|_, _| Script::failure(&[], "segfault in tool runner"));
    let orch = orchestrator(&fast_retry_config(), Arc::clone(&executor));

    let result = orch
        .spawn_subagent(SpawnRequest::new("explore", "scan"), None, &CancellationToken::new())
        .await;

    assert_eq!(result.error.as_deref(), Some("segfault in tool runner"));
    assert_eq!(executor.launches().len(), 1);
}

#[tokio::test]
async fn unknown_model_falls_back_to_parent_model() {
    let executor = ScriptedExecutor::new(|spec, _| {
        if arg_after(spec, "--model") == Some("provider-a/fast") {
            Script::failure(
                &[r#"{"type":"result","subtype":"error","is_error":true,"error":"Unknown model: provider-a/fast"}"#],
                "",
            )
        } else {
            Script::success(&[RESULT_DONE])
        }
    });
    let orch = orchestrator_with_chain(&fast_retry_config(), Arc::clone(&executor), &["provider-a/fast"]);
    let request = SpawnRequest::new("explore", "scan").with_parent(ParentContext {
        agent_id: Some("agent-parent".into()),
        name: None,
        model: Some("parent/model".into()),
    });

    let result = orch
        .spawn_subagent(request, None, &CancellationToken::new())
        .await;

    assert!(result.success);
    let launches = executor.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(arg_after(&launches[1], "--model"), Some("parent/model"));
    assert_eq!(
        env_value(&launches[1], "DELEGATE_PARENT_AGENT_ID"),
        Some("agent-parent")
    );
}

#[tokio::test]
async fn unknown_model_switches_model_only_once() {
    let executor = ScriptedExecutor::new(|spec, _| {
        let model = arg_after(spec, "--model").unwrap_or_default().to_string();
        Script::failure(&[], &format!("Unknown model: {model}"))
    });
    let orch = orchestrator_with_chain(
        &fast_retry_config(),
        Arc::clone(&executor),
        &["a/one", "b/two", "c/three"],
    );
    let request = SpawnRequest::new("explore", "scan").with_parent(ParentContext {
        agent_id: None,
        name: None,
        model: Some("p/parent".into()),
    });

    let result = orch
        .spawn_subagent(request, None, &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Unknown model: b/two"));
    let launches = executor.launches();
    let models: Vec<_> = launches.iter().map(|spec| arg_after(spec, "--model")).collect();
    assert_eq!(models, vec![Some("a/one"), Some("b/two")]);
}

#[tokio::test]
async fn concrete_model_override_skips_resolution() {
    let executor = ScriptedExecutor::new(|_, _| Script::success(&[RESULT_DONE]));
    let orch = orchestrator_with_chain(&Config::default(), Arc::clone(&executor), &["provider-a/fast"]);

    let result = orch
        .spawn_subagent(
            SpawnRequest::new("explore", "scan").with_model("custom/model"),
            None,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.success);
    assert_eq!(arg_after(&executor.launches()[0], "--model"), Some("custom/model"));
}

#[tokio::test]
async fn tool_calls_and_identity_reach_the_tracker_once() {
    let tool_call = r#"{"type":"message","message_type":"tool_call_message","tool_call":{"tool_call_id":"t1","name":"Read","arguments":"{\"path\":\"a.rs\"}"}}"#;
    let executor = ScriptedExecutor::new(move |_, _| {
        Script::success(&[
            r#"{"type":"init","agent_id":"agent-1","conversation_id":"conv-1"}"#,
            tool_call,
            r#"{"type":"auto_approval","tool_call":{"tool_call_id":"t1"}}"#,
            RESULT_DONE,
        ])
    });
    let registry = Arc::new(SubagentRegistry::with_agents(builtin_subagents()));
    let tracker = Arc::new(InMemoryStateTracker::new());
    let ctx = EngineContext::new(
        &Config::default(),
        registry,
        Arc::clone(&executor) as Arc<dyn AttemptExecutor>,
    )
    .with_tracker(Arc::clone(&tracker) as Arc<dyn StateTracker>);
    let orch = Orchestrator::new(ctx);
    let recorder = Arc::new(Recorder::default());

    let result = orch
        .spawn_subagent(
            SpawnRequest::new("explore", "scan").with_correlation_id("corr-1"),
            Some(Arc::clone(&recorder) as Arc<dyn ProgressObserver>),
            &CancellationToken::new(),
        )
        .await;
    assert!(result.success);

    let tracked = tracker.get("corr-1").unwrap();
    assert_eq!(tracked.identity.agent_id.as_deref(), Some("agent-1"));
    assert_eq!(tracked.tool_calls.len(), 1);
    assert_eq!(tracked.tool_calls[0].args, r#"{"path":"a.rs"}"#);
    assert_eq!(tracked.stats.and_then(|s| s.total_tokens), Some(42));

    let tool_events = recorder
        .events()
        .into_iter()
        .filter(|e| matches!(e, ProgressEvent::ToolCall { .. }))
        .count();
    assert_eq!(tool_events, 1);
    assert_eq!(
        env_value(&executor.launches()[0], "DELEGATE_CORRELATION_ID"),
        Some("corr-1")
    );
}

#[tokio::test]
async fn panicking_observer_does_not_abort_the_invocation() {
    let executor = ScriptedExecutor::new(|_, _| Script::success(&[RESULT_DONE]));
    let orch = orchestrator(&Config::default(), executor);

    let result = orch
        .spawn_subagent(
            SpawnRequest::new("explore", "scan"),
            Some(Arc::new(Panicking) as Arc<dyn ProgressObserver>),
            &CancellationToken::new(),
        )
        .await;

    assert!(result.success);
}

#[tokio::test]
async fn attach_mode_resumes_agent_with_delegation_note() {
    let executor = ScriptedExecutor::new(|_, _| Script::success(&[RESULT_DONE]));
    let orch = orchestrator(&Config::default(), Arc::clone(&executor));
    let recorder = Arc::new(Recorder::default());
    let request = SpawnRequest::new("explore", "look again")
        .attach_to_agent("agent-7")
        .with_parent(ParentContext {
            agent_id: None,
            name: Some("Lead".into()),
            model: None,
        });

    let result = orch
        .spawn_subagent(
            request,
            Some(Arc::clone(&recorder) as Arc<dyn ProgressObserver>),
            &CancellationToken::new(),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.agent_id, "agent-7");

    let launch = &executor.launches()[0];
    assert_eq!(arg_after(launch, "--agent"), Some("agent-7"));
    assert!(launch.args.iter().any(|a| a == "--new"));
    assert!(!launch.args.iter().any(|a| a == "--model"));
    let prompt = arg_after(launch, "-p").unwrap();
    assert!(prompt.starts_with("[Delegated task from Lead"));
    assert!(prompt.ends_with("look again"));

    assert!(matches!(
        recorder.events().first(),
        Some(ProgressEvent::ModelSelected {
            display_only: true,
            ..
        })
    ));
}

#[tokio::test]
async fn spawn_many_returns_results_in_request_order() {
    let executor = ScriptedExecutor::new(|spec, _| {
        let prompt = arg_after(spec, "-p").unwrap_or_default();
        let line = serde_json::json!({
            "type": "result",
            "subtype": "success",
            "is_error": false,
            "result": format!("answer to {prompt}"),
        })
        .to_string();
        Script::success(&[line.as_str()])
    });
    let orch = orchestrator(&Config::default(), Arc::clone(&executor));

    let requests = vec![
        SpawnRequest::new("explore", "one"),
        SpawnRequest::new("ghost", "two"),
        SpawnRequest::new("plan", "three"),
    ];
    let results = orch
        .spawn_many(requests, None, &CancellationToken::new())
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].report, "answer to one");
    assert_eq!(results[1].error.as_deref(), Some("Unknown subagent type: ghost"));
    assert_eq!(results[2].report, "answer to three");
    assert_eq!(executor.launches().len(), 2);
}
