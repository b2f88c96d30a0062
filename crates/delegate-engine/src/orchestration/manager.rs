//! Subagent orchestration entry point.
//!
//! [`Orchestrator::spawn_subagent`] is the public facade:
//! - waits for the registry to be published, then looks up the subagent type
//! - resolves the model and expansion chain (or keeps an attached identity's)
//! - drives attempts through the executor and stream processor
//! - applies the retry policy between attempts
//! - always returns exactly one [`SubagentResult`]

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use delegate_core::models::{ModelResolution, ModelSelector};
use delegate_core::subagents::SubagentConfig;

use super::progress::{ProgressEvent, ProgressObserver, notify};
use super::retry::{BackoffOutcome, RetryContext, RetryDecision, wait_backoff};
use super::tracking::StateTracker;
use crate::context::EngineContext;
use crate::subprocess::{
    ArgsInput, AttemptOutcome, AttemptReport, DiscoveredIdentity, LaunchIdentity, LaunchSpec,
    RoutingTags, SpawnError, StreamEventProcessor, StreamUpdate, UsageStats, build_args, build_env,
};

/// Error text of an invocation ended by cancellation.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted by user";

/// The delegating agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentContext {
    pub agent_id: Option<String>,
    pub name: Option<String>,
    /// Parent's model handle, used for `inherit` and as the last fallback.
    pub model: Option<String>,
}

/// One delegation request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnRequest {
    pub subagent_type: String,
    pub prompt: String,
    /// Caller override: a concrete handle or a selector token.
    pub model: Option<String>,
    /// Attach to an existing agent (new conversation per attempt).
    pub agent_id: Option<String>,
    /// Attach to an existing conversation.
    pub conversation_id: Option<String>,
    pub parent: ParentContext,
    pub correlation_id: Option<String>,
    pub working_dir: Option<PathBuf>,
}

impl SpawnRequest {
    pub fn new(subagent_type: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            subagent_type: subagent_type.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: ParentContext) -> Self {
        self.parent = parent;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn attach_to_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    #[must_use]
    pub fn attach_to_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub const fn is_attach(&self) -> bool {
        self.agent_id.is_some() || self.conversation_id.is_some()
    }
}

/// Terminal outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentResult {
    /// Empty when no identity was ever discovered.
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub report: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl SubagentResult {
    fn base(identity: &DiscoveredIdentity) -> Self {
        Self {
            agent_id: identity.agent_id.clone().unwrap_or_default(),
            conversation_id: identity.conversation_id.clone(),
            report: String::new(),
            success: false,
            error: None,
            total_tokens: None,
        }
    }

    pub fn failure(identity: &DiscoveredIdentity, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::base(identity)
        }
    }

    pub fn interrupted(identity: &DiscoveredIdentity) -> Self {
        Self::failure(identity, INTERRUPTED_MESSAGE)
    }

    fn completed(identity: &DiscoveredIdentity, report: String, stats: UsageStats) -> Self {
        Self {
            report,
            success: true,
            total_tokens: stats.total_tokens,
            ..Self::base(identity)
        }
    }
}

/// Per-invocation sinks for progress and tracking.
struct Invocation<'a> {
    correlation_id: &'a str,
    observer: Option<&'a dyn ProgressObserver>,
    tracker: &'a dyn StateTracker,
}

impl Invocation<'_> {
    fn notify(&self, event: &ProgressEvent) {
        notify(self.observer, self.correlation_id, event);
    }

    fn publish(&self, update: StreamUpdate) {
        match update {
            StreamUpdate::IdentityDiscovered(identity) => {
                info!(
                    agent_id = ?identity.agent_id,
                    conversation_id = ?identity.conversation_id,
                    "Subagent identity discovered"
                );
                if let Err(e) = self.tracker.register_identity(self.correlation_id, &identity) {
                    warn!(error = %e, "State tracker rejected identity");
                }
                self.notify(&ProgressEvent::IdentityDiscovered {
                    agent_id: identity.agent_id,
                    conversation_id: identity.conversation_id,
                });
            }
            StreamUpdate::ToolCallReported(call) => {
                if let Err(e) = self.tracker.record_tool_call(self.correlation_id, &call) {
                    warn!(error = %e, tool_call_id = %call.id, "State tracker rejected tool call");
                }
                self.notify(&ProgressEvent::ToolCall {
                    id: call.id,
                    name: call.name,
                    args: call.args,
                });
            }
        }
    }

    fn record_stats(&self, stats: &UsageStats) {
        if let Err(e) = self.tracker.record_stats(self.correlation_id, stats) {
            warn!(error = %e, "State tracker rejected stats");
        }
    }
}

/// Drives subagent invocations against one [`EngineContext`].
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<EngineContext>,
}

impl Orchestrator {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Run one subagent to completion. Never fails: every error becomes a
    /// `SubagentResult` with `success == false`.
    pub async fn spawn_subagent(
        &self,
        request: SpawnRequest,
        observer: Option<Arc<dyn ProgressObserver>>,
        cancel: &CancellationToken,
    ) -> SubagentResult {
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = info_span!(
            "subagent",
            correlation_id = %correlation_id,
            subagent_type = %request.subagent_type
        );
        let invocation = Invocation {
            correlation_id: &correlation_id,
            observer: observer.as_deref(),
            tracker: self.ctx.tracker.as_ref(),
        };
        self.run(&request, &invocation, cancel).instrument(span).await
    }

    /// Run several requests concurrently; results come back in request order.
    pub async fn spawn_many(
        &self,
        requests: Vec<SpawnRequest>,
        observer: Option<Arc<dyn ProgressObserver>>,
        cancel: &CancellationToken,
    ) -> Vec<SubagentResult> {
        let count = requests.len();
        let mut tasks = JoinSet::new();
        for (index, request) in requests.into_iter().enumerate() {
            let orchestrator = self.clone();
            let observer = observer.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = orchestrator.spawn_subagent(request, observer, &cancel).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<SubagentResult>> = vec![None; count];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!(error = %e, "Subagent task failed"),
            }
        }
        results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| {
                    SubagentResult::failure(&DiscoveredIdentity::default(), "Subagent task panicked")
                })
            })
            .collect()
    }

    #[allow(clippy::too_many_lines)]
    async fn run(
        &self,
        request: &SpawnRequest,
        invocation: &Invocation<'_>,
        cancel: &CancellationToken,
    ) -> SubagentResult {
        let snapshot = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("Cancelled while waiting for subagent definitions");
                return SubagentResult::interrupted(&DiscoveredIdentity::default());
            }
            snapshot = self.ctx.registry.wait_ready() => snapshot,
        };
        let Some(subagent) = snapshot.get(&request.subagent_type).cloned() else {
            warn!("Unknown subagent type");
            return SubagentResult::failure(
                &DiscoveredIdentity::default(),
                format!("Unknown subagent type: {}", request.subagent_type),
            );
        };

        let (mut retry_ctx, prompt) = if request.is_attach() {
            let label = request
                .model
                .clone()
                .unwrap_or_else(|| subagent.tier_label());
            invocation.notify(&ProgressEvent::ModelSelected {
                model: label,
                chain: Vec::new(),
                display_only: true,
            });
            let identity = DiscoveredIdentity {
                agent_id: request.agent_id.clone(),
                conversation_id: request.conversation_id.clone(),
            };
            (
                RetryContext::attach(identity),
                delegation_note(request, &subagent),
            )
        } else {
            let resolution = self.resolve_model(request, &subagent).await;
            info!(
                model = %resolution.resolved_handle,
                chain = ?resolution.expansion_chain,
                "Model selected"
            );
            invocation.notify(&ProgressEvent::ModelSelected {
                model: resolution.resolved_handle.clone(),
                chain: resolution.expansion_chain.clone(),
                display_only: false,
            });
            (
                RetryContext::new_identity(&resolution, request.parent.model.clone()),
                request.prompt.clone(),
            )
        };

        loop {
            if cancel.is_cancelled() {
                info!("Cancelled before spawn");
                return SubagentResult::interrupted(retry_ctx.identity());
            }

            let attempt = retry_ctx.begin_attempt();
            let Some(identity) = retry_ctx.launch_identity() else {
                return SubagentResult::failure(retry_ctx.identity(), "No model available");
            };
            let spec = self.launch_spec(request, &subagent, &identity, &prompt, invocation);
            info!(
                attempt,
                model = ?retry_ctx.current_model(),
                resume = !identity.is_new() && !retry_ctx.is_attach(),
                "Starting attempt"
            );

            let report = match self.run_attempt(&spec, invocation, cancel).await {
                Ok(report) => report,
                Err(e) => {
                    error!(attempt, error = %e, "Failed to spawn subagent");
                    return SubagentResult::failure(retry_ctx.identity(), e.to_string());
                }
            };
            retry_ctx.record_identity(&report.identity);
            if let Some(stats) = &report.stats {
                invocation.record_stats(stats);
            }

            let failure = match report.outcome {
                AttemptOutcome::Completed(success) => {
                    info!(
                        attempt,
                        duration_ms = success.stats.duration_ms,
                        total_tokens = ?success.stats.total_tokens,
                        "Subagent completed"
                    );
                    return SubagentResult::completed(
                        retry_ctx.identity(),
                        success.report,
                        success.stats,
                    );
                }
                AttemptOutcome::Interrupted => {
                    info!(attempt, "Subagent interrupted");
                    return SubagentResult::interrupted(retry_ctx.identity());
                }
                AttemptOutcome::Failed(failure) => failure,
            };

            let previous_model = retry_ctx.current_model().map(String::from);
            let (kind, decision) = self.ctx.retry.decide(&mut retry_ctx, &failure);
            match decision {
                RetryDecision::Stop => {
                    return SubagentResult::failure(retry_ctx.identity(), failure.message);
                }
                RetryDecision::SwitchModel { model, to_parent } => {
                    info!(attempt, kind = %kind, to_model = %model, to_parent, "Switching model");
                    invocation.notify(&ProgressEvent::Fallback {
                        attempt,
                        kind,
                        from_model: previous_model,
                        to_model: model,
                        reason: failure.message,
                    });
                }
                RetryDecision::RetrySameModel { delay, resume } => {
                    invocation.notify(&ProgressEvent::Retry {
                        attempt,
                        kind,
                        resume,
                        reason: failure.message,
                    });
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    info!(attempt, delay_ms, resume, "Backing off before retry");
                    invocation.notify(&ProgressEvent::Backoff { attempt, delay_ms });
                    if wait_backoff(delay, cancel).await == BackoffOutcome::Cancelled {
                        info!("Cancelled during backoff");
                        return SubagentResult::interrupted(retry_ctx.identity());
                    }
                }
            }
        }
    }

    /// Concrete override as-is, selector override via the remote resolver,
    /// else the subagent's own selectors.
    async fn resolve_model(&self, request: &SpawnRequest, subagent: &SubagentConfig) -> ModelResolution {
        let parent = request.parent.model.as_deref();
        let resolver = &self.ctx.resolver;
        match request.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            Some(handle) if ModelSelector::is_concrete(handle) => ModelResolution::single(handle),
            Some(token) => match resolver.resolve_remote(&[token.to_string()], parent).await {
                Ok(resolution) => resolution,
                Err(e) => {
                    warn!(selector = token, error = %e, "Override resolution failed, using subagent selectors");
                    resolver.resolve(&subagent.selectors(), parent).await
                }
            },
            None => resolver.resolve(&subagent.selectors(), parent).await,
        }
    }

    fn launch_spec(
        &self,
        request: &SpawnRequest,
        subagent: &SubagentConfig,
        identity: &LaunchIdentity,
        prompt: &str,
        invocation: &Invocation<'_>,
    ) -> LaunchSpec {
        let permissions = self.ctx.permissions.snapshot();
        let args = build_args(&ArgsInput {
            identity,
            prompt,
            subagent,
            permissions: &permissions,
            default_max_turns: self.ctx.engine.max_turns,
        });
        let env = build_env(
            &self.ctx.engine,
            &RoutingTags {
                subagent_type: &subagent.name,
                correlation_id: invocation.correlation_id,
                parent_agent_id: request.parent.agent_id.as_deref(),
            },
            |key| std::env::var(key).ok(),
        );
        LaunchSpec {
            program: self.ctx.engine.child_bin.clone(),
            args,
            env,
            working_dir: request.working_dir.clone(),
        }
    }

    async fn run_attempt(
        &self,
        spec: &LaunchSpec,
        invocation: &Invocation<'_>,
        cancel: &CancellationToken,
    ) -> Result<AttemptReport, SpawnError> {
        let mut processor = StreamEventProcessor::new();
        let exit = {
            let mut on_line = |line: &str| {
                for update in processor.process_line(line) {
                    invocation.publish(update);
                }
            };
            self.ctx.executor.run_attempt(spec, &mut on_line, cancel).await?
        };
        info!(exit = ?exit.exit, "Attempt finished");

        let (updates, report) = processor.finish(&exit);
        for update in updates {
            invocation.publish(update);
        }
        Ok(report)
    }
}

/// Provenance note prepended when delegating to an existing identity.
fn delegation_note(request: &SpawnRequest, subagent: &SubagentConfig) -> String {
    let parent = request.parent.name.as_deref().unwrap_or("the parent agent");
    let parent_id = request
        .parent
        .agent_id
        .as_deref()
        .map(|id| format!(" ({id})"))
        .unwrap_or_default();
    let tier = request
        .model
        .clone()
        .unwrap_or_else(|| subagent.tier_label());
    format!(
        "[Delegated task from {parent}{parent_id} to a `{}` subagent, capability tier `{tier}`]\n\n{}",
        subagent.name, request.prompt
    )
}
