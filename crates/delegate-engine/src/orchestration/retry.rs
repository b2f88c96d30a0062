//! Retry and model-fallback policy.
//!
//! Two loops share one [`RetryContext`]:
//! - the model chain: a model-availability failure of the first attempt, or
//!   a first rate limit, moves to the next expansion-chain entry (or the
//!   parent's model) with a fresh identity, no delay;
//! - the outer loop: rate-limit and transport failures retry the current
//!   model, resuming the discovered identity, after an exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use delegate_core::config::RetrySettings;
use delegate_core::models::ModelResolution;

use super::classifier::{FailureClassifier, FailureKind};
use crate::subprocess::{AttemptFailure, DiscoveredIdentity, LaunchIdentity};

/// Same-model retry budget and backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_jitter: Duration::from_millis(settings.max_jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before same-model retry number `retry` (1-based), without jitter.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// [`Self::delay_for_retry`] plus uniform jitter in `[0, max_jitter]`.
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        let max_jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = rand::rng().random_range(0..=max_jitter_ms);
        self.delay_for_retry(retry) + Duration::from_millis(jitter)
    }
}

/// Mutable retry state of one invocation.
#[derive(Debug, Clone)]
pub struct RetryContext {
    attempt: u32,
    chain: Vec<String>,
    chain_index: usize,
    outer_retries: u32,
    identity: DiscoveredIdentity,
    attach: bool,
    parent_model: Option<String>,
    fell_back_to_parent: bool,
    /// A rate limit already moved this invocation along the chain.
    rate_limit_advanced: bool,
}

impl RetryContext {
    /// Context for a new identity starting at the head of `resolution`'s chain.
    pub fn new_identity(resolution: &ModelResolution, parent_model: Option<String>) -> Self {
        Self {
            attempt: 0,
            chain: resolution.expansion_chain.clone(),
            chain_index: 0,
            outer_retries: 0,
            identity: DiscoveredIdentity::default(),
            attach: false,
            parent_model,
            fell_back_to_parent: false,
            rate_limit_advanced: false,
        }
    }

    /// Context for an existing identity, which keeps its own model.
    pub fn attach(identity: DiscoveredIdentity) -> Self {
        Self {
            attempt: 0,
            chain: Vec::new(),
            chain_index: 0,
            outer_retries: 0,
            identity,
            attach: true,
            parent_model: None,
            fell_back_to_parent: false,
            rate_limit_advanced: false,
        }
    }

    /// Start the next attempt, returning its 1-based number.
    pub const fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub const fn outer_retries(&self) -> u32 {
        self.outer_retries
    }

    pub const fn is_attach(&self) -> bool {
        self.attach
    }

    /// Model of the current chain entry; `None` when attached.
    pub fn current_model(&self) -> Option<&str> {
        self.chain.get(self.chain_index).map(String::as_str)
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    pub const fn identity(&self) -> &DiscoveredIdentity {
        &self.identity
    }

    /// Remember what an attempt discovered so a same-model retry can resume it.
    pub fn record_identity(&mut self, discovered: &DiscoveredIdentity) {
        if discovered.agent_id.is_some() {
            self.identity.agent_id.clone_from(&discovered.agent_id);
        }
        if discovered.conversation_id.is_some() {
            self.identity
                .conversation_id
                .clone_from(&discovered.conversation_id);
        }
    }

    /// Identity flags for the next attempt: resume if known, else start fresh.
    pub fn launch_identity(&self) -> Option<LaunchIdentity> {
        if let Some(conversation) = &self.identity.conversation_id {
            return Some(LaunchIdentity::Conversation(conversation.clone()));
        }
        if let Some(agent) = &self.identity.agent_id {
            return Some(LaunchIdentity::Agent(agent.clone()));
        }
        self.current_model().map(|model| LaunchIdentity::New {
            model: model.to_string(),
        })
    }

    fn advance_chain(&mut self) -> Option<String> {
        if self.chain_index + 1 >= self.chain.len() {
            return None;
        }
        self.chain_index += 1;
        self.identity = DiscoveredIdentity::default();
        self.current_model().map(String::from)
    }

    fn fall_back_to_parent(&mut self) -> Option<String> {
        if self.fell_back_to_parent {
            return None;
        }
        let parent = self.parent_model.clone()?;
        if self.current_model() == Some(parent.as_str()) {
            return None;
        }
        self.fell_back_to_parent = true;
        self.chain = vec![parent.clone()];
        self.chain_index = 0;
        self.identity = DiscoveredIdentity::default();
        Some(parent)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Surface the failure.
    Stop,
    /// Switch model with a fresh identity.
    SwitchModel { model: String, to_parent: bool },
    /// Retry the same model after `delay`.
    RetrySameModel { delay: Duration, resume: bool },
}

/// How a backoff wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffOutcome {
    Elapsed,
    Cancelled,
}

/// Classifies failures and applies the retry policy.
#[derive(Clone)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
    classifier: Arc<dyn FailureClassifier>,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy, classifier: Arc<dyn FailureClassifier>) -> Self {
        Self { policy, classifier }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn classify(&self, failure: &AttemptFailure) -> FailureKind {
        self.classifier.classify(&failure.diagnostic_text())
    }

    /// Classify `failure` and decide the next step, updating `ctx`.
    pub fn decide(&self, ctx: &mut RetryContext, failure: &AttemptFailure) -> (FailureKind, RetryDecision) {
        let kind = self.classify(failure);
        let decision = self.decide_for(ctx, kind);
        info!(
            attempt = ctx.attempt,
            kind = %kind,
            ?decision,
            "Attempt failed"
        );
        (kind, decision)
    }

    fn decide_for(&self, ctx: &mut RetryContext, kind: FailureKind) -> RetryDecision {
        match kind {
            FailureKind::UserInterrupted | FailureKind::GenericFailure => RetryDecision::Stop,
            FailureKind::ProviderNotSupported | FailureKind::UnknownModel => {
                if ctx.attach || ctx.attempt != 1 {
                    return RetryDecision::Stop;
                }
                if let Some(model) = ctx.advance_chain() {
                    return RetryDecision::SwitchModel {
                        model,
                        to_parent: false,
                    };
                }
                ctx.fall_back_to_parent()
                    .map_or(RetryDecision::Stop, |model| RetryDecision::SwitchModel {
                        model,
                        to_parent: true,
                    })
            }
            FailureKind::RateLimited => {
                // A rate limit on the model we fell back to is final.
                if ctx.rate_limit_advanced {
                    return RetryDecision::Stop;
                }
                if !ctx.attach
                    && let Some(model) = ctx.advance_chain()
                {
                    ctx.rate_limit_advanced = true;
                    return RetryDecision::SwitchModel {
                        model,
                        to_parent: false,
                    };
                }
                self.same_model_retry(ctx)
            }
            FailureKind::TransientTransport => self.same_model_retry(ctx),
        }
    }

    fn same_model_retry(&self, ctx: &mut RetryContext) -> RetryDecision {
        if ctx.outer_retries >= self.policy.max_retries {
            debug!(retries = ctx.outer_retries, "Retry budget exhausted");
            return RetryDecision::Stop;
        }
        ctx.outer_retries += 1;
        RetryDecision::RetrySameModel {
            delay: self.policy.jittered_delay(ctx.outer_retries),
            resume: !ctx.identity.is_empty(),
        }
    }
}

/// Sleep for `delay` unless `cancel` fires first.
pub async fn wait_backoff(delay: Duration, cancel: &CancellationToken) -> BackoffOutcome {
    tokio::select! {
        biased;
        () = cancel.cancelled() => BackoffOutcome::Cancelled,
        () = tokio::time::sleep(delay) => BackoffOutcome::Elapsed,
    }
}
