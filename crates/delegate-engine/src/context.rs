//! Explicitly constructed engine context.
//!
//! Everything the orchestrator depends on is owned here and passed in at
//! construction; there is no process-wide state.

use std::sync::Arc;
use std::time::Duration;

use delegate_core::config::{Config, EngineSettings};
use delegate_core::subagents::SubagentRegistry;

use crate::orchestration::classifier::{FailureClassifier, PhraseClassifier};
use crate::orchestration::permissions::{PermissionSource, StaticPermissions};
use crate::orchestration::retry::{RetryCoordinator, RetryPolicy};
use crate::orchestration::tracking::{NoopStateTracker, StateTracker};
use crate::resolver::{HttpModelResolver, ModelResolver, ModelSelectorResolver};
use crate::subprocess::{AttemptExecutor, ProcessExecutor};

/// Collaborators and settings shared by every invocation.
pub struct EngineContext {
    pub registry: Arc<SubagentRegistry>,
    pub resolver: ModelSelectorResolver,
    pub executor: Arc<dyn AttemptExecutor>,
    pub permissions: Arc<dyn PermissionSource>,
    pub tracker: Arc<dyn StateTracker>,
    pub retry: RetryCoordinator,
    pub engine: EngineSettings,
}

impl EngineContext {
    /// Build a context from settings, with `executor` running attempts.
    ///
    /// The remote model resolver is enabled when `engine.resolver_url` is set.
    pub fn new(
        config: &Config,
        registry: Arc<SubagentRegistry>,
        executor: Arc<dyn AttemptExecutor>,
    ) -> Self {
        let mut resolver = ModelSelectorResolver::local(&config.engine.default_model);
        if let Some(url) = &config.engine.resolver_url {
            resolver = resolver.with_remote(Arc::new(HttpModelResolver::new(
                url.clone(),
                Duration::from_secs(config.engine.resolver_timeout_secs),
            )));
        }

        Self {
            registry,
            resolver,
            executor,
            permissions: Arc::new(StaticPermissions::from(&config.permissions)),
            tracker: Arc::new(NoopStateTracker),
            retry: RetryCoordinator::new(
                RetryPolicy::from(&config.retry),
                Arc::new(PhraseClassifier::new()),
            ),
            engine: config.engine.clone(),
        }
    }

    /// A context that launches real child processes.
    pub fn with_process_executor(config: &Config, registry: Arc<SubagentRegistry>) -> Self {
        let executor = ProcessExecutor::new(Duration::from_secs(config.engine.terminate_timeout_secs));
        Self::new(config, registry, Arc::new(executor))
    }

    #[must_use]
    pub fn with_tracker(mut self, tracker: Arc<dyn StateTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionSource>) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn with_model_resolver(mut self, remote: Arc<dyn ModelResolver>) -> Self {
        self.resolver = self.resolver.with_remote(remote);
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.retry = RetryCoordinator::new(self.retry.policy().clone(), classifier);
        self
    }
}
