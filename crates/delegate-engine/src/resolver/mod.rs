//! Model selector resolution.
//!
//! [`ModelSelectorResolver`] asks an optional remote [`ModelResolver`] to
//! expand a selector list into a concrete handle plus fallback chain. When the
//! remote is missing or fails it falls back to a local, deterministic choice,
//! so resolution as a whole never fails.

mod http;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use delegate_core::models::{ModelResolution, ModelSelector};

pub use http::HttpModelResolver;

/// Request sent to the model-resolution collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub selector: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_model_handle: Option<String>,
}

/// Errors from the model-resolution collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No model resolver configured")]
    Unavailable,

    #[error("Model resolver request failed: {0}")]
    Transport(String),

    #[error("Model resolver returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Model resolver returned an invalid response: {0}")]
    Decode(String),

    #[error("Model resolver returned an empty handle")]
    EmptyHandle,
}

/// The external collaborator mapping selectors to concrete handles.
#[async_trait]
pub trait ModelResolver: Send + Sync {
    async fn resolve(&self, request: &ResolveRequest) -> Result<ModelResolution, ResolveError>;
}

/// Resolves selector lists, remote first, local fallback second.
#[derive(Clone)]
pub struct ModelSelectorResolver {
    remote: Option<Arc<dyn ModelResolver>>,
    default_model: String,
}

impl ModelSelectorResolver {
    /// A resolver with only the local fallback.
    pub fn local(default_model: impl Into<String>) -> Self {
        Self {
            remote: None,
            default_model: default_model.into(),
        }
    }

    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn ModelResolver>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Resolve `selectors`, never failing.
    pub async fn resolve(&self, selectors: &[String], parent_model: Option<&str>) -> ModelResolution {
        match self.resolve_remote(selectors, parent_model).await {
            Ok(resolution) => resolution,
            Err(ResolveError::Unavailable) => self.resolve_locally(selectors, parent_model),
            Err(e) => {
                warn!(error = %e, ?selectors, "Model resolution failed, using local fallback");
                self.resolve_locally(selectors, parent_model)
            }
        }
    }

    /// Ask the remote collaborator only; its answer is normalised so the
    /// chain starts with the resolved handle.
    pub async fn resolve_remote(
        &self,
        selectors: &[String],
        parent_model: Option<&str>,
    ) -> Result<ModelResolution, ResolveError> {
        let remote = self.remote.as_ref().ok_or(ResolveError::Unavailable)?;
        let request = ResolveRequest {
            selector: selectors.to_vec(),
            parent_model_handle: parent_model.map(String::from),
        };
        let resolution = remote.resolve(&request).await?;
        if resolution.resolved_handle.trim().is_empty() {
            return Err(ResolveError::EmptyHandle);
        }
        let resolution = resolution.normalized();
        info!(
            model = %resolution.resolved_handle,
            chain_len = resolution.expansion_chain.len(),
            "Resolved model selectors"
        );
        Ok(resolution)
    }

    /// Parent handle, else first concrete selector, else the default model.
    pub fn resolve_locally(&self, selectors: &[String], parent_model: Option<&str>) -> ModelResolution {
        let handle = parent_model
            .filter(|p| !p.is_empty())
            .map(String::from)
            .or_else(|| {
                selectors
                    .iter()
                    .find_map(|s| ModelSelector::parse(s).as_concrete().map(String::from))
            })
            .unwrap_or_else(|| self.default_model.clone());
        debug!(model = %handle, "Resolved model locally");
        ModelResolution::single(handle)
    }
}
