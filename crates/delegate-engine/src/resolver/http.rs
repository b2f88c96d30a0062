//! HTTP client for the model-resolution service.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use delegate_core::models::ModelResolution;

use super::{ModelResolver, ResolveError, ResolveRequest};

const RESOLVE_PATH: &str = "/v1/models/resolve";

/// Resolves selectors with `POST {base_url}/v1/models/resolve`.
#[derive(Clone)]
pub struct HttpModelResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpModelResolver {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}{RESOLVE_PATH}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelResolver for HttpModelResolver {
    async fn resolve(&self, request: &ResolveRequest) -> Result<ModelResolution, ResolveError> {
        let url = self.endpoint();
        debug!(%url, selector = ?request.selector, "Requesting model resolution");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResolveError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ModelResolution>()
            .await
            .map_err(|e| ResolveError::Decode(e.to_string()))
    }
}
