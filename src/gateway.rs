use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::token::TokenProvider;

pub const READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// State object as returned by `GET /api/states/{entity_id}`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EntityState {
    #[serde(default)]
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn new(entity_id: &str, state: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            state: state.to_string(),
            attributes: Map::new(),
        }
    }
}

/// Home-automation gateway as seen by the adapters and the control loop.
///
/// Implementations never fail: unreadable state is `None`, a failed service
/// call is `false`, and the cause is logged at the boundary.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn read_state(&self, entity_id: &str) -> Option<EntityState>;

    async fn call_service(&self, domain: &str, service: &str, payload: Value) -> bool;
}

/// Home Assistant REST API client
pub struct HttpGateway {
    client: reqwest::Client,
    api_url: String,
    tokens: Arc<dyn TokenProvider>,
    disabled: bool,
}

impl HttpGateway {
    /// `api_url` must already be normalized (see [`crate::config::normalize_gateway_url`])
    pub fn new(
        client: reqwest::Client,
        api_url: String,
        tokens: Arc<dyn TokenProvider>,
        disabled: bool,
    ) -> Self {
        Self {
            client,
            api_url,
            tokens,
            disabled,
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn read_state(&self, entity_id: &str) -> Option<EntityState> {
        if self.disabled || entity_id.is_empty() {
            return None;
        }
        let Some(token) = self.tokens.token() else {
            error!(
                entity_id,
                "No Home Assistant token (SUPERVISOR_TOKEN/HASSIO_TOKEN/HOMEASSISTANT_TOKEN/HA_TOKEN); \
                 outside the supervisor set HA_URL and HA_TOKEN"
            );
            return None;
        };

        let url = format!("{}/states/{}", self.api_url, entity_id);
        let response = match self
            .client
            .get(&url)
            .bearer_auth(token)
            .timeout(READ_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(entity_id, "HA GET failed: {}", e);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(
                entity_id,
                status = status.as_u16(),
                "HA GET rejected: {}",
                excerpt(&body)
            );
            return None;
        }

        match response.json::<EntityState>().await {
            Ok(state) => Some(state),
            Err(e) => {
                debug!(entity_id, "HA GET returned an unreadable state: {}", e);
                None
            }
        }
    }

    async fn call_service(&self, domain: &str, service: &str, payload: Value) -> bool {
        if self.disabled {
            debug!(domain, service, "Gateway disabled, not calling service");
            return false;
        }
        let Some(token) = self.tokens.token() else {
            error!(domain, service, "Cannot call HA service: no token present");
            return false;
        };

        let url = format!("{}/services/{}/{}", self.api_url, domain, service);
        debug!(domain, service, %payload, "HA service call");
        let result = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(domain, service, status = response.status().as_u16(), "HA service ok");
                true
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                warn!(domain, service, status, "HA service {}.{} rejected: {}", domain, service, excerpt(&body));
                false
            }
            Err(e) => {
                warn!(domain, service, "HA service {}.{} error: {}", domain, service, e);
                false
            }
        }
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(200).collect()
}
