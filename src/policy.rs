use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AgentError;

pub const POLICY_TIMEOUT: Duration = Duration::from_secs(10);

/// Mode code meaning "no usable directive"
pub const UNKNOWN_MODE: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    Standby,
    Charge,
    Discharge,
    Auto,
    Unknown,
}

impl PolicyMode {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => PolicyMode::Standby,
            3 => PolicyMode::Charge,
            4 => PolicyMode::Discharge,
            7 => PolicyMode::Auto,
            _ => PolicyMode::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PolicyMode::Standby => "Standby / hold",
            PolicyMode::Charge => "Charge",
            PolicyMode::Discharge => "Discharge",
            PolicyMode::Auto => "Auto / self-consumption",
            PolicyMode::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One `{mode, power_watt}` instruction from the decision service.
///
/// The raw mode code is kept as received so the heartbeat can mirror exactly
/// what was commanded, including codes no adapter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDirective {
    pub mode_code: i64,
    pub power_watt: i64,
}

impl PolicyDirective {
    pub fn new(mode_code: i64, power_watt: i64) -> Self {
        Self {
            mode_code,
            power_watt,
        }
    }

    /// The "no directive" value every malformed input degrades to
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_MODE, 0)
    }

    pub fn mode(&self) -> PolicyMode {
        PolicyMode::from_code(self.mode_code)
    }

    /// Requested power if positive, else the nominal power if configured.
    /// A request too large for a `u32` counts as malformed.
    pub fn effective_power(&self, nominal_power_w: Option<u32>) -> Option<u32> {
        if self.power_watt > 0 {
            match u32::try_from(self.power_watt) {
                Ok(watts) => return Some(watts),
                Err(_) => warn!(
                    "power_watt {} out of range, ignoring it",
                    self.power_watt
                ),
            }
        }
        nominal_power_w.filter(|p| *p > 0)
    }

    /// Parse a decoded response body. Each field falls back to its safe
    /// default on its own: a bad `mode` does not discard a good `power_watt`.
    pub fn from_json(body: &Value) -> Self {
        Self {
            mode_code: int_field(body.get("mode"), UNKNOWN_MODE),
            power_watt: int_field(body.get("power_watt"), 0),
        }
    }
}

fn int_field(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Source of policy directives
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn fetch_next_action(&self) -> Result<PolicyDirective, AgentError>;
}

pub struct HttpPolicyClient {
    client: reqwest::Client,
    url: Option<String>,
    api_key: Option<String>,
}

impl HttpPolicyClient {
    pub fn new(client: reqwest::Client, url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            url,
            api_key,
        }
    }
}

#[async_trait]
impl PolicySource for HttpPolicyClient {
    async fn fetch_next_action(&self) -> Result<PolicyDirective, AgentError> {
        let Some(url) = self.url.as_deref() else {
            debug!("No policy endpoint configured");
            return Ok(PolicyDirective::unknown());
        };

        debug!("HTTP GET {}", url);
        let mut request = self.client.get(url).timeout(POLICY_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AgentError::request("policy fetch", url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::request("policy fetch", url, e))?;
        debug!(status = status.as_u16(), len = body.len(), "Policy response");
        if !status.is_success() {
            return Err(AgentError::status("policy fetch", url, status.as_u16(), &body));
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(json) => Ok(PolicyDirective::from_json(&json)),
            Err(e) => {
                warn!("Policy response is not JSON ({}); treating as no directive", e);
                Ok(PolicyDirective::unknown())
            }
        }
    }
}
