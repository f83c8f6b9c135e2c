use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::SensorEntities;
use crate::error::AgentError;
use crate::gateway::{EntityState, Gateway};

pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Sensor readings for one iteration. Absent when unset or unreadable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySample {
    pub soc_pct: Option<f64>,
    pub mode: Option<i64>,
    pub pv_power_w: Option<i64>,
    pub grid_power_w: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorField {
    Soc,
    Mode,
    PvPower,
    GridPower,
}

impl TelemetrySample {
    pub fn is_empty(&self) -> bool {
        *self == TelemetrySample::default()
    }

    /// Store one entity state. Unparseable states leave the field as it was.
    ///
    /// `mode_labels` maps textual mode states (lowercase) to numeric modes.
    pub fn record(&mut self, field: SensorField, state: &EntityState, mode_labels: &[(&str, i64)]) {
        let raw = state.state.trim();
        match field {
            SensorField::Soc => {
                if let Some(v) = parse_finite(raw) {
                    self.soc_pct = Some(v);
                }
            }
            SensorField::Mode => {
                let mode = raw.parse::<i64>().ok().or_else(|| {
                    let name = raw.to_ascii_lowercase();
                    mode_labels
                        .iter()
                        .find(|(label, _)| *label == name)
                        .map(|(_, m)| *m)
                });
                if mode.is_some() {
                    self.mode = mode;
                }
            }
            SensorField::PvPower => {
                if let Some(v) = parse_finite(raw) {
                    self.pv_power_w = Some(v.trunc() as i64);
                }
            }
            SensorField::GridPower => {
                if let Some(v) = parse_finite(raw) {
                    self.grid_power_w = Some(v.trunc() as i64);
                }
            }
        }
    }
}

fn parse_finite(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Read every configured sensor through the gateway
pub async fn collect_telemetry(
    gateway: &dyn Gateway,
    sensors: &SensorEntities,
    mode_labels: &[(&str, i64)],
) -> TelemetrySample {
    let mut sample = TelemetrySample::default();
    let fields = [
        (SensorField::Soc, &sensors.soc),
        (SensorField::Mode, &sensors.mode),
        (SensorField::PvPower, &sensors.pv_power),
        (SensorField::GridPower, &sensors.grid_power),
    ];
    for (field, entity) in fields {
        let Some(entity) = entity.as_deref() else {
            continue;
        };
        if let Some(state) = gateway.read_state(entity).await {
            sample.record(field, &state, mode_labels);
        }
    }
    sample
}

/// Payload uploaded each iteration.
///
/// `battery_mode` is the commanded policy mode, always present. Every other
/// optional field is omitted, never sent as `null`, when absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heartbeat {
    pub client_id: String,
    pub reported_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soc: Option<f64>,
    pub battery_mode: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv_power_w: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_power_w: Option<i64>,
}

impl Heartbeat {
    pub fn new(client_id: &str, reported_at: i64, battery_mode: i64, sample: &TelemetrySample) -> Self {
        Self {
            client_id: client_id.to_string(),
            reported_at,
            soc: sample.soc_pct,
            battery_mode,
            pv_power_w: sample.pv_power_w,
            grid_power_w: sample.grid_power_w,
        }
    }
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn upload(&self, heartbeat: &Heartbeat) -> Result<(), AgentError>;
}

pub struct HttpTelemetryReporter {
    client: reqwest::Client,
    url: Option<String>,
    api_key: Option<String>,
}

impl HttpTelemetryReporter {
    /// TLS verification is a property of `client`
    pub fn new(client: reqwest::Client, url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            url,
            api_key,
        }
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetryReporter {
    async fn upload(&self, heartbeat: &Heartbeat) -> Result<(), AgentError> {
        let Some(url) = self.url.as_deref() else {
            debug!("No telemetry endpoint configured; skipping upload");
            return Ok(());
        };

        debug!(?heartbeat, "POST {}", url);
        let mut request = self.client.post(url).json(heartbeat).timeout(UPLOAD_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AgentError::request("telemetry upload", url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::status("telemetry upload", url, status.as_u16(), &body));
        }
        debug!(status = status.as_u16(), "Telemetry accepted");
        Ok(())
    }
}

/// Log each reading that is present
pub fn log_sample(sample: &TelemetrySample, mode_label: impl Fn(i64) -> &'static str) {
    if let Some(soc) = sample.soc_pct {
        info!("SOC from HA: {}%", soc);
    }
    if let Some(mode) = sample.mode {
        info!("Mode from HA: {} ({})", mode, mode_label(mode));
    }
    if let Some(pv) = sample.pv_power_w {
        info!("PV power from HA: {} W", pv);
    }
    if let Some(grid) = sample.grid_power_w {
        info!("Grid power from HA: {} W", grid);
    }
}
