//! Energy-management agent for home batteries behind Home Assistant.
//!
//! The agent polls a decision service for a `{mode, power_watt}` directive,
//! translates it into Sungrow, Enphase or GoodWe control actions, and reports a
//! heartbeat with battery telemetry after every poll.

pub mod config;
pub mod control;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod telemetry;
pub mod token;
pub mod vendor;

pub use config::{Config, VendorKind};
pub use control::{ControlLoop, IterationReport};
pub use error::{AgentError, ConfigError};
pub use gateway::{EntityState, Gateway, HttpGateway};
pub use policy::{HttpPolicyClient, PolicyDirective, PolicyMode, PolicySource};
pub use telemetry::{Heartbeat, HttpTelemetryReporter, TelemetrySample, TelemetrySink};
pub use token::{EnvTokenProvider, TokenProvider};
pub use vendor::{CommandDispatcher, CommandRunner, TokioCommandRunner, VendorAdapter, VendorCommand};

/// HTTP client for the decision and telemetry endpoints
pub fn upstream_client(verify_tls: bool) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!verify_tls)
        .build()
}
