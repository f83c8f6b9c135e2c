//! Error taxonomy for the agent.
//!
//! Only outbound I/O can fail an iteration. Malformed upstream data degrades to
//! safe defaults and gateway failures are reported as `None`/`false`, so neither
//! shows up here.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Transport failure or timeout on an outbound HTTP call
    #[error("{operation} {target} failed: {source}")]
    Request {
        operation: &'static str,
        target: String,
        #[source]
        source: reqwest::Error,
    },

    /// The remote answered with a non-success status
    #[error("{operation} {target} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        target: String,
        status: u16,
        body: String,
    },

    /// The vendor control script could not be spawned
    #[error("control script {program} could not be started: {source}")]
    ScriptSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The vendor control script did not exit in time
    #[error("control script {program} did not finish within {timeout:?}")]
    ScriptTimeout { program: String, timeout: Duration },
}

impl AgentError {
    pub(crate) fn request(operation: &'static str, target: &str, source: reqwest::Error) -> Self {
        Self::Request {
            operation,
            target: target.to_string(),
            source,
        }
    }

    /// Build a status error, keeping at most 200 chars of the response body
    pub(crate) fn status(operation: &'static str, target: &str, status: u16, body: &str) -> Self {
        Self::Status {
            operation,
            target: target.to_string(),
            status,
            body: body.chars().take(200).collect(),
        }
    }
}

/// Startup-only configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a valid {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("unknown vendor {0:?} (expected sungrow, enphase or goodwe)")]
    UnknownVendor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_truncates_body() {
        let body = "x".repeat(500);
        let err = AgentError::status("policy fetch", "http://ems/next", 502, &body);
        match &err {
            AgentError::Status { body, status, .. } => {
                assert_eq!(body.len(), 200);
                assert_eq!(*status, 502);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert!(err.to_string().starts_with("policy fetch http://ems/next returned HTTP 502"));
    }
}
