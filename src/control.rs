//! The poll → apply → collect → report → sleep loop.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::AgentError;
use crate::gateway::Gateway;
use crate::policy::{PolicyDirective, PolicySource};
use crate::telemetry::{Heartbeat, TelemetrySample, TelemetrySink, collect_telemetry, log_sample};
use crate::vendor::{ApplyOutcome, CommandDispatcher, CommandRunner, VendorAdapter};

/// Abstraction for waiting between iterations, so tests run without real delay
pub trait Sleeper: Send + Sync + fmt::Debug {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Wall clock for heartbeat timestamps
pub trait Clock: Send + Sync + fmt::Debug {
    fn unix_now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Everything one successful iteration did
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub directive: PolicyDirective,
    pub outcome: ApplyOutcome,
    pub sample: TelemetrySample,
    pub heartbeat: Heartbeat,
}

pub struct ControlLoop {
    config: Arc<Config>,
    policy: Arc<dyn PolicySource>,
    adapter: Arc<dyn VendorAdapter>,
    gateway: Arc<dyn Gateway>,
    dispatcher: CommandDispatcher,
    reporter: Arc<dyn TelemetrySink>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl ControlLoop {
    pub fn new(
        config: Arc<Config>,
        policy: Arc<dyn PolicySource>,
        adapter: Arc<dyn VendorAdapter>,
        gateway: Arc<dyn Gateway>,
        runner: Arc<dyn CommandRunner>,
        reporter: Arc<dyn TelemetrySink>,
    ) -> Self {
        let dispatcher = CommandDispatcher::new(gateway.clone(), runner, config.gateway_disabled);
        Self {
            config,
            policy,
            adapter,
            gateway,
            dispatcher,
            reporter,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// One iteration body. The first failing stage ends the iteration.
    pub async fn run_once(&self) -> Result<IterationReport, AgentError> {
        let directive = self.policy.fetch_next_action().await?;
        debug!(
            mode = directive.mode_code,
            power_watt = directive.power_watt,
            "Policy directive"
        );

        let outcome = self.adapter.apply(&directive, &self.dispatcher).await;
        if outcome.failed > 0 {
            info!(
                "[{}] {} of {} action(s) failed",
                self.adapter.vendor(),
                outcome.failed,
                outcome.failed + outcome.succeeded
            );
        }

        let sample = if self.config.gateway_disabled {
            TelemetrySample::default()
        } else {
            collect_telemetry(
                self.gateway.as_ref(),
                &self.config.sensors,
                self.adapter.mode_labels(),
            )
            .await
        };
        log_sample(&sample, |m| self.adapter.sensor_mode_name(m));

        // battery_mode mirrors the commanded mode; nothing reads it back
        let heartbeat = Heartbeat::new(
            &self.config.client_id,
            self.clock.unix_now(),
            directive.mode_code,
            &sample,
        );
        self.reporter.upload(&heartbeat).await?;

        Ok(IterationReport {
            directive,
            outcome,
            sample,
            heartbeat,
        })
    }

    /// Run one iteration, logging instead of returning any failure
    pub async fn tick(&self) -> Option<IterationReport> {
        match self.run_once().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("ERROR: {}", e);
                debug!("{:?}", e);
                None
            }
        }
    }

    /// `n` iterations, each followed by the configured sleep
    pub async fn run_iterations(&self, n: usize) -> Vec<Option<IterationReport>> {
        let mut reports = Vec::with_capacity(n);
        for _ in 0..n {
            reports.push(self.tick().await);
            self.sleeper.sleep(self.config.interval).await;
        }
        reports
    }

    /// Runs until the process is terminated
    pub async fn run(&self) {
        loop {
            self.tick().await;
            self.sleeper.sleep(self.config.interval).await;
        }
    }
}
