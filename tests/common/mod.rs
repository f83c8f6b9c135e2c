#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use ems_agent::control::{Clock, Sleeper};
use ems_agent::{
    AgentError, CommandRunner, Config, ControlLoop, EntityState, Gateway, Heartbeat,
    PolicyDirective, PolicySource, TelemetrySink, VendorKind,
};

pub type ServiceCall = (String, String, Value);

/// Gateway that serves canned states and records every service call
#[derive(Default)]
pub struct FakeGateway {
    states: HashMap<String, String>,
    accept_calls: bool,
    pub reads: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<ServiceCall>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            accept_calls: true,
            ..Default::default()
        }
    }

    pub fn rejecting() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, entity_id: &str, state: &str) -> Self {
        self.states.insert(entity_id.to_string(), state.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn read_state(&self, entity_id: &str) -> Option<EntityState> {
        self.reads.lock().unwrap().push(entity_id.to_string());
        self.states
            .get(entity_id)
            .map(|state| EntityState::new(entity_id, state))
    }

    async fn call_service(&self, domain: &str, service: &str, payload: Value) -> bool {
        self.calls
            .lock()
            .unwrap()
            .push((domain.to_string(), service.to_string(), payload));
        self.accept_calls
    }
}

/// Command runner returning a fixed exit code
pub struct FakeRunner {
    exit_code: Option<i32>,
    pub runs: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeRunner {
    pub fn exiting(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn runs(&self) -> Vec<(String, Vec<String>)> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<Option<i32>, AgentError> {
        self.runs
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));
        Ok(self.exit_code)
    }
}

/// Policy source replaying queued results, then the unknown directive
#[derive(Default)]
pub struct ScriptedPolicy {
    queue: Mutex<VecDeque<Result<PolicyDirective, AgentError>>>,
}

impl ScriptedPolicy {
    pub fn new(results: Vec<Result<PolicyDirective, AgentError>>) -> Self {
        Self {
            queue: Mutex::new(results.into()),
        }
    }

    pub fn always(directive: PolicyDirective) -> Self {
        Self::new((0..8).map(|_| Ok(directive)).collect())
    }
}

#[async_trait]
impl PolicySource for ScriptedPolicy {
    async fn fetch_next_action(&self) -> Result<PolicyDirective, AgentError> {
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(PolicyDirective::unknown()))
    }
}

pub fn status_error(status: u16) -> AgentError {
    AgentError::Status {
        operation: "policy fetch",
        target: "http://ems.test/next_action".to_string(),
        status,
        body: "upstream unavailable".to_string(),
    }
}

#[derive(Default)]
pub struct RecordingSink {
    reject: bool,
    pub uploads: Mutex<Vec<Heartbeat>>,
}

impl RecordingSink {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn uploads(&self) -> Vec<Heartbeat> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn upload(&self, heartbeat: &Heartbeat) -> Result<(), AgentError> {
        self.uploads.lock().unwrap().push(heartbeat.clone());
        if self.reject {
            return Err(AgentError::Status {
                operation: "telemetry upload",
                target: "http://ems.test/telemetry".to_string(),
                status: 500,
                body: String::new(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct TrackingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap().clone()
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.calls.lock().unwrap().push(duration);
        Box::pin(async {})
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn unix_now(&self) -> i64 {
        self.0
    }
}

pub const NOW: i64 = 1_750_000_000;

pub fn config(vendor: VendorKind, pairs: &[(&str, &str)]) -> Config {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(vendor, move |key| map.get(key).cloned()).expect("valid test config")
}

pub struct Harness {
    pub gateway: Arc<FakeGateway>,
    pub runner: Arc<FakeRunner>,
    pub sink: Arc<RecordingSink>,
    pub sleeper: TrackingSleeper,
    pub control: ControlLoop,
}

pub fn harness(
    config: Config,
    policy: ScriptedPolicy,
    gateway: FakeGateway,
    runner: FakeRunner,
    sink: RecordingSink,
) -> Harness {
    let gateway = Arc::new(gateway);
    let runner = Arc::new(runner);
    let sink = Arc::new(sink);
    let sleeper = TrackingSleeper::default();
    let adapter = ems_agent::vendor::adapter_for(&config);
    let control = ControlLoop::new(
        Arc::new(config),
        Arc::new(policy),
        Arc::from(adapter),
        gateway.clone(),
        runner.clone(),
        sink.clone(),
    )
    .with_sleeper(Arc::new(sleeper.clone()))
    .with_clock(Arc::new(FixedClock(NOW)));

    Harness {
        gateway,
        runner,
        sink,
        sleeper,
        control,
    }
}
