//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedCompute`] and [`ScriptedTransport`] replay pre-seeded outcomes
//! in FIFO order, repeating the final step once the script runs out, and
//! count every call so tests can assert exact poll and attempt ceilings.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::compute::{
    AccessConfig, ComputeApi, ComputeError, ComputeFuture, Firewall, FirewallAllowed,
    InstanceResource, NetworkInterface, Router, RouterNat, RouterNatSubnetwork,
};
use crate::preflight::IAP_SOURCE_RANGE;
use crate::transport::{
    ChannelExit, ChannelIo, ChannelRequest, ChannelTransport, TransportError, TransportFuture,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted answer to `get_instance`.
#[derive(Clone, Debug)]
pub enum StatusStep {
    /// The instance is not visible yet.
    Missing,
    /// The instance reports this raw status.
    Status(&'static str),
    /// The control plane fails.
    Fail(ComputeError),
}

#[derive(Default)]
struct ComputeState {
    statuses: VecDeque<StatusStep>,
    last_status: Option<StatusStep>,
    external_address: Option<String>,
    routers: Vec<Router>,
    router_error: Option<ComputeError>,
    firewalls: Vec<Firewall>,
    firewall_error: Option<ComputeError>,
    insert_error: Option<ComputeError>,
    pending_mutations: bool,
    inserted: Vec<InstanceResource>,
    get_calls: u32,
    list_instance_calls: u32,
    router_calls: u32,
    firewall_calls: u32,
    started: Vec<String>,
    stopped: Vec<String>,
    deleted: Vec<String>,
}

/// In-memory [`ComputeApi`] driven by scripted responses.
#[derive(Clone, Default)]
pub struct ScriptedCompute {
    state: Arc<Mutex<ComputeState>>,
}

impl fmt::Debug for ScriptedCompute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedCompute").finish_non_exhaustive()
    }
}

impl ScriptedCompute {
    /// Creates a control plane with no instances, routers, or rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `get_instance` answers; the last one repeats.
    #[must_use]
    pub fn with_statuses(self, steps: impl IntoIterator<Item = StatusStep>) -> Self {
        lock(&self.state).statuses.extend(steps);
        self
    }

    /// Reports `address` as the external NAT address of running instances.
    #[must_use]
    pub fn with_external_address(self, address: &str) -> Self {
        lock(&self.state).external_address = Some(address.to_owned());
        self
    }

    /// Sets the routers returned for every region.
    #[must_use]
    pub fn with_routers(self, routers: Vec<Router>) -> Self {
        lock(&self.state).routers = routers;
        self
    }

    /// Makes router listing fail.
    #[must_use]
    pub fn with_router_error(self, error: ComputeError) -> Self {
        lock(&self.state).router_error = Some(error);
        self
    }

    /// Sets the firewall rules.
    #[must_use]
    pub fn with_firewalls(self, firewalls: Vec<Firewall>) -> Self {
        lock(&self.state).firewalls = firewalls;
        self
    }

    /// Makes firewall listing fail.
    #[must_use]
    pub fn with_firewall_error(self, error: ComputeError) -> Self {
        lock(&self.state).firewall_error = Some(error);
        self
    }

    /// Makes instance creation fail.
    #[must_use]
    pub fn with_insert_error(self, error: ComputeError) -> Self {
        lock(&self.state).insert_error = Some(error);
        self
    }

    /// Records mutations but never completes them, like an operation that is
    /// still running server-side.
    #[must_use]
    pub fn with_pending_mutations(self) -> Self {
        lock(&self.state).pending_mutations = true;
        self
    }

    /// Returns how many times `insert_instance` was called.
    #[must_use]
    pub fn insert_calls(&self) -> usize {
        lock(&self.state).inserted.len()
    }

    /// Returns the bodies passed to `insert_instance`.
    #[must_use]
    pub fn inserted(&self) -> Vec<InstanceResource> {
        lock(&self.state).inserted.clone()
    }

    /// Returns how many times `get_instance` was called.
    #[must_use]
    pub fn get_calls(&self) -> u32 {
        lock(&self.state).get_calls
    }

    /// Returns how many times `list_instances` was called.
    #[must_use]
    pub fn list_instance_calls(&self) -> u32 {
        lock(&self.state).list_instance_calls
    }

    /// Returns how many times `list_routers` was called.
    #[must_use]
    pub fn router_calls(&self) -> u32 {
        lock(&self.state).router_calls
    }

    /// Returns how many times `list_firewalls` was called.
    #[must_use]
    pub fn firewall_calls(&self) -> u32 {
        lock(&self.state).firewall_calls
    }

    /// Returns the names passed to `start_instance`, `stop_instance`, and
    /// `delete_instance`, in that order.
    #[must_use]
    pub fn lifecycle_calls(&self) -> (Vec<String>, Vec<String>, Vec<String>) {
        let state = lock(&self.state);
        (
            state.started.clone(),
            state.stopped.clone(),
            state.deleted.clone(),
        )
    }

    fn record_mutation(
        &self,
        calls: fn(&mut ComputeState) -> &mut Vec<String>,
        name: &str,
    ) -> bool {
        let mut state = lock(&self.state);
        calls(&mut state).push(name.to_owned());
        state.pending_mutations
    }

    fn next_status(&self, name: &str) -> Result<Option<InstanceResource>, ComputeError> {
        let mut state = lock(&self.state);
        state.get_calls += 1;
        let step = match state.statuses.pop_front() {
            Some(step) => {
                state.last_status = Some(step.clone());
                Some(step)
            }
            None => state.last_status.clone(),
        };
        let template = state
            .inserted
            .iter()
            .find(|instance| instance.name == name)
            .cloned();
        match step {
            None | Some(StatusStep::Missing) => Ok(None),
            Some(StatusStep::Fail(err)) => Err(err),
            Some(StatusStep::Status(raw)) => {
                let mut instance = template.unwrap_or_else(|| InstanceResource {
                    name: name.to_owned(),
                    ..InstanceResource::default()
                });
                instance.status = Some(raw.to_owned());
                if let Some(address) = &state.external_address {
                    instance.network_interfaces = vec![NetworkInterface {
                        access_configs: vec![AccessConfig {
                            name: String::from("External NAT"),
                            network_tier: Some(String::from("STANDARD")),
                            nat_ip: Some(address.clone()),
                        }],
                        ..NetworkInterface::default()
                    }];
                }
                Ok(Some(instance))
            }
        }
    }
}

impl ComputeApi for ScriptedCompute {
    fn insert_instance<'a>(
        &'a self,
        _zone: &'a str,
        instance: &'a InstanceResource,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let (pending, outcome) = {
                let mut state = lock(&self.state);
                state.inserted.push(instance.clone());
                (
                    state.pending_mutations,
                    state.insert_error.clone().map_or(Ok(()), Err),
                )
            };
            settle(pending).await;
            outcome
        })
    }

    fn get_instance<'a>(
        &'a self,
        _zone: &'a str,
        name: &'a str,
    ) -> ComputeFuture<'a, Option<InstanceResource>> {
        Box::pin(async move { self.next_status(name) })
    }

    fn list_instances<'a>(&'a self, _zone: &'a str) -> ComputeFuture<'a, Vec<InstanceResource>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.list_instance_calls += 1;
            Ok(state.inserted.clone())
        })
    }

    fn start_instance<'a>(&'a self, _zone: &'a str, name: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            settle(self.record_mutation(|state| &mut state.started, name)).await;
            Ok(())
        })
    }

    fn stop_instance<'a>(&'a self, _zone: &'a str, name: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            settle(self.record_mutation(|state| &mut state.stopped, name)).await;
            Ok(())
        })
    }

    fn delete_instance<'a>(&'a self, _zone: &'a str, name: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            settle(self.record_mutation(|state| &mut state.deleted, name)).await;
            Ok(())
        })
    }

    fn list_routers<'a>(&'a self, _region: &'a str) -> ComputeFuture<'a, Vec<Router>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.router_calls += 1;
            state
                .router_error
                .clone()
                .map_or_else(|| Ok(state.routers.clone()), Err)
        })
    }

    fn list_firewalls(&self) -> ComputeFuture<'_, Vec<Firewall>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.firewall_calls += 1;
            state
                .firewall_error
                .clone()
                .map_or_else(|| Ok(state.firewalls.clone()), Err)
        })
    }
}

async fn settle(pending: bool) {
    if pending {
        std::future::pending::<()>().await;
    }
}

/// Router whose NAT explicitly lists `subnet`.
#[must_use]
pub fn router_with_nat_for(subnet: &str) -> Router {
    Router {
        name: String::from("corp-router"),
        nats: vec![RouterNat {
            name: String::from("corp-nat"),
            source_subnetwork_ip_ranges_to_nat: String::from("LIST_OF_SUBNETWORKS"),
            subnetworks: vec![RouterNatSubnetwork {
                name: format!(
                    "https://www.googleapis.com/compute/v1/projects/acme/regions/europe-west1/subnetworks/{subnet}"
                ),
            }],
        }],
    }
}

/// Ingress rule admitting the proxy broker on port 22 of the default network.
#[must_use]
pub fn iap_firewall_rule() -> Firewall {
    Firewall {
        name: String::from("ssh-from-broker"),
        network: String::from(
            "https://www.googleapis.com/compute/v1/projects/acme/global/networks/default",
        ),
        direction: String::from("INGRESS"),
        disabled: false,
        source_ranges: vec![IAP_SOURCE_RANGE.to_owned()],
        allowed: vec![FirewallAllowed {
            ip_protocol: String::from("tcp"),
            ports: vec![String::from("22")],
        }],
        target_tags: Vec::new(),
    }
}

/// Control-plane error used by tests.
#[must_use]
pub fn api_error(operation: &str, status: u16) -> ComputeError {
    ComputeError::Api {
        operation: operation.to_owned(),
        resource: String::from("box-1"),
        status,
        message: String::from("simulated failure"),
    }
}

/// One scripted channel outcome.
#[derive(Clone, Debug)]
pub enum TransportStep {
    /// The command ran and exited with this code.
    Exit(i32),
    /// The client failed to start.
    SpawnFailure(String),
    /// The invocation never finishes.
    Hang,
    /// The command exits with `code` after `after` has elapsed.
    Delayed {
        /// Time before the exit is reported.
        after: Duration,
        /// Exit code reported.
        code: i32,
    },
}

impl TransportStep {
    /// Exit with `code`.
    #[must_use]
    pub const fn exit(code: i32) -> Self {
        Self::Exit(code)
    }

    /// Fail to spawn with `message`.
    #[must_use]
    pub fn spawn_failure(message: &str) -> Self {
        Self::SpawnFailure(message.to_owned())
    }
}

/// Request observed by [`ScriptedTransport`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedRequest {
    /// Host name targeted.
    pub host: String,
    /// Remote command.
    pub command: String,
    /// Stream handling.
    pub io: ChannelIo,
    /// Connect timeout override.
    pub connect_timeout: Option<Duration>,
}

#[derive(Default)]
struct TransportState {
    steps: VecDeque<TransportStep>,
    last: Option<TransportStep>,
    requests: Vec<RecordedRequest>,
}

/// In-memory [`ChannelTransport`] replaying scripted outcomes.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport").finish_non_exhaustive()
    }
}

impl ScriptedTransport {
    /// Queues outcomes; the last one repeats. An empty script always exits 0.
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = TransportStep>) -> Self {
        let transport = Self::default();
        lock(&transport.state).steps.extend(steps);
        transport
    }

    /// Returns how many requests were executed.
    #[must_use]
    pub fn calls(&self) -> usize {
        lock(&self.state).requests.len()
    }

    /// Returns the remote commands in execution order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state)
            .requests
            .iter()
            .map(|request| request.command.clone())
            .collect()
    }

    /// Returns every recorded request.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    fn record(&self, request: ChannelRequest<'_>) -> TransportStep {
        let mut state = lock(&self.state);
        state.requests.push(RecordedRequest {
            host: request.descriptor.host_name().to_owned(),
            command: request.command.to_owned(),
            io: request.io,
            connect_timeout: request.connect_timeout,
        });
        match state.steps.pop_front() {
            Some(step) => {
                state.last = Some(step.clone());
                step
            }
            None => state.last.clone().unwrap_or(TransportStep::Exit(0)),
        }
    }
}

impl ChannelTransport for ScriptedTransport {
    fn execute<'a>(&'a self, request: ChannelRequest<'a>) -> TransportFuture<'a> {
        let step = self.record(request);
        Box::pin(async move {
            match step {
                TransportStep::Exit(code) => Ok(ChannelExit::code(code)),
                TransportStep::SpawnFailure(message) => Err(TransportError::Spawn {
                    program: String::from("ssh"),
                    message,
                }),
                TransportStep::Hang => std::future::pending().await,
                TransportStep::Delayed { after, code } => {
                    tokio::time::sleep(after).await;
                    Ok(ChannelExit::code(code))
                }
            }
        })
    }
}

/// Event recorded by [`EventCapture`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CapturedEvent {
    /// Event level.
    pub level: Level,
    /// Rendered `message` field.
    pub message: String,
}

/// `tracing` layer that records every event for later assertions.
#[derive(Clone, Debug, Default)]
pub struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl EventCapture {
    /// Returns every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<CapturedEvent> {
        lock(&self.events).clone()
    }

    /// Returns the events recorded at `level`.
    #[must_use]
    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == level)
            .collect()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            value.clone_into(&mut self.message);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        lock(&self.events).push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
        });
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
