//! The knock orchestrator.
//!
//! Each run is one tokio task walking the state machine
//! `Resolving -> Sending(i) -> Delaying(i) -> ... -> CheckingResource(a)`
//! and publishing every transition. Cancellation is cooperative: the token is
//! checked before each step and raced against every sleep and socket wait.
//! Only one run per sequence id is active; starting a new one cancels its
//! predecessor and waits for it to wind down first.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use knockr_common::constants::{MAX_IP4_HEADER_SIZE, MIN_IP4_HEADER_SIZE};
use knockr_common::error::KnockFailure;
use knockr_common::model::{KnockState, ResourceState, Sequence, SequenceId};
use knockr_protocols::{BuildContext, PacketPlan, build};
use tokio::sync::{Mutex, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::resolver;
use crate::resource::ResourceChecker;
use crate::state::StatePublisher;
use crate::transport::{self, KnockTransport, NetTransport, SocketOptions, TransportError};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Assumed IPv4 header size when a sequence counts headers into its
    /// ICMP packet size, 20..=60.
    pub ip4_header_size: usize,
    /// How long a TCP knock waits for the connect before moving on. The SYN
    /// is out either way, so this stays short.
    pub tcp_knock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ip4_header_size: MIN_IP4_HEADER_SIZE,
            tcp_knock_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed(KnockFailure),
    Cancelled,
}

/// Handle to one running sequence.
pub struct RunHandle {
    id: SequenceId,
    token: CancellationToken,
    done: watch::Receiver<Option<RunOutcome>>,
}

impl RunHandle {
    pub fn id(&self) -> SequenceId {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the run to end, however it ends.
    pub async fn outcome(mut self) -> RunOutcome {
        loop {
            if let Some(outcome) = self.done.borrow_and_update().clone() {
                return outcome;
            }
            if self.done.changed().await.is_err() {
                return RunOutcome::Cancelled;
            }
        }
    }
}

struct ActiveRun {
    generation: u64,
    token: CancellationToken,
    done: watch::Receiver<Option<RunOutcome>>,
}

pub struct KnockEngine {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn KnockTransport>,
    publisher: StatePublisher,
    config: EngineConfig,
    active: Mutex<HashMap<SequenceId, ActiveRun>>,
    generation: AtomicU64,
}

impl KnockEngine {
    pub fn new(transport: Arc<dyn KnockTransport>, config: EngineConfig) -> Self {
        if !transport::probe_raw_capability() {
            warn!("raw socket privilege unavailable, ICMP steps will fail");
        }
        Self {
            inner: Arc::new(Inner {
                transport,
                publisher: StatePublisher::new(),
                config,
                active: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Arc::new(NetTransport), EngineConfig::default())
    }

    pub fn publisher(&self) -> &StatePublisher {
        &self.inner.publisher
    }

    /// Launches a sequence on its own task. An already-active run for the
    /// same id is cancelled and fully wound down before the new one starts.
    pub async fn start(&self, sequence: Sequence) -> RunHandle {
        let id = sequence.id;
        let token = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        // Swapped in under the lock so concurrent starts for the same id
        // always displace each other instead of both going live.
        let displaced = self.inner.active.lock().await.insert(
            id,
            ActiveRun {
                generation,
                token: token.clone(),
                done: done_rx.clone(),
            },
        );
        if let Some(previous) = displaced {
            debug!(sequence = id, "cancelling previous run");
            previous.token.cancel();
            wait_done(previous.done).await;
        }

        let inner = Arc::clone(&self.inner);
        let run_token = token.clone();
        tokio::spawn(async move {
            let outcome = run_sequence(&inner, &sequence, &run_token).await;
            inner.publisher.remove_knock(id);
            let mut active = inner.active.lock().await;
            if active.get(&id).is_some_and(|run| run.generation == generation) {
                active.remove(&id);
            }
            drop(active);
            info!(sequence = id, ?outcome, "run finished");
            let _ = done_tx.send(Some(outcome));
        });

        RunHandle { id, token, done: done_rx }
    }

    /// Cancels the active run for `id`, if any, and waits for it to stop.
    pub async fn cancel(&self, id: SequenceId) {
        let run = self.inner.active.lock().await.remove(&id);
        if let Some(run) = run {
            run.token.cancel();
            wait_done(run.done).await;
        }
    }
}

async fn wait_done(mut done: watch::Receiver<Option<RunOutcome>>) {
    while done.borrow_and_update().is_none() {
        if done.changed().await.is_err() {
            return;
        }
    }
}

async fn run_sequence(
    inner: &Inner,
    sequence: &Sequence,
    token: &CancellationToken,
) -> RunOutcome {
    info!(sequence = sequence.id, name = %sequence.name, host = %sequence.host, "starting knock");

    let steps = sequence.valid_steps();
    if steps.len() < sequence.steps.len() {
        warn!(
            sequence = sequence.id,
            skipped = sequence.steps.len() - steps.len(),
            "skipping invalid steps"
        );
    }
    if steps.is_empty() {
        return RunOutcome::Failed(KnockFailure::NoValidSteps {
            name: sequence.name.clone(),
        });
    }

    let target = tokio::select! {
        biased;
        _ = token.cancelled() => return RunOutcome::Cancelled,
        resolved = resolver::resolve_target(&sequence.host, sequence.preference) => {
            match resolved {
                Ok(addr) => addr,
                Err(failure) => {
                    warn!(sequence = sequence.id, %failure, "resolution failed");
                    return RunOutcome::Failed(failure);
                }
            }
        }
    };
    debug!(sequence = sequence.id, %target, "target resolved");

    let ctx = BuildContext {
        target,
        size_mode: sequence.icmp_size_mode,
        ip4_header_size: inner
            .config
            .ip4_header_size
            .clamp(MIN_IP4_HEADER_SIZE, MAX_IP4_HEADER_SIZE),
    };
    let opts = SocketOptions {
        ttl: sequence.ttl.filter(|t| *t > 0),
        local_port: sequence.local_port,
    };
    let max_attempts = sequence
        .resource_check
        .as_ref()
        .map_or(1, |check| check.retries());
    let delay = sequence.delay();
    let total = steps.len();

    for (index, step) in steps.iter().enumerate() {
        if token.is_cancelled() {
            return RunOutcome::Cancelled;
        }
        inner.publisher.publish_knock(KnockState {
            id: sequence.id,
            name: sequence.name.clone(),
            attempt: 1,
            max_attempts,
            step: index + 1,
            total_steps: total,
            waiting_for_resource: false,
        });
        debug!(sequence = sequence.id, step = index + 1, total, "sending");

        let Some(plan) = build(step, &ctx) else {
            // Steps are prevalidated; an unbuildable one is skipped, not fatal.
            continue;
        };
        if let Err(err) = dispatch(inner, target, &plan, &opts).await {
            match err {
                TransportError::PermissionDenied(source) => {
                    error!(sequence = sequence.id, %source, "raw socket unavailable");
                    return RunOutcome::Failed(KnockFailure::RawSocketPermission);
                }
                TransportError::Io(source) => {
                    // Best effort by design: a dropped packet looks the same
                    // as a delivered one from the sender's side.
                    warn!(sequence = sequence.id, step = index + 1, %source, "transport error, continuing");
                }
            }
        }

        if index + 1 < total && delay > Duration::ZERO {
            tokio::select! {
                biased;
                _ = token.cancelled() => return RunOutcome::Cancelled,
                _ = sleep(delay) => {}
            }
        }
    }

    let Some(check) = &sequence.resource_check else {
        info!(sequence = sequence.id, "knock complete");
        return RunOutcome::Succeeded;
    };

    let checker = ResourceChecker::new(Arc::clone(&inner.transport));
    let retries = check.retries();
    for attempt in 1..=retries {
        if token.is_cancelled() {
            inner.publisher.set_resource(sequence.id, ResourceState::Unknown);
            return RunOutcome::Cancelled;
        }
        inner.publisher.publish_knock(KnockState {
            id: sequence.id,
            name: sequence.name.clone(),
            attempt,
            max_attempts: retries,
            step: total,
            total_steps: total,
            waiting_for_resource: true,
        });
        inner.publisher.set_resource(sequence.id, ResourceState::Checking);

        let reachable = tokio::select! {
            biased;
            _ = token.cancelled() => {
                inner.publisher.set_resource(sequence.id, ResourceState::Unknown);
                return RunOutcome::Cancelled;
            }
            reachable = checker.check(check) => reachable,
        };
        if reachable {
            inner.publisher.set_resource(sequence.id, ResourceState::Reachable);
            info!(sequence = sequence.id, attempt, "resource reachable, knock complete");
            return RunOutcome::Succeeded;
        }
        inner.publisher.set_resource(sequence.id, ResourceState::Unreachable);

        if attempt < retries {
            debug!(
                sequence = sequence.id,
                attempt,
                retry_in = check.period().as_secs(),
                "resource unreachable, will re-check"
            );
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    inner.publisher.set_resource(sequence.id, ResourceState::Unknown);
                    return RunOutcome::Cancelled;
                }
                _ = sleep(check.period()) => {}
            }
        }
    }

    warn!(sequence = sequence.id, retries, "resource stayed unreachable");
    RunOutcome::Failed(KnockFailure::ResourceUnreachable {
        target: format!("{}:{}", check.host, check.port),
    })
}

async fn dispatch(
    inner: &Inner,
    target: std::net::IpAddr,
    plan: &PacketPlan,
    opts: &SocketOptions,
) -> Result<(), TransportError> {
    match plan {
        PacketPlan::Udp { port, payload } => {
            inner.transport.send_udp(target, *port, payload, opts).await
        }
        PacketPlan::TcpConnect { port } => {
            let outcome = inner
                .transport
                .attempt_tcp_connect(target, *port, opts, inner.config.tcp_knock_timeout)
                .await?;
            // Refused or timed out both mean the SYN went out.
            debug!(%target, port, ?outcome, "tcp knock delivered");
            Ok(())
        }
        PacketPlan::Icmp { packets } => {
            for packet in packets {
                inner.transport.send_icmp(target, packet, opts).await?;
            }
            Ok(())
        }
    }
}
