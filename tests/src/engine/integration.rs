use std::sync::Arc;

use knockr_common::error::KnockFailure;
use knockr_common::model::{
    ContentEncoding, ProtocolPreference, ResourceCheck, ResourceState, Sequence, SequenceStep,
    StepKind,
};
use knockr_core::transport::ConnectOutcome;
use knockr_core::{EngineConfig, KnockEngine, RunOutcome};
use tokio::task::yield_now;

use super::mock::{MockTransport, Sent};

fn udp(port: u16) -> SequenceStep {
    SequenceStep {
        kind: StepKind::Udp,
        port: Some(port),
        ..Default::default()
    }
}

fn tcp(port: u16) -> SequenceStep {
    SequenceStep {
        kind: StepKind::Tcp,
        port: Some(port),
        ..Default::default()
    }
}

fn icmp(size: u16, count: u16) -> SequenceStep {
    SequenceStep {
        kind: StepKind::Icmp,
        icmp_size: Some(size),
        icmp_count: Some(count),
        ..Default::default()
    }
}

fn sequence(id: i64, steps: Vec<SequenceStep>) -> Sequence {
    Sequence {
        id,
        name: format!("seq-{id}"),
        host: "127.0.0.1".into(),
        steps,
        delay_ms: 0,
        ..Default::default()
    }
}

fn engine_with(transport: &Arc<MockTransport>) -> KnockEngine {
    KnockEngine::new(transport.clone(), EngineConfig::default())
}

/// Waits for the mock to have recorded `n` sends without letting virtual
/// time advance past the run's next sleep.
async fn wait_for_sends(transport: &MockTransport, n: usize) {
    while transport.sent().len() < n {
        yield_now().await;
    }
}

#[tokio::test]
async fn steps_go_out_in_declared_order() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(&transport);

    let mut seq = sequence(
        1,
        vec![udp(7000), tcp(8000), icmp(32, 2), udp(9000)],
    );
    seq.steps[0].content = Some("6b6e".into());
    seq.steps[0].encoding = ContentEncoding::Hex;

    let outcome = engine.start(seq).await.outcome().await;

    assert_eq!(outcome, RunOutcome::Succeeded);
    assert_eq!(
        transport.sent(),
        vec![
            Sent::Udp {
                port: 7000,
                payload: vec![0x6b, 0x6e],
            },
            Sent::TcpConnect { port: 8000 },
            // payload-only mode: 8 byte header + 32 byte payload, twice
            Sent::Icmp { len: 40 },
            Sent::Icmp { len: 40 },
            Sent::Udp {
                port: 9000,
                payload: Vec::new(),
            },
        ]
    );
    assert!(engine.publisher().knock_state(1).is_none());
    assert_eq!(engine.publisher().resource_state(1), ResourceState::Unknown);
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_delay_stops_the_run() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(&transport);

    let mut seq = sequence(1, vec![udp(7000), udp(8000)]);
    seq.delay_ms = 15_000;

    let handle = engine.start(seq).await;
    wait_for_sends(&transport, 1).await;

    let state = engine.publisher().knock_state(1).expect("run is live");
    assert_eq!(state.step, 1);
    assert_eq!(state.total_steps, 2);

    handle.cancel();
    let outcome = handle.outcome().await;

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(transport.sent().len(), 1, "second step must never go out");
    assert!(engine.publisher().knock_state(1).is_none());
}

#[tokio::test(start_paused = true)]
async fn restart_cancels_the_previous_run_first() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(&transport);

    let mut first = sequence(1, vec![udp(1000), udp(1001)]);
    first.delay_ms = 15_000;
    let first_handle = engine.start(first).await;
    wait_for_sends(&transport, 1).await;

    let second_handle = engine.start(sequence(1, vec![udp(2000), udp(3000)])).await;

    assert_eq!(first_handle.outcome().await, RunOutcome::Cancelled);
    assert_eq!(second_handle.outcome().await, RunOutcome::Succeeded);
    assert_eq!(
        transport.sent(),
        vec![
            Sent::Udp {
                port: 1000,
                payload: Vec::new(),
            },
            Sent::Udp {
                port: 2000,
                payload: Vec::new(),
            },
            Sent::Udp {
                port: 3000,
                payload: Vec::new(),
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_restarts_leave_one_live_run() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(&transport);

    let mut first = sequence(1, vec![udp(1), udp(2)]);
    first.delay_ms = 15_000;
    let first_handle = engine.start(first).await;
    wait_for_sends(&transport, 1).await;

    let (left, right) = tokio::join!(
        engine.start(sequence(1, vec![udp(100), udp(101)])),
        engine.start(sequence(1, vec![udp(200), udp(201)])),
    );
    let left = left.outcome().await;
    let right = right.outcome().await;

    assert_eq!(first_handle.outcome().await, RunOutcome::Cancelled);
    assert!(
        matches!(
            (&left, &right),
            (RunOutcome::Succeeded, RunOutcome::Cancelled)
                | (RunOutcome::Cancelled, RunOutcome::Succeeded)
        ),
        "exactly one restart may finish, got {left:?} and {right:?}"
    );

    let ports: Vec<u16> = transport
        .sent()
        .iter()
        .map(|s| match s {
            Sent::Udp { port, .. } => *port,
            other => panic!("unexpected send {other:?}"),
        })
        .collect();
    assert!(
        ports == [1, 100, 101] || ports == [1, 200, 201],
        "displaced restart leaked sends: {ports:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_between_probes_resets_the_resource_state() {
    let transport = Arc::new(MockTransport::new());
    transport.script_connects([ConnectOutcome::TimedOut, ConnectOutcome::TimedOut]);
    let engine = engine_with(&transport);

    let mut seq = sequence(1, vec![udp(7000)]);
    seq.resource_check = Some(ResourceCheck {
        host: "127.0.0.1".into(),
        port: 443,
        timeout_secs: 5,
        period_secs: 30,
        max_retries: 3,
    });

    let handle = engine.start(seq).await;
    // the first failed probe parks the run in its re-check pause
    while transport.connects_to(443) < 1 {
        yield_now().await;
    }
    handle.cancel();

    assert_eq!(handle.outcome().await, RunOutcome::Cancelled);
    assert_eq!(transport.connects_to(443), 1);
    assert_eq!(engine.publisher().resource_state(1), ResourceState::Unknown);
    assert!(engine.publisher().knock_state(1).is_none());
}

#[tokio::test(start_paused = true)]
async fn unreachable_resource_exhausts_its_retries() {
    let transport = Arc::new(MockTransport::new());
    transport.script_connects([
        ConnectOutcome::TimedOut,
        ConnectOutcome::Refused,
        ConnectOutcome::TimedOut,
    ]);
    let engine = engine_with(&transport);

    let mut seq = sequence(1, vec![udp(7000)]);
    seq.resource_check = Some(ResourceCheck {
        host: "127.0.0.1".into(),
        port: 443,
        timeout_secs: 5,
        period_secs: 30,
        max_retries: 3,
    });

    let outcome = engine.start(seq).await.outcome().await;

    assert_eq!(
        outcome,
        RunOutcome::Failed(KnockFailure::ResourceUnreachable {
            target: "127.0.0.1:443".into(),
        })
    );
    assert_eq!(transport.connects_to(443), 3);
    assert_eq!(
        engine.publisher().resource_state(1),
        ResourceState::Unreachable
    );
    assert!(engine.publisher().knock_state(1).is_none());
}

#[tokio::test]
async fn reachable_resource_succeeds_on_the_first_probe() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(&transport);

    let mut seq = sequence(1, vec![udp(7000)]);
    seq.resource_check = Some(ResourceCheck {
        host: "127.0.0.1".into(),
        port: 443,
        timeout_secs: 5,
        period_secs: 30,
        max_retries: 5,
    });

    let outcome = engine.start(seq).await.outcome().await;

    assert_eq!(outcome, RunOutcome::Succeeded);
    assert_eq!(transport.connects_to(443), 1);
    assert_eq!(
        engine.publisher().resource_state(1),
        ResourceState::Reachable
    );
}

#[tokio::test]
async fn missing_raw_privilege_fails_the_whole_run() {
    let transport = Arc::new(MockTransport::denying_icmp());
    let engine = engine_with(&transport);

    let outcome = engine
        .start(sequence(1, vec![icmp(32, 1), udp(7000)]))
        .await
        .outcome()
        .await;

    assert_eq!(
        outcome,
        RunOutcome::Failed(KnockFailure::RawSocketPermission)
    );
    assert!(
        transport.sent().is_empty(),
        "nothing may go out after a fatal step"
    );
}

#[tokio::test]
async fn sequence_without_valid_steps_fails() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(&transport);

    let invalid = SequenceStep {
        kind: StepKind::Udp,
        port: None,
        ..Default::default()
    };
    let outcome = engine
        .start(sequence(1, vec![invalid, udp(0)]))
        .await
        .outcome()
        .await;

    assert_eq!(
        outcome,
        RunOutcome::Failed(KnockFailure::NoValidSteps {
            name: "seq-1".into(),
        })
    );
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn unresolvable_host_fails_before_sending() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(&transport);

    let mut seq = sequence(1, vec![udp(7000)]);
    seq.host = "no-such-host.invalid".into();

    let outcome = engine.start(seq).await.outcome().await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(KnockFailure::ResolutionFailed { .. })
    ));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn version_locked_preference_rejects_the_wrong_family() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(&transport);

    let mut seq = sequence(1, vec![udp(7000)]);
    seq.preference = ProtocolPreference::Ipv6Only;

    let outcome = engine.start(seq).await.outcome().await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(KnockFailure::ResolutionFailed { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn transport_io_errors_do_not_abort_the_sequence() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(&transport);

    // A refused TCP knock still counts as delivered.
    transport.script_connects([ConnectOutcome::Refused]);
    let mut seq = sequence(1, vec![tcp(8000), udp(9000)]);
    seq.delay_ms = 1_000;

    let outcome = engine.start(seq).await.outcome().await;

    assert_eq!(outcome, RunOutcome::Succeeded);
    assert_eq!(transport.sent().len(), 2);
}
