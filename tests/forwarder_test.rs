// End-to-end tests for the reconciliation engine, driven through a scripted
// writer so every in-flight write is held open until the test releases it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use devstate_sync::client::StateWriter;
use devstate_sync::config::ServerConfig;
use devstate_sync::error::{Error, Result};
use devstate_sync::forwarder::Forwarder;
use devstate_sync::registry::StateRegistry;
use devstate_sync::state::{DeviceState, DeviceStates};

// ── Scripted writer ─────────────────────────────────────────────────

struct WriteCall {
    device: String,
    state: DeviceState,
    respond: oneshot::Sender<Result<()>>,
}

struct ScriptedWriter {
    tx: mpsc::UnboundedSender<WriteCall>,
}

#[async_trait]
impl StateWriter for ScriptedWriter {
    async fn write_state(&self, device: &str, state: DeviceState) -> Result<()> {
        let (respond, done) = oneshot::channel();
        let call = WriteCall {
            device: device.to_string(),
            state,
            respond,
        };
        if self.tx.send(call).is_err() {
            return Err(Error::Cancelled);
        }
        done.await.unwrap_or(Err(Error::Cancelled))
    }
}

fn scripted_writer() -> (Arc<ScriptedWriter>, mpsc::UnboundedReceiver<WriteCall>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ScriptedWriter { tx }), rx)
}

// ── Helpers ─────────────────────────────────────────────────────────

fn test_server(name: &str) -> ServerConfig {
    ServerConfig {
        name: name.into(),
        host: "127.0.0.1".into(),
        port: 8088,
        prefix: "asterisk".into(),
        timeout: 5,
        retry_interval: 1,
        username: "sync".into(),
        secret: "pw".into(),
        extension_pattern: r"^(\d+)$".into(),
        device_format: "Custom:$0".into(),
    }
}

fn batch(entries: &[(&str, DeviceState)]) -> DeviceStates {
    entries.iter().map(|(d, s)| (d.to_string(), *s)).collect()
}

async fn next_call(rx: &mut mpsc::UnboundedReceiver<WriteCall>) -> WriteCall {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a write")
        .expect("writer dropped")
}

async fn assert_no_call(rx: &mut mpsc::UnboundedReceiver<WriteCall>, ms: u64) {
    if let Ok(Some(call)) = tokio::time::timeout(Duration::from_millis(ms), rx.recv()).await {
        panic!("unexpected write {}={}", call.device, call.state);
    }
}

async fn wait_settled(forwarder: &Forwarder) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if forwarder.is_settled().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("forwarder did not settle");
}

async fn wait_pending_empty(forwarder: &Forwarder) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if forwarder.pending().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pending did not drain");
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn single_update_propagates_exactly_once() {
    let registry = Arc::new(StateRegistry::new());
    let (writer, mut calls) = scripted_writer();
    let root = CancellationToken::new();
    let forwarder = Forwarder::new(
        &test_server("a"),
        DeviceStates::new(),
        writer,
        Arc::clone(&registry),
        &root,
    )
    .await;

    registry
        .update(batch(&[("Custom:101", DeviceState::InUse)]))
        .await;

    let call = next_call(&mut calls).await;
    assert_eq!(call.device, "Custom:101");
    assert_eq!(call.state, DeviceState::InUse);
    call.respond.send(Ok(())).unwrap();

    assert_no_call(&mut calls, 200).await;
    wait_settled(&forwarder).await;
    assert_eq!(
        forwarder.current().await.get("Custom:101"),
        Some(&DeviceState::InUse)
    );
    assert!(forwarder.pending().await.is_empty());
    assert_eq!(
        registry.snapshot().await.get("Custom:101"),
        Some(&DeviceState::InUse)
    );
    forwarder.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn targets_superseded_mid_write_are_coalesced() {
    let registry = Arc::new(StateRegistry::new());
    let (writer, mut calls) = scripted_writer();
    let root = CancellationToken::new();
    let forwarder = Forwarder::new(
        &test_server("b"),
        DeviceStates::new(),
        writer,
        Arc::clone(&registry),
        &root,
    )
    .await;

    registry
        .update(batch(&[("Custom:101", DeviceState::InUse)]))
        .await;
    let first = next_call(&mut calls).await;
    assert_eq!(first.state, DeviceState::InUse);

    // Two further targets arrive while the first write is held open.
    registry
        .update(batch(&[("Custom:101", DeviceState::Busy)]))
        .await;
    registry
        .update(batch(&[("Custom:101", DeviceState::NotInUse)]))
        .await;
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if forwarder.pending().await.get("Custom:101") == Some(&DeviceState::NotInUse) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("batches were not reconciled");

    first.respond.send(Ok(())).unwrap();

    // Exactly one further write, carrying the final value.
    let second = next_call(&mut calls).await;
    assert_eq!(second.device, "Custom:101");
    assert_eq!(second.state, DeviceState::NotInUse);
    second.respond.send(Ok(())).unwrap();

    assert_no_call(&mut calls, 200).await;
    wait_settled(&forwarder).await;
    assert_eq!(
        forwarder.current().await.get("Custom:101"),
        Some(&DeviceState::NotInUse)
    );
    forwarder.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn target_withdrawn_mid_write_reverts_to_previous_state() {
    let registry = Arc::new(StateRegistry::new());
    let (writer, mut calls) = scripted_writer();
    let root = CancellationToken::new();
    let forwarder = Forwarder::new(
        &test_server("b"),
        batch(&[("Custom:101", DeviceState::NotInUse)]),
        writer,
        Arc::clone(&registry),
        &root,
    )
    .await;

    registry
        .update(batch(&[("Custom:101", DeviceState::InUse)]))
        .await;
    let first = next_call(&mut calls).await;
    assert_eq!(first.state, DeviceState::InUse);

    // The global state returns to what this server already had, which
    // withdraws the pending target while the write is still in flight.
    registry
        .update(batch(&[("Custom:101", DeviceState::NotInUse)]))
        .await;
    wait_pending_empty(&forwarder).await;

    first.respond.send(Ok(())).unwrap();

    // The PBX now holds INUSE, so a reverting write to the value that was
    // current before the first write must follow.
    let revert = next_call(&mut calls).await;
    assert_eq!(revert.device, "Custom:101");
    assert_eq!(revert.state, DeviceState::NotInUse);
    revert.respond.send(Ok(())).unwrap();

    wait_settled(&forwarder).await;
    assert_eq!(
        forwarder.current().await.get("Custom:101"),
        Some(&DeviceState::NotInUse)
    );
    assert!(forwarder.pending().await.is_empty());
    assert_no_call(&mut calls, 200).await;
    forwarder.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn transient_write_failure_retries_same_target() {
    let registry = Arc::new(StateRegistry::new());
    let (writer, mut calls) = scripted_writer();
    let root = CancellationToken::new();
    let forwarder = Forwarder::new(
        &test_server("a"),
        DeviceStates::new(),
        writer,
        Arc::clone(&registry),
        &root,
    )
    .await;

    registry
        .update(batch(&[("Custom:101", DeviceState::Ringing)]))
        .await;
    let first = next_call(&mut calls).await;
    first
        .respond
        .send(Err(Error::protocol("SetVar returned 'Error'")))
        .unwrap();

    // The retry arrives after retry_interval, with the same target.
    let retry = next_call(&mut calls).await;
    assert_eq!(retry.device, "Custom:101");
    assert_eq!(retry.state, DeviceState::Ringing);

    // The failed attempt must not have advanced `current`.
    assert!(forwarder.current().await.get("Custom:101").is_none());
    assert_eq!(
        forwarder.pending().await.get("Custom:101"),
        Some(&DeviceState::Ringing)
    );

    retry.respond.send(Ok(())).unwrap();
    wait_settled(&forwarder).await;
    assert_eq!(
        forwarder.current().await.get("Custom:101"),
        Some(&DeviceState::Ringing)
    );
    forwarder.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn two_forwarders_converge_on_registry_state() {
    let registry = Arc::new(StateRegistry::new());
    let root = CancellationToken::new();
    let (writer_a, mut calls_a) = scripted_writer();
    let (writer_b, mut calls_b) = scripted_writer();
    let forwarder_a = Forwarder::new(
        &test_server("a"),
        DeviceStates::new(),
        writer_a,
        Arc::clone(&registry),
        &root,
    )
    .await;
    let forwarder_b = Forwarder::new(
        &test_server("b"),
        DeviceStates::new(),
        writer_b,
        Arc::clone(&registry),
        &root,
    )
    .await;

    // Worker A observes the extension ringing.
    registry
        .update(batch(&[("Custom:101", DeviceState::Ringing)]))
        .await;
    for calls in [&mut calls_a, &mut calls_b] {
        let call = next_call(calls).await;
        assert_eq!(call.device, "Custom:101");
        assert_eq!(call.state, DeviceState::Ringing);
        call.respond.send(Ok(())).unwrap();
    }
    wait_settled(&forwarder_a).await;
    wait_settled(&forwarder_b).await;

    // Worker B then observes it going idle.
    registry
        .update(batch(&[("Custom:101", DeviceState::NotInUse)]))
        .await;
    for calls in [&mut calls_a, &mut calls_b] {
        let call = next_call(calls).await;
        assert_eq!(call.state, DeviceState::NotInUse);
        call.respond.send(Ok(())).unwrap();
    }
    wait_settled(&forwarder_a).await;
    wait_settled(&forwarder_b).await;

    let global = registry.snapshot().await;
    assert_eq!(forwarder_a.current().await, global);
    assert_eq!(forwarder_b.current().await, global);
    forwarder_a.dispose().await;
    forwarder_b.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn disposal_cancels_inflight_write_and_stops_forwarding() {
    let registry = Arc::new(StateRegistry::new());
    let (writer, mut calls) = scripted_writer();
    let root = CancellationToken::new();
    let forwarder = Forwarder::new(
        &test_server("a"),
        DeviceStates::new(),
        writer,
        Arc::clone(&registry),
        &root,
    )
    .await;

    registry
        .update(batch(&[("Custom:101", DeviceState::InUse)]))
        .await;
    let held = next_call(&mut calls).await;

    forwarder.dispose().await;
    drop(held);

    registry
        .update(batch(&[("Custom:101", DeviceState::Busy)]))
        .await;
    assert_no_call(&mut calls, 200).await;
}

#[tokio::test(start_paused = true)]
async fn snapshot_primes_pending_for_late_subscriber() {
    let registry = Arc::new(StateRegistry::new());
    registry
        .update(batch(&[("Custom:101", DeviceState::InUse)]))
        .await;

    let (writer, mut calls) = scripted_writer();
    let root = CancellationToken::new();
    let forwarder = Forwarder::new(
        &test_server("a"),
        batch(&[("Custom:101", DeviceState::NotInUse)]),
        writer,
        Arc::clone(&registry),
        &root,
    )
    .await;

    let call = next_call(&mut calls).await;
    assert_eq!(call.device, "Custom:101");
    assert_eq!(call.state, DeviceState::InUse);
    call.respond.send(Ok(())).unwrap();

    wait_settled(&forwarder).await;
    assert_eq!(
        forwarder.current().await.get("Custom:101"),
        Some(&DeviceState::InUse)
    );
    forwarder.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn snapshot_matching_seed_writes_nothing() {
    let registry = Arc::new(StateRegistry::new());
    registry
        .update(batch(&[("Custom:101", DeviceState::InUse)]))
        .await;

    let (writer, mut calls) = scripted_writer();
    let root = CancellationToken::new();
    let forwarder = Forwarder::new(
        &test_server("a"),
        batch(&[("Custom:101", DeviceState::InUse)]),
        writer,
        Arc::clone(&registry),
        &root,
    )
    .await;

    assert_no_call(&mut calls, 200).await;
    assert!(forwarder.pending().await.is_empty());
    forwarder.dispose().await;
}
