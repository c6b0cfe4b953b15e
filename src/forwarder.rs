//! Per-server reconciliation engine.
//!
//! A `Forwarder` subscribes to the [`StateRegistry`] for the lifetime of one
//! server session and keeps that server's device states converged with the
//! global map. It tracks two views under one lock:
//!
//! - `current`: what the PBX last accepted (seeded from the session's
//!   device-state listing, updated after every successful write);
//! - `pending`: targets not yet achieved, kept only while they differ from
//!   `current`.
//!
//! At most one write is in flight per forwarder. The write task loops,
//! draining `pending` one entry at a time; targets that change while a write
//! is in flight are coalesced, and a target withdrawn mid-write queues a
//! write back to the previous `current` so the PBX does not keep the
//! now-unwanted value.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::client::StateWriter;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::registry::{StateRegistry, SubscriptionId};
use crate::state::{DeviceState, DeviceStates};
use crate::worker::try_or_wait;

struct ForwarderState {
    current: DeviceStates,
    pending: DeviceStates,
    inflight: bool,
    disposed: bool,
}

struct ForwarderInner {
    server_name: String,
    retry_interval: Duration,
    writer: Arc<dyn StateWriter>,
    cancel: CancellationToken,
    state: Mutex<ForwarderState>,
}

pub struct Forwarder {
    inner: Arc<ForwarderInner>,
    registry: Arc<StateRegistry>,
    subscription: SubscriptionId,
    batch_task: JoinHandle<()>,
}

impl Forwarder {
    /// Subscribe to the registry and start reconciling.
    ///
    /// `seed` is the server's device-state listing taken at session start.
    /// The registry delivers its snapshot as the first batch, which primes
    /// `pending` with every device whose global state differs from the seed.
    pub async fn new(
        config: &ServerConfig,
        seed: DeviceStates,
        writer: Arc<dyn StateWriter>,
        registry: Arc<StateRegistry>,
        parent: &CancellationToken,
    ) -> Self {
        let (subscription, rx) = registry.subscribe().await;
        let inner = Arc::new(ForwarderInner {
            server_name: config.name.clone(),
            retry_interval: config.retry_interval(),
            writer,
            cancel: parent.child_token(),
            state: Mutex::new(ForwarderState {
                current: seed,
                pending: DeviceStates::new(),
                inflight: false,
                disposed: false,
            }),
        });
        let batch_task = tokio::spawn(batch_loop(Arc::clone(&inner), rx));
        Forwarder {
            inner,
            registry,
            subscription,
            batch_task,
        }
    }

    /// Tear the forwarder down: unsubscribe, cancel any in-flight write,
    /// and wait for the batch task to stop. No `SetVar` is issued after
    /// this returns.
    pub async fn dispose(self) {
        {
            let mut st = self.inner.state.lock().await;
            st.disposed = true;
        }
        self.registry.unsubscribe(self.subscription).await;
        self.inner.cancel.cancel();
        let _ = self.batch_task.await;
    }

    /// The forwarder's belief about the PBX's current states.
    pub async fn current(&self) -> DeviceStates {
        self.inner.state.lock().await.current.clone()
    }

    /// Targets not yet written.
    pub async fn pending(&self) -> DeviceStates {
        self.inner.state.lock().await.pending.clone()
    }

    /// `true` when nothing is pending and no write is in flight.
    pub async fn is_settled(&self) -> bool {
        let st = self.inner.state.lock().await;
        st.pending.is_empty() && !st.inflight
    }
}

async fn batch_loop(
    inner: Arc<ForwarderInner>,
    rx: tokio::sync::mpsc::UnboundedReceiver<DeviceStates>,
) {
    let mut batches = UnboundedReceiverStream::new(rx);
    loop {
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return,
            next = batches.next() => match next {
                Some(batch) => reconcile(&inner, batch).await,
                None => return,
            },
        }
    }
}

/// Fold one registry batch into `pending` and schedule a write if none is
/// running.
async fn reconcile(inner: &Arc<ForwarderInner>, batch: DeviceStates) {
    let mut st = inner.state.lock().await;
    if st.disposed {
        return;
    }
    for (device, new_state) in batch {
        if st.current.get(&device) == Some(&new_state) {
            // The live state caught up to the target.
            st.pending.shift_remove(&device);
        } else {
            st.pending.insert(device, new_state);
        }
    }
    schedule_locked(inner, &mut st);
}

fn schedule_locked(inner: &Arc<ForwarderInner>, st: &mut ForwarderState) {
    if st.disposed || st.inflight {
        return;
    }
    let Some((device, state)) = st.pending.first() else {
        return;
    };
    let (device, state) = (device.clone(), *state);
    st.inflight = true;
    tokio::spawn(write_loop(Arc::clone(inner), device, state));
}

/// The single-flight write task.
///
/// Runs until `pending` drains or the forwarder is cancelled. A failed
/// write is retried after `retry_interval` without touching `current`; the
/// next target is always re-picked from `pending` after each attempt, so a
/// target superseded during the write is written once, with its final value.
async fn write_loop(inner: Arc<ForwarderInner>, mut device: String, mut state: DeviceState) {
    loop {
        if inner.cancel.is_cancelled() {
            inner.state.lock().await.inflight = false;
            return;
        }
        let attempt = async {
            tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => Err(Error::Cancelled),
                result = inner.writer.write_state(&device, state) => result,
            }
        };
        let succeeded = match try_or_wait(
            &inner.server_name,
            inner.retry_interval,
            &inner.cancel,
            attempt,
        )
        .await
        {
            Ok(Some(())) => true,
            Ok(None) => false,
            // Cancelled mid-flight: the write may or may not have landed,
            // so leave `current` alone and stop.
            Err(_) => {
                inner.state.lock().await.inflight = false;
                return;
            }
        };

        let mut st = inner.state.lock().await;
        if st.disposed {
            st.inflight = false;
            return;
        }
        if succeeded {
            debug!("[{}] wrote {device}={state}", inner.server_name);
            match st.pending.get(&device).copied() {
                Some(target) if target == state => {
                    st.pending.shift_remove(&device);
                }
                Some(_) => {
                    // Superseded while writing; the re-pick below redoes it
                    // with the new target.
                }
                None => {
                    // The target was withdrawn while the write was in
                    // flight, but the PBX now holds `state`. Queue a write
                    // back to the value that was current before this write.
                    if let Some(previous) = st.current.get(&device).copied() {
                        st.pending.insert(device.clone(), previous);
                    }
                }
            }
            st.current.insert(device.clone(), state);
        }
        if st.pending.is_empty() {
            st.inflight = false;
            return;
        }
        let Some((next_device, next_state)) = st.pending.first() else {
            st.inflight = false;
            return;
        };
        device = next_device.clone();
        state = *next_state;
    }
}
