//! Process-wide device-state registry.
//!
//! The registry is the rendezvous point between workers: any worker that
//! observes an extension change merges it here, and every forwarder --
//! including the one belonging to the observing worker -- receives the batch
//! through its subscription channel.
//!
//! Batches are fanned out while the registry lock is held, so every
//! subscriber sees the same total order of batches. Each subscriber gets its
//! own unbounded channel; a slow forwarder therefore delays nobody, it just
//! queues.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::state::DeviceStates;

/// Handle identifying one subscription. The subscriber owns it and must pass
/// it back to [`StateRegistry::unsubscribe`] on teardown; the registry holds
/// no reference to the subscriber besides its channel sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct RegistryInner {
    states: DeviceStates,
    subscribers: HashMap<u64, mpsc::UnboundedSender<DeviceStates>>,
    next_id: u64,
}

#[derive(Default)]
pub struct StateRegistry {
    inner: Mutex<RegistryInner>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch into the registry and deliver it to every subscriber.
    ///
    /// Empty batches are delivered too; a `WaitEvent` round that saw nothing
    /// still counts in each subscriber's sequence.
    pub async fn update(&self, batch: DeviceStates) {
        let mut inner = self.inner.lock().await;
        for (device, state) in &batch {
            inner.states.insert(device.clone(), *state);
        }
        // Senders whose receiver is gone are dropped from the table here;
        // explicit unsubscription remains the orderly path.
        inner
            .subscribers
            .retain(|_, tx| tx.send(batch.clone()).is_ok());
    }

    /// Register a new subscriber.
    ///
    /// The first batch on the returned channel is a snapshot of the entire
    /// current registry, so the subscriber starts from a known baseline.
    pub async fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<DeviceStates>) {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(inner.states.clone());
        inner.subscribers.insert(id, tx);
        (SubscriptionId(id), rx)
    }

    /// Remove a subscriber. No batches are delivered after this returns.
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().await;
        inner.subscribers.remove(&id.0);
    }

    /// A copy of the current device-state map.
    pub async fn snapshot(&self) -> DeviceStates {
        self.inner.lock().await.states.clone()
    }
}
