use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use concord_store::{MessageBus, Payload, Subscription};

/// Frames buffered per connection before the dispatcher starts dropping
/// frames for that connection.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Bus topic carrying one channel's messages.
pub fn channel_topic(channel_id: i64) -> String {
    format!("channel:{}", channel_id)
}

/// The registry's side of one socket: where to enqueue outbound frames.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    user_id: i64,
    outbound: mpsc::Sender<Payload>,
}

impl ConnectionHandle {
    /// Returns the handle and the receiver the socket writer drains.
    pub fn new(user_id: i64) -> (Self, mpsc::Receiver<Payload>) {
        Self::with_capacity(user_id, OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(user_id: i64, capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            outbound,
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Never waits: a full queue loses this frame for this recipient only.
    fn deliver(&self, channel_id: i64, payload: &Payload) {
        match self.outbound.try_send(payload.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue full for connection {} (user {}) on channel {}, dropping message",
                    self.id, self.user_id, channel_id
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Connection {} closed before delivery on channel {}", self.id, channel_id);
            }
        }
    }
}

type ConnectionMap = HashMap<i64, HashMap<Uuid, ConnectionHandle>>;

/// Bus subscription of an Active channel, owned by its dispatch task.
struct ChannelSubscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChannelSubscription {
    /// The dispatch task cancels itself when the bus closes the topic.
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// Per-channel lifecycle state. Its lock serializes the Empty/Active
/// transitions of one channel, so bus I/O for that channel never holds up
/// any other.
#[derive(Default)]
struct ChannelSlot {
    subscription: Option<ChannelSubscription>,
    /// Set once the slot is dropped from the slot map. A caller that locked
    /// a retired slot fetches a fresh one.
    retired: bool,
}

type SharedSlot = Arc<Mutex<ChannelSlot>>;

/// Process-local map of channel -> open sockets.
///
/// A channel is Active while it has at least one registered connection.
/// Exactly one bus subscription and one dispatch task exist per Active
/// channel. Both are created by the first register and torn down by the
/// last unregister under that channel's slot lock. The connection map's
/// lock is only held for map edits and fan-out.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    bus: Arc<dyn MessageBus>,

    /// channel_id -> (connection_id -> handle)
    connections: Arc<RwLock<ConnectionMap>>,

    /// channel_id -> lifecycle slot. Never held while waiting on a slot.
    slots: Mutex<HashMap<i64, SharedSlot>>,
}

impl ConnectionRegistry {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                bus,
                connections: Arc::new(RwLock::new(HashMap::new())),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Adds a connection to a channel, activating the channel if it was
    /// empty. On a subscribe failure nothing is registered.
    pub async fn register(&self, channel_id: i64, handle: ConnectionHandle) -> anyhow::Result<()> {
        let (slot, mut guard) = loop {
            let slot = self.slot_entry(channel_id).await;
            let guard = slot.clone().lock_owned().await;
            if !guard.retired {
                break (slot, guard);
            }
        };

        if !guard.subscription.as_ref().is_some_and(ChannelSubscription::is_live) {
            // A dead subscription's task has already stopped; dropping the
            // handle detaches it.
            guard.subscription = None;
            match self.activate(channel_id).await {
                Ok(subscription) => guard.subscription = Some(subscription),
                Err(e) => {
                    self.retire(channel_id, &slot, &mut guard).await;
                    return Err(e);
                }
            }
        }

        let mut connections = self.inner.connections.write().await;
        // The dispatch task evicts the channel under this same lock when the
        // bus closes it, so liveness checked here holds for the insert.
        if guard.subscription.as_ref().is_some_and(ChannelSubscription::is_live) {
            connections
                .entry(channel_id)
                .or_default()
                .insert(handle.id, handle);
            return Ok(());
        }
        drop(connections);

        guard.subscription = None;
        self.retire(channel_id, &slot, &mut guard).await;
        anyhow::bail!("bus closed the subscription for channel {}", channel_id)
    }

    /// Removes a connection. Returns true when it was the channel's last
    /// one; the channel's subscription is closed before this returns.
    pub async fn unregister(&self, channel_id: i64, connection_id: Uuid) -> bool {
        let Some(slot) = self.existing_slot(channel_id).await else {
            return false;
        };
        let mut guard = slot.lock().await;
        if guard.retired {
            return false;
        }

        let (removed, now_empty) = {
            let mut connections = self.inner.connections.write().await;
            match connections.get_mut(&channel_id) {
                Some(set) => {
                    let removed = set.remove(&connection_id).is_some();
                    let now_empty = set.is_empty();
                    if now_empty {
                        connections.remove(&channel_id);
                    }
                    (removed, now_empty)
                }
                None => (false, true),
            }
        };
        if !now_empty {
            return false;
        }

        let teardown = guard.subscription.take();
        if let Some(subscription) = &teardown {
            subscription.cancel.cancel();
        }
        self.retire(channel_id, &slot, &mut guard).await;
        drop(guard);

        if let Some(subscription) = teardown {
            if let Err(e) = subscription.task.await {
                error!("Dispatch task for channel {} failed: {}", channel_id, e);
            }
            debug!("Channel {} empty, bus subscription closed", channel_id);
        }
        removed
    }

    pub async fn is_active(&self, channel_id: i64) -> bool {
        let Some(slot) = self.existing_slot(channel_id).await else {
            return false;
        };
        let guard = slot.lock().await;
        guard.subscription.as_ref().is_some_and(ChannelSubscription::is_live)
    }

    pub async fn connection_count(&self, channel_id: i64) -> usize {
        self.inner
            .connections
            .read()
            .await
            .get(&channel_id)
            .map_or(0, HashMap::len)
    }

    pub async fn active_channels(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    async fn slot_entry(&self, channel_id: i64) -> SharedSlot {
        self.inner.slots.lock().await.entry(channel_id).or_default().clone()
    }

    async fn existing_slot(&self, channel_id: i64) -> Option<SharedSlot> {
        self.inner.slots.lock().await.get(&channel_id).cloned()
    }

    /// Marks a slot dead and drops it from the slot map, unless a newer slot
    /// already replaced it.
    async fn retire(&self, channel_id: i64, slot: &SharedSlot, state: &mut ChannelSlot) {
        state.retired = true;
        let mut slots = self.inner.slots.lock().await;
        if slots.get(&channel_id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(&channel_id);
        }
    }

    async fn activate(&self, channel_id: i64) -> anyhow::Result<ChannelSubscription> {
        let subscription = self
            .inner
            .bus
            .subscribe(&channel_topic(channel_id))
            .await
            .with_context(|| format!("failed to subscribe to channel {}", channel_id))?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatch_loop(
            channel_id,
            subscription,
            self.inner.connections.clone(),
            cancel.clone(),
        ));
        debug!("Channel {} active, bus subscription opened", channel_id);
        Ok(ChannelSubscription { cancel, task })
    }
}

/// Drains one channel's bus subscription into every local connection on
/// that channel.
async fn dispatch_loop(
    channel_id: i64,
    mut subscription: Subscription,
    connections: Arc<RwLock<ConnectionMap>>,
    cancel: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            payload = subscription.recv() => payload,
        };

        let Some(payload) = payload else {
            // Drop the channel's sockets so their clients reconnect; the
            // next register opens a fresh subscription.
            let mut connections = connections.write().await;
            if !cancel.is_cancelled() {
                cancel.cancel();
                let evicted = connections.remove(&channel_id).map_or(0, |set| set.len());
                error!(
                    "Bus closed the subscription for channel {}, dropped {} connections",
                    channel_id, evicted
                );
            }
            break;
        };

        let connections = connections.read().await;
        // A payload received just before teardown must not reach sockets
        // that registered after it.
        if cancel.is_cancelled() {
            break;
        }
        if let Some(targets) = connections.get(&channel_id) {
            for handle in targets.values() {
                handle.deliver(channel_id, &payload);
            }
        }
    }
}
