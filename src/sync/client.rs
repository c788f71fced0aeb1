//! Per-instance binding to the sync bus.
//!
//! The client owns this instance's identity on the channel, republishes local
//! mutations, and collapses incoming data events into a single watch counter
//! that view code subscribes to: every bump means "re-read the store". It
//! also keeps an advisory count of connected sibling instances from presence
//! events.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{MessageBus, SyncEvent, SyncEventKind};
use crate::models::Patient;

pub struct SyncClient {
    bus: Arc<dyn MessageBus>,
    instance_id: Uuid,
    changes_rx: watch::Receiver<u64>,
    peers: Arc<AtomicUsize>,
    pump: JoinHandle<()>,
}

impl SyncClient {
    /// Attach to the bus. Subscribes before announcing presence, so nothing
    /// published after this call can be missed.
    pub fn attach(bus: Arc<dyn MessageBus>) -> SyncClient {
        let instance_id = Uuid::new_v4();
        let (changes_tx, changes_rx) = watch::channel(0u64);
        let peers = Arc::new(AtomicUsize::new(1));

        let rx = bus.subscribe();
        let pump = tokio::spawn(pump_events(rx, instance_id, changes_tx, peers.clone()));

        debug!(%instance_id, channel = bus.name(), "sync client attached");
        bus.publish(SyncEvent::instance_connected(instance_id));

        SyncClient { bus, instance_id, changes_rx, peers, pump }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Known instances on the channel, ourselves included. Advisory: derived
    /// from presence events, never allowed below 1, and blind to instances
    /// that announced themselves before we subscribed.
    pub fn connected_instances(&self) -> usize {
        self.peers.load(Ordering::Relaxed)
    }

    /// Counter bumped on every data-change event (local ones included).
    /// Subscribe, and re-read the store whenever it changes.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes_rx.clone()
    }

    pub fn publish_added(&self, patient: &Patient) {
        self.publish(SyncEvent::patient_added(self.instance_id, patient));
    }

    pub fn publish_deleted(&self, id: i64) {
        self.publish(SyncEvent::patient_deleted(self.instance_id, id));
    }

    /// Blanket refresh request, for mutations made outside the gateway.
    pub fn publish_refresh(&self) {
        self.publish(SyncEvent::patients_updated(self.instance_id));
    }

    fn publish(&self, event: SyncEvent) {
        let kind = event.kind;
        let delivered = self.bus.publish(event);
        trace!(?kind, delivered, "published sync event");
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.bus.publish(SyncEvent::instance_disconnected(self.instance_id));
        self.pump.abort();
    }
}

async fn pump_events(
    mut rx: broadcast::Receiver<SyncEvent>,
    instance_id: Uuid,
    changes: watch::Sender<u64>,
    peers: Arc<AtomicUsize>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => handle_event(event, instance_id, &changes, &peers),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                // Missed notifications are recoverable by design: one refresh
                // re-reads everything.
                warn!(missed, "sync receiver lagged, forcing a refresh");
                bump(&changes);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn handle_event(
    event: SyncEvent,
    instance_id: Uuid,
    changes: &watch::Sender<u64>,
    peers: &AtomicUsize,
) {
    match event.kind {
        kind if kind.is_data_change() => {
            // Loopback included: a redundant local refresh is harmless.
            trace!(?kind, origin = %event.origin, "data change notification");
            bump(changes);
        }
        SyncEventKind::InstanceConnected if event.origin != instance_id => {
            peers.fetch_add(1, Ordering::Relaxed);
        }
        SyncEventKind::InstanceDisconnected if event.origin != instance_id => {
            // We always count ourselves; never drop below 1.
            let _ = peers.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n > 1).then(|| n - 1)
            });
        }
        _ => {}
    }
}

fn bump(changes: &watch::Sender<u64>) {
    changes.send_modify(|version| *version = version.wrapping_add(1));
}
