//! Change notification between application instances.
//!
//! Every instance attaches to a named channel and publishes an envelope after
//! each committed mutation. Payloads are advisory: receivers treat any data
//! event as "something changed" and re-read from the store, so a dropped or
//! duplicated notification can never corrupt anyone's view. The transport
//! loops events back to the sender; handlers are written to be loopback-safe.

pub mod client;

pub use client::SyncClient;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::Patient;

/// Channel name instances must share to see each other.
pub const DEFAULT_CHANNEL: &str = "patient-registration-sync";

/// Buffered events per subscriber before the transport drops the oldest.
pub const DEFAULT_CAPACITY: usize = 64;

/// What changed. Data events ask receivers to refresh; presence events keep
/// the connected-instance count advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEventKind {
    PatientAdded,
    PatientDeleted,
    PatientsUpdated,
    InstanceConnected,
    InstanceDisconnected,
}

impl SyncEventKind {
    pub fn is_data_change(&self) -> bool {
        matches!(
            self,
            SyncEventKind::PatientAdded | SyncEventKind::PatientDeleted | SyncEventKind::PatientsUpdated
        )
    }
}

/// Envelope published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub kind: SyncEventKind,
    /// Advisory payload; never a substitute for re-reading the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Instance that published the event.
    pub origin: Uuid,
}

impl SyncEvent {
    pub fn patient_added(origin: Uuid, patient: &Patient) -> Self {
        SyncEvent {
            kind: SyncEventKind::PatientAdded,
            data: serde_json::to_value(patient).ok(),
            origin,
        }
    }

    pub fn patient_deleted(origin: Uuid, id: i64) -> Self {
        SyncEvent {
            kind: SyncEventKind::PatientDeleted,
            data: Some(serde_json::json!({ "id": id })),
            origin,
        }
    }

    /// Catch-all refresh request, e.g. after an out-of-band mutation.
    pub fn patients_updated(origin: Uuid) -> Self {
        SyncEvent { kind: SyncEventKind::PatientsUpdated, data: None, origin }
    }

    pub fn instance_connected(origin: Uuid) -> Self {
        SyncEvent { kind: SyncEventKind::InstanceConnected, data: None, origin }
    }

    pub fn instance_disconnected(origin: Uuid) -> Self {
        SyncEvent { kind: SyncEventKind::InstanceDisconnected, data: None, origin }
    }
}

/// Publish/subscribe seam between instances.
///
/// Production uses [`BroadcastBus`]; tests substitute their own to observe
/// exactly what gets published.
#[cfg_attr(test, mockall::automock)]
pub trait MessageBus: Send + Sync {
    /// Deliver to every current subscriber, the sender's own included.
    /// Returns how many subscribers received the event. Best effort: zero
    /// subscribers is not an error.
    fn publish(&self, event: SyncEvent) -> usize;

    fn subscribe(&self) -> broadcast::Receiver<SyncEvent>;

    /// Channel name, for diagnostics.
    fn name(&self) -> &str;
}

/// In-process transport over a tokio broadcast channel. Clones share the
/// channel, so handing clones to several instances wires them together.
#[derive(Clone)]
pub struct BroadcastBus {
    name: String,
    tx: broadcast::Sender<SyncEvent>,
}

impl BroadcastBus {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        BroadcastBus { name: name.into(), tx }
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        BroadcastBus::new(DEFAULT_CHANNEL, DEFAULT_CAPACITY)
    }
}

impl MessageBus for BroadcastBus {
    fn publish(&self, event: SyncEvent) -> usize {
        // send only fails when nobody is subscribed
        self.tx.send(event).unwrap_or(0)
    }

    fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
