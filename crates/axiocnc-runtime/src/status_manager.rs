//! Machine Status Manager: a pull-based aggregator of the latest status
//! snapshot per port, kept current by subscribing to the Controller event
//! bus. Never writes back to a Controller; the sole source of truth for
//! the `machine:status` view the REST layer and session hub reply with.

use axiocnc_core::data::MachineStatusSnapshot;
use axiocnc_core::event::{ControllerEvent, EventDispatcher, EventKind};
use axiocnc_core::ids::ControllerId;
use axiocnc_core::modal::ModalState;
use axiocnc_core::workflow::WorkflowState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Counters mirroring `Sender::{sent,received,total}`, kept here so a
/// session's `open` reply doesn't need a round-trip into the Controller task.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SenderCounters {
    pub sent: u64,
    pub received: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FeederCounters {
    pub queued: usize,
    pub held: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedStatus {
    pub machine_status: MachineStatusSnapshot,
    pub workflow_state: WorkflowState,
    pub modal: ModalState,
    pub sender: SenderCounters,
    pub feeder: FeederCounters,
    pub last_update: DateTime<Utc>,
}

/// Shared, clonable handle: every Controller task and every REST/WebSocket
/// handler holds a clone backed by the same map.
#[derive(Clone, Default)]
pub struct StatusManager {
    statuses: Arc<RwLock<HashMap<ControllerId, AggregatedStatus>>>,
}

impl StatusManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task that subscribes to `events` and keeps the map current.
    /// Returns the handle immediately; the subscriber runs until the
    /// dispatcher and all its publishers are dropped.
    pub fn spawn(events: &EventDispatcher) -> (Self, tokio::task::JoinHandle<()>) {
        let manager = Self::new();
        let mut rx = events.subscribe();
        let worker = manager.clone();
        let join = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                worker.apply(event).await;
            }
        });
        (manager, join)
    }

    async fn apply(&self, event: ControllerEvent) {
        let Some(controller) = event.controller else {
            return;
        };
        match event.kind {
            EventKind::MachineStatus { status } => {
                self.update(controller, |entry| entry.machine_status = status).await;
            }
            EventKind::WorkflowState { state } => {
                self.update(controller, |entry| entry.workflow_state = state).await;
            }
            EventKind::ControllerState { modal } => {
                self.update(controller, |entry| entry.modal = modal).await;
            }
            EventKind::SenderStatus { sent, received, total } => {
                self.update(controller, |entry| {
                    entry.sender = SenderCounters { sent, received, total };
                })
                .await;
            }
            EventKind::FeederStatus { queued, held } => {
                self.update(controller, |entry| {
                    entry.feeder = FeederCounters { queued, held };
                })
                .await;
            }
            EventKind::SerialPortClose => {
                self.remove(&controller).await;
            }
            _ => {}
        }
    }

    async fn update(&self, controller: ControllerId, mutate: impl FnOnce(&mut AggregatedStatus)) {
        let mut guard = self.statuses.write().await;
        let entry = guard.entry(controller).or_insert_with(|| AggregatedStatus {
            machine_status: MachineStatusSnapshot::disconnected("grbl"),
            workflow_state: WorkflowState::Idle,
            modal: ModalState::default(),
            sender: SenderCounters::default(),
            feeder: FeederCounters::default(),
            last_update: Utc::now(),
        });
        mutate(entry);
        entry.last_update = Utc::now();
    }

    pub async fn get(&self, controller: &ControllerId) -> Option<AggregatedStatus> {
        self.statuses.read().await.get(controller).cloned()
    }

    pub async fn all(&self) -> HashMap<ControllerId, AggregatedStatus> {
        self.statuses.read().await.clone()
    }

    pub async fn remove(&self, controller: &ControllerId) {
        self.statuses.write().await.remove(controller);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axiocnc_core::data::ReadyState;

    fn id() -> ControllerId {
        ControllerId::new("/dev/ttyUSB0", 115200)
    }

    #[tokio::test]
    async fn machine_status_event_updates_the_aggregate() {
        let manager = StatusManager::new();
        let mut status = MachineStatusSnapshot::disconnected("grbl");
        status.connected = true;
        status.ready_state = ReadyState::ConnectedPostHome;
        manager.apply(ControllerEvent::scoped(id(), EventKind::MachineStatus { status })).await;

        let got = manager.get(&id()).await.unwrap();
        assert!(got.machine_status.connected);
        assert_eq!(got.machine_status.ready_state, ReadyState::ConnectedPostHome);
    }

    #[tokio::test]
    async fn global_events_without_a_controller_are_ignored() {
        let manager = StatusManager::new();
        manager
            .apply(ControllerEvent::global(EventKind::GcodeUnload))
            .await;
        assert!(manager.all().await.is_empty());
    }

    #[tokio::test]
    async fn sender_status_event_updates_the_counters() {
        let manager = StatusManager::new();
        manager
            .apply(ControllerEvent::scoped(
                id(),
                EventKind::SenderStatus { sent: 3, received: 2, total: 10 },
            ))
            .await;
        let got = manager.get(&id()).await.unwrap();
        assert_eq!(got.sender.sent, 3);
        assert_eq!(got.sender.received, 2);
        assert_eq!(got.sender.total, 10);
    }

    #[tokio::test]
    async fn serial_port_close_removes_the_entry() {
        let manager = StatusManager::new();
        let status = MachineStatusSnapshot::disconnected("grbl");
        manager
            .apply(ControllerEvent::scoped(id(), EventKind::MachineStatus { status }))
            .await;
        assert!(manager.get(&id()).await.is_some());

        manager
            .apply(ControllerEvent::scoped(id(), EventKind::SerialPortClose))
            .await;
        assert!(manager.get(&id()).await.is_none());
    }
}
