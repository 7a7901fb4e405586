//! Controller event bus.
//!
//! Distinct from [`crate::message::Message`]: events are structured,
//! port-scoped notifications consumed by client sessions (Session Hub
//! broadcast); messages are free-text diagnostics for an operator console.

use crate::data::MachineStatusSnapshot;
use crate::ids::ControllerId;
use crate::modal::ModalState;
use crate::workflow::WorkflowState;
use serde::Serialize;
use tokio::sync::broadcast;

/// One event, always attributed to a controller except the handful of
/// global events (`task:*`) that are not port-scoped.
#[derive(Debug, Clone)]
pub struct ControllerEvent {
    pub controller: Option<ControllerId>,
    pub kind: EventKind,
}

impl ControllerEvent {
    pub fn scoped(controller: ControllerId, kind: EventKind) -> Self {
        Self {
            controller: Some(controller),
            kind,
        }
    }

    pub fn global(kind: EventKind) -> Self {
        Self {
            controller: None,
            kind,
        }
    }
}

/// Event kinds named by the controller's command surface and status flow.
///
/// Serialized (not just `Display`-rendered) so the Session Hub can forward
/// the full structured payload — mpos/wpos/modal/counters — to subscribers
/// instead of a bare label.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    SerialPortOpen,
    SerialPortClose,
    SerialPortRead { raw: String },
    SerialPortWrite { raw: String },
    SerialPortError { reason: String },
    ControllerSettings { key: String, value: String },
    ControllerState { modal: ModalState },
    MachineStatus { status: MachineStatusSnapshot },
    FeederStatus { queued: usize, held: bool },
    SenderStatus { sent: u64, received: u64, total: u64 },
    WorkflowState { state: WorkflowState },
    GcodeLoad { name: String, total: u64 },
    GcodeUnload,
    TaskStart { task: String },
    TaskFinish { task: String },
    TaskError { task: String, reason: String },
}

impl std::fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.controller {
            Some(id) => write!(f, "[{}] {}", id, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerialPortOpen => write!(f, "serialport:open"),
            Self::SerialPortClose => write!(f, "serialport:close"),
            Self::SerialPortRead { raw } => write!(f, "serialport:read {raw:?}"),
            Self::SerialPortWrite { raw } => write!(f, "serialport:write {raw:?}"),
            Self::SerialPortError { reason } => write!(f, "serialport:error {reason}"),
            Self::ControllerSettings { key, value } => {
                write!(f, "controller:settings {key}={value}")
            }
            Self::ControllerState { .. } => write!(f, "controller:state"),
            Self::MachineStatus { .. } => write!(f, "machine:status"),
            Self::FeederStatus { queued, held } => {
                write!(f, "feeder:status queued={queued} held={held}")
            }
            Self::SenderStatus {
                sent,
                received,
                total,
            } => write!(f, "sender:status {sent}/{received}/{total}"),
            Self::WorkflowState { state } => write!(f, "workflow:state {state}"),
            Self::GcodeLoad { name, total } => write!(f, "gcode:load {name} ({total} lines)"),
            Self::GcodeUnload => write!(f, "gcode:unload"),
            Self::TaskStart { task } => write!(f, "task:start {task}"),
            Self::TaskFinish { task } => write!(f, "task:finish {task}"),
            Self::TaskError { task, reason } => write!(f, "task:error {task}: {reason}"),
        }
    }
}

/// Broadcasts [`ControllerEvent`]s to any number of subscribers (Session Hub
/// per-port fan-out, Machine Status Manager).
pub struct EventDispatcher {
    tx: broadcast::Sender<ControllerEvent>,
}

impl EventDispatcher {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    pub fn default_with_buffer() -> Self {
        Self::new(100)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.tx.subscribe()
    }

    pub fn publish(
        &self,
        event: ControllerEvent,
    ) -> Result<usize, broadcast::error::SendError<ControllerEvent>> {
        tracing::trace!(%event, "publishing controller event");
        self.tx.send(event)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Clone for EventDispatcher {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::default_with_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_event_has_no_controller() {
        let event = ControllerEvent::global(EventKind::TaskStart {
            task: "watch-folder-scan".into(),
        });
        assert!(event.controller.is_none());
    }

    #[test]
    fn scoped_event_displays_controller_id() {
        let id = ControllerId::new("/dev/ttyUSB0", 115200);
        let event = ControllerEvent::scoped(id.clone(), EventKind::SerialPortOpen);
        assert!(event.to_string().contains(&id.to_string()));
    }

    #[tokio::test]
    async fn dispatcher_broadcasts_to_all_subscribers() {
        let dispatcher = EventDispatcher::default_with_buffer();
        let mut rx1 = dispatcher.subscribe();
        let mut rx2 = dispatcher.subscribe();
        dispatcher
            .publish(ControllerEvent::global(EventKind::GcodeUnload))
            .unwrap();

        let e1 = tokio::time::timeout(std::time::Duration::from_secs(1), rx1.recv())
            .await
            .unwrap()
            .unwrap();
        let e2 = tokio::time::timeout(std::time::Duration::from_secs(1), rx2.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(e1.kind, EventKind::GcodeUnload));
        assert!(matches!(e2.kind, EventKind::GcodeUnload));
    }
}
