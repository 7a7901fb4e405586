//! # AxioCNC Core
//!
//! Data model, error taxonomy, and event/message dispatch shared by every
//! other AxioCNC crate: controller identity, modal interpreter state,
//! position/status snapshots, the workflow state machine, and the
//! broadcast buses that carry controller events and log messages.

pub mod data;
pub mod error;
pub mod event;
pub mod ids;
pub mod message;
pub mod modal;
pub mod units;
pub mod workflow;

pub use data::{
    CNCPoint, CommunicatorState, MachineStatusSnapshot, PartialPosition, ReadyState,
};
pub use error::{
    AuthError, ControllerAlarm, ControllerError, Error, FeederError, PortError, ProtocolError,
    Result, ValidationError,
};
pub use event::{ControllerEvent, EventDispatcher, EventKind};
pub use ids::{ControllerFamily, ControllerId};
pub use message::{Message, MessageDispatcher, MessageLevel};
pub use modal::{
    CoolantState, CoordinateSystem, DistanceMode, FeedMode, ModalState, MotionMode, Plane,
    SpindleState, ToolLengthOffsetMode, Units,
};
pub use workflow::{HoldReason, WorkflowState, WorkflowTransition, WorkflowTransitionError};
