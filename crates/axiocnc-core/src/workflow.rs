//! Workflow state machine: the idle/running/paused lifecycle of a loaded
//! program.
//!
//! `holdReason` is embedded directly inside [`WorkflowState::Paused`] rather
//! than tracked alongside it, so a paused state without an agreed reason is
//! unrepresentable — the Feeder or Sender cannot set a hold reason without
//! the Controller also making the `Paused` transition.

use serde::{Deserialize, Serialize};

/// Why the workflow is paused. Set only in the same transition that moves
/// the workflow into `Paused`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldReason {
    pub err: bool,
    pub data: Option<String>,
    pub msg: Option<String>,
}

impl HoldReason {
    pub fn program_stop(data: impl Into<String>, msg: Option<String>) -> Self {
        Self {
            err: false,
            data: Some(data.into()),
            msg,
        }
    }

    pub fn controller_error(description: impl Into<String>) -> Self {
        Self {
            err: true,
            data: None,
            msg: Some(description.into()),
        }
    }

    pub fn user_requested() -> Self {
        Self {
            err: false,
            data: None,
            msg: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkflowState {
    Idle,
    Running,
    Paused { hold_reason: HoldReason },
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused { .. } => write!(f, "paused"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowTransition {
    Start,
    Pause,
    Resume,
    Stop,
}

impl WorkflowState {
    /// Validate and apply a transition, per the edges named in the
    /// controller's state diagram: idle--start-->running, running<->paused
    /// via pause/resume, any--stop-->idle.
    pub fn apply(
        &self,
        transition: WorkflowTransition,
        hold_reason: Option<HoldReason>,
    ) -> Result<WorkflowState, WorkflowTransitionError> {
        use WorkflowTransition::*;
        match (self, transition) {
            (WorkflowState::Idle, Start) => Ok(WorkflowState::Running),
            (WorkflowState::Running, Pause) => Ok(WorkflowState::Paused {
                hold_reason: hold_reason.ok_or(WorkflowTransitionError::MissingHoldReason)?,
            }),
            (WorkflowState::Paused { .. }, Resume) => Ok(WorkflowState::Running),
            (_, Stop) => Ok(WorkflowState::Idle),
            (state, transition) => Err(WorkflowTransitionError::Invalid {
                from: state.clone(),
                transition,
            }),
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, WorkflowState::Paused { .. })
    }

    pub fn hold_reason(&self) -> Option<&HoldReason> {
        match self {
            WorkflowState::Paused { hold_reason } => Some(hold_reason),
            _ => None,
        }
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        WorkflowState::Idle
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkflowTransitionError {
    #[error("transition {transition:?} is not valid from {from}")]
    Invalid {
        from: WorkflowState,
        transition: WorkflowTransition,
    },
    #[error("pause transition requires a hold reason")]
    MissingHoldReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_to_running_on_start() {
        let state = WorkflowState::Idle;
        let next = state.apply(WorkflowTransition::Start, None).unwrap();
        assert_eq!(next, WorkflowState::Running);
    }

    #[test]
    fn pause_requires_a_hold_reason() {
        let state = WorkflowState::Running;
        let err = state.apply(WorkflowTransition::Pause, None).unwrap_err();
        assert!(matches!(err, WorkflowTransitionError::MissingHoldReason));
    }

    #[test]
    fn pause_then_resume_round_trips_to_running() {
        let state = WorkflowState::Running;
        let paused = state
            .apply(
                WorkflowTransition::Pause,
                Some(HoldReason::program_stop("M6", Some("swap bit".into()))),
            )
            .unwrap();
        assert!(paused.is_paused());
        assert_eq!(
            paused.hold_reason().unwrap().data.as_deref(),
            Some("M6")
        );
        let running = paused.apply(WorkflowTransition::Resume, None).unwrap();
        assert_eq!(running, WorkflowState::Running);
    }

    #[test]
    fn stop_is_valid_from_any_state() {
        let idle = WorkflowState::Idle;
        let running = WorkflowState::Running;
        let paused = WorkflowState::Paused {
            hold_reason: HoldReason::user_requested(),
        };
        assert_eq!(
            idle.apply(WorkflowTransition::Stop, None).unwrap(),
            WorkflowState::Idle
        );
        assert_eq!(
            running.apply(WorkflowTransition::Stop, None).unwrap(),
            WorkflowState::Idle
        );
        assert_eq!(
            paused.apply(WorkflowTransition::Stop, None).unwrap(),
            WorkflowState::Idle
        );
    }

    #[test]
    fn resume_from_idle_is_invalid() {
        let state = WorkflowState::Idle;
        let err = state.apply(WorkflowTransition::Resume, None).unwrap_err();
        assert!(matches!(err, WorkflowTransitionError::Invalid { .. }));
    }
}
