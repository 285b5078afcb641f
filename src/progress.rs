//! Progress tracker: a pure reducer folding run events into a snapshot.
//!
//! `note_event` is deterministic and does no I/O: two runs that consume
//! identical event sequences produce identical `ProgressState` values.
//! Illegal inputs (unknown action ids, backwards status transitions,
//! events after the terminal `Completed`) are ignored so the state can
//! never leave its invariants.

use serde::Serialize;

use crate::model::{
    Action, ActionStatus, EngineId, Event, EventPayload, ResumeToken, CANCELLED_ERROR,
};

/// Overall status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Ok,
    Failed,
    Cancelled,
}

/// Folded snapshot of a run, suitable for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressState {
    pub engine: Option<EngineId>,
    pub resume: Option<ResumeToken>,
    pub actions: Vec<Action>,
    pub answer: Option<String>,
    pub error: Option<String>,
    pub status: RunStatus,
    pub started_seen: bool,
    pub resume_known_at_start: bool,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            engine: None,
            resume: None,
            actions: Vec::new(),
            answer: None,
            error: None,
            status: RunStatus::Running,
            started_seen: false,
            resume_known_at_start: false,
        }
    }
}

impl ProgressState {
    /// Fresh state pre-seeded with the engine, for the initial render
    /// before any event arrives.
    #[must_use]
    pub fn for_engine(engine: EngineId) -> Self {
        Self {
            engine: Some(engine),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::Running
    }
}

/// Folds events into a [`ProgressState`].
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: ProgressState,
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_engine(engine: EngineId) -> Self {
        Self {
            state: ProgressState::for_engine(engine),
        }
    }

    #[must_use]
    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressState {
        self.state.clone()
    }

    /// Fold one event. Returns `true` if the state changed.
    pub fn note_event(&mut self, event: &Event) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        if self.state.engine.is_none() {
            self.state.engine = Some(event.engine.clone());
        }
        if self.state.resume.is_none() {
            self.state.resume.clone_from(&event.resume);
        }

        match event.payload {
            EventPayload::Started { resume_known } => {
                self.state.started_seen = true;
                self.state.resume_known_at_start = resume_known;
                true
            }
            EventPayload::Action { ref action } => {
                self.state.actions.push(action.clone());
                true
            }
            EventPayload::ActionStarted { ref action } => {
                self.state.actions.push(action.clone());
                true
            }
            EventPayload::ActionUpdated {
                ref id,
                ref title,
                ref detail,
            } => {
                let Some(action) = self.find_open_action(id) else {
                    return false;
                };
                if let Some(title) = title {
                    action.title.clone_from(title);
                }
                if let Some(detail) = detail {
                    action.detail = Some(detail.clone());
                }
                true
            }
            EventPayload::ActionCompleted {
                ref id,
                status,
                ref detail,
                exit_code,
                ended_at,
            } => {
                let Some(action) = self.find_open_action(id) else {
                    return false;
                };
                if !action.status.can_transition_to(status) {
                    return false;
                }
                action.status = status;
                if let Some(detail) = detail {
                    action.detail = Some(detail.clone());
                }
                if exit_code.is_some() {
                    action.exit_code = exit_code;
                }
                action.ended_at = ended_at;
                true
            }
            EventPayload::Completed {
                ok,
                ref answer,
                ref error,
            } => {
                self.state.answer.clone_from(answer);
                self.state.error.clone_from(error);
                self.state.status = if ok {
                    RunStatus::Ok
                } else if error.as_deref() == Some(CANCELLED_ERROR) {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                true
            }
        }
    }

    /// Most recent non-terminal action with the given id.
    fn find_open_action(&mut self, id: &str) -> Option<&mut Action> {
        self.state
            .actions
            .iter_mut()
            .rev()
            .find(|action| action.id.as_deref() == Some(id) && !action.status.is_terminal())
    }
}
