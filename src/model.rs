//! Domain model: engine ids, resume tokens, actions, and the event union.
//!
//! Every event a runner emits is stamped by an [`EventFactory`] with the
//! owning engine id and the latest observed resume token, so downstream
//! consumers (tracker, presenter) never have to guess which run an event
//! belongs to.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

// ── Engine id ─────────────────────────────────────────────────────────────────

/// Opaque symbolic id of an engine (`codex`, `claude`, `pi`, …).
///
/// Ids are lowercase and match `[a-z][a-z0-9_-]*`, the same shape the
/// command menu and `/engine` directives accept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(String);

impl EngineId {
    /// Validate and wrap a raw engine id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the id is empty or contains characters
    /// outside `[a-z0-9_-]` (or does not start with a letter).
    pub fn new(raw: &str) -> Result<Self> {
        let mut chars = raw.chars();
        let valid_head = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        let valid_tail = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !valid_head || !valid_tail {
            return Err(AppError::Config(format!(
                "invalid engine id {raw:?}; expected [a-z][a-z0-9_-]*"
            )));
        }
        Ok(Self(raw.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EngineId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EngineId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// ── Resume token ──────────────────────────────────────────────────────────────

/// Opaque handle usable to resume a prior engine session.
///
/// `raw` is the engine-formatted command line (e.g. `codex resume abc123`)
/// exactly as it appears in the progress footer and in incoming messages.
/// Tokens compare by `(engine, raw)`; the structured `session_id` /
/// `session_path` fields exist for argv construction only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeToken {
    pub engine: EngineId,
    pub raw: String,
    pub session_id: Option<String>,
    pub session_path: Option<PathBuf>,
}

impl ResumeToken {
    /// Token backed by an engine session id.
    #[must_use]
    pub fn with_session_id(engine: EngineId, raw: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            engine,
            raw: raw.into(),
            session_id: Some(session_id.into()),
            session_path: None,
        }
    }

    /// Token backed by an on-disk session file.
    #[must_use]
    pub fn with_session_path(engine: EngineId, raw: impl Into<String>, path: PathBuf) -> Self {
        Self {
            engine,
            raw: raw.into(),
            session_id: None,
            session_path: Some(path),
        }
    }
}

impl PartialEq for ResumeToken {
    fn eq(&self, other: &Self) -> bool {
        self.engine == other.engine && self.raw == other.raw
    }
}

impl Eq for ResumeToken {}

impl std::hash::Hash for ResumeToken {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.engine.hash(state);
        self.raw.hash(state);
    }
}

// ── Actions ───────────────────────────────────────────────────────────────────

/// Lifecycle status of a single action.
///
/// Transitions are monotone: `Pending → Running → (Done | Warning | Error)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Done,
    Warning,
    Error,
}

impl ActionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Warning | Self::Error)
    }

    /// Whether moving from `self` to `next` is a legal (forward) transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            Self::Done | Self::Warning | Self::Error => false,
        }
    }
}

/// Category of agent work an action represents; drives presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Command,
    Tool,
    WebSearch,
    FileChange,
    Note,
    Warning,
    Turn,
}

/// A unit of agent work displayed in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Translator-provided correlation id; absent for fire-and-forget notes.
    pub id: Option<String>,
    pub kind: ActionKind,
    pub title: String,
    pub status: ActionStatus,
    pub detail: Option<String>,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Action {
    /// A standalone action with no id, already in its final status.
    #[must_use]
    pub fn note(kind: ActionKind, title: impl Into<String>, status: ActionStatus) -> Self {
        Self {
            id: None,
            kind,
            title: title.into(),
            status,
            detail: None,
            exit_code: None,
            started_at: None,
            ended_at: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Normalized engine event payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// First event of every run.
    Started { resume_known: bool },
    /// Standalone action appended to the list (no id).
    Action { action: Action },
    /// A new identified action began.
    ActionStarted { action: Action },
    /// Patch named fields of a known action.
    ActionUpdated {
        id: String,
        title: Option<String>,
        detail: Option<String>,
    },
    /// Finalize a known action.
    ActionCompleted {
        id: String,
        status: ActionStatus,
        detail: Option<String>,
        exit_code: Option<i32>,
        ended_at: Option<DateTime<Utc>>,
    },
    /// Terminal event of every run; exactly one per run.
    Completed {
        ok: bool,
        answer: Option<String>,
        error: Option<String>,
    },
}

/// A normalized engine event, stamped with the owning engine and the
/// latest observed resume token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub engine: EngineId,
    pub resume: Option<ResumeToken>,
    pub payload: EventPayload,
}

/// Error message carried by the terminal event of a cancelled run.
pub const CANCELLED_ERROR: &str = "cancelled";

// ── Event factory ─────────────────────────────────────────────────────────────

/// Stamps every event of one run with the engine id and resume token.
///
/// Owned by a single run; translators call [`EventFactory::set_resume`]
/// when the engine reveals its session handle, and every event created
/// afterwards carries it.
#[derive(Debug)]
pub struct EventFactory {
    engine: EngineId,
    resume: Option<ResumeToken>,
}

impl EventFactory {
    #[must_use]
    pub fn new(engine: EngineId) -> Self {
        Self { engine, resume: None }
    }

    #[must_use]
    pub fn with_resume(engine: EngineId, resume: Option<ResumeToken>) -> Self {
        Self { engine, resume }
    }

    pub fn set_resume(&mut self, token: ResumeToken) {
        self.resume = Some(token);
    }

    #[must_use]
    pub fn resume(&self) -> Option<&ResumeToken> {
        self.resume.as_ref()
    }

    #[must_use]
    pub fn engine(&self) -> &EngineId {
        &self.engine
    }

    fn stamp(&self, payload: EventPayload) -> Event {
        Event {
            engine: self.engine.clone(),
            resume: self.resume.clone(),
            payload,
        }
    }

    #[must_use]
    pub fn started(&self) -> Event {
        self.stamp(EventPayload::Started {
            resume_known: self.resume.is_some(),
        })
    }

    #[must_use]
    pub fn action(&self, action: Action) -> Event {
        self.stamp(EventPayload::Action { action })
    }

    /// A new running action with the given id.
    #[must_use]
    pub fn action_started(&self, id: impl Into<String>, kind: ActionKind, title: impl Into<String>) -> Event {
        self.stamp(EventPayload::ActionStarted {
            action: Action {
                id: Some(id.into()),
                kind,
                title: title.into(),
                status: ActionStatus::Running,
                detail: None,
                exit_code: None,
                started_at: Some(Utc::now()),
                ended_at: None,
            },
        })
    }

    #[must_use]
    pub fn action_updated(&self, id: impl Into<String>, title: Option<String>, detail: Option<String>) -> Event {
        self.stamp(EventPayload::ActionUpdated {
            id: id.into(),
            title,
            detail,
        })
    }

    #[must_use]
    pub fn action_completed(
        &self,
        id: impl Into<String>,
        status: ActionStatus,
        detail: Option<String>,
        exit_code: Option<i32>,
    ) -> Event {
        self.stamp(EventPayload::ActionCompleted {
            id: id.into(),
            status,
            detail,
            exit_code,
            ended_at: Some(Utc::now()),
        })
    }

    #[must_use]
    pub fn completed_ok(&self, answer: Option<String>) -> Event {
        self.stamp(EventPayload::Completed {
            ok: true,
            answer,
            error: None,
        })
    }

    #[must_use]
    pub fn completed_err(&self, error: impl Into<String>) -> Event {
        self.stamp(EventPayload::Completed {
            ok: false,
            answer: None,
            error: Some(error.into()),
        })
    }

    #[must_use]
    pub fn completed_cancelled(&self) -> Event {
        self.completed_err(CANCELLED_ERROR)
    }
}
