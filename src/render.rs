//! Presenter: pure rendering of a progress snapshot into message text.
//!
//! A rendered message has three parts: a header (engine, run label,
//! elapsed time, step count), a body (recent action lines), and a footer
//! (resume hint, and the answer in the final render). The body is
//! trimmed to a character budget, oldest lines first; header and footer
//! are never trimmed.

use std::time::Duration;

use crate::config::ProgressConfig;
use crate::model::{Action, ActionKind, ActionStatus};
use crate::progress::{ProgressState, RunStatus};
use crate::transport::RenderedMessage;

pub const STATUS_RUNNING: &str = "▸";
pub const STATUS_DONE: &str = "✓";
pub const STATUS_WARN: &str = "!";
pub const STATUS_FAIL: &str = "✗";
pub const STATUS_PENDING: &str = "·";
const HEADER_SEP: &str = " · ";

/// Width budget for a single action title.
const ACTION_TITLE_WIDTH: usize = 300;

/// Format elapsed time as `Xh Ym`, `Xm Ys`, or `Xs`.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (minutes, seconds) = (total / 60, total % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

fn status_symbol(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::Pending => STATUS_PENDING,
        ActionStatus::Running => STATUS_RUNNING,
        ActionStatus::Done => STATUS_DONE,
        ActionStatus::Warning => STATUS_WARN,
        ActionStatus::Error => STATUS_FAIL,
    }
}

/// Truncate to `width` characters, appending an ellipsis when trimmed.
fn shorten(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn action_title(action: &Action) -> String {
    let title = shorten(action.title.trim(), ACTION_TITLE_WIDTH);
    match action.kind {
        ActionKind::Command => format!("`{title}`"),
        ActionKind::Tool => format!("tool: {title}"),
        ActionKind::WebSearch => format!("searched: {title}"),
        ActionKind::FileChange => format!("files: {title}"),
        ActionKind::Note | ActionKind::Warning | ActionKind::Turn => title,
    }
}

fn action_line(action: &Action) -> String {
    let symbol = status_symbol(action.status);
    let title = action_title(action);
    let suffix = match action.exit_code {
        Some(code) if code != 0 => format!(" (exit {code})"),
        _ => String::new(),
    };
    format!("{symbol} {title}{suffix}")
}

fn run_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "working",
        RunStatus::Ok => "done",
        RunStatus::Failed => "error",
        RunStatus::Cancelled => "cancelled",
    }
}

/// Pure renderer from [`ProgressState`] to [`RenderedMessage`].
#[derive(Debug, Clone)]
pub struct Presenter {
    char_budget: usize,
    max_actions: usize,
}

impl Presenter {
    #[must_use]
    pub fn new(config: &ProgressConfig) -> Self {
        Self {
            char_budget: config.char_budget,
            max_actions: config.max_actions,
        }
    }

    /// In-flight render: header, recent actions, resume footer.
    #[must_use]
    pub fn render_progress(&self, state: &ProgressState, elapsed: Duration) -> RenderedMessage {
        let body = self.recent_action_lines(state);
        self.assemble(state, elapsed, body, None)
    }

    /// Terminal render: header, answer (or failure context), resume footer.
    #[must_use]
    pub fn render_final(&self, state: &ProgressState, elapsed: Duration) -> RenderedMessage {
        let mut body = Vec::new();
        match state.status {
            RunStatus::Ok => {}
            RunStatus::Failed => {
                // Surface the failure context: trailing warning actions
                // carry the child's stderr tail.
                for action in state.actions.iter().filter(|a| a.kind == ActionKind::Warning) {
                    body.push(action_line(action));
                    if let Some(ref detail) = action.detail {
                        if !detail.is_empty() {
                            body.push(format!("```\n{detail}\n```"));
                        }
                    }
                }
                if body.is_empty() {
                    if let Some(ref error) = state.error {
                        body.push(error.clone());
                    }
                }
            }
            RunStatus::Running | RunStatus::Cancelled => {}
        }
        let answer = state.answer.as_deref().map(str::trim).filter(|a| !a.is_empty());
        self.assemble(state, elapsed, body, answer)
    }

    fn recent_action_lines(&self, state: &ProgressState) -> Vec<String> {
        let visible: Vec<&Action> = state
            .actions
            .iter()
            .filter(|action| action.kind != ActionKind::Turn)
            .collect();
        let skip = visible.len().saturating_sub(self.max_actions);
        visible.into_iter().skip(skip).map(action_line).collect()
    }

    fn header(state: &ProgressState, elapsed: Duration) -> String {
        let mut parts = Vec::new();
        if let Some(ref engine) = state.engine {
            parts.push(engine.to_string());
        }
        parts.push(run_label(state.status).to_owned());
        parts.push(format_elapsed(elapsed));
        let steps = state
            .actions
            .iter()
            .filter(|action| action.kind != ActionKind::Turn)
            .count();
        if steps > 0 {
            parts.push(format!("step {steps}"));
        }
        parts.join(HEADER_SEP)
    }

    fn footer(state: &ProgressState, answer: Option<&str>) -> Vec<String> {
        let mut parts = Vec::new();
        if let Some(answer) = answer {
            parts.push(answer.to_owned());
        }
        if let Some(ref resume) = state.resume {
            parts.push(format!("`{}`", resume.raw));
        }
        parts
    }

    /// Join header, body, footer, trimming body lines (oldest first) so
    /// the body fits the character budget. Header and footer are kept
    /// byte-for-byte.
    fn assemble(
        &self,
        state: &ProgressState,
        elapsed: Duration,
        mut body: Vec<String>,
        answer: Option<&str>,
    ) -> RenderedMessage {
        let header = Self::header(state, elapsed);
        let footer = Self::footer(state, answer);

        let body_chars = |lines: &[String]| -> usize {
            lines.iter().map(|line| line.chars().count() + 1).sum()
        };
        while body.len() > 1 && body_chars(&body) > self.char_budget {
            body.remove(0);
        }
        if body.len() == 1 && body_chars(&body) > self.char_budget {
            body[0] = shorten(&body[0], self.char_budget);
        }

        let mut sections = vec![header];
        if !body.is_empty() {
            sections.push(body.join("\n"));
        }
        if !footer.is_empty() {
            sections.push(footer.join("\n\n"));
        }
        RenderedMessage::new(sections.join("\n\n"))
    }
}
