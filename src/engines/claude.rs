//! Claude engine backend.
//!
//! Invocation: `claude -p --output-format stream-json --verbose
//! [--resume <id>] <prompt>`. Resume hint: `claude --resume <id>`.
//!
//! The stream-json dialect wraps API messages: `system/init` carries the
//! session id, `assistant` messages carry text and `tool_use` blocks,
//! `user` messages carry `tool_result` blocks, and a terminal `result`
//! record carries the final answer and error flag.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::EngineConfig;
use crate::engines::{is_token_like, resume_line_tokens};
use crate::model::{ActionKind, ActionStatus, EngineId, Event, EventFactory, ResumeToken};
use crate::runner::exec::{run_exec, Translator};
use crate::runner::process::SpawnSpec;
use crate::runner::{EventStream, ResumeLocks, Runner};
use crate::{AppError, Result};

pub struct ClaudeRunner {
    engine: EngineId,
    program: String,
    extra_args: Vec<String>,
    locks: ResumeLocks,
}

impl ClaudeRunner {
    #[must_use]
    pub fn new(engine: EngineId, config: &EngineConfig, locks: ResumeLocks) -> Self {
        Self {
            engine,
            program: config.program.clone().unwrap_or_else(|| "claude".into()),
            extra_args: config.extra_args.clone(),
            locks,
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

fn format_resume(session_id: &str) -> String {
    format!("claude --resume {session_id}")
}

#[async_trait]
impl Runner for ClaudeRunner {
    fn engine_id(&self) -> &EngineId {
        &self.engine
    }

    fn resolve_resume(&self, text: &str) -> Option<ResumeToken> {
        for line in text.lines() {
            if let ["claude", "--resume", token] = resume_line_tokens(line)[..] {
                if is_token_like(token) {
                    return Some(ResumeToken::with_session_id(
                        self.engine.clone(),
                        format_resume(token),
                        token,
                    ));
                }
            }
        }
        None
    }

    async fn run(
        &self,
        prompt: &str,
        resume: Option<ResumeToken>,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let mut args = vec![
            "-p".to_owned(),
            "--output-format".to_owned(),
            "stream-json".to_owned(),
            "--verbose".to_owned(),
        ];
        if let Some(ref token) = resume {
            let id = token
                .session_id
                .clone()
                .ok_or_else(|| AppError::Config("claude resume token missing session id".into()))?;
            args.push("--resume".to_owned());
            args.push(id);
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(prompt.to_owned());

        let spec = SpawnSpec::new(self.program.clone(), args);

        run_exec(
            self.engine.clone(),
            spec,
            Box::new(ClaudeTranslator::default()),
            resume,
            self.locks.clone(),
            cancel,
        )
    }
}

// ── Translator ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ClaudeRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    message: Option<ClaudeMessage>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    is_error: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ClaudeMessage {
    #[serde(default)]
    content: Vec<ClaudeContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default)]
pub struct ClaudeTranslator {
    /// Assistant text accumulated as a fallback answer when the terminal
    /// `result` record carries none.
    text: Option<String>,
}

impl ClaudeTranslator {
    fn push_text(&mut self, text: &str) {
        match self.text {
            Some(ref mut acc) => {
                acc.push_str("\n\n");
                acc.push_str(text);
            }
            None => self.text = Some(text.to_owned()),
        }
    }
}

impl Translator for ClaudeTranslator {
    fn note_line(&mut self, line: &str, factory: &mut EventFactory) -> Result<Vec<Event>> {
        let record: ClaudeRecord = serde_json::from_str(line)
            .map_err(|err| AppError::Translation(format!("claude: malformed json: {err}")))?;

        match record.kind.as_str() {
            "system" => {
                if record.subtype.as_deref() == Some("init") {
                    let id = record.session_id.ok_or_else(|| {
                        AppError::Translation("claude: init without session_id".into())
                    })?;
                    factory.set_resume(ResumeToken::with_session_id(
                        factory.engine().clone(),
                        format_resume(&id),
                        id,
                    ));
                }
                Ok(Vec::new())
            }
            "assistant" => {
                let mut events = Vec::new();
                for content in record.message.map(|m| m.content).unwrap_or_default() {
                    match content {
                        ClaudeContent::Text { text } => self.push_text(&text),
                        ClaudeContent::ToolUse { id, name, input } => {
                            let (kind, title) = tool_title(&name, &input);
                            events.push(factory.action_started(id, kind, title));
                        }
                        ClaudeContent::ToolResult { .. } | ClaudeContent::Other => {}
                    }
                }
                Ok(events)
            }
            "user" => {
                let mut events = Vec::new();
                for content in record.message.map(|m| m.content).unwrap_or_default() {
                    if let ClaudeContent::ToolResult { tool_use_id, is_error } = content {
                        let status = if is_error == Some(true) {
                            ActionStatus::Error
                        } else {
                            ActionStatus::Done
                        };
                        events.push(factory.action_completed(tool_use_id, status, None, None));
                    }
                }
                Ok(events)
            }
            "result" => {
                if factory.resume().is_none() {
                    if let Some(id) = record.session_id {
                        factory.set_resume(ResumeToken::with_session_id(
                            factory.engine().clone(),
                            format_resume(&id),
                            id,
                        ));
                    }
                }
                let failed = record.is_error.unwrap_or(false);
                if failed {
                    let error = record
                        .result
                        .unwrap_or_else(|| "claude run failed".into());
                    Ok(vec![factory.completed_err(error)])
                } else {
                    let answer = record.result.or_else(|| self.text.take());
                    Ok(vec![factory.completed_ok(answer)])
                }
            }
            other => {
                debug!(kind = other, "claude: skipping unknown record type");
                Ok(Vec::new())
            }
        }
    }

    fn finish(&mut self, factory: &mut EventFactory) -> Vec<Event> {
        vec![factory.completed_ok(self.text.take())]
    }
}

/// Pick an action kind and title for a `tool_use` block.
///
/// Bash invocations render as commands with the command line itself as
/// the title; everything else renders as a plain tool by name.
fn tool_title(name: &str, input: &serde_json::Value) -> (ActionKind, String) {
    if name.eq_ignore_ascii_case("bash") {
        if let Some(command) = input.get("command").and_then(|v| v.as_str()) {
            return (ActionKind::Command, command.to_owned());
        }
    }
    if name.eq_ignore_ascii_case("websearch") {
        if let Some(query) = input.get("query").and_then(|v| v.as_str()) {
            return (ActionKind::WebSearch, query.to_owned());
        }
    }
    (ActionKind::Tool, name.to_owned())
}
