//! Auto-router: selects a runner for each incoming message.
//!
//! Selection order (first match wins):
//!
//! 1. An explicit `/engine` directive on the first line.
//! 2. A resume line recognized by any registered runner, scanning the
//!    message text before the replied-to text, runners in registry order.
//! 3. The configured default engine.
//!
//! When resume syntaxes overlap (they are each anchored to their own
//! program name, so they should not), the stable registry order breaks
//! the tie.

use std::sync::Arc;

use crate::model::{EngineId, ResumeToken};
use crate::runner::Runner;
use crate::{AppError, Result};

/// One registered runner plus its availability.
///
/// Unavailable engines stay in the registry so directives naming them
/// produce a useful error instead of a silent fallback.
pub struct RunnerEntry {
    pub engine: EngineId,
    pub runner: Arc<dyn Runner>,
    pub available: bool,
    pub issue: Option<String>,
}

/// A routed message, ready to run.
pub struct Route {
    pub engine: EngineId,
    pub runner: Arc<dyn Runner>,
    pub resume: Option<ResumeToken>,
    /// Prompt with the engine directive and any inline resume line stripped.
    pub prompt: String,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("engine", &self.engine)
            .field("resume", &self.resume)
            .field("prompt", &self.prompt)
            .finish()
    }
}

pub struct AutoRouter {
    entries: Vec<RunnerEntry>,
    default_engine: EngineId,
}

impl std::fmt::Debug for AutoRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoRouter")
            .field("default_engine", &self.default_engine)
            .finish()
    }
}

impl AutoRouter {
    /// Build a router over `entries` with `default_engine` as fallback.
    ///
    /// # Errors
    ///
    /// - `AppError::NoEngines` if `entries` is empty.
    /// - `AppError::Config` if the default engine is not registered.
    pub fn new(entries: Vec<RunnerEntry>, default_engine: EngineId) -> Result<Self> {
        if entries.is_empty() {
            return Err(AppError::NoEngines);
        }
        if !entries.iter().any(|entry| entry.engine == default_engine) {
            return Err(AppError::Config(format!(
                "default engine '{default_engine}' is not registered"
            )));
        }
        Ok(Self {
            entries,
            default_engine,
        })
    }

    #[must_use]
    pub fn default_engine(&self) -> &EngineId {
        &self.default_engine
    }

    #[must_use]
    pub fn entries(&self) -> &[RunnerEntry] {
        &self.entries
    }

    #[must_use]
    pub fn entry_for(&self, engine: &EngineId) -> Option<&RunnerEntry> {
        self.entries.iter().find(|entry| &entry.engine == engine)
    }

    /// Route a message: pick runner, resume token, and cleaned prompt.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RunnerUnavailable` when the selected engine's
    /// runner cannot be used.
    pub fn route(&self, text: &str, reply_text: Option<&str>) -> Result<Route> {
        // 1. Explicit engine directive.
        if let Some((directive, rest)) = parse_slash_directive(text) {
            if let Some(entry) = self
                .entries
                .iter()
                .find(|entry| entry.engine.as_str() == directive)
            {
                let entry = self.ensure_available(entry)?;
                return Ok(Route {
                    engine: entry.engine.clone(),
                    runner: Arc::clone(&entry.runner),
                    resume: None,
                    prompt: rest,
                });
            }
        }

        // 2. Resume syntax, stable registry order, message before reply.
        for entry in &self.entries {
            for source in [Some(text), reply_text].into_iter().flatten() {
                if let Some(token) = entry.runner.resolve_resume(source) {
                    let entry = self.ensure_available(entry)?;
                    let prompt = strip_resume_lines(text, entry.runner.as_ref());
                    return Ok(Route {
                        engine: entry.engine.clone(),
                        runner: Arc::clone(&entry.runner),
                        resume: Some(token),
                        prompt,
                    });
                }
            }
        }

        // 3. Default engine.
        let entry = self
            .entry_for(&self.default_engine)
            .ok_or(AppError::NoEngines)?;
        let entry = self.ensure_available(entry)?;
        Ok(Route {
            engine: entry.engine.clone(),
            runner: Arc::clone(&entry.runner),
            resume: None,
            prompt: text.trim().to_owned(),
        })
    }

    fn ensure_available<'a>(&self, entry: &'a RunnerEntry) -> Result<&'a RunnerEntry> {
        if entry.available {
            Ok(entry)
        } else {
            let issue = entry.issue.as_deref().unwrap_or("not configured");
            Err(AppError::RunnerUnavailable(format!(
                "{}: {issue}",
                entry.engine
            )))
        }
    }
}

/// Parse a leading `/word` directive from the first line.
///
/// Returns the lowercased directive (with any `@botname` suffix removed)
/// and the remaining prompt text.
#[must_use]
pub fn parse_slash_directive(text: &str) -> Option<(String, String)> {
    let stripped = text.trim_start();
    let rest_of_first = stripped.strip_prefix('/')?;
    let mut lines = rest_of_first.lines();
    let first_line = lines.next().unwrap_or_default();
    let (token, tail) = match first_line.split_once(char::is_whitespace) {
        Some((token, tail)) => (token, tail),
        None => (first_line, ""),
    };
    let command = token.split('@').next().unwrap_or_default().to_lowercase();
    if command.is_empty() {
        return None;
    }
    let mut prompt_lines: Vec<&str> = Vec::new();
    if !tail.trim().is_empty() {
        prompt_lines.push(tail);
    }
    prompt_lines.extend(lines);
    Some((command, prompt_lines.join("\n").trim().to_owned()))
}

/// Drop every line of `text` the runner recognizes as its resume syntax.
fn strip_resume_lines(text: &str, runner: &dyn Runner) -> String {
    text.lines()
        .filter(|line| runner.resolve_resume(line).is_none())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}
