//! Engine backends: construction, availability probing, registration.
//!
//! Each backend adapts one external CLI agent. The registry builds a
//! [`RunnerEntry`] per enabled engine in a stable order; an engine whose
//! binary is missing from `PATH` is still registered (so `/engine`
//! directives get a useful error) but marked unavailable. A missing
//! *default* engine is fatal at startup.

pub mod claude;
pub mod codex;
pub mod mock;
pub mod opencode;
pub mod pi;

use std::env;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::config::TakopiConfig;
use crate::model::EngineId;
use crate::router::RunnerEntry;
use crate::runner::{ResumeLocks, Runner};
use crate::{AppError, Result};

/// Built-in engine ids, in registry (router tie-break) order.
pub const BUILTIN_ENGINE_IDS: &[&str] = &["codex", "claude", "opencode", "pi", "mock"];

/// Build runner entries for every enabled engine.
///
/// # Errors
///
/// - `AppError::Config` if the default engine's binary is unavailable.
/// - `AppError::NoEngines` if every engine is disabled.
pub fn build_runners(config: &TakopiConfig, locks: &ResumeLocks) -> Result<Vec<RunnerEntry>> {
    let default_engine = EngineId::new(&config.default_engine)?;
    let mut entries = Vec::new();

    for raw_id in BUILTIN_ENGINE_IDS {
        let engine = EngineId::new(raw_id)?;
        let engine_cfg = config.engine_config(&engine);
        if !engine_cfg.enabled {
            continue;
        }

        let (runner, program): (Arc<dyn Runner>, Option<String>) = match *raw_id {
            "codex" => {
                let runner = codex::CodexRunner::new(engine.clone(), &engine_cfg, locks.clone());
                let program = runner.program().to_owned();
                (Arc::new(runner), Some(program))
            }
            "claude" => {
                let runner = claude::ClaudeRunner::new(engine.clone(), &engine_cfg, locks.clone());
                let program = runner.program().to_owned();
                (Arc::new(runner), Some(program))
            }
            "opencode" => {
                let runner = opencode::OpenCodeRunner::new(engine.clone(), &engine_cfg, locks.clone());
                let program = runner.program().to_owned();
                (Arc::new(runner), Some(program))
            }
            "pi" => {
                let runner = pi::PiRunner::new(engine.clone(), &engine_cfg, locks.clone());
                let program = runner.program().to_owned();
                (Arc::new(runner), Some(program))
            }
            "mock" => (
                Arc::new(mock::MockRunner::new(engine.clone(), locks.clone())),
                None,
            ),
            other => {
                return Err(AppError::Config(format!("unknown builtin engine {other:?}")));
            }
        };

        let issue = program
            .as_deref()
            .filter(|program| !find_on_path(program))
            .map(|program| format!("{program} not found on PATH"));

        if let Some(ref issue) = issue {
            if engine == default_engine {
                return Err(AppError::Config(format!(
                    "default engine '{engine}' unavailable: {issue}"
                )));
            }
            warn!(engine = %engine, issue = issue.as_str(), "engine unavailable");
        }

        entries.push(RunnerEntry {
            engine,
            runner,
            available: issue.is_none(),
            issue,
        });
    }

    if entries.is_empty() {
        return Err(AppError::NoEngines);
    }
    Ok(entries)
}

/// Whether `program` resolves to a file, directly or via `PATH`.
#[must_use]
pub fn find_on_path(program: &str) -> bool {
    if program.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(program).is_file();
    }
    let Some(path) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path).any(|dir| dir.join(program).is_file())
}

/// Tokenize a candidate resume line: trims whitespace and surrounding
/// backticks (progress footers print resume hints as inline code).
pub(crate) fn resume_line_tokens(line: &str) -> Vec<&str> {
    line.trim()
        .trim_matches('`')
        .split_whitespace()
        .collect()
}

/// Resume payloads are single shell words; reject anything suspicious.
pub(crate) fn is_token_like(raw: &str) -> bool {
    !raw.is_empty() && !raw.contains(|c: char| c.is_whitespace() || c == '`')
}
