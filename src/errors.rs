//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure; fatal at startup.
    Config(String),
    /// Another instance already holds the lock for this bot token.
    AlreadyRunning(u32),
    /// Lockfile could not be read, written, or stolen.
    Lock(String),
    /// Selected engine has no usable runner.
    RunnerUnavailable(String),
    /// The runner registry is empty.
    NoEngines,
    /// Child process could not be spawned.
    Spawn(String),
    /// Malformed or unexpected engine JSONL; aborts the run.
    Translation(String),
    /// Child process failed (non-zero exit, wait error).
    Child(String),
    /// Transport send/edit/poll failure.
    Transport(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Run was cancelled by the user or by shutdown.
    Cancelled,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::AlreadyRunning(pid) => {
                write!(f, "another takopi instance is running (pid {pid})")
            }
            Self::Lock(msg) => write!(f, "lock: {msg}"),
            Self::RunnerUnavailable(msg) => write!(f, "runner unavailable: {msg}"),
            Self::NoEngines => write!(f, "no engines registered"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Translation(msg) => write!(f, "translation: {msg}"),
            Self::Child(msg) => write!(f, "child: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
