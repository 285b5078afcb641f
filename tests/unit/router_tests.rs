//! Unit tests for the auto-router: directive parsing, resume scanning,
//! prompt stripping, availability errors, and precedence.

use std::sync::Arc;

use takopi::config::EngineConfig;
use takopi::engines::claude::ClaudeRunner;
use takopi::engines::codex::CodexRunner;
use takopi::engines::pi::PiRunner;
use takopi::model::EngineId;
use takopi::router::{parse_slash_directive, AutoRouter, RunnerEntry};
use takopi::runner::ResumeLocks;
use takopi::AppError;

fn entry(id: &str, available: bool) -> RunnerEntry {
    let engine = EngineId::new(id).unwrap();
    let locks = ResumeLocks::new();
    let config = EngineConfig::default();
    let runner: Arc<dyn takopi::runner::Runner> = match id {
        "codex" => Arc::new(CodexRunner::new(engine.clone(), &config, locks)),
        "claude" => Arc::new(ClaudeRunner::new(engine.clone(), &config, locks)),
        "pi" => Arc::new(PiRunner::new(engine.clone(), &config, locks)),
        other => panic!("unsupported test engine {other}"),
    };
    RunnerEntry {
        engine,
        runner,
        available,
        issue: if available {
            None
        } else {
            Some("binary not found on PATH".into())
        },
    }
}

fn router() -> AutoRouter {
    AutoRouter::new(
        vec![entry("codex", true), entry("claude", true), entry("pi", true)],
        EngineId::new("codex").unwrap(),
    )
    .unwrap()
}

#[test]
fn slash_directive_parses_and_strips() {
    let (command, rest) = parse_slash_directive("/codex\nrefactor this").unwrap();
    assert_eq!(command, "codex");
    assert_eq!(rest, "refactor this");

    let (command, rest) = parse_slash_directive("/claude explain the bug").unwrap();
    assert_eq!(command, "claude");
    assert_eq!(rest, "explain the bug");

    // Bot-name suffix is ignored.
    let (command, _) = parse_slash_directive("/pi@takopi_bot hello").unwrap();
    assert_eq!(command, "pi");

    assert!(parse_slash_directive("no directive here").is_none());
    assert!(parse_slash_directive("/").is_none());
}

#[test]
fn engine_prefix_selects_engine_and_strips_directive() {
    let route = router().route("/claude\nexplain ownership", None).unwrap();

    assert_eq!(route.engine.as_str(), "claude");
    assert_eq!(route.prompt, "explain ownership");
    assert!(route.resume.is_none(), "prefix routing carries no resume");
}

#[test]
fn inline_resume_selects_engine_and_strips_line() {
    let text = "continue the refactor\n`codex resume sess-42`";
    let route = router().route(text, None).unwrap();

    assert_eq!(route.engine.as_str(), "codex");
    assert_eq!(route.prompt, "continue the refactor");
    let token = route.resume.expect("resume token must be extracted");
    assert_eq!(token.raw, "codex resume sess-42");
    assert_eq!(token.session_id.as_deref(), Some("sess-42"));
}

#[test]
fn reply_resume_selects_engine_and_leaves_prompt_untouched() {
    let route = router()
        .route("continue", Some("done · 5s\n\n`pi --session /tmp/s1`"))
        .unwrap();

    assert_eq!(route.engine.as_str(), "pi");
    assert_eq!(route.prompt, "continue");
    let token = route.resume.expect("resume token from reply");
    assert_eq!(token.raw, "pi --session /tmp/s1");
    assert_eq!(
        token.session_path.as_deref(),
        Some(std::path::Path::new("/tmp/s1"))
    );
}

#[test]
fn message_text_resume_wins_over_reply_resume() {
    let route = router()
        .route(
            "go on\n`codex resume inline-1`",
            Some("`codex resume reply-2`"),
        )
        .unwrap();

    let token = route.resume.unwrap();
    assert_eq!(token.raw, "codex resume inline-1");
}

#[test]
fn registry_order_breaks_resume_ties() {
    // Both engines have a resume line present; the earlier entry wins.
    let text = "pick one\n`claude --resume a`\n`pi --session /tmp/b`";
    let route = router().route(text, None).unwrap();

    assert_eq!(
        route.engine.as_str(),
        "claude",
        "stable registry order must break the tie"
    );
}

#[test]
fn plain_message_falls_back_to_default_engine() {
    let route = router().route("write a haiku", None).unwrap();

    assert_eq!(route.engine.as_str(), "codex");
    assert!(route.resume.is_none());
    assert_eq!(route.prompt, "write a haiku");
}

#[test]
fn unavailable_engine_is_a_routing_error() {
    let router = AutoRouter::new(
        vec![entry("codex", true), entry("claude", false)],
        EngineId::new("codex").unwrap(),
    )
    .unwrap();

    let err = router.route("/claude\nhelp", None).unwrap_err();
    match err {
        AppError::RunnerUnavailable(msg) => {
            assert!(msg.contains("claude"), "got: {msg}");
            assert!(msg.contains("not found"), "got: {msg}");
        }
        other => panic!("expected RunnerUnavailable, got {other:?}"),
    }
}

#[test]
fn empty_registry_is_rejected() {
    let err = AutoRouter::new(Vec::new(), EngineId::new("codex").unwrap()).unwrap_err();
    assert!(matches!(err, AppError::NoEngines));
}

#[test]
fn unregistered_default_engine_is_rejected() {
    let err = AutoRouter::new(vec![entry("pi", true)], EngineId::new("codex").unwrap()).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn unknown_directive_is_treated_as_prompt_text() {
    // `/weather` is not an engine id; the default engine gets the text.
    let route = router().route("/weather in tokyo", None).unwrap();
    assert_eq!(route.engine.as_str(), "codex");
    assert_eq!(route.prompt, "/weather in tokyo");
}
