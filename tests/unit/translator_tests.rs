//! Unit tests for the per-engine JSONL translators.
//!
//! Each translator turns its engine's dialect into domain events in
//! source order; malformed records and missing required fields abort
//! with a translation error; unknown record types are skipped.

use takopi::engines::claude::ClaudeTranslator;
use takopi::engines::codex::CodexTranslator;
use takopi::engines::opencode::OpenCodeTranslator;
use takopi::engines::pi::PiTranslator;
use takopi::model::{ActionKind, ActionStatus, EngineId, EventFactory, EventPayload};
use takopi::runner::exec::Translator;
use takopi::AppError;

fn factory(id: &str) -> EventFactory {
    EventFactory::new(EngineId::new(id).unwrap())
}

// ── Codex ─────────────────────────────────────────────────────────────────────

#[test]
fn codex_session_configured_sets_resume_token() {
    let mut translator = CodexTranslator::default();
    let mut factory = factory("codex");

    let events = translator
        .note_line(
            r#"{"id":"0","msg":{"type":"session_configured","session_id":"sess-1"}}"#,
            &mut factory,
        )
        .unwrap();

    assert!(events.is_empty());
    assert_eq!(
        factory.resume().map(|t| t.raw.as_str()),
        Some("codex resume sess-1")
    );
}

#[test]
fn codex_exec_command_lifecycle_maps_to_actions() {
    let mut translator = CodexTranslator::default();
    let mut factory = factory("codex");

    let begin = translator
        .note_line(
            r#"{"id":"1","msg":{"type":"exec_command_begin","call_id":"c1","command":["bash","-lc","ls"]}}"#,
            &mut factory,
        )
        .unwrap();
    match begin[0].payload {
        EventPayload::ActionStarted { ref action } => {
            assert_eq!(action.id.as_deref(), Some("c1"));
            assert_eq!(action.kind, ActionKind::Command);
            assert_eq!(action.title, "bash -lc ls");
            assert_eq!(action.status, ActionStatus::Running);
        }
        ref other => panic!("expected ActionStarted, got {other:?}"),
    }

    let end = translator
        .note_line(
            r#"{"id":"1","msg":{"type":"exec_command_end","call_id":"c1","exit_code":2}}"#,
            &mut factory,
        )
        .unwrap();
    match end[0].payload {
        EventPayload::ActionCompleted {
            ref id,
            status,
            exit_code,
            ..
        } => {
            assert_eq!(id, "c1");
            assert_eq!(status, ActionStatus::Error);
            assert_eq!(exit_code, Some(2));
        }
        ref other => panic!("expected ActionCompleted, got {other:?}"),
    }
}

#[test]
fn codex_task_complete_carries_accumulated_answer() {
    let mut translator = CodexTranslator::default();
    let mut factory = factory("codex");

    translator
        .note_line(
            r#"{"id":"1","msg":{"type":"agent_message","message":"here is the haiku"}}"#,
            &mut factory,
        )
        .unwrap();
    let events = translator
        .note_line(r#"{"id":"1","msg":{"type":"task_complete"}}"#, &mut factory)
        .unwrap();

    match events[0].payload {
        EventPayload::Completed { ok, ref answer, .. } => {
            assert!(ok);
            assert_eq!(answer.as_deref(), Some("here is the haiku"));
        }
        ref other => panic!("expected Completed, got {other:?}"),
    }
}

#[test]
fn codex_malformed_json_is_a_translation_error() {
    let mut translator = CodexTranslator::default();
    let mut factory = factory("codex");

    let err = translator.note_line("not json {{{", &mut factory).unwrap_err();
    assert!(matches!(err, AppError::Translation(_)));
}

#[test]
fn codex_missing_required_field_is_a_translation_error() {
    let mut translator = CodexTranslator::default();
    let mut factory = factory("codex");

    let err = translator
        .note_line(
            r#"{"id":"1","msg":{"type":"exec_command_begin"}}"#,
            &mut factory,
        )
        .unwrap_err();
    assert!(matches!(err, AppError::Translation(_)));
}

#[test]
fn codex_unknown_record_type_is_skipped() {
    let mut translator = CodexTranslator::default();
    let mut factory = factory("codex");

    let events = translator
        .note_line(
            r#"{"id":"1","msg":{"type":"token_count","tokens":12}}"#,
            &mut factory,
        )
        .unwrap();
    assert!(events.is_empty());
}

// ── Claude ────────────────────────────────────────────────────────────────────

#[test]
fn claude_init_sets_resume_token() {
    let mut translator = ClaudeTranslator::default();
    let mut factory = factory("claude");

    translator
        .note_line(
            r#"{"type":"system","subtype":"init","session_id":"abc-123"}"#,
            &mut factory,
        )
        .unwrap();

    assert_eq!(
        factory.resume().map(|t| t.raw.as_str()),
        Some("claude --resume abc-123")
    );
}

#[test]
fn claude_bash_tool_use_renders_as_command_action() {
    let mut translator = ClaudeTranslator::default();
    let mut factory = factory("claude");

    let events = translator
        .note_line(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"cargo test"}}]}}"#,
            &mut factory,
        )
        .unwrap();

    match events[0].payload {
        EventPayload::ActionStarted { ref action } => {
            assert_eq!(action.kind, ActionKind::Command);
            assert_eq!(action.title, "cargo test");
        }
        ref other => panic!("expected ActionStarted, got {other:?}"),
    }
}

#[test]
fn claude_tool_result_completes_the_action() {
    let mut translator = ClaudeTranslator::default();
    let mut factory = factory("claude");

    let events = translator
        .note_line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_1","is_error":false}]}}"#,
            &mut factory,
        )
        .unwrap();

    match events[0].payload {
        EventPayload::ActionCompleted { ref id, status, .. } => {
            assert_eq!(id, "toolu_1");
            assert_eq!(status, ActionStatus::Done);
        }
        ref other => panic!("expected ActionCompleted, got {other:?}"),
    }
}

#[test]
fn claude_result_record_completes_the_run() {
    let mut translator = ClaudeTranslator::default();
    let mut factory = factory("claude");

    let events = translator
        .note_line(
            r#"{"type":"result","subtype":"success","is_error":false,"result":"done deal","session_id":"abc-123"}"#,
            &mut factory,
        )
        .unwrap();

    match events[0].payload {
        EventPayload::Completed { ok, ref answer, .. } => {
            assert!(ok);
            assert_eq!(answer.as_deref(), Some("done deal"));
        }
        ref other => panic!("expected Completed, got {other:?}"),
    }
    assert!(
        factory.resume().is_some(),
        "result record must backfill the resume token"
    );
}

#[test]
fn claude_error_result_fails_the_run() {
    let mut translator = ClaudeTranslator::default();
    let mut factory = factory("claude");

    let events = translator
        .note_line(
            r#"{"type":"result","subtype":"error_during_execution","is_error":true,"result":"rate limited"}"#,
            &mut factory,
        )
        .unwrap();

    match events[0].payload {
        EventPayload::Completed { ok, ref error, .. } => {
            assert!(!ok);
            assert_eq!(error.as_deref(), Some("rate limited"));
        }
        ref other => panic!("expected Completed, got {other:?}"),
    }
}

// ── OpenCode ──────────────────────────────────────────────────────────────────

#[test]
fn opencode_session_lifecycle_folds_to_answer() {
    let mut translator = OpenCodeTranslator::default();
    let mut factory = factory("opencode");

    translator
        .note_line(r#"{"type":"session.start","sessionID":"oc-1"}"#, &mut factory)
        .unwrap();
    assert_eq!(
        factory.resume().map(|t| t.raw.as_str()),
        Some("opencode run --continue oc-1")
    );

    let start = translator
        .note_line(
            r#"{"type":"tool.start","callID":"t1","tool":"read","title":"src/lib.rs"}"#,
            &mut factory,
        )
        .unwrap();
    assert!(matches!(
        start[0].payload,
        EventPayload::ActionStarted { ref action } if action.title == "read: src/lib.rs"
    ));

    translator
        .note_line(r#"{"type":"tool.end","callID":"t1","ok":true}"#, &mut factory)
        .unwrap();
    translator
        .note_line(r#"{"type":"text","text":"looks good"}"#, &mut factory)
        .unwrap();

    let end = translator
        .note_line(r#"{"type":"session.end","ok":true}"#, &mut factory)
        .unwrap();
    assert!(matches!(
        end[0].payload,
        EventPayload::Completed { ok: true, ref answer, .. } if answer.as_deref() == Some("looks good")
    ));
}

// ── Pi ────────────────────────────────────────────────────────────────────────

#[test]
fn pi_session_record_sets_path_resume_token() {
    let mut translator = PiTranslator::default();
    let mut factory = factory("pi");

    translator
        .note_line(
            r#"{"type":"session","path":"/home/u/.pi/sessions/s1.jsonl"}"#,
            &mut factory,
        )
        .unwrap();

    let token = factory.resume().expect("resume token must be set");
    assert_eq!(token.raw, "pi --session /home/u/.pi/sessions/s1.jsonl");
    assert!(token.session_path.is_some());
}

#[test]
fn pi_agent_end_completes_with_assistant_text() {
    let mut translator = PiTranslator::default();
    let mut factory = factory("pi");

    translator
        .note_line(
            r#"{"type":"tool_execution_start","id":"t1","name":"bash","label":"ls"}"#,
            &mut factory,
        )
        .unwrap();
    translator
        .note_line(r#"{"type":"tool_execution_end","id":"t1","ok":true}"#, &mut factory)
        .unwrap();
    translator
        .note_line(
            r#"{"type":"message","role":"assistant","text":"five files"}"#,
            &mut factory,
        )
        .unwrap();
    let events = translator
        .note_line(r#"{"type":"agent_end"}"#, &mut factory)
        .unwrap();

    assert!(matches!(
        events[0].payload,
        EventPayload::Completed { ok: true, ref answer, .. } if answer.as_deref() == Some("five files")
    ));
}

#[test]
fn pi_user_messages_are_not_answers() {
    let mut translator = PiTranslator::default();
    let mut factory = factory("pi");

    translator
        .note_line(r#"{"type":"message","role":"user","text":"hi"}"#, &mut factory)
        .unwrap();
    let events = translator
        .note_line(r#"{"type":"agent_end"}"#, &mut factory)
        .unwrap();

    assert!(matches!(
        events[0].payload,
        EventPayload::Completed { ref answer, .. } if answer.is_none()
    ));
}
