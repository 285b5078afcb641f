//! Unit tests for the presenter: elapsed formatting, header layout,
//! body trimming, and final-render composition.

use std::time::Duration;

use takopi::config::ProgressConfig;
use takopi::model::{Action, ActionKind, ActionStatus, EngineId, EventFactory, ResumeToken};
use takopi::progress::{ProgressState, ProgressTracker};
use takopi::render::{format_elapsed, Presenter};

fn engine() -> EngineId {
    EngineId::new("codex").unwrap()
}

fn presenter() -> Presenter {
    Presenter::new(&ProgressConfig::default())
}

#[test]
fn elapsed_formats_seconds_minutes_hours() {
    assert_eq!(format_elapsed(Duration::from_secs(0)), "0s");
    assert_eq!(format_elapsed(Duration::from_secs(5)), "5s");
    assert_eq!(format_elapsed(Duration::from_secs(59)), "59s");
    assert_eq!(format_elapsed(Duration::from_secs(65)), "1m 05s");
    assert_eq!(format_elapsed(Duration::from_secs(600)), "10m 00s");
    assert_eq!(format_elapsed(Duration::from_secs(3_700)), "1h 01m");
    assert_eq!(format_elapsed(Duration::from_secs(7_260)), "2h 01m");
}

#[test]
fn progress_header_names_engine_label_and_elapsed() {
    let state = ProgressState::for_engine(engine());
    let rendered = presenter().render_progress(&state, Duration::from_secs(5));

    let header = rendered.text.lines().next().unwrap().to_owned();
    assert!(header.contains("codex"), "header must name the engine");
    assert!(header.contains("working"), "header must carry the run label");
    assert!(header.contains("5s"), "header must carry elapsed time");
}

#[test]
fn progress_body_lists_recent_actions_with_glyphs() {
    let factory = EventFactory::new(engine());
    let mut tracker = ProgressTracker::new();
    tracker.note_event(&factory.started());
    tracker.note_event(&factory.action_started("c1", ActionKind::Command, "cargo check"));
    tracker.note_event(&factory.action_completed("c1", ActionStatus::Done, None, Some(0)));
    tracker.note_event(&factory.action_started("c2", ActionKind::Command, "cargo test"));

    let rendered = presenter().render_progress(tracker.state(), Duration::from_secs(9));

    assert!(rendered.text.contains("✓ `cargo check`"));
    assert!(rendered.text.contains("▸ `cargo test`"));
    assert!(rendered.text.contains("step 2"));
}

#[test]
fn failed_command_carries_exit_suffix() {
    let factory = EventFactory::new(engine());
    let mut tracker = ProgressTracker::new();
    tracker.note_event(&factory.started());
    tracker.note_event(&factory.action_started("c1", ActionKind::Command, "make"));
    tracker.note_event(&factory.action_completed("c1", ActionStatus::Error, None, Some(2)));

    let rendered = presenter().render_progress(tracker.state(), Duration::from_secs(1));

    assert!(
        rendered.text.contains("✗ `make` (exit 2)"),
        "got: {}",
        rendered.text
    );
}

#[test]
fn body_trimming_preserves_header_and_footer() {
    let config = ProgressConfig {
        char_budget: 200,
        max_actions: 50,
        ..ProgressConfig::default()
    };
    let presenter = Presenter::new(&config);

    let factory = EventFactory::new(engine());
    let mut tracker = ProgressTracker::new();
    tracker.note_event(&factory.started());
    for index in 0..40 {
        tracker.note_event(&factory.action_started(
            format!("c{index}"),
            ActionKind::Command,
            format!("command number {index} with a long tail"),
        ));
    }

    let mut state = tracker.snapshot();
    state.resume = Some(ResumeToken::with_session_id(
        engine(),
        "codex resume s1",
        "s1",
    ));

    let untrimmed = Presenter::new(&ProgressConfig {
        char_budget: 100_000,
        max_actions: 50,
        ..ProgressConfig::default()
    })
    .render_progress(&state, Duration::from_secs(30));
    let trimmed = presenter.render_progress(&state, Duration::from_secs(30));

    let header = |text: &str| text.split("\n\n").next().unwrap().to_owned();
    let footer = |text: &str| text.split("\n\n").last().unwrap().to_owned();

    assert_eq!(
        header(&untrimmed.text),
        header(&trimmed.text),
        "header must be preserved byte-for-byte"
    );
    assert_eq!(
        footer(&untrimmed.text),
        footer(&trimmed.text),
        "footer must be preserved byte-for-byte"
    );
    assert!(
        trimmed.text.len() < untrimmed.text.len(),
        "body must actually be trimmed"
    );
    // The newest action must survive trimming; the oldest must not.
    assert!(trimmed.text.contains("command number 39"));
    assert!(!trimmed.text.contains("command number 0 "));
}

#[test]
fn final_render_contains_answer_and_resume_hint() {
    let mut factory = EventFactory::new(engine());
    let mut tracker = ProgressTracker::new();
    tracker.note_event(&factory.started());
    factory.set_resume(ResumeToken::with_session_id(engine(), "codex resume s1", "s1"));
    tracker.note_event(&factory.completed_ok(Some("the answer is 42".into())));

    let rendered = presenter().render_final(tracker.state(), Duration::from_secs(65));

    assert!(rendered.text.contains("done"));
    assert!(rendered.text.contains("1m 05s"));
    assert!(rendered.text.contains("the answer is 42"));
    assert!(
        rendered.text.contains("`codex resume s1`"),
        "resume hint must be present: {}",
        rendered.text
    );
}

#[test]
fn failed_final_render_surfaces_warning_tail() {
    let factory = EventFactory::new(engine());
    let mut tracker = ProgressTracker::new();
    tracker.note_event(&factory.started());
    let warning = Action::note(
        ActionKind::Warning,
        "codex exited with code 2",
        ActionStatus::Warning,
    )
    .with_detail("boom: stack trace tail");
    tracker.note_event(&factory.action(warning));
    tracker.note_event(&factory.completed_err("codex exited with code 2"));

    let rendered = presenter().render_final(tracker.state(), Duration::from_secs(3));

    assert!(rendered.text.contains("error"), "label must be 'error'");
    assert!(rendered.text.contains("codex exited with code 2"));
    assert!(
        rendered.text.contains("boom: stack trace tail"),
        "stderr tail must be surfaced: {}",
        rendered.text
    );
}

#[test]
fn cancelled_final_render_keeps_resume_hint() {
    let mut factory = EventFactory::new(engine());
    let mut tracker = ProgressTracker::new();
    tracker.note_event(&factory.started());
    factory.set_resume(ResumeToken::with_session_id(engine(), "codex resume s9", "s9"));
    tracker.note_event(&factory.completed_cancelled());

    let rendered = presenter().render_final(tracker.state(), Duration::from_secs(2));

    assert!(rendered.text.contains("cancelled"));
    assert!(rendered.text.contains("`codex resume s9`"));
}
