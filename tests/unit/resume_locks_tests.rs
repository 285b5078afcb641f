//! Unit tests for the weak-valued resume lock pool.

use std::sync::Arc;

use takopi::runner::ResumeLocks;

#[test]
fn same_key_returns_the_same_mutex() {
    let locks = ResumeLocks::new();

    let a = locks.lock_for("codex resume s1");
    let b = locks.lock_for("codex resume s1");

    assert!(Arc::ptr_eq(&a, &b), "same key must share one mutex");
}

#[test]
fn distinct_keys_get_distinct_mutexes() {
    let locks = ResumeLocks::new();

    let a = locks.lock_for("codex resume s1");
    let b = locks.lock_for("codex resume s2");

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(locks.live_entries(), 2);
}

#[test]
fn entries_are_reclaimed_when_no_run_holds_them() {
    let locks = ResumeLocks::new();

    let a = locks.lock_for("codex resume s1");
    assert_eq!(locks.live_entries(), 1);

    drop(a);
    assert_eq!(
        locks.live_entries(),
        0,
        "dropping the last holder must reclaim the entry"
    );

    // A later run for the same session gets a fresh mutex.
    let _b = locks.lock_for("codex resume s1");
    assert_eq!(locks.live_entries(), 1);
}

#[tokio::test]
async fn held_lock_blocks_a_second_holder() {
    let locks = ResumeLocks::new();

    let mutex = locks.lock_for("shared");
    let guard = mutex.clone().lock_owned().await;

    let second = locks.lock_for("shared");
    assert!(
        second.try_lock().is_err(),
        "second holder must observe the lock as held"
    );

    drop(guard);
    assert!(second.try_lock().is_ok());
}
