//! Unit tests for the per-thread FIFO scheduler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use takopi::scheduler::{ThreadJob, ThreadScheduler};
use takopi::transport::ThreadKey;

/// Wait until `predicate` holds or a 2 s deadline passes.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}

#[tokio::test]
async fn jobs_on_one_thread_run_in_submission_order() {
    let scheduler = ThreadScheduler::new();
    let thread = ThreadKey::chat(1);
    let order: Arc<Mutex<Vec<usize>>> = Arc::default();

    for index in 0..5 {
        let order = Arc::clone(&order);
        scheduler.submit(
            thread,
            ThreadJob::new(async move {
                // Let later submissions pile up behind this one.
                tokio::time::sleep(Duration::from_millis(10)).await;
                order.lock().push(index);
            }),
        );
    }

    wait_until(|| order.lock().len() == 5).await;
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn jobs_on_one_thread_never_overlap() {
    let scheduler = ThreadScheduler::new();
    let thread = ThreadKey::chat(7);
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        let active = Arc::clone(&active);
        let max_active = Arc::clone(&max_active);
        let done = Arc::clone(&done);
        scheduler.submit(
            thread,
            ThreadJob::new(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    wait_until(|| done.load(Ordering::SeqCst) == 4).await;
    assert_eq!(
        max_active.load(Ordering::SeqCst),
        1,
        "at most one job per thread may be active"
    );
}

#[tokio::test]
async fn distinct_threads_run_concurrently() {
    let scheduler = ThreadScheduler::new();
    let (blocker_tx, blocker_rx) = oneshot::channel::<()>();
    let witnessed = Arc::new(AtomicUsize::new(0));

    // Thread 1 blocks until released.
    scheduler.submit(
        ThreadKey::chat(1),
        ThreadJob::new(async move {
            let _ = blocker_rx.await;
        }),
    );

    // Thread 2 must run while thread 1 is still blocked.
    let witness = Arc::clone(&witnessed);
    scheduler.submit(
        ThreadKey::chat(2),
        ThreadJob::new(async move {
            witness.fetch_add(1, Ordering::SeqCst);
        }),
    );

    wait_until(|| witnessed.load(Ordering::SeqCst) == 1).await;
    let _ = blocker_tx.send(());
}

#[tokio::test]
async fn queue_entry_is_removed_when_drained() {
    let scheduler = ThreadScheduler::new();
    let thread = ThreadKey::chat(3);

    scheduler.submit(thread, ThreadJob::new(async {}));
    wait_until(|| scheduler.tracked_threads() == 0).await;
}

#[tokio::test]
async fn note_thread_known_registers_without_work() {
    let scheduler = ThreadScheduler::new();
    let thread = ThreadKey::chat(9);

    scheduler.note_thread_known(thread);
    assert_eq!(scheduler.tracked_threads(), 1);

    // Submitting to the known thread runs normally and then cleans up.
    let ran = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&ran);
    scheduler.submit(
        thread,
        ThreadJob::new(async move {
            flag.fetch_add(1, Ordering::SeqCst);
        }),
    );

    wait_until(|| ran.load(Ordering::SeqCst) == 1).await;
    wait_until(|| scheduler.tracked_threads() == 0).await;
}
