//! Progress edits worker.
//!
//! Consumes rendered snapshots from a `watch` channel and pushes them to
//! the transport as best-effort edits of one progress message. The watch
//! channel gives latest-wins coalescing for free: while an edit is in
//! flight only the newest pending snapshot is retained. Snapshots equal
//! to the last sent text are skipped, transport errors are logged and
//! dropped, and a minimum interval between edits absorbs bursts.
//!
//! The terminal render is never routed through this worker; the handler
//! performs it synchronously after the run completes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::{MessageRef, RenderedMessage, Transport};

/// Per-edit transport timeout; edits fail open to "skip".
pub const EDIT_TIMEOUT: Duration = Duration::from_secs(4);

/// Spawn the edit worker for one progress message.
///
/// The worker exits when every [`watch::Sender`] is dropped, flushing the
/// last unsent snapshot before returning.
#[must_use]
pub fn spawn_edit_worker(
    transport: Arc<dyn Transport>,
    message: MessageRef,
    mut rx: watch::Receiver<Option<RenderedMessage>>,
    min_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_sent: Option<RenderedMessage> = None;

        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let pending = rx.borrow_and_update().clone();
            if let Some(rendered) = pending {
                edit_if_new(&*transport, message, &rendered, &mut last_sent).await;
            }
            // Coalesce: snapshots arriving during the pause collapse into
            // the single latest value held by the watch channel.
            tokio::time::sleep(min_interval).await;
        }

        // Channel closed: flush whatever arrived after the last edit.
        let pending = rx.borrow().clone();
        if let Some(rendered) = pending {
            edit_if_new(&*transport, message, &rendered, &mut last_sent).await;
        }
        debug!(message = %message, "edit worker exiting");
    })
}

/// Edit unless the snapshot matches the last successfully sent one.
async fn edit_if_new(
    transport: &dyn Transport,
    message: MessageRef,
    rendered: &RenderedMessage,
    last_sent: &mut Option<RenderedMessage>,
) {
    if last_sent.as_ref() == Some(rendered) {
        return;
    }
    match tokio::time::timeout(EDIT_TIMEOUT, transport.edit(&message, rendered)).await {
        Ok(Ok(())) => {
            *last_sent = Some(rendered.clone());
        }
        Ok(Err(err)) => {
            warn!(message = %message, %err, "progress edit failed, skipping");
        }
        Err(_elapsed) => {
            warn!(message = %message, "progress edit timed out, skipping");
        }
    }
}
