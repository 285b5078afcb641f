//! End-to-end happy path: one message, one run, live progress, final
//! answer.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use takopi::bridge::Bridge;
use takopi::engines::mock::MockScript;

use super::test_helpers::{incoming, mock_router, test_config, wait_until, RecordingTransport};

#[tokio::test]
async fn message_produces_progress_and_final_answer() {
    let transport = RecordingTransport::new();
    let bridge = Bridge::new(
        transport.clone(),
        mock_router(MockScript::Happy),
        &test_config(true),
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&bridge).run(cancel.clone()));

    transport.push(incoming(100, "write a haiku"));

    // Final delivery with final_notify: a second (audible) send plus the
    // deletion of the progress message.
    wait_until(|| transport.sends.lock().len() >= 2).await;
    wait_until(|| !transport.deletes.lock().is_empty()).await;

    let sends = transport.sends.lock().clone();
    let initial = &sends[0];
    assert!(initial.silent, "initial progress message must be silent");
    assert_eq!(initial.reply_to, Some(100));
    assert!(
        initial.text.contains("working"),
        "initial message must show the working label: {}",
        initial.text
    );
    assert!(initial.text.contains("mock"));

    let final_send = &sends[1];
    assert!(!final_send.silent, "final message must notify");
    assert!(
        final_send.text.contains("echo: write a haiku"),
        "final message must contain the answer: {}",
        final_send.text
    );
    assert!(final_send.text.contains("done"));

    assert_eq!(
        transport.deletes.lock()[0],
        initial.message_ref,
        "the progress message must be deleted after the final send"
    );

    assert!(
        !transport.edits.lock().is_empty(),
        "at least one progress edit must have been pushed"
    );

    cancel.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn final_render_edits_in_place_without_final_notify() {
    let transport = RecordingTransport::new();
    let bridge = Bridge::new(
        transport.clone(),
        mock_router(MockScript::Happy),
        &test_config(false),
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&bridge).run(cancel.clone()));

    transport.push(incoming(100, "hello"));

    wait_until(|| {
        transport
            .edit_texts()
            .iter()
            .any(|text| text.contains("echo: hello"))
    })
    .await;

    assert_eq!(
        transport.sends.lock().len(),
        1,
        "without final_notify the only send is the progress message"
    );
    assert!(transport.deletes.lock().is_empty());

    cancel.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn messages_from_disallowed_chats_are_dropped() {
    let transport = RecordingTransport::new();
    let bridge = Bridge::new(
        transport.clone(),
        mock_router(MockScript::Happy),
        &test_config(true),
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&bridge).run(cancel.clone()));

    let mut message = incoming(100, "hi");
    message.thread = takopi::transport::ThreadKey::chat(99);
    transport.push(message);

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert!(
        transport.sends.lock().is_empty(),
        "disallowed chats must produce no traffic"
    );

    cancel.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn final_send_failure_is_retried_once() {
    let transport = RecordingTransport::new();
    let bridge = Bridge::new(
        transport.clone(),
        mock_router(MockScript::Happy),
        &test_config(true),
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&bridge).run(cancel.clone()));

    transport.push(incoming(100, "retry me"));
    // The first send is the progress message; make the final send fail once.
    wait_until(|| !transport.sends.lock().is_empty()).await;
    transport.fail_next_sends(1);

    wait_until(|| {
        transport
            .sent_texts()
            .iter()
            .any(|text| text.contains("echo: retry me"))
    })
    .await;

    cancel.cancel();
    let _ = handle.await;
}
