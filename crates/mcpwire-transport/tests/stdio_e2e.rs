//! End-to-end stdio transport tests against real child processes.

#![cfg(unix)]

use mcpwire_core::{Message, Request, RequestId};
use mcpwire_transport::{
    StdioState, StdioTransport, Transport, TransportError, TransportExt,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn sh(script: &str) -> StdioTransport {
    StdioTransport::builder("sh")
        .args(["-c", script])
        .close_grace(Duration::from_millis(500))
        .build()
}

fn collect_messages(transport: &StdioTransport) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    transport.on_message(move |msg| {
        let _ = tx.send(msg);
    });
    rx
}

#[tokio::test]
async fn test_echo_round_trip() {
    let transport = StdioTransport::builder("cat").build();
    let mut messages = collect_messages(&transport);

    transport.start().await.unwrap();
    assert_eq!(transport.state(), StdioState::Started);
    assert!(transport.pid().is_some());

    let request = Request::new("ping", 1u64);
    transport.send_message(request.clone()).await.unwrap();

    let echoed = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(echoed, Message::Request(request));
    assert_eq!(transport.messages_sent(), 1);
    assert_eq!(transport.messages_received(), 1);

    transport.close().await.unwrap();
    assert_eq!(transport.state(), StdioState::Closed);
}

#[tokio::test]
async fn test_malformed_line_does_not_stop_reading() {
    let transport = sh(
        r#"printf '%s\n' 'not json' '{"jsonrpc":"2.0","id":7,"result":{}}'; sleep 5"#,
    );
    let mut messages = collect_messages(&transport);
    let (err_tx, mut errors) = mpsc::unbounded_channel();
    transport.on_error(move |err| {
        let _ = err_tx.send(err);
    });

    transport.start().await.unwrap();

    let err = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(err, TransportError::Framing(_)), "{err:?}");

    let msg = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(msg.id(), Some(&RequestId::from(7u64)));

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_batch_is_delivered_in_order() {
    let transport = sh(
        r#"printf '%s\n' '[{"jsonrpc":"2.0","method":"a"},{"jsonrpc":"2.0","method":"b"}]'; sleep 5"#,
    );
    let mut messages = collect_messages(&transport);
    transport.start().await.unwrap();

    let first = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(first.method(), Some("a"));
    assert_eq!(second.method(), Some("b"));

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_close_fires_once() {
    let transport = StdioTransport::builder("cat").build();
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    transport.on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    transport.start().await.unwrap();
    transport.close().await.unwrap();
    transport.close().await.unwrap();

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(transport.pid().is_none());
}

#[tokio::test]
async fn test_child_exit_fires_close_and_blocks_send() {
    let transport = sh("exit 0");
    let (tx, mut closed) = mpsc::unbounded_channel();
    transport.on_close(move || {
        let _ = tx.send(());
    });

    transport.start().await.unwrap();
    timeout(WAIT, closed.recv()).await.unwrap().unwrap();

    assert!(transport.has_exited());
    let err = transport
        .send_message(Request::new("ping", 2u64))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::NotConnected));

    // Closing after the child is gone must not fire close again.
    transport.close().await.unwrap();
    assert!(closed.try_recv().is_err());
}

#[tokio::test]
async fn test_builder_env_reaches_child() {
    let transport = StdioTransport::builder("sh")
        .args([
            "-c",
            r#"printf '{"jsonrpc":"2.0","method":"env","params":{"custom":"%s","secret":"%s"}}\n' "$MCPWIRE_CUSTOM" "$MCPWIRE_NEVER_SET"; sleep 5"#,
        ])
        .env("MCPWIRE_CUSTOM", "yes")
        .build();
    let mut messages = collect_messages(&transport);
    transport.start().await.unwrap();

    let Message::Notification(note) = timeout(WAIT, messages.recv()).await.unwrap().unwrap() else {
        panic!("expected a notification");
    };
    let params = note.params.unwrap();
    assert_eq!(params["custom"], "yes");
    assert_eq!(params["secret"], "");

    transport.close().await.unwrap();
}
