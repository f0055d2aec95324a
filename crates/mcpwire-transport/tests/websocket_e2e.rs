//! End-to-end WebSocket transport tests against tokio-tungstenite servers.

use futures::{SinkExt, StreamExt};
use mcpwire_core::{Message, Request, RequestId};
use mcpwire_transport::{
    ConnectionState, ExponentialBackoff, Transport, TransportError, TransportExt,
    WebSocketTransport,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message as WsMessage};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn bind() -> (TcpListener, String) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/mcp", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _addr) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

/// Echo text frames until the client goes away.
async fn echo(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(frame)) = ws.next().await {
        if let WsMessage::Text(text) = frame {
            if ws.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    }
}

fn fast_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(50), 2.0)
}

fn count_closes(transport: &WebSocketTransport) -> Arc<AtomicUsize> {
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    transport.on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    closes
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_echo_round_trip() {
    let (listener, url) = bind().await;
    tokio::spawn(async move { echo(accept(&listener).await).await });

    let transport = WebSocketTransport::builder(url).no_ping().build();
    let (tx, mut messages) = mpsc::unbounded_channel();
    transport.on_message(move |msg| {
        let _ = tx.send(msg);
    });
    let closes = count_closes(&transport);

    transport.start().await.unwrap();
    assert_eq!(transport.connection_state(), ConnectionState::Connected);

    let request = Request::new("ping", 1u64);
    transport.send_message(request.clone()).await.unwrap();
    let echoed = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(echoed, Message::Request(request));
    assert_eq!(transport.messages_sent(), 1);
    assert_eq!(transport.messages_received(), 1);

    transport.close().await.unwrap();
    transport.close().await.unwrap();
    assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_send_immediately_after_start() {
    let (listener, url) = bind().await;
    tokio::spawn(async move { echo(accept(&listener).await).await });

    let transport = WebSocketTransport::builder(url).no_ping().build();
    let (tx, mut messages) = mpsc::unbounded_channel();
    transport.on_message(move |msg| {
        let _ = tx.send(msg);
    });

    transport.start().await.unwrap();
    transport
        .send_message(Request::new("ping", 3u64))
        .await
        .unwrap();

    let echoed = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(echoed.id(), Some(&RequestId::from(3u64)));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_server_stops_after_budget() {
    // Bind and drop to get a port nothing listens on.
    let (listener, url) = bind().await;
    drop(listener);

    let transport = WebSocketTransport::builder(url)
        .connect_timeout(Duration::from_secs(1))
        .max_reconnect_attempts(2)
        .reconnect_backoff(fast_backoff())
        .build();
    let (tx, mut errors) = mpsc::unbounded_channel();
    transport.on_error(move |err| {
        let _ = tx.send(err);
    });

    // Auto-reconnect keeps trying in the background, so start succeeds.
    transport.start().await.unwrap();

    let err = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(
        matches!(err, TransportError::ReconnectionExhausted { attempts: 2 }),
        "{err:?}"
    );
    assert_eq!(transport.reconnect_attempts(), 2);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(errors.try_recv().is_err(), "no attempts after the budget is spent");
    assert_eq!(transport.reconnect_attempts(), 2);
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_abnormal_close_reconnects() {
    let (listener, url) = bind().await;
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        let mut first = accept(&listener).await;
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = first
            .send(WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "restarting".into(),
            })))
            .await;
        drop(first);

        let second = accept(&listener).await;
        counter.fetch_add(1, Ordering::SeqCst);
        echo(second).await;
    });

    let transport = WebSocketTransport::builder(url)
        .no_ping()
        .reconnect_backoff(fast_backoff())
        .build();
    let (tx, mut messages) = mpsc::unbounded_channel();
    transport.on_message(move |msg| {
        let _ = tx.send(msg);
    });
    let closes = count_closes(&transport);

    transport.start().await.unwrap();
    wait_until(|| closes.load(Ordering::SeqCst) == 1).await;
    wait_until(|| accepted.load(Ordering::SeqCst) == 2 && transport.is_connected()).await;
    assert_eq!(transport.reconnect_attempts(), 0);

    transport
        .send_message(Request::new("ping", 2u64))
        .await
        .unwrap();
    let echoed = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(echoed.id(), Some(&RequestId::from(2u64)));

    transport.close().await.unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 2, "one close per disconnect");
}

#[tokio::test]
async fn test_normal_close_does_not_reconnect() {
    let (listener, url) = bind().await;
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        loop {
            let mut ws = accept(&listener).await;
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = ws.close(None).await;
        }
    });

    let transport = WebSocketTransport::builder(url)
        .no_ping()
        .reconnect_backoff(fast_backoff())
        .build();
    let closes = count_closes(&transport);

    transport.start().await.unwrap();
    wait_until(|| closes.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
    let err = transport
        .send_message(Request::new("ping", 1u64))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::NotConnected));
}

#[tokio::test]
async fn test_missing_pong_is_connection_loss() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        // Never read, so pings are never answered.
        let _ws = accept(&listener).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let transport = WebSocketTransport::builder(url)
        .ping_interval(Duration::from_millis(50))
        .pong_timeout(Duration::from_millis(100))
        .no_auto_reconnect()
        .build();
    let closes = count_closes(&transport);

    transport.start().await.unwrap();
    wait_until(|| closes.load(Ordering::SeqCst) == 1).await;
    assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_malformed_frame_is_reported_and_reading_continues() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.send(WsMessage::Text("not json".to_string())).await.unwrap();
        ws.send(WsMessage::Text(r#"{"jsonrpc":"2.0","id":9,"result":{}}"#.to_string()))
            .await
            .unwrap();
        echo(ws).await;
    });

    let transport = WebSocketTransport::builder(url).no_ping().build();
    let (msg_tx, mut messages) = mpsc::unbounded_channel();
    let (err_tx, mut errors) = mpsc::unbounded_channel();
    transport.on_message(move |msg| {
        let _ = msg_tx.send(msg);
    });
    transport.on_error(move |err| {
        let _ = err_tx.send(err);
    });

    transport.start().await.unwrap();
    let err = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(err, TransportError::Framing(_)), "{err:?}");
    let msg = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(msg.id(), Some(&RequestId::from(9u64)));
    assert!(transport.is_connected());

    transport.close().await.unwrap();
}
