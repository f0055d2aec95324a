//! End-to-end Streamable HTTP transport tests against an in-process axum server.

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::post;
use bytes::Bytes;
use mcpwire_core::{Message, Notification, Request, RequestId};
use mcpwire_transport::http::{HttpTransport, LAST_EVENT_ID_HEADER, MCP_SESSION_ID_HEADER};
use mcpwire_transport::{ReconnectionOptions, Transport, TransportError, TransportExt};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

/// What the mock server saw.
#[derive(Default)]
struct Seen {
    post_sessions: Mutex<Vec<Option<String>>>,
    get_last_event_ids: Mutex<Vec<Option<String>>>,
    delete_sessions: Mutex<Vec<Option<String>>>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn json_response(status: StatusCode, body: Value) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty(status: StatusCode) -> Response {
    Response::builder().status(status).body(Body::empty()).unwrap()
}

fn sse(body: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .body(Body::from(body))
        .unwrap()
}

/// An SSE response that sends `body` and then stays open.
fn sse_open(body: String) -> Response {
    let head = futures::stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(body)) });
    let stream = futures::StreamExt::chain(head, futures::stream::pending());
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(stream))
        .unwrap()
}

fn method_of(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("method")?
        .as_str()
        .map(str::to_string)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn serve(router: Router) -> Url {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/mcp")).unwrap()
}

fn fast_reconnect() -> ReconnectionOptions {
    ReconnectionOptions::default()
        .with_initial_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(50))
}

struct Collected {
    messages: mpsc::UnboundedReceiver<Message>,
    errors: mpsc::UnboundedReceiver<TransportError>,
}

fn collect(transport: &HttpTransport) -> Collected {
    let (msg_tx, messages) = mpsc::unbounded_channel();
    let (err_tx, errors) = mpsc::unbounded_channel();
    transport.on_message(move |msg| {
        let _ = msg_tx.send(msg);
    });
    transport.on_error(move |err| {
        let _ = err_tx.send(err);
    });
    Collected { messages, errors }
}

#[tokio::test]
async fn test_json_response_session_and_delete_on_close() {
    let seen = Arc::new(Seen::default());
    let (on_post, on_delete) = (Arc::clone(&seen), Arc::clone(&seen));
    let router = Router::new().route(
        "/mcp",
        post(move |headers: HeaderMap, body: String| {
            let seen = Arc::clone(&on_post);
            async move {
                seen.post_sessions
                    .lock()
                    .unwrap()
                    .push(header(&headers, MCP_SESSION_ID_HEADER));
                if method_of(&body).as_deref() == Some("initialize") {
                    let mut response =
                        json_response(StatusCode::OK, json!({"jsonrpc":"2.0","id":1,"result":{}}));
                    response
                        .headers_mut()
                        .insert(MCP_SESSION_ID_HEADER, "session-1".parse().unwrap());
                    response
                } else {
                    empty(StatusCode::ACCEPTED)
                }
            }
        })
        .get(|| async { empty(StatusCode::METHOD_NOT_ALLOWED) })
        .delete(move |headers: HeaderMap| {
            let seen = Arc::clone(&on_delete);
            async move {
                seen.delete_sessions
                    .lock()
                    .unwrap()
                    .push(header(&headers, MCP_SESSION_ID_HEADER));
                empty(StatusCode::OK)
            }
        }),
    );
    let url = serve(router).await;

    let transport = HttpTransport::builder(url)
        .reconnection(fast_reconnect())
        .build()
        .unwrap();
    let mut collected = collect(&transport);
    transport.start().await.unwrap();

    transport
        .send_message(Request::new("initialize", 1u64))
        .await
        .unwrap();
    let reply = collected.messages.try_recv().unwrap();
    assert_eq!(reply.id(), Some(&RequestId::from(1u64)));
    assert_eq!(transport.session_id().as_deref(), Some("session-1"));

    transport
        .send_message(Notification::new("notifications/initialized"))
        .await
        .unwrap();

    // The standalone GET is answered with 405; give it a moment to run.
    tokio::time::sleep(Duration::from_millis(100)).await;
    transport.close().await.unwrap();

    assert_eq!(
        *seen.post_sessions.lock().unwrap(),
        vec![None, Some("session-1".to_string())]
    );
    assert_eq!(
        *seen.delete_sessions.lock().unwrap(),
        vec![Some("session-1".to_string())]
    );
    assert!(transport.session_id().is_none());
    assert!(collected.errors.try_recv().is_err(), "405 on GET is not an error");
}

#[tokio::test]
async fn test_json_batch_is_delivered_in_order() {
    let router = Router::new().route(
        "/mcp",
        post(|| async {
            json_response(
                StatusCode::OK,
                json!([
                    {"jsonrpc":"2.0","id":1,"result":{"n":1}},
                    {"jsonrpc":"2.0","id":2,"result":{"n":2}}
                ]),
            )
        }),
    );
    let url = serve(router).await;

    let transport = HttpTransport::builder(url).keep_session_on_close().build().unwrap();
    let mut collected = collect(&transport);
    transport.start().await.unwrap();
    transport
        .send_message(Request::new("tools/list", 1u64))
        .await
        .unwrap();

    let first = collected.messages.try_recv().unwrap();
    let second = collected.messages.try_recv().unwrap();
    assert_eq!(first.id(), Some(&RequestId::from(1u64)));
    assert_eq!(second.id(), Some(&RequestId::from(2u64)));
    assert_eq!(transport.messages_received(), 2);
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_response_on_post_sse_stream() {
    let router = Router::new().route(
        "/mcp",
        post(|| async {
            sse(concat!(
                ": priming\n\n",
                "event: message\n",
                "id: evt-1\n",
                "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n",
                "id: evt-2\n",
                "data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{}}\n\n",
            )
            .to_string())
        }),
    );
    let url = serve(router).await;

    let transport = HttpTransport::builder(url).keep_session_on_close().build().unwrap();
    let mut collected = collect(&transport);
    transport.start().await.unwrap();
    transport
        .send_message(Request::new("tools/call", 3u64))
        .await
        .unwrap();

    let progress = timeout(WAIT, collected.messages.recv()).await.unwrap().unwrap();
    assert_eq!(progress.method(), Some("notifications/progress"));
    let reply = timeout(WAIT, collected.messages.recv()).await.unwrap().unwrap();
    assert_eq!(reply.id(), Some(&RequestId::from(3u64)));
    assert_eq!(transport.last_event_id().as_deref(), Some("evt-2"));

    transport.close().await.unwrap();
    assert!(collected.errors.try_recv().is_err());
}

#[tokio::test]
async fn test_accepted_request_answered_on_standalone_stream() {
    let released = Arc::new(tokio::sync::Notify::new());
    let (on_post, on_get) = (Arc::clone(&released), Arc::clone(&released));
    let router = Router::new().route(
        "/mcp",
        post(move |body: String| {
            let released = Arc::clone(&on_post);
            async move {
                if method_of(&body).as_deref() == Some("tools/call") {
                    released.notify_one();
                }
                empty(StatusCode::ACCEPTED)
            }
        })
        .get(move || {
            let released = Arc::clone(&on_get);
            async move {
                // The result is only written once the request has been accepted.
                let reply = futures::stream::once(async move {
                    released.notified().await;
                    Ok::<_, std::io::Error>(Bytes::from_static(
                        b"id: s-1\ndata: {\"jsonrpc\":\"2.0\",\"id\":4,\"result\":{\"ok\":true}}\n\n",
                    ))
                });
                let stream = futures::StreamExt::chain(reply, futures::stream::pending());
                Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "text/event-stream")
                    .body(Body::from_stream(stream))
                    .unwrap()
            }
        }),
    );
    let url = serve(router).await;

    let transport = HttpTransport::builder(url).keep_session_on_close().build().unwrap();
    let mut collected = collect(&transport);
    transport.start().await.unwrap();
    transport
        .send_message(Notification::new("notifications/initialized"))
        .await
        .unwrap();
    transport
        .send_message(Request::new("tools/call", 4u64))
        .await
        .unwrap();

    let reply = timeout(WAIT, collected.messages.recv()).await.unwrap().unwrap();
    assert_eq!(reply.id(), Some(&RequestId::from(4u64)));
    let Message::Response(response) = reply else {
        panic!("expected a response");
    };
    assert_eq!(response.into_result().unwrap(), json!({"ok": true}));
    assert_eq!(transport.last_event_id().as_deref(), Some("s-1"));

    transport.close().await.unwrap();
    assert!(collected.errors.try_recv().is_err());
}

#[tokio::test]
async fn test_standalone_stream_resumes_with_last_event_id() {
    let seen = Arc::new(Seen::default());
    let on_get = Arc::clone(&seen);
    let router = Router::new().route(
        "/mcp",
        post(|| async { empty(StatusCode::ACCEPTED) }).get(move |headers: HeaderMap| {
            let seen = Arc::clone(&on_get);
            async move {
                let last = header(&headers, LAST_EVENT_ID_HEADER);
                let first = {
                    let mut gets = seen.get_last_event_ids.lock().unwrap();
                    gets.push(last);
                    gets.len() == 1
                };
                if first {
                    let events: String = (1..=5)
                        .map(|i| {
                            format!(
                                "id: {i}\ndata: {{\"jsonrpc\":\"2.0\",\"method\":\"tick\",\"params\":{{\"i\":{i}}}}}\n\n"
                            )
                        })
                        .collect();
                    sse(events)
                } else {
                    sse_open(String::new())
                }
            }
        }),
    );
    let url = serve(router).await;

    let transport = HttpTransport::builder(url)
        .reconnection(fast_reconnect())
        .keep_session_on_close()
        .build()
        .unwrap();
    let mut collected = collect(&transport);
    transport.start().await.unwrap();
    transport
        .send_message(Notification::new("notifications/initialized"))
        .await
        .unwrap();

    for i in 1..=5 {
        let msg = timeout(WAIT, collected.messages.recv()).await.unwrap().unwrap();
        let Message::Notification(note) = msg else {
            panic!("expected a notification");
        };
        assert_eq!(note.params.unwrap()["i"], i);
    }

    timeout(WAIT, async {
        while seen.get_last_event_ids.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(
        seen.get_last_event_ids.lock().unwrap()[..2],
        [None, Some("5".to_string())]
    );
    assert_eq!(transport.last_event_id().as_deref(), Some("5"));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_failing_get_exhausts_reconnection_once() {
    let gets = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&gets);
    let router = Router::new().route(
        "/mcp",
        post(|| async { empty(StatusCode::ACCEPTED) }).get(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                empty(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }),
    );
    let url = serve(router).await;

    let transport = HttpTransport::builder(url)
        .reconnection(fast_reconnect().with_max_retries(2))
        .keep_session_on_close()
        .build()
        .unwrap();
    let mut collected = collect(&transport);
    transport.start().await.unwrap();
    transport
        .send_message(Notification::new("notifications/initialized"))
        .await
        .unwrap();

    let err = timeout(WAIT, collected.errors.recv()).await.unwrap().unwrap();
    assert!(matches!(err, TransportError::ReconnectionExhausted { attempts: 2 }), "{err:?}");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(collected.errors.try_recv().is_err());
    assert_eq!(gets.load(Ordering::SeqCst), 3);
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_session_is_reported_as_expired() {
    let router = Router::new().route("/mcp", post(|| async { empty(StatusCode::NOT_FOUND) }));
    let url = serve(router).await;

    let transport = HttpTransport::builder(url)
        .session_id("stale")
        .keep_session_on_close()
        .build()
        .unwrap();
    transport.start().await.unwrap();

    let err = transport
        .send_message(Request::new("ping", 1u64))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::SessionExpired));
    assert!(transport.session_id().is_none());
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_unauthorized_carries_challenge() {
    let router = Router::new().route(
        "/mcp",
        post(|| async {
            Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .header(
                    "www-authenticate",
                    r#"Bearer resource_metadata="http://127.0.0.1/.well-known/oauth-protected-resource""#,
                )
                .body(Body::empty())
                .unwrap()
        }),
    );
    let url = serve(router).await;

    let transport = HttpTransport::builder(url).keep_session_on_close().build().unwrap();
    transport.start().await.unwrap();
    let err = transport
        .send_message(Request::new("ping", 1u64))
        .await
        .unwrap_err();

    let TransportError::Unauthorized { www_authenticate } = err else {
        panic!("expected Unauthorized, got {err:?}");
    };
    assert!(www_authenticate.unwrap().contains("resource_metadata="));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_server_error_status_is_returned() {
    let router = Router::new().route(
        "/mcp",
        post(|| async {
            Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Body::from("bad payload"))
                .unwrap()
        }),
    );
    let url = serve(router).await;

    let transport = HttpTransport::builder(url).keep_session_on_close().build().unwrap();
    transport.start().await.unwrap();
    let err = transport
        .send_message(Request::new("ping", 1u64))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, TransportError::HttpStatus { status: 400, body } if body == "bad payload"),
        "{err:?}"
    );
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_close_before_start_fires_close_once() {
    let transport = HttpTransport::builder(Url::parse("http://127.0.0.1:9/mcp").unwrap())
        .build()
        .unwrap();
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    transport.on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    transport.close().await.unwrap();
    transport.close().await.unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}
