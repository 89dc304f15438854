#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end tests for the webhook endpoint.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    tokio::net::TcpListener,
    tokio_util::sync::CancellationToken,
};

use {
    parley_app::App,
    parley_channels::{ChannelTransport, MemoryTransport},
    parley_gateway::{GatewayState, build_gateway_app},
    parley_plugins::{Plugin, Sender, TransportSender},
    parley_routing::{Route, handler_fn, selectors},
    parley_streaming::StreamConfig,
};

struct MemoryChannel {
    transport: Arc<MemoryTransport>,
}

#[async_trait]
impl Plugin for MemoryChannel {
    fn name(&self) -> &str {
        "memory"
    }

    fn as_sender(self: Arc<Self>) -> Option<Arc<dyn Sender>> {
        Some(Arc::new(TransportSender::new(
            Arc::clone(&self.transport) as Arc<dyn ChannelTransport>
        )))
    }
}

/// Spin up a gateway on an ephemeral port, return the bound address.
async fn start_test_server(transport: &Arc<MemoryTransport>) -> SocketAddr {
    let app = App::builder()
        .stream_config(StreamConfig::default().with_flush_interval(Duration::from_millis(5)))
        .plugin(Arc::new(MemoryChannel {
            transport: Arc::clone(transport),
        }))
        .unwrap()
        .route(
            Route::new(
                selectors::message(),
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let token = ctx.token().unwrap_or("anonymous").to_string();
                        let stream = ctx.stream();
                        stream.emit("hello ");
                        stream.emit(token);
                        Ok(None)
                    })
                }),
            )
            .named("stream-echo"),
        )
        .build()
        .await
        .unwrap();
    app.start(&CancellationToken::new()).await.unwrap();

    let state = GatewayState::new(Arc::new(app), "memory");
    let router = build_gateway_app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn activity(kind: Value) -> Value {
    let mut activity = json!({
        "id": "in-1",
        "channelId": "msteams",
        "serviceUrl": "https://smba.example/",
        "from": { "id": "29:user" },
        "recipient": { "id": "28:bot" },
        "conversation": { "id": "a:conv" },
    });
    let fields = activity.as_object_mut().unwrap();
    for (key, value) in kind.as_object().unwrap() {
        fields.insert(key.clone(), value.clone());
    }
    activity
}

#[tokio::test]
async fn health_reports_ok() {
    let transport = Arc::new(MemoryTransport::new());
    let addr = start_test_server(&transport).await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["plugins"], json!(["memory"]));
}

#[tokio::test]
async fn streamed_message_sets_meta_headers() {
    let transport = Arc::new(MemoryTransport::new());
    let addr = start_test_server(&transport).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/messages"))
        .bearer_auth("caller-token")
        .json(&activity(json!({ "type": "message", "text": "hi" })))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-parley-routes-matched"], "1");
    let stream_id = resp.headers()["x-parley-stream-id"].to_str().unwrap().to_string();

    let sent = transport.sent();
    let last = sent.last().unwrap();
    assert_eq!(last.text(), Some("hello caller-token"));
    assert_eq!(last.id.as_deref(), Some(stream_id.as_str()));
}

#[tokio::test]
async fn unhandled_invoke_answers_501() {
    let transport = Arc::new(MemoryTransport::new());
    let addr = start_test_server(&transport).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/messages"))
        .json(&activity(json!({ "type": "invoke", "name": "task/fetch" })))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 501);
    assert!(resp.headers().get("x-parley-stream-id").is_none());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "status": 501 }));
}

#[tokio::test]
async fn unrecognised_activity_types_are_accepted() {
    let transport = Arc::new(MemoryTransport::new());
    let addr = start_test_server(&transport).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/messages"))
        .json(&activity(json!({ "type": "installationUpdate", "action": "add" })))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-parley-routes-matched"], "0");
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn malformed_activities_are_rejected() {
    let transport = Arc::new(MemoryTransport::new());
    let addr = start_test_server(&transport).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/messages"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let mut orphan = activity(json!({ "type": "message", "text": "hi" }));
    orphan.as_object_mut().unwrap().remove("conversation");
    let resp = client
        .post(format!("http://{addr}/api/messages"))
        .json(&orphan)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("conversation"));
    assert!(transport.sent().is_empty());
}
