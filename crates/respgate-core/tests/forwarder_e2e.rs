use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use respgate_core::account::{Account, AccountKind, Platform};
use respgate_core::config::GatewayConfig;
use respgate_core::error::GatewayError;
use respgate_core::forwarder::{Forwarder, RequestedTransport, TurnRequest, TurnSink};
use respgate_core::pool::Pool;
use respgate_core::scheduler::Scheduler;
use respgate_protocol::auth::{AuthProvider, Credential};
use respgate_protocol::event::ResponseEvent;
use respgate_protocol::request::ResponsesApiRequest;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

type ServerWs = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// Bind a loopback listener, hand each accepted connection off to `handler`.
async fn spawn_ws_server<Handler, Fut>(
    connections: usize,
    handler: Handler,
) -> (String, tokio::task::JoinHandle<()>)
where
    Handler: Fn(ServerWs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test websocket listener");
    let addr = listener.local_addr().expect("local addr").to_string();

    let task = tokio::spawn(async move {
        for _ in 0..connections {
            let (stream, _) = match listener.accept().await {
                Ok(s) => s,
                Err(_) => return,
            };
            let ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(_) => return,
            };
            handler(ws).await;
        }
    });

    (addr, task)
}

struct StaticAuth;

impl AuthProvider for StaticAuth {
    fn credential_for(&self, _account_id: &str) -> Option<Credential> {
        Some(Credential::ApiKey("test-key".into()))
    }
}

#[derive(Default)]
struct CollectingSink {
    events: Arc<Mutex<Vec<ResponseEvent>>>,
}

impl TurnSink for CollectingSink {
    fn on_event(&mut self, event: &ResponseEvent, _raw: &Value) -> Result<(), GatewayError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

fn test_account() -> Account {
    Account {
        id: "acct_test".into(),
        platform: Platform::OpenAi,
        kind: AccountKind::ApiKey,
        concurrency: 4,
        priority: 0,
        schedulable: true,
        model_whitelist: None,
        model_mapping: Default::default(),
        supports_ws: true,
        store_recovery_allowed: false,
    }
}

fn test_request(ws_url: url::Url) -> TurnRequest {
    TurnRequest {
        account: test_account(),
        group: "g1".into(),
        session_hash: Some("session-1".into()),
        legacy_session_hash: None,
        session_scope: "scope-1".into(),
        body: ResponsesApiRequest {
            model: "gpt-5.1".into(),
            instructions: String::new(),
            input: vec![],
            tools: vec![],
            tool_choice: "auto".into(),
            parallel_tool_calls: true,
            reasoning: None,
            store: true,
            stream: true,
            include: vec![],
            previous_response_id: None,
            prompt_cache_key: None,
            text: None,
        },
        ws_url,
        session_id_header: None,
        conversation_id_header: None,
        turn_metadata_header: None,
        pending_call_ids: HashSet::new(),
        allow_empty_tool_output_synthesis: false,
        required_transport: RequestedTransport::Auto,
        force_http: false,
        client_is_websocket: true,
    }
}

fn fast_cfg() -> Arc<GatewayConfig> {
    let mut cfg = GatewayConfig::default();
    cfg.reconnect.retry_limit = 1;
    cfg.reconnect.initial_backoff_ms = 1;
    cfg.reconnect.max_backoff_ms = 5;
    cfg.timeouts.dial_timeout_seconds = 5;
    cfg.timeouts.read_timeout_seconds = 5;
    Arc::new(cfg)
}

#[tokio::test]
async fn reconnect_exhausted_before_any_token_surfaces_typed_error() {
    // Every accepted connection closes immediately without sending a
    // single event, so the forwarder never produces a token and must
    // give up once its bounded retry budget is spent.
    let (addr, server) = spawn_ws_server(2, |mut ws: ServerWs| async move {
        let _ = ws.close(None).await;
    })
    .await;

    let cfg = fast_cfg();
    let pool = Pool::new(cfg.clone());
    let scheduler = Scheduler::new(cfg.clone());
    let forwarder = Forwarder::new(cfg.clone());
    let auth = StaticAuth;
    let mut sink = CollectingSink::default();

    let ws_url = url::Url::parse(&format!("ws://{addr}/v1/responses")).unwrap();
    let req = test_request(ws_url);

    let result = forwarder
        .run_turn(&pool, &scheduler, &scheduler.sticky, &auth, &req, &mut sink)
        .await;

    let err = result.expect_err("expected the turn to fail after exhausting retries");
    assert!(!err.response_already_written(), "no token was ever produced");
    match err {
        GatewayError::Transport(_) | GatewayError::WsTransportClosed { .. } => {}
        other => panic!("expected a transport-closed error, got {other:?}"),
    }

    server.await.expect("server task");
}

#[tokio::test]
async fn successful_turn_streams_tokens_and_binds_response_id() {
    let (addr, server) = spawn_ws_server(1, |mut ws: ServerWs| async move {
        use futures::{SinkExt, StreamExt};

        let first = ws
            .next()
            .await
            .expect("first msg")
            .expect("first msg ok")
            .into_text()
            .expect("text");
        let first_json: Value = serde_json::from_str(&first).expect("json");
        assert_eq!(first_json["type"], "response.create");

        ws.send(Message::Text(
            json!({"type": "response.created", "response": {"id": "resp_1"}})
                .to_string()
                .into(),
        ))
        .await
        .expect("send created");

        ws.send(Message::Text(
            json!({"type": "response.output_text.delta", "delta": "hi"})
                .to_string()
                .into(),
        ))
        .await
        .expect("send delta");

        ws.send(Message::Text(
            json!({
                "type": "response.completed",
                "response": {"id": "resp_1", "usage": {"input_tokens": 1, "output_tokens": 1, "cached_tokens": 0}}
            })
            .to_string()
            .into(),
        ))
        .await
        .expect("send completed");
    })
    .await;

    let cfg = fast_cfg();
    let pool = Pool::new(cfg.clone());
    let scheduler = Scheduler::new(cfg.clone());
    let forwarder = Forwarder::new(cfg.clone());
    let auth = StaticAuth;
    let mut sink = CollectingSink::default();
    let events = sink.events.clone();

    let ws_url = url::Url::parse(&format!("ws://{addr}/v1/responses")).unwrap();
    let req = test_request(ws_url);

    let outcome = forwarder
        .run_turn(&pool, &scheduler, &scheduler.sticky, &auth, &req, &mut sink)
        .await
        .expect("turn should succeed");

    assert_eq!(outcome.response_id.as_deref(), Some("resp_1"));
    assert!(outcome.produced_token);
    assert_eq!(outcome.usage.unwrap().output_tokens, 1);
    assert_eq!(
        scheduler.sticky.get_response_account("g1", "resp_1").as_deref(),
        Some("acct_test")
    );
    assert_eq!(events.lock().unwrap().len(), 3);

    server.await.expect("server task");
}
