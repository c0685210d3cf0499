use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderValue};
use serde_json::Value;
use url::Url;

use respgate_protocol::{
    headers::{build_handshake_headers, HandshakeContext, X_TURN_STATE_HEADER},
    request::{ResponseCreateWsRequest, ResponsesApiRequest, ResponsesWsRequest},
    AuthProvider, Credential, ResponseEvent, TokenUsage,
};
use respgate_transport::{TransportError, WsStream};

use crate::account::{Account, AccountKind};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::pool::{Pool, PoolKey};
use crate::scheduler::Scheduler;
use crate::sticky::StickyStore;

/// Canonical upstream→local tool-name mapping. Upstream sometimes emits its
/// own tool naming for built-in tools; the client only knows the local name.
const TOOL_NAME_MAP: &[(&str, &str)] = &[("apply_patch", "edit")];

/// Everything the forwarder needs for one client turn, already resolved by
/// the caller (ingress + scheduler).
pub struct TurnRequest {
    pub account: Account,
    pub group: String,
    pub session_hash: Option<String>,
    pub legacy_session_hash: Option<String>,
    /// Derived by the caller from api-key user+key id XOR'd with the
    /// session hash, so tenants never share a pool bucket.
    pub session_scope: String,
    pub body: ResponsesApiRequest,
    pub ws_url: Url,
    pub session_id_header: Option<String>,
    pub conversation_id_header: Option<String>,
    pub turn_metadata_header: Option<String>,
    /// `call_id`s the prior turn left pending; used to validate
    /// `function_call_output` continuity when `store=false`.
    pub pending_call_ids: HashSet<String>,
    pub allow_empty_tool_output_synthesis: bool,
    /// The wire transport the client explicitly asked for, if any.
    pub required_transport: RequestedTransport,
    /// Set by ingress when the caller's own config forces HTTP regardless
    /// of what would otherwise be chosen.
    pub force_http: bool,
    /// Whether the inbound client connection is itself a WS upgrade (vs a
    /// plain HTTP POST that could be served over SSE).
    pub client_is_websocket: bool,
}

/// The wire transport variant a client may explicitly request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestedTransport {
    #[default]
    Auto,
    WsV1,
    WsV2,
    Http,
}

/// Outcome of the pre-dial transport decision. `HttpSse` tells the
/// caller to route the request through that (out-of-scope) collaborator
/// instead of `Forwarder::run_turn`, which only ever drives WSv2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDecision {
    WsV2,
    HttpSse,
}

/// Decides WSv2 vs HTTP-SSE from account capability flags, config, and
/// what the request asked for — before any dial is attempted. WSv1 is not
/// supported at all and is rejected outright.
pub fn decide_transport(
    account: &Account,
    cfg: &GatewayConfig,
    required_transport: RequestedTransport,
    force_http: bool,
    client_is_websocket: bool,
) -> Result<TransportDecision, GatewayError> {
    if required_transport == RequestedTransport::WsV1 {
        return Err(GatewayError::UpstreamInvalidRequest {
            response_already_written: false,
        });
    }
    if force_http || required_transport == RequestedTransport::Http {
        return Ok(TransportDecision::HttpSse);
    }

    let ws_eligible = cfg.ws.enabled
        && cfg.ws.responses_websockets_v2
        && account.supports_ws
        && match account.kind {
            AccountKind::OAuth => cfg.ws.oauth_enabled,
            AccountKind::ApiKey => cfg.ws.api_key_enabled,
        };

    if ws_eligible {
        return Ok(TransportDecision::WsV2);
    }
    if client_is_websocket {
        // The client already upgraded the connection; there is no HTTP
        // fallback to offer it on this socket.
        return Err(GatewayError::WsUnavailable {
            response_already_written: false,
        });
    }
    Ok(TransportDecision::HttpSse)
}

#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub account_id: String,
    pub conn_id: Option<String>,
    pub response_id: Option<String>,
    pub usage: Option<TokenUsage>,
    pub produced_token: bool,
    pub reconnect_attempts: u32,
}

/// Receives decoded+rewritten events as the turn streams. Implemented by
/// the ingress layer (SSE writer or buffering single-JSON collector); this
/// crate only decides what goes out, not how it's framed downstream.
pub trait TurnSink: Send {
    fn on_event(&mut self, event: &ResponseEvent, raw: &Value) -> Result<(), GatewayError>;
}

/// C6: builds upstream payloads, drives one WS turn end-to-end, and owns
/// the bounded reconnect loop. Stateless across turns — all continuity
/// state lives in `StickyStore`.
pub struct Forwarder {
    cfg: Arc<GatewayConfig>,
}

impl Forwarder {
    pub fn new(cfg: Arc<GatewayConfig>) -> Self {
        Self { cfg }
    }

    /// Builds the `response.create` envelope, applying every transform in
    /// the payload-normalization step: OAuth store/stream contract, model
    /// rewrite, client_metadata injection, and (on retry) include-only field
    /// dropping.
    pub fn build_create_request(
        &self,
        req: &TurnRequest,
        drop_include_only: bool,
        drop_previous_response_id: bool,
    ) -> ResponseCreateWsRequest {
        let mut out = ResponseCreateWsRequest::from(&req.body);
        out.model = req.account.rewrite_model(&req.body.model).to_string();

        match req.account.kind {
            AccountKind::OAuth => {
                // CLI-mode contract: store is off unless the account is
                // specifically allowed to recover continuation state, and
                // stream is forced on regardless of the client's request.
                out.store = req.account.store_recovery_allowed;
                out.stream = true;
            }
            AccountKind::ApiKey => {
                out.store = req.body.store;
                out.stream = req.body.stream;
            }
        }

        if let Some(meta) = &req.turn_metadata_header {
            out.client_metadata
                .get_or_insert_with(std::collections::HashMap::new)
                .insert("x-codex-turn-metadata".to_string(), meta.clone());
        }

        // Only no-op fields are ever dropped on retry; prompt_cache_key and
        // other semantic fields always survive.
        if drop_include_only {
            out.include.clear();
        }
        if drop_previous_response_id {
            out.previous_response_id = None;
        }

        out
    }

    /// `function_call_output` continuity for the `store=false` path: every
    /// output item's `call_id` must be in the pending set and every pending
    /// id must be covered, or the caller must not reuse `previous_response_id`.
    pub fn check_function_call_continuity(
        &self,
        req: &TurnRequest,
        supplied_call_ids: &HashSet<String>,
    ) -> Result<(), GatewayError> {
        if req.pending_call_ids.is_empty() {
            return Ok(());
        }
        let missing: Vec<&String> = req.pending_call_ids.difference(supplied_call_ids).collect();
        let extra: Vec<&String> = supplied_call_ids.difference(&req.pending_call_ids).collect();
        if missing.is_empty() && extra.is_empty() {
            return Ok(());
        }
        if !missing.is_empty() && req.allow_empty_tool_output_synthesis && extra.is_empty() {
            return Ok(());
        }
        Err(GatewayError::MissingToolOutputs {
            response_already_written: false,
        })
    }

    fn handshake_headers(
        &self,
        req: &TurnRequest,
        credential: &Credential,
        turn_state: Option<&str>,
    ) -> HeaderMap {
        let extra: Vec<(http::HeaderName, HeaderValue)> = Vec::new();
        let ctx = HandshakeContext {
            credential,
            session_id: req.session_id_header.as_deref(),
            conversation_id: req.conversation_id_header.as_deref(),
            turn_metadata: req.turn_metadata_header.as_deref(),
            turn_state,
            extra: &extra,
        };
        build_handshake_headers(&ctx)
    }

    fn pool_key(&self, req: &TurnRequest, store_disabled: bool) -> PoolKey {
        PoolKey {
            account_id: req.account.id.clone(),
            session_scope: req.session_scope.clone(),
            isolated: self.cfg.ws.store_disabled_force_new_conn && store_disabled,
        }
    }

    /// Drives one full turn: decides WSv2 vs HTTP-SSE, acquires a lease,
    /// writes `response.create`, streams events to `sink` with per-read
    /// deadlines, and reconnects on a transport close that happened before
    /// any token was produced. Reconnects stay on the same account (a
    /// different account is the caller's job — re-enter the scheduler
    /// excluding this account and call `run_turn` again;
    /// `scheduler.report_switch()` is for the caller to invoke when it
    /// does). Returns `Err(WsUnavailable)` immediately when the transport
    /// decision resolves to HTTP-SSE — that path is driven by the
    /// out-of-scope HTTP-SSE collaborator, not this engine.
    #[tracing::instrument(skip_all, fields(account_id = %req.account.id, session_hash = req.session_hash.as_deref().unwrap_or("")))]
    pub async fn run_turn(
        &self,
        pool: &Pool,
        scheduler: &Scheduler,
        sticky: &StickyStore,
        auth: &dyn AuthProvider,
        req: &TurnRequest,
        sink: &mut dyn TurnSink,
    ) -> Result<TurnOutcome, GatewayError> {
        let transport = decide_transport(
            &req.account,
            &self.cfg,
            req.required_transport,
            req.force_http,
            req.client_is_websocket,
        )?;
        if transport == TransportDecision::HttpSse {
            tracing::debug!(account_id = %req.account.id, "transport decision routed off WSv2");
            return Err(GatewayError::WsUnavailable {
                response_already_written: false,
            });
        }

        let credential = auth
            .credential_for(&req.account.id)
            .ok_or(GatewayError::WsAuth {
                response_already_written: false,
            })?;

        let store_disabled = match req.account.kind {
            AccountKind::OAuth => !req.account.store_recovery_allowed,
            AccountKind::ApiKey => !req.body.store,
        };
        let key = self.pool_key(req, store_disabled);

        if store_disabled {
            let supplied = extract_function_call_output_ids(&req.body.input);
            self.check_function_call_continuity(req, &supplied)?;
        }

        let mut outcome = TurnOutcome {
            account_id: req.account.id.clone(),
            ..Default::default()
        };

        let retry_limit = self.cfg.reconnect.retry_limit;
        let mut attempt = 0u32;
        let mut drop_include_only = false;
        let mut drop_previous_response_id = false;

        loop {
            let turn_state = sticky.get_session_turn_state(&req.group, req.session_hash.as_deref().unwrap_or(""));
            let headers = self.handshake_headers(req, &credential, turn_state.as_deref());
            let body = self.build_create_request(req, drop_include_only, drop_previous_response_id);

            let preferred_conn_id = req
                .body
                .previous_response_id
                .as_deref()
                .and_then(|rid| sticky.get_response_conn(rid));

            let dial_timeout = self.cfg.timeouts.dial();
            let url = req.ws_url.clone();
            let idle_timeout = self.cfg.timeouts.read();
            let lease_result = pool
                .acquire(key.clone(), preferred_conn_id.as_deref(), dial_timeout, move || async move {
                    WsStream::connect(&url, &headers, idle_timeout).await
                })
                .await;

            let mut lease = match lease_result {
                Ok(lease) => lease,
                Err(e) => {
                    if attempt >= retry_limit {
                        return Err(e);
                    }
                    attempt += 1;
                    outcome.reconnect_attempts = attempt;
                    tracing::warn!(attempt, error = %e, "failed to acquire upstream connection, retrying");
                    tokio::time::sleep(self.backoff(attempt)).await;
                    continue;
                }
            };
            outcome.conn_id = Some(lease.conn_id().to_string());

            if let Some(token) = lease.response_headers.get(X_TURN_STATE_HEADER.as_str()) {
                sticky.set_session_turn_state(
                    &req.group,
                    req.session_hash.as_deref().unwrap_or(""),
                    token,
                    self.cfg.sticky.session_ttl(),
                );
            }

            if self.cfg.ws.prewarm_generate_enabled && lease.was_freshly_dialed() {
                let mut prime = body.clone();
                prime.generate = Some(false);
                let prime_text = serde_json::to_string(&ResponsesWsRequest::ResponseCreate(prime));
                if let Ok(prime_text) = prime_text {
                    if let Err(e) = lease.send_text(prime_text).await {
                        tracing::warn!(account_id = %req.account.id, error = %e, "prewarm priming request failed");
                    }
                }
            }

            let envelope = ResponsesWsRequest::ResponseCreate(body);
            let text = serde_json::to_string(&envelope).map_err(|_| GatewayError::UpstreamInvalidRequest {
                response_already_written: false,
            })?;
            if let Err(e) = lease.send_text(text).await {
                if attempt >= retry_limit || outcome.produced_token {
                    return Err(GatewayError::Transport(e));
                }
                attempt += 1;
                outcome.reconnect_attempts = attempt;
                drop_include_only = true;
                tokio::time::sleep(self.backoff(attempt)).await;
                continue;
            }

            match self.read_turn(&mut lease, req, sticky, &mut outcome, sink).await {
                Ok(()) => {
                    scheduler.report_result(
                        &req.account.id,
                        true,
                        None,
                        Some(req.body.model.as_str()),
                    );
                    return Ok(outcome);
                }
                Err(TurnReadError::PreviousResponseNotFound) if req.pending_call_ids.is_empty() => {
                    if attempt >= retry_limit || drop_previous_response_id {
                        scheduler.report_result(&req.account.id, false, None, Some(&req.body.model));
                        return Err(GatewayError::WsPreviousResponseNotFound {
                            response_already_written: outcome.produced_token,
                        });
                    }
                    attempt += 1;
                    outcome.reconnect_attempts = attempt;
                    drop_previous_response_id = true;
                    continue;
                }
                Err(TurnReadError::PreviousResponseNotFound) => {
                    scheduler.report_result(&req.account.id, false, None, Some(&req.body.model));
                    tracing::error!(account_id = %req.account.id, "previous_response_id not found, continuation has pending tool calls");
                    return Err(GatewayError::WsPreviousResponseNotFound {
                        response_already_written: outcome.produced_token,
                    });
                }
                Err(TurnReadError::ConnectionLimit) => {
                    if attempt >= retry_limit {
                        scheduler.report_result(&req.account.id, false, None, Some(&req.body.model));
                        return Err(GatewayError::WsConnectionLimit {
                            response_already_written: outcome.produced_token,
                        });
                    }
                    attempt += 1;
                    outcome.reconnect_attempts = attempt;
                    drop_include_only = true;
                    tokio::time::sleep(self.backoff(attempt)).await;
                    continue;
                }
                Err(TurnReadError::PolicyViolation) => {
                    scheduler.report_result(&req.account.id, false, None, Some(&req.body.model));
                    tracing::error!(account_id = %req.account.id, "upstream closed for policy violation");
                    return Err(GatewayError::WsPolicyViolation {
                        response_already_written: outcome.produced_token,
                    });
                }
                Err(TurnReadError::RateLimited) => {
                    scheduler.report_result(&req.account.id, false, None, Some(&req.body.model));
                    return Err(GatewayError::UpstreamRateLimited {
                        response_already_written: outcome.produced_token,
                    });
                }
                Err(TurnReadError::InvalidRequest) => {
                    scheduler.report_result(&req.account.id, false, None, Some(&req.body.model));
                    return Err(GatewayError::UpstreamInvalidRequest {
                        response_already_written: outcome.produced_token,
                    });
                }
                Err(TurnReadError::Transport(e)) => {
                    let is_read_timeout = matches!(e, TransportError::IdleTimeout);
                    if outcome.produced_token {
                        scheduler.report_result(&req.account.id, false, None, Some(&req.body.model));
                        tracing::error!(account_id = %req.account.id, error = %e, "transport closed after a token was already produced");
                        return Err(if is_read_timeout {
                            GatewayError::WsReadTimeout {
                                response_already_written: true,
                            }
                        } else {
                            GatewayError::WsTransportClosed {
                                response_already_written: true,
                            }
                        });
                    }
                    if attempt >= retry_limit {
                        scheduler.report_result(&req.account.id, false, None, Some(&req.body.model));
                        tracing::error!(account_id = %req.account.id, error = %e, "reconnect attempts exhausted");
                        return Err(if is_read_timeout {
                            GatewayError::WsReadTimeout {
                                response_already_written: false,
                            }
                        } else {
                            GatewayError::Transport(e)
                        });
                    }
                    attempt += 1;
                    outcome.reconnect_attempts = attempt;
                    drop_include_only = true;
                    tokio::time::sleep(self.backoff(attempt)).await;
                    continue;
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        // Jitter unit folded from the attempt count — no external RNG
        // needed for a backoff delay, and it avoids every retry in a
        // batch landing on the same instant.
        let unit = ((attempt as f64 * 0.6180339887) % 1.0).abs();
        self.cfg.reconnect.backoff_for_attempt(attempt - 1, unit)
    }

    async fn read_turn(
        &self,
        lease: &mut crate::pool::Lease,
        req: &TurnRequest,
        sticky: &StickyStore,
        outcome: &mut TurnOutcome,
        sink: &mut dyn TurnSink,
    ) -> Result<(), TurnReadError> {
        let read_timeout = self.cfg.timeouts.read();
        let response_id_ttl = self.cfg.sticky.response_id_ttl();
        let mut bound_response_id = false;

        loop {
            let raw_text = lease
                .next_event(read_timeout)
                .await
                .map_err(TurnReadError::Transport)?;
            tracing::trace!(event = %raw_text, "upstream websocket event");
            let mut raw: Value = serde_json::from_str(&raw_text)
                .map_err(|e| TurnReadError::Transport(TransportError::Decode(e)))?;

            rewrite_tool_names(&mut raw);
            rewrite_model_fields(&mut raw, &req.body.model);

            let event = respgate_protocol::event::parse_event(&raw);

            if let Some(rid) = event.response_id() {
                if !bound_response_id {
                    sticky.bind_response_account(&req.group, rid, &req.account.id, response_id_ttl);
                    if let Some(conn_id) = &outcome.conn_id {
                        sticky.bind_response_conn(rid, conn_id, response_id_ttl);
                    }
                    bound_response_id = true;
                }
                outcome.response_id = Some(rid.to_string());
            }

            if matches!(event, ResponseEvent::OutputTextDelta(_)) {
                outcome.produced_token = true;
            }

            if let ResponseEvent::Error { status, message } = &event {
                tracing::warn!(status, message = message.as_deref(), "upstream returned an error event");
                return Err(classify_upstream_error(*status, message.as_deref()));
            }

            sink.on_event(&event, &raw)
                .map_err(|_| TurnReadError::Transport(TransportError::Protocol("sink rejected event".into())))?;

            if event.is_terminal() {
                outcome.usage = event.usage().copied();
                if event.is_success_terminal() {
                    if let Some(rid) = &outcome.response_id {
                        sticky.set_last_response_id(&req.account.id, rid, response_id_ttl);
                    }
                }
                return Ok(());
            }
        }
    }
}

enum TurnReadError {
    Transport(TransportError),
    PreviousResponseNotFound,
    ConnectionLimit,
    PolicyViolation,
    RateLimited,
    InvalidRequest,
}

/// `function_call_output` items in the client's `input[]`, by `call_id`.
fn extract_function_call_output_ids(input: &[Value]) -> HashSet<String> {
    input
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("function_call_output"))
        .filter_map(|item| item.get("call_id").and_then(Value::as_str))
        .map(str::to_owned)
        .collect()
}

fn classify_upstream_error(status: Option<u16>, message: Option<&str>) -> TurnReadError {
    let msg = message.unwrap_or_default();
    if msg.contains("previous_response_not_found") {
        return TurnReadError::PreviousResponseNotFound;
    }
    if msg.contains("websocket_connection_limit_reached") {
        return TurnReadError::ConnectionLimit;
    }
    match status {
        Some(429) => TurnReadError::RateLimited,
        Some(400) => TurnReadError::InvalidRequest,
        _ => TurnReadError::InvalidRequest,
    }
}

/// Rewrites upstream tool names into local canonical form, both at the
/// top level and inside `response.tool_calls[*].function.name`.
fn rewrite_tool_names(raw: &mut Value) {
    rewrite_tool_name_at(raw.get_mut("tool_calls"));
    if let Some(response) = raw.get_mut("response") {
        rewrite_tool_name_at(response.get_mut("tool_calls"));
    }
}

fn rewrite_tool_name_at(tool_calls: Option<&mut Value>) {
    let Some(Value::Array(items)) = tool_calls else {
        return;
    };
    for item in items {
        let name = item
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        if let Some(name) = name {
            if let Some(canonical) = TOOL_NAME_MAP.iter().find(|(from, _)| *from == name).map(|(_, to)| *to) {
                if let Some(func) = item.get_mut("function") {
                    func["name"] = Value::String(canonical.to_string());
                }
            }
        }
    }
}

/// Replaces `model`/`response.model` with the client's originally
/// requested model whenever the upstream account serves under a different
/// upstream model id.
fn rewrite_model_fields(raw: &mut Value, requested_model: &str) {
    if let Some(m) = raw.get("model").and_then(Value::as_str) {
        if m != requested_model {
            raw["model"] = Value::String(requested_model.to_string());
        }
    }
    if let Some(response) = raw.get_mut("response") {
        if let Some(m) = response.get("model").and_then(Value::as_str) {
            if m != requested_model {
                response["model"] = Value::String(requested_model.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rewrite_tool_names_handles_top_level_and_nested() {
        let mut raw = json!({
            "tool_calls": [{"function": {"name": "apply_patch"}}],
            "response": {"tool_calls": [{"function": {"name": "apply_patch"}}, {"function": {"name": "shell"}}]}
        });
        rewrite_tool_names(&mut raw);
        assert_eq!(raw["tool_calls"][0]["function"]["name"], "edit");
        assert_eq!(raw["response"]["tool_calls"][0]["function"]["name"], "edit");
        assert_eq!(raw["response"]["tool_calls"][1]["function"]["name"], "shell");
    }

    #[test]
    fn rewrite_model_fields_replaces_both_locations() {
        let mut raw = json!({"model": "gpt-5.1-upstream", "response": {"model": "gpt-5.1-upstream"}});
        rewrite_model_fields(&mut raw, "gpt-5.1");
        assert_eq!(raw["model"], "gpt-5.1");
        assert_eq!(raw["response"]["model"], "gpt-5.1");
    }

    #[test]
    fn rewrite_model_fields_is_noop_when_matching() {
        let mut raw = json!({"model": "gpt-5.1"});
        rewrite_model_fields(&mut raw, "gpt-5.1");
        assert_eq!(raw["model"], "gpt-5.1");
    }

    #[test]
    fn function_call_continuity_allows_exact_match() {
        let cfg = Arc::new(GatewayConfig::default());
        let fwd = Forwarder::new(cfg);
        let req = sample_request();
        let supplied: HashSet<String> = ["call_1".to_string()].into_iter().collect();
        assert!(fwd.check_function_call_continuity(&req, &supplied).is_ok());
    }

    #[test]
    fn function_call_continuity_rejects_mismatch() {
        let cfg = Arc::new(GatewayConfig::default());
        let fwd = Forwarder::new(cfg);
        let req = sample_request();
        let supplied: HashSet<String> = ["call_other".to_string()].into_iter().collect();
        assert!(fwd.check_function_call_continuity(&req, &supplied).is_err());
    }

    fn sample_request() -> TurnRequest {
        TurnRequest {
            account: Account {
                id: "acct_1".into(),
                platform: crate::account::Platform::OpenAi,
                kind: AccountKind::ApiKey,
                concurrency: 4,
                priority: 0,
                schedulable: true,
                model_whitelist: None,
                model_mapping: Default::default(),
                supports_ws: true,
                store_recovery_allowed: false,
            },
            group: "g1".into(),
            session_hash: Some("s1".into()),
            legacy_session_hash: None,
            session_scope: "scope1".into(),
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
            ws_url: Url::parse("wss://example.invalid/v1/responses").unwrap(),
            session_id_header: None,
            conversation_id_header: None,
            turn_metadata_header: None,
            pending_call_ids: ["call_1".to_string()].into_iter().collect(),
            allow_empty_tool_output_synthesis: false,
            required_transport: RequestedTransport::Auto,
            force_http: false,
            client_is_websocket: true,
        }
    }
}
