use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use http::{HeaderMap, Response};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::TransportError;

/// Response headers the forwarder cares about, lifted out of the upgrade
/// response at connect time (e.g. `x-codex-turn-state`, `openai-model`).
pub type ResponseHeaders = HashMap<String, String>;

enum WsCommand {
    Send(String, oneshot::Sender<Result<(), TransportError>>),
    Ping(oneshot::Sender<Result<(), TransportError>>),
    Close,
}

/// One live upstream WebSocket, owned by a background pump task. Mirrors
/// the connection-pool texture: the socket itself is never touched from
/// more than one task, all I/O goes through channels, and `Drop` tears the
/// pump down so a leaked handle can't wedge the pool.
pub struct WsStream {
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    event_rx: mpsc::Receiver<Result<String, TransportError>>,
    pump: Option<JoinHandle<()>>,
    pub response_headers: ResponseHeaders,
}

impl WsStream {
    pub async fn connect(
        url: &Url,
        headers: &HeaderMap,
        idle_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        request.headers_mut().extend(headers.clone());

        let (ws, upgrade_response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(TransportError::from)?;

        let response_headers = extract_response_headers(&upgrade_response);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);
        let pump = tokio::spawn(run_pump(ws, cmd_rx, event_tx, idle_timeout));

        Ok(Self {
            cmd_tx,
            event_rx,
            pump: Some(pump),
            response_headers,
        })
    }

    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Send(text, tx))
            .map_err(|_| TransportError::PumpGone)?;
        rx.await.map_err(|_| TransportError::PumpGone)?
    }

    /// Waits for the next text frame, bounded by a per-read deadline (not a
    /// whole-turn deadline — callers apply this once per `.next_event()`).
    pub async fn next_event(
        &mut self,
        read_timeout: Duration,
    ) -> Result<String, TransportError> {
        match tokio::time::timeout(read_timeout, self.event_rx.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) => Err(TransportError::ConnectionClosed),
            Err(_) => Err(TransportError::IdleTimeout),
        }
    }

    /// Sends a protocol-level Ping and waits for it to be written; does
    /// not wait for the peer's Pong (that arrives on the normal event
    /// loop and is swallowed, not surfaced as an event).
    pub async fn ping(&self) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Ping(tx))
            .map_err(|_| TransportError::PumpGone)?;
        rx.await.map_err(|_| TransportError::PumpGone)?
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

impl Drop for WsStream {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.take() {
            handle.abort();
        }
    }
}

fn extract_response_headers(resp: &Response<Option<Vec<u8>>>) -> ResponseHeaders {
    let mut out = HashMap::new();
    for (name, value) in resp.headers() {
        if let Ok(v) = value.to_str() {
            out.insert(name.as_str().to_ascii_lowercase(), v.to_owned());
        }
    }
    out
}

type WsSocket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn run_pump(
    mut ws: WsSocket,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    event_tx: mpsc::Sender<Result<String, TransportError>>,
    idle_timeout: Duration,
) {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(WsCommand::Send(text, ack)) => {
                        let result = ws.send(Message::Text(text.into())).await.map_err(TransportError::from);
                        let _ = ack.send(result);
                    }
                    Some(WsCommand::Ping(ack)) => {
                        let result = ws.send(Message::Ping(Vec::new().into())).await.map_err(TransportError::from);
                        let _ = ack.send(result);
                    }
                    Some(WsCommand::Close) | None => {
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
            frame = tokio::time::timeout(idle_timeout, ws.next()) => {
                match frame {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        if event_tx.send(Ok(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    // tokio-tungstenite answers Ping with Pong transparently
                    // at the protocol layer; Pong/Binary/Frame carry no
                    // event-stream meaning for this protocol.
                    Ok(Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)))) => {}
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        let _ = event_tx.send(Err(TransportError::ConnectionClosed)).await;
                        break;
                    }
                    Ok(Some(Err(e))) => {
                        let _ = event_tx.send(Err(TransportError::from(e))).await;
                        break;
                    }
                    Err(_elapsed) => {
                        let _ = event_tx.send(Err(TransportError::IdleTimeout)).await;
                        break;
                    }
                }
            }
        }
    }
}
