use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket dial failed: {0}")]
    Dial(#[source] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("websocket handshake rejected with status {status}")]
    Handshake { status: u16 },

    #[error("connection idle-timed-out waiting for a frame")]
    IdleTimeout,

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("websocket protocol error: {0}")]
    Protocol(String),

    #[error("frame was not valid utf8/json: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("pump task is gone")]
    PumpGone,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsErr;
        match e {
            WsErr::ConnectionClosed | WsErr::AlreadyClosed => TransportError::ConnectionClosed,
            WsErr::Http(resp) => TransportError::Handshake {
                status: resp.status().as_u16(),
            },
            other => TransportError::Dial(Box::new(other)),
        }
    }
}
