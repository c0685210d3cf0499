use thiserror::Error;

/// The typed error kinds exposed upward from the core. Each carries
/// whether any byte of the client response has already been flushed —
/// once true, the ingress layer must never attempt a different upstream
/// or write a second body.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("upstream requires a websocket upgrade")]
    WsUpgradeRequired { response_already_written: bool },

    #[error("upstream closed the connection for a policy violation")]
    WsPolicyViolation { response_already_written: bool },

    #[error("upstream rejected authentication")]
    WsAuth { response_already_written: bool },

    #[error("upstream websocket transport unavailable")]
    WsUnavailable { response_already_written: bool },

    #[error("upstream connection limit reached")]
    WsConnectionLimit { response_already_written: bool },

    #[error("previous_response_id not found upstream")]
    WsPreviousResponseNotFound { response_already_written: bool },

    #[error("upstream websocket transport closed")]
    WsTransportClosed { response_already_written: bool },

    #[error("timed out waiting for an upstream read")]
    WsReadTimeout { response_already_written: bool },

    #[error("upstream rate limited the request")]
    UpstreamRateLimited { response_already_written: bool },

    #[error("upstream rejected the request as invalid")]
    UpstreamInvalidRequest { response_already_written: bool },

    #[error("no schedulable account candidates")]
    SchedulerNoCandidates,

    #[error("selected account's backend is unavailable")]
    SchedulerBackendUnavailable { response_already_written: bool },

    #[error("client input was missing required tool outputs")]
    MissingToolOutputs { response_already_written: bool },

    #[error(transparent)]
    Transport(#[from] respgate_transport::TransportError),
}

impl GatewayError {
    pub fn response_already_written(&self) -> bool {
        match self {
            GatewayError::WsUpgradeRequired { response_already_written }
            | GatewayError::WsPolicyViolation { response_already_written }
            | GatewayError::WsAuth { response_already_written }
            | GatewayError::WsUnavailable { response_already_written }
            | GatewayError::WsConnectionLimit { response_already_written }
            | GatewayError::WsPreviousResponseNotFound { response_already_written }
            | GatewayError::WsTransportClosed { response_already_written }
            | GatewayError::WsReadTimeout { response_already_written }
            | GatewayError::UpstreamRateLimited { response_already_written }
            | GatewayError::UpstreamInvalidRequest { response_already_written }
            | GatewayError::SchedulerBackendUnavailable { response_already_written }
            | GatewayError::MissingToolOutputs { response_already_written } => {
                *response_already_written
            }
            GatewayError::SchedulerNoCandidates => false,
            // A transport error surfaces before any partial write unless the
            // forwarder has already streamed a token, in which case it maps
            // this into WsTransportClosed with the flag set instead.
            GatewayError::Transport(_) => false,
        }
    }

    /// Mapped HTTP status for errors the ingress layer surfaces directly
    /// (recoverable kinds are handled internally and never reach here).
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::WsUpgradeRequired { .. } => 426,
            GatewayError::WsAuth { .. } => 401,
            GatewayError::WsPolicyViolation { .. } => 400,
            GatewayError::WsPreviousResponseNotFound { .. } => 400,
            GatewayError::UpstreamInvalidRequest { .. } => 400,
            GatewayError::UpstreamRateLimited { .. } => 429,
            GatewayError::MissingToolOutputs { .. } => 400,
            GatewayError::SchedulerNoCandidates
            | GatewayError::SchedulerBackendUnavailable { .. } => 502,
            GatewayError::WsUnavailable { .. }
            | GatewayError::WsConnectionLimit { .. }
            | GatewayError::WsTransportClosed { .. }
            | GatewayError::WsReadTimeout { .. }
            | GatewayError::Transport(_) => 502,
        }
    }
}
