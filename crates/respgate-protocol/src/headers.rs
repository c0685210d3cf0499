use http::{HeaderMap, HeaderName, HeaderValue};

use crate::auth::Credential;

pub static X_TURN_METADATA_HEADER: HeaderName = HeaderName::from_static("x-codex-turn-metadata");
pub static X_TURN_STATE_HEADER: HeaderName = HeaderName::from_static("x-codex-turn-state");
pub static SESSION_ID_HEADER: HeaderName = HeaderName::from_static("session_id");
pub static CONVERSATION_ID_HEADER: HeaderName = HeaderName::from_static("conversation_id");
pub static OPENAI_BETA_HEADER: HeaderName = HeaderName::from_static("openai-beta");
pub static OPENAI_BETA_VALUE: &str = "responses=experimental";

/// Inputs for a WSv2 handshake, already resolved by the caller.
pub struct HandshakeContext<'a> {
    pub credential: &'a Credential,
    pub session_id: Option<&'a str>,
    pub conversation_id: Option<&'a str>,
    pub turn_metadata: Option<&'a str>,
    /// Present only on reconnect — echoes the upstream's last `x-codex-turn-state`.
    pub turn_state: Option<&'a str>,
    /// Extra headers from the client/account that take precedence over the
    /// defaults this function fills in, but never override auth/beta.
    pub extra: &'a [(HeaderName, HeaderValue)],
}

/// Builds WS handshake headers. Precedence (lowest to highest): default
/// fill-ins this function computes, then `extra`, then the non-negotiable
/// auth/beta headers which always win.
pub fn build_handshake_headers(ctx: &HandshakeContext<'_>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(sid) = ctx.session_id {
        if let Ok(v) = HeaderValue::from_str(sid) {
            headers.insert(SESSION_ID_HEADER.clone(), v);
        }
    }
    if let Some(cid) = ctx.conversation_id {
        if let Ok(v) = HeaderValue::from_str(cid) {
            headers.insert(CONVERSATION_ID_HEADER.clone(), v);
        }
    }
    if let Some(meta) = ctx.turn_metadata {
        if let Ok(v) = HeaderValue::from_str(meta) {
            headers.insert(X_TURN_METADATA_HEADER.clone(), v);
        }
    }
    if let Some(state) = ctx.turn_state {
        if let Ok(v) = HeaderValue::from_str(state) {
            headers.insert(X_TURN_STATE_HEADER.clone(), v);
        }
    }

    for (name, value) in ctx.extra {
        headers.insert(name.clone(), value.clone());
    }

    headers.insert(
        OPENAI_BETA_HEADER.clone(),
        HeaderValue::from_static(OPENAI_BETA_VALUE),
    );
    let bearer = format!("Bearer {}", ctx.credential.bearer_value());
    if let Ok(v) = HeaderValue::from_str(&bearer) {
        headers.insert(http::header::AUTHORIZATION, v);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_overrides_default_but_not_auth() {
        let cred = Credential::ApiKey("sk-test".into());
        let extra = vec![(
            SESSION_ID_HEADER.clone(),
            HeaderValue::from_static("from-extra"),
        )];
        let ctx = HandshakeContext {
            credential: &cred,
            session_id: Some("from-default"),
            conversation_id: None,
            turn_metadata: None,
            turn_state: None,
            extra: &extra,
        };
        let headers = build_handshake_headers(&ctx);
        assert_eq!(headers.get(&SESSION_ID_HEADER).unwrap(), "from-extra");
        assert_eq!(headers.get(&OPENAI_BETA_HEADER).unwrap(), OPENAI_BETA_VALUE);
        assert_eq!(
            headers.get(http::header::AUTHORIZATION).unwrap(),
            "Bearer sk-test"
        );
    }
}
