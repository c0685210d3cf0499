use serde::Deserialize;
use serde_json::Value;

/// Decoded server→client event. `Unknown` is preserved (raw) rather than
/// dropped, since the forwarder streams raw bytes to the client and only
/// rewrites targeted fields — it must not lose events this crate doesn't
/// model explicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    Created { response_id: Option<String> },
    InProgress,
    OutputTextDelta(String),
    OutputItemAdded,
    OutputItemDone,
    Completed {
        response_id: Option<String>,
        usage: Option<TokenUsage>,
    },
    Done {
        response_id: Option<String>,
        usage: Option<TokenUsage>,
    },
    Failed {
        response_id: Option<String>,
    },
    Incomplete {
        response_id: Option<String>,
    },
    Cancelled {
        response_id: Option<String>,
    },
    Error {
        status: Option<u16>,
        message: Option<String>,
    },
    Unknown(Value),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
}

impl ResponseEvent {
    /// Terminal events close out a turn: the forwarder stops reading after
    /// one of these and the scheduler may be reported to.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResponseEvent::Completed { .. }
                | ResponseEvent::Done { .. }
                | ResponseEvent::Failed { .. }
                | ResponseEvent::Incomplete { .. }
                | ResponseEvent::Cancelled { .. }
        )
    }

    /// Only `response.completed`/`response.done` persist `lastResponseID`.
    pub fn is_success_terminal(&self) -> bool {
        matches!(self, ResponseEvent::Completed { .. } | ResponseEvent::Done { .. })
    }

    pub fn response_id(&self) -> Option<&str> {
        match self {
            ResponseEvent::Created { response_id }
            | ResponseEvent::Completed { response_id, .. }
            | ResponseEvent::Done { response_id, .. }
            | ResponseEvent::Failed { response_id }
            | ResponseEvent::Incomplete { response_id }
            | ResponseEvent::Cancelled { response_id } => response_id.as_deref(),
            _ => None,
        }
    }

    pub fn usage(&self) -> Option<&TokenUsage> {
        match self {
            ResponseEvent::Completed { usage, .. } | ResponseEvent::Done { usage, .. } => {
                usage.as_ref()
            }
            _ => None,
        }
    }
}

/// Parses one wire frame. Reads only `type`, `response.id`, and
/// `response.usage` eagerly; everything else stays inside the retained
/// `Value` for `Unknown`, and callers doing field-level rewrites (model,
/// tool_calls[*].function.name) operate on the original text, not this
/// enum — this function exists to route and to extract the handful of
/// fields the scheduler/pool care about without building a typed struct
/// per delta.
pub fn parse_event(raw: &Value) -> ResponseEvent {
    let ty = raw.get("type").and_then(Value::as_str).unwrap_or("");
    let response = raw.get("response");
    let response_id = response
        .and_then(|r| r.get("id"))
        .and_then(Value::as_str)
        .map(str::to_owned);
    let usage = response
        .and_then(|r| r.get("usage"))
        .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());

    match ty {
        "response.created" => ResponseEvent::Created { response_id },
        "response.in_progress" => ResponseEvent::InProgress,
        "response.output_text.delta" => ResponseEvent::OutputTextDelta(
            raw.get("delta").and_then(Value::as_str).unwrap_or("").to_owned(),
        ),
        "response.output_item.added" => ResponseEvent::OutputItemAdded,
        "response.output_item.done" => ResponseEvent::OutputItemDone,
        "response.completed" => ResponseEvent::Completed { response_id, usage },
        "response.done" => ResponseEvent::Done { response_id, usage },
        "response.failed" => ResponseEvent::Failed { response_id },
        "response.incomplete" => ResponseEvent::Incomplete { response_id },
        "response.cancelled" => ResponseEvent::Cancelled { response_id },
        "error" => ResponseEvent::Error {
            status: raw.get("status").and_then(Value::as_u64).map(|v| v as u16),
            message: raw
                .get("message")
                .or_else(|| raw.get("error").and_then(|e| e.get("message")))
                .and_then(Value::as_str)
                .map(str::to_owned),
        },
        _ => ResponseEvent::Unknown(raw.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_completed_with_usage() {
        let raw = json!({
            "type": "response.completed",
            "response": {"id": "resp_1", "usage": {"input_tokens": 3, "output_tokens": 5, "cached_tokens": 0}}
        });
        let ev = parse_event(&raw);
        assert!(ev.is_terminal());
        assert!(ev.is_success_terminal());
        assert_eq!(ev.response_id(), Some("resp_1"));
        assert_eq!(ev.usage().unwrap().output_tokens, 5);
    }

    #[test]
    fn unknown_type_preserves_raw() {
        let raw = json!({"type": "response.queued"});
        match parse_event(&raw) {
            ResponseEvent::Unknown(v) => assert_eq!(v["type"], "response.queued"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn wrapped_error_event_maps_status() {
        let raw = json!({"type": "error", "status": 429, "message": "rate limited"});
        match parse_event(&raw) {
            ResponseEvent::Error { status, message } => {
                assert_eq!(status, Some(429));
                assert_eq!(message.as_deref(), Some("rate limited"));
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }
}
