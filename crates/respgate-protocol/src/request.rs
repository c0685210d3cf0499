use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

/// The inbound shape the gateway accepts at `/v1/responses`, already
/// validated and deserialized by the ingress layer. The forwarder builds
/// the upstream wire request from this plus account-specific rewrites.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResponsesApiRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<Value>,
    pub tools: Vec<Value>,
    pub tool_choice: String,
    pub parallel_tool_calls: bool,
    pub reasoning: Option<Reasoning>,
    pub store: bool,
    pub stream: bool,
    pub include: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextControls>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct Reasoning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Serialize, Default, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TextFormatType {
    #[default]
    JsonSchema,
}

#[derive(Debug, Serialize, Default, Clone, PartialEq)]
pub struct TextFormat {
    pub r#type: TextFormatType,
    pub strict: bool,
    pub schema: Value,
    pub name: String,
}

#[derive(Debug, Serialize, Default, Clone, PartialEq)]
pub struct TextControls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<TextFormat>,
}

/// `response.create` frame written on a fresh WSv2 turn.
#[derive(Debug, Serialize, Clone)]
pub struct ResponseCreateWsRequest {
    pub model: String,
    pub instructions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    pub input: Vec<Value>,
    pub tools: Vec<Value>,
    pub tool_choice: String,
    pub parallel_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    pub store: bool,
    pub stream: bool,
    pub include: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextControls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_metadata: Option<HashMap<String, String>>,
    /// Prewarm priming request: the socket is dialed and a `generate=false`
    /// frame is sent before the real turn to absorb dial latency.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate: Option<bool>,
}

impl From<&ResponsesApiRequest> for ResponseCreateWsRequest {
    fn from(r: &ResponsesApiRequest) -> Self {
        Self {
            model: r.model.clone(),
            instructions: r.instructions.clone(),
            previous_response_id: r.previous_response_id.clone(),
            input: r.input.clone(),
            tools: r.tools.clone(),
            tool_choice: r.tool_choice.clone(),
            parallel_tool_calls: r.parallel_tool_calls,
            reasoning: r.reasoning.clone(),
            store: r.store,
            stream: r.stream,
            include: r.include.clone(),
            prompt_cache_key: r.prompt_cache_key.clone(),
            text: r.text.clone(),
            client_metadata: None,
            generate: None,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type")]
pub enum ResponsesWsRequest {
    #[serde(rename = "response.create")]
    ResponseCreate(ResponseCreateWsRequest),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_create_serializes_tagged() {
        let req = ResponsesWsRequest::ResponseCreate(ResponseCreateWsRequest {
            model: "gpt-5.1".into(),
            instructions: String::new(),
            previous_response_id: None,
            input: vec![],
            tools: vec![],
            tool_choice: "auto".into(),
            parallel_tool_calls: true,
            reasoning: None,
            store: false,
            stream: true,
            include: vec![],
            prompt_cache_key: None,
            text: None,
            client_metadata: None,
            generate: None,
        });
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["type"], "response.create");
        assert_eq!(v["model"], "gpt-5.1");
        assert!(v.get("previous_response_id").is_none());
    }
}
