use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use leadflow_core::config::AppConfig;

use crate::conversation::{ChatMessage, ChatRole};
use crate::tools::ToolSpec;

/// An action proposed by the reasoning service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self { call_id: call_id.into(), name: name.into(), arguments }
    }
}

/// One reasoning-service response. No proposed actions means the service is done.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub proposed_actions: Vec<ToolCall>,
    pub final_text: String,
}

impl Completion {
    pub fn text(final_text: impl Into<String>) -> Self {
        Self { proposed_actions: Vec::new(), final_text: final_text.into() }
    }

    pub fn actions(proposed_actions: Vec<ToolCall>) -> Self {
        Self { proposed_actions, final_text: String::new() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ServiceCallError {
    #[error("reasoning service transport error: {0}")]
    Transport(String),
    #[error("reasoning service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("reasoning service returned a malformed response: {0}")]
    MalformedResponse(String),
    #[error("reasoning service timed out after {0}s")]
    Timeout(u64),
    #[error("scripted reasoning service: {0}")]
    Script(String),
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(
        &self,
        conversation: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<Completion, ServiceCallError>;
}

/// Client for any endpoint speaking the OpenAI chat-completions tool-calling protocol.
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    timeout_secs: u64,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout_secs: u64,
    ) -> Result<Self, ServiceCallError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| ServiceCallError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            timeout_secs,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceCallError> {
        Self::new(
            config.llm_base_url(),
            config.llm.model.clone(),
            config.llm.api_key.clone(),
            config.llm.timeout_secs,
        )
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn map_transport(&self, error: reqwest::Error) -> ServiceCallError {
        if error.is_timeout() {
            ServiceCallError::Timeout(self.timeout_secs)
        } else {
            ServiceCallError::Transport(error.to_string())
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionSpec<'a>,
}

#[derive(Serialize)]
struct WireFunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

fn to_wire(message: &ChatMessage) -> WireMessage<'_> {
    WireMessage {
        role: message.role.as_str(),
        content: &message.content,
        tool_calls: message
            .tool_calls
            .iter()
            .map(|call| WireToolCall {
                id: call.call_id.clone(),
                kind: function_kind(),
                function: WireFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect(),
        tool_call_id: match message.role {
            ChatRole::Tool => message.tool_call_id.as_deref(),
            _ => None,
        },
    }
}

/// Arguments arrive as a JSON-encoded string. Anything unparseable is kept as a
/// raw string so the executor can report it back to the model.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn from_wire(response: ChatResponse) -> Result<Completion, ServiceCallError> {
    let choice = response.choices.into_iter().next().ok_or_else(|| {
        ServiceCallError::MalformedResponse("response contained no choices".to_string())
    })?;

    let proposed_actions = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            call_id: call.id,
            arguments: parse_arguments(&call.function.arguments),
            name: call.function.name,
        })
        .collect();

    Ok(Completion { proposed_actions, final_text: choice.message.content.unwrap_or_default() })
}

#[async_trait]
impl ReasoningService for OpenAiCompatibleClient {
    async fn complete(
        &self,
        conversation: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<Completion, ServiceCallError> {
        let request = ChatRequest {
            model: &self.model,
            messages: conversation.iter().map(to_wire).collect(),
            tools: tools
                .iter()
                .map(|tool| WireTool {
                    kind: "function",
                    function: WireFunctionSpec {
                        name: tool.name,
                        description: tool.description,
                        parameters: &tool.parameters,
                    },
                })
                .collect(),
            tool_choice: (!tools.is_empty()).then_some("auto"),
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| self.map_transport(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceCallError::Status { status: status.as_u16(), body });
        }

        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ServiceCallError::MalformedResponse(e.to_string()))?;
        from_wire(parsed)
    }
}

type Responder = Box<dyn Fn(&[ChatMessage]) -> Completion + Send + Sync>;

enum ScriptStep {
    Reply(Completion),
    Fail(ServiceCallError),
    Dynamic(Responder),
}

/// Replays a fixed sequence of responses, one per call.
///
/// Steps are consumed in order; once the script is exhausted the fallback reply
/// is repeated if one was set, otherwise the call fails.
#[derive(Default)]
pub struct ScriptedReasoningService {
    steps: Mutex<VecDeque<ScriptStep>>,
    fallback: Option<Completion>,
    calls: AtomicUsize,
}

impl ScriptedReasoningService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_reply(self, completion: Completion) -> Self {
        self.push(ScriptStep::Reply(completion))
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.then_reply(Completion::text(text))
    }

    pub fn then_actions(self, actions: Vec<ToolCall>) -> Self {
        self.then_reply(Completion::actions(actions))
    }

    pub fn then_fail(self, error: ServiceCallError) -> Self {
        self.push(ScriptStep::Fail(error))
    }

    /// Builds the reply from the conversation seen at call time.
    pub fn then_with<F>(self, responder: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Completion + Send + Sync + 'static,
    {
        self.push(ScriptStep::Dynamic(Box::new(responder)))
    }

    pub fn repeat_forever(mut self, completion: Completion) -> Self {
        self.fallback = Some(completion);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        match self.steps.lock() {
            Ok(steps) => steps.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn push(self, step: ScriptStep) -> Self {
        match self.steps.lock() {
            Ok(mut steps) => steps.push_back(step),
            Err(poisoned) => poisoned.into_inner().push_back(step),
        }
        self
    }

    fn next_step(&self) -> Option<ScriptStep> {
        match self.steps.lock() {
            Ok(mut steps) => steps.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoningService {
    async fn complete(
        &self,
        conversation: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<Completion, ServiceCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Some(ScriptStep::Reply(completion)) => Ok(completion),
            Some(ScriptStep::Fail(error)) => Err(error),
            Some(ScriptStep::Dynamic(responder)) => Ok(responder(conversation)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ServiceCallError::Script("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        from_wire, parse_arguments, ChatResponse, Completion, ReasoningService,
        ScriptedReasoningService, ServiceCallError, ToolCall,
    };

    #[test]
    fn wire_response_with_tool_calls_is_decoded() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_lead", "arguments": "{\"lead_id\":\"lead-7\"}"}
                    }]
                }
            }]
        }))
        .expect("decode");

        let completion = from_wire(response).expect("completion");
        assert_eq!(
            completion.proposed_actions,
            vec![ToolCall::new("call_1", "get_lead", json!({"lead_id": "lead-7"}))]
        );
        assert!(completion.final_text.is_empty());
    }

    #[test]
    fn empty_choices_is_malformed() {
        let response: ChatResponse =
            serde_json::from_value(json!({"choices": []})).expect("decode");
        assert!(matches!(from_wire(response), Err(ServiceCallError::MalformedResponse(_))));
    }

    #[test]
    fn unparseable_arguments_are_kept_verbatim() {
        assert_eq!(parse_arguments("{not json"), json!("{not json"));
        assert_eq!(parse_arguments("  "), json!({}));
    }

    #[tokio::test]
    async fn scripted_service_replays_in_order_then_fails() {
        let service = ScriptedReasoningService::new()
            .then_text("first")
            .then_fail(ServiceCallError::Timeout(30));

        let first = service.complete(&[], &[]).await.expect("first reply");
        assert_eq!(first, Completion::text("first"));
        assert_eq!(service.complete(&[], &[]).await, Err(ServiceCallError::Timeout(30)));
        assert!(matches!(service.complete(&[], &[]).await, Err(ServiceCallError::Script(_))));
        assert_eq!(service.calls(), 3);
    }
}
