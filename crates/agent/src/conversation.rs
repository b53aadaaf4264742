use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ToolCall;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into(), tool_calls, tool_call_id: None }
    }

    pub fn tool_result(call_id: impl Into<String>, output: &Value) -> Self {
        Self {
            role: ChatRole::Tool,
            content: output.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Ordered message log for one agent run.
///
/// Every assistant turn that proposes actions is followed by exactly one tool
/// message per proposed action, in proposal order.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new(system_prompt: &str, user_context: &Value) -> Self {
        Self {
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_context.to_string()),
            ],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push_actions(&mut self, text: &str, actions: Vec<ToolCall>) {
        self.messages.push(ChatMessage::assistant_tool_calls(text, actions));
    }

    pub fn push_result(&mut self, call_id: &str, output: &Value) {
        self.messages.push(ChatMessage::tool_result(call_id, output));
    }
}

/// Parses the JSON context carried by the first user turn of a transcript.
pub fn user_context(messages: &[ChatMessage]) -> Option<Value> {
    messages
        .iter()
        .find(|message| message.role == ChatRole::User)
        .and_then(|message| serde_json::from_str(&message.content).ok())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{user_context, ChatRole, Transcript};
    use crate::llm::ToolCall;

    #[test]
    fn transcript_starts_with_system_and_user_turns() {
        let transcript = Transcript::new("be terse", &json!({"lead_id": "lead-1"}));

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].role, ChatRole::System);
        assert_eq!(user_context(transcript.messages()), Some(json!({"lead_id": "lead-1"})));
    }

    #[test]
    fn tool_results_reference_their_call_ids() {
        let mut transcript = Transcript::new("prompt", &json!({}));
        transcript.push_actions(
            "",
            vec![ToolCall::new("call-1", "get_lead", json!({"lead_id": "lead-1"}))],
        );
        transcript.push_result("call-1", &json!({"error": "boom"}));

        let last = &transcript.messages()[3];
        assert_eq!(last.role, ChatRole::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(last.content, r#"{"error":"boom"}"#);
    }
}
