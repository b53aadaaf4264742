use serde::Serialize;

use leadflow_core::domain::conversation::ConversationId;
use leadflow_core::domain::lead::Lead;

use super::lead_snapshot;
use crate::prompts::PromptLibrary;
use crate::runtime::{AgentRuntime, DecisionSource};
use crate::tools::{AgentRole, ToolRegistry};

pub const FAILED_CONTACT_METHOD: &str = "failed";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContactOutcome {
    pub success: bool,
    pub message: String,
    pub contact_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DecisionSource>,
}

#[derive(Clone)]
pub struct OutboundContactAgent {
    runtime: AgentRuntime,
    prompts: PromptLibrary,
    registry: ToolRegistry,
}

impl OutboundContactAgent {
    pub fn new(runtime: AgentRuntime, prompts: PromptLibrary) -> Self {
        Self { runtime, prompts, registry: ToolRegistry::for_role(AgentRole::OutboundContact) }
    }

    pub async fn run(
        &self,
        lead: &Lead,
        conversation_id: &ConversationId,
        correlation_id: &str,
    ) -> ContactOutcome {
        let prompt = self.prompts.system_prompt(AgentRole::OutboundContact);
        let context = lead_snapshot(lead, Some(conversation_id));

        match self.runtime.run(&prompt, &context, &self.registry, correlation_id).await {
            Ok(result) => {
                let contact_method =
                    result.extra_str("contact_method").unwrap_or("email").to_string();
                let message = match (result.reason.trim().is_empty(), result.decision) {
                    (false, _) => result.reason.clone(),
                    (true, true) => "outreach sent".to_string(),
                    (true, false) => "outreach not confirmed".to_string(),
                };
                ContactOutcome {
                    success: result.decision,
                    message,
                    contact_method,
                    error: None,
                    source: Some(result.source),
                }
            }
            Err(error) => ContactOutcome {
                success: false,
                message: "error contacting lead".to_string(),
                contact_method: FAILED_CONTACT_METHOD.to_string(),
                error: Some(error.to_string()),
                source: None,
            },
        }
    }
}
