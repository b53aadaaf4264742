use serde::Serialize;

use leadflow_core::config::AgentsConfig;
use leadflow_core::domain::conversation::ConversationId;
use leadflow_core::domain::lead::Lead;

use super::lead_snapshot;
use crate::prompts::PromptLibrary;
use crate::runtime::{AgentRuntime, DecisionSource};
use crate::tools::{AgentRole, ToolRegistry};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SchedulingOutcome {
    pub success: bool,
    pub meeting_url: String,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DecisionSource>,
}

/// Link and event type used whenever the agent cannot supply its own.
#[derive(Clone, Debug)]
pub struct SchedulingFallback {
    pub meeting_url: String,
    pub event_type: String,
}

impl From<&AgentsConfig> for SchedulingFallback {
    fn from(config: &AgentsConfig) -> Self {
        Self {
            meeting_url: config.fallback_meeting_url.clone(),
            event_type: config.default_event_type.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MeetingSchedulerAgent {
    runtime: AgentRuntime,
    prompts: PromptLibrary,
    registry: ToolRegistry,
    fallback: SchedulingFallback,
}

impl MeetingSchedulerAgent {
    pub fn new(
        runtime: AgentRuntime,
        prompts: PromptLibrary,
        fallback: SchedulingFallback,
    ) -> Self {
        Self {
            runtime,
            prompts,
            registry: ToolRegistry::for_role(AgentRole::MeetingScheduler),
            fallback,
        }
    }

    /// Always yields a usable meeting link, falling back to the configured one.
    pub async fn run(
        &self,
        lead: &Lead,
        conversation_id: &ConversationId,
        correlation_id: &str,
    ) -> SchedulingOutcome {
        let prompt = self.prompts.system_prompt(AgentRole::MeetingScheduler);
        let context = lead_snapshot(lead, Some(conversation_id));

        match self.runtime.run(&prompt, &context, &self.registry, correlation_id).await {
            Ok(result) => SchedulingOutcome {
                success: result.decision,
                meeting_url: result
                    .extra_str("meeting_url")
                    .unwrap_or(&self.fallback.meeting_url)
                    .to_string(),
                event_type: result
                    .extra_str("event_type")
                    .unwrap_or(&self.fallback.event_type)
                    .to_string(),
                error: None,
                source: Some(result.source),
            },
            Err(error) => SchedulingOutcome {
                success: false,
                meeting_url: self.fallback.meeting_url.clone(),
                event_type: self.fallback.event_type.clone(),
                error: Some(error.to_string()),
                source: None,
            },
        }
    }
}
