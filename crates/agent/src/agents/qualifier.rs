use serde::Serialize;

use leadflow_core::domain::lead::Lead;

use super::lead_snapshot;
use crate::prompts::PromptLibrary;
use crate::runtime::{AgentRuntime, DecisionSource};
use crate::tools::{AgentRole, ToolRegistry};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QualificationOutcome {
    pub qualified: bool,
    pub reason: String,
    /// `None` when the reasoning service failed.
    pub source: Option<DecisionSource>,
}

#[derive(Clone)]
pub struct QualifierAgent {
    runtime: AgentRuntime,
    prompts: PromptLibrary,
    registry: ToolRegistry,
}

impl QualifierAgent {
    pub fn new(runtime: AgentRuntime, prompts: PromptLibrary) -> Self {
        Self { runtime, prompts, registry: ToolRegistry::for_role(AgentRole::Qualifier) }
    }

    pub async fn run(&self, lead: &Lead, correlation_id: &str) -> QualificationOutcome {
        let prompt = self.prompts.system_prompt(AgentRole::Qualifier);
        let context = lead_snapshot(lead, None);

        match self.runtime.run(&prompt, &context, &self.registry, correlation_id).await {
            Ok(result) => {
                let reason = if result.reason.trim().is_empty() {
                    if result.decision {
                        "qualified by agent".to_string()
                    } else {
                        "not qualified by agent".to_string()
                    }
                } else {
                    result.reason
                };
                QualificationOutcome {
                    qualified: result.decision,
                    reason,
                    source: Some(result.source),
                }
            }
            Err(error) => QualificationOutcome {
                qualified: false,
                reason: format!("error during qualification: {error}"),
                source: None,
            },
        }
    }
}
