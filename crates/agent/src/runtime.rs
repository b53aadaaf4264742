use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::conversation::Transcript;
use crate::llm::{ReasoningService, ServiceCallError};
use crate::tools::{AgentRole, ToolExecutor, ToolRegistry};

pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

pub const BEST_EFFORT_REASON: &str = "best-effort decision extracted from free-form output";

const NEGATIVE_MARKERS: &[&str] = &[
    "not qualified",
    "unqualified",
    "disqualified",
    "not a good fit",
    "not a fit",
    "failed",
    "failure",
    "unable",
    "could not",
    "couldn't",
    "\"qualified\": false",
    "\"success\": false",
];

const AFFIRMATIVE_MARKERS: &[&str] = &[
    "qualified",
    "good fit",
    "strong fit",
    "success",
    "sent",
    "scheduled",
    "booked",
    "confirmed",
];

/// Where the final decision of a run came from, strongest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Structured,
    CommitAction,
    Heuristic,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentRunResult {
    pub decision: bool,
    pub reason: String,
    /// Role-specific fields beside the decision and reason, e.g. `meeting_url`.
    pub extra: Map<String, Value>,
    pub source: DecisionSource,
    /// Number of action rounds executed.
    pub iterations: u32,
    /// True when the run stopped on the iteration cap rather than on a final answer.
    pub exhausted: bool,
}

impl AgentRunResult {
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
    }
}

/// The generic tool-calling loop shared by every specialized agent.
#[derive(Clone)]
pub struct AgentRuntime {
    service: Arc<dyn ReasoningService>,
    executor: ToolExecutor,
    max_iterations: u32,
}

impl AgentRuntime {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        executor: ToolExecutor,
        max_iterations: u32,
    ) -> Self {
        Self { service, executor, max_iterations: max_iterations.max(1) }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Drives the reasoning service until it stops proposing actions or the
    /// iteration cap is hit, then extracts the role's decision.
    ///
    /// Action failures are fed back to the service. Service failures are returned.
    pub async fn run(
        &self,
        system_prompt: &str,
        user_context: &Value,
        registry: &ToolRegistry,
        correlation_id: &str,
    ) -> Result<AgentRunResult, ServiceCallError> {
        let role = registry.role();
        let commit_action = role.commit_action();
        let mut transcript = Transcript::new(system_prompt, user_context);
        let mut last_text = String::new();
        let mut committed: Option<Map<String, Value>> = None;
        let mut iterations = 0u32;
        let mut exhausted = false;

        loop {
            tracing::debug!(
                event_name = "agent.loop.iteration",
                correlation_id,
                agent_role = %role,
                iteration = iterations + 1,
                max_iterations = self.max_iterations,
                "calling reasoning service"
            );

            let response = self.service.complete(transcript.messages(), registry.specs()).await;
            let completion = match response {
                Ok(completion) => completion,
                Err(error) => {
                    tracing::error!(
                        event_name = "agent.service.failed",
                        correlation_id,
                        agent_role = %role,
                        iteration = iterations + 1,
                        error = %error,
                        "reasoning service call failed"
                    );
                    return Err(error);
                }
            };

            // Only the latest response's text counts; earlier drafts are stale.
            last_text.clone_from(&completion.final_text);
            if completion.proposed_actions.is_empty() {
                break;
            }

            let actions = completion.proposed_actions;
            transcript.push_actions(&completion.final_text, actions.clone());

            let results =
                join_all(actions.iter().map(|call| self.executor.execute(registry, call))).await;
            for result in results {
                if result.action == Some(commit_action) && !result.is_error() {
                    if let Some(decision) = decision_object(&result.output, role) {
                        committed = Some(decision);
                    }
                }
                transcript.push_result(&result.call_id, &result.output);
            }

            iterations += 1;
            if iterations >= self.max_iterations {
                exhausted = true;
                tracing::warn!(
                    event_name = "agent.loop.exhausted",
                    correlation_id,
                    agent_role = %role,
                    iterations,
                    "iteration cap reached before a final answer"
                );
                break;
            }
        }

        let result = extract_decision(role, &last_text, committed, iterations, exhausted);
        tracing::info!(
            event_name = "agent.run.completed",
            correlation_id,
            agent_role = %role,
            iterations,
            decision = result.decision,
            source = ?result.source,
            "agent run completed"
        );
        Ok(result)
    }
}

fn extract_decision(
    role: AgentRole,
    text: &str,
    committed: Option<Map<String, Value>>,
    iterations: u32,
    exhausted: bool,
) -> AgentRunResult {
    if let Some(fields) = parse_structured(text).and_then(|value| decision_object(&value, role)) {
        return from_fields(role, fields, DecisionSource::Structured, iterations, exhausted);
    }

    if let Some(fields) = committed {
        return from_fields(role, fields, DecisionSource::CommitAction, iterations, exhausted);
    }

    let mut extra = Map::new();
    if let Some(url) = first_url(text) {
        extra.insert("meeting_url".to_string(), Value::String(url));
    }
    AgentRunResult {
        decision: heuristic_decision(text),
        reason: BEST_EFFORT_REASON.to_string(),
        extra,
        source: DecisionSource::Heuristic,
        iterations,
        exhausted,
    }
}

fn from_fields(
    role: AgentRole,
    mut fields: Map<String, Value>,
    source: DecisionSource,
    iterations: u32,
    exhausted: bool,
) -> AgentRunResult {
    let decision = fields.remove(role.decision_field()).and_then(|v| v.as_bool()).unwrap_or(false);
    let reason = fields
        .get("reason")
        .or_else(|| fields.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    fields.remove("reason");
    fields.remove("recorded");

    AgentRunResult { decision, reason, extra: fields, source, iterations, exhausted }
}

/// Returns the object when it carries a boolean decision field for `role`.
fn decision_object(value: &Value, role: AgentRole) -> Option<Map<String, Value>> {
    let object = value.as_object()?;
    object.get(role.decision_field())?.as_bool()?;
    Some(object.clone())
}

/// Accepts bare JSON, fenced JSON, or JSON embedded in prose.
fn parse_structured(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let unfenced = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if let Ok(value) = serde_json::from_str::<Value>(unfenced) {
        return Some(value);
    }

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&unfenced[start..=end]).ok()
}

fn heuristic_decision(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    if NEGATIVE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return false;
    }
    AFFIRMATIVE_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn first_url(text: &str) -> Option<String> {
    text.split_whitespace()
        .find(|token| token.starts_with("http://") || token.starts_with("https://"))
        .map(|token| {
            token.trim_end_matches(|c: char| matches!(c, '.' | ',' | ')' | '"' | '\'')).to_string()
        })
}
