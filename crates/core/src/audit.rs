//! Audit trail for workflow runs: one event per attempted stage change.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::lead::LeadId;
use crate::workflow::WorkflowState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEventKind {
    StageEntered { from: WorkflowState, to: WorkflowState },
    StageRejected { from: WorkflowState, to: WorkflowState, reason: String },
}

impl AuditEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StageEntered { .. } => "workflow.stage_entered",
            Self::StageRejected { .. } => "workflow.stage_rejected",
        }
    }
}

/// Who is acting on which lead, within which run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub lead_id: Option<LeadId>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        lead_id: Option<LeadId>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { lead_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub lead_id: Option<LeadId>,
    pub correlation_id: String,
    pub actor: String,
    #[serde(flatten)]
    pub kind: AuditEventKind,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(context: &AuditContext, kind: AuditEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            lead_id: context.lead_id.clone(),
            correlation_id: context.correlation_id.clone(),
            actor: context.actor.clone(),
            kind,
            occurred_at: Utc::now(),
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self.kind, AuditEventKind::StageRejected { .. })
    }

    /// Stage the run is in once this event has been applied.
    pub fn resulting_stage(&self) -> WorkflowState {
        match self.kind {
            AuditEventKind::StageEntered { to, .. } => to,
            AuditEventKind::StageRejected { from, .. } => from,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().clone()
    }

    /// Stages entered by one run, in order.
    pub fn stages_for(&self, correlation_id: &str) -> Vec<WorkflowState> {
        self.lock()
            .iter()
            .filter(|event| event.correlation_id == correlation_id && !event.is_rejection())
            .map(AuditEvent::resulting_stage)
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditEvent>> {
        match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.lock().push(event);
    }
}

/// Forwards audit events to the tracing subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let lead_id = event.lead_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");
        match &event.kind {
            AuditEventKind::StageEntered { from, to } => tracing::info!(
                event_name = event.kind.name(),
                correlation_id = %event.correlation_id,
                lead_id,
                actor = %event.actor,
                from = %from,
                to = %to,
                "workflow stage entered"
            ),
            AuditEventKind::StageRejected { from, to, reason } => tracing::warn!(
                event_name = event.kind.name(),
                correlation_id = %event.correlation_id,
                lead_id,
                actor = %event.actor,
                from = %from,
                to = %to,
                reason = %reason,
                "workflow stage rejected"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::audit::{AuditContext, AuditEvent, AuditEventKind, AuditSink, InMemoryAuditSink};
    use crate::domain::lead::LeadId;
    use crate::workflow::WorkflowState;

    #[test]
    fn sink_reports_entered_stages_per_run() {
        let sink = InMemoryAuditSink::default();
        let run = AuditContext::new(Some(LeadId("lead-42".to_owned())), "run-1", "workflow");
        let other = AuditContext::new(None, "run-2", "workflow");

        sink.emit(AuditEvent::new(
            &run,
            AuditEventKind::StageEntered {
                from: WorkflowState::Qualifying,
                to: WorkflowState::Qualified,
            },
        ));
        sink.emit(AuditEvent::new(
            &other,
            AuditEventKind::StageEntered { from: WorkflowState::Start, to: WorkflowState::Lookup },
        ));
        sink.emit(AuditEvent::new(
            &run,
            AuditEventKind::StageRejected {
                from: WorkflowState::Qualified,
                to: WorkflowState::Scheduled,
                reason: "stages cannot be skipped".to_owned(),
            },
        ));

        assert_eq!(sink.stages_for("run-1"), vec![WorkflowState::Qualified]);
        assert_eq!(sink.stages_for("run-2"), vec![WorkflowState::Lookup]);

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(events[2].is_rejection());
        assert_eq!(events[2].resulting_stage(), WorkflowState::Qualified);
        assert_eq!(events[0].lead_id.as_ref().map(|id| id.0.as_str()), Some("lead-42"));
    }

    #[test]
    fn events_serialize_with_a_flat_kind_tag() {
        let context = AuditContext::new(None, "run-3", "workflow");
        let event = AuditEvent::new(
            &context,
            AuditEventKind::StageEntered {
                from: WorkflowState::Contacting,
                to: WorkflowState::ContactDeferred,
            },
        );

        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["kind"], json!("stage_entered"));
        assert_eq!(value["to"], json!("contact_deferred"));
        assert_eq!(value["correlation_id"], json!("run-3"));
        assert_eq!(event.kind.name(), "workflow.stage_entered");
    }
}
