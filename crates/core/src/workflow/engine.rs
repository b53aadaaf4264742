use chrono::Utc;
use thiserror::Error;

use crate::audit::{AuditContext, AuditEvent, AuditEventKind, AuditSink};
use crate::workflow::states::{WorkflowState, WorkflowTransition};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowTransitionError {
    #[error("invalid workflow transition from {from} to {to}")]
    InvalidTransition { from: WorkflowState, to: WorkflowState },
}

/// Tracks one workflow run's position in the state machine and the path it took.
#[derive(Clone, Debug)]
pub struct WorkflowTrace {
    current: WorkflowState,
    transitions: Vec<WorkflowTransition>,
}

impl Default for WorkflowTrace {
    fn default() -> Self {
        Self { current: WorkflowState::Start, transitions: Vec::new() }
    }
}

impl WorkflowTrace {
    pub fn current(&self) -> WorkflowState {
        self.current
    }

    pub fn transitions(&self) -> &[WorkflowTransition] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<WorkflowTransition> {
        self.transitions
    }

    pub fn advance(
        &mut self,
        next: WorkflowState,
    ) -> Result<WorkflowTransition, WorkflowTransitionError> {
        if !self.current.can_transition_to(next) {
            return Err(WorkflowTransitionError::InvalidTransition { from: self.current, to: next });
        }

        let transition = WorkflowTransition { from: self.current, to: next, at: Utc::now() };
        self.current = next;
        self.transitions.push(transition.clone());
        Ok(transition)
    }

    pub fn advance_with_audit<S>(
        &mut self,
        next: WorkflowState,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<WorkflowTransition, WorkflowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let from = self.current;
        let result = self.advance(next);
        let kind = match &result {
            Ok(transition) => {
                AuditEventKind::StageEntered { from: transition.from, to: transition.to }
            }
            Err(error) => {
                AuditEventKind::StageRejected { from, to: next, reason: error.to_string() }
            }
        };
        sink.emit(AuditEvent::new(audit, kind));
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, AuditEventKind, InMemoryAuditSink};
    use crate::workflow::states::WorkflowState;

    use super::{WorkflowTrace, WorkflowTransitionError};

    #[test]
    fn trace_records_each_applied_transition() {
        let mut trace = WorkflowTrace::default();
        trace.advance(WorkflowState::Lookup).expect("start -> lookup");
        trace.advance(WorkflowState::New).expect("lookup -> new");

        assert_eq!(trace.current(), WorkflowState::New);
        assert_eq!(trace.transitions().len(), 2);
        assert_eq!(trace.transitions()[1].from, WorkflowState::Lookup);
    }

    #[test]
    fn rejected_transition_leaves_state_untouched_and_is_audited() {
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(None, "run-1", "workflow-orchestrator");
        let mut trace = WorkflowTrace::default();

        let error = trace
            .advance_with_audit(WorkflowState::Scheduled, &sink, &audit)
            .expect_err("start -> scheduled must fail");

        assert_eq!(
            error,
            WorkflowTransitionError::InvalidTransition {
                from: WorkflowState::Start,
                to: WorkflowState::Scheduled
            }
        );
        assert_eq!(trace.current(), WorkflowState::Start);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_rejection());
        assert!(matches!(
            events[0].kind,
            AuditEventKind::StageRejected { to: WorkflowState::Scheduled, .. }
        ));
        assert_eq!(events[0].kind.name(), "workflow.stage_rejected");
    }
}
