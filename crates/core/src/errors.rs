//! Error layers for the lead pipeline.
//!
//! `DomainError` is a lead or workflow rule refusing a change.
//! `ApplicationError` is how a workflow run explains why it ended in `error`.
//! `InterfaceError` is what an intake caller sees, with a correlation id.

use thiserror::Error;

use crate::{domain::lead::LeadStatus, workflow::WorkflowTransitionError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid lead transition from {from} to {to}")]
    InvalidLeadTransition { from: LeadStatus, to: LeadStatus },
    #[error("lead flag invariant violated: {0}")]
    FlagInvariant(String),
    #[error(transparent)]
    WorkflowTransition(#[from] WorkflowTransitionError),
    #[error("invalid lead payload: {0}")]
    InvalidLeadPayload(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    /// The stored lead refused the change, so repeating the same request cannot help.
    pub fn is_lead_conflict(&self) -> bool {
        matches!(self, Self::InvalidLeadTransition { .. } | Self::FlagInvariant(_))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Stable code recorded next to the message on failed runs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::InvalidLeadTransition { .. }) => "lead_transition",
            Self::Domain(DomainError::FlagInvariant(_)) => "flag_invariant",
            Self::Domain(DomainError::WorkflowTransition(_)) => "workflow_transition",
            Self::Domain(DomainError::InvalidLeadPayload(_)) => "invalid_payload",
            Self::Domain(DomainError::InvariantViolation(_)) => "invariant_violation",
            Self::Persistence(_) => "persistence",
            Self::Integration(_) => "integration",
            Self::Configuration(_) => "configuration",
        }
    }

    /// A later resubmission of the same lead may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Integration(_))
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.to_string();
        match self {
            Self::Domain(DomainError::InvalidLeadPayload(_)) => {
                InterfaceError::InvalidLead { message, correlation_id }
            }
            Self::Domain(error) if error.is_lead_conflict() => {
                InterfaceError::LeadConflict { message, correlation_id }
            }
            Self::Persistence(_) | Self::Integration(_) => {
                InterfaceError::Unavailable { message, correlation_id }
            }
            Self::Domain(_) | Self::Configuration(_) => {
                InterfaceError::Internal { message, correlation_id }
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("invalid lead: {message}")]
    InvalidLead { message: String, correlation_id: String },
    #[error("lead conflict: {message}")]
    LeadConflict { message: String, correlation_id: String },
    #[error("unavailable: {message}")]
    Unavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidLead { .. } => {
                "The lead could not be read. Send a JSON object with an email address."
            }
            Self::LeadConflict { .. } => {
                "The lead is already further along the pipeline than this step allows."
            }
            Self::Unavailable { .. } => {
                "Lead processing is temporarily unavailable. Retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidLead { .. } => 400,
            Self::LeadConflict { .. } => 409,
            Self::Unavailable { .. } => 503,
            Self::Internal { .. } => 500,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::InvalidLead { correlation_id, .. }
            | Self::LeadConflict { correlation_id, .. }
            | Self::Unavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::lead::LeadStatus;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};
    use crate::workflow::{WorkflowState, WorkflowTransitionError};

    #[test]
    fn skipped_lead_stage_is_a_non_retryable_conflict() {
        let error = ApplicationError::from(DomainError::InvalidLeadTransition {
            from: LeadStatus::New,
            to: LeadStatus::MeetingScheduled,
        });

        assert_eq!(error.code(), "lead_transition");
        assert!(!error.is_retryable());

        let interface = error.into_interface("run-7");
        assert!(matches!(interface, InterfaceError::LeadConflict { .. }));
        assert_eq!(interface.status_code(), 409);
        assert_eq!(interface.correlation_id(), "run-7");
        assert!(interface.to_string().contains("from new to meeting_scheduled"));
    }

    #[test]
    fn missing_email_surfaces_as_invalid_lead() {
        let interface =
            ApplicationError::from(DomainError::InvalidLeadPayload("email is required".into()))
                .into_interface("run-8");

        assert_eq!(interface.status_code(), 400);
        assert_eq!(interface.to_string(), "invalid lead: invalid lead payload: email is required");
        assert!(interface.user_message().contains("email address"));
    }

    #[test]
    fn store_outage_is_retryable_and_unavailable() {
        let error = ApplicationError::Persistence("database is locked".to_owned());
        assert_eq!(error.code(), "persistence");
        assert!(error.is_retryable());

        let interface = error.into_interface("run-9");
        assert!(matches!(interface, InterfaceError::Unavailable { .. }));
        assert_eq!(interface.status_code(), 503);
    }

    #[test]
    fn rejected_workflow_step_is_an_internal_fault() {
        let error = ApplicationError::from(DomainError::from(
            WorkflowTransitionError::InvalidTransition {
                from: WorkflowState::Start,
                to: WorkflowState::Scheduled,
            },
        ));
        assert_eq!(error.code(), "workflow_transition");
        assert!(!DomainError::InvariantViolation("x".into()).is_lead_conflict());

        let interface = error.into_interface("run-10");
        assert_eq!(interface.status_code(), 500);
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
