use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Start,
    Lookup,
    Existing,
    New,
    Qualifying,
    Disqualified,
    Qualified,
    ConversationCreated,
    Contacting,
    Contacted,
    /// Outbound contact failed and the run was configured to stop there.
    ContactDeferred,
    Scheduling,
    Scheduled,
    Error,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Lookup => "lookup",
            Self::Existing => "existing",
            Self::New => "new",
            Self::Qualifying => "qualifying",
            Self::Disqualified => "disqualified",
            Self::Qualified => "qualified",
            Self::ConversationCreated => "conversation_created",
            Self::Contacting => "contacting",
            Self::Contacted => "contacted",
            Self::ContactDeferred => "contact_deferred",
            Self::Scheduling => "scheduling",
            Self::Scheduled => "scheduled",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disqualified | Self::ContactDeferred | Self::Scheduled | Self::Error)
    }

    pub fn can_transition_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;

        if next == Error {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Start, Lookup)
                | (Lookup, Existing)
                | (Lookup, New)
                | (Existing, Qualifying)
                | (New, Qualifying)
                | (Qualifying, Disqualified)
                | (Qualifying, Qualified)
                | (Qualified, ConversationCreated)
                | (ConversationCreated, Contacting)
                | (Contacting, Contacted)
                | (Contacting, ContactDeferred)
                | (Contacted, Scheduling)
                | (Scheduling, Scheduled)
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTransition {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::WorkflowState::{self, *};

    #[test]
    fn happy_path_is_a_chain_of_legal_transitions() {
        let path = [
            Start,
            Lookup,
            New,
            Qualifying,
            Qualified,
            ConversationCreated,
            Contacting,
            Contacted,
            Scheduling,
            Scheduled,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Scheduled.is_terminal());
    }

    #[test]
    fn stages_cannot_be_skipped() {
        assert!(!Qualifying.can_transition_to(Contacting));
        assert!(!Qualified.can_transition_to(Scheduling));
        assert!(!Lookup.can_transition_to(Qualified));
    }

    #[test]
    fn error_is_reachable_from_any_live_state_only() {
        for state in [Start, Lookup, Existing, Qualifying, Contacting, Scheduling] {
            assert!(state.can_transition_to(WorkflowState::Error));
        }
        assert!(!Disqualified.can_transition_to(Error));
        assert!(!Scheduled.can_transition_to(Error));
    }
}
