//! Role-bound wrappers around [`AgentRuntime`](crate::runtime::AgentRuntime).
//!
//! Each agent renders its prompt, builds the user turn from a lead snapshot,
//! and turns a failed reasoning-service call into a role-specific failure
//! result instead of an error.

use serde_json::{json, Value};

use leadflow_core::domain::conversation::ConversationId;
use leadflow_core::domain::lead::Lead;

pub mod outbound;
pub mod qualifier;
pub mod scheduler;

pub use outbound::{ContactOutcome, OutboundContactAgent};
pub use qualifier::{QualificationOutcome, QualifierAgent};
pub use scheduler::{MeetingSchedulerAgent, SchedulingOutcome};

/// Public lead fields handed to the reasoning service.
pub fn lead_snapshot(lead: &Lead, conversation_id: Option<&ConversationId>) -> Value {
    let mut snapshot = json!({
        "lead_id": lead.id.0,
        "name": lead.name,
        "email": lead.email,
        "company": lead.company,
        "phone": lead.phone,
        "message": lead.message,
        "status": lead.status,
    });
    if let (Some(conversation_id), Some(object)) = (conversation_id, snapshot.as_object_mut()) {
        object.insert("conversation_id".to_string(), json!(conversation_id.0));
    }
    snapshot
}
