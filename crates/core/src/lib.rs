pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use audit::{AuditContext, AuditEvent, AuditEventKind, AuditSink};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use domain::conversation::{
    Conversation, ConversationId, ConversationPatch, ConversationStatus, Message, MessageId,
    NewConversation, NewMessage,
};
pub use domain::lead::{
    normalize_email, Lead, LeadFlags, LeadId, LeadPatch, LeadStatus, Metadata, NewLead,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use workflow::{WorkflowState, WorkflowTrace, WorkflowTransition, WorkflowTransitionError};
