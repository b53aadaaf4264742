use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use leadflow_core::domain::conversation::{
    Conversation, ConversationId, ConversationPatch, Message, NewConversation, NewMessage,
};
use leadflow_core::domain::lead::{Lead, LeadId, LeadPatch, NewLead};
use leadflow_core::errors::DomainError;

pub mod memory;
pub mod sql;

pub use memory::InMemoryCrmStore;
pub use sql::SqlCrmStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The CRM collaborator consumed by the agent tools and the workflow orchestrator.
///
/// Lookups return `Ok(None)` for missing records. The `mark_*` writers are
/// provided on top of `get_lead`/`update_lead` and run the lead's own status
/// transitions, so every implementation enforces the same flag ordering.
#[async_trait]
pub trait CrmStore: Send + Sync {
    async fn find_lead_by_email(&self, email: &str) -> Result<Option<Lead>, RepositoryError>;

    async fn create_lead(&self, input: NewLead) -> Result<Lead, RepositoryError>;

    async fn get_lead(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;

    async fn update_lead(
        &self,
        id: &LeadId,
        patch: LeadPatch,
    ) -> Result<Option<Lead>, RepositoryError>;

    async fn create_conversation(
        &self,
        input: NewConversation,
    ) -> Result<Conversation, RepositoryError>;

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn list_conversations_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<Conversation>, RepositoryError>;

    async fn create_message(&self, input: NewMessage) -> Result<Message, RepositoryError>;

    async fn list_messages_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn mark_qualified(
        &self,
        id: &LeadId,
        reason: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        transition_lead(self, id, |lead, now| {
            lead.mark_qualified(reason, now);
            Ok(())
        })
        .await
    }

    async fn mark_unqualified(
        &self,
        id: &LeadId,
        reason: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        transition_lead(self, id, |lead, now| {
            lead.mark_unqualified(reason, now);
            Ok(())
        })
        .await
    }

    async fn mark_disqualified(
        &self,
        id: &LeadId,
        reason: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        transition_lead(self, id, |lead, now| {
            lead.mark_disqualified(reason, now);
            Ok(())
        })
        .await
    }

    async fn mark_contacted(
        &self,
        id: &LeadId,
        method: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        transition_lead(self, id, |lead, now| lead.mark_contacted(method, now)).await
    }

    async fn mark_meeting_scheduled(
        &self,
        id: &LeadId,
        meeting_url: &str,
        event_type: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        transition_lead(self, id, |lead, now| {
            lead.mark_meeting_scheduled(meeting_url, event_type, now)
        })
        .await
    }
}

async fn transition_lead<S, F>(
    store: &S,
    id: &LeadId,
    transition: F,
) -> Result<Option<Lead>, RepositoryError>
where
    S: CrmStore + ?Sized,
    F: FnOnce(&mut Lead, DateTime<Utc>) -> Result<(), DomainError> + Send,
{
    let Some(before) = store.get_lead(id).await? else {
        return Ok(None);
    };

    let mut after = before.clone();
    transition(&mut after, Utc::now())?;
    after.check_invariants()?;

    let patch = LeadPatch::between(&before, &after);
    if patch.is_empty() {
        return Ok(Some(before));
    }
    store.update_lead(id, patch).await
}
