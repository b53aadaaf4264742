use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use leadflow_core::domain::conversation::{
    Conversation, ConversationId, ConversationPatch, Message, NewConversation, NewMessage,
};
use leadflow_core::domain::lead::{normalize_email, Lead, LeadId, LeadPatch, NewLead};
use leadflow_core::errors::DomainError;

use super::{CrmStore, RepositoryError};

/// Process-local store used by tests and dry runs.
#[derive(Default)]
pub struct InMemoryCrmStore {
    leads: RwLock<HashMap<String, Lead>>,
    conversations: RwLock<HashMap<String, Conversation>>,
    messages: RwLock<Vec<Message>>,
}

impl InMemoryCrmStore {
    pub async fn lead_count(&self) -> usize {
        self.leads.read().await.len()
    }

    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait::async_trait]
impl CrmStore for InMemoryCrmStore {
    async fn find_lead_by_email(&self, email: &str) -> Result<Option<Lead>, RepositoryError> {
        let email = normalize_email(email);
        let leads = self.leads.read().await;
        Ok(leads.values().find(|lead| lead.email == email).cloned())
    }

    async fn create_lead(&self, input: NewLead) -> Result<Lead, RepositoryError> {
        let lead = Lead::new(input, Utc::now());
        let mut leads = self.leads.write().await;
        if leads.values().any(|existing| existing.email == lead.email) {
            return Err(RepositoryError::Domain(DomainError::InvariantViolation(format!(
                "a lead with email `{}` already exists",
                lead.email
            ))));
        }
        leads.insert(lead.id.0.clone(), lead.clone());
        Ok(lead)
    }

    async fn get_lead(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        Ok(leads.get(&id.0).cloned())
    }

    async fn update_lead(
        &self,
        id: &LeadId,
        patch: LeadPatch,
    ) -> Result<Option<Lead>, RepositoryError> {
        let mut leads = self.leads.write().await;
        let Some(lead) = leads.get_mut(&id.0) else {
            return Ok(None);
        };
        lead.apply_patch(patch, Utc::now());
        Ok(Some(lead.clone()))
    }

    async fn create_conversation(
        &self,
        input: NewConversation,
    ) -> Result<Conversation, RepositoryError> {
        if !self.leads.read().await.contains_key(&input.lead_id.0) {
            return Err(RepositoryError::Domain(DomainError::InvariantViolation(format!(
                "conversation references unknown lead `{}`",
                input.lead_id
            ))));
        }
        let conversation = Conversation::new(input, Utc::now());
        let mut conversations = self.conversations.write().await;
        conversations.insert(conversation.id.0.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(&id.0).cloned())
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let Some(conversation) = conversations.get_mut(&id.0) else {
            return Ok(None);
        };
        conversation.apply_patch(patch, Utc::now());
        Ok(Some(conversation.clone()))
    }

    async fn list_conversations_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        let mut found: Vec<Conversation> =
            conversations.values().filter(|c| &c.lead_id == lead_id).cloned().collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn create_message(&self, input: NewMessage) -> Result<Message, RepositoryError> {
        if !self.conversations.read().await.contains_key(&input.conversation_id.0) {
            return Err(RepositoryError::Domain(DomainError::InvariantViolation(format!(
                "message references unknown conversation `{}`",
                input.conversation_id
            ))));
        }
        let message = Message::new(input, Utc::now());
        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn list_messages_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages.iter().filter(|m| &m.conversation_id == conversation_id).cloned().collect())
    }
}
