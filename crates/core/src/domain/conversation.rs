use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::lead::{LeadId, Metadata};

pub const AUTOMATED_WORKFLOW_CHANNEL: &str = "automated_workflow";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub lead_id: LeadId,
    pub channel: String,
    pub status: ConversationStatus,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConversation {
    pub lead_id: LeadId,
    pub channel: String,
    pub summary: Option<String>,
}

impl NewConversation {
    pub fn automated(lead_id: LeadId) -> Self {
        Self { lead_id, channel: AUTOMATED_WORKFLOW_CHANNEL.to_string(), summary: None }
    }
}

/// Partial update for a conversation. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPatch {
    pub status: Option<ConversationStatus>,
    pub summary: Option<String>,
}

impl Conversation {
    pub fn new(input: NewConversation, now: DateTime<Utc>) -> Self {
        Self {
            id: ConversationId::generate(),
            lead_id: input.lead_id,
            channel: input.channel,
            status: ConversationStatus::Active,
            summary: input.summary,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply_patch(&mut self, patch: ConversationPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(summary) = patch.summary {
            self.summary = Some(summary);
        }
        self.updated_at = now;
    }
}

/// One entry in a conversation's append-only log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: String,
    pub content: String,
    pub message_type: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender: String,
    pub content: String,
    pub message_type: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    pub fn new(input: NewMessage, now: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id: input.conversation_id,
            sender: input.sender,
            content: input.content,
            message_type: input.message_type,
            metadata: input.metadata,
            created_at: now,
        }
    }
}
