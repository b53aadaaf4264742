use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use leadflow_core::domain::conversation::{
    Conversation, ConversationId, ConversationPatch, ConversationStatus, Message, MessageId,
    NewConversation, NewMessage,
};
use leadflow_core::domain::lead::{
    normalize_email, Lead, LeadId, LeadPatch, LeadStatus, Metadata, NewLead,
};

use super::{CrmStore, RepositoryError};
use crate::DbPool;

const LEAD_COLUMNS: &str = "id, name, email, company, phone, message, status, qualified, \
                            contacted, meeting_scheduled, metadata_json, created_at, updated_at";
const CONVERSATION_COLUMNS: &str = "id, lead_id, channel, status, summary, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender, content, message_type, metadata_json, created_at";

pub struct SqlCrmStore {
    pool: DbPool,
}

impl SqlCrmStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn save_lead(&self, lead: &Lead) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE lead SET
                 name = ?, email = ?, company = ?, phone = ?, message = ?,
                 status = ?, qualified = ?, contacted = ?, meeting_scheduled = ?,
                 metadata_json = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.company)
        .bind(&lead.phone)
        .bind(&lead.message)
        .bind(lead.status.as_str())
        .bind(lead.qualified)
        .bind(lead.contacted)
        .bind(lead.meeting_scheduled)
        .bind(encode_metadata(&lead.metadata)?)
        .bind(lead.updated_at.to_rfc3339())
        .bind(&lead.id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn decode_err(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {e}")))
}

fn encode_metadata(metadata: &Metadata) -> Result<String, RepositoryError> {
    serde_json::to_string(metadata).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn decode_metadata(raw: &str) -> Result<Metadata, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_lead(row: &SqliteRow) -> Result<Lead, RepositoryError> {
    let status_str: String = row.try_get("status").map_err(decode_err)?;
    let status = LeadStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown lead status `{status_str}`")))?;
    let metadata_json: String = row.try_get("metadata_json").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    Ok(Lead {
        id: LeadId(row.try_get("id").map_err(decode_err)?),
        name: row.try_get("name").map_err(decode_err)?,
        email: row.try_get("email").map_err(decode_err)?,
        company: row.try_get("company").map_err(decode_err)?,
        phone: row.try_get("phone").map_err(decode_err)?,
        message: row.try_get("message").map_err(decode_err)?,
        status,
        qualified: row.try_get("qualified").map_err(decode_err)?,
        contacted: row.try_get("contacted").map_err(decode_err)?,
        meeting_scheduled: row.try_get("meeting_scheduled").map_err(decode_err)?,
        metadata: decode_metadata(&metadata_json)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn row_to_conversation(row: &SqliteRow) -> Result<Conversation, RepositoryError> {
    let status_str: String = row.try_get("status").map_err(decode_err)?;
    let status = ConversationStatus::parse(&status_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown conversation status `{status_str}`"))
    })?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    Ok(Conversation {
        id: ConversationId(row.try_get("id").map_err(decode_err)?),
        lead_id: LeadId(row.try_get("lead_id").map_err(decode_err)?),
        channel: row.try_get("channel").map_err(decode_err)?,
        status,
        summary: row.try_get("summary").map_err(decode_err)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn row_to_message(row: &SqliteRow) -> Result<Message, RepositoryError> {
    let metadata_json: String = row.try_get("metadata_json").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    Ok(Message {
        id: MessageId(row.try_get("id").map_err(decode_err)?),
        conversation_id: ConversationId(row.try_get("conversation_id").map_err(decode_err)?),
        sender: row.try_get("sender").map_err(decode_err)?,
        content: row.try_get("content").map_err(decode_err)?,
        message_type: row.try_get("message_type").map_err(decode_err)?,
        metadata: decode_metadata(&metadata_json)?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl CrmStore for SqlCrmStore {
    async fn find_lead_by_email(&self, email: &str) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM lead WHERE email = ?"))
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_lead).transpose()
    }

    async fn create_lead(&self, input: NewLead) -> Result<Lead, RepositoryError> {
        let lead = Lead::new(input, Utc::now());

        sqlx::query(&format!(
            "INSERT INTO lead ({LEAD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&lead.id.0)
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.company)
        .bind(&lead.phone)
        .bind(&lead.message)
        .bind(lead.status.as_str())
        .bind(lead.qualified)
        .bind(lead.contacted)
        .bind(lead.meeting_scheduled)
        .bind(encode_metadata(&lead.metadata)?)
        .bind(lead.created_at.to_rfc3339())
        .bind(lead.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(lead)
    }

    async fn get_lead(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM lead WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_lead).transpose()
    }

    async fn update_lead(
        &self,
        id: &LeadId,
        patch: LeadPatch,
    ) -> Result<Option<Lead>, RepositoryError> {
        let Some(mut lead) = self.get_lead(id).await? else {
            return Ok(None);
        };
        lead.apply_patch(patch, Utc::now());
        self.save_lead(&lead).await?;
        Ok(Some(lead))
    }

    async fn create_conversation(
        &self,
        input: NewConversation,
    ) -> Result<Conversation, RepositoryError> {
        let conversation = Conversation::new(input, Utc::now());

        sqlx::query(&format!(
            "INSERT INTO conversation ({CONVERSATION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&conversation.id.0)
        .bind(&conversation.lead_id.0)
        .bind(&conversation.channel)
        .bind(conversation.status.as_str())
        .bind(&conversation.summary)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let Some(mut conversation) = self.get_conversation(id).await? else {
            return Ok(None);
        };
        conversation.apply_patch(patch, Utc::now());

        sqlx::query("UPDATE conversation SET status = ?, summary = ?, updated_at = ? WHERE id = ?")
            .bind(conversation.status.as_str())
            .bind(&conversation.summary)
            .bind(conversation.updated_at.to_rfc3339())
            .bind(&conversation.id.0)
            .execute(&self.pool)
            .await?;

        Ok(Some(conversation))
    }

    async fn list_conversations_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation
             WHERE lead_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&lead_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_conversation).collect::<Result<Vec<_>, _>>()
    }

    async fn create_message(&self, input: NewMessage) -> Result<Message, RepositoryError> {
        let message = Message::new(input, Utc::now());

        let insert = format!("INSERT INTO message ({MESSAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)");
        sqlx::query(&insert)
            .bind(&message.id.0)
            .bind(&message.conversation_id.0)
            .bind(&message.sender)
            .bind(&message.content)
            .bind(&message.message_type)
            .bind(encode_metadata(&message.metadata)?)
            .bind(message.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(message)
    }

    async fn list_messages_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message
             WHERE conversation_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use leadflow_core::domain::conversation::{NewConversation, NewMessage};
    use leadflow_core::domain::lead::{LeadStatus, NewLead};
    use leadflow_core::errors::DomainError;

    use super::SqlCrmStore;
    use crate::repositories::{CrmStore, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlCrmStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlCrmStore::new(pool)
    }

    fn new_lead(email: &str) -> NewLead {
        let mut metadata = leadflow_core::domain::lead::Metadata::new();
        metadata.insert("source".to_string(), json!("webform"));
        NewLead {
            name: Some("Katherine Johnson".to_string()),
            email: email.to_string(),
            company: Some("Orbital Mechanics".to_string()),
            phone: Some("+1 555 0100".to_string()),
            message: Some("We have budget for 30 seats this quarter".to_string()),
            metadata,
        }
    }

    #[tokio::test]
    async fn create_and_find_lead_by_email() {
        let store = setup().await;
        let created = store.create_lead(new_lead("Katherine@NASA.gov ")).await.expect("create");

        let found =
            store.find_lead_by_email("katherine@nasa.gov").await.expect("find").expect("exists");

        assert_eq!(found, created);
        assert_eq!(found.email, "katherine@nasa.gov");
        assert_eq!(found.metadata["source"], Value::from("webform"));
        assert!(store.find_lead_by_email("other@nasa.gov").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn duplicate_email_violates_unique_constraint() {
        let store = setup().await;
        store.create_lead(new_lead("katherine@nasa.gov")).await.expect("create");

        let error = store.create_lead(new_lead("katherine@nasa.gov")).await.expect_err("dup");
        assert!(matches!(error, RepositoryError::Database(_)));
    }

    #[tokio::test]
    async fn pipeline_writers_persist_flags_and_metadata() {
        let store = setup().await;
        let lead = store.create_lead(new_lead("katherine@nasa.gov")).await.expect("create");

        store.mark_qualified(&lead.id, "explicit budget").await.expect("qualify");
        store.mark_contacted(&lead.id, "email").await.expect("contact");
        store
            .mark_meeting_scheduled(&lead.id, "https://cal.example/kj", "demo")
            .await
            .expect("schedule");

        let stored = store.get_lead(&lead.id).await.expect("get").expect("exists");
        assert_eq!(stored.status, LeadStatus::MeetingScheduled);
        assert!(stored.qualified && stored.contacted && stored.meeting_scheduled);
        assert_eq!(stored.metadata["qualification_reason"], Value::from("explicit budget"));
        assert_eq!(stored.metadata["event_type"], Value::from("demo"));
        assert_eq!(stored.metadata["source"], Value::from("webform"));
        stored.check_invariants().expect("persisted lead is consistent");
    }

    #[tokio::test]
    async fn disqualification_clears_flags_on_rerun() {
        let store = setup().await;
        let lead = store.create_lead(new_lead("katherine@nasa.gov")).await.expect("create");
        store.mark_qualified(&lead.id, "fit").await.expect("qualify");
        store.mark_contacted(&lead.id, "email").await.expect("contact");

        let disqualified = store
            .mark_disqualified(&lead.id, "no longer has budget")
            .await
            .expect("disqualify")
            .expect("exists");

        assert_eq!(disqualified.status, LeadStatus::Disqualified);
        assert!(!disqualified.qualified && !disqualified.contacted);
        assert!(!disqualified.metadata.contains_key("qualified_at"));
    }

    #[tokio::test]
    async fn scheduling_an_uncontacted_lead_is_refused() {
        let store = setup().await;
        let lead = store.create_lead(new_lead("katherine@nasa.gov")).await.expect("create");
        store.mark_qualified(&lead.id, "fit").await.expect("qualify");

        let error = store
            .mark_meeting_scheduled(&lead.id, "https://cal.example/kj", "demo")
            .await
            .expect_err("must refuse");
        assert!(matches!(
            error,
            RepositoryError::Domain(DomainError::InvalidLeadTransition { .. })
        ));
    }

    #[tokio::test]
    async fn messages_are_listed_in_append_order() {
        let store = setup().await;
        let lead = store.create_lead(new_lead("katherine@nasa.gov")).await.expect("create");
        let conversation = store
            .create_conversation(NewConversation::automated(lead.id.clone()))
            .await
            .expect("conversation");

        for content in ["first", "second", "third"] {
            let mut metadata = leadflow_core::domain::lead::Metadata::new();
            metadata.insert("success".to_string(), json!(content != "second"));
            store
                .create_message(NewMessage {
                    conversation_id: conversation.id.clone(),
                    sender: "workflow".to_string(),
                    content: content.to_string(),
                    message_type: "outbound".to_string(),
                    metadata,
                })
                .await
                .expect("message");
        }

        let messages =
            store.list_messages_for_conversation(&conversation.id).await.expect("messages");
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(messages[1].metadata["success"], Value::Bool(false));
    }

    #[tokio::test]
    async fn conversation_for_unknown_lead_is_rejected_by_foreign_key() {
        let store = setup().await;
        let error = store
            .create_conversation(NewConversation::automated(
                leadflow_core::domain::lead::LeadId("ghost".to_string()),
            ))
            .await
            .expect_err("fk violation");
        assert!(matches!(error, RepositoryError::Database(_)));
    }
}
