//! Lead-conversion workflow: qualify, contact, schedule.
//!
//! One run per inbound payload. Stages run strictly in order and every stage
//! persists before the next one starts. Runs for the same email address are
//! serialized; runs for different addresses proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use uuid::Uuid;

use leadflow_core::audit::{AuditContext, AuditSink, TracingAuditSink};
use leadflow_core::config::AppConfig;
use leadflow_core::domain::conversation::{
    ConversationId, ConversationPatch, ConversationStatus, NewConversation, NewMessage,
};
use leadflow_core::domain::lead::{normalize_email, Lead, LeadId, LeadPatch, Metadata, NewLead};
use leadflow_core::errors::{ApplicationError, DomainError};
use leadflow_core::workflow::{WorkflowState, WorkflowTrace, WorkflowTransition};
use leadflow_db::repositories::{CrmStore, RepositoryError};

use crate::agents::outbound::ContactOutcome;
use crate::agents::scheduler::SchedulingFallback;
use crate::agents::{MeetingSchedulerAgent, OutboundContactAgent, QualifierAgent};
use crate::llm::ReasoningService;
use crate::prompts::PromptLibrary;
use crate::runtime::AgentRuntime;
use crate::tools::{ToolExecutor, ToolSettings};

const ACTOR: &str = "workflow-orchestrator";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid lead payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Store(#[from] RepositoryError),
    #[error("lead `{0}` disappeared while the workflow was running")]
    LeadVanished(LeadId),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<WorkflowError> for ApplicationError {
    fn from(value: WorkflowError) -> Self {
        match value {
            WorkflowError::InvalidPayload(message) => {
                Self::Domain(DomainError::InvalidLeadPayload(message))
            }
            WorkflowError::Store(RepositoryError::Domain(error)) | WorkflowError::Domain(error) => {
                Self::Domain(error)
            }
            WorkflowError::Store(error) => Self::Persistence(error.to_string()),
            WorkflowError::LeadVanished(lead_id) => Self::Persistence(format!(
                "lead `{lead_id}` disappeared while the workflow was running"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Completed,
    Error,
}

/// Outcome of one workflow run. `contacted`, `meeting_scheduled` and the
/// meeting fields are present only once the run reached those stages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub status: WorkflowStatus,
    pub lead_id: Option<LeadId>,
    pub qualified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_scheduled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_url: Option<String>,
    pub workflow_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub state: WorkflowState,
    pub transitions: Vec<WorkflowTransition>,
    pub correlation_id: String,
}

impl WorkflowResult {
    fn started(correlation_id: String) -> Self {
        Self {
            status: WorkflowStatus::Completed,
            lead_id: None,
            qualified: false,
            contacted: None,
            meeting_scheduled: None,
            meeting_url: None,
            workflow_completed: false,
            reason: None,
            error: None,
            error_code: None,
            conversation_id: None,
            contact_method: None,
            event_type: None,
            state: WorkflowState::Start,
            transitions: Vec::new(),
            correlation_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WorkflowSettings {
    /// Stop before scheduling when the outbound agent reports failure.
    pub gate_on_contact_success: bool,
}

#[derive(Debug, Deserialize)]
struct LeadPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    metadata: Metadata,
}

impl LeadPayload {
    fn parse(payload: Value) -> Result<NewLead, WorkflowError> {
        if !payload.is_object() {
            return Err(WorkflowError::InvalidPayload("payload must be a JSON object".to_string()));
        }
        let payload: LeadPayload = serde_json::from_value(payload)
            .map_err(|e| WorkflowError::InvalidPayload(e.to_string()))?;

        let email = payload.email.as_deref().map(normalize_email).unwrap_or_default();
        if email.is_empty() {
            return Err(WorkflowError::InvalidPayload("email is required".to_string()));
        }
        if !email.contains('@') {
            return Err(WorkflowError::InvalidPayload(format!("`{email}` is not an email address")));
        }

        Ok(NewLead {
            name: non_blank(payload.name),
            email,
            company: non_blank(payload.company),
            phone: non_blank(payload.phone),
            message: non_blank(payload.message),
            metadata: payload.metadata,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

struct RunState {
    trace: WorkflowTrace,
    result: WorkflowResult,
}

impl RunState {
    fn new(correlation_id: String) -> Self {
        Self { trace: WorkflowTrace::default(), result: WorkflowResult::started(correlation_id) }
    }

    fn correlation_id(&self) -> &str {
        &self.result.correlation_id
    }

    fn lead_label(&self) -> &str {
        self.result.lead_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unassigned")
    }

    fn audit_context(&self) -> AuditContext {
        AuditContext::new(self.result.lead_id.clone(), self.correlation_id(), ACTOR)
    }

    fn into_result(mut self) -> WorkflowResult {
        self.result.state = self.trace.current();
        self.result.transitions = self.trace.into_transitions();
        self.result
    }
}

pub struct WorkflowOrchestrator {
    store: Arc<dyn CrmStore>,
    qualifier: QualifierAgent,
    outbound: OutboundContactAgent,
    scheduler: MeetingSchedulerAgent,
    audit: Arc<dyn AuditSink>,
    settings: WorkflowSettings,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl WorkflowOrchestrator {
    pub fn new(
        store: Arc<dyn CrmStore>,
        service: Arc<dyn ReasoningService>,
        config: &AppConfig,
    ) -> Self {
        let executor = ToolExecutor::new(store.clone(), ToolSettings::from(&config.agents));
        let runtime = AgentRuntime::new(service, executor, config.agents.max_iterations);
        let prompts = PromptLibrary::new(&config.agents);

        Self {
            store,
            qualifier: QualifierAgent::new(runtime.clone(), prompts.clone()),
            outbound: OutboundContactAgent::new(runtime.clone(), prompts.clone()),
            scheduler: MeetingSchedulerAgent::new(
                runtime,
                prompts,
                SchedulingFallback::from(&config.agents),
            ),
            audit: Arc::new(TracingAuditSink),
            settings: WorkflowSettings {
                gate_on_contact_success: config.workflow.gate_on_contact_success,
            },
            locks: Mutex::default(),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn settings(&self) -> WorkflowSettings {
        self.settings
    }

    /// Runs the whole pipeline for one raw lead payload.
    ///
    /// Never fails: any error ends the run in the `error` state and is reported
    /// in the result. Stages that completed before the error stay persisted.
    pub async fn process_lead_workflow(&self, payload: Value) -> WorkflowResult {
        let mut run = RunState::new(Uuid::new_v4().to_string());
        tracing::info!(
            event_name = "workflow.run.start",
            correlation_id = %run.correlation_id(),
            "lead workflow started"
        );

        let new_lead = match LeadPayload::parse(payload) {
            Ok(new_lead) => new_lead,
            Err(error) => return self.fail(run, error).await,
        };

        let slot = self.email_lock(&new_lead.email);
        let _guard = slot.acquire().await;
        match self.execute(&mut run, new_lead).await {
            Ok(()) => self.finish(run),
            Err(error) => self.fail(run, error).await,
        }
    }

    async fn execute(&self, run: &mut RunState, new_lead: NewLead) -> Result<(), WorkflowError> {
        self.advance(run, WorkflowState::Lookup)?;
        let lead = match self.store.find_lead_by_email(&new_lead.email).await? {
            Some(existing) => {
                run.result.lead_id = Some(existing.id.clone());
                self.advance(run, WorkflowState::Existing)?;
                existing
            }
            None => {
                let created = self.store.create_lead(new_lead).await?;
                run.result.lead_id = Some(created.id.clone());
                self.advance(run, WorkflowState::New)?;
                created
            }
        };

        self.advance(run, WorkflowState::Qualifying)?;
        let verdict = self.qualifier.run(&lead, run.correlation_id()).await;
        run.result.reason = Some(verdict.reason.clone());

        if !verdict.qualified {
            let disqualified = self.store.mark_disqualified(&lead.id, &verdict.reason).await?;
            let lead = vanished(disqualified, &lead)?;
            self.persist_stage(run, &lead, WorkflowState::Disqualified).await?;
            run.result.qualified = lead.qualified;
            run.result.contacted = Some(lead.contacted);
            run.result.meeting_scheduled = Some(lead.meeting_scheduled);
            run.result.workflow_completed = true;
            return Ok(());
        }

        let lead = vanished(self.store.mark_qualified(&lead.id, &verdict.reason).await?, &lead)?;
        self.persist_stage(run, &lead, WorkflowState::Qualified).await?;
        run.result.qualified = lead.qualified;

        let conversation =
            self.store.create_conversation(NewConversation::automated(lead.id.clone())).await?;
        run.result.conversation_id = Some(conversation.id.clone());
        self.advance(run, WorkflowState::ConversationCreated)?;

        self.advance(run, WorkflowState::Contacting)?;
        let contact = self.outbound.run(&lead, &conversation.id, run.correlation_id()).await;
        self.store
            .create_message(contact_message(&conversation.id, &contact, run.correlation_id()))
            .await?;
        run.result.contact_method = Some(contact.contact_method.clone());

        if !contact.success {
            tracing::warn!(
                event_name = "workflow.contact.unsuccessful",
                correlation_id = %run.correlation_id(),
                lead_id = %lead.id,
                contact_method = %contact.contact_method,
                error = contact.error.as_deref().unwrap_or(""),
                gated = self.settings.gate_on_contact_success,
                "outbound contact reported failure"
            );
            if self.settings.gate_on_contact_success {
                self.persist_stage(run, &lead, WorkflowState::ContactDeferred).await?;
                run.result.contacted = Some(false);
                return Ok(());
            }
        }

        let lead =
            vanished(self.store.mark_contacted(&lead.id, &contact.contact_method).await?, &lead)?;
        self.persist_stage(run, &lead, WorkflowState::Contacted).await?;
        run.result.contacted = Some(lead.contacted);

        self.advance(run, WorkflowState::Scheduling)?;
        let meeting = self.scheduler.run(&lead, &conversation.id, run.correlation_id()).await;
        if !meeting.success {
            tracing::warn!(
                event_name = "workflow.scheduling.unsuccessful",
                correlation_id = %run.correlation_id(),
                lead_id = %lead.id,
                meeting_url = %meeting.meeting_url,
                error = meeting.error.as_deref().unwrap_or(""),
                "meeting scheduler reported failure"
            );
        }

        let lead = vanished(
            self.store
                .mark_meeting_scheduled(&lead.id, &meeting.meeting_url, &meeting.event_type)
                .await?,
            &lead,
        )?;
        self.persist_stage(run, &lead, WorkflowState::Scheduled).await?;
        run.result.meeting_scheduled = Some(lead.meeting_scheduled);
        run.result.meeting_url = Some(meeting.meeting_url.clone());
        run.result.event_type = Some(meeting.event_type.clone());

        let summary = format!(
            "Qualified: {}. Contacted via {}. Meeting link sent: {} ({}).",
            verdict.reason, contact.contact_method, meeting.meeting_url, meeting.event_type
        );
        self.store
            .update_conversation(
                &conversation.id,
                ConversationPatch {
                    status: Some(ConversationStatus::Closed),
                    summary: Some(summary),
                },
            )
            .await?;

        run.result.workflow_completed = true;
        Ok(())
    }

    fn advance(&self, run: &mut RunState, next: WorkflowState) -> Result<(), WorkflowError> {
        let audit = run.audit_context();
        run.trace.advance_with_audit(next, self.audit.as_ref(), &audit).map_err(DomainError::from)?;
        tracing::info!(
            event_name = %format!("workflow.stage.{}", next.as_str()),
            correlation_id = %run.correlation_id(),
            lead_id = %run.lead_label(),
            "workflow stage reached"
        );
        Ok(())
    }

    /// Advances to `state` and stamps it on the lead record.
    async fn persist_stage(
        &self,
        run: &mut RunState,
        lead: &Lead,
        state: WorkflowState,
    ) -> Result<(), WorkflowError> {
        self.advance(run, state)?;
        self.stamp_lead(&lead.id, state, run.correlation_id(), None).await?;
        Ok(())
    }

    async fn stamp_lead(
        &self,
        lead_id: &LeadId,
        state: WorkflowState,
        correlation_id: &str,
        error: Option<&str>,
    ) -> Result<(), WorkflowError> {
        let mut metadata = Metadata::new();
        metadata.insert("workflow_state".to_string(), json!(state.as_str()));
        metadata.insert("workflow_correlation_id".to_string(), json!(correlation_id));
        metadata.insert("last_workflow_error".to_string(), error.map_or(Value::Null, |e| json!(e)));

        self.store
            .update_lead(lead_id, LeadPatch { metadata, ..LeadPatch::default() })
            .await?
            .ok_or_else(|| WorkflowError::LeadVanished(lead_id.clone()))?;
        Ok(())
    }

    fn finish(&self, run: RunState) -> WorkflowResult {
        let result = run.into_result();
        tracing::info!(
            event_name = "workflow.run.completed",
            correlation_id = %result.correlation_id,
            lead_id = result.lead_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unassigned"),
            state = %result.state,
            qualified = result.qualified,
            workflow_completed = result.workflow_completed,
            "lead workflow completed"
        );
        result
    }

    async fn fail(&self, mut run: RunState, error: WorkflowError) -> WorkflowResult {
        let error = ApplicationError::from(error);
        let message = error.to_string();

        if !run.trace.current().is_terminal() {
            let audit = run.audit_context();
            if let Err(transition_error) =
                run.trace.advance_with_audit(WorkflowState::Error, self.audit.as_ref(), &audit)
            {
                tracing::warn!(
                    event_name = "workflow.run.error_transition_rejected",
                    correlation_id = %run.correlation_id(),
                    error = %transition_error,
                    "could not record error state"
                );
            }
        }

        if let Some(lead_id) = run.result.lead_id.clone() {
            let stamped = self
                .stamp_lead(&lead_id, WorkflowState::Error, run.correlation_id(), Some(&message))
                .await;
            if let Err(stamp_error) = stamped {
                tracing::warn!(
                    event_name = "workflow.run.error_stamp_failed",
                    correlation_id = %run.correlation_id(),
                    lead_id = %lead_id,
                    error = %stamp_error,
                    "could not record workflow error on lead"
                );
            }
        }

        tracing::error!(
            event_name = "workflow.run.failed",
            correlation_id = %run.correlation_id(),
            lead_id = %run.lead_label(),
            error = %message,
            error_code = error.code(),
            retryable = error.is_retryable(),
            "lead workflow failed"
        );

        run.result.status = WorkflowStatus::Error;
        run.result.error = Some(message);
        run.result.error_code = Some(error.code().to_string());
        run.result.workflow_completed = false;
        run.into_result()
    }

    fn email_lock(&self, key: &str) -> EmailLock<'_> {
        let lock = lock_map(&self.locks).entry(key.to_string()).or_default().clone();
        EmailLock { locks: &self.locks, key: key.to_string(), lock }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

/// Handle on one email's run lock. Dropping the last handle removes the map
/// entry, including when the owning run is cancelled mid-flight.
struct EmailLock<'a> {
    locks: &'a Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    key: String,
    lock: Arc<AsyncMutex<()>>,
}

impl EmailLock<'_> {
    async fn acquire(&self) -> AsyncMutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for EmailLock<'_> {
    fn drop(&mut self) {
        let mut locks = lock_map(self.locks);
        // Only the map and this handle still own the lock.
        let idle = Arc::strong_count(&self.lock) == 2;
        if idle && locks.get(&self.key).is_some_and(|lock| Arc::ptr_eq(lock, &self.lock)) {
            locks.remove(&self.key);
        }
    }
}

fn lock_map<T>(locks: &Mutex<T>) -> MutexGuard<'_, T> {
    match locks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn vanished(updated: Option<Lead>, lead: &Lead) -> Result<Lead, WorkflowError> {
    updated.ok_or_else(|| WorkflowError::LeadVanished(lead.id.clone()))
}

fn contact_message(
    conversation_id: &ConversationId,
    contact: &ContactOutcome,
    correlation_id: &str,
) -> NewMessage {
    let mut metadata = Metadata::new();
    metadata.insert("success".to_string(), json!(contact.success));
    metadata.insert("contact_method".to_string(), json!(contact.contact_method));
    metadata.insert("correlation_id".to_string(), json!(correlation_id));
    if let Some(error) = &contact.error {
        metadata.insert("error".to_string(), json!(error));
    }

    NewMessage {
        conversation_id: conversation_id.clone(),
        sender: "workflow".to_string(),
        content: contact.message.clone(),
        message_type: "contact_attempt".to_string(),
        metadata,
    }
}
