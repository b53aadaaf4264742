use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use leadflow_core::config::AgentsConfig;
use leadflow_core::domain::conversation::{ConversationId, NewMessage};
use leadflow_core::domain::lead::{LeadId, Metadata};
use leadflow_db::repositories::{CrmStore, RepositoryError};

use crate::llm::ToolCall;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Qualifier,
    OutboundContact,
    MeetingScheduler,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qualifier => "qualifier",
            Self::OutboundContact => "outbound_contact",
            Self::MeetingScheduler => "meeting_scheduler",
        }
    }

    /// The structured field that carries this role's verdict.
    pub fn decision_field(&self) -> &'static str {
        match self {
            Self::Qualifier => "qualified",
            Self::OutboundContact | Self::MeetingScheduler => "success",
        }
    }

    /// The action whose result doubles as this role's decision.
    pub fn commit_action(&self) -> ToolAction {
        match self {
            Self::Qualifier => ToolAction::MarkLeadQualified,
            Self::OutboundContact => ToolAction::RecordContactOutcome,
            Self::MeetingScheduler => ToolAction::ConfirmMeeting,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolAction {
    GetLead,
    FindLeadByEmail,
    MarkLeadQualified,
    ListConversationMessages,
    SendOutreachEmail,
    RecordContactOutcome,
    CreateMeetingLink,
    ConfirmMeeting,
}

const ACTION_NAMES: &[(&str, ToolAction)] = &[
    ("get_lead", ToolAction::GetLead),
    ("find_lead_by_email", ToolAction::FindLeadByEmail),
    ("mark_lead_qualified", ToolAction::MarkLeadQualified),
    ("list_conversation_messages", ToolAction::ListConversationMessages),
    ("send_outreach_email", ToolAction::SendOutreachEmail),
    ("record_contact_outcome", ToolAction::RecordContactOutcome),
    ("create_meeting_link", ToolAction::CreateMeetingLink),
    ("confirm_meeting", ToolAction::ConfirmMeeting),
];

impl ToolAction {
    pub fn from_name(name: &str) -> Option<Self> {
        ACTION_NAMES.iter().find(|(candidate, _)| *candidate == name).map(|(_, action)| *action)
    }

    pub fn name(&self) -> &'static str {
        ACTION_NAMES
            .iter()
            .find(|(_, action)| action == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    pub fn spec(&self) -> ToolSpec {
        let (description, parameters) = match self {
            Self::GetLead => (
                "Fetch a lead by id. Returns null when no lead exists.",
                schema(&[("lead_id", "string", "Lead identifier")], &["lead_id"]),
            ),
            Self::FindLeadByEmail => (
                "Look up a lead by email address. Returns null when no lead exists.",
                schema(&[("email", "string", "Email address")], &["email"]),
            ),
            Self::MarkLeadQualified => (
                "Record the qualification verdict for a lead.",
                schema(
                    &[
                        ("lead_id", "string", "Lead identifier"),
                        ("qualified", "boolean", "Whether the lead is worth pursuing"),
                        ("reason", "string", "Short justification"),
                    ],
                    &["lead_id", "qualified", "reason"],
                ),
            ),
            Self::ListConversationMessages => (
                "List the messages already exchanged in a conversation.",
                schema(
                    &[("conversation_id", "string", "Conversation identifier")],
                    &["conversation_id"],
                ),
            ),
            Self::SendOutreachEmail => (
                "Queue a personalised outreach email to the lead and log it in the conversation.",
                schema(
                    &[
                        ("lead_id", "string", "Lead identifier"),
                        ("conversation_id", "string", "Conversation identifier"),
                        ("subject", "string", "Email subject line"),
                        ("body", "string", "Plain-text email body"),
                    ],
                    &["lead_id", "conversation_id", "subject", "body"],
                ),
            ),
            Self::RecordContactOutcome => (
                "Record the final outcome of the contact attempt.",
                schema(
                    &[
                        ("success", "boolean", "Whether the lead was reached"),
                        ("message", "string", "Summary of what was sent"),
                        ("contact_method", "string", "Channel used, e.g. email"),
                    ],
                    &["success", "message", "contact_method"],
                ),
            ),
            Self::CreateMeetingLink => (
                "Create a personalised scheduling link for the lead.",
                schema(
                    &[
                        ("lead_id", "string", "Lead identifier"),
                        ("event_type", "string", "Meeting type slug, defaults to the intro call"),
                    ],
                    &["lead_id"],
                ),
            ),
            Self::ConfirmMeeting => (
                "Record the final scheduling outcome.",
                schema(
                    &[
                        ("success", "boolean", "Whether a meeting link was issued"),
                        ("meeting_url", "string", "Scheduling link sent to the lead"),
                        ("event_type", "string", "Meeting type slug"),
                    ],
                    &["success", "meeting_url", "event_type"],
                ),
            ),
        };

        ToolSpec { name: self.name(), description, parameters }
    }
}

fn schema(properties: &[(&str, &str, &str)], required: &[&str]) -> Value {
    let properties: Map<String, Value> = properties
        .iter()
        .map(|(name, kind, description)| {
            ((*name).to_string(), json!({"type": kind, "description": description}))
        })
        .collect();
    json!({"type": "object", "properties": properties, "required": required})
}

/// Action descriptor exposed to the reasoning service.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Clone, Debug)]
pub struct ToolRegistry {
    role: AgentRole,
    actions: Vec<ToolAction>,
    specs: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn for_role(role: AgentRole) -> Self {
        let actions = match role {
            AgentRole::Qualifier => vec![
                ToolAction::GetLead,
                ToolAction::FindLeadByEmail,
                ToolAction::MarkLeadQualified,
            ],
            AgentRole::OutboundContact => vec![
                ToolAction::GetLead,
                ToolAction::ListConversationMessages,
                ToolAction::SendOutreachEmail,
                ToolAction::RecordContactOutcome,
            ],
            AgentRole::MeetingScheduler => vec![
                ToolAction::GetLead,
                ToolAction::ListConversationMessages,
                ToolAction::CreateMeetingLink,
                ToolAction::ConfirmMeeting,
            ],
        };
        let specs = actions.iter().map(ToolAction::spec).collect();
        Self { role, actions, specs }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn exposes(&self, action: ToolAction) -> bool {
        self.actions.contains(&action)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ToolExecutionError {
    #[error("unknown action `{0}`")]
    UnknownTool(String),
    #[error("action `{action}` is not available to the {role} agent")]
    NotExposed { action: String, role: AgentRole },
    #[error("invalid arguments for `{action}`: {message}")]
    InvalidArguments { action: &'static str, message: String },
    #[error("store operation failed: {0}")]
    Store(String),
    #[error("action panicked: {0}")]
    Panicked(String),
}

impl From<RepositoryError> for ToolExecutionError {
    fn from(value: RepositoryError) -> Self {
        Self::Store(value.to_string())
    }
}

/// Serialized outcome of one proposed action.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub action: Option<ToolAction>,
    pub output: Value,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Static inputs the side-effecting actions need besides the store.
#[derive(Clone, Debug)]
pub struct ToolSettings {
    pub scheduling_base_url: String,
    pub default_event_type: String,
}

impl From<&AgentsConfig> for ToolSettings {
    fn from(config: &AgentsConfig) -> Self {
        Self {
            scheduling_base_url: config.scheduling_base_url.clone(),
            default_event_type: config.default_event_type.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ToolExecutor {
    store: Arc<dyn CrmStore>,
    settings: Arc<ToolSettings>,
}

impl ToolExecutor {
    pub fn new(store: Arc<dyn CrmStore>, settings: ToolSettings) -> Self {
        Self { store, settings: Arc::new(settings) }
    }

    /// Runs one proposed action. Never fails: every error, including a panic
    /// inside the action, comes back as an `{"error": ...}` result.
    pub async fn execute(&self, registry: &ToolRegistry, call: &ToolCall) -> ToolResult {
        let action = ToolAction::from_name(&call.name);
        let outcome = match AssertUnwindSafe(self.dispatch(registry, action, call))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(ToolExecutionError::Panicked(panic_message(panic.as_ref()))),
        };

        match outcome {
            Ok(output) => {
                tracing::debug!(
                    event_name = "agent.tool.succeeded",
                    agent_role = %registry.role(),
                    tool = %call.name,
                    call_id = %call.call_id,
                    "tool call succeeded"
                );
                ToolResult {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    action,
                    output,
                    error: None,
                }
            }
            Err(error) => {
                let message = error.to_string();
                tracing::warn!(
                    event_name = "agent.tool.failed",
                    agent_role = %registry.role(),
                    tool = %call.name,
                    call_id = %call.call_id,
                    error = %message,
                    "tool call failed"
                );
                ToolResult {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    action,
                    output: json!({ "error": message }),
                    error: Some(message),
                }
            }
        }
    }

    async fn dispatch(
        &self,
        registry: &ToolRegistry,
        action: Option<ToolAction>,
        call: &ToolCall,
    ) -> Result<Value, ToolExecutionError> {
        let action = action.ok_or_else(|| ToolExecutionError::UnknownTool(call.name.clone()))?;
        if !registry.exposes(action) {
            return Err(ToolExecutionError::NotExposed {
                action: call.name.clone(),
                role: registry.role(),
            });
        }
        let args = Arguments::parse(action, &call.arguments)?;

        match action {
            ToolAction::GetLead => {
                let lead = self.store.get_lead(&LeadId(args.required_str("lead_id")?)).await?;
                to_payload(&lead)
            }
            ToolAction::FindLeadByEmail => {
                let lead = self.store.find_lead_by_email(&args.required_str("email")?).await?;
                to_payload(&lead)
            }
            ToolAction::MarkLeadQualified => {
                let lead_id = LeadId(args.required_str("lead_id")?);
                let qualified = args.required_bool("qualified")?;
                let reason = args.required_str("reason")?;
                let updated = if qualified {
                    self.store.mark_qualified(&lead_id, &reason).await?
                } else {
                    self.store.mark_unqualified(&lead_id, &reason).await?
                };
                Ok(match updated {
                    Some(lead) => json!({
                        "lead_id": lead.id,
                        "qualified": qualified,
                        "reason": reason,
                        "status": lead.status,
                    }),
                    None => Value::Null,
                })
            }
            ToolAction::ListConversationMessages => {
                let conversation_id = ConversationId(args.required_str("conversation_id")?);
                let messages = self.store.list_messages_for_conversation(&conversation_id).await?;
                to_payload(&messages)
            }
            ToolAction::SendOutreachEmail => self.send_outreach_email(&args).await,
            ToolAction::RecordContactOutcome => Ok(json!({
                "success": args.required_bool("success")?,
                "message": args.required_str("message")?,
                "contact_method": args.required_str("contact_method")?,
                "recorded": true,
            })),
            ToolAction::CreateMeetingLink => self.create_meeting_link(&args).await,
            ToolAction::ConfirmMeeting => Ok(json!({
                "success": args.required_bool("success")?,
                "meeting_url": args.required_str("meeting_url")?,
                "event_type": args.required_str("event_type")?,
                "recorded": true,
            })),
        }
    }

    async fn send_outreach_email(&self, args: &Arguments<'_>) -> Result<Value, ToolExecutionError> {
        let lead_id = LeadId(args.required_str("lead_id")?);
        let conversation_id = ConversationId(args.required_str("conversation_id")?);
        let subject = args.required_str("subject")?;
        let body = args.required_str("body")?;

        let Some(lead) = self.store.get_lead(&lead_id).await? else {
            return Ok(Value::Null);
        };
        if self.store.get_conversation(&conversation_id).await?.is_none() {
            return Err(ToolExecutionError::InvalidArguments {
                action: ToolAction::SendOutreachEmail.name(),
                message: format!("conversation `{conversation_id}` does not exist"),
            });
        }

        let mut metadata = Metadata::new();
        metadata.insert("subject".to_string(), json!(subject));
        metadata.insert("recipient".to_string(), json!(lead.email));
        metadata.insert("delivery".to_string(), json!("queued"));

        let message = self
            .store
            .create_message(NewMessage {
                conversation_id,
                sender: "agent".to_string(),
                content: format!("Subject: {subject}\n\n{body}"),
                message_type: "email".to_string(),
                metadata,
            })
            .await?;

        Ok(json!({
            "message_id": message.id.0,
            "recipient": lead.email,
            "status": "queued",
        }))
    }

    async fn create_meeting_link(&self, args: &Arguments<'_>) -> Result<Value, ToolExecutionError> {
        let lead_id = LeadId(args.required_str("lead_id")?);
        let event_type = args
            .optional_str("event_type")?
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.settings.default_event_type.clone());

        let Some(lead) = self.store.get_lead(&lead_id).await? else {
            return Ok(Value::Null);
        };

        let meeting_url = scheduling_link(
            &self.settings.scheduling_base_url,
            &event_type,
            lead.name.as_deref(),
            &lead.email,
        )
        .map_err(|message| ToolExecutionError::InvalidArguments {
            action: ToolAction::CreateMeetingLink.name(),
            message,
        })?;

        Ok(json!({ "meeting_url": meeting_url, "event_type": event_type }))
    }
}

/// Builds `<base>/<event_type>?name=..&email=..` with proper escaping.
pub fn scheduling_link(
    base_url: &str,
    event_type: &str,
    name: Option<&str>,
    email: &str,
) -> Result<String, String> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|e| format!("invalid scheduling base url `{base_url}`: {e}"))?;
    url.path_segments_mut()
        .map_err(|_| format!("scheduling base url `{base_url}` cannot carry a path"))?
        .pop_if_empty()
        .push(event_type);
    {
        let mut query = url.query_pairs_mut();
        if let Some(name) = name.filter(|value| !value.trim().is_empty()) {
            query.append_pair("name", name);
        }
        query.append_pair("email", email);
    }
    Ok(url.to_string())
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, ToolExecutionError> {
    serde_json::to_value(value)
        .map_err(|e| ToolExecutionError::Store(format!("result could not be serialized: {e}")))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Arguments<'a> {
    action: &'static str,
    values: &'a Map<String, Value>,
}

impl<'a> Arguments<'a> {
    fn parse(action: ToolAction, raw: &'a Value) -> Result<Self, ToolExecutionError> {
        match raw {
            Value::Object(values) => Ok(Self { action: action.name(), values }),
            _ => Err(ToolExecutionError::InvalidArguments {
                action: action.name(),
                message: "arguments must be a JSON object".to_string(),
            }),
        }
    }

    fn invalid(&self, message: String) -> ToolExecutionError {
        ToolExecutionError::InvalidArguments { action: self.action, message }
    }

    fn required_str(&self, key: &str) -> Result<String, ToolExecutionError> {
        match self.values.get(key) {
            Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.clone()),
            Some(Value::String(_)) => Err(self.invalid(format!("`{key}` must not be empty"))),
            Some(_) => Err(self.invalid(format!("`{key}` must be a string"))),
            None => Err(self.invalid(format!("missing required argument `{key}`"))),
        }
    }

    fn optional_str(&self, key: &str) -> Result<Option<String>, ToolExecutionError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(_) => Err(self.invalid(format!("`{key}` must be a string"))),
        }
    }

    fn required_bool(&self, key: &str) -> Result<bool, ToolExecutionError> {
        match self.values.get(key) {
            Some(Value::Bool(value)) => Ok(*value),
            Some(Value::String(value)) if value.eq_ignore_ascii_case("true") => Ok(true),
            Some(Value::String(value)) if value.eq_ignore_ascii_case("false") => Ok(false),
            Some(_) => Err(self.invalid(format!("`{key}` must be a boolean"))),
            None => Err(self.invalid(format!("missing required argument `{key}`"))),
        }
    }
}
