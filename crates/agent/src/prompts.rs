use tera::{Context, Tera};

use leadflow_core::config::AgentsConfig;

use crate::tools::AgentRole;

const QUALIFIER_TEMPLATE: &str = r#"You are the lead qualification specialist for {{ company_name }}.
Decide whether the inbound lead in the user message is worth pursuing.

Look for concrete buying signals: an explicit budget, team or seat count, a timeline
or urgency, and a company that plausibly needs the product. Generic curiosity with
none of these signals is not qualified.

You may call get_lead or find_lead_by_email to read the stored record. Record your
verdict with mark_lead_qualified. Finish with a single JSON object and no other text:
{"qualified": true|false, "reason": "<one sentence>"}"#;

const OUTBOUND_TEMPLATE: &str = r#"You are {{ sender_name }}, reaching out on behalf of {{ company_name }}.
The lead in the user message has been qualified. Write a short, personal first email
that references what they told us and proposes a {{ default_event_type }}.

Use send_outreach_email with the lead_id and conversation_id from the user message,
then call record_contact_outcome. Finish with a single JSON object and no other text:
{"success": true|false, "message": "<what was sent>", "contact_method": "email"}"#;

const SCHEDULER_TEMPLATE: &str = r#"You schedule meetings for {{ company_name }}.
The lead in the user message has been contacted. Create a scheduling link with
create_meeting_link (event type {{ default_event_type }} unless the lead asked for
something else) and confirm it with confirm_meeting.
Finish with a single JSON object and no other text:
{"success": true|false, "meeting_url": "<link>", "event_type": "<slug>"}"#;

/// Renders role system prompts from the agent settings.
#[derive(Clone, Debug)]
pub struct PromptLibrary {
    company_name: String,
    sender_name: String,
    default_event_type: String,
}

impl PromptLibrary {
    pub fn new(config: &AgentsConfig) -> Self {
        Self {
            company_name: config.company_name.clone(),
            sender_name: config.sender_name.clone(),
            default_event_type: config.default_event_type.clone(),
        }
    }

    pub fn template(role: AgentRole) -> &'static str {
        match role {
            AgentRole::Qualifier => QUALIFIER_TEMPLATE,
            AgentRole::OutboundContact => OUTBOUND_TEMPLATE,
            AgentRole::MeetingScheduler => SCHEDULER_TEMPLATE,
        }
    }

    /// Falls back to the raw template when rendering fails.
    pub fn system_prompt(&self, role: AgentRole) -> String {
        self.render(role, Self::template(role))
    }

    fn render(&self, role: AgentRole, template: &str) -> String {
        let mut context = Context::new();
        context.insert("company_name", &self.company_name);
        context.insert("sender_name", &self.sender_name);
        context.insert("default_event_type", &self.default_event_type);

        match Tera::one_off(template, &context, false) {
            Ok(rendered) => rendered,
            Err(error) => {
                tracing::warn!(
                    event_name = "agent.prompt.render_failed",
                    agent_role = %role,
                    error = %error,
                    "prompt template failed to render, using raw template"
                );
                template.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use leadflow_core::config::AppConfig;

    use super::PromptLibrary;
    use crate::tools::AgentRole;

    fn library() -> PromptLibrary {
        let mut config = AppConfig::default();
        config.agents.company_name = "Acme Analytics".to_string();
        config.agents.sender_name = "Riley".to_string();
        PromptLibrary::new(&config.agents)
    }

    #[test]
    fn prompts_are_rendered_with_agent_settings() {
        let library = library();

        let outbound = library.system_prompt(AgentRole::OutboundContact);
        assert!(outbound.starts_with("You are Riley, reaching out on behalf of Acme Analytics."));
        assert!(outbound.contains("proposes a intro_call"));
        assert!(!outbound.contains("{{"));
    }

    #[test]
    fn json_braces_in_templates_survive_rendering() {
        let prompt = library().system_prompt(AgentRole::Qualifier);
        assert!(prompt.contains(r#"{"qualified": true|false, "reason": "<one sentence>"}"#));
    }

    #[test]
    fn broken_template_falls_back_to_raw_text() {
        let raw = "Hello {{ unclosed";
        assert_eq!(library().render(AgentRole::Qualifier, raw), raw);
    }
}
