use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadflow_core::config::AppConfig;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::{load_config, CommandResult};

const CONFIG_CANDIDATES: &[&str] = &["leadflow.toml", "config/leadflow.toml"];

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

fn field(key: &'static str, env_keys: &'static [&'static str], value: impl Into<String>) -> Field {
    Field { key, env_keys, value: value.into() }
}

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        field("database.url", &["LEADFLOW_DATABASE_URL"], &config.database.url),
        field(
            "database.max_connections",
            &["LEADFLOW_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        field(
            "database.timeout_secs",
            &["LEADFLOW_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        field("llm.provider", &["LEADFLOW_LLM_PROVIDER"], config.llm.provider.as_str()),
        field("llm.model", &["LEADFLOW_LLM_MODEL"], &config.llm.model),
        field("llm.base_url", &["LEADFLOW_LLM_BASE_URL"], config.llm_base_url()),
        field("llm.api_key", &["LEADFLOW_LLM_API_KEY"], redact_secret(config.llm.api_key.as_ref())),
        field(
            "llm.timeout_secs",
            &["LEADFLOW_LLM_TIMEOUT_SECS"],
            config.llm.timeout_secs.to_string(),
        ),
        field(
            "agents.max_iterations",
            &["LEADFLOW_AGENTS_MAX_ITERATIONS"],
            config.agents.max_iterations.to_string(),
        ),
        field(
            "agents.company_name",
            &["LEADFLOW_AGENTS_COMPANY_NAME"],
            &config.agents.company_name,
        ),
        field("agents.sender_name", &["LEADFLOW_AGENTS_SENDER_NAME"], &config.agents.sender_name),
        field(
            "agents.scheduling_base_url",
            &["LEADFLOW_AGENTS_SCHEDULING_BASE_URL"],
            &config.agents.scheduling_base_url,
        ),
        field(
            "agents.default_event_type",
            &["LEADFLOW_AGENTS_DEFAULT_EVENT_TYPE"],
            &config.agents.default_event_type,
        ),
        field(
            "agents.fallback_meeting_url",
            &["LEADFLOW_AGENTS_FALLBACK_MEETING_URL"],
            &config.agents.fallback_meeting_url,
        ),
        field(
            "workflow.gate_on_contact_success",
            &["LEADFLOW_WORKFLOW_GATE_ON_CONTACT_SUCCESS"],
            config.workflow.gate_on_contact_success.to_string(),
        ),
        field(
            "server.bind_address",
            &["LEADFLOW_SERVER_BIND_ADDRESS"],
            &config.server.bind_address,
        ),
        field("server.port", &["LEADFLOW_SERVER_PORT"], config.server.port.to_string()),
        field(
            "server.graceful_shutdown_secs",
            &["LEADFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs.to_string(),
        ),
        field(
            "logging.level",
            &["LEADFLOW_LOGGING_LEVEL", "LEADFLOW_LOG_LEVEL"],
            &config.logging.level,
        ),
        field(
            "logging.format",
            &["LEADFLOW_LOGGING_FORMAT", "LEADFLOW_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_lowercase(),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    CONFIG_CANDIDATES.iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps a recognisable prefix such as `sk-` and hides the rest.
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::redact_secret;

    #[test]
    fn secrets_are_never_rendered_in_full() {
        let key = SecretString::from("sk-live-abcdef123456".to_string());
        assert_eq!(redact_secret(Some(&key)), "sk-***");

        let opaque = SecretString::from("abcdef123456".to_string());
        assert_eq!(redact_secret(Some(&opaque)), "<redacted>");

        assert_eq!(redact_secret(None), "<unset>");
    }
}
