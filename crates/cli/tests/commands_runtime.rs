use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use leadflow_agent::llm::ScriptedReasoningService;
use leadflow_cli::commands::{config, doctor, migrate, process};
use leadflow_core::config::{AppConfig, LoadOptions};
use serde_json::{json, Value};

#[test]
fn migrate_returns_success_with_in_memory_database() {
    with_env(&[("LEADFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or("").contains("schema is at version"));
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("LEADFLOW_DATABASE_URL", "postgres://localhost/leadflow")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_reports_pending_migrations_then_passes_after_migrate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = sqlite_file_url(&dir.path().join("doctor.db"));

    with_env(&[("LEADFLOW_DATABASE_URL", url.as_str())], || {
        let before = doctor::run(true);
        assert_eq!(before.exit_code, 1, "fresh database should not be ready: {}", before.output);
        let report = parse_payload(&before.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(check(&report, "config_validation")["status"], "pass");
        assert_eq!(check(&report, "reasoning_service")["status"], "pass");
        assert_eq!(check(&report, "database_readiness")["status"], "fail");

        assert_eq!(migrate::run().exit_code, 0);

        let after = doctor::run(true);
        assert_eq!(after.exit_code, 0, "migrated database should be ready: {}", after.output);
        assert_eq!(parse_payload(&after.output)["overall_status"], "pass");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("LEADFLOW_AGENTS_MAX_ITERATIONS", "0")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] reasoning_service"));
        assert!(result.output.contains("- [skip] database_readiness"));
    });
}

#[test]
fn config_redacts_api_key_and_attributes_env_sources() {
    with_env(
        &[
            ("LEADFLOW_LLM_PROVIDER", "openai"),
            ("LEADFLOW_LLM_API_KEY", "sk-top-secret-value"),
            ("LEADFLOW_AGENTS_MAX_ITERATIONS", "7"),
        ],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0, "{}", result.output);

            assert!(result
                .output
                .contains("- llm.api_key = sk-*** (source: env (LEADFLOW_LLM_API_KEY))"));
            assert!(!result.output.contains("top-secret"));
            let iterations =
                "- agents.max_iterations = 7 (source: env (LEADFLOW_AGENTS_MAX_ITERATIONS))";
            assert!(result.output.contains(iterations));
            let database = "- database.url = sqlite://leadflow.db (source: default)";
            assert!(result.output.contains(database));
        },
    );
}

#[test]
fn process_runs_the_workflow_with_a_scripted_service() {
    with_env(&[("LEADFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let config = AppConfig::load(LoadOptions::default()).expect("config");
        let service = ScriptedReasoningService::new()
            .then_text(r#"{"qualified": false, "reason": "No budget or timeline"}"#);

        let result = process::run_with_service(
            &config,
            json!({"email": "Visitor@Example.com", "message": "Just looking"}),
            Arc::new(service),
        );

        assert_eq!(result.exit_code, 0, "{}", result.output);
        let payload = parse_json(&result.output);
        assert_eq!(payload["status"], "completed");
        assert_eq!(payload["qualified"], false);
        assert_eq!(payload["workflow_completed"], true);
        assert_eq!(payload["reason"], "No budget or timeline");
        assert_eq!(payload["state"], "disqualified");
    });
}

#[test]
fn process_exits_with_workflow_error_code_for_invalid_payload() {
    with_env(&[("LEADFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let config = AppConfig::load(LoadOptions::default()).expect("config");

        let result = process::run_with_service(
            &config,
            json!({"name": "No Email"}),
            Arc::new(ScriptedReasoningService::new()),
        );

        assert_eq!(result.exit_code, process::WORKFLOW_ERROR_EXIT_CODE);
        let payload = parse_json(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["workflow_completed"], false);
    });
}

#[test]
fn process_reports_input_failure_for_missing_file() {
    with_env(&[("LEADFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let result = process::run(Path::new("/nonexistent/leadflow/lead.json"));
        assert_eq!(result.exit_code, 7);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "process");
        assert_eq!(payload["error_class"], "input");
    });
}

#[test]
fn process_degrades_when_reasoning_service_is_unreachable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let payload_path = dir.path().join("lead.json");
    fs::write(
        &payload_path,
        r#"{"name": "Ada", "email": "ada@analytical.io", "message": "Budget approved"}"#,
    )
    .expect("write payload");

    with_env(
        &[
            ("LEADFLOW_DATABASE_URL", "sqlite::memory:"),
            ("LEADFLOW_LLM_BASE_URL", "http://127.0.0.1:9/v1"),
            ("LEADFLOW_LLM_TIMEOUT_SECS", "2"),
        ],
        || {
            let result = process::run(&payload_path);
            assert_eq!(result.exit_code, 0, "{}", result.output);

            let payload = parse_json(&result.output);
            assert_eq!(payload["status"], "completed");
            assert_eq!(payload["qualified"], false);
            assert!(payload["reason"]
                .as_str()
                .unwrap_or("")
                .starts_with("error during qualification"));
        },
    );
}

fn check<'a>(report: &'a Value, name: &str) -> &'a Value {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .unwrap_or_else(|| panic!("missing check `{name}` in {report}"))
}

fn sqlite_file_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(last_line(output)).expect("command output should be valid json")
}

fn parse_json(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid json")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner());

    let keys = [
        "LEADFLOW_DATABASE_URL",
        "LEADFLOW_DATABASE_MAX_CONNECTIONS",
        "LEADFLOW_DATABASE_TIMEOUT_SECS",
        "LEADFLOW_LLM_PROVIDER",
        "LEADFLOW_LLM_API_KEY",
        "LEADFLOW_LLM_BASE_URL",
        "LEADFLOW_LLM_MODEL",
        "LEADFLOW_LLM_TIMEOUT_SECS",
        "LEADFLOW_AGENTS_MAX_ITERATIONS",
        "LEADFLOW_AGENTS_COMPANY_NAME",
        "LEADFLOW_AGENTS_SENDER_NAME",
        "LEADFLOW_AGENTS_SCHEDULING_BASE_URL",
        "LEADFLOW_AGENTS_DEFAULT_EVENT_TYPE",
        "LEADFLOW_AGENTS_FALLBACK_MEETING_URL",
        "LEADFLOW_WORKFLOW_GATE_ON_CONTACT_SUCCESS",
        "LEADFLOW_SERVER_BIND_ADDRESS",
        "LEADFLOW_SERVER_PORT",
        "LEADFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "LEADFLOW_LOGGING_LEVEL",
        "LEADFLOW_LOGGING_FORMAT",
        "LEADFLOW_LOG_LEVEL",
        "LEADFLOW_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
