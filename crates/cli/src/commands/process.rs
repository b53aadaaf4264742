use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use leadflow_agent::llm::{OpenAiCompatibleClient, ReasoningService};
use leadflow_agent::workflow::{WorkflowOrchestrator, WorkflowResult};
use leadflow_core::config::AppConfig;
use leadflow_db::{connect_with_settings, migrations, CrmStore, SqlCrmStore};
use serde_json::Value;

use crate::commands::{escape_json, load_config, runtime, CommandFailure, CommandResult};

/// Exit code for a run that finished in the workflow's error state.
pub const WORKFLOW_ERROR_EXIT_CODE: u8 = 6;

pub fn run(path: &Path) -> CommandResult {
    let payload = match read_payload(path) {
        Ok(payload) => payload,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("process", error_class, message, exit_code);
        }
    };
    let config = match load_config("process") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let service = match OpenAiCompatibleClient::from_config(&config) {
        Ok(service) => service,
        Err(error) => {
            return CommandResult::failure("process", "reasoning_service", error.to_string(), 8);
        }
    };

    run_with_service(&config, payload, Arc::new(service))
}

/// Runs one workflow against the configured database with the given service.
pub fn run_with_service(
    config: &AppConfig,
    payload: Value,
    service: Arc<dyn ReasoningService>,
) -> CommandResult {
    let runtime = match runtime("process") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let outcome = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let store: Arc<dyn CrmStore> = Arc::new(SqlCrmStore::new(pool.clone()));
        let orchestrator = WorkflowOrchestrator::new(store, service, config);
        let result = orchestrator.process_lead_workflow(payload).await;
        pool.close().await;
        Ok::<WorkflowResult, CommandFailure>(result)
    });

    match outcome {
        Ok(result) => render(&result),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("process", error_class, message, exit_code)
        }
    }
}

fn read_payload(path: &Path) -> Result<Value, CommandFailure> {
    let raw = if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|error| ("input", format!("failed to read stdin: {error}"), 7u8))?;
        buffer
    } else {
        fs::read_to_string(path).map_err(|error| {
            ("input", format!("failed to read `{}`: {error}", path.display()), 7u8)
        })?
    };

    serde_json::from_str(&raw)
        .map_err(|error| ("input", format!("lead payload is not valid JSON: {error}"), 7u8))
}

fn render(result: &WorkflowResult) -> CommandResult {
    let exit_code = if result.is_completed() { 0 } else { WORKFLOW_ERROR_EXIT_CODE };
    let output = serde_json::to_string_pretty(result).unwrap_or_else(|error| {
        format!(
            "{{\"status\":\"error\",\"error\":\"result serialization failed: {}\"}}",
            escape_json(&error.to_string())
        )
    });
    CommandResult { exit_code, output }
}
