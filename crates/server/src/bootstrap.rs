use std::sync::Arc;

use leadflow_agent::llm::{OpenAiCompatibleClient, ServiceCallError};
use leadflow_agent::workflow::WorkflowOrchestrator;
use leadflow_core::config::{AppConfig, ConfigError, LoadOptions};
use leadflow_db::{connect_with_settings, migrations, CrmStore, DbPool, SqlCrmStore};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<WorkflowOrchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("reasoning service client could not be built: {0}")]
    ReasoningService(#[source] ServiceCallError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let service =
        OpenAiCompatibleClient::from_config(&config).map_err(BootstrapError::ReasoningService)?;
    info!(
        event_name = "system.bootstrap.reasoning_service_ready",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        endpoint = %service.endpoint(),
        "reasoning service client configured"
    );

    let store: Arc<dyn CrmStore> = Arc::new(SqlCrmStore::new(db_pool.clone()));
    let orchestrator = Arc::new(WorkflowOrchestrator::new(store, Arc::new(service), &config));

    Ok(Application { config, db_pool, orchestrator })
}
