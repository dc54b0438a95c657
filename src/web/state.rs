use minijinja::Environment;

use crate::config::AppConfig;
use crate::db::db_pool::DbPool;
use crate::ingest::IngestManager;
use crate::llm::CompletionClient;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub completion: CompletionClient,
    pub ingest: IngestManager,
    pub template_env: Environment<'static>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db_pool: DbPool,
        completion: CompletionClient,
        template_env: Environment<'static>,
    ) -> Self {
        let ingest = IngestManager::new(db_pool.clone(), &config.database.metrics_table);

        Self {
            config,
            db_pool,
            completion,
            ingest,
            template_env,
            startup_time: chrono::Utc::now(),
        }
    }

    pub fn metrics_table(&self) -> &str {
        &self.config.database.metrics_table
    }
}
