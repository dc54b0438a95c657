use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod db;
mod ingest;
mod llm;
mod pipeline;
mod report;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::db::db_pool::build_pool;
use crate::ingest::schema::ensure_metrics_table;
use crate::llm::CompletionClient;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;
use crate::web::templates::init_templates;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = CliArgs::parse();

    let config = AppConfig::new(&args).inspect_err(|e| error!("Invalid configuration: {}", e))?;

    let data_dir = Path::new(&config.data_dir);
    if !data_dir.exists() {
        info!("Creating data directory {}", data_dir.display());
        std::fs::create_dir_all(data_dir)?;
    }

    let pool = build_pool(&config.database)?;
    {
        let conn = pool.get()?;
        ensure_metrics_table(&conn, &config.database.metrics_table)?;
    }

    info!("Initializing completion client with backend: {}", config.llm.backend);
    let completion = CompletionClient::from_config(&config.llm)?;

    let template_env = init_templates()?;
    let web_config = config.web.clone();
    let app_state = Arc::new(AppState::new(config, pool, completion, template_env));

    info!("Starting perf-insights on {}:{}", web_config.host, web_config.port);
    web::run_server(web_config, app_state)
        .await
        .inspect_err(|e| error!("Server error: {}", e))?;
    info!("Server stopped");

    Ok(())
}
