use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use dan_engine::config;
use dan_mcp::use_cases::{EntryUseCase, NumberUseCase, ReconcileUseCase};
use dan_mcp::{MCPHandler, service, stdio};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("serving dàn tools over stdio, database {}", config.database_url);

    let service = service(&config)?;

    let entry_use_case = EntryUseCase::new(Arc::clone(&service));
    let reconcile_use_case = ReconcileUseCase::new(Arc::clone(&service));
    let number_use_case = NumberUseCase::new(config.default_width);

    let handler = MCPHandler::new(
        Arc::new(entry_use_case),
        Arc::new(reconcile_use_case),
        Arc::new(number_use_case),
    );

    let (reader, writer) = stdio();

    handler.serve(reader, writer).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;

    Ok(())
}
