use anyhow::Result;
use std::sync::Arc;

use dan_engine::{Config, DanService};

pub fn service(config: &Config) -> Result<Arc<DanService>> {
    let service = DanService::open(config)?;

    match &config.draw_api_url {
        Some(url) => tracing::info!("draw results from {}", url),
        None => tracing::info!("draw results from local store {}", config.database_url),
    }

    Ok(Arc::new(service))
}
