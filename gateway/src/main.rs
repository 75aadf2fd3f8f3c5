use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use climate_map::{DataCache, DataPaths, Dataset, FilterOptions};

mod routes;

#[derive(Clone)]
pub struct AppState {
    pub data: Arc<Dataset>,
    pub options: Arc<FilterOptions>,
}

impl AppState {
    pub fn new(data: Dataset) -> Self {
        let options = FilterOptions::from_countries(&data.countries);
        Self {
            data: Arc::new(data),
            options: Arc::new(options),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "climate_map_gateway=debug,climate_map=info,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = PathBuf::from(
        std::env::var("CLIMATE_MAP_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
    );
    let paths = DataPaths::in_dir(&data_dir);

    // Inputs are read once; a reload needs a restart
    let mut cache = DataCache::new();
    let data = Dataset::load(&paths, &mut cache)
        .with_context(|| format!("failed to load map data from {}", data_dir.display()))?;

    let state = AppState::new(data);
    tracing::info!(
        "   Loaded {} countries, {} aggregates, {} regions, {} income groups",
        state.data.countries.len(),
        state.data.aggregates.len(),
        state.options.regions.len(),
        state.options.income_groups.len()
    );

    let app = routes::router(state);

    let port = std::env::var("CLIMATE_MAP_PORT")
        .or_else(|_| std::env::var("PORT"))
        .unwrap_or_else(|_| "18610".to_string());
    let addr = format!("0.0.0.0:{}", port);

    tracing::info!("Climate map gateway starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
