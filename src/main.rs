use std::sync::Arc;

use anyhow::Result;

use illusion_relay::{
    AppConfig, AppState, build_router,
    config::RecordBackend,
    logging,
    replicate::ReplicateGenerator,
    storage::{FileRecordStore, LocalFileStorage, MemoryRecordStore, RecordStore, RedisRecordStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    logging::init_tracing("info,tower_http=debug");

    let generator = ReplicateGenerator::builder(config.replicate.api_token.clone())
        .base_url(config.replicate.base_url.clone())
        .version(config.replicate.version.clone())
        .poll_interval(config.replicate.poll_interval)
        .timeout(config.replicate.timeout)
        .build();

    let records: Arc<dyn RecordStore> = match &config.records {
        RecordBackend::Redis { url } => Arc::new(RedisRecordStore::connect(url).await?),
        RecordBackend::File { dir } => {
            tracing::info!(dir = %dir.display(), "Using file record store");
            Arc::new(FileRecordStore::new(dir.clone()))
        }
        RecordBackend::Memory => {
            tracing::warn!("Using in-memory record store, records are lost on restart");
            Arc::new(MemoryRecordStore::new())
        }
    };
    records.health_check().await?;

    tokio::fs::create_dir_all(&config.blob_dir).await?;
    let blobs = Arc::new(LocalFileStorage::new(
        config.blob_dir.clone(),
        config.blob_base_url(),
    ));

    let state = AppState {
        generator: Arc::new(generator),
        blobs,
        records,
        http: reqwest::Client::new(),
        public_base_url: config.public_base_url.clone(),
    };
    let router = build_router(state, &config.blob_dir, config.max_upload_bytes);

    let tcp_listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!(
        "Illusion relay started at http://{} (public {})",
        config.bind_address,
        config.public_base_url
    );

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
