use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{
    generate,
    generator::ImageGenerator,
    storage::{BlobStore, RecordStore},
    web_pages,
};

#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<dyn ImageGenerator>,
    pub blobs: Arc<dyn BlobStore>,
    pub records: Arc<dyn RecordStore>,
    /// Used to fetch model output before it is copied into the blob store.
    pub http: reqwest::Client,
    pub public_base_url: String,
}

/// `blob_dir` is served under `/blobs`, matching the URLs the local blob store hands out.
pub fn build_router(state: AppState, blob_dir: &Path, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(web_pages::index_page))
        .route("/health", get(web_pages::health))
        .route(
            "/api/generate",
            post(generate::generate).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/generations/{id}", get(web_pages::generation_json))
        .route("/start/{id}", get(web_pages::results_page))
        .nest_service("/blobs", ServeDir::new(blob_dir))
        .fallback(web_pages::fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
