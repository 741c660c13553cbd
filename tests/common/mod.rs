#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use illusion_relay::{
    AppState, build_router,
    generator::{GenerationInput, GeneratorError, ImageGenerator},
    record::{GenerationId, GenerationRecord},
    storage::{LocalFileStorage, MemoryRecordStore, RecordStore},
};
use image::{DynamicImage, ImageFormat, RgbaImage};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub struct TestApp {
    pub address: String,
    pub blob_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn(generator: Arc<dyn ImageGenerator>, records: Arc<dyn RecordStore>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind random port");
        let address = format!("http://{}", listener.local_addr().unwrap());
        let blob_dir = tempfile::tempdir().expect("Failed to create blob dir");

        let state = AppState {
            generator,
            blobs: Arc::new(LocalFileStorage::new(
                blob_dir.path().to_path_buf(),
                format!("{address}/blobs"),
            )),
            records,
            http: reqwest::Client::new(),
            public_base_url: address.clone(),
        };
        let router = build_router(state, blob_dir.path(), MAX_UPLOAD_BYTES);
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("server crashed");
        });

        Self {
            address,
            blob_dir,
            client: reqwest::Client::new(),
        }
    }

    pub async fn post_generate(&self, form: reqwest::multipart::Form) -> reqwest::Response {
        self.client
            .post(format!("{}/api/generate", self.address))
            .multipart(form)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub fn stored_blobs(&self) -> Vec<String> {
        std::fs::read_dir(self.blob_dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect()
    }
}

/// Stands in for the hosted model: records what it was asked and answers
/// with a fixed URL after an optional delay.
pub struct FakeGenerator {
    output_url: Option<String>,
    delay: Duration,
    calls: Mutex<Vec<GenerationInput>>,
}

impl FakeGenerator {
    pub fn returning(url: impl Into<String>) -> Self {
        Self {
            output_url: Some(url.into()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            output_url: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<GenerationInput> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageGenerator for FakeGenerator {
    async fn generate(&self, input: &GenerationInput) -> Result<String, GeneratorError> {
        tokio::time::sleep(self.delay).await;
        self.calls.lock().unwrap().push(input.clone());
        match &self.output_url {
            Some(url) => Ok(url.clone()),
            None => Err(GeneratorError::Failed {
                id: "fake".to_string(),
                status: "failed".to_string(),
                message: "model crashed".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Reads work, writes always fail.
pub struct BrokenRecordStore;

#[async_trait]
impl RecordStore for BrokenRecordStore {
    async fn put(&self, _id: &GenerationId, _record: &GenerationRecord) -> anyhow::Result<()> {
        Err(anyhow!("connection reset by peer"))
    }

    async fn get(&self, _id: &GenerationId) -> anyhow::Result<Option<GenerationRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Err(anyhow!("connection refused"))
    }
}

pub fn memory_store() -> Arc<MemoryRecordStore> {
    Arc::new(MemoryRecordStore::new())
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let rgba = RgbaImage::from_pixel(width, height, image::Rgba([200, 100, 50, 255]));
    let mut output = Vec::new();
    DynamicImage::ImageRgba8(rgba)
        .write_to(&mut std::io::Cursor::new(&mut output), ImageFormat::Png)
        .unwrap();
    output
}

pub fn generate_form(prompt: &str, scale: &str) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(png_bytes(4, 4))
        .file_name("input.png")
        .mime_str("image/png")
        .unwrap();
    reqwest::multipart::Form::new()
        .part("file", part)
        .text("prompt", prompt.to_string())
        .text("conditioningScale", scale.to_string())
}
