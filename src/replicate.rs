use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::{Duration, Instant, sleep};

use crate::generator::{GenerationInput, GeneratorError, ImageGenerator};
use crate::url_validation::validate_http_url;

pub const REPLICATE_API_ROOT: &str = "https://api.replicate.com";
pub const ILLUSION_MODEL: &str = "andreasjansson/illusion";
pub const ILLUSION_VERSION: &str =
    "75d51a73fce3c00de31ed9ab4358c73e8fc0f627dc8ce975818e653317cb919b";

const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_TIMEOUT_MS: u64 = 5 * 60 * 1_000;

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    output: Option<Value>,
    error: Option<Value>,
}

/// Runs the illusion ControlNet model through the Replicate predictions API.
#[derive(Debug, Clone)]
pub struct ReplicateGenerator {
    client: Client,
    api_token: String,
    base_url: String,
    version: String,
    poll_interval: Duration,
    timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ReplicateGeneratorBuilder {
    client: Option<Client>,
    api_token: String,
    base_url: String,
    version: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl ReplicateGeneratorBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Upper bound on how long one prediction is polled for.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> ReplicateGenerator {
        ReplicateGenerator {
            client: self.client.unwrap_or_default(),
            api_token: self.api_token,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            version: self.version,
            poll_interval: self.poll_interval,
            timeout: self.timeout,
        }
    }
}

impl ReplicateGenerator {
    pub fn builder(api_token: impl Into<String>) -> ReplicateGeneratorBuilder {
        ReplicateGeneratorBuilder {
            client: None,
            api_token: api_token.into(),
            base_url: REPLICATE_API_ROOT.to_string(),
            version: ILLUSION_VERSION.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    async fn create_prediction(&self, input: &GenerationInput) -> Result<Prediction, GeneratorError> {
        let response = self
            .client
            .post(format!("{}/v1/predictions", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&json!({
                "version": self.version,
                "input": input,
            }))
            .send()
            .await?;
        let response = assert_ok_response(response).await?;
        Ok(response.json().await?)
    }

    async fn poll_prediction(&self, mut prediction: Prediction) -> Result<Prediction, GeneratorError> {
        let deadline = Instant::now() + self.timeout;
        let mut poll_count = 0u32;
        loop {
            let status = prediction.status.clone();
            match status.as_str() {
                "succeeded" => return Ok(prediction),
                "failed" | "canceled" => {
                    let message = prediction
                        .error
                        .map(|err| match err {
                            Value::String(text) => text,
                            other => other.to_string(),
                        })
                        .unwrap_or_else(|| "no error message".to_string());
                    return Err(GeneratorError::Failed {
                        id: prediction.id,
                        status: status.clone(),
                        message,
                    });
                }
                pending => {
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            prediction_id = %prediction.id,
                            poll_count,
                            "prediction did not finish before deadline"
                        );
                        return Err(GeneratorError::Timeout(self.timeout));
                    }
                    tracing::debug!(
                        prediction_id = %prediction.id,
                        status = pending,
                        poll_count,
                        "waiting for prediction"
                    );
                    sleep(self.poll_interval).await;
                }
            }

            poll_count += 1;
            let response = self
                .client
                .get(format!("{}/v1/predictions/{}", self.base_url, prediction.id))
                .bearer_auth(&self.api_token)
                .send()
                .await?;
            let response = assert_ok_response(response).await?;
            prediction = response.json().await?;
        }
    }
}

#[async_trait]
impl ImageGenerator for ReplicateGenerator {
    async fn generate(&self, input: &GenerationInput) -> Result<String, GeneratorError> {
        let prediction = self.create_prediction(input).await?;
        tracing::info!(
            prediction_id = %prediction.id,
            status = %prediction.status,
            "replicate prediction created"
        );
        let prediction = self.poll_prediction(prediction).await?;
        let image_url = first_output_url(prediction.output).ok_or(GeneratorError::EmptyOutput)?;
        validate_http_url(&image_url)?;
        Ok(image_url)
    }

    fn name(&self) -> &str {
        ILLUSION_MODEL
    }
}

async fn assert_ok_response(response: reqwest::Response) -> Result<reqwest::Response, GeneratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| body.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(text);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GeneratorError::Auth(message)),
        _ => Err(GeneratorError::Api {
            status: status.as_u16(),
            message,
        }),
    }
}

/// The model answers with a list of image URLs; older versions return a bare string.
fn first_output_url(output: Option<Value>) -> Option<String> {
    match output? {
        Value::String(url) => Some(url),
        Value::Array(items) => items.into_iter().find_map(|item| match item {
            Value::String(url) => Some(url),
            _ => None,
        }),
        _ => None,
    }
}
