//! The external image model, seen from the request handler.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub const NUM_INFERENCE_STEPS: u32 = 40;
pub const GUIDANCE_SCALE: f64 = 7.5;
pub const RANDOM_SEED: i64 = -1;
pub const NEGATIVE_PROMPT: &str = concat!(
    "Longbody, lowres, bad anatomy, bad hands, missing fingers, extra digit, fewer digits, ",
    "cropped, worst quality, low quality, blurry, poorly drawn, bad quality, ugly, nsfw, ",
    "disturbing, compressed, jpg"
);

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// API token missing or rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The prediction reached a terminal state other than success.
    #[error("prediction {id} {status}: {message}")]
    Failed {
        id: String,
        status: String,
        message: String,
    },

    #[error("prediction timed out after {0:?}")]
    Timeout(Duration),

    #[error("model returned no output")]
    EmptyOutput,

    #[error("invalid output url: {0}")]
    InvalidUrl(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Input for one generation. Serializes to the model's `input` object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationInput {
    pub qr_code_content: String,
    pub image: String,
    pub prompt: String,
    pub num_inference_steps: u32,
    pub guidance_scale: f64,
    pub seed: i64,
    pub negative_prompt: String,
    #[serde(rename = "controlnet_conditioning_scale")]
    pub conditioning_scale: f64,
}

impl GenerationInput {
    /// `conditioning_scale` is the already-normalized model value.
    pub fn new(prompt: impl Into<String>, image_uri: impl Into<String>, conditioning_scale: f64) -> Self {
        Self {
            qr_code_content: String::new(),
            image: image_uri.into(),
            prompt: prompt.into(),
            num_inference_steps: NUM_INFERENCE_STEPS,
            guidance_scale: GUIDANCE_SCALE,
            seed: RANDOM_SEED,
            negative_prompt: NEGATIVE_PROMPT.to_string(),
            conditioning_scale,
        }
    }
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Runs the model to completion and returns the URL of the first output image.
    async fn generate(&self, input: &GenerationInput) -> Result<String, GeneratorError>;

    fn name(&self) -> &str;
}
