//! `POST /api/generate`: upload, run the model, keep the result.

use std::time::{Duration, Instant};

use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, State},
};
use serde::{Deserialize, Serialize};

use crate::{
    app::AppState,
    error::AppError,
    generator::GenerationInput,
    image_processing,
    record::{ConditioningScale, GenerationId, GenerationRecord},
    url_validation::validate_http_url,
};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GenerateResponse {
    pub image_url: String,
    pub model_latency_ms: u64,
    pub id: String,
    pub conditioning_scale: String,
}

#[derive(Debug)]
pub struct UploadedImage {
    pub bytes: Bytes,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub struct GenerateForm {
    pub image: UploadedImage,
    pub prompt: String,
    pub conditioning_scale: ConditioningScale,
}

struct RawFile {
    content_type: Option<String>,
    bytes: Bytes,
}

pub async fn generate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<GenerateResponse>, AppError> {
    let form = read_form(multipart).await?;
    let id = GenerationId::generate();
    tracing::info!(
        %id,
        width = form.image.width,
        height = form.image.height,
        size = form.image.bytes.len(),
        scale = form.conditioning_scale.raw(),
        "generation requested"
    );

    let input = GenerationInput::new(
        form.prompt.clone(),
        image_processing::to_data_uri(&form.image.mime_type, &form.image.bytes),
        form.conditioning_scale.normalized(),
    );

    let started = Instant::now();
    let output_url = state.generator.generate(&input).await?;
    let model_latency_ms = round_millis(started.elapsed());
    tracing::info!(%id, model = state.generator.name(), model_latency_ms, "model finished");

    let bytes = download_image(&state.http, &output_url).await?;
    let blob_key = id.blob_key();
    let image_url = state
        .blobs
        .put(&blob_key, &bytes)
        .await
        .map_err(AppError::Storage)?;

    let record = GenerationRecord::new(
        form.prompt,
        image_url.clone(),
        model_latency_ms,
        form.conditioning_scale.raw(),
    );
    if let Err(err) = state.records.put(&id, &record).await {
        tracing::error!(%id, "record write failed, removing uploaded image: {err:#}");
        if let Err(cleanup) = state.blobs.delete(&blob_key).await {
            tracing::warn!(%id, key = %blob_key, "orphaned image left in blob store: {cleanup:#}");
        }
        return Err(AppError::Storage(err));
    }
    tracing::info!(%id, %image_url, "generation stored");

    Ok(Json(GenerateResponse {
        image_url,
        model_latency_ms,
        id: id.to_string(),
        conditioning_scale: form.conditioning_scale.raw().to_string(),
    }))
}

pub fn round_millis(elapsed: Duration) -> u64 {
    ((elapsed.as_micros() + 500) / 1000) as u64
}

/// Reads `file`, `prompt` and `conditioningScale`, rejecting the request
/// before anything is sent upstream.
pub async fn read_form(mut multipart: Multipart) -> Result<GenerateForm, AppError> {
    let mut file = None;
    let mut prompt = None;
    let mut scale = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadRequest(format!("failed to read form: {err}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::BadRequest(format!("failed to read file: {err}")))?;
                file = Some(RawFile {
                    content_type,
                    bytes,
                });
            }
            Some("prompt") => {
                prompt = Some(field.text().await.map_err(|err| {
                    AppError::BadRequest(format!("failed to read prompt: {err}"))
                })?);
            }
            Some("conditioningScale") => {
                scale = Some(field.text().await.map_err(|err| {
                    AppError::BadRequest(format!("failed to read conditioningScale: {err}"))
                })?);
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::BadRequest("file is required".to_string()))?;
    let image = validate_image(file)?;

    // Blank prompts are rejected; anything else is forwarded and stored as sent.
    let prompt = prompt
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("prompt is required".to_string()))?;

    let scale = scale
        .ok_or_else(|| AppError::BadRequest("conditioningScale is required".to_string()))?;
    let conditioning_scale = ConditioningScale::parse(&scale)?;

    Ok(GenerateForm {
        image,
        prompt,
        conditioning_scale,
    })
}

fn validate_image(file: RawFile) -> Result<UploadedImage, AppError> {
    if file.bytes.is_empty() {
        return Err(AppError::BadRequest("file is empty".to_string()));
    }
    let declared = file
        .content_type
        .as_deref()
        .map(image_processing::essence)
        .filter(|mime| mime.starts_with("image/"));
    if let Some(content_type) = file.content_type.as_deref() {
        let essence = image_processing::essence(content_type);
        if !essence.starts_with("image/") && essence != "application/octet-stream" {
            return Err(AppError::BadRequest(format!(
                "file must be an image, got {essence}"
            )));
        }
    }
    let mime_type = image_processing::detect_mime_type(&file.bytes)
        .map(str::to_string)
        .or(declared)
        .ok_or_else(|| AppError::BadRequest("unsupported image type".to_string()))?;
    let (width, height) = image_processing::get_dimensions(&file.bytes, &mime_type)
        .map_err(|err| AppError::BadRequest(format!("unreadable image: {err}")))?;
    Ok(UploadedImage {
        bytes: file.bytes,
        mime_type,
        width,
        height,
    })
}

async fn download_image(client: &reqwest::Client, url: &str) -> Result<Bytes, AppError> {
    let url = validate_http_url(url)?;
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|err| AppError::BadGateway(format!("fetch {url} failed: {err}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::BadGateway(format!("fetch {url} failed: HTTP {status}")));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|err| AppError::BadGateway(format!("read {url} failed: {err}")))?;
    if bytes.is_empty() {
        return Err(AppError::BadGateway(format!("fetch {url} returned no data")));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processing::tests::tiny_png;

    #[test]
    fn rounds_to_whole_milliseconds() {
        assert_eq!(round_millis(Duration::from_micros(1_499)), 1);
        assert_eq!(round_millis(Duration::from_micros(1_500)), 2);
        assert_eq!(round_millis(Duration::ZERO), 0);
    }

    #[test]
    fn sniffs_type_when_part_has_none() {
        let image = validate_image(RawFile {
            content_type: None,
            bytes: Bytes::from(tiny_png()),
        })
        .unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!((image.width, image.height), (2, 3));
    }

    #[test]
    fn sniffed_type_wins_over_declared() {
        let image = validate_image(RawFile {
            content_type: Some("image/jpeg".into()),
            bytes: Bytes::from(tiny_png()),
        })
        .unwrap();
        assert_eq!(image.mime_type, "image/png");
    }

    #[test]
    fn rejects_non_images() {
        let err = validate_image(RawFile {
            content_type: Some("text/plain".into()),
            bytes: Bytes::from_static(b"hello"),
        })
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = validate_image(RawFile {
            content_type: Some("image/png".into()),
            bytes: Bytes::from_static(b"not really a png"),
        })
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = validate_image(RawFile {
            content_type: Some("image/png".into()),
            bytes: Bytes::new(),
        })
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref msg) if msg == "file is empty"));
    }
}
