use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    app::AppState,
    error::AppError,
    record::{GenerationId, GenerationRecord},
    storage::RecordStore,
};

const INDEX_HTML: &str = include_str!("../templates/index.html");
const RESULTS_HTML: &str = include_str!("../templates/results.html");
const NOT_FOUND_HTML: &str = include_str!("../templates/not_found.html");

pub const DEFAULT_OG_IMAGE: &str = "https://lavand.vercel.app/og-image.png";
pub const TWITTER_CREATOR: &str = "@nutlope";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Reads a record by the id taken from a URL. Ids that could never have been
/// issued are reported as missing rather than queried.
pub async fn lookup(
    records: &dyn RecordStore,
    raw_id: &str,
) -> Result<(GenerationId, GenerationRecord), AppError> {
    let not_found = || AppError::NotFound(format!("generation {raw_id} not found"));
    let id = GenerationId::parse(raw_id).ok_or_else(not_found)?;
    let record = records
        .get(&id)
        .await
        .map_err(AppError::Storage)?
        .ok_or_else(not_found)?;
    Ok((id, record))
}

pub async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn results_page(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match lookup(state.records.as_ref(), &id).await {
        Ok((id, record)) => {
            let share_url = format!("{}/start/{id}", state.public_base_url);
            Html(render_results(&record, &share_url)).into_response()
        }
        Err(AppError::NotFound(_)) => not_found_page(),
        Err(err) => err.into_response(),
    }
}

pub async fn generation_json(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GenerationRecord>, AppError> {
    let (_, record) = lookup(state.records.as_ref(), &id).await?;
    Ok(Json(record))
}

pub async fn health(State(state): State<AppState>) -> Response {
    match state.records.health_check().await {
        Ok(()) => Json(HealthResponse {
            status: "ok",
            details: None,
        })
        .into_response(),
        Err(err) => {
            tracing::warn!("record store health check failed: {err:#}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    details: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

pub fn not_found_page() -> Response {
    (StatusCode::NOT_FOUND, Html(NOT_FOUND_HTML)).into_response()
}

pub async fn fallback() -> Response {
    not_found_page()
}

pub fn render_results(record: &GenerationRecord, share_url: &str) -> String {
    let title = format!("Lavand: {}", record.prompt);
    let og_image = record.image.as_deref().unwrap_or(DEFAULT_OG_IMAGE);

    let image_block = match &record.image {
        Some(url) => format!(
            r#"<img src="{}" alt="{}">"#,
            escape_html(url),
            escape_html(&record.prompt)
        ),
        None => r#"<p class="meta">The image for this generation is not available.</p>"#.to_string(),
    };
    let download_link = match &record.image {
        Some(url) => format!(
            r#"<a class="primary" href="{}" download="lavand-illusion.png">Download</a>"#,
            escape_html(url)
        ),
        None => String::new(),
    };
    let latency_block = record
        .latency_seconds()
        .map(|seconds| format!(" &middot; generated in {seconds}s"))
        .unwrap_or_default();
    let website_block = record
        .website_url
        .as_deref()
        .map(|url| {
            let url = escape_html(url);
            format!(r#"<p class="meta"><a href="{url}" rel="noopener">{url}</a></p>"#)
        })
        .unwrap_or_default();

    render(
        RESULTS_HTML,
        &[
            ("title", escape_html(&title)),
            ("description", "An AI illusion generated with Lavand".to_string()),
            ("og_image", escape_html(og_image)),
            ("twitter_creator", TWITTER_CREATOR.to_string()),
            ("prompt", escape_html(&record.prompt)),
            ("image_block", image_block),
            ("conditioning_scale", escape_html(&record.conditioning_scale)),
            ("latency_block", latency_block),
            ("download_link", download_link),
            ("share_url", escape_html(share_url)),
            ("website_block", website_block),
        ],
    )
}

/// Fills `{{name}}` placeholders in a single pass over the template. Inserted
/// values are never scanned again, so text containing `{{...}}` stays literal.
/// Unknown placeholders are kept as written.
fn render(template: &str, values: &[(&str, String)]) -> String {
    let mut page = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        page.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            rest = &rest[start..];
            break;
        };
        let name = &after[..end];
        match values.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => page.push_str(value),
            None => page.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    page.push_str(rest);
    page
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
