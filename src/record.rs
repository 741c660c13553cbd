use std::collections::HashMap;
use std::fmt;

use anyhow::{Result, anyhow};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

const ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const ID_LENGTH: usize = 7;
const MAX_ID_LENGTH: usize = 64;

pub const MIN_CONDITIONING_SCALE: i64 = 0;
pub const MAX_CONDITIONING_SCALE: i64 = 100;
const CONDITIONING_SCALE_DIVISOR: f64 = 50.0;

/// Short random identifier a generation is stored and shared under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(String);

impl GenerationId {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..ID_LENGTH)
            .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    /// Accepts ids coming back from a URL path. Anything that could not have
    /// been issued (or could escape a storage directory) is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LENGTH
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn blob_key(&self) -> String {
        format!("{}.png", self.0)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How strongly the output follows the input image, as submitted by the form
/// slider (0..=100). The raw string is kept for storage and the response.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditioningScale {
    raw: String,
    value: i64,
}

impl ConditioningScale {
    /// Integer-prefix parse: `"50"` is 50, `" 42.9"` is 42, `"abc"` is an error.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let value = parse_integer_prefix(raw).ok_or_else(|| {
            AppError::BadRequest(format!("conditioningScale must be a number, got {raw:?}"))
        })?;
        if !(MIN_CONDITIONING_SCALE..=MAX_CONDITIONING_SCALE).contains(&value) {
            return Err(AppError::BadRequest(format!(
                "conditioningScale must be between {MIN_CONDITIONING_SCALE} and {MAX_CONDITIONING_SCALE}, got {raw:?}"
            )));
        }
        Ok(Self {
            raw: raw.to_string(),
            value,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    /// The value the model expects: slider position divided by 50.
    pub fn normalized(&self) -> f64 {
        self.value as f64 / CONDITIONING_SCALE_DIVISOR
    }
}

fn parse_integer_prefix(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (sign, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1, &trimmed[1..]),
        Some(b'+') => (1, &trimmed[1..]),
        _ => (1, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    // Digit runs too long for i64 saturate so they fail the range check.
    Some(sign * digits[..end].parse::<i64>().unwrap_or(i64::MAX))
}

/// One stored generation. Field names on the wire match the hash fields the
/// results page reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_latency: Option<u64>,
    #[serde(rename = "conditioningScale", deserialize_with = "string_or_number")]
    pub conditioning_scale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl GenerationRecord {
    pub fn new(
        prompt: impl Into<String>,
        image_url: impl Into<String>,
        model_latency_ms: u64,
        conditioning_scale: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            image: Some(image_url.into()),
            model_latency: Some(model_latency_ms),
            conditioning_scale: conditioning_scale.into(),
            website_url: None,
            created_at: Some(Utc::now().to_rfc3339()),
        }
    }

    /// Latency formatted the way the results page shows it, e.g. `"12.35"`.
    pub fn latency_seconds(&self) -> Option<String> {
        self.model_latency
            .map(|ms| format!("{:.2}", ms as f64 / 1000.0))
    }

    /// Flattens the record into hash fields. Absent optionals are skipped.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("prompt", self.prompt.clone()),
            ("conditioningScale", self.conditioning_scale.clone()),
        ];
        if let Some(image) = &self.image {
            fields.push(("image", image.clone()));
        }
        if let Some(latency) = self.model_latency {
            fields.push(("model_latency", latency.to_string()));
        }
        if let Some(website_url) = &self.website_url {
            fields.push(("website_url", website_url.clone()));
        }
        if let Some(created_at) = &self.created_at {
            fields.push(("created_at", created_at.clone()));
        }
        fields
    }

    /// Rebuilds a record from hash fields. An empty hash means the key does
    /// not exist.
    pub fn from_fields(mut fields: HashMap<String, String>) -> Result<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }
        let prompt = fields
            .remove("prompt")
            .ok_or_else(|| anyhow!("record is missing field `prompt`"))?;
        let conditioning_scale = fields
            .remove("conditioningScale")
            .ok_or_else(|| anyhow!("record is missing field `conditioningScale`"))?;
        let model_latency = match fields.remove("model_latency") {
            Some(raw) => Some(parse_latency(&raw)?),
            None => None,
        };
        Ok(Some(Self {
            prompt,
            image: fields.remove("image"),
            model_latency,
            conditioning_scale,
            website_url: fields.remove("website_url"),
            created_at: fields.remove("created_at"),
        }))
    }
}

fn parse_latency(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if let Ok(ms) = trimmed.parse::<u64>() {
        return Ok(ms);
    }
    let ms = trimmed
        .parse::<f64>()
        .map_err(|err| anyhow!("invalid model_latency {raw:?}: {err}"))?;
    if !ms.is_finite() || ms < 0.0 {
        return Err(anyhow!("invalid model_latency {raw:?}"));
    }
    Ok(ms.round() as u64)
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}
