use url::Url;

use crate::generator::GeneratorError;

pub fn validate_http_url(raw: &str) -> Result<Url, GeneratorError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GeneratorError::InvalidUrl("empty url".to_string()));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|err| GeneratorError::InvalidUrl(format!("{trimmed}: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(GeneratorError::InvalidUrl(format!(
            "unsupported scheme {scheme:?} in {trimmed}"
        ))),
    }
}
