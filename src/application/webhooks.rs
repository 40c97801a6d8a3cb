//! Webhook signature verification and payload normalization.
//!
//! Verification runs over the raw request bytes before any JSON parsing;
//! re-serializing a parsed body would not be byte-for-byte stable.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// No shared secret configured for the provider. Integrity protection
    /// must not silently degrade, so this rejects every request.
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("signature header is missing")]
    MissingSignature,
    #[error("signature does not match payload")]
    Invalid,
}

/// Verify an HMAC-SHA256 hex signature over the raw payload bytes.
///
/// Accepts an optional `sha256=` prefix on the header value; comparison is
/// constant-time via the MAC's own verifier.
pub fn verify_signature(
    raw_body: &[u8],
    signature_header: Option<&str>,
    secret: Option<&str>,
) -> Result<(), SignatureError> {
    let secret = secret.ok_or(SignatureError::MissingSecret)?;
    let header = signature_header
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(SignatureError::MissingSignature)?;

    let hex_signature = header.strip_prefix("sha256=").unwrap_or(header);
    let received = hex::decode(hex_signature).map_err(|_| SignatureError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::MissingSecret)?;
    mac.update(raw_body);
    mac.verify_slice(&received)
        .map_err(|_| SignatureError::Invalid)
}

/// Compute the hex signature for a payload; used by tests and the CLI's
/// webhook replay helper.
pub fn sign_payload(raw_body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookParseError {
    #[error("payload is not valid JSON: {0}")]
    Json(String),
    #[error("payload carries no correlation key (`project` or `id`)")]
    MissingCorrelation,
    #[error("payload carries no recognizable status")]
    MissingStatus,
}

/// Terminal or in-flight state reported by a provider callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookStatus {
    Succeeded,
    Failed,
    InProgress,
}

/// A normalized provider callback.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub correlation_key: String,
    pub status: WebhookStatus,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub progress: Option<u8>,
}

impl WebhookEvent {
    /// Parse a raw payload into a normalized event.
    ///
    /// Correlation tries `project` before `id`: JSON2Video echoes the project
    /// code in `project`, Shotstack reports the render id in `id`. Both are
    /// accepted as strings or numbers. Status synonyms (`done`, `success`,
    /// `completed`, `ok`, or boolean `success`) are normalized because
    /// providers disagree on field naming.
    pub fn parse(raw_body: &[u8]) -> Result<Self, WebhookParseError> {
        let value: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|err| WebhookParseError::Json(err.to_string()))?;

        let correlation_key = ["project", "id"]
            .iter()
            .find_map(|field| scalar_as_string(value.get(*field)))
            .ok_or(WebhookParseError::MissingCorrelation)?;

        let status = normalize_status(&value).ok_or(WebhookParseError::MissingStatus)?;

        let output_url = value
            .get("url")
            .and_then(|url| url.as_str())
            .map(str::to_string);
        let error = value
            .get("error")
            .and_then(|err| err.as_str())
            .map(str::to_string);
        let progress = value
            .get("progress")
            .and_then(|progress| progress.as_u64())
            .map(|progress| progress.min(100) as u8);

        Ok(Self {
            correlation_key,
            status,
            output_url,
            error,
            progress,
        })
    }
}

fn scalar_as_string(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(text) if !text.is_empty() => Some(text.clone()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn normalize_status(value: &serde_json::Value) -> Option<WebhookStatus> {
    if let Some(status) = value.get("status").and_then(|status| status.as_str()) {
        return match status.to_ascii_lowercase().as_str() {
            "done" | "success" | "completed" | "complete" | "ok" => Some(WebhookStatus::Succeeded),
            "failed" | "error" | "cancelled" | "canceled" => Some(WebhookStatus::Failed),
            "queued" | "fetching" | "rendering" | "saving" | "running" | "processing" => {
                Some(WebhookStatus::InProgress)
            }
            _ => None,
        };
    }

    match value.get("success").and_then(|success| success.as_bool()) {
        Some(true) => Some(WebhookStatus::Succeeded),
        Some(false) => Some(WebhookStatus::Failed),
        None => None,
    }
}
