//! Upstream member-count source.

use anyhow::{Context, Result};
use mys_growth_core::DataPoint;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::future::Future;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::SeriesError;

/// Group endpoint polled when no other endpoint is configured.
pub const DEFAULT_ENDPOINT: &str = "https://groups.roblox.com/v1/groups/1143446";
/// Content type sent with every upstream request.
pub const REQUEST_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Raw upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePayload {
    /// Value of the response `Content-Type` header, empty when absent.
    pub content_type: String,
    /// Response body.
    pub body: String,
}

impl SourcePayload {
    /// Payload labelled `application/json`.
    #[must_use]
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            content_type: "application/json".to_owned(),
            body: body.into(),
        }
    }
}

/// Something that can be asked for the current group metadata.
pub trait MemberSource: Send + Sync {
    /// Fetch one payload.
    ///
    /// # Errors
    /// Returns an error when the upstream cannot be reached.
    fn fetch(&self) -> impl Future<Output = Result<SourcePayload>> + Send;
}

/// [`MemberSource`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSource {
    /// Source polling `endpoint` with a fresh client.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Source polling `endpoint` through `client`.
    #[must_use]
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// URL this source polls.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl MemberSource for HttpSource {
    async fn fetch(&self) -> Result<SourcePayload> {
        let response = self
            .client
            .get(&self.endpoint)
            .header(CONTENT_TYPE, REQUEST_CONTENT_TYPE)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", self.endpoint))?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {}", self.endpoint))?;
        debug!(%status, %content_type, bytes = body.len(), "Fetched source payload");
        Ok(SourcePayload { content_type, body })
    }
}

/// Interpret a `memberCount` field as an integer.
///
/// Integers pass through, finite floats are truncated, and strings are read
/// from their leading optional sign and digits (`"12abc"` is 12). Anything
/// else is `None`.
#[must_use]
pub fn coerce_member_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().and_then(truncate_float)),
        Value::String(text) => parse_leading_int(text),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn truncate_float(value: f64) -> Option<i64> {
    const LIMIT: f64 = 9_007_199_254_740_992.0;
    (value.is_finite() && value.abs() < LIMIT).then(|| value.trunc() as i64)
}

fn parse_leading_int(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let magnitude: i64 = rest[..digits].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Turn a payload into the sample for `at`'s UTC date.
///
/// # Errors
/// Returns [`SeriesError::Fetch`] when the payload is not JSON, lacks a
/// numeric `memberCount`, or reports a count that is not positive.
pub fn fetch_latest_point(payload: &SourcePayload, at: OffsetDateTime) -> Result<DataPoint, SeriesError> {
    if !payload.content_type.contains("application/json") {
        return Err(SeriesError::Fetch(format!(
            "unexpected content type '{}'",
            payload.content_type
        )));
    }
    let json: Value = serde_json::from_str(&payload.body)
        .map_err(|e| SeriesError::Fetch(format!("payload is not JSON: {e}")))?;
    let count = json
        .get("memberCount")
        .and_then(coerce_member_count)
        .ok_or_else(|| SeriesError::Fetch("memberCount missing or not numeric".to_owned()))?;
    match u64::try_from(count) {
        Ok(0) => Err(SeriesError::Fetch("memberCount is zero".to_owned())),
        Ok(count) => Ok(DataPoint::at(at, count)),
        Err(_) => Err(SeriesError::Fetch(format!("memberCount is negative: {count}"))),
    }
}
