//! Shared reqwest plumbing: client construction, status checks and
//! environment lookups used by every provider config.

use std::time::Duration;

use dossier_core::text::take_chars;
use dossier_core::{ServiceError, ServiceResult};
use reqwest::{Client, Response};

use crate::error::{ProviderError, ProviderResult};

pub(crate) const USER_AGENT: &str = concat!("dossier-providers/", env!("CARGO_PKG_VERSION"));

/// Longest error body carried into a `ServiceError` message.
const ERROR_BODY_CHARS: usize = 300;

/// Build a client with a connect timeout. Whole-request timeouts are set per
/// call because streamed synthesis responses stay open for many minutes.
pub(crate) fn build_client(connect_timeout: Duration) -> ProviderResult<Client> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .build()?)
}

/// Pass a successful response through; turn anything else into
/// `ServiceError::Http` with the provider's error message when it sent one.
pub(crate) async fn ensure_success(service: &str, response: Response) -> ServiceResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::http(service, status.as_u16(), error_message(&body)))
}

/// `error.message` from a JSON error body, else the start of the raw body.
pub(crate) fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .or_else(|| v.get("detail"))
            .and_then(|m| m.as_str())
    });
    match message {
        Some(m) => m.to_string(),
        None => take_chars(body.trim(), ERROR_BODY_CHARS).to_string(),
    }
}

/// Required key from `lookup`, blank values count as missing.
pub(crate) fn required<L>(lookup: &L, service: &'static str, env_var: &'static str) -> ProviderResult<String>
where
    L: Fn(&str) -> Option<String>,
{
    lookup(env_var)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ProviderError::MissingApiKey { service, env_var })
}

/// Optional key from `lookup` parsed into `T`.
pub(crate) fn parsed<L, T>(lookup: &L, service: &'static str, key: &str) -> ProviderResult<Option<T>>
where
    L: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| ProviderError::InvalidConfig {
            service,
            message: format!("{key} has invalid value {raw:?}"),
        }),
    }
}

/// `base` without a trailing slash, joined to `path`.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
