use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::{ApiError, AppState};

/// Rejects requests whose `Host` is not listed in `server.allowed_hosts`.
pub async fn allowed_hosts_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let allowed = &state.config().server.allowed_hosts;
    if allowed.is_empty() {
        return Ok(next.run(req).await);
    }

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| req.uri().host())
        .unwrap_or_default()
        .to_string();

    if is_host_allowed(&host, allowed) {
        return Ok(next.run(req).await);
    }

    tracing::warn!(host = %host, "Rejected request for disallowed host");
    Err(ApiError::validation("Invalid HTTP_HOST header"))
}

/// Drops the port, keeping bracketed IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

/// `*` matches anything; `.example.com` matches `example.com` and its subdomains.
#[must_use]
pub fn is_host_allowed(host: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }

    let host = strip_port(host).trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return false;
    }

    allowed.iter().any(|pattern| {
        let pattern = pattern.to_ascii_lowercase();
        if pattern == "*" {
            return true;
        }
        if let Some(domain) = pattern.strip_prefix('.') {
            return host == domain || host.ends_with(&pattern);
        }
        host == pattern
    })
}
