use crate::endpoint::Endpoint;
use crate::errors::PlayerError;
use crate::exchange::{Exchange, RequestDescriptor, ResponseDescriptor};
use serde::{Deserialize, Serialize};
use url::Url;

/// What must agree between a live request and the stored one. Method and
/// URL are always compared; headers and body only when configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPolicy {
    #[serde(default)]
    pub compare_headers: Vec<String>,
    #[serde(default)]
    pub compare_body: bool,
}

impl MatchPolicy {
    pub fn method_and_url() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>) -> Self {
        self.compare_headers.push(name.into());
        self
    }

    pub fn with_body(mut self) -> Self {
        self.compare_body = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchReason {
    Method { stored: String, live: String },
    Url { stored: String, live: String },
    Header { name: String },
    Body,
}

impl std::fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Method { stored, live } => write!(f, "method {live} != stored {stored}"),
            Self::Url { stored, live } => write!(f, "url {live} != stored {stored}"),
            Self::Header { name } => write!(f, "header {name} differs"),
            Self::Body => write!(f, "body differs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Fresh copy of the stored response.
    Matched(ResponseDescriptor),
    Absent,
    Diverged(MismatchReason),
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// Compares `live` with the exchange stored at the cursor.
///
/// URLs are compared as exact strings after both sides go through `url::Url`:
/// the stored path and query are resolved against `endpoint`, and both
/// results are serialised the same way. That folds host case, drops default
/// ports and resolves dot segments; path, query and parameter order still
/// have to agree byte for byte.
pub fn match_request(
    live: &RequestDescriptor,
    stored: Option<&Exchange>,
    endpoint: &Endpoint,
    policy: &MatchPolicy,
) -> Result<MatchOutcome, PlayerError> {
    let Some(stored) = stored else {
        return Ok(MatchOutcome::Absent);
    };

    if live.method != stored.request.method {
        return Ok(MatchOutcome::Diverged(MismatchReason::Method {
            stored: stored.request.method.clone(),
            live: live.method.clone(),
        }));
    }

    let stored_url = normalize_url(&stored.request.resolve_against(endpoint)?.url)?;
    let live_url = normalize_url(&live.url)?;
    if live_url != stored_url {
        return Ok(MatchOutcome::Diverged(MismatchReason::Url {
            stored: stored_url,
            live: live_url,
        }));
    }

    for name in &policy.compare_headers {
        let live_values = header_values(&live.headers, name);
        let stored_values = header_values(&stored.request.headers, name);
        if live_values != stored_values {
            return Ok(MatchOutcome::Diverged(MismatchReason::Header { name: name.clone() }));
        }
    }

    if policy.compare_body && live.body != stored.request.body {
        return Ok(MatchOutcome::Diverged(MismatchReason::Body));
    }

    Ok(MatchOutcome::Matched(stored.response.clone()))
}

fn normalize_url(raw: &str) -> Result<String, PlayerError> {
    Url::parse(raw)
        .map(String::from)
        .map_err(|e| PlayerError::InvalidRequest(format!("{raw}: {e}")))
}

fn header_values<'a>(headers: &'a [(String, String)], name: &str) -> Vec<&'a str> {
    headers
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
        .collect()
}
