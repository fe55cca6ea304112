//! Immutable request/response descriptors and the stored exchange pair.

use crate::endpoint::Endpoint;
use crate::errors::PlayerError;
use url::Url;

pub type Headers = Vec<(String, String)>;

/// Outgoing HTTP request. `url` is absolute for live requests and origin-form
/// (`/path?query`) for requests loaded from a sequence directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_origin_form(&self) -> bool {
        self.url.starts_with('/')
    }

    /// The URL parsed as an absolute URL. Origin-form targets such as `/a`
    /// have no scheme or host and are rejected.
    pub fn absolute_url(&self) -> Result<Url, PlayerError> {
        Url::parse(&self.url).map_err(|e| PlayerError::InvalidRequest(format!("{}: {e}", self.url)))
    }

    pub fn path_and_query(&self) -> Result<String, PlayerError> {
        if self.is_origin_form() {
            return Ok(self.url.clone());
        }
        let parsed = Url::parse(&self.url)
            .map_err(|e| PlayerError::InvalidRequest(format!("{}: {e}", self.url)))?;
        let mut out = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            out.push('?');
            out.push_str(query);
        }
        Ok(out)
    }

    /// Copy of this request addressed at `endpoint`, keeping path and query.
    pub fn resolve_against(&self, endpoint: &Endpoint) -> Result<Self, PlayerError> {
        Ok(Self {
            method: self.method.clone(),
            url: endpoint.resolve(&self.path_and_query()?),
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDescriptor {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ResponseDescriptor {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub request: RequestDescriptor,
    pub response: ResponseDescriptor,
}

fn find_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
