use crate::errors::PlayerError;
use url::Url;

/// Scheme and authority that stored origin-form requests are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: String,
    authority: String,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, PlayerError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| PlayerError::InvalidConfig(format!("target endpoint {raw:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PlayerError::InvalidConfig(format!(
                "target endpoint {raw:?}: scheme must be http or https"
            )));
        }
        let host = url.host_str().filter(|host| !host.is_empty()).ok_or_else(|| {
            PlayerError::InvalidConfig(format!("target endpoint {raw:?}: missing host"))
        })?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(Self {
            scheme: url.scheme().to_string(),
            authority,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Absolute URL for an origin-form `path?query` under this endpoint.
    pub fn resolve(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}://{}{path_and_query}", self.scheme, self.authority)
        } else {
            format!("{}://{}/{path_and_query}", self.scheme, self.authority)
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}
