use crate::endpoint::Endpoint;
use crate::errors::PlayerError;
use crate::logging::{JsonlLogger, LogSink, NullSink, StderrSink, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::matcher::MatchPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub dir: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub jsonl_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerConfig {
    pub storage: StorageConfig,
    pub target: TargetConfig,
    pub matching: MatchPolicy,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub jsonl_path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub stderr: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                dir: PathBuf::from("flows/default"),
            },
            target: TargetConfig {
                endpoint: String::new(),
            },
            matching: MatchPolicy::method_and_url(),
            logging: LoggingConfig {
                jsonl_path: None,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                stderr: false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialPlayerConfig {
    storage: Option<PartialStorageConfig>,
    target: Option<PartialTargetConfig>,
    matching: Option<PartialMatchingConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialStorageConfig {
    dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialTargetConfig {
    endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialMatchingConfig {
    compare_headers: Option<Vec<String>>,
    compare_body: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLoggingConfig {
    jsonl_path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    stderr: Option<bool>,
}

/// Defaults, then the TOML file at `path` (if any), then `overrides`.
pub fn load_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<PlayerConfig, PlayerError> {
    let mut cfg = PlayerConfig::default();

    if let Some(path) = path {
        let file_contents = std::fs::read_to_string(path).map_err(|e| PlayerError::io(path, e))?;
        let partial: PartialPlayerConfig = toml::from_str(&file_contents)
            .map_err(|e| PlayerError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn parse_config_str(text: &str) -> Result<PlayerConfig, PlayerError> {
    let mut cfg = PlayerConfig::default();
    let partial: PartialPlayerConfig =
        toml::from_str(text).map_err(|e| PlayerError::ConfigParse(e.to_string()))?;
    merge_partial_config(&mut cfg, partial);
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Sink described by the logging section: JSONL file, stderr, or nothing.
pub fn build_sink(cfg: &PlayerConfig) -> Arc<dyn LogSink> {
    match (&cfg.logging.jsonl_path, cfg.logging.stderr) {
        (Some(path), _) => {
            let mut logger = JsonlLogger::new(path);
            logger.max_payload_bytes = cfg.logging.max_payload_bytes;
            Arc::new(logger)
        }
        (None, true) => Arc::new(StderrSink),
        (None, false) => Arc::new(NullSink),
    }
}

fn merge_partial_config(cfg: &mut PlayerConfig, partial: PartialPlayerConfig) {
    if let Some(storage) = partial.storage {
        if let Some(dir) = storage.dir {
            cfg.storage.dir = dir;
        }
    }

    if let Some(target) = partial.target {
        if let Some(endpoint) = target.endpoint {
            cfg.target.endpoint = endpoint;
        }
    }

    if let Some(matching) = partial.matching {
        if let Some(headers) = matching.compare_headers {
            cfg.matching.compare_headers = headers;
        }
        if let Some(value) = matching.compare_body {
            cfg.matching.compare_body = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(path) = logging.jsonl_path {
            cfg.logging.jsonl_path = Some(path);
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.stderr {
            cfg.logging.stderr = value;
        }
    }
}

fn apply_overrides(cfg: &mut PlayerConfig, overrides: &ConfigOverrides) {
    if let Some(dir) = &overrides.dir {
        cfg.storage.dir = dir.clone();
    }
    if let Some(endpoint) = &overrides.endpoint {
        cfg.target.endpoint = endpoint.clone();
    }
    if let Some(path) = &overrides.jsonl_path {
        cfg.logging.jsonl_path = Some(path.clone());
    }
}

fn validate_config(cfg: &PlayerConfig) -> Result<(), PlayerError> {
    if cfg.storage.dir.as_os_str().is_empty() {
        return Err(PlayerError::InvalidConfig(
            "storage.dir must not be empty".to_string(),
        ));
    }
    if cfg.target.endpoint.trim().is_empty() {
        return Err(PlayerError::InvalidConfig(
            "target.endpoint is required".to_string(),
        ));
    }
    Endpoint::parse(&cfg.target.endpoint)?;
    if cfg
        .matching
        .compare_headers
        .iter()
        .any(|name| name.trim().is_empty())
    {
        return Err(PlayerError::InvalidConfig(
            "matching.compare_headers must not contain empty names".to_string(),
        ));
    }
    if cfg.logging.max_payload_bytes < 16 {
        return Err(PlayerError::InvalidConfig(
            "logging.max_payload_bytes must be at least 16".to_string(),
        ));
    }
    Ok(())
}
