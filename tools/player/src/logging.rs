use crate::errors::PlayerError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl<'a> LogEvent<'a> {
    pub fn info(event_type: &'a str, payload: Value) -> Self {
        Self {
            level: "info",
            event_type,
            payload,
        }
    }

    pub fn debug(event_type: &'a str, payload: Value) -> Self {
        Self {
            level: "debug",
            event_type,
            payload,
        }
    }
}

/// Diagnostic sink. Failures to log never fail the caller.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: &LogEvent<'_>);
}

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), PlayerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PlayerError::io(parent, e))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| PlayerError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PlayerError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| PlayerError::io(&self.path, e))?;
        file.write_all(b"\n")
            .map_err(|e| PlayerError::io(&self.path, e))
    }
}

impl LogSink for JsonlLogger {
    fn emit(&self, event: &LogEvent<'_>) {
        let _ = self.append(event);
    }
}

/// Writes `key=value` lines to stderr.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn emit(&self, event: &LogEvent<'_>) {
        eprintln!("{}", structured_fallback_line(event));
    }
}

pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _event: &LogEvent<'_>) {}
}

/// Keeps events in memory; tests read them back with [`MemorySink::event_types`].
#[derive(Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|(kind, _)| kind).collect()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, event: &LogEvent<'_>) {
        if let Ok(mut events) = self.events.lock() {
            events.push((event.event_type.to_string(), event.payload.clone()));
        }
    }
}

pub fn structured_fallback_line(event: &LogEvent<'_>) -> String {
    format!(
        "level={} event={} payload={}",
        event.level,
        event.event_type,
        event.payload.to_string().replace('\n', "\\n")
    )
}

/// Short sha256 prefix used in place of bodies in log payloads.
pub fn body_digest(body: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(body);
    let hex: String = hash[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("sha256:{hex}")
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
