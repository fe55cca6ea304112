//! Numbered exchange files under a sequence directory.
//!
//! Index `n` lives in `n.request` and `n.response`. An index only counts as
//! persisted when both files exist; a lone half is treated as absent.

use crate::codec::{decode_request, decode_response, encode_request, encode_response};
use crate::context::CallContext;
use crate::errors::PlayerError;
use crate::exchange::Exchange;
use crate::logging::{LogEvent, LogSink};
use serde_json::json;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const REQUEST_SUFFIX: &str = "request";
pub const RESPONSE_SUFFIX: &str = "response";
const STAGING_SUFFIX: &str = "tmp";

#[cfg(unix)]
const FILE_MODE: u32 = 0o664;

pub struct SequenceStore {
    dir: PathBuf,
    sink: Arc<dyn LogSink>,
}

impl SequenceStore {
    /// Opens `dir`, creating it when missing. A non-directory at `dir` is a
    /// configuration error.
    pub fn open(dir: impl AsRef<Path>, sink: Arc<dyn LogSink>) -> Result<Self, PlayerError> {
        let dir = dir.as_ref().to_path_buf();
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(PlayerError::InvalidConfig(format!(
                    "{}: path is a file, not a directory",
                    dir.display()
                )))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&dir).map_err(|e| PlayerError::io(&dir, e))?;
                sink.emit(&LogEvent::info(
                    "dir_created",
                    json!({ "dir": dir.display().to_string() }),
                ));
            }
            Err(e) => return Err(PlayerError::io(&dir, e)),
        }
        Ok(Self { dir, sink })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn request_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{index}.{REQUEST_SUFFIX}"))
    }

    pub fn response_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{index}.{RESPONSE_SUFFIX}"))
    }

    pub fn contains(&self, index: usize) -> Result<bool, PlayerError> {
        Ok(file_present(&self.request_path(index))? && file_present(&self.response_path(index))?)
    }

    pub fn load(&self, index: usize, ctx: &CallContext) -> Result<Option<Exchange>, PlayerError> {
        ctx.check(&format!("load exchange {index}"))?;
        if !self.contains(index)? {
            return Ok(None);
        }

        let request_path = self.request_path(index);
        let raw = fs::read(&request_path).map_err(|e| PlayerError::io(&request_path, e))?;
        let request = decode_request(&raw).map_err(|e| with_path(e, &request_path))?;

        let response_path = self.response_path(index);
        let raw = fs::read(&response_path).map_err(|e| PlayerError::io(&response_path, e))?;
        let response = decode_response(&raw).map_err(|e| with_path(e, &response_path))?;

        self.sink.emit(&LogEvent::debug(
            "exchange_loaded",
            json!({ "index": index, "method": request.method, "url": request.url }),
        ));
        Ok(Some(Exchange { request, response }))
    }

    /// Persists `exchange` at `index`. Both halves are staged first and the
    /// request file is renamed into place last, so an interrupted save leaves
    /// the index absent rather than half-written.
    pub fn save(
        &self,
        index: usize,
        exchange: &Exchange,
        ctx: &CallContext,
    ) -> Result<(), PlayerError> {
        ctx.check(&format!("save exchange {index}"))?;
        if index > 0 && !self.contains(index - 1)? {
            return Err(PlayerError::SequenceGap(format!(
                "cannot save exchange {index} in {}: exchange {} is missing",
                self.dir.display(),
                index - 1
            )));
        }

        let request_bytes = encode_request(&exchange.request)?;
        let response_bytes = encode_response(&exchange.response)?;

        let request_path = self.request_path(index);
        let response_path = self.response_path(index);
        let request_staging = staging_path(&request_path);
        let response_staging = staging_path(&response_path);

        let committed = write_staged(&request_staging, &request_bytes)
            .and_then(|()| write_staged(&response_staging, &response_bytes))
            .and_then(|()| rename(&response_staging, &response_path))
            .and_then(|()| rename(&request_staging, &request_path));
        if let Err(err) = committed {
            let _ = fs::remove_file(&request_staging);
            let _ = fs::remove_file(&response_staging);
            return Err(err);
        }

        self.sink.emit(&LogEvent::info(
            "exchange_saved",
            json!({
                "index": index,
                "method": exchange.request.method,
                "url": exchange.request.url,
                "status": exchange.response.status,
            }),
        ));
        Ok(())
    }

    /// Deletes every exchange file (and leftover staging file) at or after
    /// `from`. Returns how many indices had something removed.
    pub fn truncate(&self, from: usize, ctx: &CallContext) -> Result<usize, PlayerError> {
        ctx.check(&format!("truncate from {from}"))?;
        let mut removed = BTreeSet::new();
        for (index, path) in self.scan()? {
            if index < from {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed.insert(index);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(PlayerError::io(&path, e)),
            }
        }
        self.sink.emit(&LogEvent::info(
            "truncated",
            json!({ "from": from, "removed": removed.len() }),
        ));
        Ok(removed.len())
    }

    /// Length of the gap-free persisted prefix.
    pub fn len(&self) -> Result<usize, PlayerError> {
        let mut index = 0;
        while self.contains(index)? {
            index += 1;
        }
        Ok(index)
    }

    pub fn is_empty(&self) -> Result<bool, PlayerError> {
        Ok(!self.contains(0)?)
    }

    /// Every index with a complete exchange, ascending.
    pub fn indices(&self) -> Result<Vec<usize>, PlayerError> {
        let mut out = BTreeSet::new();
        for (index, path) in self.scan()? {
            let is_request = path
                .extension()
                .is_some_and(|ext| ext == REQUEST_SUFFIX);
            if is_request && self.contains(index)? {
                out.insert(index);
            }
        }
        Ok(out.into_iter().collect())
    }

    /// Checks that persisted indices are exactly `0..len`.
    pub fn verify(&self) -> Result<usize, PlayerError> {
        let indices = self.indices()?;
        for (expected, found) in indices.iter().enumerate() {
            if *found != expected {
                return Err(PlayerError::SequenceGap(format!(
                    "{}: exchange {expected} is missing but {found} exists",
                    self.dir.display()
                )));
            }
        }
        Ok(indices.len())
    }

    /// Exchange-owned files in the directory, with the index they belong to.
    fn scan(&self) -> Result<Vec<(usize, PathBuf)>, PlayerError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| PlayerError::io(&self.dir, e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PlayerError::io(&self.dir, e))?;
            let name = entry.file_name();
            if let Some(index) = name.to_str().and_then(exchange_index) {
                out.push((index, entry.path()));
            }
        }
        Ok(out)
    }
}

/// Index encoded in an exchange file name such as `3.request` or `3.response.tmp`.
fn exchange_index(name: &str) -> Option<usize> {
    let (index, rest) = name.split_once('.')?;
    let half = rest.strip_suffix(".tmp").unwrap_or(rest);
    if half != REQUEST_SUFFIX && half != RESPONSE_SUFFIX {
        return None;
    }
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    index.parse().ok()
}

fn file_present(path: &Path) -> Result<bool, PlayerError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(PlayerError::Io(format!(
            "{}: path is a directory, not a file",
            path.display()
        ))),
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PlayerError::io(path, e)),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

fn write_staged(path: &Path, bytes: &[u8]) -> Result<(), PlayerError> {
    fs::write(path, bytes).map_err(|e| PlayerError::io(path, e))?;
    set_file_mode(path)
}

#[cfg(unix)]
fn set_file_mode(path: &Path) -> Result<(), PlayerError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE))
        .map_err(|e| PlayerError::io(path, e))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path) -> Result<(), PlayerError> {
    Ok(())
}

fn rename(from: &Path, to: &Path) -> Result<(), PlayerError> {
    fs::rename(from, to).map_err(|e| PlayerError::io(to, e))
}

fn with_path(err: PlayerError, path: &Path) -> PlayerError {
    match err {
        PlayerError::MalformedExchange(reason) => {
            PlayerError::MalformedExchange(format!("{}: {reason}", path.display()))
        }
        other => other,
    }
}
