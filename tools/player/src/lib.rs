//! Deterministic HTTP record-and-replay.
//!
//! A [`player::Player`] sits in front of a live [`transport::Transport`]. The
//! first run records every request/response exchange under a directory as
//! numbered, plain-text HTTP/1.1 files; later runs serve those responses back
//! as long as the requests arrive in the same order, and fall back to the
//! network (re-establishing remote state first) as soon as they do not.

pub mod codec;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod errors;
pub mod exchange;
pub mod logging;
pub mod matcher;
pub mod player;
pub mod replay;
pub mod store;
pub mod transport;

use clap::{error::ErrorKind, Parser, Subcommand};
use config::{build_sink, load_config, ConfigOverrides, PlayerConfig};
use context::CallContext;
use errors::PlayerError;
use logging::{body_digest, LogSink, NullSink};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::SequenceStore;

pub use errors::PlayerError as Error;
pub use exchange::{Exchange, RequestDescriptor, ResponseDescriptor};
pub use player::Player;

#[derive(Debug, Clone, Parser)]
#[command(name = "player")]
#[command(about = "Inspect and edit recorded HTTP exchange sequences")]
pub struct Cli {
    /// TOML config; its storage.dir is used when no directory is given.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// One line per stored exchange.
    List { dir: Option<PathBuf> },
    /// Print both halves of one exchange: `show <index> [dir]`.
    Show {
        index: usize,
        dir: Option<PathBuf>,
    },
    /// Check that the sequence has no holes.
    Verify { dir: Option<PathBuf> },
    /// Delete every exchange at or after --from.
    Truncate {
        #[arg(long)]
        from: usize,
        dir: Option<PathBuf>,
    },
}

pub fn run() -> Result<i32, PlayerError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_with_args(&args, &mut out)
}

pub fn run_with_args(
    args: &[std::ffi::OsString],
    out: &mut dyn Write,
) -> Result<i32, PlayerError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                write_out(out, &error.to_string())?;
                return Ok(0);
            }
            _ => return Err(PlayerError::Cli(error.to_string())),
        },
    };

    let dir_arg = match &cli.command {
        Command::List { dir }
        | Command::Show { dir, .. }
        | Command::Verify { dir }
        | Command::Truncate { dir, .. } => dir.clone(),
    };
    let (dir, cfg) = resolve_dir(cli.config.as_deref(), dir_arg)?;
    if !dir.is_dir() {
        return Err(PlayerError::Cli(format!(
            "{} is not a sequence directory",
            dir.display()
        )));
    }
    let sink: Arc<dyn LogSink> = match &cfg {
        Some(cfg) => build_sink(cfg),
        None => Arc::new(NullSink),
    };
    let store = SequenceStore::open(&dir, sink)?;
    let ctx = CallContext::none();

    match cli.command {
        Command::List { .. } => {
            for index in store.indices()? {
                let Some(exchange) = store.load(index, &ctx)? else {
                    continue;
                };
                write_out(
                    out,
                    &format!(
                        "{index}\t{}\t{}\t{}\t{} bytes\t{}\n",
                        exchange.request.method,
                        exchange.request.url,
                        exchange.response.status,
                        exchange.response.body.len(),
                        body_digest(&exchange.response.body),
                    ),
                )?;
            }
        }
        Command::Show { index, .. } => {
            if store.load(index, &ctx)?.is_none() {
                return Err(PlayerError::Cli(format!(
                    "no exchange {index} in {}",
                    dir.display()
                )));
            }
            for path in [store.request_path(index), store.response_path(index)] {
                let raw = std::fs::read(&path).map_err(|e| PlayerError::io(&path, e))?;
                write_out(out, &format!("# {}\n", path.display()))?;
                write_out(out, &String::from_utf8_lossy(&raw))?;
                write_out(out, "\n")?;
            }
        }
        Command::Verify { .. } => {
            let count = store.verify()?;
            write_out(out, &format!("ok: {count} exchanges\n"))?;
        }
        Command::Truncate { from, .. } => {
            let removed = store.truncate(from, &ctx)?;
            write_out(out, &format!("removed {removed} exchanges\n"))?;
        }
    }
    Ok(0)
}

fn resolve_dir(
    config_path: Option<&Path>,
    dir_arg: Option<PathBuf>,
) -> Result<(PathBuf, Option<PlayerConfig>), PlayerError> {
    let cfg = match config_path {
        Some(path) => Some(load_config(
            Some(path),
            &ConfigOverrides {
                dir: dir_arg.clone(),
                ..ConfigOverrides::default()
            },
        )?),
        None => None,
    };
    if let Some(dir) = dir_arg {
        return Ok((dir, cfg));
    }
    match cfg {
        Some(loaded) => Ok((loaded.storage.dir.clone(), Some(loaded))),
        None => Err(PlayerError::Cli(
            "a sequence directory or --config is required".to_string(),
        )),
    }
}

fn write_out(out: &mut dyn Write, text: &str) -> Result<(), PlayerError> {
    out.write_all(text.as_bytes())
        .map_err(|e| PlayerError::Io(e.to_string()))
}
