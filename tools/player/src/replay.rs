//! One-way switch from replaying stored exchanges to talking to the network.
//!
//! The first request that diverges from the recording triggers the switch.
//! Before going live, every exchange already served from disk is re-sent so
//! the remote side reaches the state the recording assumed, and the recorded
//! future is discarded because it no longer describes what will happen.

use crate::context::CallContext;
use crate::endpoint::Endpoint;
use crate::errors::PlayerError;
use crate::logging::{body_digest, LogEvent, LogSink};
use crate::store::SequenceStore;
use crate::transport::Transport;
use serde_json::json;

/// Stored headers that describe the recorded connection rather than the
/// request; the transport supplies its own for the target.
const NOT_REPLAYED: [&str; 4] = ["host", "content-length", "transfer-encoding", "connection"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    NotYetLive,
    Live,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotYetLive => "not_yet_live",
            Self::Live => "live",
        }
    }
}

#[derive(Debug, Default)]
pub struct ReplayController {
    mode: Mode,
    /// Switch point whose recorded future has not been removed yet.
    pending_truncate: Option<usize>,
}

pub struct ReplayDeps<'a> {
    pub store: &'a SequenceStore,
    pub endpoint: &'a Endpoint,
    pub transport: &'a dyn Transport,
    pub sink: &'a dyn LogSink,
}

impl ReplayController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        self.mode == Mode::Live
    }

    pub fn truncate_pending(&self) -> bool {
        self.pending_truncate.is_some()
    }

    /// Replays exchanges `0..cursor` live, switches to [`Mode::Live`], then
    /// truncates the store at `cursor`. If any replayed request fails the
    /// mode is left unchanged and the error is returned. The mode flips before
    /// the truncate, so a failed truncate leaves the session live with the
    /// truncate pending; every later call retries it and does nothing else.
    pub fn go_live(
        &mut self,
        cursor: usize,
        deps: &ReplayDeps<'_>,
        ctx: &CallContext,
    ) -> Result<(), PlayerError> {
        if self.is_live() {
            return self.finish_truncate(deps, ctx);
        }

        if cursor > 0 {
            deps.sink.emit(&LogEvent::info(
                "replay_started",
                json!({ "count": cursor, "target": deps.endpoint.to_string() }),
            ));
        }
        for index in 0..cursor {
            let exchange = deps.store.load(index, ctx)?.ok_or_else(|| {
                PlayerError::SequenceGap(format!(
                    "exchange {index} disappeared from {} before it could be replayed",
                    deps.store.dir().display()
                ))
            })?;
            let mut request = exchange.request.resolve_against(deps.endpoint)?;
            request
                .headers
                .retain(|(name, _)| !NOT_REPLAYED.iter().any(|h| name.eq_ignore_ascii_case(h)));
            deps.sink.emit(&LogEvent::info(
                "replay_request",
                json!({
                    "index": index,
                    "method": request.method,
                    "url": request.url,
                    "body": body_digest(&request.body),
                }),
            ));
            deps.transport.send(&request, ctx)?;
        }

        self.mode = Mode::Live;
        self.pending_truncate = Some(cursor);
        self.finish_truncate(deps, ctx)
    }

    fn finish_truncate(
        &mut self,
        deps: &ReplayDeps<'_>,
        ctx: &CallContext,
    ) -> Result<(), PlayerError> {
        let Some(from) = self.pending_truncate else {
            return Ok(());
        };
        deps.store.truncate(from, ctx)?;
        self.pending_truncate = None;
        Ok(())
    }
}
