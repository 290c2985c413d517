//! Engine cache - keeps one LaTeX process primed with the current preamble.
//!
//! ## Decision
//!
//! ```text
//! request ──► same (dir, file, args)? ──no──► cold run
//!                    │ yes
//!                    ▼
//!             same preamble bytes? ────no──► cold run
//!                    │ yes
//!                    ▼
//!                 warm run
//! ```
//!
//! A cold run drains the cached process, runs the engine over the whole file
//! and primes a new process with the preamble in the background. A warm run
//! feeds only the body to the primed process, then primes the next one.

pub mod document;
pub mod log_mux;
pub mod session;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, WarmtexError};
use document::Document;
pub use log_mux::{LogMultiplexer, OutputSink, OutputTarget};
use session::CachedSession;
pub use session::SessionIdentity;

/// Outcome of one typeset request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Engine exited on its own; the code is passed through untouched.
    Exited(i32),
    /// Engine was killed by a signal.
    Signalled(i32),
    /// Engine could not be started at all.
    EngineUnavailable,
    /// Source file unreadable or without `\begin{document}`.
    DocumentRejected,
}

impl ExitStatus {
    pub const ENGINE_UNAVAILABLE: i32 = -1;
    pub const DOCUMENT_REJECTED: i32 = -2;

    /// Integer reported to clients.
    pub fn code(&self) -> i32 {
        match *self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signalled(signal) => 128 + signal,
            ExitStatus::EngineUnavailable => Self::ENGINE_UNAVAILABLE,
            ExitStatus::DocumentRejected => Self::DOCUMENT_REJECTED,
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitStatus::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signalled(signal);
            }
        }
        ExitStatus::Exited(Self::ENGINE_UNAVAILABLE)
    }
}

/// Pipe or task failure after an engine was started.
///
/// The cached session can no longer be trusted, so callers treat this as
/// fatal for the whole server.
#[derive(thiserror::Error, Debug)]
pub enum EngineFault {
    #[error("failed writing to the engine's stdin: {0}")]
    Input(#[source] std::io::Error),

    #[error("failed reading the engine's output: {0}")]
    Output(#[source] std::io::Error),

    #[error("failed waiting for the engine to exit: {0}")]
    Wait(#[source] std::io::Error),

    #[error("engine task failed: {0}")]
    Task(String),
}

/// What the status pages show.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheSnapshot {
    pub identity: Option<SessionIdentity>,
    pub cold_runs: u64,
    pub warm_runs: u64,
}

/// Owner of the single cached engine session.
pub struct EngineCache {
    engine: PathBuf,
    session: Mutex<Option<CachedSession>>,
    snapshot: StdMutex<CacheSnapshot>,
}

impl EngineCache {
    pub fn new(engine: PathBuf) -> Self {
        Self {
            engine,
            session: Mutex::new(None),
            snapshot: StdMutex::new(CacheSnapshot::default()),
        }
    }

    /// Resolve `name` on PATH; fails if there is no such executable.
    ///
    /// A name containing a path separator is checked as given.
    pub fn locate(name: &str) -> Result<Self> {
        let engine = which::which(name).map_err(|e| {
            debug!(%name, error = %e, "engine lookup failed");
            WarmtexError::EngineNotFound(name.to_string())
        })?;
        info!(engine = %engine.display(), "using engine");
        Ok(Self::new(engine))
    }

    pub fn engine(&self) -> &Path {
        &self.engine
    }

    /// Typeset `directory/file`, streaming engine output into `sink`.
    ///
    /// A nonzero exit is a normal result. `Err` means a started engine's
    /// pipes failed and the cache is no longer consistent.
    pub async fn typeset(
        &self,
        sink: OutputSink,
        directory: PathBuf,
        arguments: Vec<String>,
        file: String,
    ) -> std::result::Result<ExitStatus, EngineFault> {
        let identity = SessionIdentity {
            directory,
            file,
            arguments,
        };
        let mut slot = self.session.lock().await;

        let mut current = match slot.take() {
            Some(session) if session.identity == identity => session,
            previous => {
                debug!(file = %identity.file, "no session for this identity");
                return self.cold_run(&mut slot, previous, identity, &sink).await;
            }
        };

        let document = match Document::read(&identity.source_path()).await {
            Ok(doc) => doc,
            Err(e) => {
                sink.write(format!("{}\n", e).as_bytes());
                *slot = Some(current);
                return Ok(ExitStatus::DocumentRejected);
            }
        };

        if current.preamble.as_deref() != Some(document.preamble()) {
            info!(file = %identity.file, "preamble changed");
            return self.cold_run(&mut slot, Some(current), identity, &sink).await;
        }

        let Some(process) = current.take_process().await? else {
            info!(file = %identity.file, "no primed engine available");
            return self.cold_run(&mut slot, None, identity, &sink).await;
        };

        let started = Instant::now();
        current.attach(sink);
        let status = process.complete(document.body()).await?;
        info!(
            file = %identity.file,
            code = status.code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "warm run finished"
        );

        self.update_snapshot(|s| s.warm_runs += 1);
        *slot = Some(CachedSession::prime(&self.engine, identity, current.preamble.clone()));
        Ok(status)
    }

    async fn cold_run(
        &self,
        slot: &mut Option<CachedSession>,
        previous: Option<CachedSession>,
        identity: SessionIdentity,
        sink: &OutputSink,
    ) -> std::result::Result<ExitStatus, EngineFault> {
        // No two engines for this cache may run at once
        if let Some(previous) = previous {
            previous.drain().await?;
        }

        self.update_snapshot(|s| {
            s.identity = Some(identity.clone());
            s.cold_runs += 1;
        });

        let status = session::run_once(&self.engine, &identity, sink).await?;
        if status == ExitStatus::EngineUnavailable {
            self.update_snapshot(|s| s.identity = None);
            return Ok(status);
        }

        let preamble = match Document::read(&identity.source_path()).await {
            Ok(doc) => Some(doc.preamble_shared()),
            Err(e) => {
                debug!(error = %e, "not priming");
                None
            }
        };
        *slot = Some(CachedSession::prime(&self.engine, identity, preamble));
        Ok(status)
    }

    /// Close the cached engine's input and wait for it. Never kills.
    pub async fn shutdown(&self) -> std::result::Result<(), EngineFault> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.take() {
            info!(file = %session.identity.file, "draining cached engine");
            session.drain().await?;
        }
        self.update_snapshot(|s| s.identity = None);
        Ok(())
    }

    /// Current session identity and counters; does not wait on a running job.
    pub fn snapshot(&self) -> CacheSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// `dir/file` of the cached session, or empty.
    pub fn current_cache(&self) -> String {
        self.snapshot()
            .identity
            .map(|id| id.source_path().display().to_string())
            .unwrap_or_default()
    }

    fn update_snapshot(&self, f: impl FnOnce(&mut CacheSnapshot)) {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut snapshot);
    }
}
