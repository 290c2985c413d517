//! Engine processes and the cached session that owns a primed one.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::log_mux::{LogMultiplexer, OutputSink, OutputTarget};
use super::{EngineFault, ExitStatus};

const PUMP_BUFFER: usize = 8192;

/// What a session is keyed on. Argument order matters.
///
/// Compared byte for byte: `/tmp/doc` and `/tmp/doc/` are different
/// identities even though they name the same directory.
#[derive(Debug, Clone, Eq, Serialize)]
pub struct SessionIdentity {
    pub directory: PathBuf,
    pub file: String,
    pub arguments: Vec<String>,
}

impl SessionIdentity {
    pub fn source_path(&self) -> PathBuf {
        self.directory.join(&self.file)
    }

    /// File name without its extension.
    pub fn jobname(&self) -> String {
        Path::new(&self.file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.clone())
    }

    /// `engine <arguments> --jobname=<stem>` in the document directory.
    fn command(&self, engine: &Path) -> Command {
        let mut cmd = Command::new(engine);
        cmd.args(&self.arguments)
            .arg(format!("--jobname={}", self.jobname()))
            .current_dir(&self.directory)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl PartialEq for SessionIdentity {
    fn eq(&self, other: &Self) -> bool {
        // PathBuf equality compares components, which ignores trailing slashes
        self.directory.as_os_str() == other.directory.as_os_str()
            && self.file == other.file
            && self.arguments == other.arguments
    }
}

/// A started engine whose stdout/stderr are being copied somewhere.
struct RunningEngine {
    child: Child,
    pumps: Vec<JoinHandle<std::io::Result<()>>>,
}

impl RunningEngine {
    fn spawn(mut cmd: Command, target: Arc<dyn OutputTarget>) -> std::io::Result<Self> {
        let mut child = cmd.spawn()?;
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump(stdout, Arc::clone(&target)));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump(stderr, target));
        }
        Ok(Self { child, pumps })
    }

    /// Wait for exit and for every byte of output to be delivered.
    async fn finish(mut self) -> Result<ExitStatus, EngineFault> {
        let status = self.child.wait().await.map_err(EngineFault::Wait)?;
        for handle in self.pumps {
            handle
                .await
                .map_err(|e| EngineFault::Task(e.to_string()))?
                .map_err(EngineFault::Output)?;
        }
        Ok(ExitStatus::from(status))
    }
}

fn pump<R>(mut reader: R, target: Arc<dyn OutputTarget>) -> JoinHandle<std::io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; PUMP_BUFFER];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            target.write(&buf[..n]);
        }
    })
}

/// Run the engine once over the whole file, output straight to `sink`.
pub(crate) async fn run_once(
    engine: &Path,
    identity: &SessionIdentity,
    sink: &OutputSink,
) -> Result<ExitStatus, EngineFault> {
    let mut cmd = identity.command(engine);
    cmd.arg(&identity.file).stdin(Stdio::null());

    let started = Instant::now();
    let running = match RunningEngine::spawn(cmd, Arc::new(sink.clone())) {
        Ok(r) => r,
        Err(e) => {
            warn!(engine = %engine.display(), error = %e, "engine failed to start");
            sink.write(format!("failed to start {}: {}\n", engine.display(), e).as_bytes());
            return Ok(ExitStatus::EngineUnavailable);
        }
    };

    let status = running.finish().await?;
    info!(
        file = %identity.file,
        code = status.code(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "cold run finished"
    );
    Ok(status)
}

/// An engine that has consumed the preamble and is waiting for the body.
pub(crate) struct PrimedProcess {
    running: RunningEngine,
    stdin: ChildStdin,
}

impl PrimedProcess {
    /// Feed the body, close stdin, and wait for the run to finish.
    pub(crate) async fn complete(mut self, body: &[u8]) -> Result<ExitStatus, EngineFault> {
        self.stdin.write_all(body).await.map_err(EngineFault::Input)?;
        self.stdin.shutdown().await.map_err(EngineFault::Input)?;
        drop(self.stdin);
        self.running.finish().await
    }

    /// Close stdin without a body and wait for the engine to give up.
    async fn drain(self) -> Result<(), EngineFault> {
        drop(self.stdin);
        let status = self.running.finish().await?;
        debug!(code = status.code(), "primed engine drained");
        Ok(())
    }
}

type PrimingTask = JoinHandle<Result<Option<PrimedProcess>, EngineFault>>;

/// The one cached engine session.
///
/// The identity and preamble are fixed when the session is created; the
/// process itself is started by a background task. Anything that needs the
/// process awaits that task first.
pub(crate) struct CachedSession {
    pub identity: SessionIdentity,
    pub preamble: Option<Arc<[u8]>>,
    mux: Arc<LogMultiplexer>,
    priming: Option<PrimingTask>,
}

impl CachedSession {
    /// Record a session and start priming it in the background.
    ///
    /// Without a preamble there is nothing to prime; the session only
    /// remembers its identity.
    pub(crate) fn prime(
        engine: &Path,
        identity: SessionIdentity,
        preamble: Option<Arc<[u8]>>,
    ) -> Self {
        let mux = Arc::new(LogMultiplexer::new());
        let priming = preamble.as_ref().map(|preamble| {
            let cmd = identity.command(engine);
            let target: Arc<dyn OutputTarget> = mux.clone();
            let preamble = Arc::clone(preamble);
            let engine = engine.to_path_buf();
            tokio::spawn(async move { start_primed(cmd, target, &engine, &preamble).await })
        });

        Self {
            identity,
            preamble,
            mux,
            priming,
        }
    }

    /// Wait for priming to finish and take the process, if one started.
    pub(crate) async fn take_process(&mut self) -> Result<Option<PrimedProcess>, EngineFault> {
        match self.priming.take() {
            Some(task) => task.await.map_err(|e| EngineFault::Task(e.to_string()))?,
            None => Ok(None),
        }
    }

    /// Route buffered and future priming output to `sink`.
    pub(crate) fn attach(&self, sink: OutputSink) {
        self.mux.attach(sink);
    }

    /// Close the primed process's input and wait for it to exit.
    pub(crate) async fn drain(mut self) -> Result<(), EngineFault> {
        if let Some(process) = self.take_process().await? {
            process.drain().await?;
        }
        Ok(())
    }
}

async fn start_primed(
    mut cmd: Command,
    target: Arc<dyn OutputTarget>,
    engine: &Path,
    preamble: &[u8],
) -> Result<Option<PrimedProcess>, EngineFault> {
    cmd.stdin(Stdio::piped());
    let mut running = match RunningEngine::spawn(cmd, target) {
        Ok(r) => r,
        Err(e) => {
            warn!(engine = %engine.display(), error = %e, "could not start primed engine");
            return Ok(None);
        }
    };

    let Some(mut stdin) = running.child.stdin.take() else {
        return Err(EngineFault::Input(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "engine stdin was not captured",
        )));
    };
    stdin.write_all(preamble).await.map_err(EngineFault::Input)?;
    stdin.flush().await.map_err(EngineFault::Input)?;
    debug!(bytes = preamble.len(), pid = ?running.child.id(), "engine primed");

    Ok(Some(PrimedProcess { running, stdin }))
}
