//! Control server - loopback HTTP front end for the engine cache.

use chrono::{DateTime, Utc};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::{EngineCache, EngineFault, OutputSink};
use crate::error::Result;

use super::http::{self, ChunkedWriter, RequestHead};
use super::protocol::{
    CachedDocument, CompileRequest, StatusReport, LAUNCH_ACK, QUIT_PATH, STATUS_JSON_PATH,
    STATUS_PAGE_PATH, STATUS_TRAILER, TYPESET_PATH,
};

/// State shared by every connection handler.
struct Shared {
    engine: Arc<EngineCache>,
    started_at: DateTime<Utc>,
    stop: Notify,
    fault: Mutex<Option<EngineFault>>,
}

impl Shared {
    fn request_shutdown(&self) {
        self.stop.notify_one();
    }

    fn fail(&self, fault: EngineFault) {
        error!(error = %fault, "engine fault, stopping server");
        let mut slot = self.fault.lock().unwrap_or_else(|e| e.into_inner());
        slot.get_or_insert(fault);
        drop(slot);
        self.stop.notify_one();
    }

    fn take_fault(&self) -> Option<EngineFault> {
        self.fault.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// A bound, not yet serving, control server.
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl Server {
    /// Bind `127.0.0.1:<port>`. Port 0 picks a free one.
    pub async fn bind(port: u16, engine: EngineCache) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
        info!(addr = %listener.local_addr()?, "control server bound");
        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                engine: Arc::new(engine),
                started_at: Utc::now(),
                stop: Notify::new(),
                fault: Mutex::new(None),
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `/quit` or an engine fault.
    ///
    /// On `/quit`: stop accepting, let in-flight requests finish, drain the
    /// cached engine, and only then close the listener.
    pub async fn run(self) -> Result<()> {
        let Server { listener, shared } = self;
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shared.stop.notified() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection");
                        connections.spawn(handle_connection(stream, Arc::clone(&shared)));
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                },
                Some(done) = connections.join_next(), if !connections.is_empty() => {
                    log_connection_result(done);
                }
            }
        }

        if let Some(fault) = shared.take_fault() {
            connections.abort_all();
            return Err(fault.into());
        }

        info!("shutting down");
        while let Some(done) = connections.join_next().await {
            log_connection_result(done);
        }
        if let Some(fault) = shared.take_fault() {
            return Err(fault.into());
        }
        shared.engine.shutdown().await?;
        drop(listener);
        info!("server stopped");
        Ok(())
    }
}

/// Entry point for the private launch mode.
///
/// Fails before binding if the engine is not on PATH. Prints the launch
/// acknowledgment once the port is bound.
pub async fn run_launched(config: &Config) -> Result<()> {
    let engine = EngineCache::locate(&config.engine)?;
    let server = Server::bind(config.port, engine).await?;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(LAUNCH_ACK.as_bytes()).await?;
    stdout.flush().await?;

    server.run().await
}

fn log_connection_result(done: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match done {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "connection error"),
        Err(e) => warn!(error = %e, "connection task failed"),
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) -> Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let head = http::read_request_head(&mut reader).await?;
    debug!(method = %head.method, path = %head.path(), "request");

    if head.method != "GET" {
        http::write_response(&mut writer, 405, "text/plain", b"").await?;
        return Ok(());
    }

    match head.path() {
        TYPESET_PATH => typeset(&head, writer, &shared).await,
        STATUS_PAGE_PATH => {
            let page = status_page(&shared.engine.current_cache());
            http::write_response(&mut writer, 200, "text/html", page.as_bytes()).await?;
            Ok(())
        }
        STATUS_JSON_PATH => {
            let body = serde_json::to_vec(&status_report(&shared))
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            http::write_response(&mut writer, 200, "application/json", &body).await?;
            Ok(())
        }
        QUIT_PATH => {
            http::write_response(&mut writer, 200, "text/plain", b"The server is terminated").await?;
            shared.request_shutdown();
            Ok(())
        }
        _ => {
            http::write_response(&mut writer, 404, "text/plain", b"").await?;
            Ok(())
        }
    }
}

async fn typeset(
    head: &RequestHead,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    shared: &Shared,
) -> Result<()> {
    let request = match CompileRequest::from_query(head.query_pairs()) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "rejected compile request");
            http::write_response(&mut writer, 400, "text/plain", b"").await?;
            return Ok(());
        }
    };
    info!(dir = %request.directory.display(), file = %request.file, "typeset");

    let body = ChunkedWriter::start(writer, "text/plain; charset=utf-8", STATUS_TRAILER).await?;
    let mut body = Some(body);

    let (sink, mut output) = OutputSink::channel();
    let engine = Arc::clone(&shared.engine);
    // Runs to completion even if the client goes away
    let mut job = tokio::spawn(async move {
        engine
            .typeset(sink, request.directory, request.arguments, request.file)
            .await
    });
    let joined = loop {
        tokio::select! {
            Some(chunk) = output.recv() => forward(&mut body, &chunk).await,
            joined = &mut job => break joined,
        }
    };
    while let Ok(chunk) = output.try_recv() {
        forward(&mut body, &chunk).await;
    }

    let status = match joined {
        Ok(Ok(status)) => status,
        Ok(Err(fault)) => {
            shared.fail(fault);
            return Ok(());
        }
        Err(e) => {
            shared.fail(EngineFault::Task(e.to_string()));
            return Ok(());
        }
    };

    if let Some(body) = body {
        body.finish(&[(STATUS_TRAILER, status.code().to_string())]).await?;
    }
    Ok(())
}

/// Write one chunk; after the first failure the client is ignored.
async fn forward<W>(body: &mut Option<ChunkedWriter<W>>, chunk: &[u8])
where
    W: tokio::io::AsyncWrite + Unpin,
{
    if let Some(writer) = body.as_mut() {
        if let Err(e) = writer.write_chunk(chunk).await {
            debug!(error = %e, "client went away");
            *body = None;
        }
    }
}

fn status_report(shared: &Shared) -> StatusReport {
    let snapshot = shared.engine.snapshot();
    StatusReport {
        engine: shared.engine.engine().display().to_string(),
        started_at: shared.started_at,
        cached: snapshot.identity.map(|id| CachedDocument {
            directory: id.directory.display().to_string(),
            file: id.file,
            arguments: id.arguments,
        }),
        cold_runs: snapshot.cold_runs,
        warm_runs: snapshot.warm_runs,
    }
}

fn status_page(current: &str) -> String {
    format!(
        "This is the warmtex build server<br/>\
         Current cached file: {}<br/>\
         To quit, click this link -> <a href=\"{}\">quit</a>",
        escape_html(current),
        QUIT_PATH
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_page_escapes() {
        let page = status_page("/tmp/<a>&b/main.tex");
        assert!(page.contains("/tmp/&lt;a&gt;&amp;b/main.tex"));
        assert!(page.contains("href=\"/quit\""));
    }
}
