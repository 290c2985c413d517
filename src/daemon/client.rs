//! Client side - talk to the control server, starting one if needed.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, WarmtexError};

use super::http;
use super::protocol::{LAUNCH_ACK, STATUS_TRAILER};

async fn connect(url: &Url) -> Result<TcpStream> {
    let host = url.host_str().unwrap_or("127.0.0.1");
    let port = url.port_or_known_default().unwrap_or(80);
    TcpStream::connect((host, port)).await.map_err(|e| {
        debug!(%host, port, error = %e, "connect failed");
        WarmtexError::Unreachable(format!("{}:{}", host, port))
    })
}

async fn send_get(stream: &mut TcpStream, url: &Url) -> Result<()> {
    let target = match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    };
    let host = url.host_str().unwrap_or("127.0.0.1");
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nTE: trailers\r\nConnection: close\r\n\r\n",
        target, host
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Issue a compile request, copying engine output to `out` as it streams.
///
/// Returns the engine's exit status from the response trailer.
pub async fn request_typeset<W: AsyncWrite + Unpin>(url: &Url, out: &mut W) -> Result<i32> {
    let mut stream = connect(url).await?;
    send_get(&mut stream, url).await?;

    let mut reader = BufReader::new(stream);
    let head = http::read_response_head(&mut reader).await?;
    match head.status {
        200 => {}
        400 => return Err(WarmtexError::BadRequest),
        other => {
            return Err(WarmtexError::Protocol(format!(
                "unexpected status {}",
                other
            )))
        }
    }
    if !head.is_chunked() {
        return Err(WarmtexError::Protocol("compile response is not chunked".into()));
    }

    let trailers = http::read_chunked(&mut reader, out).await?;
    http::find_field(&trailers, STATUS_TRAILER)
        .and_then(|v| v.parse::<i32>().ok())
        .ok_or(WarmtexError::MissingStatus)
}

/// Plain GET for the status endpoints. Returns status code and body.
pub async fn get(url: &Url) -> Result<(u16, Vec<u8>)> {
    let mut stream = connect(url).await?;
    send_get(&mut stream, url).await?;

    let mut reader = BufReader::new(stream);
    let head = http::read_response_head(&mut reader).await?;
    let mut body = Vec::new();
    if head.is_chunked() {
        http::read_chunked(&mut reader, &mut body).await?;
    } else {
        reader.read_to_end(&mut body).await?;
    }
    Ok((head.status, body))
}

/// Start a server in the background and wait for its acknowledgment.
///
/// The child must print [`LAUNCH_ACK`] on stdout within `timeout`. If it
/// times out it is killed; if it exits first, that is reported instead. On
/// success the child is left running on its own.
pub async fn launch_server(program: &Path, args: &[String], timeout: Duration) -> Result<()> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;
    let pid = child.id();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| WarmtexError::LaunchExited("stdout not captured".into()))?;

    let outcome = tokio::time::timeout(timeout, wait_for_ack(stdout, &mut child)).await;
    match outcome {
        Ok(Ok(())) => {
            info!(?pid, "server launched");
            Ok(())
        }
        Ok(Err(e)) => {
            let _ = child.start_kill();
            Err(e)
        }
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            Err(WarmtexError::LaunchTimeout(timeout))
        }
    }
}

async fn wait_for_ack<R: AsyncRead + Unpin>(mut stdout: R, child: &mut Child) -> Result<()> {
    let ack = LAUNCH_ACK.as_bytes();
    let mut seen = Vec::with_capacity(ack.len());
    let mut buf = [0u8; 256];

    loop {
        tokio::select! {
            read = stdout.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    let status = child.wait().await?;
                    return Err(WarmtexError::LaunchExited(status.to_string()));
                }
                seen.extend_from_slice(&buf[..n]);
                if seen.starts_with(ack) {
                    return Ok(());
                }
            }
            status = child.wait() => {
                return Err(WarmtexError::LaunchExited(status?.to_string()));
            }
        }
    }
}
