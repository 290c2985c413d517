//! Just enough HTTP/1.1 for the control plane.
//!
//! One request per connection (`Connection: close`). Compile output goes out
//! chunked so the exit status can follow the body as a trailer.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::error::{Result, WarmtexError};

/// Upper bound on a request or response head.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Request line of an incoming request. Headers are read and ignored.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    url: Url,
}

impl RequestHead {
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Decoded query pairs in the order they appear.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.url.query_pairs().into_owned().collect()
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_field(&self.headers, name)
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }
}

/// Case-insensitive header/trailer lookup.
pub fn find_field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

async fn read_head_lines<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut total = 0usize;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(WarmtexError::Protocol("connection closed mid-head".into()));
        }
        total += n;
        if total > MAX_HEAD_BYTES {
            return Err(WarmtexError::Protocol("head too large".into()));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if lines.is_empty() {
                // Tolerate stray blank lines before the start line
                continue;
            }
            return Ok(lines);
        }
        lines.push(line.to_string());
    }
}

fn parse_fields(lines: &[String]) -> Vec<(String, String)> {
    lines
        .iter()
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

pub async fn read_request_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<RequestHead> {
    let lines = read_head_lines(reader).await?;
    let mut parts = lines[0].split_whitespace();
    let (method, target) = match (parts.next(), parts.next()) {
        (Some(m), Some(t)) => (m.to_string(), t),
        _ => return Err(WarmtexError::Protocol(format!("bad request line: {}", lines[0]))),
    };
    let url = Url::parse("http://localhost/")
        .and_then(|base| base.join(target))
        .map_err(|e| WarmtexError::Protocol(format!("bad request target {}: {}", target, e)))?;
    Ok(RequestHead { method, url })
}

pub async fn read_response_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<ResponseHead> {
    let lines = read_head_lines(reader).await?;
    let status = lines[0]
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| WarmtexError::Protocol(format!("bad status line: {}", lines[0])))?;
    Ok(ResponseHead {
        status,
        headers: parse_fields(&lines[1..]),
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

/// Write a complete response with a fixed-length body.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason(status),
        content_type,
        body.len()
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// A chunked response body that ends with trailers.
pub struct ChunkedWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> ChunkedWriter<W> {
    /// Send a 200 head announcing `trailer`.
    pub async fn start(mut inner: W, content_type: &str, trailer: &str) -> std::io::Result<Self> {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nTrailer: {}\r\nConnection: close\r\n\r\n",
            content_type, trailer
        );
        inner.write_all(head.as_bytes()).await?;
        inner.flush().await?;
        Ok(Self { inner })
    }

    pub async fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        if data.is_empty() {
            // A zero-length chunk would end the body
            return Ok(());
        }
        self.inner
            .write_all(format!("{:x}\r\n", data.len()).as_bytes())
            .await?;
        self.inner.write_all(data).await?;
        self.inner.write_all(b"\r\n").await?;
        self.inner.flush().await
    }

    /// Terminating chunk plus trailer fields.
    pub async fn finish(mut self, trailers: &[(&str, String)]) -> std::io::Result<()> {
        let mut tail = String::from("0\r\n");
        for (name, value) in trailers {
            tail.push_str(&format!("{}: {}\r\n", name, value));
        }
        tail.push_str("\r\n");
        self.inner.write_all(tail.as_bytes()).await?;
        self.inner.flush().await?;
        self.inner.shutdown().await
    }
}

/// Copy a chunked body into `out` as it arrives; return the trailers.
///
/// A body cut off before its terminating chunk is an error.
pub async fn read_chunked<R, W>(reader: &mut R, out: &mut W) -> Result<Vec<(String, String)>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let mut size_line = String::new();
        if reader.read_line(&mut size_line).await? == 0 {
            return Err(WarmtexError::Protocol("body ended before last chunk".into()));
        }
        let size_text = size_line.trim().split(';').next().unwrap_or("");
        let size = u64::from_str_radix(size_text, 16)
            .map_err(|_| WarmtexError::Protocol(format!("bad chunk size: {:?}", size_line)))?;

        if size == 0 {
            let mut trailer_lines = Vec::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await? == 0 {
                    break;
                }
                let line = line.trim_end_matches(['\r', '\n']);
                if line.is_empty() {
                    break;
                }
                trailer_lines.push(line.to_string());
            }
            out.flush().await?;
            return Ok(parse_fields(&trailer_lines));
        }

        let copied = tokio::io::copy(&mut (&mut *reader).take(size), out).await?;
        if copied != size {
            return Err(WarmtexError::Protocol("chunk cut short".into()));
        }
        out.flush().await?;

        let mut crlf = String::new();
        reader.read_line(&mut crlf).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_request_head() {
        let raw = b"GET /typeset?args=-a&args=main.tex&dir=%2Ftmp%2Fdoc HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let head = read_request_head(&mut reader).await.unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path(), "/typeset");
        assert_eq!(
            head.query_pairs(),
            vec![
                ("args".to_string(), "-a".to_string()),
                ("args".to_string(), "main.tex".to_string()),
                ("dir".to_string(), "/tmp/doc".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_truncated_head() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\n";
        let mut reader = BufReader::new(&raw[..]);
        assert!(read_request_head(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_chunked_with_trailer() {
        let (client, server) = tokio::io::duplex(4096);

        let writer = tokio::spawn(async move {
            let mut body = ChunkedWriter::start(server, "text/plain", "Typeset-Status")
                .await
                .unwrap();
            body.write_chunk(b"This is LuaHBTeX\n").await.unwrap();
            body.write_chunk(b"").await.unwrap();
            body.write_chunk(b"Output written on main.pdf\n").await.unwrap();
            body.finish(&[("Typeset-Status", "1".to_string())]).await.unwrap();
        });

        let mut reader = BufReader::new(client);
        let head = read_response_head(&mut reader).await.unwrap();
        assert_eq!(head.status, 200);
        assert!(head.is_chunked());
        assert_eq!(head.header("trailer"), Some("Typeset-Status"));

        let mut out = Vec::new();
        let trailers = read_chunked(&mut reader, &mut out).await.unwrap();
        writer.await.unwrap();

        assert_eq!(out, b"This is LuaHBTeX\nOutput written on main.pdf\n");
        assert_eq!(find_field(&trailers, "typeset-status"), Some("1"));
    }

    #[tokio::test]
    async fn test_chunked_cut_off() {
        let raw = b"5\r\nhello\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let mut out = Vec::new();
        assert!(read_chunked(&mut reader, &mut out).await.is_err());
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_fixed_response() {
        let mut raw = Vec::new();
        write_response(&mut raw, 400, "text/plain", b"").await.unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
    }
}
