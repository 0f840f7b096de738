//! Minimal HTTP/1.1 wire handling for the mock servers.
//!
//! The mocks answer scripted exchanges; they are not a general-purpose
//! HTTP server. Parsing covers exactly what request matching needs: the
//! request line, the header block, and a Content-Length-delimited body.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};

use crate::matching::ScriptedResponse;

/// Parsed request line + headers of one incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestHead {
    pub method: String,
    pub path: String,
    pub version: String,
    /// Header names are stored lowercased.
    pub headers: Vec<(String, String)>,
}

impl HttpRequestHead {
    /// First value of the named header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Client-supplied correlation identifier, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.header("uuid")
    }
}

/// Read one request head from the stream. Returns `Ok(None)` on a clean
/// EOF before any request byte (the peer closed the connection).
pub async fn read_request_head<R>(reader: &mut R) -> io::Result<Option<HttpRequestHead>>
where
    R: AsyncBufReadExt + Unpin,
{
    let request_line = match read_line(reader).await? {
        Some(line) if !line.is_empty() => line,
        _ => return Ok(None),
    };

    let mut parts = request_line.split_whitespace();
    let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(p), Some(v)) => (m.to_string(), p.to_string(), v.to_string()),
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed request line: {request_line:?}"),
            ));
        }
    };

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader).await?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "EOF inside header block")
        })?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    Ok(Some(HttpRequestHead {
        method,
        path,
        version,
        headers,
    }))
}

/// Read a Content-Length-delimited body.
pub async fn read_body<R>(reader: &mut R, length: usize) -> io::Result<Vec<u8>>
where
    R: AsyncReadExt + Unpin,
{
    let mut body = vec![0u8; length];
    if length > 0 {
        reader.read_exact(&mut body).await?;
    }
    Ok(body)
}

async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// Serialize a scripted response. A Content-Length header is added unless
/// the script already declares one; everything else is played exactly as
/// scripted.
pub fn serialize_response(response: &ScriptedResponse) -> Vec<u8> {
    let reason = response
        .reason
        .as_deref()
        .unwrap_or_else(|| default_reason(response.status));

    let mut out = format!("HTTP/1.1 {} {}\r\n", response.status, reason);
    let mut has_content_length = false;
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("content-length") {
            has_content_length = true;
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    if !has_content_length {
        out.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    }
    out.push_str("\r\n");
    out.push_str(&response.body);
    out.into_bytes()
}

/// Write a scripted response to the stream, honoring its delay metadata.
pub async fn write_response<W>(writer: &mut W, response: &ScriptedResponse) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    if let Some(delay) = response.delay() {
        tokio::time::sleep(delay).await;
    }
    writer.write_all(&serialize_response(response)).await?;
    writer.flush().await
}

fn default_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}
