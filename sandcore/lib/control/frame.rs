use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::{SandcoreError, SandcoreResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The largest status line plus header block accepted from a control endpoint.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

/// The largest response body accepted from a control endpoint.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const HTTP_VERSION: &str = "HTTP/1.1";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The request method of a control call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    /// Reads a resource.
    Get,

    /// Creates or replaces a resource.
    Put,

    /// Partially updates a resource.
    Patch,
}

/// A framing fault in a control response.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The status line is not `HTTP/1.x <code> <reason>`.
    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),

    /// A header line has no `:` separator.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// The `Content-Length` header is not a non-negative integer.
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    /// The response uses a transfer encoding this client does not speak.
    #[error("unsupported transfer-encoding: {0}")]
    UnsupportedTransferEncoding(String),

    /// The peer closed the connection before the declared body was received.
    #[error("truncated body: expected {expected} bytes, received {received}")]
    TruncatedBody {
        /// Declared length.
        expected: usize,

        /// Bytes actually read.
        received: usize,
    },

    /// The peer closed the connection before a complete status line and header block.
    #[error("connection closed before a complete response header")]
    ConnectionClosed,

    /// The status line and headers exceed [`MAX_HEADER_BYTES`].
    #[error("response header exceeds {MAX_HEADER_BYTES} bytes")]
    HeaderTooLarge,

    /// The declared body length exceeds [`MAX_BODY_BYTES`].
    #[error("response body of {0} bytes exceeds {MAX_BODY_BYTES} bytes")]
    BodyTooLarge(usize),

    /// The body is not valid JSON.
    #[error("response body is not valid json: {0}")]
    InvalidJson(String),
}

/// A fully read control response, before payload decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// The status code.
    pub status: u16,

    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,

    /// The body, exactly `Content-Length` bytes.
    pub body: Bytes,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Verb {
    /// The method token as it appears on the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
        }
    }
}

impl RawResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if the peer will close the connection after this response.
    pub fn closes_connection(&self) -> bool {
        self.header("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }

    /// Decodes the body as JSON. An empty body decodes to `null`.
    pub fn json(&self) -> Result<serde_json::Value, ProtocolError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }

        serde_json::from_slice(&self.body).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Encodes a request with explicit `Content-Length` framing.
pub fn encode_request(verb: Verb, path: &str, body: Option<&[u8]>) -> Vec<u8> {
    let body = body.unwrap_or_default();
    let mut out = format!(
        "{} {} {}\r\nHost: localhost\r\nAccept: application/json\r\n",
        verb, path, HTTP_VERSION
    );

    if !body.is_empty() {
        out.push_str("Content-Type: application/json\r\n");
    }

    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

/// Reads exactly one response from `reader`.
///
/// I/O failures surface as [`SandcoreError::ControlTransport`]; anything the peer sent that does
/// not frame correctly surfaces as [`SandcoreError::Protocol`].
pub async fn read_response<R>(reader: &mut R) -> SandcoreResult<RawResponse>
where
    R: AsyncBufRead + Unpin,
{
    let mut header_bytes = 0;

    let status_line =
        read_line(reader, &mut header_bytes, ProtocolError::MalformedStatusLine).await?;
    let status = parse_status_line(&status_line)?;

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader, &mut header_bytes, ProtocolError::MalformedHeader).await?;
        if line.is_empty() {
            break;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedHeader(line.clone()))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    if let Some((_, encoding)) = headers.iter().find(|(k, _)| k == "transfer-encoding") {
        if !encoding.eq_ignore_ascii_case("identity") {
            return Err(ProtocolError::UnsupportedTransferEncoding(encoding.clone()).into());
        }
    }

    let length = match headers.iter().find(|(k, _)| k == "content-length") {
        Some((_, value)) => value
            .parse::<usize>()
            .map_err(|_| ProtocolError::InvalidContentLength(value.clone()))?,
        None => 0,
    };

    if length > MAX_BODY_BYTES {
        return Err(ProtocolError::BodyTooLarge(length).into());
    }

    let mut body = Vec::with_capacity(length);
    (&mut *reader)
        .take(length as u64)
        .read_to_end(&mut body)
        .await
        .map_err(SandcoreError::ControlTransport)?;

    if body.len() < length {
        return Err(ProtocolError::TruncatedBody {
            expected: length,
            received: body.len(),
        }
        .into());
    }

    Ok(RawResponse {
        status,
        headers,
        body: Bytes::from(body),
    })
}

/// Reads one CRLF- or LF-terminated line. A line that is not UTF-8 is reported with `malformed`.
async fn read_line<R>(
    reader: &mut R,
    consumed: &mut usize,
    malformed: fn(String) -> ProtocolError,
) -> SandcoreResult<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let remaining = MAX_HEADER_BYTES.saturating_sub(*consumed) as u64 + 1;
    let n = (&mut *reader)
        .take(remaining)
        .read_until(b'\n', &mut line)
        .await
        .map_err(SandcoreError::ControlTransport)?;

    *consumed += n;
    if *consumed > MAX_HEADER_BYTES {
        return Err(ProtocolError::HeaderTooLarge.into());
    }

    if line.last() != Some(&b'\n') {
        return Err(ProtocolError::ConnectionClosed.into());
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }

    String::from_utf8(line).map_err(|e| {
        let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
        malformed(lossy).into()
    })
}

fn parse_status_line(line: &str) -> Result<u16, ProtocolError> {
    let malformed = || ProtocolError::MalformedStatusLine(line.to_string());

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or_else(malformed)?;
    if !version.starts_with("HTTP/1.") {
        return Err(malformed());
    }

    let code = parts.next().ok_or_else(malformed)?;
    if code.len() != 3 {
        return Err(malformed());
    }

    code.parse::<u16>()
        .ok()
        .filter(|c| (100..600).contains(c))
        .ok_or_else(malformed)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
