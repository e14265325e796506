//! HTTP/1.1 request building and the blocking request function.
//!
//! # Design
//! `HttpRequest` describes one request as plain data. `to_wire` renders the
//! exact bytes sent on the socket and refuses to build anything that would
//! not fit the wire buffer, instead of truncating it.
//!
//! `request` connects a `Transport`, sends the rendered bytes in one call,
//! collects the response into a fixed-capacity buffer and hands it to
//! `HttpMessage::parse`. The transport is disconnected on every exit path.
//! A response whose framing announces more than the buffer holds is an
//! error, not a truncated body.
//!
//! Query strings can carry the challenge token, so log lines only ever show
//! the path before `?`.

use std::fmt;

use tracing::{debug, error};

use crate::error::{HttpError, ParseError, TransportError};
use crate::message::HttpMessage;
use crate::transport::{Session, Transport};

/// Largest serialized request `to_wire` will produce.
pub const MAX_REQUEST_LEN: usize = 16 * 1024;

/// Bound on the body length scan used for `Content-Length`.
pub const MAX_BODY_SCAN: usize = 16_000;

/// Capacity of the response buffer.
pub const RESPONSE_BUFFER_LEN: usize = 16 * 1024;

pub const DEFAULT_PORT: u16 = 80;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// Map a method name to a variant. Anything unrecognised is `Get`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "DELETE" => HttpMethod::Delete,
            _ => HttpMethod::Get,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub host: String,
    /// Path plus optional `?query`.
    pub path: String,
    pub content_type: String,
    pub body: String,
}

impl HttpRequest {
    /// A request with a JSON content type and an empty body.
    pub fn new(method: HttpMethod, host: &str, path: &str) -> Self {
        Self {
            method,
            host: host.to_string(),
            path: path.to_string(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            body: String::new(),
        }
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = body;
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    /// Render the request line, `Host`, `Content-Type`, `Content-Length`,
    /// a blank line and the body.
    pub fn to_wire(&self) -> Result<Vec<u8>, HttpError> {
        if self.host.is_empty() {
            return Err(HttpError::EmptyHost);
        }
        let content_length = self.body.len().min(MAX_BODY_SCAN);
        if content_length < self.body.len() {
            return Err(HttpError::RequestTooLarge {
                len: self.body.len(),
                max: MAX_BODY_SCAN,
            });
        }

        let mut wire = format!("{} {} HTTP/1.1\r\n", self.method, self.path);
        wire.push_str(&format_header("Host", &self.host));
        wire.push_str(&format_header("Content-Type", &self.content_type));
        wire.push_str(&format_header("Content-Length", &content_length.to_string()));
        wire.push_str("\r\n");
        wire.push_str(&self.body);

        if wire.len() > MAX_REQUEST_LEN {
            return Err(HttpError::RequestTooLarge {
                len: wire.len(),
                max: MAX_REQUEST_LEN,
            });
        }
        Ok(wire.into_bytes())
    }
}

/// Format one header line, `Name: value\r\n`.
pub fn format_header(name: &str, value: &str) -> String {
    format!("{name}: {value}\r\n")
}

/// A response as returned by `request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub message: HttpMessage,
}

impl HttpResponse {
    pub fn body(&self) -> &str {
        self.message.body()
    }
}

/// Perform one blocking request over `transport` to `req.host:port`.
pub fn request<T: Transport + ?Sized>(
    transport: &mut T,
    port: u16,
    req: &HttpRequest,
) -> Result<HttpResponse, HttpError> {
    let wire = req.to_wire()?;

    let result = round_trip(transport, port, req, &wire);
    if let Err(e) = &result {
        error!(
            method = %req.method,
            host = %req.host,
            path = %log_path(&req.path),
            error = %e,
            "could not process HTTP request"
        );
    }
    let raw = result?;

    let message = HttpMessage::parse(&raw)?;
    let status = message
        .status_code()
        .ok_or_else(|| ParseError::InvalidStatusLine {
            line: message.status_line().to_string(),
        })?;
    debug!(method = %req.method, path = %log_path(&req.path), status, "HTTP request complete");

    Ok(HttpResponse { status, message })
}

/// `path` without its query string.
fn log_path(path: &str) -> &str {
    path.split_once('?').map_or(path, |(path, _)| path)
}

fn round_trip<T: Transport + ?Sized>(
    transport: &mut T,
    port: u16,
    request: &HttpRequest,
    wire: &[u8],
) -> Result<String, HttpError> {
    let mut session = Session::open(transport, port, &request.host)?;
    session.send(wire)?;

    let mut buf = vec![0u8; RESPONSE_BUFFER_LEN];
    let mut received = 0;
    while received < buf.len() {
        let n = session.receive(&mut buf[received..])?;
        if n == 0 {
            break;
        }
        received += n;
        if response_complete(&buf[..received]) {
            break;
        }
    }
    if received == 0 {
        return Err(TransportError::receive("connection closed before a response was received").into());
    }
    if received == buf.len() && !response_complete(&buf) {
        return Err(HttpError::ResponseTooLarge {
            max: RESPONSE_BUFFER_LEN,
        });
    }

    Ok(String::from_utf8_lossy(&buf[..received]).into_owned())
}

/// Whether `data` holds a full response: headers plus the body their
/// framing announces. Without `Content-Length` or chunking, whatever has
/// arrived once the headers are complete is taken as the response.
fn response_complete(data: &[u8]) -> bool {
    let Some(split) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&data[..split]);
    let body = &data[split + 4..];

    for line in head.split("\r\n").skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("Content-Length") {
            if let Ok(len) = value.parse::<usize>() {
                return body.len() >= len;
            }
        } else if name.eq_ignore_ascii_case("Transfer-Encoding") && value.eq_ignore_ascii_case("chunked") {
            return body.ends_with(b"0\r\n\r\n");
        }
    }
    true
}
