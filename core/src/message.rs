//! Parsed HTTP response messages.
//!
//! # Design
//! `HttpMessage` is built once from the raw response text and never mutated.
//! It keeps the status line, a header map and a single extracted body.
//!
//! Chunked transfer encoding is only understood in its degenerate
//! single-chunk form: the first line after the headers is taken as the chunk
//! size and discarded, the second line is the body. Multi-chunk bodies are
//! not reassembled. The directory service answers with small single-chunk
//! bodies, which is all this parser has to handle.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::ParseError;

const SEPARATOR: &str = "\r\n\r\n";

/// A parsed HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage {
    status_line: String,
    headers: HashMap<String, String>,
    body: String,
}

impl HttpMessage {
    /// Parse a raw response into status line, headers and body.
    ///
    /// Fails with `ParseError::MissingBodySeparator` when `raw` has no
    /// `\r\n\r\n`. Header lines without a `:` are skipped, names and values
    /// are trimmed, and a repeated name keeps its last value. Header names
    /// are stored as received (case-sensitive).
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let split = raw.find(SEPARATOR).ok_or_else(|| ParseError::MissingBodySeparator {
            raw: raw.to_string(),
        })?;

        let mut lines = raw[..split].split("\r\n");
        let status_line = lines.next().unwrap_or_default().to_string();

        let mut headers = HashMap::new();
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            headers.insert(name.to_string(), value.trim().to_string());
        }

        let content = raw[split..].trim_start_matches(['\r', '\n']);
        let body = if headers.get("Transfer-Encoding").map(String::as_str) == Some("chunked") {
            content
                .split("\r\n")
                .nth(1)
                .ok_or(ParseError::MissingChunkData)?
                .to_string()
        } else {
            content.to_string()
        };

        Ok(Self {
            status_line,
            headers,
            body,
        })
    }

    /// The first line of the response, e.g. `HTTP/1.1 200 OK`.
    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    /// The numeric status code from the status line, if it has one.
    pub fn status_code(&self) -> Option<u16> {
        self.status_line.split_whitespace().nth(1)?.parse().ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// True when `Transfer-Encoding` is exactly `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.header("Transfer-Encoding") == Some("chunked")
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// The body split on `\n`. Each call starts a fresh iteration.
    pub fn body_lines(&self) -> impl Iterator<Item = &str> + '_ {
        self.body.split('\n')
    }
}

impl FromStr for HttpMessage {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Compares the body only.
impl PartialEq<str> for HttpMessage {
    fn eq(&self, other: &str) -> bool {
        self.body == other
    }
}

impl PartialEq<&str> for HttpMessage {
    fn eq(&self, other: &&str) -> bool {
        self.body == *other
    }
}
