//! Client for the master-server registration protocol.
//!
//! # Design
//! `MasterServerClient` owns the registration state of one relay server:
//! whether it is registered, the challenge token handed out by the directory
//! and the trust level it was assigned. Only `register` and `unregister`
//! change that state. The client is meant to have a single owner; share it
//! across threads through `HeartbeatService` rather than a lock.
//!
//! The challenge token authenticates heartbeats and unregistration, so it is
//! never logged or printed in full.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::MasterServerConfig;
use crate::error::{HttpError, MasterServerError};
use crate::http::{self, HttpMethod, HttpRequest, HttpResponse};
use crate::transport::{TcpTransport, Transport};
use crate::types::{HeartbeatPayload, RegistrationStatus, ServerInfo};

/// Trust level before the directory has assigned one.
pub const TRUST_LEVEL_UNKNOWN: i32 = -1;

const SERVER_LIST: &str = "server-list";
const PUBLIC_IP: &str = "get-public-ip";

/// Stateful client for one server's listing on the directory service.
pub struct MasterServerClient<T: Transport = TcpTransport> {
    config: MasterServerConfig,
    transport: T,
    is_registered: bool,
    trust_level: i32,
    token: String,
}

impl MasterServerClient<TcpTransport> {
    /// A client speaking TCP with the timeouts from `config`.
    pub fn from_config(config: MasterServerConfig) -> Self {
        let transport = config.tcp_transport();
        Self::new(config, transport)
    }
}

impl<T: Transport> MasterServerClient<T> {
    pub fn new(config: MasterServerConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            is_registered: false,
            trust_level: TRUST_LEVEL_UNKNOWN,
            token: String::new(),
        }
    }

    pub fn config(&self) -> &MasterServerConfig {
        &self.config
    }

    pub fn is_registered(&self) -> bool {
        self.is_registered
    }

    /// The last trust level assigned, or `TRUST_LEVEL_UNKNOWN`.
    pub fn trust_level(&self) -> i32 {
        self.trust_level
    }

    /// The challenge token from the last successful registration.
    pub fn challenge(&self) -> &str {
        &self.token
    }

    pub fn status(&self) -> RegistrationStatus {
        RegistrationStatus {
            registered: self.is_registered,
            trust_level: self.trust_level,
        }
    }

    /// Register `info` on the server list.
    ///
    /// The server description travels in the query string of an empty POST.
    /// On success the challenge token and trust level are stored and the
    /// client is marked registered; on any failure nothing changes.
    pub fn register(&mut self, info: &ServerInfo) -> Result<(), MasterServerError> {
        let path = format!("{}?{}", self.config.endpoint(SERVER_LIST), info.to_query());
        info!(name = %info.name, host = %self.config.host, "attempting to register on server list");

        let response = self
            .send(HttpRequest::new(HttpMethod::Post, &self.config.host, &path))
            .inspect_err(|e| error!(error = %e, "registration failed"))?;
        check_status(&response).inspect_err(|e| error!(error = %e, "registration failed"))?;
        let (token, trust_level) = parse_registration(response.body())
            .inspect_err(|e| error!(error = %e, "registration failed"))?;

        self.token = token;
        self.trust_level = trust_level;
        self.is_registered = true;
        info!(trust_level, challenge = %redact(&self.token), "registered on server list");
        Ok(())
    }

    /// Report the connected users to the directory.
    ///
    /// Requires a prior registration and a 200 answer. A non-200 usually
    /// means the directory forgot the token and the server should register
    /// again.
    pub fn heartbeat<U: Serialize>(&mut self, users: &[U]) -> Result<(), MasterServerError> {
        if !self.is_registered {
            return Err(MasterServerError::NotRegistered);
        }
        let payload = HeartbeatPayload {
            challenge: &self.token,
            users,
        };
        let body = serde_json::to_string(&payload).map_err(|e| MasterServerError::Serialization(e.to_string()))?;
        let path = self.config.endpoint(SERVER_LIST);

        let response = self
            .send(HttpRequest::new(HttpMethod::Put, &self.config.host, &path).with_body(body))
            .inspect_err(|e| error!(error = %e, "heartbeat failed"))?;
        check_status(&response).inspect_err(|e| warn!(error = %e, "heartbeat rejected"))?;

        debug!(users = users.len(), "heartbeat sent");
        Ok(())
    }

    /// Remove this server from the server list.
    ///
    /// Any answer from the directory, even a non-200 or an unreadable one,
    /// marks the client unregistered. Only a failure to reach the directory
    /// leaves it registered, since the listing is then in an unknown state.
    pub fn unregister(&mut self) -> Result<(), MasterServerError> {
        if !self.is_registered {
            return Err(MasterServerError::NotRegistered);
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("challenge", &self.token)
            .finish();
        let path = format!("{}?{query}", self.config.endpoint(SERVER_LIST));

        match self.send(HttpRequest::new(HttpMethod::Delete, &self.config.host, &path)) {
            Ok(response) if response.status != 200 => {
                warn!(status = response.status, "directory did not confirm unregistration");
            }
            Ok(_) => {}
            Err(MasterServerError::Http(HttpError::Malformed(e))) => {
                warn!(error = %e, "unreadable reply to unregistration");
            }
            Err(e) => {
                error!(error = %e, "failed to unregister server");
                return Err(e);
            }
        }

        self.is_registered = false;
        info!("unregistered from server list");
        Ok(())
    }

    /// Ask the directory for this host's public address. The body is
    /// returned verbatim.
    pub fn retrieve_public_ip(&mut self) -> Result<String, MasterServerError> {
        let path = self.config.endpoint(PUBLIC_IP);
        let response = self
            .send(HttpRequest::new(HttpMethod::Get, &self.config.host, &path))
            .inspect_err(|e| error!(error = %e, "failed to retrieve public IP address"))?;
        Ok(response.body().to_string())
    }

    fn send(&mut self, req: HttpRequest) -> Result<HttpResponse, MasterServerError> {
        Ok(http::request(&mut self.transport, self.config.port, &req)?)
    }
}

impl<T: Transport> fmt::Debug for MasterServerClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterServerClient")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("is_registered", &self.is_registered)
            .field("trust_level", &self.trust_level)
            .field("token", &redact(&self.token))
            .finish()
    }
}

/// Map anything but 200 to `HttpStatus`.
fn check_status(response: &HttpResponse) -> Result<(), MasterServerError> {
    if response.status == 200 {
        return Ok(());
    }
    Err(MasterServerError::HttpStatus {
        status: response.status,
        body: response.body().to_string(),
    })
}

/// Extract `(challenge, verified-level)` from a register reply.
fn parse_registration(body: &str) -> Result<(String, i32), MasterServerError> {
    let root: Value = serde_json::from_str(body).map_err(|e| MasterServerError::JsonParse(e.to_string()))?;
    let object = root
        .as_object()
        .ok_or_else(|| MasterServerError::InvalidResponseShape("expected a JSON object".to_string()))?;

    let trust_level = object.get("verified-level").and_then(as_trust_level).ok_or_else(|| {
        MasterServerError::InvalidResponseShape("`verified-level` is missing or not a number".to_string())
    })?;
    let challenge = object
        .get("challenge")
        .and_then(Value::as_str)
        .ok_or_else(|| MasterServerError::InvalidResponseShape("`challenge` is missing or not a string".to_string()))?;

    Ok((challenge.to_string(), trust_level))
}

/// Any JSON number that fits an `i32` once truncated.
fn as_trust_level(value: &Value) -> Option<i32> {
    let n = value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))?;
    i32::try_from(n).ok()
}

/// First few characters of a token, enough to correlate log lines.
fn redact(token: &str) -> String {
    if token.is_empty() {
        return String::new();
    }
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}…")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::error::{ParseError, TransportError};

    /// Serves one scripted reply per connection and records what was sent.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: VecDeque<Result<String, TransportError>>,
        current: Option<Vec<u8>>,
        requests: Vec<String>,
        connects: usize,
    }

    impl Transport for ScriptedTransport {
        fn connect(&mut self, _port: u16, _host: &str) -> Result<(), TransportError> {
            self.connects += 1;
            match self.replies.pop_front() {
                Some(Ok(reply)) => {
                    self.current = Some(reply.into_bytes());
                    Ok(())
                }
                Some(Err(e)) => Err(e),
                None => Err(TransportError::connect("no scripted reply")),
            }
        }

        fn send(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
            self.requests.push(String::from_utf8_lossy(buf).into_owned());
            Ok(buf.len())
        }

        fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            match self.current.take() {
                Some(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                None => Ok(0),
            }
        }

        fn disconnect(&mut self) {
            self.current = None;
        }
    }

    fn reply(status: &str, body: &str) -> Result<String, TransportError> {
        Ok(format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ))
    }

    fn client(replies: Vec<Result<String, TransportError>>) -> MasterServerClient<ScriptedTransport> {
        let config = MasterServerConfig {
            host: "directory.test".to_string(),
            ..Default::default()
        };
        let transport = ScriptedTransport {
            replies: replies.into(),
            ..Default::default()
        };
        MasterServerClient::new(config, transport)
    }

    fn info() -> ServerInfo {
        ServerInfo {
            ip: "203.0.113.7".to_string(),
            port: 12000,
            name: "Test server".to_string(),
            terrain_name: "simple2".to_string(),
            max_clients: 16,
            version: "RoRnet_2.44".to_string(),
            is_public: false,
        }
    }

    fn registered_client(mut replies: Vec<Result<String, TransportError>>) -> MasterServerClient<ScriptedTransport> {
        replies.insert(0, reply("200 OK", r#"{"verified-level":3,"challenge":"abc"}"#));
        let mut c = client(replies);
        c.register(&info()).unwrap();
        c
    }

    #[test]
    fn new_client_is_unregistered() {
        let c = client(Vec::new());
        assert!(!c.is_registered());
        assert_eq!(c.trust_level(), TRUST_LEVEL_UNKNOWN);
        assert_eq!(c.challenge(), "");
    }

    #[test]
    fn register_success_stores_token_and_trust_level() {
        let c = registered_client(Vec::new());
        assert!(c.is_registered());
        assert_eq!(c.trust_level(), 3);
        assert_eq!(c.challenge(), "abc");

        let sent = &c.transport.requests[0];
        assert!(sent.starts_with(
            "POST /server-list?ip=203.0.113.7&port=12000&name=Test+server&terrain-name=simple2\
             &max-clients=16&version=RoRnet_2.44&pw=0 HTTP/1.1\r\n"
        ));
        assert!(sent.contains("Host: directory.test\r\n"));
        assert!(sent.contains("Content-Type: application/json\r\n"));
        assert!(sent.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn register_accepts_fractional_trust_level_and_chunked_reply() {
        let body = r#"{"verified-level":2.0,"challenge":"tok"}"#;
        let raw = format!(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{body}\r\n0\r\n\r\n",
            body.len()
        );
        let mut c = client(vec![Ok(raw)]);
        c.register(&info()).unwrap();
        assert_eq!(c.trust_level(), 2);
        assert_eq!(c.challenge(), "tok");
    }

    #[test]
    fn register_rejected_status_leaves_state_untouched() {
        let mut c = client(vec![reply("403 Forbidden", "banned")]);
        let err = c.register(&info()).unwrap_err();
        assert!(matches!(err, MasterServerError::HttpStatus { status: 403, ref body } if body == "banned"));
        assert!(!c.is_registered());
        assert_eq!(c.trust_level(), TRUST_LEVEL_UNKNOWN);
        assert_eq!(c.challenge(), "");
    }

    #[test]
    fn register_wrong_shape_is_invalid_response() {
        let mut c = client(vec![reply("200 OK", r#"{"verified-level":"x"}"#)]);
        let err = c.register(&info()).unwrap_err();
        assert!(matches!(err, MasterServerError::InvalidResponseShape(_)));
        assert!(!c.is_registered());
        assert_eq!(c.trust_level(), TRUST_LEVEL_UNKNOWN);
    }

    #[test]
    fn register_missing_challenge_is_invalid_response() {
        let mut c = client(vec![reply("200 OK", r#"{"verified-level":1,"challenge":7}"#)]);
        assert!(matches!(
            c.register(&info()),
            Err(MasterServerError::InvalidResponseShape(_))
        ));
    }

    #[test]
    fn register_non_object_is_invalid_response() {
        let mut c = client(vec![reply("200 OK", "[1,2]")]);
        assert!(matches!(
            c.register(&info()),
            Err(MasterServerError::InvalidResponseShape(_))
        ));
    }

    #[test]
    fn register_unparseable_body_is_json_error() {
        let mut c = client(vec![reply("200 OK", "<html>oops</html>")]);
        assert!(matches!(c.register(&info()), Err(MasterServerError::JsonParse(_))));
        assert!(!c.is_registered());
    }

    #[test]
    fn register_transport_failure_is_reported() {
        let mut c = client(vec![Err(TransportError::connect("connection refused"))]);
        let err = c.register(&info()).unwrap_err();
        assert!(err.is_transport());
        assert!(!c.is_registered());
    }

    #[test]
    fn register_malformed_reply_is_reported() {
        let mut c = client(vec![Ok("HTTP/1.1 200 OK\r\nContent-Type: text/plain".to_string())]);
        let err = c.register(&info()).unwrap_err();
        assert!(matches!(
            err,
            MasterServerError::Http(HttpError::Malformed(ParseError::MissingBodySeparator { .. }))
        ));
    }

    #[test]
    fn heartbeat_requires_registration() {
        let mut c = client(vec![reply("200 OK", "")]);
        let err = c.heartbeat(&[json!({"username": "driver"})]).unwrap_err();
        assert!(matches!(err, MasterServerError::NotRegistered));
        assert_eq!(c.transport.connects, 0);
    }

    #[test]
    fn heartbeat_puts_challenge_and_users() {
        let mut c = registered_client(vec![reply("200 OK", "")]);
        let users = vec![json!({"username": "driver", "unique_id": 1})];
        c.heartbeat(users.as_slice()).unwrap();

        let sent = &c.transport.requests[1];
        assert!(sent.starts_with("PUT /server-list HTTP/1.1\r\n"));
        let body = sent.split("\r\n\r\n").nth(1).unwrap();
        let body: Value = serde_json::from_str(body).unwrap();
        assert_eq!(body, json!({"challenge": "abc", "users": users}));
        assert!(c.is_registered());
    }

    #[test]
    fn heartbeat_with_no_users_sends_empty_array() {
        let mut c = registered_client(vec![reply("200 OK", "")]);
        c.heartbeat::<Value>(&[]).unwrap();
        assert!(c.transport.requests[1].ends_with(r#"{"challenge":"abc","users":[]}"#));
    }

    #[test]
    fn heartbeat_checks_status() {
        let mut c = registered_client(vec![reply("404 Not Found", "unknown challenge")]);
        let err = c.heartbeat::<Value>(&[]).unwrap_err();
        assert!(matches!(err, MasterServerError::HttpStatus { status: 404, .. }));
        assert!(c.is_registered());
    }

    #[test]
    fn heartbeat_transport_failure_is_reported() {
        let mut c = registered_client(vec![Err(TransportError::connect("timed out"))]);
        let err = c.heartbeat::<Value>(&[]).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn unregister_requires_registration_without_network() {
        let mut c = client(Vec::new());
        assert!(matches!(c.unregister(), Err(MasterServerError::NotRegistered)));
        assert_eq!(c.transport.connects, 0);
    }

    #[test]
    fn unregister_deletes_with_challenge() {
        let mut c = registered_client(vec![reply("200 OK", "")]);
        c.unregister().unwrap();
        assert!(!c.is_registered());
        assert_eq!(c.trust_level(), 3);
        assert!(c.transport.requests[1].starts_with("DELETE /server-list?challenge=abc HTTP/1.1\r\n"));
    }

    #[test]
    fn unregister_transport_failure_keeps_registration() {
        let mut c = registered_client(vec![Err(TransportError::connect("network down"))]);
        assert!(c.unregister().unwrap_err().is_transport());
        assert!(c.is_registered());
    }

    #[test]
    fn unregister_is_optimistic_about_non_200() {
        let mut c = registered_client(vec![reply("500 Internal Server Error", "")]);
        c.unregister().unwrap();
        assert!(!c.is_registered());
    }

    #[test]
    fn unregister_is_optimistic_about_unreadable_reply() {
        let mut c = registered_client(vec![Ok("HTTP/1.1 200 OK".to_string())]);
        c.unregister().unwrap();
        assert!(!c.is_registered());
    }

    #[test]
    fn public_ip_is_returned_verbatim() {
        let mut c = client(vec![reply("200 OK", "198.51.100.23")]);
        assert_eq!(c.retrieve_public_ip().unwrap(), "198.51.100.23");
        assert!(c.transport.requests[0].starts_with("GET /get-public-ip HTTP/1.1\r\n"));
    }

    #[test]
    fn public_ip_transport_failure_is_reported() {
        let mut c = client(vec![Err(TransportError::connect("dns failure"))]);
        assert!(c.retrieve_public_ip().unwrap_err().is_transport());
    }

    #[test]
    fn endpoints_honour_url_prefix() {
        let mut c = client(vec![reply("200 OK", "1.2.3.4")]);
        c.config.url_prefix = "api".to_string();
        c.retrieve_public_ip().unwrap();
        assert!(c.transport.requests[0].starts_with("GET /api/get-public-ip HTTP/1.1\r\n"));
    }

    /// Shared sink for a test subscriber's formatted output.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a DEBUG-level subscriber and return everything it logged.
    fn capture_logs(f: impl FnOnce()) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = logs.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn challenge_token_never_reaches_the_log() {
        let logs = capture_logs(|| {
            let mut c = client(vec![
                reply("200 OK", r#"{"verified-level":1,"challenge":"SUPERSECRETTOKEN"}"#),
                Err(TransportError::connect("down")),
                reply("200 OK", ""),
            ]);
            c.register(&info()).unwrap();
            assert!(c.unregister().unwrap_err().is_transport());
            c.unregister().unwrap();
            assert!(c.transport.requests[1].contains("challenge=SUPERSECRETTOKEN"));
        });

        assert!(logs.contains("could not process HTTP request"));
        assert!(logs.contains("method=DELETE"));
        assert!(logs.contains("path=/server-list"));
        assert!(logs.contains("SUPE…"));
        assert!(!logs.contains("SUPERSECRETTOKEN"), "token logged in full:\n{logs}");
    }

    #[test]
    fn debug_output_redacts_token() {
        let mut c = client(vec![reply("200 OK", r#"{"verified-level":0,"challenge":"s3cr3t-token"}"#)]);
        c.register(&info()).unwrap();
        let debug = format!("{c:?}");
        assert!(debug.contains("s3cr…"));
        assert!(!debug.contains("s3cr3t-token"));
    }
}
