//! Client side of the master-server registration protocol.
//!
//! # Overview
//! A relay server advertises itself on a public server list by registering
//! with a directory service, sending periodic heartbeats with its connected
//! users, and unregistering on shutdown. It can also ask the directory for
//! its own public IP address.
//!
//! # Design
//! - `http` renders HTTP/1.1 requests and runs one blocking round trip over
//!   a `Transport`; `message` parses the raw response.
//! - `MasterServerClient` holds the registration state (flag, challenge
//!   token, trust level) and implements register / heartbeat / unregister.
//! - `HeartbeatService` puts a client on its own thread so the rest of the
//!   server talks to it by message passing instead of sharing it.
//! - Nothing here retries on its own. Callers decide when to try again.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod message;
pub mod service;
pub mod transport;
pub mod types;

pub use client::{MasterServerClient, TRUST_LEVEL_UNKNOWN};
pub use config::MasterServerConfig;
pub use error::{ConfigError, HttpError, MasterServerError, ParseError, ServiceError, TransportError, TransportErrorKind};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use message::HttpMessage;
pub use service::{HeartbeatService, ServiceHandle};
pub use transport::{TcpTransport, Transport};
pub use types::{RegistrationStatus, ServerInfo};
