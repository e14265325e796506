use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;
use uuid::Uuid;

/// A listed server as the directory keeps it. The challenge is the map key
/// and never leaves the directory except in the register reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerEntry {
    pub ip: String,
    pub port: u16,
    pub name: String,
    pub terrain_name: String,
    pub max_clients: u32,
    pub version: String,
    pub is_public: bool,
    pub verified_level: i32,
    pub users: Vec<Value>,
}

#[derive(Deserialize)]
pub struct RegisterParams {
    pub ip: String,
    pub port: u16,
    pub name: String,
    #[serde(rename = "terrain-name")]
    pub terrain_name: String,
    #[serde(rename = "max-clients")]
    pub max_clients: u32,
    pub version: String,
    pub pw: u8,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Registration {
    #[serde(rename = "verified-level")]
    pub verified_level: i32,
    pub challenge: String,
}

#[derive(Deserialize)]
pub struct Heartbeat {
    pub challenge: String,
    #[serde(default)]
    pub users: Vec<Value>,
}

#[derive(Deserialize)]
pub struct ChallengeParams {
    pub challenge: String,
}

/// Fixed answers the directory gives every caller.
#[derive(Clone, Debug)]
pub struct Settings {
    pub public_ip: String,
    pub verified_level: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            public_ip: "127.0.0.1".to_string(),
            verified_level: 0,
        }
    }
}

#[derive(Clone)]
pub struct Directory {
    servers: Arc<RwLock<HashMap<String, ServerEntry>>>,
    settings: Arc<Settings>,
}

pub fn app() -> Router {
    app_with(Settings::default())
}

pub fn app_with(settings: Settings) -> Router {
    let directory = Directory {
        servers: Arc::new(RwLock::new(HashMap::new())),
        settings: Arc::new(settings),
    };
    Router::new()
        .route(
            "/server-list",
            get(list_servers).post(register).put(heartbeat).delete(unregister),
        )
        .route("/get-public-ip", get(public_ip))
        .with_state(directory)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with(listener: TcpListener, settings: Settings) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(settings)).await
}

async fn list_servers(State(directory): State<Directory>) -> Json<Vec<ServerEntry>> {
    let servers = directory.servers.read().await;
    Json(servers.values().cloned().collect())
}

async fn register(
    State(directory): State<Directory>,
    Query(params): Query<RegisterParams>,
) -> Json<Registration> {
    let challenge = Uuid::new_v4().to_string();
    let entry = ServerEntry {
        ip: params.ip,
        port: params.port,
        name: params.name,
        terrain_name: params.terrain_name,
        max_clients: params.max_clients,
        version: params.version,
        is_public: params.pw != 0,
        verified_level: directory.settings.verified_level,
        users: Vec::new(),
    };
    info!(name = %entry.name, port = entry.port, "server registered");
    directory.servers.write().await.insert(challenge.clone(), entry);
    Json(Registration {
        verified_level: directory.settings.verified_level,
        challenge,
    })
}

async fn heartbeat(State(directory): State<Directory>, Json(input): Json<Heartbeat>) -> StatusCode {
    let mut servers = directory.servers.write().await;
    match servers.get_mut(&input.challenge) {
        Some(entry) => {
            entry.users = input.users;
            StatusCode::OK
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn unregister(
    State(directory): State<Directory>,
    Query(params): Query<ChallengeParams>,
) -> StatusCode {
    let mut servers = directory.servers.write().await;
    match servers.remove(&params.challenge) {
        Some(entry) => {
            info!(name = %entry.name, "server unregistered");
            StatusCode::OK
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn public_ip(State(directory): State<Directory>) -> String {
    directory.settings.public_ip.clone()
}
