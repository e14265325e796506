//! Background registration and heartbeat worker.
//!
//! # Design
//! `HeartbeatService::spawn` moves a `MasterServerClient` onto its own
//! thread. That thread is the only writer of the registration state; the
//! rest of the server talks to it through a `ServiceHandle` over a channel.
//!
//! On every tick the worker registers if it is not registered yet and sends
//! a heartbeat with the latest user list otherwise. A heartbeat the
//! directory answers with a non-200 status means the token is no longer
//! known, so the next tick registers again. Other failures are logged and
//! retried on the next tick. Shutting down unregisters and hands the client
//! back.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, warn};

use crate::client::MasterServerClient;
use crate::error::{MasterServerError, ServiceError};
use crate::transport::Transport;
use crate::types::{RegistrationStatus, ServerInfo};

enum Command {
    UpdateUsers(Vec<Value>),
    Status(Sender<RegistrationStatus>),
    Shutdown,
}

pub struct HeartbeatService;

impl HeartbeatService {
    /// Start the worker, ticking at the client's configured heartbeat
    /// interval. The first registration attempt happens immediately.
    pub fn spawn<T>(client: MasterServerClient<T>, info: ServerInfo) -> Result<ServiceHandle<T>, ServiceError>
    where
        T: Transport + Send + 'static,
    {
        let interval = client.config().heartbeat_interval();
        Self::spawn_with_interval(client, info, interval)
    }

    pub fn spawn_with_interval<T>(
        client: MasterServerClient<T>,
        info: ServerInfo,
        interval: Duration,
    ) -> Result<ServiceHandle<T>, ServiceError>
    where
        T: Transport + Send + 'static,
    {
        if interval.is_zero() {
            return Err(ServiceError::ZeroInterval);
        }
        let (commands, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("master-server".to_string())
            .spawn(move || run(client, info, interval, receiver))?;
        Ok(ServiceHandle { commands, worker })
    }
}

/// Handle to a running `HeartbeatService`.
///
/// Dropping the handle stops the worker the same way `shutdown` does, but
/// without waiting for it.
pub struct ServiceHandle<T: Transport> {
    commands: Sender<Command>,
    worker: JoinHandle<MasterServerClient<T>>,
}

impl<T: Transport> ServiceHandle<T> {
    /// Replace the user list sent with the next heartbeat.
    pub fn update_users(&self, users: Vec<Value>) -> Result<(), ServiceError> {
        self.commands
            .send(Command::UpdateUsers(users))
            .map_err(|_| ServiceError::Stopped)
    }

    pub fn status(&self) -> Result<RegistrationStatus, ServiceError> {
        let (reply, receiver) = mpsc::channel();
        self.commands
            .send(Command::Status(reply))
            .map_err(|_| ServiceError::Stopped)?;
        receiver.recv().map_err(|_| ServiceError::Stopped)
    }

    /// Unregister if needed, stop the worker and return the client.
    pub fn shutdown(self) -> Result<MasterServerClient<T>, ServiceError> {
        // The worker may already have exited; join reports how.
        let _ = self.commands.send(Command::Shutdown);
        self.worker.join().map_err(|_| ServiceError::Panicked)
    }
}

fn run<T: Transport>(
    mut client: MasterServerClient<T>,
    info: ServerInfo,
    interval: Duration,
    commands: Receiver<Command>,
) -> MasterServerClient<T> {
    let mut users = Vec::new();
    let mut next_tick = Instant::now();
    let mut rejected = false;

    loop {
        let timeout = next_tick.saturating_duration_since(Instant::now());
        match commands.recv_timeout(timeout) {
            Ok(Command::UpdateUsers(list)) => users = list,
            Ok(Command::Status(reply)) => {
                let _ = reply.send(client.status());
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                rejected = tick(&mut client, &info, &users, rejected);
                next_tick = Instant::now() + interval;
            }
        }
    }

    if client.is_registered() {
        if let Err(e) = client.unregister() {
            warn!(error = %e, "could not unregister on shutdown");
        }
    }
    info!("heartbeat worker stopped");
    client
}

/// One register or heartbeat attempt. Returns whether the directory has
/// rejected this client's token and a fresh registration is due.
fn tick<T: Transport>(client: &mut MasterServerClient<T>, info: &ServerInfo, users: &[Value], rejected: bool) -> bool {
    if rejected || !client.is_registered() {
        return match client.register(info) {
            Ok(()) => false,
            Err(e) => {
                warn!(error = %e, "registration attempt failed, retrying next interval");
                rejected
            }
        };
    }
    match client.heartbeat(users) {
        Ok(()) => false,
        Err(e @ MasterServerError::HttpStatus { .. }) => {
            warn!(error = %e, "heartbeat rejected, registering again next interval");
            true
        }
        Err(e) => {
            warn!(error = %e, "heartbeat failed, retrying next interval");
            false
        }
    }
}
