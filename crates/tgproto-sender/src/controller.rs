//! Multi-datacenter connection pool.
//!
//! One background task is spawned per datacenter the first time it is
//! invoked against; requests are routed to it over a channel, and a dead
//! connection is retried according to a [`ReconnectionPolicy`] rather than
//! surfacing the error to every in-flight caller. A second timer per
//! connection periodically renegotiates and binds a temporary
//! (perfect-forward-secrecy) key on top of the permanent one.

use std::panic;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tgproto_crypto::AuthKey;
use tgproto_mtproto::dc::DcRegistry;
use tgproto_mtproto::pfs::BindAuthKeyInner;
use tgproto_mtproto::transport::LengthPrefixed;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{AbortHandle, JoinSet};

use crate::configuration::Configuration;
use crate::errors::InvocationError;
use crate::net::ServerAddr;
use crate::reconnection::ReconnectionPolicy;
use crate::sender::{self, Sender};

/// How long a bound temporary key is trusted before a fresh one is
/// negotiated and bound in its place.
pub const DEFAULT_TEMP_KEY_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

type InvokeResponse = Vec<u8>;

enum Request {
    Invoke { dc_id: i32, body: Vec<u8>, tx: oneshot::Sender<Result<InvokeResponse, InvocationError>> },
    Disconnect { dc_id: i32 },
    Quit,
}

struct Rpc {
    body: Vec<u8>,
    tx: oneshot::Sender<Result<InvokeResponse, InvocationError>>,
}

struct ConnectionInfo {
    dc_id: i32,
    rpc_tx: mpsc::UnboundedSender<Rpc>,
    abort_handle: AbortHandle,
}

/// A cheaply-cloneable handle for invoking requests against the pool a
/// [`ControllerRunner`] is driving.
#[derive(Clone)]
pub struct Controller(mpsc::UnboundedSender<Request>);

impl Controller {
    pub async fn invoke_in_dc(&self, dc_id: i32, body: Vec<u8>) -> Result<InvokeResponse, InvocationError> {
        let (tx, rx) = oneshot::channel();
        self.0.send(Request::Invoke { dc_id, body, tx }).map_err(|_| InvocationError::Dropped)?;
        rx.await.map_err(|_| InvocationError::Dropped)?
    }

    /// Tears down the connection to a datacenter, if one is open. The next
    /// invocation reconnects from scratch.
    pub fn disconnect_from_dc(&self, dc_id: i32) -> bool {
        self.0.send(Request::Disconnect { dc_id }).is_ok()
    }

    /// Stops the runner once every in-flight connection drains.
    pub fn quit(&self) -> bool {
        self.0.send(Request::Quit).is_ok()
    }
}

/// Drives the pool: accepts requests over a channel, connects lazily, and
/// supervises one background task per datacenter.
pub struct ControllerRunner {
    configuration: Configuration,
    registry: Arc<Mutex<DcRegistry>>,
    request_rx: mpsc::UnboundedReceiver<Request>,
    updates_tx: mpsc::UnboundedSender<Vec<u8>>,
    make_policy: Box<dyn Fn() -> Box<dyn ReconnectionPolicy> + Send>,
}

/// Builds a connected `Controller`/`ControllerRunner` pair, plus the
/// receiving half of the spontaneous-update stream.
///
/// `make_policy` is called once per datacenter connection, so each gets
/// its own independent backoff state.
pub fn controller(
    configuration: Configuration,
    make_policy: impl Fn() -> Box<dyn ReconnectionPolicy> + Send + 'static,
) -> (Controller, ControllerRunner, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    (
        Controller(request_tx),
        ControllerRunner {
            configuration,
            registry: Arc::new(Mutex::new(DcRegistry::new())),
            request_rx,
            updates_tx,
            make_policy: Box::new(make_policy),
        },
        updates_rx,
    )
}

impl ControllerRunner {
    /// Runs until [`Controller::quit`] is called, then drains every
    /// in-flight connection before returning.
    pub async fn run(mut self) {
        let mut connections = Vec::<ConnectionInfo>::new();
        let mut pool = JoinSet::<()>::new();

        while let Some(request) = self.request_rx.recv().await {
            while let Some(completion) = pool.try_join_next() {
                if let Err(err) = completion {
                    if let Ok(reason) = err.try_into_panic() {
                        panic::resume_unwind(reason);
                    }
                }
            }

            match request {
                Request::Invoke { dc_id, body, tx } => {
                    let Some(endpoint) = self.configuration.known_dcs.iter().find(|e| e.dc_id == dc_id) else {
                        let _ = tx.send(Err(InvocationError::InvalidDc));
                        continue;
                    };
                    let address = endpoint.address;

                    let connection = match connections.iter().find(|c| c.dc_id == dc_id) {
                        Some(c) => c,
                        None => {
                            let (rpc_tx, rpc_rx) = mpsc::unbounded_channel();
                            let policy = (self.make_policy)();
                            let abort_handle = pool.spawn(run_connection(
                                dc_id,
                                ServerAddr { address },
                                self.registry.clone(),
                                policy,
                                rpc_rx,
                                self.updates_tx.clone(),
                            ));
                            connections.push(ConnectionInfo { dc_id, rpc_tx, abort_handle });
                            connections.last().unwrap()
                        }
                    };
                    let _ = connection.rpc_tx.send(Rpc { body, tx });
                }
                Request::Disconnect { dc_id } => {
                    connections.retain(|c| {
                        if c.dc_id == dc_id {
                            c.abort_handle.abort();
                            false
                        } else {
                            true
                        }
                    });
                }
                Request::Quit => break,
            }
        }

        connections.clear();
        pool.join_all().await;
    }
}

async fn run_connection(
    dc_id: i32,
    addr: ServerAddr,
    registry: Arc<Mutex<DcRegistry>>,
    mut policy: Box<dyn ReconnectionPolicy>,
    mut rpc_rx: mpsc::UnboundedReceiver<Rpc>,
    updates_tx: mpsc::UnboundedSender<Vec<u8>>,
) {
    let mut auth_key = registry.lock().await.get(dc_id).and_then(|s| s.auth_key.clone());
    let mut attempt = 0u32;

    'reconnect: loop {
        let connected = match auth_key.clone() {
            Some(key) => sender::connect_with_auth(LengthPrefixed::new(), addr, key.to_bytes()).await.map_err(InvocationError::from),
            None => sender::connect(LengthPrefixed::new(), addr).await,
        };

        let mut sender = match connected {
            Ok(sender) => {
                info!("dc {dc_id}: connected");
                policy.reset();
                attempt = 0;
                sender
            }
            Err(err) => {
                warn!("dc {dc_id}: connection attempt failed: {err}");
                attempt += 1;
                match policy.next_delay(attempt) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        continue 'reconnect;
                    }
                    None => return,
                }
            }
        };

        auth_key = Some(AuthKey::from_bytes(sender.auth_key()));
        {
            let mut registry = registry.lock().await;
            registry.get_or_insert(dc_id).auth_key = auth_key.clone();
        }

        let mut next_rebind = tokio::time::Instant::now() + DEFAULT_TEMP_KEY_LIFETIME;
        loop {
            tokio::select! {
                request = rpc_rx.recv() => match request {
                    Some(Rpc { body, tx }) => sender.enqueue_body(body, tx),
                    None => return,
                },
                result = sender.step() => match result {
                    Ok(updates) => {
                        for update in updates {
                            let _ = updates_tx.send(update);
                        }
                    }
                    Err(err) => {
                        warn!("dc {dc_id}: connection dropped: {err}");
                        attempt += 1;
                        match policy.next_delay(attempt) {
                            Some(delay) => {
                                tokio::time::sleep(delay).await;
                                continue 'reconnect;
                            }
                            None => return,
                        }
                    }
                },
                _ = tokio::time::sleep_until(next_rebind) => {
                    if let Err(err) = regenerate_temp_key(dc_id, addr, &mut sender, &registry).await {
                        warn!("dc {dc_id}: temporary key rebind failed: {err}");
                    }
                    next_rebind = tokio::time::Instant::now() + DEFAULT_TEMP_KEY_LIFETIME;
                }
            }
        }
    }
}

/// Negotiates a fresh temporary key over a short-lived side connection and
/// binds it to the permanent key authorizing `sender`.
///
/// The real protocol double-encrypts the bind request, once under the new
/// temporary key and once more under the permanent key; here it is sent as
/// a single ordinary request over `sender`, which already carries the
/// permanent key's encryption. See `DESIGN.md` for why that's an
/// acceptable simplification for this layer.
async fn regenerate_temp_key<T: tgproto_mtproto::Transport>(
    dc_id: i32,
    addr: ServerAddr,
    sender: &mut Sender<T, tgproto_mtproto::mtp::Encrypted>,
    registry: &Arc<Mutex<DcRegistry>>,
) -> Result<(), InvocationError> {
    let temp_connection = sender::connect(LengthPrefixed::new(), addr).await?;
    let temp_key = AuthKey::from_bytes(temp_connection.auth_key());
    drop(temp_connection);

    let perm_key_id = AuthKey::from_bytes(sender.auth_key()).key_id();
    let expires_at = (std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i32)
        + DEFAULT_TEMP_KEY_LIFETIME.as_secs() as i32;

    let bind = BindAuthKeyInner::new(temp_key.key_id(), perm_key_id, 0, expires_at);
    sender.invoke_raw(bind.serialize()).await?;

    let mut registry = registry.lock().await;
    let state = registry.get_or_insert(dc_id);
    state.temp_auth_key = Some(temp_key);
    state.temp_key_expires_at = Some(expires_at as i64);

    info!("dc {dc_id}: bound a fresh temporary key, expiring at {expires_at}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_key_lifetime_is_bounded_by_a_day() {
        assert!(DEFAULT_TEMP_KEY_LIFETIME <= Duration::from_secs(24 * 60 * 60));
    }
}
