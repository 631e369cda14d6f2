//! fakerpc replay server
//!
//! Answers clients with responses recorded by the fakerpc recording proxy,
//! so tests can run without the real backend.
//!
//! ## Matching
//!
//! ```text
//!  accept #0 ──► group 0: [resp 0, resp 1, resp 2]
//!  accept #1 ──► group 1: [resp 0]
//!  accept #2 ──► (serve loop already exited)
//! ```
//!
//! The n-th accepted connection is served with the n-th connection group,
//! and its i-th request gets the i-th recorded response, byte for byte.
//! Requests past the end of a group get a synthetic `500`. Once every group
//! has been handed out the server stops accepting, waits for its connections
//! and returns. While it waits it still counts as running, and
//! [`ReplayServer::stop`] closes the connections that are idle between
//! requests.
//!
//! ```rust,ignore
//! let log = fakerpc_core::read_log("testdata/my_test.gzob")?;
//! let server = Arc::new(ReplayServer::new(ServerConfig::default(), &log)?);
//! tokio::spawn({
//!     let server = Arc::clone(&server);
//!     async move { server.listen_and_serve().await }
//! });
//! let url = format!("http://{}", server.addr().await?);
//! ```

mod config;
pub mod reader;
mod replay;

pub use config::{ServerConfig, ServerConfigBuilder, DEFAULT_LISTEN_ADDR};
pub use replay::{synthetic_500, ReplyCallback, ReplyEvent, NO_RESPONSE};

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use fakerpc_core::{Connection, Connections, FakeRpcError, Log, Result};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;

use crate::replay::Worker;

/// Stop handshake: answered once the serve loop has wound down
struct StopRequest {
    reply: oneshot::Sender<()>,
}

/// Listener state published to [`ReplayServer::addr`] callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindState {
    /// Not bound yet, or stopped and waiting for the next run
    Pending,
    Listening(SocketAddr),
    /// The last run failed to start or died on an accept error
    Aborted,
}

/// Why the accept loop ended
enum Exit {
    Stopped(Option<StopRequest>),
    Exhausted,
    Failed(io::Error),
}

/// Replays recorded connections to clients
pub struct ReplayServer {
    config: ServerConfig,
    groups: Vec<Arc<Vec<Connection>>>,
    reply: Option<ReplyCallback>,
    running: AtomicBool,
    control: Mutex<Option<oneshot::Sender<StopRequest>>>,
    bound: watch::Sender<BindState>,
}

impl std::fmt::Debug for ReplayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayServer")
            .field("config", &self.config)
            .field("groups", &self.groups.len())
            .field("running", &self.running())
            .finish_non_exhaustive()
    }
}

impl ReplayServer {
    /// Reconstruct `log` and build a server over it
    ///
    /// # Errors
    ///
    /// Any reconstruction error from [`Connections::from_log`].
    pub fn new(config: ServerConfig, log: &Log) -> Result<Self> {
        Self::from_connections(config, Connections::from_log(log)?)
    }

    /// Build a server over already reconstructed connections
    pub fn from_connections(config: ServerConfig, conns: Connections) -> Result<Self> {
        if conns.is_empty() {
            return Err(FakeRpcError::EmptyCapture);
        }
        if config.listen_addr.trim().is_empty() {
            return Err(FakeRpcError::InvalidListenAddr {
                addr: config.listen_addr.clone(),
                reason: "empty address".to_string(),
            });
        }
        let (bound, _) = watch::channel(BindState::Pending);
        Ok(Self {
            config,
            groups: conns.into_inner().into_iter().map(Arc::new).collect(),
            reply: None,
            running: AtomicBool::new(false),
            control: Mutex::new(None),
            bound,
        })
    }

    /// Call `f` once per served request or response leg
    pub fn with_reply<F>(mut self, f: F) -> Self
    where
        F: Fn(ReplyEvent) + Send + Sync + 'static,
    {
        self.reply = Some(Arc::new(f));
        self
    }

    /// Configuration this server was built with
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of connection groups served per run
    pub fn groups(&self) -> usize {
        self.groups.len()
    }

    /// True from a successful start until every connection of the run has
    /// closed
    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Wait until the listener is bound and return its address
    ///
    /// # Errors
    ///
    /// [`FakeRpcError::ServeAborted`] when the run failed to bind or died on
    /// an accept error.
    pub async fn addr(&self) -> Result<SocketAddr> {
        let mut rx = self.bound.subscribe();
        let state = rx
            .wait_for(|state| *state != BindState::Pending)
            .await
            .map_err(|_| FakeRpcError::ServeAborted)?;
        match *state {
            BindState::Listening(addr) => Ok(addr),
            BindState::Pending | BindState::Aborted => Err(FakeRpcError::ServeAborted),
        }
    }

    /// Bind and replay until every group is served or [`stop`](Self::stop)
    /// is called
    ///
    /// # Errors
    ///
    /// - [`FakeRpcError::AlreadyRunning`] if another call is active
    /// - [`FakeRpcError::InvalidListenAddr`] if the address cannot be bound
    /// - [`FakeRpcError::Io`] for accept failures not caused by `stop`
    pub async fn listen_and_serve(&self) -> Result<()> {
        let (stop_tx, stop_rx) = oneshot::channel();
        {
            let mut control = self.lock_control();
            if self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(FakeRpcError::AlreadyRunning);
            }
            *control = Some(stop_tx);
            self.bound.send_replace(BindState::Pending);
        }

        let bound = match self.bind().await {
            Ok(listener) => listener.local_addr().map(|local| (listener, local)).map_err(Into::into),
            Err(e) => Err(e),
        };
        match bound {
            Ok((listener, local)) => self.serve(listener, local, stop_rx).await,
            Err(e) => {
                self.release(BindState::Aborted);
                Err(e)
            }
        }
    }

    /// Stop accepting, close idle connections and wait for the rest
    ///
    /// Also reaches a server that already handed out every group and is
    /// waiting for its last connections.
    pub async fn stop(&self) -> Result<()> {
        let stop_tx = self.lock_control().take().ok_or(FakeRpcError::NotRunning)?;

        let (reply, answer) = oneshot::channel();
        stop_tx
            .send(StopRequest { reply })
            .map_err(|_| FakeRpcError::ServeAborted)?;
        answer.await.map_err(|_| FakeRpcError::ServeAborted)
    }

    async fn bind(&self) -> Result<TcpListener> {
        let addr = &self.config.listen_addr;
        TcpListener::bind(addr.as_str())
            .await
            .map_err(|e| FakeRpcError::InvalidListenAddr {
                addr: addr.clone(),
                reason: e.to_string(),
            })
    }

    async fn serve(
        &self,
        listener: TcpListener,
        local: SocketAddr,
        mut stop_rx: oneshot::Receiver<StopRequest>,
    ) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers = JoinSet::new();
        let mut next = 0usize;

        self.bound.send_replace(BindState::Listening(local));
        tracing::info!(addr = %local, groups = self.groups.len(), "Replay server listening");

        let exit = loop {
            let Some(group) = self.groups.get(next) else {
                break Exit::Exhausted;
            };
            tokio::select! {
                req = &mut stop_rx => break Exit::Stopped(req.ok()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, group = next, requests = group.len(), "Accepted connection");
                        let worker = Worker {
                            group: Arc::clone(group),
                            peer,
                            local,
                            reply: self.reply.clone(),
                        };
                        workers.spawn(worker.run(stream, shutdown_rx.clone()));
                        next += 1;
                    }
                    Err(e) => break Exit::Failed(e),
                },
            }
        };
        drop(listener);

        let (req, result) = match exit {
            Exit::Stopped(req) => (req, Ok(())),
            Exit::Exhausted => {
                tracing::debug!("Every connection group handed out");
                (self.drain(&mut workers, &mut stop_rx).await, Ok(()))
            }
            Exit::Failed(e) if self.abort() => {
                tracing::error!(error = %e, "Accept failed");
                (None, Err(e.into()))
            }
            // A stop is in flight; answer it instead of failing
            Exit::Failed(_) => (stop_rx.await.ok(), Ok(())),
        };
        shutdown_tx.send_replace(true);
        while let Some(joined) = workers.join_next().await {
            log_join(joined);
        }

        tracing::info!(served = next, "Replay server stopped");
        if result.is_err() {
            self.release(BindState::Aborted);
        } else {
            self.release(BindState::Pending);
        }
        if let Some(req) = req {
            let _ = req.reply.send(());
        }
        result
    }

    /// Wait for the workers of an exhausted run, or for a stop request
    ///
    /// Returns the stop request when one arrives before the last worker ends.
    async fn drain(
        &self,
        workers: &mut JoinSet<()>,
        stop_rx: &mut oneshot::Receiver<StopRequest>,
    ) -> Option<StopRequest> {
        loop {
            let joined = tokio::select! {
                req = &mut *stop_rx => return req.ok(),
                joined = workers.join_next() => joined,
            };
            match joined {
                Some(joined) => log_join(joined),
                None if self.abort() => return None,
                // A stop took the handle after the last worker ended
                None => return stop_rx.await.ok(),
            }
        }
    }

    /// Claim the shutdown without a stop request
    ///
    /// Returns false when a concurrent `stop` already took the handle.
    fn abort(&self) -> bool {
        self.lock_control().take().is_some()
    }

    /// Publish the final bind state and leave the running state
    fn release(&self, state: BindState) {
        let mut control = self.lock_control();
        control.take();
        self.bound.send_replace(state);
        self.running.store(false, Ordering::Release);
    }

    fn lock_control(&self) -> MutexGuard<'_, Option<oneshot::Sender<StopRequest>>> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::warn!(error = %e, "Connection worker failed");
    }
}
