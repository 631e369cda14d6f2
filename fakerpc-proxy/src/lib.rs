//! fakerpc recording proxy
//!
//! A reverse HTTP proxy that forwards every request to a fixed target and
//! records the raw client-side bytes into a [`Log`].
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐        ┌──────────────────────────────────┐        ┌────────┐
//! │ client │──TCP──►│ WiretapListener ─► hyper http1   │──HTTP─►│ target │
//! └────────┘        │      │              │            │        └────────┘
//!                   │      │ bytes        └─ axum      │
//!                   │      ▼                 fallback  │
//!                   │  SharedLog            forward()  │
//!                   └──────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! `idle → running → idle`. [`RecordingProxy::listen_and_serve`] runs until
//! [`RecordingProxy::stop`] is called from another task; `stop` returns the
//! captured log once every connection has drained. The proxy counts as
//! running until that drain completes, so a new run cannot overlap the old
//! one.
//!
//! ```rust,ignore
//! let proxy = Arc::new(RecordingProxy::new(ProxyConfig::new("backend:8080"))?);
//! let serve = tokio::spawn({
//!     let proxy = Arc::clone(&proxy);
//!     async move { proxy.listen_and_serve().await }
//! });
//! let addr = proxy.addr().await?;
//! // ... drive traffic through `addr` ...
//! let log = proxy.stop().await?;
//! serve.await??;
//! ```

mod config;
pub mod proxy;
pub mod wiretap;

pub use config::{ProxyConfig, ProxyConfigBuilder, Target, DEFAULT_LISTEN_ADDR};
pub use wiretap::{TransmissionCallback, Wiretap, WiretapListener, WiretapStream};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::Router;
use fakerpc_core::{AddrCache, FakeRpcError, Log, Network, Result, SharedLog, Transmission};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};

use crate::proxy::ForwardState;

/// Stop handshake: the serve loop answers with the finished log
struct StopRequest {
    reply: oneshot::Sender<Log>,
}

/// Listener state published to [`RecordingProxy::addr`] callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindState {
    /// Not bound yet, or stopped and waiting for the next run
    Pending,
    Listening(SocketAddr),
    /// The last run failed to start or died on an accept error
    Aborted,
}

/// Recording reverse proxy
pub struct RecordingProxy {
    config: ProxyConfig,
    target: Target,
    callback: Option<TransmissionCallback>,
    cache: AddrCache,
    running: AtomicBool,
    control: Mutex<Option<oneshot::Sender<StopRequest>>>,
    bound: watch::Sender<BindState>,
}

impl std::fmt::Debug for RecordingProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingProxy")
            .field("config", &self.config)
            .field("running", &self.running())
            .finish_non_exhaustive()
    }
}

impl RecordingProxy {
    /// Create a proxy; the target URL is validated here
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let target = config.target()?;
        if config.listen_addr.trim().is_empty() {
            return Err(FakeRpcError::InvalidListenAddr {
                addr: config.listen_addr.clone(),
                reason: "empty address".to_string(),
            });
        }
        let (bound, _) = watch::channel(BindState::Pending);
        Ok(Self {
            config,
            target,
            callback: None,
            cache: AddrCache::new(),
            running: AtomicBool::new(false),
            control: Mutex::new(None),
            bound,
        })
    }

    /// Call `f` for every finalized transmission
    pub fn with_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&Transmission) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }

    /// Configuration this proxy was built with
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// True from a successful start until the serve loop has wound down
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

    /// Bind, proxy and record until [`stop`](Self::stop) is called
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

        let prepared = match self.bind().await {
            Ok(listener) => self.prepare(listener),
            Err(e) => Err(e),
        };
        match prepared {
            Ok((listener, router)) => self.serve(listener, router, stop_rx).await,
            Err(e) => {
                self.release(BindState::Aborted);
                Err(e)
            }
        }
    }

    /// Stop serving and return the captured log
    ///
    /// Returns after every in-flight connection has been committed.
    pub async fn stop(&self) -> Result<Log> {
        // Only one caller can take the handle; a run that is already
        // winding down has none left
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

    fn prepare(&self, listener: TcpListener) -> Result<(WiretapListener, Router)> {
        let local = listener.local_addr()?;

        let dst = match self.cache.resolve(&self.target.host_port) {
            Ok(dst) => Some(dst),
            Err(e) => {
                tracing::warn!(target_addr = %self.target.host_port, error = %e, "Recording against listen address");
                None
            }
        };

        let mut log = Log::new().with_network(Network::host(local.ip()));
        log.filter = self.config.filter.clone();
        log.max_interval = self.config.max_interval;

        let mut tap = Wiretap::new(SharedLog::new(log)).with_shared_callback(self.callback.clone());
        if let Some(interval) = self.config.max_interval {
            tap = tap.with_max_interval(interval);
        }
        let listener = tap.listen(listener, dst)?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FakeRpcError::Internal {
                reason: format!("building HTTP client: {e}"),
            })?;
        let router = proxy::create_router(Arc::new(ForwardState {
            client,
            target: self.target.clone(),
        }));
        Ok((listener, router))
    }

    async fn serve(
        &self,
        listener: WiretapListener,
        router: Router,
        mut stop_rx: oneshot::Receiver<StopRequest>,
    ) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let local = listener.local_addr();

        self.bound.send_replace(BindState::Listening(local));
        tracing::info!(addr = %local, upstream = %self.target.base, "Recording proxy listening");

        loop {
            tokio::select! {
                req = &mut stop_rx => {
                    self.finish(listener, shutdown_tx, req.ok()).await;
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(serve_stream(stream, peer, router.clone(), shutdown_rx.clone()));
                    }
                    Err(e) => {
                        if self.abort() {
                            tracing::error!(error = %e, "Accept failed");
                            self.finish(listener, shutdown_tx, None).await;
                            return Err(e.into());
                        }
                        // A stop is in flight; answer it instead of failing
                        let req = (&mut stop_rx).await.ok();
                        self.finish(listener, shutdown_tx, req).await;
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Drain the listener, leave the running state, then answer `req`
    ///
    /// Without a stop request the run ended on an accept error.
    async fn finish(&self, listener: WiretapListener, shutdown: watch::Sender<bool>, req: Option<StopRequest>) {
        shutdown.send_replace(true);
        let log = listener.close().await;
        tracing::info!(transmissions = log.len(), "Recording proxy stopped");
        match req {
            Some(req) => {
                self.release(BindState::Pending);
                let _ = req.reply.send(log);
            }
            None => self.release(BindState::Aborted),
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

async fn serve_stream(
    stream: WiretapStream<TcpStream>,
    peer: SocketAddr,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) {
    let io = TokioIo::new(stream);
    let service = TowerToHyperService::new(router);
    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };

    if let Err(e) = result {
        tracing::debug!(peer = %peer, error = %e, "Connection error");
    }
    tracing::debug!(peer = %peer, "Connection closed");
}
