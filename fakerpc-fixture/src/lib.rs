//! fakerpc test fixture
//!
//! Puts a stand-in for an HTTP RPC service in front of a single test. The
//! fixture looks for its log at `<testdata>/<lowercased test name>.gzob` and,
//! depending on [`FixtureMode`], either replays it or proxies to the live
//! service:
//!
//! | environment             | behavior                                  |
//! |-------------------------|-------------------------------------------|
//! | `FAKERPC_RECORD=<url>`  | recording proxy, log written on teardown  |
//! | `FAKERPC=<url>`         | recording proxy, nothing written          |
//! | neither                 | replay server over the stored log         |
//!
//! ## Usage
//!
//! ```rust,ignore
//! #[tokio::test]
//! async fn test_list_users() {
//!     let guard = Fixture::new("test_list_users", "tests/testdata").start().await?;
//!     let client = MyRpcClient::new(guard.url());
//!     // ...
//!     guard.teardown().await?;
//! }
//! ```
//!
//! First runs are recorded with the service's address in the environment:
//!
//! ```text
//! FAKERPC_RECORD="http://rpc.internal:8079" cargo test
//! ```

mod mode;

pub use mode::{FixtureMode, PROXY_ENV, RECORD_ENV};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fakerpc_core::{read_log, write_log, FakeRpcError, Result, LOG_EXTENSION};
use fakerpc_proxy::{ProxyConfig, RecordingProxy};
use fakerpc_server::{ReplayServer, ServerConfig};
use tokio::task::JoinHandle;

/// Per-test stand-in for an RPC service
#[derive(Debug, Clone)]
pub struct Fixture {
    log_path: PathBuf,
    mode: Option<FixtureMode>,
}

impl Fixture {
    /// Fixture whose log lives in `testdata_dir`
    pub fn new(test_name: &str, testdata_dir: impl AsRef<Path>) -> Self {
        let file = format!("{}.{LOG_EXTENSION}", test_name.to_lowercase());
        Self {
            log_path: testdata_dir.as_ref().join(file),
            mode: None,
        }
    }

    /// Use `mode` instead of reading the environment at start
    pub fn with_mode(mut self, mode: FixtureMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Start the proxy or replay server and wait for its address
    ///
    /// # Errors
    ///
    /// - configuration errors for a bad upstream URL
    /// - codec or reconstruction errors for the stored log in replay mode
    pub async fn start(&self) -> Result<FixtureGuard> {
        let mode = self.mode.clone().unwrap_or_else(FixtureMode::from_env);
        tracing::info!(mode = ?mode, log = %self.log_path.display(), "Starting fixture");

        let (addr, backend) = match mode {
            FixtureMode::Record(url) => self.start_proxy(&url, true).await?,
            FixtureMode::Proxy(url) => self.start_proxy(&url, false).await?,
            FixtureMode::Replay => {
                let log = read_log(&self.log_path)?;
                let server = Arc::new(ReplayServer::new(ServerConfig::default(), &log)?);
                let task = tokio::spawn({
                    let server = Arc::clone(&server);
                    async move { server.listen_and_serve().await }
                });
                let addr = match server.addr().await {
                    Ok(addr) => addr,
                    Err(_) => return Err(joined(task).await.err().unwrap_or(FakeRpcError::ServeAborted)),
                };
                (addr, Backend::Replay { server, task })
            }
        };

        Ok(FixtureGuard {
            url: format!("http://{addr}"),
            log_path: self.log_path.clone(),
            backend,
        })
    }

    async fn start_proxy(&self, url: &str, record: bool) -> Result<(std::net::SocketAddr, Backend)> {
        let proxy = Arc::new(RecordingProxy::new(ProxyConfig::new(url))?);
        let task = tokio::spawn({
            let proxy = Arc::clone(&proxy);
            async move { proxy.listen_and_serve().await }
        });
        let addr = match proxy.addr().await {
            Ok(addr) => addr,
            Err(_) => return Err(joined(task).await.err().unwrap_or(FakeRpcError::ServeAborted)),
        };
        Ok((addr, Backend::Proxy { proxy, task, record }))
    }
}

enum Backend {
    Proxy {
        proxy: Arc<RecordingProxy>,
        task: JoinHandle<Result<()>>,
        record: bool,
    },
    Replay {
        server: Arc<ReplayServer>,
        task: JoinHandle<Result<()>>,
    },
}

/// A started fixture; call [`teardown`](Self::teardown) when the test ends
pub struct FixtureGuard {
    url: String,
    log_path: PathBuf,
    backend: Backend,
}

impl std::fmt::Debug for FixtureGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureGuard")
            .field("url", &self.url)
            .field("log_path", &self.log_path)
            .finish_non_exhaustive()
    }
}

impl FixtureGuard {
    /// Base URL of the stand-in, `http://host:port`
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stop the stand-in; in record mode also store the captured log
    pub async fn teardown(self) -> Result<()> {
        match self.backend {
            Backend::Proxy { proxy, task, record } => {
                let log = proxy.stop().await?;
                joined(task).await?;
                if record {
                    if let Some(dir) = self.log_path.parent() {
                        std::fs::create_dir_all(dir)?;
                    }
                    write_log(&self.log_path, &log)?;
                    tracing::info!(
                        log = %self.log_path.display(),
                        transmissions = log.len(),
                        "Recorded fixture log"
                    );
                }
                Ok(())
            }
            Backend::Replay { server, task } => match server.stop().await {
                // NotRunning: every connection was served and closed, and
                // the server left on its own
                Ok(()) | Err(FakeRpcError::NotRunning) => joined(task).await,
                Err(e) => Err(e),
            },
        }
    }
}

async fn joined(task: JoinHandle<Result<()>>) -> Result<()> {
    task.await.map_err(|e| FakeRpcError::Internal {
        reason: format!("serve task failed: {e}"),
    })?
}
