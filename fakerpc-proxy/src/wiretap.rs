//! Wiretap listener and stream
//!
//! A [`WiretapListener`] wraps a `TcpListener` and hands out
//! [`WiretapStream`]s that record every byte read and written.
//!
//! ```text
//!            read  (peer → dst)              pending
//! peer ───────────────────────────┐       ┌───────────────────┐
//!                                 ├─────► │ [0] peer → dst    │
//! peer ◄──────────────────────────┘       │ [1] dst  → peer   │
//!            write (dst → peer)           │ [2] peer → dst ...│
//!                                         └─────────┬─────────┘
//!                                                   │ drop
//!                                                   ▼
//!                                         SharedLog::append (one lock)
//! ```
//!
//! Each stream holds a join token. [`WiretapListener::close`] stops
//! accepting and waits until every token has been dropped, so the log it
//! returns never misses a connection that was still being committed.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use chrono::Utc;
use fakerpc_core::{Log, SharedLog, Transmission};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Callback invoked once per finalized transmission
pub type TransmissionCallback = Arc<dyn Fn(&Transmission) + Send + Sync>;

/// Recording settings shared by every stream of a listener
#[derive(Clone)]
pub struct Wiretap {
    log: SharedLog,
    callback: Option<TransmissionCallback>,
    max_interval: Option<Duration>,
}

impl fmt::Debug for Wiretap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wiretap")
            .field("log", &self.log)
            .field("callback", &self.callback.as_ref().map(|_| "<callback>"))
            .field("max_interval", &self.max_interval)
            .finish()
    }
}

impl Wiretap {
    /// Record into `log`
    pub fn new(log: SharedLog) -> Self {
        Self {
            log,
            callback: None,
            max_interval: None,
        }
    }

    /// Call `f` for every finalized transmission
    pub fn with_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&Transmission) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }

    /// Use an already shared callback
    pub fn with_shared_callback(mut self, f: Option<TransmissionCallback>) -> Self {
        self.callback = f;
        self
    }

    /// Split same-direction bytes separated by more than `interval`
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = Some(interval);
        self
    }

    /// Wrap a bound listener
    ///
    /// `dst` is the address recorded as the server side of every
    /// transmission; `None` uses the listener's own address.
    pub fn listen(self, listener: TcpListener, dst: Option<SocketAddr>) -> io::Result<WiretapListener> {
        let local_addr = listener.local_addr()?;
        let (done_tx, done_rx) = mpsc::channel(1);
        Ok(WiretapListener {
            listener,
            tap: self,
            dst: dst.unwrap_or(local_addr),
            local_addr,
            done_tx,
            done_rx,
        })
    }

    /// Wrap an arbitrary stream
    ///
    /// The returned stream commits into this wiretap's log when dropped.
    pub fn wrap<S>(&self, inner: S, peer: SocketAddr, dst: SocketAddr) -> WiretapStream<S> {
        WiretapStream::new(inner, Capture::new(self.clone(), peer, dst, None))
    }
}

/// Listener whose accepted streams are wiretapped
pub struct WiretapListener {
    listener: TcpListener,
    tap: Wiretap,
    dst: SocketAddr,
    local_addr: SocketAddr,
    done_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
}

impl fmt::Debug for WiretapListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WiretapListener")
            .field("local_addr", &self.local_addr)
            .field("dst", &self.dst)
            .finish_non_exhaustive()
    }
}

impl WiretapListener {
    /// Accept the next connection and wrap it
    pub async fn accept(&self) -> io::Result<(WiretapStream<TcpStream>, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::debug!(peer = %peer, "Accepted connection");
        let capture = Capture::new(self.tap.clone(), peer, self.dst, Some(self.done_tx.clone()));
        Ok((WiretapStream::new(stream, capture), peer))
    }

    /// Address the underlying listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, wait for every stream to commit, then take the log
    pub async fn close(self) -> Log {
        let WiretapListener {
            listener,
            tap,
            done_tx,
            mut done_rx,
            ..
        } = self;
        drop(listener);
        drop(done_tx);

        // Resolves once the last stream's sender is gone
        while done_rx.recv().await.is_some() {}

        let log = tap.log.take();
        tracing::debug!(transmissions = log.len(), "Wiretap closed");
        log
    }
}

/// Per-connection recording state
struct Capture {
    tap: Wiretap,
    peer: SocketAddr,
    dst: SocketAddr,
    pending: Vec<Transmission>,
    last_byte: Option<Instant>,
    _done: Option<mpsc::Sender<()>>,
}

impl Capture {
    fn new(tap: Wiretap, peer: SocketAddr, dst: SocketAddr, done: Option<mpsc::Sender<()>>) -> Self {
        Self {
            tap,
            peer,
            dst,
            pending: vec![Transmission::new(peer, dst)],
            last_byte: None,
            _done: done,
        }
    }

    fn record(&mut self, src: SocketAddr, dst: SocketAddr, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let now = Instant::now();

        let split = match self.pending.last_mut() {
            // Nothing flowed yet; reuse the slot for whichever side speaks
            Some(cur) if cur.is_empty() => {
                cur.src = src;
                cur.dst = dst;
                false
            }
            Some(cur) if cur.src == src => match (self.tap.max_interval, self.last_byte) {
                (Some(max), Some(last)) => now.duration_since(last) > max,
                _ => false,
            },
            _ => true,
        };

        if split {
            self.finalize_last();
            self.pending.push(Transmission::new(src, dst));
        }

        if let Some(cur) = self.pending.last_mut() {
            if cur.start.is_none() {
                cur.start = Some(Utc::now());
            }
            cur.raw.extend_from_slice(bytes);
        }
        self.last_byte = Some(now);
    }

    fn finalize_last(&self) {
        if let Some(t) = self.pending.last() {
            tracing::debug!(src = %t.src, dst = %t.dst, len = t.len(), "Transmission finalized");
            if let Some(cb) = &self.tap.callback {
                cb(t);
            }
        }
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        if self.pending.last().is_some_and(Transmission::is_empty) {
            self.pending.pop();
        }
        self.finalize_last();

        let batch = std::mem::take(&mut self.pending);
        tracing::debug!(peer = %self.peer, transmissions = batch.len(), "Connection committed");
        self.tap.log.append(batch);
        // `_done` drops after this, releasing the listener's join barrier
    }
}

/// A stream that mirrors reads and writes into a log
///
/// Reads are recorded as peer → dst, writes as dst → peer.
pub struct WiretapStream<S> {
    inner: S,
    capture: Capture,
}

impl<S> WiretapStream<S> {
    fn new(inner: S, capture: Capture) -> Self {
        Self { inner, capture }
    }

    /// Remote peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.capture.peer
    }

    /// Address recorded as the server side
    pub fn dst_addr(&self) -> SocketAddr {
        self.capture.dst
    }

    /// Reference to the wrapped stream
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S> fmt::Debug for WiretapStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WiretapStream")
            .field("peer", &self.capture.peer)
            .field("dst", &self.capture.dst)
            .field("pending", &self.capture.pending.len())
            .finish()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for WiretapStream<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let (peer, dst) = (this.capture.peer, this.capture.dst);
        this.capture.record(peer, dst, &buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for WiretapStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;

        let (peer, dst) = (this.capture.peer, this.capture.dst);
        this.capture.record(dst, peer, &buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
