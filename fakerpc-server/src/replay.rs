//! Per-connection replay worker

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use fakerpc_core::Connection;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::reader::RequestReader;

/// Error text used when a client sends more requests than were recorded
pub const NO_RESPONSE: &str = "fakerpc: no response recorded for the request";

/// One served leg of a replayed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEvent {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    /// Body bytes read for a request leg, response bytes for a response leg
    pub bytes: u64,
    pub error: Option<String>,
}

/// Observer invoked once per served leg
pub type ReplyCallback = Arc<dyn Fn(ReplyEvent) + Send + Sync>;

/// Build the synthetic response sent in place of a missing recording
pub fn synthetic_500(msg: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 500 Internal Server Error\r\n\
         Content-Length: {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {msg}",
        msg.len()
    )
    .into_bytes()
}

/// Serves one client with one recorded connection group
pub(crate) struct Worker {
    pub group: Arc<Vec<Connection>>,
    pub peer: SocketAddr,
    pub local: SocketAddr,
    pub reply: Option<ReplyCallback>,
}

impl Worker {
    /// Answer requests until the client hangs up or `shutdown` is raised
    ///
    /// `shutdown` is only observed while waiting for the next request head.
    pub async fn run<S>(self, stream: S, mut shutdown: watch::Receiver<bool>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (rd, mut wr) = tokio::io::split(stream);
        let mut reader = RequestReader::new(rd);
        let mut served = 0usize;

        let exit: Option<io::Error> = loop {
            let head = tokio::select! {
                head = reader.read_head() => head,
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break None,
            };
            let head = match head {
                Ok(Some(head)) => head,
                Ok(None) => break None,
                Err(e) => break Some(e),
            };
            let i = served;
            served += 1;

            let drained = reader.drain_body(&head).await;

            let Some(conn) = self.group.get(i) else {
                tracing::warn!(peer = %self.peer, request = i, path = head.path(), "No response recorded");
                self.write_500(&mut wr, NO_RESPONSE).await;
                self.report(self.peer, self.local, *drained.as_ref().unwrap_or(&0), Some(NO_RESPONSE.to_string()));
                if drained.is_err() || head.close {
                    break None;
                }
                continue;
            };

            match drained {
                Ok(n) => self.report(self.peer, self.local, n, None),
                Err(e) => {
                    let msg = e.to_string();
                    self.report(self.peer, self.local, 0, Some(msg.clone()));
                    self.write_500(&mut wr, &msg).await;
                    break None;
                }
            }

            if !conn.response.is_empty() {
                let written = write_all(&mut wr, &conn.response).await;
                self.report(
                    self.local,
                    self.peer,
                    conn.response.len() as u64,
                    written.as_ref().err().map(ToString::to_string),
                );
                if written.is_err() {
                    break None;
                }
            }
            tracing::debug!(peer = %self.peer, request = i, path = head.path(), "Replayed response");

            if head.close {
                break None;
            }
        };

        if let Some(e) = exit {
            tracing::debug!(peer = %self.peer, error = %e, "Read failed");
            self.report(self.peer, self.local, 0, Some(e.to_string()));
        }
        let _ = wr.shutdown().await;
        tracing::debug!(peer = %self.peer, requests = served, "Connection closed");
    }

    async fn write_500<W: AsyncWrite + Unpin>(&self, wr: &mut W, msg: &str) {
        if let Err(e) = write_all(wr, &synthetic_500(msg)).await {
            tracing::debug!(peer = %self.peer, error = %e, "Writing error response failed");
        }
    }

    fn report(&self, src: SocketAddr, dst: SocketAddr, bytes: u64, error: Option<String>) {
        if let Some(reply) = &self.reply {
            reply(ReplyEvent { src, dst, bytes, error });
        }
    }
}

async fn write_all<W: AsyncWrite + Unpin>(wr: &mut W, buf: &[u8]) -> io::Result<()> {
    wr.write_all(buf).await?;
    wr.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use fakerpc_core::RequestHead;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    fn recorded(response: &'static str) -> Connection {
        Connection {
            request: RequestHead::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap(),
            request_body: Bytes::new(),
            response: Bytes::from_static(response.as_bytes()),
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_synthetic_500() {
        let raw = String::from_utf8(synthetic_500("boom")).unwrap();
        assert!(raw.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(raw.contains("Content-Length: 4\r\n"));
        assert!(raw.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(raw.ends_with("\r\n\r\nboom"));
    }

    #[tokio::test]
    async fn test_worker_replays_then_reports_missing() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let response = "HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nA";
        let worker = Worker {
            group: Arc::new(vec![recorded(response)]),
            peer: addr(40000),
            local: addr(8080),
            reply: Some(Arc::new(move |ev: ReplyEvent| sink.lock().unwrap().push(ev))),
        };

        let (mut client, server) = tokio::io::duplex(4096);
        let (_tx, rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(server, rx));

        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nhiGET /again HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        task.await.unwrap();

        let (first, second) = out.split_at(out.find("HTTP/1.1 500").unwrap());
        assert_eq!(first, response);
        assert!(second.ends_with(NO_RESPONSE));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!((events[0].src, events[0].bytes, events[0].error.is_none()), (addr(40000), 2, true));
        assert_eq!((events[1].src, events[1].bytes), (addr(8080), response.len() as u64));
        assert_eq!(events[2].error.as_deref(), Some(NO_RESPONSE));
    }

    #[tokio::test]
    async fn test_empty_response_writes_nothing() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let worker = Worker {
            group: Arc::new(vec![recorded("")]),
            peer: addr(40001),
            local: addr(8080),
            reply: Some(Arc::new(move |ev: ReplyEvent| sink.lock().unwrap().push(ev))),
        };

        let (mut client, server) = tokio::io::duplex(4096);
        let (_tx, rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(server, rx));

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        client.shutdown().await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap();

        assert!(out.is_empty());
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_request_reported_once() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let worker = Worker {
            group: Arc::new(vec![recorded("")]),
            peer: addr(40002),
            local: addr(8080),
            reply: Some(Arc::new(move |ev: ReplyEvent| sink.lock().unwrap().push(ev))),
        };

        let (mut client, server) = tokio::io::duplex(4096);
        let (_tx, rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(server, rx));

        client.write_all(b"\x00\x01 not http\r\n\r\n").await.unwrap();
        task.await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bytes, 0);
        assert!(events[0].error.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connection() {
        let worker = Worker {
            group: Arc::new(vec![recorded("")]),
            peer: addr(40003),
            local: addr(8080),
            reply: None,
        };
        let (_client, server) = tokio::io::duplex(4096);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(server, rx));

        tx.send_replace(true);
        task.await.unwrap();
    }
}
