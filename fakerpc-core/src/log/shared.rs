//! Lock-guarded log handle shared by concurrent capture tasks

use std::sync::{Arc, Mutex, MutexGuard};

use super::{Log, Transmission};

/// Cloneable handle to a log that is being appended to
///
/// Every clone points at the same log. Appends of a connection's
/// transmissions happen as one batch under the lock, so transmissions of
/// one connection always stay contiguous and in chronological order.
#[derive(Debug, Clone, Default)]
pub struct SharedLog {
    inner: Arc<Mutex<Log>>,
}

impl SharedLog {
    /// Wrap a log (usually a fresh one carrying only metadata)
    pub fn new(log: Log) -> Self {
        Self {
            inner: Arc::new(Mutex::new(log)),
        }
    }

    /// Append a batch of finalized transmissions
    pub fn append(&self, batch: Vec<Transmission>) {
        if batch.is_empty() {
            return;
        }
        self.lock().transmissions.extend(batch);
    }

    /// Number of committed transmissions
    pub fn len(&self) -> usize {
        self.lock().transmissions.len()
    }

    /// True if nothing has been committed yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the log as it is right now
    pub fn snapshot(&self) -> Log {
        self.lock().clone()
    }

    /// Move the log out, leaving an empty one with the same metadata
    pub fn take(&self) -> Log {
        let mut log = self.lock();
        let empty = Log {
            transmissions: Vec::new(),
            ..log.clone_metadata()
        };
        std::mem::replace(&mut *log, empty)
    }

    // The log is append-only, so a panic while holding the lock cannot leave
    // a half-written transmission behind.
    fn lock(&self) -> MutexGuard<'_, Log> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Log {
    fn clone_metadata(&self) -> Log {
        Log {
            network: self.network,
            interface: self.interface.clone(),
            filter: self.filter.clone(),
            max_interval: self.max_interval,
            transmissions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn t(src: &str, dst: &str, raw: &str) -> Transmission {
        Transmission::new(
            src.parse::<SocketAddr>().unwrap(),
            dst.parse::<SocketAddr>().unwrap(),
        )
        .with_raw(raw)
    }

    #[test]
    fn test_append_and_take() {
        let shared = SharedLog::new(Log::new().with_filter("tcp"));
        let handle = shared.clone();

        handle.append(vec![t("1.1.1.1:1", "2.2.2.2:2", "a")]);
        handle.append(Vec::new());
        shared.append(vec![
            t("1.1.1.1:1", "2.2.2.2:2", "b"),
            t("2.2.2.2:2", "1.1.1.1:1", "c"),
        ]);
        assert_eq!(shared.len(), 3);

        let log = shared.take();
        assert_eq!(log.len(), 3);
        assert_eq!(log.transmissions[2].raw, b"c");
        assert_eq!(log.filter.as_deref(), Some("tcp"));

        assert!(shared.is_empty());
        assert_eq!(shared.snapshot().filter.as_deref(), Some("tcp"));
    }

    #[test]
    fn test_concurrent_appends_keep_batches_contiguous() {
        let shared = SharedLog::default();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let src = format!("10.0.0.{i}:1000");
                    shared.append(vec![
                        t(&src, "10.0.1.1:80", "req"),
                        t("10.0.1.1:80", &src, "res"),
                    ]);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let log = shared.take();
        assert_eq!(log.len(), 16);
        for pair in log.transmissions.chunks(2) {
            assert!(pair[1].is_reply_to(&pair[0]));
        }
    }
}
