//! Fixture mode selection

/// Target URL that turns on recording; the log is written on teardown
pub const RECORD_ENV: &str = "FAKERPC_RECORD";

/// Target URL for a pass-through proxy that writes nothing
pub const PROXY_ENV: &str = "FAKERPC";

/// How a fixture stands in for the service under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureMode {
    /// Proxy to the URL and store the captured log
    Record(String),
    /// Proxy to the URL without storing anything
    Proxy(String),
    /// Answer from the stored log
    Replay,
}

impl FixtureMode {
    /// Mode picked by `FAKERPC_RECORD` and `FAKERPC`, in that order
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var(RECORD_ENV).ok(),
            std::env::var(PROXY_ENV).ok(),
        )
    }

    /// Same rules as [`from_env`](Self::from_env) over explicit values.
    /// Empty values count as unset.
    pub fn from_vars(record: Option<String>, proxy: Option<String>) -> Self {
        let set = |v: Option<String>| v.filter(|v| !v.trim().is_empty());
        if let Some(url) = set(record) {
            Self::Record(url)
        } else if let Some(url) = set(proxy) {
            Self::Proxy(url)
        } else {
            Self::Replay
        }
    }

    /// Upstream URL for the proxying modes
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Record(url) | Self::Proxy(url) => Some(url),
            Self::Replay => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_record_wins_over_proxy() {
        assert_eq!(
            FixtureMode::from_vars(some("http://a:1"), some("http://b:2")),
            FixtureMode::Record("http://a:1".to_string())
        );
        assert_eq!(
            FixtureMode::from_vars(None, some("http://b:2")),
            FixtureMode::Proxy("http://b:2".to_string())
        );
    }

    #[test]
    fn test_unset_or_empty_means_replay() {
        assert_eq!(FixtureMode::from_vars(None, None), FixtureMode::Replay);
        assert_eq!(FixtureMode::from_vars(some(""), some(" ")), FixtureMode::Replay);
        assert_eq!(FixtureMode::Replay.target(), None);
        assert_eq!(FixtureMode::Proxy("x".into()).target(), Some("x"));
    }
}
