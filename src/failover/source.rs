//! Endpoint descriptors and the ordered failover list

use crate::connection::{ConnectionOptions, TlsOptions};
use crate::metrics::labels;
use crate::{Error, Result};
use std::fmt;
use std::path::PathBuf;

/// Highest accepted endpoint priority
pub const MAX_PRIORITY: u8 = 100;

/// One candidate endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// X Protocol over TCP
    Network {
        /// Host name or address
        host: String,
        /// TCP port
        port: u16,
        /// Session options
        options: ConnectionOptions,
        /// TLS negotiation options; `None` skips negotiation entirely
        tls: Option<TlsOptions>,
    },
    /// X Protocol over a local (Unix domain) socket
    Local {
        /// Socket path
        path: PathBuf,
        /// Session options
        options: ConnectionOptions,
    },
    /// Classic protocol endpoint, recognised but never connectable
    LegacyNetwork {
        /// Host name or address
        host: String,
        /// TCP port
        port: u16,
    },
}

impl Endpoint {
    /// TCP endpoint without TLS options
    pub fn tcp(host: impl Into<String>, port: u16, options: ConnectionOptions) -> Self {
        Endpoint::Network {
            host: host.into(),
            port,
            options,
            tls: None,
        }
    }

    /// Local socket endpoint
    pub fn local(path: impl Into<PathBuf>, options: ConnectionOptions) -> Self {
        Endpoint::Local {
            path: path.into(),
            options,
        }
    }

    /// Classic protocol endpoint
    pub fn legacy(host: impl Into<String>, port: u16) -> Self {
        Endpoint::LegacyNetwork {
            host: host.into(),
            port,
        }
    }

    /// Attach TLS options to a network endpoint; other kinds are unchanged
    pub fn with_tls(mut self, options: TlsOptions) -> Self {
        if let Endpoint::Network { tls, .. } = &mut self {
            *tls = Some(options);
        }
        self
    }

    /// Session options, if this kind carries any
    pub fn options(&self) -> Option<&ConnectionOptions> {
        match self {
            Endpoint::Network { options, .. } | Endpoint::Local { options, .. } => Some(options),
            Endpoint::LegacyNetwork { .. } => None,
        }
    }

    /// Transport label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Endpoint::Network { .. } => labels::TRANSPORT_TCP,
            Endpoint::Local { .. } => labels::TRANSPORT_UNIX,
            Endpoint::LegacyNetwork { .. } => labels::TRANSPORT_LEGACY,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Network { host, port, .. } if host.contains(':') => {
                write!(f, "[{}]:{}", host, port)
            }
            Endpoint::Network { host, port, .. } => write!(f, "{}:{}", host, port),
            Endpoint::Local { path, .. } => write!(f, "{}", path.display()),
            Endpoint::LegacyNetwork { host, port } => write!(f, "mysql://{}:{}", host, port),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    priority: Option<u8>,
    endpoint: Endpoint,
}

/// Ordered list of candidate endpoints.
///
/// Either every entry carries a priority or none does. Prioritized entries
/// are kept in descending priority order; entries with equal priority (and
/// all entries of an unprioritized list) keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct MultiSource {
    entries: Vec<Entry>,
}

impl MultiSource {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an endpoint without a priority
    pub fn add(&mut self, endpoint: Endpoint) -> Result<()> {
        if self.is_prioritized() {
            return Err(mixed_priorities());
        }
        self.entries.push(Entry {
            priority: None,
            endpoint,
        });
        Ok(())
    }

    /// Insert an endpoint with a priority in `0..=100`
    pub fn add_prioritized(&mut self, endpoint: Endpoint, priority: u8) -> Result<()> {
        if priority > MAX_PRIORITY {
            return Err(Error::Config(format!(
                "priority {} out of range 0..={}",
                priority, MAX_PRIORITY
            )));
        }
        if !self.entries.is_empty() && !self.is_prioritized() {
            return Err(mixed_priorities());
        }

        // After the last entry whose priority is not lower
        let pos = self
            .entries
            .iter()
            .position(|e| e.priority < Some(priority))
            .unwrap_or(self.entries.len());
        self.entries.insert(
            pos,
            Entry {
                priority: Some(priority),
                endpoint,
            },
        );
        Ok(())
    }

    /// Number of endpoints
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the entries carry priorities
    pub fn is_prioritized(&self) -> bool {
        self.entries.first().is_some_and(|e| e.priority.is_some())
    }

    /// Endpoints in attempt order
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> + '_ {
        self.entries.iter().map(|e| &e.endpoint)
    }
}

impl<'a> IntoIterator for &'a MultiSource {
    type Item = &'a Endpoint;
    type IntoIter = Box<dyn Iterator<Item = &'a Endpoint> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

fn mixed_priorities() -> Error {
    Error::Config("either all or none of the endpoints must have a priority".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> Endpoint {
        Endpoint::tcp(name, 33060, ConnectionOptions::new())
    }

    fn hosts(source: &MultiSource) -> Vec<String> {
        source.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_unprioritized_keeps_insertion_order() {
        let mut source = MultiSource::new();
        source.add(host("a")).unwrap();
        source.add(host("b")).unwrap();
        source.add(host("c")).unwrap();

        assert_eq!(hosts(&source), ["a:33060", "b:33060", "c:33060"]);
        assert!(!source.is_prioritized());
    }

    #[test]
    fn test_prioritized_descending_and_stable() {
        let mut source = MultiSource::new();
        source.add_prioritized(host("low"), 10).unwrap();
        source.add_prioritized(host("high"), 90).unwrap();
        source.add_prioritized(host("mid1"), 50).unwrap();
        source.add_prioritized(host("mid2"), 50).unwrap();
        source.add_prioritized(host("zero"), 0).unwrap();

        assert_eq!(
            hosts(&source),
            ["high:33060", "mid1:33060", "mid2:33060", "low:33060", "zero:33060"]
        );
    }

    #[test]
    fn test_priority_range() {
        let mut source = MultiSource::new();
        assert!(source.add_prioritized(host("a"), 100).is_ok());
        assert!(matches!(
            source.add_prioritized(host("b"), 101),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_mixed_priorities_rejected() {
        let mut source = MultiSource::new();
        source.add(host("a")).unwrap();
        assert!(source.add_prioritized(host("b"), 5).is_err());

        let mut source = MultiSource::new();
        source.add_prioritized(host("a"), 5).unwrap();
        assert!(source.add(host("b")).is_err());
    }

    #[test]
    fn test_endpoint_display_and_kind() {
        assert_eq!(host("db").to_string(), "db:33060");
        assert_eq!(
            Endpoint::tcp("::1", 33060, ConnectionOptions::new()).to_string(),
            "[::1]:33060"
        );

        let local = Endpoint::local("/tmp/mysqlx.sock", ConnectionOptions::new());
        assert_eq!(local.to_string(), "/tmp/mysqlx.sock");
        assert_eq!(local.kind(), "unix");

        let legacy = Endpoint::legacy("db", 3306);
        assert_eq!(legacy.kind(), "legacy");
        assert!(legacy.options().is_none());
    }

    #[test]
    fn test_with_tls_only_applies_to_network() {
        let tls = TlsOptions::new(crate::connection::SslMode::Preferred);
        match host("db").with_tls(tls.clone()) {
            Endpoint::Network { tls: Some(t), .. } => assert_eq!(t, tls),
            other => panic!("unexpected {:?}", other),
        }

        let local = Endpoint::local("/tmp/x.sock", ConnectionOptions::new()).with_tls(tls);
        assert!(matches!(local, Endpoint::Local { .. }));
    }
}
