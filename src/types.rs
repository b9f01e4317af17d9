//! Core value types shared by every plugin and by the dial orchestrator.
//!
//! These mirror the data model in section 3 of the design: a [`Proxy`] is a
//! forward-dialing endpoint with an identity and a [`Dialer`] capability, a
//! [`Target`] is a resolved destination, and [`Feedback`] reports the
//! outcome of a single dial attempt.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

/// Logical maximum score. Bundled plugins express their weight as a
/// fraction of this; the final ranking only depends on relative sums.
pub const MAX_SCORE: i64 = 100;

/// A bidirectional, asynchronous byte stream. Implemented for anything that
/// is both `AsyncRead` and `AsyncWrite`, so `Conn` can box TCP streams, TLS
/// streams, or any other transport a `Dialer` wants to hand back.
pub trait AsyncConn: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + Sync {}

impl<T> AsyncConn for T where T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + Sync {}

/// A live, bidirectional connection returned by a [`Dialer`].
pub type Conn = Box<dyn AsyncConn>;

/// A forward-dialing capability, shape-compatible with the standard
/// `(ctx, network, address) -> conn | error` dial function so it can stand
/// in for a SOCKS, HTTP, or direct dialer.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, network: &str, address: &str) -> std::io::Result<Conn>;
}

/// Optional runtime metrics a [`Proxy`] may expose. Scorers that need
/// traffic/rate data (Flow, Rate) are skipped for proxies that don't
/// implement this.
pub trait ProxyMetrics: Send + Sync {
    /// Average latency over some provider-defined recent window.
    fn aver(&self) -> u64;
    /// Ceiling average latency this proxy has ever reported.
    fn max_aver(&self) -> u64;
    /// Cumulative bytes/requests served, whatever unit the embedder prefers
    /// as long as it's monotonic.
    fn total(&self) -> u64;
}

/// A forward proxy: identity, endpoint, dial capability, and optional
/// metrics accessors.
#[derive(Clone)]
pub struct Proxy {
    name: String,
    pub ip: IpAddr,
    pub port: u16,
    pub dialer: Arc<dyn Dialer>,
    pub metrics: Option<Arc<dyn ProxyMetrics>>,
}

impl Proxy {
    /// Builds a proxy. If `name` is empty, the registry key is derived from
    /// `ip:port` instead (spec.md §3).
    pub fn new(name: impl Into<String>, ip: IpAddr, port: u16, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            name: name.into(),
            ip,
            port,
            dialer,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn ProxyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The unique registry key: `name` if non-empty, else `ip:port`.
    pub fn key(&self) -> String {
        if self.name.is_empty() {
            format!("{}:{}", self.ip, self.port)
        } else {
            self.name.clone()
        }
    }

    pub fn aver(&self) -> Option<u64> {
        self.metrics.as_ref().map(|m| m.aver())
    }

    pub fn max_aver(&self) -> Option<u64> {
        self.metrics.as_ref().map(|m| m.max_aver())
    }

    pub fn total(&self) -> Option<u64> {
        self.metrics.as_ref().map(|m| m.total())
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("key", &self.key())
            .field("ip", &self.ip)
            .field("port", &self.port)
            .finish()
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A resolved dial destination: the original address string plus the IPs
/// and port the resolver (or literal-IP fast path) produced for it.
///
/// Immutable after construction, scope-local to one dial.
#[derive(Debug, Clone)]
pub struct Target {
    pub address: String,
    pub ips: Vec<IpAddr>,
    pub port: u16,
}

impl Target {
    pub fn new(address: impl Into<String>, ips: Vec<IpAddr>, port: u16) -> Self {
        Self {
            address: address.into(),
            ips,
            port,
        }
    }
}

/// Outcome of one dial attempt, fed back to adaptive plugins.
///
/// `successful` and `error` are mutually exclusive; a successful attempt
/// carries no error and vice versa.
#[derive(Debug, Clone)]
pub struct Feedback {
    pub successful: bool,
    pub error: Option<Arc<str>>,
}

impl Feedback {
    pub fn success() -> Self {
        Self {
            successful: true,
            error: None,
        }
    }

    pub fn failure(message: impl Into<Arc<str>>) -> Self {
        Self {
            successful: false,
            error: Some(message.into()),
        }
    }
}
