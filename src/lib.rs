//! # schedialer
//!
//! A scheduling dialer: given a destination (`network`, `host:port`), select
//! a forward proxy from a dynamic pool and open a transport connection
//! through it. Selection is not hard-coded — it's produced by a pluggable
//! pipeline of filters and scorers, combined with a dial strategy that races
//! candidates to minimise tail latency while feeding outcomes back into the
//! scorers.
//!
//! ## Pieces
//!
//! - [`types`]: the value model — [`Proxy`], [`Target`], [`Feedback`], the
//!   [`Dialer`] capability a proxy dials through.
//! - [`plugin`]: the five optional plugin capability slots (lifecycle,
//!   filter, per-proxy score, comparison score, feedback).
//! - [`registry`]: [`Plugins`], which owns the proxy table and runs the
//!   ranking pipeline.
//! - [`plugins`]: the bundled plugins — Backoff, Probe, Flow, Rate, Random,
//!   RoundRobin.
//! - [`schedialer`]: [`Schedialer`], the dial orchestrator that resolves an
//!   address, ranks the pool, and races (or serially tries) the ranked
//!   candidates until one yields a connection.
//! - [`resolver`] / [`clock`]: the external DNS and time capabilities the
//!   orchestrator and Backoff/Probe consume.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use schedialer::plugins::{Backoff, Probe, RoundRobin};
//! use schedialer::{Plugins, Schedialer};
//!
//! # async fn run() -> schedialer::Result<()> {
//! let plugins = Arc::new(Plugins::new(vec![
//!     Backoff::new(),
//!     Probe::new(50, "http://example.com/"),
//!     RoundRobin::new(30),
//! ]));
//! let dialer = Schedialer::new(plugins);
//! let conn = dialer.dial_context("tcp", "example.com:443").await?;
//! drop(conn);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod resolver;
pub mod schedialer;
pub mod types;

pub use error::{PluginError, RankingError, Result, SchedialerError};
pub use plugin::{ComparisonScorePlugin, FeedbackPlugin, FilterPlugin, LifecyclePlugin, Plugin, ScorePlugin};
pub use registry::Plugins;
pub use schedialer::{Schedialer, StaggerConfig};
pub use types::{Conn, Dialer, Feedback, Proxy, ProxyMetrics, Target, MAX_SCORE};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    struct LoopbackDialer;
    #[async_trait]
    impl Dialer for LoopbackDialer {
        async fn dial(&self, _network: &str, _address: &str) -> std::io::Result<Conn> {
            let (client, _server) = tokio::io::duplex(64);
            Ok(Box::new(client))
        }
    }

    /// End-to-end smoke test across the public surface: register a plugin,
    /// add a proxy, rank, and confirm the registered proxy comes back.
    #[tokio::test]
    async fn adds_and_ranks_a_single_proxy() {
        let plugins = Plugins::new(vec![crate::plugins::RoundRobin::new(50)]);
        let proxy = Proxy::new(
            "only",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            1080,
            Arc::new(LoopbackDialer) as Arc<dyn Dialer>,
        );
        plugins.add_proxy(proxy.clone()).await.unwrap();

        let target = Target::new("example.com:443", vec![IpAddr::V4(Ipv4Addr::LOCALHOST)], 443);
        let ranked = plugins.ranking(&target).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].key(), proxy.key());
    }

    #[tokio::test]
    async fn deleting_unknown_proxy_is_a_no_op() {
        let plugins = Plugins::new(vec![]);
        let proxy = Proxy::new(
            "ghost",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            1080,
            Arc::new(LoopbackDialer) as Arc<dyn Dialer>,
        );
        assert!(plugins.del_proxy(&proxy).await.is_ok());
    }
}
