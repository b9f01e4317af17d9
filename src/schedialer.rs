//! The dial orchestrator (spec.md §4.6), grounded in
//! `examples/original_source/schedialer.go` for address resolution and
//! extended per spec.md's staggered-race redesign — the source's
//! `DialContext` just forwards to a single ranked proxy; this crate races
//! the whole ranked list the way §4.6 and the "race-dial task graph"
//! design note describe.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::error::{Result, SchedialerError};
use crate::registry::Plugins;
use crate::resolver::{Resolver, SystemResolver};
use crate::types::{Conn, Feedback, Proxy, Target};

/// Default inter-start delay between ranked attempts in a staggered race.
pub const DEFAULT_STAGGER_PERIOD: Duration = Duration::from_secs(1);
/// Default per-attempt timeout for the serial-fallback dial mode.
pub const DEFAULT_SERIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// In-process, `Default`-deriving knobs for [`Schedialer`] (SPEC_FULL.md
/// §10.3): the stagger period for the race mode and the per-attempt
/// timeout for the serial-fallback mode.
#[derive(Debug, Clone, Copy)]
pub struct StaggerConfig {
    /// Inter-start delay between ranked attempts in [`Schedialer::dial_context`]'s race.
    pub period: Duration,
    /// Per-attempt timeout used by [`Schedialer::dial_context_serial`].
    pub serial_timeout: Duration,
}

impl Default for StaggerConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_STAGGER_PERIOD,
            serial_timeout: DEFAULT_SERIAL_TIMEOUT,
        }
    }
}

/// Resolves destinations, ranks proxies, and drives the race (or serial
/// fallback) that turns a ranked list into one live connection.
pub struct Schedialer {
    plugins: Arc<Plugins>,
    resolver: Arc<dyn Resolver>,
    stagger: StaggerConfig,
}

impl Schedialer {
    pub fn new(plugins: Arc<Plugins>) -> Self {
        Self {
            plugins,
            resolver: Arc::new(SystemResolver),
            stagger: StaggerConfig::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_stagger_period(mut self, period: Duration) -> Self {
        self.stagger.period = period;
        self
    }

    pub fn with_stagger_config(mut self, stagger: StaggerConfig) -> Self {
        self.stagger = stagger;
        self
    }

    /// Exposes the ordered candidate list without dialing (spec.md §6).
    pub async fn ranking(&self, network: &str, address: &str) -> Result<Vec<Proxy>> {
        let (_, proxies) = self.rank(network, address).await?;
        Ok(proxies)
    }

    /// Resolves `address`, ranks the pool, and races the ranked candidates
    /// (or forwards directly when there's only one) until one yields a
    /// connection.
    pub async fn dial_context(&self, network: &str, address: &str) -> Result<Conn> {
        let (target, proxies) = self.rank(network, address).await?;
        match proxies.len() {
            0 => Err(SchedialerError::NoProxyAvailable),
            1 => self.dial_single(network, address, &target, &proxies[0]).await,
            _ => self.race(network, address, &target, proxies).await,
        }
    }

    /// Alternative, simpler dial mode (spec.md §4.6): try ranked proxies
    /// one at a time under a per-attempt timeout, first success wins.
    pub async fn dial_context_serial(&self, network: &str, address: &str) -> Result<Conn> {
        self.dial_context_serial_with_timeout(network, address, self.stagger.serial_timeout)
            .await
    }

    pub async fn dial_context_serial_with_timeout(
        &self,
        network: &str,
        address: &str,
        timeout: Duration,
    ) -> Result<Conn> {
        let (target, proxies) = self.rank(network, address).await?;
        if proxies.is_empty() {
            return Err(SchedialerError::NoProxyAvailable);
        }

        let mut first_error: Option<std::io::Error> = None;
        for proxy in &proxies {
            match tokio::time::timeout(timeout, proxy.dialer.dial(network, address)).await {
                Ok(Ok(conn)) => {
                    self.plugins.feedback(&target, proxy, &Feedback::success()).await;
                    return Ok(conn);
                }
                Ok(Err(err)) => {
                    self.plugins
                        .feedback(&target, proxy, &Feedback::failure(err.to_string()))
                        .await;
                    first_error.get_or_insert(err);
                }
                Err(_) => {
                    let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out");
                    self.plugins
                        .feedback(&target, proxy, &Feedback::failure(timed_out.to_string()))
                        .await;
                    first_error.get_or_insert(timed_out);
                }
            }
        }

        Err(SchedialerError::AllDialsFailed(
            first_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts completed".to_string())
                .into(),
        ))
    }

    async fn dial_single(&self, network: &str, address: &str, target: &Target, proxy: &Proxy) -> Result<Conn> {
        match proxy.dialer.dial(network, address).await {
            Ok(conn) => {
                self.plugins.feedback(target, proxy, &Feedback::success()).await;
                Ok(conn)
            }
            Err(err) => {
                self.plugins
                    .feedback(target, proxy, &Feedback::failure(err.to_string()))
                    .await;
                Err(SchedialerError::AllDialsFailed(err.to_string().into()))
            }
        }
    }

    /// The staggered race itself. Launches one sub-task per ranked proxy,
    /// started `stagger_period` apart; the first connection wins, a
    /// `Notify` best-effort-cancels the rest, and feedback is delivered for
    /// every attempt that actually completes — winners and losers alike —
    /// per spec.md §4.6's resolution of the source's disagreement on this
    /// point. Attempts still asleep when cancellation fires, or whose dial
    /// future gets dropped mid-flight, never complete and so never report
    /// feedback, standing in for the source's "ignore `context.Canceled`".
    async fn race(
        &self,
        network: &str,
        address: &str,
        target: &Target,
        proxies: Vec<Proxy>,
    ) -> Result<Conn> {
        let (tx, mut rx) = mpsc::channel::<(usize, std::io::Result<Conn>)>(proxies.len());
        let cancelled = Arc::new(Notify::new());
        let mut handles = Vec::with_capacity(proxies.len());

        for (i, proxy) in proxies.iter().cloned().enumerate() {
            let tx = tx.clone();
            let cancelled = Arc::clone(&cancelled);
            let network = network.to_string();
            let address = address.to_string();
            let delay = self.stagger.period * i as u32;

            handles.push(tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancelled.notified() => return,
                }
                tokio::select! {
                    result = proxy.dialer.dial(&network, &address) => {
                        let _ = tx.send((i, result)).await;
                    }
                    _ = cancelled.notified() => {}
                }
            }));
        }
        drop(tx);

        let mut winner: Option<Conn> = None;
        let mut errors: Vec<std::io::Error> = Vec::new();

        while let Some((i, result)) = rx.recv().await {
            let proxy = &proxies[i];
            match result {
                Ok(conn) => {
                    self.plugins.feedback(target, proxy, &Feedback::success()).await;
                    if winner.is_none() {
                        debug!(proxy = %proxy, "race winner");
                        winner = Some(conn);
                        cancelled.notify_waiters();
                    } else {
                        debug!(proxy = %proxy, "closing late connection from race");
                        drop(conn);
                    }
                }
                Err(err) => {
                    warn!(proxy = %proxy, error = %err, "race attempt failed");
                    self.plugins
                        .feedback(target, proxy, &Feedback::failure(err.to_string()))
                        .await;
                    errors.push(err);
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        winner.ok_or_else(|| {
            let message = errors
                .into_iter()
                .next()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts completed".to_string());
            SchedialerError::AllDialsFailed(message.into())
        })
    }

    /// Resolves and ranks, translating an empty-filter-set ranking failure
    /// into `NoProxyAvailable` — the registry-is-empty and
    /// everyone-got-filtered-out cases both surface through
    /// `RankingError::NoMatch` (spec.md §4.1 step 5), but spec.md §7 lists
    /// `no-match` and `no-proxy-available` as distinct error kinds at the
    /// `Schedialer` boundary, so this is where they part ways.
    async fn rank(&self, network: &str, address: &str) -> Result<(Target, Vec<Proxy>)> {
        let target = self.resolve_target(network, address).await?;
        let proxies = match self.plugins.ranking(&target).await {
            Ok(proxies) => proxies,
            Err(crate::error::RankingError::NoMatch) => return Err(SchedialerError::NoProxyAvailable),
            Err(err) => return Err(err.into()),
        };
        Ok((target, proxies))
    }

    async fn resolve_target(&self, network: &str, address: &str) -> Result<Target> {
        let (host, port_str) = split_host_port(address).map_err(|source| SchedialerError::ResolveFailed {
            address: address.to_string(),
            source,
        })?;

        let ips = match host.parse::<IpAddr>() {
            Ok(ip) => vec![ip],
            Err(_) => self
                .resolver
                .lookup_ip(&host)
                .await
                .map_err(|source| SchedialerError::ResolveFailed {
                    address: address.to_string(),
                    source,
                })?,
        };

        let port = self
            .resolver
            .lookup_port(network, &port_str)
            .await
            .map_err(|source| SchedialerError::ResolveFailed {
                address: address.to_string(),
                source,
            })?;

        Ok(Target::new(address, ips, port))
    }
}

/// Splits `host:port`, supporting bracketed IPv6 literals
/// (`[::1]:8080`) the way the standard library's `SplitHostPort` does.
fn split_host_port(address: &str) -> std::io::Result<(String, String)> {
    let invalid = || {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("address {address} is not in host:port form"),
        )
    };

    if let Some(rest) = address.strip_prefix('[') {
        let (host, remainder) = rest.split_once(']').ok_or_else(invalid)?;
        let port = remainder.strip_prefix(':').ok_or_else(invalid)?;
        return Ok((host.to_string(), port.to_string()));
    }

    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    Ok((host.to_string(), port.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct FixedDelayDialer {
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl crate::types::Dialer for FixedDelayDialer {
        async fn dial(&self, _network: &str, _address: &str) -> std::io::Result<Conn> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(std::io::Error::other("dial failed"))
            } else {
                let (client, _server) = tokio::io::duplex(64);
                Ok(Box::new(client))
            }
        }
    }

    struct CountingFeedback {
        successes: AtomicUsize,
        failures: AtomicUsize,
    }

    impl CountingFeedback {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                successes: AtomicUsize::new(0),
                failures: AtomicUsize::new(0),
            })
        }
    }

    impl Plugin for CountingFeedback {
        fn name(&self) -> &str {
            "CountingFeedback"
        }
        fn as_feedback(&self) -> Option<&dyn crate::plugin::FeedbackPlugin> {
            Some(self)
        }
    }

    #[async_trait]
    impl crate::plugin::FeedbackPlugin for CountingFeedback {
        async fn feedback(&self, _target: &Target, _proxy: &Proxy, feedback: &Feedback) {
            if feedback.successful {
                self.successes.fetch_add(1, Ordering::SeqCst);
            } else {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct LoopbackResolver;
    #[async_trait]
    impl Resolver for LoopbackResolver {
        async fn lookup_ip(&self, _host: &str) -> std::io::Result<Vec<IpAddr>> {
            Ok(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)])
        }
        async fn lookup_port(&self, _network: &str, port: &str) -> std::io::Result<u16> {
            port.parse().map_err(|_| std::io::Error::other("bad port"))
        }
    }

    fn proxy_with(name: &str, delay: Duration, fail: bool) -> Proxy {
        Proxy::new(
            name,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
            Arc::new(FixedDelayDialer { delay, fail }),
        )
    }

    #[tokio::test]
    async fn fast_proxy_wins_race_within_stagger_period() {
        let feedback = CountingFeedback::new();
        let plugins = Arc::new(Plugins::new(vec![feedback.clone() as Arc<dyn Plugin>]));
        plugins
            .add_proxy(proxy_with("slow", Duration::from_millis(900), false))
            .await
            .unwrap();
        plugins
            .add_proxy(proxy_with("fast", Duration::from_millis(100), false))
            .await
            .unwrap();

        let schedialer = Schedialer::new(plugins)
            .with_resolver(Arc::new(LoopbackResolver))
            .with_stagger_period(Duration::from_secs(1));

        let start = Instant::now();
        let conn = schedialer.dial_context("tcp", "target.example:80").await;
        assert!(conn.is_ok());
        assert!(start.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn all_failing_proxies_surface_error_and_feed_back() {
        let feedback = CountingFeedback::new();
        let plugins = Arc::new(Plugins::new(vec![feedback.clone() as Arc<dyn Plugin>]));
        plugins.add_proxy(proxy_with("a", Duration::ZERO, true)).await.unwrap();
        plugins.add_proxy(proxy_with("b", Duration::ZERO, true)).await.unwrap();

        let schedialer = Schedialer::new(plugins)
            .with_resolver(Arc::new(LoopbackResolver))
            .with_stagger_period(Duration::from_millis(10));

        let result = schedialer.dial_context("tcp", "target.example:80").await;
        assert!(matches!(result, Err(SchedialerError::AllDialsFailed(_))));
        assert_eq!(feedback.failures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_registry_reports_no_proxy_available() {
        let plugins = Arc::new(Plugins::new(vec![]));
        let schedialer = Schedialer::new(plugins).with_resolver(Arc::new(LoopbackResolver));
        let result = schedialer.dial_context("tcp", "target.example:80").await;
        assert!(
            matches!(result, Err(SchedialerError::NoProxyAvailable)),
            "expected NoProxyAvailable, got {result:?}"
        );
    }

    #[tokio::test]
    async fn all_filtered_out_also_reports_no_proxy_available() {
        // A non-empty registry where every proxy is filtered out hits the
        // same `RankingError::NoMatch` path as an empty registry, and
        // should surface the same `NoProxyAvailable` error at this boundary.
        struct RejectAllFilter;
        #[async_trait]
        impl crate::plugin::FilterPlugin for RejectAllFilter {
            async fn filter(&self, _target: &Target, _proxy: &Proxy) -> bool {
                false
            }
        }
        impl Plugin for RejectAllFilter {
            fn name(&self) -> &str {
                "RejectAllFilter"
            }
            fn as_filter(&self) -> Option<&dyn crate::plugin::FilterPlugin> {
                Some(self)
            }
        }

        let plugins = Arc::new(Plugins::new(vec![Arc::new(RejectAllFilter) as Arc<dyn Plugin>]));
        plugins.add_proxy(proxy_with("a", Duration::ZERO, false)).await.unwrap();

        let schedialer = Schedialer::new(plugins).with_resolver(Arc::new(LoopbackResolver));
        let result = schedialer.dial_context("tcp", "target.example:80").await;
        assert!(
            matches!(result, Err(SchedialerError::NoProxyAvailable)),
            "expected NoProxyAvailable, got {result:?}"
        );
    }

    #[test]
    fn splits_ipv4_and_bracketed_ipv6() {
        assert_eq!(
            split_host_port("example.com:443").unwrap(),
            ("example.com".to_string(), "443".to_string())
        );
        assert_eq!(
            split_host_port("[::1]:8080").unwrap(),
            ("::1".to_string(), "8080".to_string())
        );
        assert!(split_host_port("no-port").is_err());
    }
}
