//! Backoff filter plugin (spec.md §4.2), grounded in
//! `examples/original_source/plugins/backoff/backoff.go`.
//!
//! Maintains a `(fail_count, last_fail)` pair per proxy. `Filter` admits a
//! proxy once `fail_count == 0` or the exponential hold-off
//! (`1s << fail_count`) has elapsed since its last recorded failure; a
//! single successful `Feedback` resets it to immediate admission.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::clock::{system_clock, Clock};
use crate::plugin::{FeedbackPlugin, FilterPlugin, Plugin};
use crate::types::{Feedback, Proxy, Target};

/// Caps the shift exponent so `1s << fail_count` never overflows
/// (spec.md §4.2 design note).
const MAX_FAIL_SHIFT: u32 = 20;

/// In-process, `Default`-deriving knobs for [`Backoff`] (SPEC_FULL.md
/// §10.3), the same "plain struct with a `Default` impl" shape as the
/// teacher's `CircuitBreakerConfig` — never parsed from a config file by
/// this crate.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Base hold-off unit; the hold-off after `k` failures is `base << k`.
    pub base: Duration,
    /// Upper bound on the failure counter, so the shift never overflows.
    pub max_fail_shift: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_fail_shift: MAX_FAIL_SHIFT,
        }
    }
}

#[derive(Clone, Copy)]
struct BackoffState {
    fail_count: u32,
    last_fail: Option<Instant>,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self {
            fail_count: 0,
            last_fail: None,
        }
    }
}

/// Exponential-backoff filter. Cheap to construct; holds one `DashMap`
/// entry per registered proxy.
pub struct Backoff {
    checks: DashMap<String, BackoffState>,
    clock: Arc<dyn Clock>,
    config: BackoffConfig,
}

impl Backoff {
    pub fn new() -> Arc<Self> {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Arc<Self> {
        Self::with_config(clock, BackoffConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: BackoffConfig) -> Arc<Self> {
        Arc::new(Self {
            checks: DashMap::new(),
            clock,
            config,
        })
    }
}

impl Plugin for Backoff {
    fn name(&self) -> &str {
        "Backoff"
    }

    fn as_lifecycle(&self) -> Option<&dyn crate::plugin::LifecyclePlugin> {
        Some(self)
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }

    fn as_feedback(&self) -> Option<&dyn FeedbackPlugin> {
        Some(self)
    }
}

#[async_trait]
impl crate::plugin::LifecyclePlugin for Backoff {
    async fn on_add(&self, proxy: &Proxy) -> Result<(), crate::error::PluginError> {
        self.checks.insert(proxy.key(), BackoffState::default());
        Ok(())
    }

    async fn on_del(&self, proxy: &Proxy) -> Result<(), crate::error::PluginError> {
        self.checks.remove(&proxy.key());
        Ok(())
    }
}

#[async_trait]
impl FilterPlugin for Backoff {
    async fn filter(&self, _target: &Target, proxy: &Proxy) -> bool {
        let Some(state) = self.checks.get(&proxy.key()) else {
            // Never observed via OnAdd — fail open rather than panic.
            return true;
        };
        if state.fail_count == 0 {
            return true;
        }
        let Some(last_fail) = state.last_fail else {
            return true;
        };
        let exponent = state.fail_count.min(self.config.max_fail_shift);
        let hold_off = self.config.base * (1u32 << exponent);
        self.clock.now() >= last_fail + hold_off
    }
}

#[async_trait]
impl FeedbackPlugin for Backoff {
    async fn feedback(&self, _target: &Target, proxy: &Proxy, feedback: &Feedback) {
        let mut state = self.checks.entry(proxy.key()).or_default();
        if feedback.successful {
            if state.fail_count > 0 {
                debug!(proxy = %proxy, "backoff reset to immediate admission");
            }
            state.fail_count = 0;
            state.last_fail = None;
        } else {
            state.fail_count = (state.fail_count + 1).min(self.config.max_fail_shift);
            state.last_fail = Some(self.clock.now());
            debug!(proxy = %proxy, fail_count = state.fail_count, "backoff held off");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FakeClock;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    struct NullDialer;
    #[async_trait]
    impl crate::types::Dialer for NullDialer {
        async fn dial(&self, _network: &str, _address: &str) -> std::io::Result<crate::types::Conn> {
            Err(std::io::Error::other("unused"))
        }
    }

    fn test_proxy() -> Proxy {
        Proxy::new(
            "p1",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            8080,
            Arc::new(NullDialer),
        )
    }

    fn test_target() -> Target {
        Target::new("example:80", vec![IpAddr::V4(Ipv4Addr::LOCALHOST)], 80)
    }

    #[tokio::test]
    async fn admits_fresh_proxy() {
        let backoff = Backoff::new();
        let proxy = test_proxy();
        backoff.on_add(&proxy).await.unwrap();
        assert!(backoff.filter(&test_target(), &proxy).await);
    }

    #[tokio::test]
    async fn backs_off_exponentially_and_recovers() {
        let clock = FakeClock::new();
        let backoff = Backoff::with_clock(clock.clone());
        let proxy = test_proxy();
        let target = test_target();
        backoff.on_add(&proxy).await.unwrap();

        for k in 1..=3u32 {
            backoff
                .feedback(&target, &proxy, &Feedback::failure("boom"))
                .await;
            assert!(!backoff.filter(&target, &proxy).await, "k={k}");

            let hold_off = Duration::from_secs(1u64 << k);
            clock.advance(hold_off - Duration::from_millis(1));
            assert!(!backoff.filter(&target, &proxy).await, "just before k={k}");
            clock.advance(Duration::from_millis(1));
            assert!(backoff.filter(&target, &proxy).await, "at k={k}");
        }
    }

    #[tokio::test]
    async fn success_resets_immediately() {
        let clock = FakeClock::new();
        let backoff = Backoff::with_clock(clock.clone());
        let proxy = test_proxy();
        let target = test_target();
        backoff.on_add(&proxy).await.unwrap();

        backoff
            .feedback(&target, &proxy, &Feedback::failure("boom"))
            .await;
        assert!(!backoff.filter(&target, &proxy).await);

        backoff.feedback(&target, &proxy, &Feedback::success()).await;
        assert!(backoff.filter(&target, &proxy).await);
    }

    #[tokio::test]
    async fn on_del_forgets_state() {
        let backoff = Backoff::new();
        let proxy = test_proxy();
        backoff.on_add(&proxy).await.unwrap();
        backoff.on_del(&proxy).await.unwrap();
        // Unknown proxies fail open rather than panicking.
        assert!(backoff.filter(&test_target(), &proxy).await);
    }
}
