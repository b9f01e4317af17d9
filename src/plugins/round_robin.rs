//! RoundRobin comparison-score plugin (spec.md §4.5), grounded in
//! `examples/original_source/plugins/roundrobin/roundrobin.go`. Returns a
//! zero vector with one slot set to a configured weight; the index cycles
//! via a process-wide atomic counter, `(counter.fetch_add(1)) % n`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PluginError;
use crate::plugin::{ComparisonScorePlugin, Plugin};
use crate::types::{Proxy, Target};

/// In-process, `Default`-deriving knobs for [`RoundRobin`] (SPEC_FULL.md
/// §10.3).
#[derive(Debug, Clone, Copy)]
pub struct RoundRobinConfig {
    /// Score handed to the winning slot each call.
    pub weight: i64,
}

impl Default for RoundRobinConfig {
    fn default() -> Self {
        Self {
            weight: crate::types::MAX_SCORE / 2,
        }
    }
}

pub struct RoundRobin {
    index: AtomicU64,
    weight: i64,
}

impl RoundRobin {
    pub fn new(weight: i64) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            index: AtomicU64::new(0),
            weight,
        })
    }

    pub fn with_config(config: RoundRobinConfig) -> std::sync::Arc<Self> {
        Self::new(config.weight)
    }
}

impl Plugin for RoundRobin {
    fn name(&self) -> &str {
        "RoundRobin"
    }

    fn as_comparison_score(&self) -> Option<&dyn ComparisonScorePlugin> {
        Some(self)
    }
}

#[async_trait]
impl ComparisonScorePlugin for RoundRobin {
    async fn comparison_score(
        &self,
        _target: &Target,
        proxies: &[Proxy],
    ) -> Result<Vec<i64>, PluginError> {
        let n = proxies.len() as u64;
        let ticket = self.index.fetch_add(1, Ordering::Relaxed);
        let selected = (ticket % n) as usize;

        let mut scores = vec![0i64; proxies.len()];
        scores[selected] = self.weight;
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dialer;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    struct NullDialer;
    #[async_trait]
    impl Dialer for NullDialer {
        async fn dial(&self, _network: &str, _address: &str) -> std::io::Result<crate::types::Conn> {
            Err(std::io::Error::other("unused"))
        }
    }

    fn proxies(n: usize) -> Vec<Proxy> {
        (0..n)
            .map(|i| Proxy::new(format!("p{i}"), IpAddr::V4(Ipv4Addr::LOCALHOST), 8080, Arc::new(NullDialer)))
            .collect()
    }

    #[tokio::test]
    async fn fair_over_k_full_cycles() {
        let rr = RoundRobin::new(50);
        let target = Target::new("x:1", vec![IpAddr::V4(Ipv4Addr::LOCALHOST)], 1);
        let proxies = proxies(4);
        let k = 10;

        let mut counts: HashMap<usize, usize> = HashMap::new();
        for _ in 0..(k * proxies.len()) {
            let scores = rr.comparison_score(&target, &proxies).await.unwrap();
            let selected = scores.iter().position(|&s| s != 0).unwrap();
            *counts.entry(selected).or_insert(0) += 1;
        }

        for i in 0..proxies.len() {
            assert_eq!(counts[&i], k, "index {i} should be selected exactly k times");
        }
    }
}
