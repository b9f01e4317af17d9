//! Flow comparison-score plugin (spec.md §4.4), grounded in
//! `examples/original_source/plugins/flow/flow.go`. Rewards proxies that
//! have served less cumulative traffic: `score += (max_total - total) /
//! max_total * weight` for every proxy below the pool maximum.

use async_trait::async_trait;

use crate::error::PluginError;
use crate::plugin::{ComparisonScorePlugin, Plugin};
use crate::types::{Proxy, Target, MAX_SCORE};

pub struct Flow {
    weight: i64,
}

impl Flow {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            weight: MAX_SCORE / 50,
        })
    }
}

impl Plugin for Flow {
    fn name(&self) -> &str {
        "Flow"
    }

    fn as_comparison_score(&self) -> Option<&dyn ComparisonScorePlugin> {
        Some(self)
    }
}

#[async_trait]
impl ComparisonScorePlugin for Flow {
    async fn comparison_score(
        &self,
        _target: &Target,
        proxies: &[Proxy],
    ) -> Result<Vec<i64>, PluginError> {
        let totals: Vec<u64> = proxies.iter().map(|p| p.total().unwrap_or(0)).collect();
        let max_total = totals.iter().copied().max().unwrap_or(0);

        let scores = totals
            .into_iter()
            .map(|total| {
                if max_total > total {
                    ((max_total - total) as f64 / max_total as f64 * self.weight as f64) as i64
                } else {
                    0
                }
            })
            .collect();
        Ok(scores)
    }
}
