//! Rate comparison-score plugin (spec.md §4.4), grounded in
//! `examples/original_source/plugins/rate/rate.go`. Rewards headroom versus
//! each proxy's own ceiling: `score += (max_aver - aver) / max_aver *
//! weight` when the proxy's current average is below its own max.

use async_trait::async_trait;

use crate::error::PluginError;
use crate::plugin::{ComparisonScorePlugin, Plugin};
use crate::types::{Proxy, Target, MAX_SCORE};

pub struct Rate {
    weight: i64,
}

impl Rate {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            weight: MAX_SCORE / 50,
        })
    }
}

impl Plugin for Rate {
    fn name(&self) -> &str {
        "Rate"
    }

    fn as_comparison_score(&self) -> Option<&dyn ComparisonScorePlugin> {
        Some(self)
    }
}

#[async_trait]
impl ComparisonScorePlugin for Rate {
    async fn comparison_score(
        &self,
        _target: &Target,
        proxies: &[Proxy],
    ) -> Result<Vec<i64>, PluginError> {
        let scores = proxies
            .iter()
            .map(|proxy| {
                let aver = proxy.aver().unwrap_or(0);
                let max_aver = proxy.max_aver().unwrap_or(0);
                if max_aver > aver {
                    ((max_aver - aver) as f64 / max_aver as f64 * self.weight as f64) as i64
                } else {
                    0
                }
            })
            .collect();
        Ok(scores)
    }
}
