//! Random comparison-score plugin (spec.md §4.5), grounded in
//! `examples/original_source/plugins/random/random.go`. Returns a zero
//! vector with one slot — chosen uniformly via a seeded PRNG, not a
//! cryptographic one — set to `MAX_SCORE / 2`.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use crate::error::PluginError;
use crate::plugin::{ComparisonScorePlugin, Plugin};
use crate::types::{Proxy, Target, MAX_SCORE};

pub struct Random {
    rng: Mutex<StdRng>,
}

impl Random {
    /// Seeds from the OS entropy source.
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// Deterministic seed, for reproducible tests.
    pub fn with_seed(seed: u64) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }
}

impl Plugin for Random {
    fn name(&self) -> &str {
        "Random"
    }

    fn as_comparison_score(&self) -> Option<&dyn ComparisonScorePlugin> {
        Some(self)
    }
}

#[async_trait]
impl ComparisonScorePlugin for Random {
    async fn comparison_score(
        &self,
        _target: &Target,
        proxies: &[Proxy],
    ) -> Result<Vec<i64>, PluginError> {
        let mut scores = vec![0i64; proxies.len()];
        let index = self.rng.lock().expect("rng poisoned").gen_range(0..proxies.len());
        scores[index] = MAX_SCORE / 2;
        Ok(scores)
    }
}
