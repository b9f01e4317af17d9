//! The plugin registry and ranking pipeline (spec.md §4.1).
//!
//! `Plugins` owns the proxy table and the five registration-order plugin
//! sequences, and drives `AddProxy`/`DelProxy`/`Ranking`/`Feedback` exactly
//! as described in the design: lifecycle callbacks fire in registration
//! order with first-error abort, filtering drops a proxy on the first
//! `false`, and scores accumulate left to right before a descending,
//! tie-stable sort.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::RankingError;
use crate::plugin::Plugin;
use crate::types::{Feedback, Proxy, Target};

/// Owns the proxy table and dispatches the ranking pipeline.
///
/// The proxy map is guarded by a single `RwLock`: `AddProxy`/`DelProxy` take
/// the write side, `Ranking` takes the read side and sees a consistent
/// snapshot at the map-iteration level (spec.md §5).
pub struct Plugins {
    plugins: Vec<Arc<dyn Plugin>>,
    lifecycle: Vec<Arc<dyn Plugin>>,
    filters: Vec<Arc<dyn Plugin>>,
    scores: Vec<Arc<dyn Plugin>>,
    comparison_scores: Vec<Arc<dyn Plugin>>,
    feedback: Vec<Arc<dyn Plugin>>,
    proxies: RwLock<HashMap<String, Proxy>>,
}

impl Plugins {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let mut this = Self {
            plugins: Vec::new(),
            lifecycle: Vec::new(),
            filters: Vec::new(),
            scores: Vec::new(),
            comparison_scores: Vec::new(),
            feedback: Vec::new(),
            proxies: RwLock::new(HashMap::new()),
        };
        this.register(plugins);
        this
    }

    /// Classifies each plugin into its capability sequences. Registering
    /// the same plugin twice duplicates its invocations — idempotency is
    /// not required of this call (spec.md §4.1).
    pub fn register(&mut self, plugins: Vec<Arc<dyn Plugin>>) {
        for plugin in plugins {
            if plugin.as_lifecycle().is_some() {
                self.lifecycle.push(plugin.clone());
            }
            if plugin.as_filter().is_some() {
                self.filters.push(plugin.clone());
            }
            if plugin.as_score().is_some() {
                self.scores.push(plugin.clone());
            }
            if plugin.as_comparison_score().is_some() {
                self.comparison_scores.push(plugin.clone());
            }
            if plugin.as_feedback().is_some() {
                self.feedback.push(plugin.clone());
            }
            self.plugins.push(plugin);
        }
    }

    /// Adds a proxy to the registry. If its key is already present this is
    /// a no-op (no callbacks fire). Otherwise every lifecycle plugin's
    /// `OnAdd` runs in registration order; the first error aborts, leaves
    /// already-notified plugins un-rolled-back, and the proxy is not
    /// inserted (spec.md §3, §9 open question — `OnAdd` must tolerate
    /// partial observation by design).
    pub async fn add_proxy(&self, proxy: Proxy) -> Result<(), RankingError> {
        let key = proxy.key();
        {
            let proxies = self.proxies.read().expect("proxy map poisoned");
            if proxies.contains_key(&key) {
                return Ok(());
            }
        }

        for plugin in &self.lifecycle {
            let lifecycle = plugin.as_lifecycle().expect("classified as lifecycle");
            if let Err(source) = lifecycle.on_add(&proxy).await {
                warn!(proxy = %key, plugin = plugin.name(), "OnAdd rejected proxy");
                return Err(RankingError::Plugin {
                    plugin: "lifecycle.on_add",
                    source,
                });
            }
        }

        debug!(proxy = %key, "added proxy");
        self.proxies.write().expect("proxy map poisoned").insert(key, proxy);
        Ok(())
    }

    /// Removes a proxy from the registry. Absent proxies are a no-op.
    /// Lifecycle `OnDel` callbacks run in registration order against the
    /// still-present entry (so plugins can look it up during teardown);
    /// the entry is removed from the map once every callback has
    /// succeeded (spec.md §4.1 resolves the open question: the Go source
    /// leaves the entry behind, which this crate treats as a bug fix).
    pub async fn del_proxy(&self, proxy: &Proxy) -> Result<(), RankingError> {
        let key = proxy.key();
        let present = {
            let proxies = self.proxies.read().expect("proxy map poisoned");
            proxies.get(&key).cloned()
        };
        let Some(proxy) = present else {
            return Ok(());
        };

        for plugin in &self.lifecycle {
            let lifecycle = plugin.as_lifecycle().expect("classified as lifecycle");
            if let Err(source) = lifecycle.on_del(&proxy).await {
                return Err(RankingError::Plugin {
                    plugin: "lifecycle.on_del",
                    source,
                });
            }
        }

        debug!(proxy = %key, "deleted proxy");
        self.proxies.write().expect("proxy map poisoned").remove(&key);
        Ok(())
    }

    /// Runs the ranking pipeline: filter, per-proxy score, comparison
    /// score, then a descending, input-order-stable sort. Returns the
    /// permutation of the filtered-in subset of the registry, highest
    /// score first.
    pub async fn ranking(&self, target: &Target) -> Result<Vec<Proxy>, RankingError> {
        let snapshot: Vec<Proxy> = {
            let proxies = self.proxies.read().expect("proxy map poisoned");
            proxies.values().cloned().collect()
        };

        let mut filtered = Vec::with_capacity(snapshot.len());
        'outer: for proxy in snapshot {
            for plugin in &self.filters {
                let filter = plugin.as_filter().expect("classified as filter");
                if !filter.filter(target, &proxy).await {
                    continue 'outer;
                }
            }
            filtered.push(proxy);
        }

        if filtered.is_empty() {
            return Err(RankingError::NoMatch);
        }

        let mut scores = vec![0i64; filtered.len()];
        for plugin in &self.scores {
            let score_plugin = plugin.as_score().expect("classified as score");
            for (i, proxy) in filtered.iter().enumerate() {
                scores[i] += score_plugin.score(target, proxy).await.map_err(|source| {
                    RankingError::Plugin {
                        plugin: "score",
                        source,
                    }
                })?;
            }
        }

        for plugin in &self.comparison_scores {
            let comparison = plugin
                .as_comparison_score()
                .expect("classified as comparison score");
            let added = comparison
                .comparison_score(target, &filtered)
                .await
                .map_err(|source| RankingError::Plugin {
                    plugin: "comparison_score",
                    source,
                })?;
            debug_assert_eq!(added.len(), filtered.len());
            for (score, delta) in scores.iter_mut().zip(added) {
                *score += delta;
            }
        }

        // Stable sort descending by score: ties keep their relative
        // pre-sort (registration/iteration) order, which is what lets
        // RoundRobin-style plugins behave predictably.
        let mut indexed: Vec<(usize, i64)> = scores.into_iter().enumerate().collect();
        indexed.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(indexed.into_iter().map(|(i, _)| filtered[i].clone()).collect())
    }

    /// Fans feedback out to every feedback plugin in registration order.
    /// Feedback plugins don't return errors (spec.md §4.1); they are
    /// best-effort by construction.
    pub async fn feedback(&self, target: &Target, proxy: &Proxy, feedback: &Feedback) {
        for plugin in &self.feedback {
            let feedback_plugin = plugin.as_feedback().expect("classified as feedback");
            feedback_plugin.feedback(target, proxy, feedback).await;
        }
    }
}
