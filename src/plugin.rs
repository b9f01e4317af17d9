//! Plugin capability contracts (spec.md §4.1, design note "classification
//! by optional capabilities").
//!
//! Rather than querying an opaque plugin value for which interfaces it
//! implements at runtime, each capability is its own trait. A plugin
//! implements any combination of them; [`crate::registry::Plugins::register`]
//! tries to downcast-free "implements" each one via a small `as_*` method on
//! [`Plugin`], building the five registration-order sequences described in
//! spec.md §3.

use async_trait::async_trait;

use crate::error::PluginError;
use crate::types::{Feedback, Proxy, Target};

/// Every plugin has a name, used only for logging and error messages.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `self` as a lifecycle plugin if it implements one.
    fn as_lifecycle(&self) -> Option<&dyn LifecyclePlugin> {
        None
    }
    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        None
    }
    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        None
    }
    fn as_comparison_score(&self) -> Option<&dyn ComparisonScorePlugin> {
        None
    }
    fn as_feedback(&self) -> Option<&dyn FeedbackPlugin> {
        None
    }
}

/// Notified when a proxy enters or leaves the registry.
#[async_trait]
pub trait LifecyclePlugin: Send + Sync {
    async fn on_add(&self, proxy: &Proxy) -> Result<(), PluginError>;
    async fn on_del(&self, proxy: &Proxy) -> Result<(), PluginError>;
}

/// A yes/no admission check evaluated per-proxy during ranking.
#[async_trait]
pub trait FilterPlugin: Send + Sync {
    async fn filter(&self, target: &Target, proxy: &Proxy) -> bool;
}

/// An integer score contributed per-proxy, summed across all score plugins.
#[async_trait]
pub trait ScorePlugin: Send + Sync {
    async fn score(&self, target: &Target, proxy: &Proxy) -> Result<i64, PluginError>;
}

/// A score vector computed over the whole surviving proxy list at once —
/// for plugins whose scoring is inherently relative (probe latency,
/// round-robin, random).
#[async_trait]
pub trait ComparisonScorePlugin: Send + Sync {
    /// Must return a vector the same length as `proxies`, index-aligned.
    async fn comparison_score(
        &self,
        target: &Target,
        proxies: &[Proxy],
    ) -> Result<Vec<i64>, PluginError>;
}

/// Receives the outcome of a dial attempt. Errors from feedback plugins are
/// swallowed by the registry (spec.md §4.1, §7) — this trait therefore has
/// no `Result` return.
#[async_trait]
pub trait FeedbackPlugin: Send + Sync {
    async fn feedback(&self, target: &Target, proxy: &Proxy, feedback: &Feedback);
}
