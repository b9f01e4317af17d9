//! Error types for the scheduling dialer.
//!
//! Two tiers, the same shape as `ClientError`/`ProviderError` in the SDK
//! this crate grew out of: [`RankingError`] covers everything that can go
//! wrong inside [`crate::registry::Plugins::ranking`] (filter/score plugin
//! failures, an empty filtered set), and [`SchedialerError`] wraps that plus
//! the orchestrator's own failure modes (resolution, no proxies, all dials
//! failed). Background probe failures and feedback-plugin errors never
//! surface as either — they're swallowed per spec.md §7.

use std::sync::Arc;
use thiserror::Error;

/// An error reported by a plugin callback (`OnAdd`, `Score`,
/// `ComparisonScore`). Plugins are third-party and may originate from
/// anywhere, so this boxes the underlying cause rather than enumerating it.
pub type PluginError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while reducing a proxy pool and target down to a ranked
/// candidate list.
#[derive(Debug, Error)]
pub enum RankingError {
    /// The filter stage admitted zero proxies.
    #[error("no proxy matched the filter chain")]
    NoMatch,

    /// A lifecycle, score, or comparison-score plugin returned an error;
    /// ranking aborts immediately on the first one (spec.md §4.1 step 2/3).
    #[error("plugin {plugin} failed: {source}")]
    Plugin {
        plugin: &'static str,
        #[source]
        source: PluginError,
    },
}

/// Top-level error type for the dialer's public operations.
#[derive(Debug, Error)]
pub enum SchedialerError {
    /// `host:port` couldn't be split, or the resolver couldn't turn `host`
    /// into IPs / `network` couldn't resolve `port`.
    #[error("failed to resolve address {address}: {source}")]
    ResolveFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Ranking failed — see [`RankingError`] for the cause.
    #[error("ranking failed: {0}")]
    Ranking(#[from] RankingError),

    /// Ranking admitted zero proxies — whether because the registry was
    /// empty to begin with or because every registered proxy was filtered
    /// out. `Schedialer` translates `RankingError::NoMatch` into this
    /// variant at its boundary rather than exposing the pipeline-internal
    /// error directly, since both causes mean the same thing to a caller:
    /// there was nothing to dial.
    #[error("no proxy available")]
    NoProxyAvailable,

    /// Every attempt in the dial race/serial fallback failed. Carries the
    /// earliest non-cancellation error, or a joined message when more than
    /// one attempt failed and the caller asked for detail.
    #[error("all dial attempts failed: {0}")]
    AllDialsFailed(Arc<str>),
}

pub type Result<T> = std::result::Result<T, SchedialerError>;
