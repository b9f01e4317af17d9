//! Bundled plugins (spec.md §2 "Bundled plugins"). Each submodule is a
//! self-contained, optional [`crate::plugin::Plugin`] implementation; none
//! are required, and an embedder can register any subset alongside their
//! own plugins through [`crate::registry::Plugins`].

pub mod backoff;
pub mod flow;
pub mod probe;
pub mod random;
pub mod rate;
pub mod round_robin;

pub use backoff::{Backoff, BackoffConfig};
pub use flow::Flow;
pub use probe::{Probe, ProbeConfig};
pub use random::Random;
pub use rate::Rate;
pub use round_robin::{RoundRobin, RoundRobinConfig};
