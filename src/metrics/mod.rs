//! Metrics aggregation engine
//!
//! Event handlers emit `MetricEffect`s describing what happened; the
//! collectors in this module fan each effect out across the aggregate
//! scopes (daily, weekly, per-token, per-operator, network totals) keyed by
//! the time buckets in `buckets`. The fan-out is an explicit function call
//! per effect, so the write amplification stays visible and testable apart
//! from entity mutation.

pub mod aggregates;
pub mod buckets;
pub mod collectors;
pub mod effects;
