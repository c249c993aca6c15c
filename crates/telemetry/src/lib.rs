//! Cost estimation and usage statistics for Stepwise.
//!
//! Provides real-time cost estimation with built-in model pricing and the
//! process-wide cost accumulator shared by every model instance.

pub mod pricing;
pub mod stats;

pub use pricing::{ModelPricing, PricingTable};
pub use stats::{GlobalModelStats, SharedModelStats, StatsSnapshot};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum CostError {
    #[error("response carries no token usage")]
    MissingUsage,

    #[error("no pricing known for model: {0}")]
    UnknownModel(String),

    #[error("cost must be > 0.0, got {0}")]
    NonPositive(f64),

    #[error("failed to load model registry {path}: {reason}")]
    Registry { path: String, reason: String },
}
