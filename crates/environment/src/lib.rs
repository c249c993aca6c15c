//! Command execution environments for Stepwise.
//!
//! All environments implement the `stepwise_core::Environment` trait.

pub mod local;

pub use local::LocalEnvironment;
