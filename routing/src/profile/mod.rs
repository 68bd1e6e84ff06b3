//! Profile Store Module
//!
//! Per-backend performance profiles (quality by complexity bucket, latency,
//! success rate, context window, pricing) and the online update rule that
//! keeps them current from live traffic and benchmark runs.

pub mod store;
pub mod types;

pub use store::{ProfileStore, SharedProfileStore};
pub use types::{ComplexityBucket, ComplexityRange, ModelProfile, Observation, TokenPricing};
