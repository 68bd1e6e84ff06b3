//! Benchmark Module
//!
//! Measures backends directly and feeds the measurements back into profiles.
//!
//! # Architecture
//!
//! ```text
//! sample tasks × backend ids
//!            ↓
//!      BenchmarkHarness ──► TaskExecutor (shared or dedicated bound)
//!            ↓
//!   ExecutionAdapter call ──► ProfileStore::update
//!            ↓
//!     BenchmarkResult ──► BenchmarkStore (one JSON file each)
//!            ↓
//!       summarize() ──► BenchmarkSummary per backend
//! ```

pub mod harness;
pub mod store;
pub mod types;

pub use harness::{summarize, BenchmarkHarness, QualityJudge};
pub use store::BenchmarkStore;
pub use types::{BenchmarkResult, BenchmarkSummary};
