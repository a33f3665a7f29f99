//! Metrics emitted through the `metrics` facade
//!
//! Nothing is recorded unless the embedding application installs a recorder.

pub mod counters;
pub mod histograms;
pub mod labels;
