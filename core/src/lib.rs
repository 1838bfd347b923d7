//! Call-detail fraud ETL core.
//!
//! Loader → Normalizer → Joiner → Feature Deriver → Anomaly Detector → Sink.
//! The transform stages are pure and in-memory; `loader` and `sink`/`store`
//! are the I/O collaborators around them.

pub mod anomaly;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod features;
pub mod joiner;
pub mod loader;
pub mod normalizer;
pub mod pipeline;
pub mod records;
pub mod rng;
pub mod sample;
pub mod sink;
pub mod store;
pub mod types;
pub mod value;
