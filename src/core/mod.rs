//! Core of the sentiment service
//!
//! Settings, the shared model holder and the metrics registry used by the
//! web layer.

pub mod backend;
pub mod config;
pub mod metrics;
pub mod model;
