//! Inference backends for the sentiment service

pub mod finbert;
