use std::time::Duration;

use log::error;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Outcome label attached to request counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Rejected,
    Unavailable,
    Failed,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Rejected => "rejected",
            Outcome::Unavailable => "unavailable",
            Outcome::Failed => "failed",
        }
    }
}

/// Prediction metrics exported on `/metrics`
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    requests: IntCounterVec,
    texts: IntCounter,
    inference_seconds: HistogramVec,
    model_loaded: IntGauge,
}

impl ServiceMetrics {
    /// Create the metric families on a private registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("sentiment_requests_total", "Prediction requests by endpoint and outcome"),
            &["endpoint", "outcome"],
        )?;
        let texts = IntCounter::new("sentiment_texts_total", "Texts classified")?;
        let inference_seconds = HistogramVec::new(
            HistogramOpts::new("sentiment_inference_seconds", "Model call latency")
                .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["endpoint"],
        )?;
        let model_loaded = IntGauge::new("sentiment_model_loaded", "1 when the model is ready")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(texts.clone()))?;
        registry.register(Box::new(inference_seconds.clone()))?;
        registry.register(Box::new(model_loaded.clone()))?;

        Ok(Self { registry, requests, texts, inference_seconds, model_loaded })
    }

    pub fn record_request(&self, endpoint: &str, outcome: Outcome) {
        self.requests.with_label_values(&[endpoint, outcome.as_str()]).inc();
    }

    /// Record a completed model call over `count` texts
    pub fn record_inference(&self, endpoint: &str, count: usize, elapsed: Duration) {
        self.texts.inc_by(count as u64);
        self.inference_seconds
            .with_label_values(&[endpoint])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_model_loaded(&self, loaded: bool) {
        self.model_loaded.set(if loaded { 1 } else { 0 });
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
