use serde::{Deserialize, Serialize};

use crate::core::backend::Sentiment;
use crate::core::model::{Prediction, SentimentScores};

/// Longest text accepted by the single prediction endpoint, in characters
pub const MAX_INPUT_CHARS: usize = 5000;
/// Most texts accepted by the batch endpoint schema
pub const MAX_BATCH_ITEMS: usize = 100;

/// Single prediction request
#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub text: String,
}

impl PredictRequest {
    pub fn validate(&self) -> Result<(), String> {
        let chars = self.text.chars().count();
        if chars < 1 {
            return Err("text: ensure this value has at least 1 character".to_string());
        }
        if chars > MAX_INPUT_CHARS {
            return Err(format!(
                "text: ensure this value has at most {} characters",
                MAX_INPUT_CHARS
            ));
        }
        Ok(())
    }
}

/// Batch prediction request
#[derive(Debug, Deserialize)]
pub struct BatchPredictRequest {
    pub texts: Vec<String>,
}

impl BatchPredictRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.texts.is_empty() {
            return Err("texts: ensure this list has at least 1 item".to_string());
        }
        if self.texts.len() > MAX_BATCH_ITEMS {
            return Err(format!("texts: ensure this list has at most {} items", MAX_BATCH_ITEMS));
        }
        Ok(())
    }
}

/// Single prediction response
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub text: String,
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub scores: SentimentScores,
}

impl From<Prediction> for PredictResponse {
    fn from(prediction: Prediction) -> Self {
        Self {
            text: prediction.text,
            sentiment: prediction.sentiment,
            confidence: prediction.confidence,
            scores: prediction.scores,
        }
    }
}

/// Batch prediction response
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchPredictResponse {
    pub predictions: Vec<PredictResponse>,
    pub total: usize,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub model_loaded: bool,
    pub version: String,
    pub details: Option<serde_json::Value>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &str, detail: impl Into<String>) -> Self {
        Self { error: error.to_string(), detail: Some(detail.into()) }
    }
}
