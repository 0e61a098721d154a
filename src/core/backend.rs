use std::fmt::{Debug, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentiment classes produced by the classifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    /// Column order of the FinBERT classification head
    pub const DEFAULT_ORDER: [Sentiment; 3] =
        [Sentiment::Positive, Sentiment::Negative, Sentiment::Neutral];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(ModelError::Load(format!("unknown sentiment label '{}'", other))),
        }
    }
}

/// Error type for model operations
#[derive(Debug, Error)]
pub enum ModelError {
    /// Prediction requested before the model finished loading
    #[error("Model not loaded")]
    NotLoaded,
    /// Batch larger than the configured limit
    #[error("Batch size exceeds maximum of {max}")]
    BatchTooLarge { max: usize },
    /// Failure while fetching or building the model
    #[error("Failed to load model: {0}")]
    Load(String),
    /// Failure while running the model
    #[error("{0}")]
    Inference(String),
}

/// Inference runtime wrapped by the service
#[cfg_attr(test, mockall::automock)]
pub trait SentimentBackend: Send + Sync + Debug {
    /// Sentiment of each logit column, in column order
    fn labels(&self) -> Vec<Sentiment>;

    /// Run the classifier over `texts`, returning one row of logits per text
    fn infer(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;
}
