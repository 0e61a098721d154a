use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::backend::{ModelError, Sentiment, SentimentBackend};
use crate::core::config::Settings;

/// Number of characters of the input echoed back in a prediction
pub const ECHO_TEXT_CHARS: usize = 200;

/// Loading state of the classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ModelStatus {
    /// Nothing has been loaded yet
    NotLoaded,
    /// Weights are being fetched and built
    Loading,
    /// Model is ready to serve predictions
    Ready,
    /// Last load attempt failed
    Failed(String),
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelStatus::NotLoaded => write!(f, "Not Loaded"),
            ModelStatus::Loading => write!(f, "Loading"),
            ModelStatus::Ready => write!(f, "Ready"),
            ModelStatus::Failed(err) => write!(f, "Failed: {}", err),
        }
    }
}

/// What a call to [`SentimentModel::load_with`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// This call ran the loader and the model is now ready
    Loaded,
    /// The model was ready before the call; the loader did not run
    AlreadyLoaded,
    /// Another call is still loading; the model is not ready yet
    InProgress,
}

/// Probability of each sentiment class
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SentimentScores {
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
}

/// Classification of a single text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    /// Input text, truncated for display
    pub text: String,
    pub sentiment: Sentiment,
    /// Probability of the predicted class
    pub confidence: f64,
    pub scores: SentimentScores,
}

struct ModelState {
    status: ModelStatus,
    backend: Option<Arc<dyn SentimentBackend>>,
    loaded_at: Option<DateTime<Utc>>,
}

/// Shared holder of the sentiment classifier
///
/// One instance lives in the application state for the whole process. It starts
/// empty, is filled once by [`SentimentModel::load_with`], and serves predictions
/// from any number of request handlers afterwards.
pub struct SentimentModel {
    settings: Arc<Settings>,
    state: RwLock<ModelState>,
}

impl SentimentModel {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            state: RwLock::new(ModelState {
                status: ModelStatus::NotLoaded,
                backend: None,
                loaded_at: None,
            }),
        }
    }

    /// Load the classifier with `loader` unless it is already loaded or loading
    ///
    /// The loader runs on the blocking thread pool. On failure the holder records
    /// the reason and stays usable, so health checks keep reporting. Only
    /// `Ok(LoadOutcome::Loaded | LoadOutcome::AlreadyLoaded)` means the model can serve.
    pub async fn load_with<F, B>(&self, loader: F) -> Result<LoadOutcome, ModelError>
    where
        F: FnOnce() -> Result<B, ModelError> + Send + 'static,
        B: SentimentBackend + 'static,
    {
        {
            let mut state = self.state.write().await;
            match state.status {
                ModelStatus::Ready => {
                    info!("Model already loaded, skipping...");
                    return Ok(LoadOutcome::AlreadyLoaded);
                }
                ModelStatus::Loading => {
                    info!("Model load already in progress, skipping...");
                    return Ok(LoadOutcome::InProgress);
                }
                _ => state.status = ModelStatus::Loading,
            }
        }

        info!("Loading model: {}", self.settings.model_name);
        info!("Device: {}", self.settings.device);
        let started = Instant::now();

        let result = match tokio::task::spawn_blocking(loader).await {
            Ok(result) => result,
            Err(e) => Err(ModelError::Load(format!("loader task failed: {}", e))),
        };

        let mut state = self.state.write().await;
        match result {
            Ok(backend) => {
                state.backend = Some(Arc::new(backend));
                state.status = ModelStatus::Ready;
                state.loaded_at = Some(Utc::now());
                info!("Model loaded successfully in {:.1}s", started.elapsed().as_secs_f64());
                Ok(LoadOutcome::Loaded)
            }
            Err(e) => {
                error!("Failed to load model: {}", e);
                state.status = ModelStatus::Failed(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.status == ModelStatus::Ready
    }

    pub async fn status(&self) -> ModelStatus {
        self.state.read().await.status.clone()
    }

    pub async fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.loaded_at
    }

    /// Predict the sentiment of a single text
    pub async fn predict(&self, text: &str) -> Result<Prediction, ModelError> {
        let mut predictions = self.predict_batch(vec![text.to_string()]).await?;
        predictions
            .pop()
            .ok_or_else(|| ModelError::Inference("model returned no prediction".to_string()))
    }

    /// Predict the sentiment of every text in one model call
    pub async fn predict_batch(&self, texts: Vec<String>) -> Result<Vec<Prediction>, ModelError> {
        let backend = {
            let state = self.state.read().await;
            match (&state.status, &state.backend) {
                (ModelStatus::Ready, Some(backend)) => backend.clone(),
                _ => return Err(ModelError::NotLoaded),
            }
        };

        if texts.len() > self.settings.max_batch_size {
            return Err(ModelError::BatchTooLarge { max: self.settings.max_batch_size });
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Running inference on {} text(s)", texts.len());
        let labels = backend.labels();
        let (texts, logits) = tokio::task::spawn_blocking(move || {
            let logits = backend.infer(&texts);
            (texts, logits)
        })
        .await
        .map_err(|e| ModelError::Inference(format!("inference task failed: {}", e)))?;
        let logits = logits?;

        if logits.len() != texts.len() {
            return Err(ModelError::Inference(format!(
                "expected {} rows of logits, got {}",
                texts.len(),
                logits.len()
            )));
        }

        texts
            .iter()
            .zip(logits.iter())
            .map(|(text, row)| build_prediction(text, row, &labels))
            .collect()
    }
}

fn build_prediction(text: &str, logits: &[f32], labels: &[Sentiment]) -> Result<Prediction, ModelError> {
    if logits.len() != labels.len() || logits.is_empty() {
        return Err(ModelError::Inference(format!(
            "expected {} logits per text, got {}",
            labels.len(),
            logits.len()
        )));
    }

    let probs = softmax(logits);
    let best = argmax(&probs);

    let score_of = |sentiment: Sentiment| {
        labels
            .iter()
            .position(|label| *label == sentiment)
            .map(|idx| round4(probs[idx]))
            .unwrap_or(0.0)
    };

    Ok(Prediction {
        text: truncate_text(text),
        sentiment: labels[best],
        confidence: round4(probs[best]),
        scores: SentimentScores {
            positive: score_of(Sentiment::Positive),
            negative: score_of(Sentiment::Negative),
            neutral: score_of(Sentiment::Neutral),
        },
    })
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits.iter().fold(f64::NEG_INFINITY, |acc, &x| acc.max(x as f64));
    let exps: Vec<f64> = logits.iter().map(|&x| (x as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; the first one wins on ties
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (idx, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] {
            best = idx;
        }
    }
    best
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Text echoed in responses: the first 200 characters, with `...` when cut
pub fn truncate_text(text: &str) -> String {
    if text.chars().count() > ECHO_TEXT_CHARS {
        let head: String = text.chars().take(ECHO_TEXT_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
