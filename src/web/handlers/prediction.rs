use std::time::Instant;

use actix_web::{web, HttpResponse, Responder};
use log::{debug, error, warn};

use crate::core::backend::ModelError;
use crate::core::metrics::Outcome;
use crate::web::models::{
    BatchPredictRequest, BatchPredictResponse, ErrorResponse, PredictRequest, PredictResponse,
};
use crate::web::server::AppState;

const NOT_LOADED_DETAIL: &str = "Model not loaded. Service is starting up.";

fn unavailable() -> HttpResponse {
    HttpResponse::ServiceUnavailable().json(ErrorResponse::new("Service unavailable", NOT_LOADED_DETAIL))
}

fn unprocessable(detail: String) -> HttpResponse {
    HttpResponse::UnprocessableEntity().json(ErrorResponse::new("Validation error", detail))
}

/// Map a model failure onto the HTTP response reported to the caller
fn model_error_response(data: &AppState, endpoint: &str, context: &str, err: ModelError) -> HttpResponse {
    match err {
        ModelError::NotLoaded => {
            data.metrics.record_request(endpoint, Outcome::Unavailable);
            unavailable()
        }
        ModelError::BatchTooLarge { .. } => {
            data.metrics.record_request(endpoint, Outcome::Rejected);
            HttpResponse::BadRequest().json(ErrorResponse::new("Bad request", err.to_string()))
        }
        ModelError::Load(_) | ModelError::Inference(_) => {
            error!("{} error: {}", context, err);
            data.metrics.record_request(endpoint, Outcome::Failed);
            HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error", format!("{} failed: {}", context, err)))
        }
    }
}

/// Predict the sentiment of a single text
pub async fn predict_sentiment(
    data: web::Data<AppState>,
    request: web::Json<PredictRequest>,
) -> impl Responder {
    const ENDPOINT: &str = "predict";

    if let Err(detail) = request.validate() {
        data.metrics.record_request(ENDPOINT, Outcome::Rejected);
        return unprocessable(detail);
    }

    if !data.model.is_loaded().await {
        data.metrics.record_request(ENDPOINT, Outcome::Unavailable);
        return unavailable();
    }

    let started = Instant::now();
    match data.model.predict(&request.text).await {
        Ok(prediction) => {
            data.metrics.record_inference(ENDPOINT, 1, started.elapsed());
            data.metrics.record_request(ENDPOINT, Outcome::Success);
            debug!("Predicted {} ({:.4})", prediction.sentiment, prediction.confidence);
            HttpResponse::Ok().json(PredictResponse::from(prediction))
        }
        Err(e) => model_error_response(&data, ENDPOINT, "Prediction", e),
    }
}

/// Predict the sentiment of several texts in one model call
pub async fn predict_sentiment_batch(
    data: web::Data<AppState>,
    request: web::Json<BatchPredictRequest>,
) -> impl Responder {
    const ENDPOINT: &str = "predict_batch";

    if let Err(detail) = request.validate() {
        data.metrics.record_request(ENDPOINT, Outcome::Rejected);
        return unprocessable(detail);
    }

    if !data.model.is_loaded().await {
        data.metrics.record_request(ENDPOINT, Outcome::Unavailable);
        return unavailable();
    }

    let max = data.settings.max_batch_size;
    if request.texts.len() > max {
        warn!("Rejected batch of {} texts (max {})", request.texts.len(), max);
        data.metrics.record_request(ENDPOINT, Outcome::Rejected);
        return HttpResponse::BadRequest().json(ErrorResponse::new(
            "Bad request",
            format!("Batch size exceeds maximum of {}", max),
        ));
    }

    let count = request.texts.len();
    let started = Instant::now();
    match data.model.predict_batch(request.into_inner().texts).await {
        Ok(predictions) => {
            data.metrics.record_inference(ENDPOINT, count, started.elapsed());
            data.metrics.record_request(ENDPOINT, Outcome::Success);
            let predictions: Vec<PredictResponse> =
                predictions.into_iter().map(PredictResponse::from).collect();
            HttpResponse::Ok().json(BatchPredictResponse { total: predictions.len(), predictions })
        }
        Err(e) => model_error_response(&data, ENDPOINT, "Batch prediction", e),
    }
}
