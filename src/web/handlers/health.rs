use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde_json::json;

use crate::web::models::{ErrorResponse, HealthResponse};
use crate::web::server::AppState;

fn health(data: &AppState, status: &str, model_loaded: bool, details: Option<serde_json::Value>) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: data.settings.service_name.clone(),
        model_loaded,
        version: env!("CARGO_PKG_VERSION").to_string(),
        details,
    }
}

/// General health check; reports unhealthy until the model is loaded
pub async fn health_check(data: web::Data<AppState>) -> impl Responder {
    let loaded = data.model.is_loaded().await;
    let status = if loaded { "healthy" } else { "unhealthy" };

    HttpResponse::Ok().json(health(&data, status, loaded, None))
}

/// Readiness probe: 200 only once the model can serve predictions
pub async fn readiness_check(data: web::Data<AppState>) -> impl Responder {
    if !data.model.is_loaded().await {
        warn!("Readiness check failed: model status is {}", data.model.status().await);
        return HttpResponse::ServiceUnavailable()
            .json(ErrorResponse::new("Service unavailable", "Model not loaded"));
    }

    let details = json!({
        "model": data.settings.model_name,
        "device": data.settings.device,
        "loaded_at": data.model.loaded_at().await,
    });
    HttpResponse::Ok().json(health(&data, "healthy", true, Some(details)))
}

/// Liveness probe: 200 while the process runs, whatever the model state
pub async fn liveness_check(data: web::Data<AppState>) -> impl Responder {
    let loaded = data.model.is_loaded().await;
    HttpResponse::Ok().json(health(&data, "healthy", loaded, None))
}
