use std::sync::Arc;

use actix_cors::Cors;
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{error::InternalError, middleware, web, App, HttpResponse, HttpServer};
use log::info;

use crate::core::config::Settings;
use crate::core::metrics::{Outcome, ServiceMetrics};
use crate::core::model::SentimentModel;
use crate::web::handlers;
use crate::web::models::ErrorResponse;

/// Shared application state for web handlers
pub struct AppState {
    pub settings: Arc<Settings>,
    pub model: Arc<SentimentModel>,
    pub metrics: ServiceMetrics,
}

/// Build the HTTP server for the prediction API
///
/// The returned server is not started; await it (or its handle) to serve.
pub fn build_server(state: web::Data<AppState>) -> std::io::Result<actix_web::dev::Server> {
    let (host, port) = state.settings.bind_address();
    info!("Starting web server on http://{}:{}", host, port);

    let server = HttpServer::new(move || app(state.clone()))
        .disable_signals()
        .bind((host, port))?
        .run();

    Ok(server)
}

/// The service application: routes plus access log and CORS middleware
pub fn app(
    state: web::Data<AppState>,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let prefix = state.settings.api_v1_prefix.clone();
    App::new()
        .wrap(middleware::Logger::default())
        .wrap(Cors::permissive())
        .app_data(state)
        .configure(|cfg| configure(cfg, &prefix))
}

/// Register every route of the service
pub fn configure(cfg: &mut web::ServiceConfig, api_prefix: &str) {
    cfg
        // Health APIs
        .route("/health", web::get().to(handlers::health::health_check))
        .route("/health/ready", web::get().to(handlers::health::readiness_check))
        .route("/health/live", web::get().to(handlers::health::liveness_check))
        // Prediction APIs
        .service(
            web::scope(api_prefix)
                .service(
                    web::resource("/predict")
                        .app_data(json_config("predict"))
                        .route(web::post().to(handlers::prediction::predict_sentiment)),
                )
                .service(
                    web::resource("/predict/batch")
                        .app_data(json_config("predict_batch"))
                        .route(web::post().to(handlers::prediction::predict_sentiment_batch)),
                ),
        )
        // Service APIs
        .route("/", web::get().to(handlers::system::root))
        .route("/metrics", web::get().to(handlers::system::metrics))
        .default_service(web::to(handlers::system::not_found));
}

/// Malformed or incomplete JSON bodies are reported as 422 and counted as rejected
fn json_config(endpoint: &'static str) -> web::JsonConfig {
    web::JsonConfig::default().error_handler(move |err, req| {
        if let Some(state) = req.app_data::<web::Data<AppState>>() {
            state.metrics.record_request(endpoint, Outcome::Rejected);
        }
        let body = ErrorResponse::new("Validation error", err.to_string());
        InternalError::from_response(err, HttpResponse::UnprocessableEntity().json(body)).into()
    })
}

#[cfg(test)]
mod tests {
    use actix_web::{http::header, http::StatusCode, test};
    use serde_json::json;

    use super::*;
    use crate::web::handlers::test_support::unloaded_state;

    #[actix_web::test]
    async fn test_cors_preflight_allows_any_origin() {
        let app = test::init_service(app(unloaded_state())).await;

        let req = test::TestRequest::default()
            .method(actix_web::http::Method::OPTIONS)
            .uri("/api/v1/predict")
            .insert_header((header::ORIGIN, "https://dashboard.example.com"))
            .insert_header((header::ACCESS_CONTROL_REQUEST_METHOD, "POST"))
            .insert_header((header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let allowed = resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap();
        assert!(allowed == "https://dashboard.example.com" || allowed == "*");
    }

    #[actix_web::test]
    async fn test_cors_headers_on_simple_request() {
        let app = test::init_service(app(unloaded_state())).await;

        let req = test::TestRequest::get()
            .uri("/health/live")
            .insert_header((header::ORIGIN, "https://dashboard.example.com"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[actix_web::test]
    async fn test_malformed_json_counts_as_rejected() {
        let state = unloaded_state();
        let app = test::init_service(app(state.clone())).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/predict")
            .insert_header(header::ContentType::json())
            .set_payload("{\"text\": ")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let req = test::TestRequest::post()
            .uri("/api/v1/predict/batch")
            .set_json(json!({"texts": "not a list"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let text = state.metrics.render();
        assert!(text.contains("sentiment_requests_total{endpoint=\"predict\",outcome=\"rejected\"} 1"));
        assert!(text.contains("sentiment_requests_total{endpoint=\"predict_batch\",outcome=\"rejected\"} 1"));
    }
}
