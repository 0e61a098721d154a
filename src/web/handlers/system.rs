use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde_json::json;

use crate::web::models::ErrorResponse;
use crate::web::server::AppState;

/// Service information
pub async fn root() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "service": "Sentiment Predictor Service",
        "version": env!("CARGO_PKG_VERSION"),
        "metrics": "/metrics",
        "health": "/health"
    }))
}

/// Prometheus scrape endpoint
pub async fn metrics(data: web::Data<AppState>) -> impl Responder {
    data.metrics.set_model_loaded(data.model.is_loaded().await);

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(data.metrics.render())
}

/// JSON 404 for unknown routes
pub async fn not_found(req: HttpRequest) -> impl Responder {
    HttpResponse::NotFound().json(ErrorResponse::new(
        "Not found",
        format!("No route for {} {}", req.method(), req.path()),
    ))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, App};

    use crate::web::handlers::test_support::{loaded_state, mount, unloaded_state};

    #[actix_web::test]
    async fn test_root_endpoint() {
        let app = test::init_service(App::new().configure(mount(unloaded_state()))).await;
        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(body["service"], "Sentiment Predictor Service");
        assert_eq!(body["health"], "/health");
    }

    #[actix_web::test]
    async fn test_metrics_reflect_model_state() {
        let app = test::init_service(App::new().configure(mount(unloaded_state()))).await;
        let body = test::call_and_read_body(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert!(String::from_utf8_lossy(&body).contains("sentiment_model_loaded 0"));

        let app = test::init_service(App::new().configure(mount(loaded_state(vec![]).await))).await;
        let body = test::call_and_read_body(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert!(String::from_utf8_lossy(&body).contains("sentiment_model_loaded 1"));
    }

    #[actix_web::test]
    async fn test_unknown_route_is_json_404() {
        let app = test::init_service(App::new().configure(mount(unloaded_state()))).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/nope").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Not found");
    }
}
