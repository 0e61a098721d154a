use std::sync::Arc;

use actix_web::web;

use crate::core::backend::{MockSentimentBackend, Sentiment};
use crate::core::config::Settings;
use crate::core::metrics::ServiceMetrics;
use crate::core::model::SentimentModel;
use crate::web::server::{configure, AppState};

pub fn state_with(settings: Settings) -> web::Data<AppState> {
    let settings = Arc::new(settings);
    web::Data::new(AppState {
        model: Arc::new(SentimentModel::new(settings.clone())),
        metrics: ServiceMetrics::new().unwrap(),
        settings,
    })
}

pub fn unloaded_state() -> web::Data<AppState> {
    state_with(Settings::default())
}

/// State whose model answers every call with `rows`
pub async fn loaded_state(rows: Vec<Vec<f32>>) -> web::Data<AppState> {
    loaded_state_with(Settings::default(), rows).await
}

pub async fn loaded_state_with(settings: Settings, rows: Vec<Vec<f32>>) -> web::Data<AppState> {
    let state = state_with(settings);
    let mut backend = MockSentimentBackend::new();
    backend.expect_labels().returning(|| Sentiment::DEFAULT_ORDER.to_vec());
    backend.expect_infer().returning(move |_| Ok(rows.clone()));
    state.model.load_with(move || Ok(backend)).await.unwrap();
    state
}

/// Mount the service routes with `state` onto a test app
pub fn mount(state: web::Data<AppState>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        let prefix = state.settings.api_v1_prefix.clone();
        cfg.app_data(state);
        configure(cfg, &prefix);
    }
}
