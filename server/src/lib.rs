//! HTTP front of the pneumonia classifier.
//!
//! * `GET /health` answers `{"status": "healthy", "model_loaded": true}`
//! * `POST /predict` takes a multipart form (`images` or `file` fields) or a
//!   JSON body `{"image": "<base64>"}` and answers
//!   `{"success": true, "count": n, "results": [...]}`

#[macro_use]
extern crate log;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use pneumonia_classifier::Classifier;
use tower_http::cors::CorsLayer;

pub mod error;
pub mod routes;

/// Default cap on request bodies.
pub const DEFAULT_MAX_UPLOAD_MB: usize = 32;

pub fn app(classifier: Arc<Classifier>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/predict", post(routes::predict))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        // the browser client is opened straight from disk
        .layer(CorsLayer::permissive())
        .with_state(classifier)
}
