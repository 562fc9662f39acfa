use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::Json;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pneumonia_classifier::{Classifier, Prediction, preprocess, preview};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Body encodings `/predict` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Multipart,
    Json,
}

pub type SharedClassifier = Arc<Classifier>;

/// Multipart fields carrying images.
const IMAGE_FIELDS: &[&str] = &["images", "file"];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Health {
    pub status: String,
    pub model_loaded: bool,
}

/// The model is loaded before the listener is bound, so answering at all
/// means it is ready.
pub async fn health() -> Json<Health> {
    Json(Health { status: "healthy".into(), model_loaded: true })
}

#[derive(Serialize, Debug, Clone)]
pub struct ImageResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(flatten)]
    pub prediction: Prediction,
    pub image_preview: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct PredictResponse {
    pub success: bool,
    pub count: usize,
    pub results: Vec<ImageResult>,
}

#[derive(Deserialize, Debug)]
struct ImagePayload {
    image: Option<String>,
}

/// An image as received, not decoded yet.
#[derive(Debug)]
struct Upload {
    filename: Option<String>,
    bytes: Vec<u8>,
}

/// Classifies the images of a multipart form (`images` and `file` fields) or
/// the base64 `image` of a JSON body. One failing image fails the request.
pub async fn predict(
    State(classifier): State<SharedClassifier>,
    request: Request,
) -> Result<Json<PredictResponse>> {
    let uploads = read_uploads(request, &classifier).await?;
    let start = Instant::now();
    let results = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<ImageResult>> {
        uploads.into_iter().map(|upload| analyse(&classifier, upload)).collect()
    })
    .await??;
    info!("Classified {} image(s) in {:?}", results.len(), start.elapsed());
    Ok(Json(PredictResponse { success: true, count: results.len(), results }))
}

fn analyse(classifier: &Classifier, upload: Upload) -> anyhow::Result<ImageResult> {
    let image = preprocess::decode(&upload.bytes)?;
    let prediction = classifier.classify(&image)?;
    debug!("{:?}: {} {}%", upload.filename, prediction.prediction, prediction.confidence);
    let image_preview = preview::png_data_uri(&image)?;
    Ok(ImageResult { filename: upload.filename, prediction, image_preview })
}

async fn read_uploads(request: Request, state: &SharedClassifier) -> Result<Vec<Upload>> {
    let kind = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(body_kind);
    let uploads = match kind {
        Some(BodyKind::Multipart) => {
            let multipart = Multipart::from_request(request, state)
                .await
                .map_err(|e| rejected(e.status(), e.body_text()))?;
            from_multipart(multipart).await?
        }
        Some(BodyKind::Json) => {
            let Json(payload) = Json::<ImagePayload>::from_request(request, state)
                .await
                .map_err(|e| rejected(e.status(), e.body_text()))?;
            from_json(payload)?
        }
        None => vec![],
    };
    if uploads.is_empty() {
        return Err(AppError::bad_request("No images provided"));
    }
    if let Some(empty) = uploads.iter().find(|upload| upload.bytes.is_empty()) {
        return Err(AppError::bad_request(format!(
            "Empty image {}",
            empty.filename.as_deref().unwrap_or("payload")
        )));
    }
    Ok(uploads)
}

async fn from_multipart(mut multipart: Multipart) -> Result<Vec<Upload>> {
    let mut uploads = vec![];
    while let Some(field) =
        multipart.next_field().await.map_err(|e| rejected(e.status(), e.body_text()))?
    {
        if !field.name().is_some_and(|name| IMAGE_FIELDS.contains(&name)) {
            continue;
        }
        let filename = field.file_name().map(ToOwned::to_owned);
        // browsers send an unnamed empty part when no file was picked
        if filename.as_deref() == Some("") {
            continue;
        }
        let bytes = field.bytes().await.map_err(|e| rejected(e.status(), e.body_text()))?;
        uploads.push(Upload { filename, bytes: bytes.to_vec() });
    }
    Ok(uploads)
}

fn from_json(payload: ImagePayload) -> Result<Vec<Upload>> {
    let Some(encoded) = payload.image.filter(|image| !image.trim().is_empty()) else {
        return Ok(vec![]);
    };
    // wrapped base64 (76 columns, as `base64` prints it) is fine
    let compact: String = encoded.split_ascii_whitespace().collect();
    let bytes = STANDARD.decode(strip_data_uri(&compact)).context("Invalid base64 image")?;
    Ok(vec![Upload { filename: None, bytes }])
}

/// Client error for a body axum could not read: over the size limit stays
/// 413, anything else is a 400.
fn rejected(status: StatusCode, message: String) -> AppError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(status, format!("Request body exceeds the upload limit: {message}"))
    } else {
        AppError::bad_request(message)
    }
}

/// Matches the MIME essence of a `Content-Type`, ignoring case and
/// parameters. `application/*+json` counts as JSON.
fn body_kind(content_type: &str) -> Option<BodyKind> {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    let (kind, subtype) = essence.split_once('/')?;
    match (kind, subtype) {
        ("multipart", "form-data") => Some(BodyKind::Multipart),
        ("application", "json") => Some(BodyKind::Json),
        ("application", subtype) if subtype.ends_with("+json") => Some(BodyKind::Json),
        _ => None,
    }
}

/// Accepts `data:image/png;base64,...` as well as bare base64.
fn strip_data_uri(encoded: &str) -> &str {
    match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    }
}
