use std::io::Cursor;
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use pneumonia_classifier::preprocess::INPUT_SIZE;
use pneumonia_classifier::tract_onnx::prelude::*;
use pneumonia_classifier::{Classifier, Network};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};

/// Scores each class with the mean of the matching color channel: red
/// images come out "Normal/Other", green ones "Viral Pneumonia".
struct ChannelMeans;

impl Network for ChannelMeans {
    fn logits(&self, input: Tensor) -> TractResult<Vec<f32>> {
        let view = input.to_array_view::<f32>()?;
        let axis = tract_ndarray::Axis(1);
        Ok((0..2).map(|c| view.index_axis(axis, c).mean().unwrap_or(0.0)).collect())
    }
}

async fn spawn_server() -> String {
    spawn_server_with_limit(8 << 20).await
}

async fn spawn_server_with_limit(max_upload_bytes: usize) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = pneumonia_server::app(Arc::new(Classifier::new(ChannelMeans)), max_upload_bytes);
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

fn png(color: [u8; 3]) -> Vec<u8> {
    let side = INPUT_SIZE as u32;
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(side, side, Rgb(color)));
    let mut buf = Cursor::new(vec![]);
    image.write_to(&mut buf, ImageOutputFormat::Png).unwrap();
    buf.into_inner()
}

fn image_part(bytes: Vec<u8>, name: &str) -> Part {
    Part::bytes(bytes).file_name(name.to_string())
}

async fn post_form(base: &str, form: Form) -> (StatusCode, Value) {
    let client = reqwest::Client::new();
    let response = client.post(format!("{base}/predict")).multipart(form).send().await.unwrap();
    (response.status(), response.json().await.unwrap())
}

async fn post_json(base: &str, body: Value) -> (StatusCode, Value) {
    let client = reqwest::Client::new();
    let response = client.post(format!("{base}/predict")).json(&body).send().await.unwrap();
    (response.status(), response.json().await.unwrap())
}

fn assert_consistent(result: &Value) {
    let normal = result["probabilities"]["Normal/Other"].as_f64().unwrap();
    let viral = result["probabilities"]["Viral Pneumonia"].as_f64().unwrap();
    let confidence = result["confidence"].as_f64().unwrap();
    assert!((0.0..=100.0).contains(&normal));
    assert!((0.0..=100.0).contains(&viral));
    assert_abs_diff_eq!(normal + viral, 100.0, epsilon = 0.011);
    assert_eq!(confidence, normal.max(viral));
}

#[tokio::test]
async fn health() {
    let base = spawn_server().await;
    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "status": "healthy", "model_loaded": true }));
}

#[tokio::test]
async fn single_upload() {
    let base = spawn_server().await;
    let form = Form::new().part("images", image_part(png([255, 0, 0]), "red.png"));
    let (status, body) = post_form(&base, form).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 1);
    let result = &body["results"][0];
    assert_eq!(result["filename"], "red.png");
    assert_eq!(result["prediction"], "Normal/Other");
    assert_eq!(result["confidence"], 88.08);
    assert!(result["image_preview"].as_str().unwrap().starts_with("data:image/png;base64,"));
    assert_consistent(result);
}

#[tokio::test]
async fn several_uploads_keep_their_order() {
    let base = spawn_server().await;
    let form = Form::new()
        .part("images", image_part(png([255, 0, 0]), "red.png"))
        .part("images", image_part(png([0, 255, 0]), "green.png"))
        .text("comment", "ignored");
    let (status, body) = post_form(&base, form).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["results"][0]["filename"], "red.png");
    assert_eq!(body["results"][0]["prediction"], "Normal/Other");
    assert_eq!(body["results"][1]["filename"], "green.png");
    assert_eq!(body["results"][1]["prediction"], "Viral Pneumonia");
    for result in body["results"].as_array().unwrap() {
        assert_consistent(result);
    }
}

#[tokio::test]
async fn file_field_is_accepted() {
    let base = spawn_server().await;
    let form = Form::new().part("file", image_part(png([0, 255, 0]), "scan.png"));
    let (status, body) = post_form(&base, form).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["prediction"], "Viral Pneumonia");
}

#[tokio::test]
async fn no_images_is_a_bad_request() {
    let base = spawn_server().await;
    let form = Form::new().text("comment", "forgot the x-ray");
    let (status, body) = post_form(&base, form).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn empty_upload_is_a_bad_request() {
    let base = spawn_server().await;
    let form = Form::new().part("images", Part::bytes(vec![]).file_name(""));
    let (status, body) = post_form(&base, form).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn empty_named_upload_is_a_bad_request() {
    let base = spawn_server().await;
    let form = Form::new().part("images", Part::bytes(vec![]).file_name("x.png"));
    let (status, body) = post_form(&base, form).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Empty image x.png");
}

#[tokio::test]
async fn empty_base64_payload_is_a_bad_request() {
    let base = spawn_server().await;
    let (status, body) = post_json(&base, json!({ "image": "data:image/png;base64," })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Empty image payload");
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let base = spawn_server_with_limit(1024).await;
    let form = Form::new().part("images", image_part(vec![0x42; 4096], "big.png"));
    let (status, body) = post_form(&base, form).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn oversized_json_is_rejected() {
    let base = spawn_server_with_limit(1024).await;
    let (status, body) = post_json(&base, json!({ "image": "A".repeat(4096) })).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn corrupt_image_is_an_internal_error() {
    let base = spawn_server().await;
    let form =
        Form::new().part("images", image_part(b"GIF89a but not really".to_vec(), "broken.gif"));
    let (status, body) = post_form(&base, form).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("decode"));
}

#[tokio::test]
async fn base64_json() {
    let base = spawn_server().await;
    let body = json!({ "image": STANDARD.encode(png([0, 255, 0])) });
    let (status, body) = post_json(&base, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    let result = &body["results"][0];
    assert!(result.get("filename").is_none());
    assert_eq!(result["prediction"], "Viral Pneumonia");
    assert_consistent(result);
}

#[tokio::test]
async fn base64_data_uri() {
    let base = spawn_server().await;
    let uri = format!("data:image/png;base64,{}", STANDARD.encode(png([255, 0, 0])));
    let (status, body) = post_json(&base, json!({ "image": uri })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["prediction"], "Normal/Other");
}

#[tokio::test]
async fn line_wrapped_base64() {
    let base = spawn_server().await;
    let encoded = STANDARD.encode(png([0, 255, 0]));
    let wrapped = encoded
        .as_bytes()
        .chunks(76)
        .map(|line| std::str::from_utf8(line).unwrap())
        .collect::<Vec<_>>()
        .join("\n");
    let (status, body) = post_json(&base, json!({ "image": wrapped + "\n" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["prediction"], "Viral Pneumonia");
}

#[tokio::test]
async fn content_type_is_case_insensitive() {
    let base = spawn_server().await;
    let body = json!({ "image": STANDARD.encode(png([255, 0, 0])) });
    let response = reqwest::Client::new()
        .post(format!("{base}/predict"))
        .header("content-type", "Application/JSON; charset=utf-8")
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["results"][0]["prediction"], "Normal/Other");
}

#[tokio::test]
async fn json_without_image_is_a_bad_request() {
    let base = spawn_server().await;
    let (status, body) = post_json(&base, json!({ "picture": "nope" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn invalid_base64_is_an_internal_error() {
    let base = spawn_server().await;
    let (status, body) = post_json(&base, json!({ "image": "not base64 at all!" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn unsupported_body_is_a_bad_request() {
    let base = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{base}/predict"))
        .header("content-type", "text/plain")
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "No images provided");
}

#[tokio::test]
async fn deterministic() {
    let base = spawn_server().await;
    let mut seen = vec![];
    for _ in 0..2 {
        let (status, body) =
            post_json(&base, json!({ "image": STANDARD.encode(png([200, 120, 40])) })).await;
        assert_eq!(status, StatusCode::OK);
        let result = &body["results"][0];
        seen.push((result["prediction"].clone(), result["confidence"].clone()));
    }
    assert_eq!(seen[0], seen[1]);
}
