//! Face detection and similarity scoring live behind the `FaceModel` trait.
//! `RemoteFaceModel` talks to a model server over JSON; images travel as
//! base64 PNG.

use crate::errors::{AppError, Result};
use crate::models::face_verification::FaceBox;
use crate::utils::imaging::encode_png_base64;
use async_trait::async_trait;
use image::DynamicImage;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait FaceModel: Send + Sync {
    async fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceBox>>;

    /// Similarity of two aligned face crops, in `0.0..=1.0`.
    async fn compare(&self, face_a: &DynamicImage, face_b: &DynamicImage) -> Result<f64>;

    async fn health(&self) -> Result<()>;
}

#[derive(Serialize)]
struct DetectRequest {
    image: String,
}

#[derive(Deserialize)]
struct DetectResponse {
    faces: Vec<FaceBox>,
}

#[derive(Serialize)]
struct CompareRequest {
    image_a: String,
    image_b: String,
}

#[derive(Deserialize)]
struct CompareResponse {
    similarity: f64,
}

pub struct RemoteFaceModel {
    client: Client,
    base_url: String,
}

impl RemoteFaceModel {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::FaceModelError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(action = "face_model_call", url = %url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::FaceModelError(format!("Model request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::FaceModelError(format!("Model returned {} - {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::FaceModelError(format!("Malformed model response: {}", e)))
    }
}

#[async_trait]
impl FaceModel for RemoteFaceModel {
    async fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let request = DetectRequest {
            image: encode_png_base64(image)?,
        };
        let response: DetectResponse = self.post("/detect", &request).await?;
        Ok(response.faces)
    }

    async fn compare(&self, face_a: &DynamicImage, face_b: &DynamicImage) -> Result<f64> {
        let request = CompareRequest {
            image_a: encode_png_base64(face_a)?,
            image_b: encode_png_base64(face_b)?,
        };
        let response: CompareResponse = self.post("/compare", &request).await?;
        if !response.similarity.is_finite() {
            return Err(AppError::FaceModelError("Model returned a non-finite score".to_string()));
        }
        Ok(response.similarity.clamp(0.0, 1.0))
    }

    async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| AppError::FaceModelError(format!("Model unreachable: {}", e)))?;
        if !response.status().is_success() {
            return Err(AppError::FaceModelError(format!("Model health returned {}", response.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    fn tiny() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])))
    }

    #[tokio::test]
    async fn detect_parses_boxes() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "faces": [{"x": 1, "y": 2, "width": 30, "height": 40}]
            })))
            .mount(&server)
            .await;

        let model = RemoteFaceModel::new(server.uri()).unwrap();
        let faces = model.detect_faces(&tiny()).await.unwrap();
        assert_eq!(faces, vec![FaceBox { x: 1, y: 2, width: 30, height: 40 }]);
    }

    #[tokio::test]
    async fn compare_returns_similarity() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/compare"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"similarity": 0.83})))
            .mount(&server)
            .await;

        let model = RemoteFaceModel::new(format!("{}/", server.uri())).unwrap();
        let score = model.compare(&tiny(), &tiny()).await.unwrap();
        assert!((score - 0.83).abs() < 1e-9);
    }

    #[tokio::test]
    async fn server_error_is_a_model_error() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let model = RemoteFaceModel::new(server.uri()).unwrap();
        assert!(matches!(model.detect_faces(&tiny()).await, Err(AppError::FaceModelError(_))));
        assert!(matches!(model.health().await, Err(AppError::FaceModelError(_))));
    }
}
