use crate::errors::{AppError, Result};
use crate::models::face_verification::{Dimensions, FaceBox};
use crate::utils::validation::strip_data_url;
use base64::{engine::general_purpose, Engine as _};
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageOutputFormat};
use std::io::Cursor;

/// Side length of the square face crop handed to the similarity model.
pub const FACE_INPUT_SIZE: u32 = 224;

/// Decodes a base64 (or data URL) image and normalises it to RGB.
pub fn decode_base64_image(data: &str) -> Result<DynamicImage> {
    let bytes = general_purpose::STANDARD
        .decode(strip_data_url(data))
        .map_err(|e| AppError::ImageError(format!("Invalid base64 image: {}", e)))?;
    let image = image::load_from_memory(&bytes)?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

pub fn encode_png_base64(image: &DynamicImage) -> Result<String> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Png)
        .map_err(|e| AppError::ImageError(format!("Failed to encode image: {}", e)))?;
    Ok(general_purpose::STANDARD.encode(buffer))
}

pub fn dimensions(image: &DynamicImage) -> Dimensions {
    let (width, height) = image.dimensions();
    Dimensions { width, height }
}

/// Variance of the 4-neighbour Laplacian over the grayscale image.
/// Low values mean few edges, i.e. a blurry picture.
pub fn laplacian_variance(image: &DynamicImage) -> f64 {
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;
    let mut responses = Vec::with_capacity(((width - 2) * (height - 2)) as usize);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let laplacian = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            responses.push(laplacian);
        }
    }

    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Crops the box (clamped to the image) and scales it to the model input size.
pub fn crop_face(image: &DynamicImage, face: &FaceBox) -> DynamicImage {
    let (width, height) = image.dimensions();
    let x = face.x.min(width.saturating_sub(1));
    let y = face.y.min(height.saturating_sub(1));
    let w = face.width.min(width - x).max(1);
    let h = face.height.min(height - y).max(1);
    image
        .crop_imm(x, y, w, h)
        .resize_exact(FACE_INPUT_SIZE, FACE_INPUT_SIZE, FilterType::Triangle)
}

pub fn largest_face(faces: &[FaceBox]) -> Option<FaceBox> {
    faces.iter().copied().max_by_key(|f| f.area())
}
