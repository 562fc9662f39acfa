use anyhow::{Context, ensure};
use image::DynamicImage;
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

/// Side of the square image the network consumes.
pub const INPUT_SIZE: usize = 224;

/// Per-channel normalization applied after scaling pixels to [0, 1].
pub const MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Decodes an uploaded image, guessing the format from its content.
pub fn decode(bytes: &[u8]) -> TractResult<DynamicImage> {
    ensure!(!bytes.is_empty(), "Empty image payload");
    image::load_from_memory(bytes).context("Failed to decode image")
}

/// Builds the 1x3x224x224 network input: RGB conversion, exact resize (the
/// aspect ratio is not preserved), then normalization.
pub fn image_to_tensor(image: &DynamicImage) -> Tensor {
    let rgb = image.to_rgb8();
    let side = INPUT_SIZE as u32;
    let resized = imageops::resize(&rgb, side, side, FilterType::Triangle);
    tract_ndarray::Array4::from_shape_fn((1, 3, INPUT_SIZE, INPUT_SIZE), |(_, c, y, x)| {
        (resized[(x as _, y as _)][c] as f32 / 255.0 - MEAN[c]) / STD[c]
    })
    .into()
}
