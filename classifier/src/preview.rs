use std::io::Cursor;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageOutputFormat};
use tract_onnx::prelude::*;

/// Bounding box of the preview sent back to the client.
pub const PREVIEW_SIZE: u32 = 300;

/// Shrinks the image to fit in a `max`x`max` box, keeping its aspect ratio.
/// Images already fitting are returned as is, never upscaled.
pub fn thumbnail(image: &DynamicImage, max: u32) -> DynamicImage {
    if image.width() <= max && image.height() <= max {
        image.clone()
    } else {
        image.thumbnail(max, max)
    }
}

/// PNG thumbnail of the image, as a `data:` URI a browser can display.
pub fn png_data_uri(image: &DynamicImage) -> TractResult<String> {
    let thumb = match thumbnail(image, PREVIEW_SIZE) {
        // no float support in the png encoder
        it @ (DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_)) => {
            DynamicImage::ImageRgba8(it.to_rgba8())
        }
        it => it,
    };
    let mut png = Cursor::new(vec![]);
    thumb.write_to(&mut png, ImageOutputFormat::Png).context("Failed to encode preview")?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png.into_inner())))
}
