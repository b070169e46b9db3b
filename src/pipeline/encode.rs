//! Image encoding: `DynamicImage` → base64 PNG for multimodal requests.
//!
//! Frame grids are sent inline as base64 data. PNG keeps on-screen text
//! (slides, code, terminal output) crisp, which matters more than payload size.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// A base64-encoded image and its MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub data_base64: String,
    pub mime_type: String,
}

/// Encode a composited frame grid as a base64 PNG.
pub fn encode_image(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(EncodedImage {
        data_base64: b64,
        mime_type: "image/png".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_image(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data_base64).expect("valid base64");
        // PNG signature
        assert_eq!(&decoded[..4], &[0x89, b'P', b'N', b'G']);
    }
}
