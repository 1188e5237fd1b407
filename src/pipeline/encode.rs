//! Page encoding: `DynamicImage` → PNG [`SourceDocument`].
//!
//! PNG rather than JPEG: compression artefacts around glyphs and thin math
//! strokes hurt transcription far more than the larger payload does.

use crate::pipeline::input::{SourceDocument, MIME_PNG};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a PNG attachment.
pub fn encode_page(img: &DynamicImage) -> Result<SourceDocument, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded page → {} bytes PNG", buf.len());
    Ok(SourceDocument::new(buf, MIME_PNG))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let page = encode_page(&img).expect("encode should succeed");
        assert_eq!(page.mime_type(), MIME_PNG);
        assert!(page.bytes().starts_with(&[0x89, b'P', b'N', b'G']));
        assert!(!page.to_image_data().data.is_empty());
    }
}
