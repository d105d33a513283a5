//! Encoded image payload decoding.
//!
//! Accepts raw base64 or a data URI (`data:image/jpeg;base64,...`), tolerates
//! missing `=` padding and line wrapping, and always yields an 8-bit RGB image.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unreadable image data: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has zero size")]
    EmptyImage,
}

/// Decode an encoded image payload into RGB pixels.
pub fn decode_image(payload: &str) -> Result<RgbImage, DecodeError> {
    let bytes = STANDARD.decode(pad_base64(strip_data_uri(payload)))?;

    let image = image::load_from_memory(&bytes)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError::EmptyImage);
    }

    Ok(image.to_rgb8())
}

/// Drop a data-URI scheme prefix, splitting on the first comma.
fn strip_data_uri(payload: &str) -> &str {
    payload.split_once(',').map_or(payload, |(_, data)| data)
}

/// Drop ASCII whitespace (MIME line wrapping) and append `=` until the
/// length is a multiple of 4.
fn pad_base64(encoded: &str) -> String {
    let mut padded = String::with_capacity(encoded.len() + 3);
    padded.extend(encoded.chars().filter(|c| !c.is_ascii_whitespace()));
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    padded
}

/// PNG + base64 encoding for building request payloads in tests.
#[cfg(test)]
pub(crate) fn png_base64(image: image::DynamicImage) -> String {
    let mut buf = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    STANDARD.encode(buf)
}

#[cfg(test)]
pub(crate) fn solid_payload(width: u32, height: u32, rgb: [u8; 3]) -> String {
    png_base64(image::DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb(rgb))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma, Rgb};

    #[test]
    fn test_decode_plain_base64() {
        let src = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        let decoded = decode_image(&png_base64(DynamicImage::ImageRgb8(src))).unwrap();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(2, 1), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_data_uri() {
        let src = RgbImage::from_pixel(2, 2, Rgb([200, 100, 50]));
        let payload = format!("data:image/png;base64,{}", png_base64(DynamicImage::ImageRgb8(src)));
        let decoded = decode_image(&payload).unwrap();
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([200, 100, 50]));
    }

    #[test]
    fn test_decode_missing_padding() {
        let src = RgbImage::from_pixel(5, 5, Rgb([1, 2, 3]));
        let encoded = png_base64(DynamicImage::ImageRgb8(src));
        let unpadded = encoded.trim_end_matches('=');
        let decoded = decode_image(unpadded).unwrap();
        assert_eq!(decoded.dimensions(), (5, 5));
    }

    #[test]
    fn test_decode_line_wrapped_base64() {
        let src = RgbImage::from_pixel(6, 6, Rgb([9, 8, 7]));
        let encoded = png_base64(DynamicImage::ImageRgb8(src));
        let wrapped = encoded
            .as_bytes()
            .chunks(16)
            .map(|line| std::str::from_utf8(line).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");
        assert!(wrapped.contains('\n'));

        let decoded = decode_image(&format!("data:image/png;base64,{wrapped}\n")).unwrap();
        assert_eq!(decoded.get_pixel(3, 3), &Rgb([9, 8, 7]));
    }

    #[test]
    fn test_decode_grayscale_converted_to_rgb() {
        let src = GrayImage::from_pixel(3, 3, Luma([77]));
        let decoded = decode_image(&png_base64(DynamicImage::ImageLuma8(src))).unwrap();
        assert_eq!(decoded.get_pixel(1, 1), &Rgb([77, 77, 77]));
    }

    #[test]
    fn test_decode_invalid_base64() {
        let err = decode_image("!!!not base64!!!").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)), "got {err:?}");
    }

    #[test]
    fn test_decode_not_an_image() {
        // "hello world" is valid base64 but not an image
        let err = decode_image("aGVsbG8gd29ybGQ").unwrap_err();
        assert!(matches!(err, DecodeError::Image(_)), "got {err:?}");
    }

    #[test]
    fn test_pad_base64() {
        assert_eq!(pad_base64("abcd"), "abcd");
        assert_eq!(pad_base64("abcde"), "abcde===");
        assert_eq!(pad_base64("abcdef"), "abcdef==");
        assert_eq!(pad_base64(""), "");
        assert_eq!(pad_base64(" ab\ncd\n"), "abcd");
    }

    #[test]
    fn test_strip_data_uri() {
        assert_eq!(strip_data_uri("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri("QUJD"), "QUJD");
    }
}
