use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::{ImageFormat, ImageReader, RgbaImage};
use jpeg_decoder::{Decoder as JpegDecoder, Error as JpegError, PixelFormat};
use tracing::debug;

use crate::error::CompositeFailure;

/// Decodes a picture to RGBA8.
///
/// With a `min_side` hint, JPEGs are decoded through the scaled IDCT path so
/// that both sides stay at or above the hint; other formats and any fast-path
/// failure fall back to the generic decoder.
pub fn decode_picture(path: &Path, min_side: Option<u32>) -> Result<RgbaImage, CompositeFailure> {
    let reader = ImageReader::open(path)
        .map_err(|err| CompositeFailure::decode(format!("{}: {err}", path.display())))?
        .with_guessed_format()
        .map_err(|err| CompositeFailure::decode(format!("{}: {err}", path.display())))?;

    if let (Some(ImageFormat::Jpeg), Some(side)) = (reader.format(), min_side) {
        match decode_jpeg_scaled(path, side) {
            Ok(img) => return Ok(img),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "scaled jpeg decode failed; falling back");
            }
        }
    }

    let img = reader
        .decode()
        .map_err(|err| CompositeFailure::decode(format!("{}: {err}", path.display())))?;
    Ok(img.to_rgba8())
}

/// Reads the EXIF orientation tag, if any.
pub fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    exif_orientation(&exif)
}

/// Orientation code from already parsed EXIF data.
pub fn exif_orientation(exif: &exif::Exif) -> Option<u16> {
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    field.value.get_uint(0).map(|v| v as u16)
}

fn decode_jpeg_scaled(path: &Path, min_side: u32) -> Result<RgbaImage, String> {
    let file = File::open(path).map_err(|err| err.to_string())?;
    let mut decoder = JpegDecoder::new(BufReader::new(file));
    let request = min_side.clamp(1, u16::MAX as u32) as u16;
    decoder
        .scale(request, request)
        .map_err(describe_jpeg_error)?;
    let pixels = decoder.decode().map_err(describe_jpeg_error)?;
    let info = decoder
        .info()
        .ok_or_else(|| "missing image info after decode".to_string())?;
    let width = info.width as u32;
    let height = info.height as u32;

    let rgba = match info.pixel_format {
        PixelFormat::RGB24 => {
            let mut rgba = Vec::with_capacity(pixels.len() / 3 * 4);
            for chunk in pixels.chunks_exact(3) {
                rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
            rgba
        }
        PixelFormat::L8 => {
            let mut rgba = Vec::with_capacity(pixels.len() * 4);
            for &v in &pixels {
                rgba.extend_from_slice(&[v, v, v, 255]);
            }
            rgba
        }
        PixelFormat::CMYK32 => {
            let mut rgba = Vec::with_capacity(pixels.len());
            for chunk in pixels.chunks_exact(4) {
                let k = chunk[3] as f32 / 255.0;
                let channel = |v: u8| {
                    let c = (v as f32 / 255.0) * (1.0 - k) + k;
                    ((1.0 - c) * 255.0).round().clamp(0.0, 255.0) as u8
                };
                rgba.extend_from_slice(&[channel(chunk[0]), channel(chunk[1]), channel(chunk[2]), 255]);
            }
            rgba
        }
        PixelFormat::L16 => {
            return Err("16-bit grayscale JPEGs are not supported by the scaled decoder".into());
        }
    };

    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| format!("pixel buffer does not match {width}x{height}"))
}

fn describe_jpeg_error(err: JpegError) -> String {
    match err {
        JpegError::Unsupported(feature) => format!("unsupported JPEG feature: {feature:?}"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_a_decode_failure() {
        let err = decode_picture(Path::new("/definitely/not/here.jpg"), None).unwrap_err();
        assert_eq!(err.kind, crate::error::FailureKind::Decode);
    }

    #[test]
    fn garbage_bytes_are_a_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image at all").unwrap();
        let err = decode_picture(&path, Some(64)).unwrap_err();
        assert_eq!(err.kind, crate::error::FailureKind::Decode);
    }

    #[test]
    fn png_round_trips_through_generic_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        RgbaImage::from_pixel(5, 3, image::Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();
        let img = decode_picture(&path, Some(64)).unwrap();
        assert_eq!(img.dimensions(), (5, 3));
    }

    #[test]
    fn jpeg_decodes_at_reduced_scale_above_hint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.jpg");
        image::RgbImage::from_pixel(640, 480, image::Rgb([200, 40, 40]))
            .save(&path)
            .unwrap();

        let img = decode_jpeg_scaled(&path, 100).unwrap();
        let (w, h) = img.dimensions();
        assert!(w >= 100 && h >= 100, "{w}x{h} fell below the hint");
        assert!(w < 640 && h < 480);
        assert_eq!((w, h), (160, 120));
        assert!(img.pixels().all(|p| p.0[3] == 255));

        let via_reader = decode_picture(&path, Some(100)).unwrap();
        assert_eq!(via_reader.dimensions(), (160, 120));
        let full = decode_picture(&path, None).unwrap();
        assert_eq!(full.dimensions(), (640, 480));
    }

    #[test]
    fn grayscale_jpeg_expands_to_opaque_gray() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.jpg");
        image::GrayImage::from_pixel(320, 240, image::Luma([90]))
            .save(&path)
            .unwrap();

        let img = decode_jpeg_scaled(&path, 60).unwrap();
        assert!(img.width() >= 60 && img.height() >= 60);
        for p in img.pixels() {
            let [r, g, b, a] = p.0;
            assert_eq!((r, r), (g, b));
            assert_eq!(a, 255);
        }
    }
}
