use fast_image_resize as fir;
use image::RgbaImage;

use crate::error::CompositeFailure;

/// `1 - min(a, b) / max(a, b)` over the two aspect ratios; 0 means identical shapes.
pub fn aspect_diff(screen_w: u32, screen_h: u32, image_w: u32, image_h: u32) -> f32 {
    let screen = screen_w.max(1) as f32 / screen_h.max(1) as f32;
    let image = image_w.max(1) as f32 / image_h.max(1) as f32;
    1.0 - screen.min(image) / screen.max(image)
}

/// Smallest size with the source aspect that covers the canvas.
pub fn resize_to_cover(canvas_w: u32, canvas_h: u32, src_w: u32, src_h: u32) -> (u32, u32) {
    let iw = src_w.max(1) as f32;
    let ih = src_h.max(1) as f32;
    let scale = (canvas_w.max(1) as f32 / iw).max(canvas_h.max(1) as f32 / ih);
    let w = (iw * scale).round().max(1.0);
    let h = (ih * scale).round().max(1.0);
    (w as u32, h as u32)
}

/// Largest size with the source aspect that fits inside the canvas.
pub fn resize_to_contain(canvas_w: u32, canvas_h: u32, src_w: u32, src_h: u32) -> (u32, u32) {
    let iw = src_w.max(1) as f32;
    let ih = src_h.max(1) as f32;
    let scale = (canvas_w.max(1) as f32 / iw).min(canvas_h.max(1) as f32 / ih);
    let scale = if scale.is_finite() { scale } else { 1.0 };
    let w = (iw * scale).round().clamp(1.0, canvas_w.max(1) as f32);
    let h = (ih * scale).round().clamp(1.0, canvas_h.max(1) as f32);
    (w as u32, h as u32)
}

pub fn center_offset(inner_w: u32, inner_h: u32, outer_w: u32, outer_h: u32) -> (u32, u32) {
    let ox = outer_w.saturating_sub(inner_w) / 2;
    let oy = outer_h.saturating_sub(inner_h) / 2;
    (ox, oy)
}

/// Shrinks `(w, h)` proportionally so neither side exceeds `max_dim`.
pub fn limit_dimensions(w: u32, h: u32, max_dim: u32) -> (u32, u32) {
    let longest = w.max(h);
    if max_dim == 0 || longest <= max_dim {
        return (w, h);
    }
    let scale = max_dim as f64 / longest as f64;
    let new_w = ((w as f64 * scale).round() as u32).clamp(1, max_dim);
    let new_h = ((h as f64 * scale).round() as u32).clamp(1, max_dim);
    (new_w, new_h)
}

/// Downscales proportionally so neither side exceeds `max_dim`.
pub fn clamp_to_max_dimension(image: RgbaImage, max_dim: u32) -> Result<RgbaImage, CompositeFailure> {
    let (w, h) = image.dimensions();
    let (new_w, new_h) = limit_dimensions(w, h, max_dim);
    if (new_w, new_h) == (w, h) {
        return Ok(image);
    }
    resize_rgba(&image, new_w, new_h)
}

pub fn resize_rgba(
    source: &RgbaImage,
    target_w: u32,
    target_h: u32,
) -> Result<RgbaImage, CompositeFailure> {
    if target_w == 0 || target_h == 0 {
        return Err(CompositeFailure::composite(
            "resize dimensions must be positive",
        ));
    }
    if source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .map_err(|err| CompositeFailure::composite(format!("invalid resize source: {err}")))?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|err| CompositeFailure::composite(format!("resize failed: {err}")))?;
    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| CompositeFailure::composite("failed to construct resized RGBA image"))
}
