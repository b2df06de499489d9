use image::{RgbaImage, imageops};

use super::layout::{center_offset, resize_rgba};
use crate::config::EdgeBlurOptions;
use crate::error::CompositeFailure;

/// Pictures closer to the screen shape than this are left without a fill.
pub const BLUR_MIN_ASPECT_DIFF: f32 = 0.01;

/// Width of the sample the Gaussian blur runs on.
const BLUR_SAMPLE_WIDTH: u32 = 512;

/// Fills the screen behind `img` with a zoomed, blurred copy of itself.
///
/// The background is a centred crop scaled to cover the screen, blurred at
/// low resolution and made translucent with `edge_alpha`; the picture itself is
/// scaled to fit and pasted opaque in the middle.
pub fn blurred_background(
    img: &RgbaImage,
    screen_w: u32,
    screen_h: u32,
    opts: &EdgeBlurOptions,
    edge_alpha: f32,
) -> Result<RgbaImage, CompositeFailure> {
    if screen_w == 0 || screen_h == 0 {
        return Err(CompositeFailure::composite("blur target must be positive"));
    }
    let (w, h) = img.dimensions();
    let (sw, sh) = (screen_w as f32, screen_h as f32);
    let cover = (sw / w.max(1) as f32).max(sh / h.max(1) as f32);
    let fit = (sw / w.max(1) as f32).min(sh / h.max(1) as f32);
    let zoom = opts.zoom.max(1.0);

    let crop_w = ((sw / cover / zoom).round() as u32).clamp(1, w.max(1));
    let crop_h = ((sh / cover / zoom).round() as u32).clamp(1, h.max(1));
    let (cx, cy) = center_offset(crop_w, crop_h, w, h);
    let crop = imageops::crop_imm(img, cx, cy, crop_w, crop_h).to_image();

    let sample_h = ((screen_h as u64 * BLUR_SAMPLE_WIDTH as u64) / screen_w as u64).max(1) as u32;
    let sample = resize_rgba(&crop, BLUR_SAMPLE_WIDTH, sample_h)?;
    let sample = if opts.amount > 0.0 {
        imageops::blur(&sample, opts.amount)
    } else {
        sample
    };
    let mut background = resize_rgba(&sample, screen_w, screen_h)?;
    let alpha = (255.0 * edge_alpha.clamp(0.0, 1.0)).round() as u8;
    for px in background.pixels_mut() {
        px[3] = alpha;
    }

    let fg_w = ((w as f32 * fit) as u32).clamp(1, screen_w);
    let fg_h = ((h as f32 * fit) as u32).clamp(1, screen_h);
    let foreground = resize_rgba(img, fg_w, fg_h)?;
    let (fx, fy) = center_offset(fg_w, fg_h, screen_w, screen_h);
    imageops::replace(&mut background, &foreground, fx as i64, fy as i64);
    Ok(background)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn opts() -> EdgeBlurOptions {
        EdgeBlurOptions {
            enabled: true,
            amount: 4.0,
            zoom: 1.0,
        }
    }

    #[test]
    fn portrait_on_landscape_fills_screen() {
        let img = RgbaImage::from_pixel(100, 200, Rgba([90, 120, 150, 255]));
        let out = blurred_background(&img, 160, 90, &opts(), 0.5).unwrap();
        assert_eq!(out.dimensions(), (160, 90));
        // edges carry the translucent fill, the middle the opaque picture
        assert_eq!(out.get_pixel(0, 45)[3], 128);
        assert_eq!(out.get_pixel(80, 45)[3], 255);
    }

    #[test]
    fn zoom_below_one_is_treated_as_one() {
        let img = RgbaImage::from_pixel(100, 200, Rgba([10, 10, 10, 255]));
        let mut o = opts();
        o.zoom = 0.25;
        let out = blurred_background(&img, 160, 90, &o, 1.0).unwrap();
        assert_eq!(out.dimensions(), (160, 90));
        assert_eq!(out.get_pixel(0, 0)[3], 255);
    }
}
