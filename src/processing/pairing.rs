use image::{Rgba, RgbaImage, imageops};

use super::layout::resize_rgba;
use crate::error::CompositeFailure;

/// Gap between the two halves of a portrait pair, in pixels.
pub const PAIR_SEPARATOR_PX: u32 = 8;

/// Places two portraits side by side.
///
/// The wider picture is shrunk to the narrower one's width so neither side is
/// cropped drastically, then the taller one is clipped to the shorter height.
pub fn pair_side_by_side(
    left: &RgbaImage,
    right: &RgbaImage,
) -> Result<RgbaImage, CompositeFailure> {
    let (left, right) = if left.width() > right.width() {
        (match_width(left, right.width())?, right.clone())
    } else {
        (left.clone(), match_width(right, left.width())?)
    };

    let width = left.width() + right.width() + PAIR_SEPARATOR_PX;
    let height = left.height().min(right.height());
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
    imageops::replace(&mut canvas, &left, 0, 0);
    imageops::replace(
        &mut canvas,
        &right,
        (left.width() + PAIR_SEPARATOR_PX) as i64,
        0,
    );
    Ok(canvas)
}

fn match_width(image: &RgbaImage, width: u32) -> Result<RgbaImage, CompositeFailure> {
    let height = ((image.height() as u64 * width as u64) / image.width().max(1) as u64).max(1);
    resize_rgba(image, width.max(1), height as u32)
}
