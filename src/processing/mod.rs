//! Turns one or two decoded pictures into a single texture-ready bitmap.
//!
//! Stages run in a fixed order: decode, orientation, portrait pairing, then
//! either a mat or a blurred edge fill, and finally the texture size clamp.

pub mod blur;
pub mod decode;
pub mod layout;
pub mod matting;
pub mod orientation;
pub mod pairing;

use image::RgbaImage;
use tracing::debug;

use crate::config::CompositorOptions;
use crate::error::CompositeFailure;
use crate::events::{PictureRef, PictureRequest};
use blur::{BLUR_MIN_ASPECT_DIFF, blurred_background};
use layout::{
    aspect_diff, clamp_to_max_dimension, limit_dimensions, resize_rgba, resize_to_cover,
};
use matting::{MatTolerance, apply_mat};

/// Pixel size of the output surface and the largest texture it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
    pub max_texture_dimension: u32,
}

impl TargetSize {
    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }
}

/// Everything `compose` reads. Options are fixed at startup; the tolerance and
/// target change at runtime.
#[derive(Debug, Clone)]
pub struct CompositorSettings {
    pub options: CompositorOptions,
    pub pair_portraits: bool,
    pub tolerance: MatTolerance,
    pub target: TargetSize,
}

/// A finished slide bitmap, consumed once by the display loop.
#[derive(Debug)]
pub struct CompositedFrame {
    image: RgbaImage,
}

impl CompositedFrame {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Width over height, used for the fit/fill uniforms.
    pub fn aspect(&self) -> f32 {
        self.width().max(1) as f32 / self.height().max(1) as f32
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

pub fn compose(
    request: &PictureRequest,
    settings: &CompositorSettings,
) -> Result<CompositedFrame, CompositeFailure> {
    let target = settings.target;
    if target.width == 0 || target.height == 0 {
        return Err(CompositeFailure::composite("target size must be positive"));
    }
    let hint = settings
        .options
        .fast_jpeg_decode
        .then(|| target.width.max(target.height));

    let first = load_oriented(&request.first, hint)?;
    let mut image = match request.second.as_ref().filter(|_| settings.pair_portraits) {
        Some(second) => {
            let second = load_oriented(second, hint)?;
            pairing::pair_side_by_side(&first, &second)?
        }
        None => first,
    };

    let diff = aspect_diff(target.width, target.height, image.width(), image.height());
    if settings.tolerance.should_mat(diff) {
        debug!(diff, "matting picture");
        image = apply_mat(&image, target.width, target.height, &settings.options.mat)?;
    } else if settings.options.blur.enabled && diff > BLUR_MIN_ASPECT_DIFF {
        debug!(diff, "filling edges with blurred background");
        image = blurred_background(
            &image,
            target.width,
            target.height,
            &settings.options.blur,
            settings.options.edge_alpha,
        )?;
    } else {
        let (w, h) = resize_to_cover(target.width, target.height, image.width(), image.height());
        let (w, h) = limit_dimensions(w, h, target.max_texture_dimension);
        image = resize_rgba(&image, w, h)?;
    }

    let image = clamp_to_max_dimension(image, target.max_texture_dimension)?;
    Ok(CompositedFrame::new(image))
}

fn load_oriented(picture: &PictureRef, hint: Option<u32>) -> Result<RgbaImage, CompositeFailure> {
    let image = decode::decode_picture(&picture.path, hint)?;
    Ok(orientation::apply_orientation(image, picture.orientation))
}
