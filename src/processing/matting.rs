use image::{Rgba, RgbaImage, imageops};
use palette::{Darken, IntoColor, Lab, Lighten, LinSrgb, Srgb};

use super::layout::{center_offset, resize_rgba, resize_to_contain};
use crate::config::{MatColor, MatOptions, MatStyle};
use crate::error::CompositeFailure;

/// When pictures get a mat instead of an edge fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatTolerance {
    /// Mat every picture regardless of shape.
    Always,
    Off,
    /// Mat when the aspect difference exceeds this value.
    Above(f32),
}

impl MatTolerance {
    /// Maps the numeric control value: 0 means always, 1 means never.
    pub fn from_value(value: f32) -> Self {
        let rounded = (value * 10_000.0).round() / 10_000.0;
        if rounded <= 0.0 {
            Self::Always
        } else if rounded >= 1.0 {
            Self::Off
        } else {
            Self::Above(value)
        }
    }

    pub fn value(&self) -> f32 {
        match *self {
            Self::Always => 0.0,
            Self::Off => 1.0,
            Self::Above(t) => t,
        }
    }

    pub fn should_mat(&self, aspect_diff: f32) -> bool {
        match *self {
            Self::Always => true,
            Self::Off => false,
            Self::Above(t) => aspect_diff > t,
        }
    }
}

/// Letterboxes `img` onto a `screen_w` x `screen_h` mat in the configured style.
pub fn apply_mat(
    img: &RgbaImage,
    screen_w: u32,
    screen_h: u32,
    opts: &MatOptions,
) -> Result<RgbaImage, CompositeFailure> {
    if screen_w == 0 || screen_h == 0 {
        return Err(CompositeFailure::composite("mat size must be positive"));
    }
    let avg = average_color(img);
    let outer = match opts.outer_color {
        MatColor::Auto => shade(avg, Shade::Darker),
        MatColor::Fixed(rgb) => rgb,
    };
    let inner = match opts.inner_color {
        MatColor::Auto => shade(avg, Shade::Lighter),
        MatColor::Fixed(rgb) => rgb,
    };

    let mut canvas = RgbaImage::from_pixel(screen_w, screen_h, opaque(outer));

    // The window keeps at least `outer_border` of mat on every side.
    let max_border = (screen_w.min(screen_h) / 2).saturating_sub(1);
    let outer_border = opts.outer_border.min(max_border);
    let window_w = screen_w.saturating_sub(outer_border * 2).max(1);
    let window_h = screen_h.saturating_sub(outer_border * 2).max(1);

    let ring = match opts.style {
        MatStyle::Plain => 0,
        MatStyle::Double | MatStyle::Bevel => {
            opts.inner_border.min(window_w.min(window_h) / 4)
        }
    };
    let photo_box_w = window_w.saturating_sub(ring * 2).max(1);
    let photo_box_h = window_h.saturating_sub(ring * 2).max(1);
    let (dest_w, dest_h) = resize_to_contain(photo_box_w, photo_box_h, img.width(), img.height());
    let scaled = resize_rgba(img, dest_w, dest_h)?;
    let (dx, dy) = center_offset(dest_w, dest_h, screen_w, screen_h);

    if ring > 0 {
        let ring_rect = Rect {
            x: dx.saturating_sub(ring),
            y: dy.saturating_sub(ring),
            w: (dest_w + ring * 2).min(screen_w),
            h: (dest_h + ring * 2).min(screen_h),
        };
        fill_rect(&mut canvas, ring_rect, opaque(inner));
        if opts.style == MatStyle::Bevel {
            let bevel = (ring / 6).max(2).min(ring);
            let cut = Rect {
                x: dx.saturating_sub(bevel),
                y: dy.saturating_sub(bevel),
                w: dest_w + bevel * 2,
                h: dest_h + bevel * 2,
            };
            apply_bevel(&mut canvas, cut, bevel);
        }
    }

    imageops::replace(&mut canvas, &scaled, dx as i64, dy as i64);
    Ok(canvas)
}

pub(crate) fn average_color(img: &RgbaImage) -> [u8; 3] {
    let mut r: u64 = 0;
    let mut g: u64 = 0;
    let mut b: u64 = 0;
    let mut n: u64 = 0;
    for p in img.pixels() {
        r += p[0] as u64;
        g += p[1] as u64;
        b += p[2] as u64;
        n += 1;
    }
    if n == 0 {
        return [0, 0, 0];
    }
    [(r / n) as u8, (g / n) as u8, (b / n) as u8]
}

enum Shade {
    Darker,
    Lighter,
}

fn shade(rgb: [u8; 3], direction: Shade) -> [u8; 3] {
    let lab: Lab = Srgb::new(rgb[0], rgb[1], rgb[2])
        .into_format::<f32>()
        .into_linear()
        .into_color();
    let lab = match direction {
        Shade::Darker => lab.darken(0.45),
        Shade::Lighter => lab.lighten(0.6),
    };
    let linear: LinSrgb = lab.into_color();
    let srgb: Srgb<u8> = Srgb::<f32>::from_linear(linear).into_format();
    [srgb.red, srgb.green, srgb.blue]
}

fn opaque(rgb: [u8; 3]) -> Rgba<u8> {
    Rgba([rgb[0], rgb[1], rgb[2], 255])
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

fn fill_rect(img: &mut RgbaImage, rect: Rect, color: Rgba<u8>) {
    let x_end = (rect.x + rect.w).min(img.width());
    let y_end = (rect.y + rect.h).min(img.height());
    for y in rect.y..y_end {
        for x in rect.x..x_end {
            img.put_pixel(x, y, color);
        }
    }
}

fn lighten(px: &mut Rgba<u8>, amt: u8) {
    px[0] = px[0].saturating_add(amt);
    px[1] = px[1].saturating_add(amt);
    px[2] = px[2].saturating_add(amt);
}

fn darken(px: &mut Rgba<u8>, amt: u8) {
    px[0] = px[0].saturating_sub(amt);
    px[1] = px[1].saturating_sub(amt);
    px[2] = px[2].saturating_sub(amt);
}

/// Shades the bevelled cut around the photo window: the top and left faces
/// catch the light, the bottom and right faces fall into shadow.
fn apply_bevel(img: &mut RgbaImage, cut: Rect, bevel: u32) {
    let x_end = (cut.x + cut.w).min(img.width());
    let y_end = (cut.y + cut.h).min(img.height());
    for y in cut.y..y_end {
        for x in cut.x..x_end {
            let from_left = x - cut.x;
            let from_top = y - cut.y;
            let from_right = x_end - 1 - x;
            let from_bottom = y_end - 1 - y;
            let edge = from_left.min(from_top).min(from_right).min(from_bottom);
            if edge >= bevel {
                continue;
            }
            let px = img.get_pixel_mut(x, y);
            if from_top.min(from_left) <= from_bottom.min(from_right) {
                lighten(px, 40);
            } else {
                darken(px, 40);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(style: MatStyle) -> MatOptions {
        MatOptions {
            style,
            outer_color: MatColor::Fixed([1, 2, 3]),
            inner_color: MatColor::Fixed([200, 200, 200]),
            outer_border: 10,
            inner_border: 8,
            ..MatOptions::default()
        }
    }

    #[test]
    fn average_color_basic() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
        assert_eq!(average_color(&img), [10, 20, 30]);
    }

    #[test]
    fn tolerance_numeric_mapping() {
        assert_eq!(MatTolerance::from_value(0.0), MatTolerance::Always);
        assert_eq!(MatTolerance::from_value(0.00001), MatTolerance::Always);
        assert_eq!(MatTolerance::from_value(1.0), MatTolerance::Off);
        assert_eq!(MatTolerance::from_value(0.2), MatTolerance::Above(0.2));
        for value in [0.0, 1.0, 0.2, 0.05] {
            assert_eq!(MatTolerance::from_value(value).value(), value);
        }
        assert!(MatTolerance::Always.should_mat(0.0));
        assert!(!MatTolerance::Off.should_mat(0.9));
        assert!(MatTolerance::Above(0.1).should_mat(0.2));
        assert!(!MatTolerance::Above(0.1).should_mat(0.05));
    }

    #[test]
    fn plain_mat_places_image_on_outer_colour() {
        let img = RgbaImage::from_pixel(100, 50, Rgba([10, 10, 10, 255]));
        let res = apply_mat(&img, 200, 200, &options(MatStyle::Plain)).unwrap();
        assert_eq!(res.dimensions(), (200, 200));
        assert_eq!(&res.get_pixel(0, 0).0[0..3], &[1, 2, 3]);
        assert_eq!(&res.get_pixel(100, 100).0[0..3], &[10, 10, 10]);
    }

    #[test]
    fn double_mat_draws_inner_ring() {
        let img = RgbaImage::from_pixel(100, 100, Rgba([10, 10, 10, 255]));
        let res = apply_mat(&img, 300, 200, &options(MatStyle::Double)).unwrap();
        // photo box is 164 high, centred at y = 18..182; ring spans 8 px above
        assert_eq!(&res.get_pixel(150, 12).0[0..3], &[200, 200, 200]);
        assert_eq!(&res.get_pixel(150, 2).0[0..3], &[1, 2, 3]);
    }

    #[test]
    fn bevel_lights_top_and_shades_bottom() {
        let img = RgbaImage::from_pixel(100, 100, Rgba([10, 10, 10, 255]));
        let res = apply_mat(&img, 300, 200, &options(MatStyle::Bevel)).unwrap();
        let top = res.get_pixel(150, 17).0[0];
        let bottom = res.get_pixel(150, 182).0[0];
        assert!(top > 200);
        assert!(bottom < 200);
    }

    #[test]
    fn auto_colour_darkens_average() {
        let mut opts = options(MatStyle::Plain);
        opts.outer_color = MatColor::Auto;
        let img = RgbaImage::from_pixel(40, 20, Rgba([200, 180, 160, 255]));
        let res = apply_mat(&img, 100, 100, &opts).unwrap();
        let corner = res.get_pixel(0, 0).0;
        assert!(corner[0] < 200 && corner[1] < 180 && corner[2] < 160);
    }
}
