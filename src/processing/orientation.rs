use image::{RgbaImage, imageops};

/// Applies an EXIF orientation code so the picture displays upright.
/// Unknown codes leave the image untouched.
pub fn apply_orientation(img: RgbaImage, orientation: u16) -> RgbaImage {
    match orientation {
        2 => imageops::flip_horizontal(&img),
        3 => imageops::rotate180(&img),
        4 => imageops::flip_vertical(&img),
        // transpose
        5 => imageops::flip_horizontal(&imageops::rotate90(&img)),
        6 => imageops::rotate90(&img),
        // transverse
        7 => imageops::flip_horizontal(&imageops::rotate270(&img)),
        8 => imageops::rotate270(&img),
        _ => img,
    }
}

/// Orientation code that undoes `orientation`.
pub fn inverse_orientation(orientation: u16) -> u16 {
    match orientation {
        6 => 8,
        8 => 6,
        other => other,
    }
}

/// Whether the code swaps width and height.
pub fn swaps_dimensions(orientation: u16) -> bool {
    matches!(orientation, 5..=8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn asymmetric() -> RgbaImage {
        let mut img = RgbaImage::new(3, 2);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgba([(x * 40) as u8, (y * 90) as u8, 7, 255]);
        }
        img
    }

    #[test]
    fn every_code_round_trips() {
        let original = asymmetric();
        for code in 1..=8u16 {
            let oriented = apply_orientation(original.clone(), code);
            let restored = apply_orientation(oriented, inverse_orientation(code));
            assert_eq!(restored, original, "orientation {code} did not round-trip");
        }
    }

    #[test]
    fn rotating_codes_swap_dimensions() {
        for code in 1..=8u16 {
            let oriented = apply_orientation(asymmetric(), code);
            let expected = if swaps_dimensions(code) { (2, 3) } else { (3, 2) };
            assert_eq!(oriented.dimensions(), expected, "orientation {code}");
        }
    }

    #[test]
    fn six_rotates_clockwise() {
        let oriented = apply_orientation(asymmetric(), 6);
        // top-left of the source ends up at the top-right
        assert_eq!(oriented.get_pixel(1, 0), asymmetric().get_pixel(0, 0));
    }

    #[test]
    fn unknown_code_is_identity() {
        assert_eq!(apply_orientation(asymmetric(), 42), asymmetric());
    }
}
