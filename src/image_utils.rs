use image::imageops::{resize, FilterType};
use image::{GrayImage, Luma, Rgb};

pub const WHITE: Luma<u8> = Luma([u8::MAX]);
pub const BLACK: Luma<u8> = Luma([u8::MIN]);

pub const WHITE_RGB: Rgb<u8> = Rgb([255, 255, 255]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const CYAN: Rgb<u8> = Rgb([0, 255, 255]);
pub const PINK: Rgb<u8> = Rgb([255, 0, 255]);
pub const ORANGE: Rgb<u8> = Rgb([255, 127, 0]);
pub const DARK_GREEN: Rgb<u8> = Rgb([0, 127, 0]);
pub const DARK_BLUE: Rgb<u8> = Rgb([0, 0, 127]);

/// Whether a luma value counts as foreground (ink) for the given threshold.
/// Matches `imageproc::contrast::threshold`, which maps values at or below
/// the threshold to black.
pub fn is_dark(luma: u8, threshold: u8) -> bool {
    luma <= threshold
}

/// Bleed the given luma value outwards from any pixels that match it.
pub fn bleed(img: &GrayImage, luma: &Luma<u8>) -> GrayImage {
    let mut out = img.clone();
    for (x, y, pixel) in img.enumerate_pixels() {
        if *pixel != *luma {
            continue;
        }

        if x > 0 {
            out.put_pixel(x - 1, y, *pixel);
        }
        if x < img.width() - 1 {
            out.put_pixel(x + 1, y, *pixel);
        }
        if y > 0 {
            out.put_pixel(x, y - 1, *pixel);
        }
        if y < img.height() - 1 {
            out.put_pixel(x, y + 1, *pixel);
        }
    }

    out
}

/// Generates an image from two images where corresponding pixels in `compare`
/// that are darker than their counterpart in `base` show up with the luminosity
/// difference between the two. This is useful for determining where a
/// light-background form was filled out, for example.
///
/// Note that the sizes of the images must be equal.
///
/// ```text
///         BASE                  COMPARE                 DIFF
/// ┌───────────────────┐  ┌───────────────────┐  ┌───────────────────┐
/// │                   │  │        █ █ ███    │  │        █ █ ███    │
/// │ █ █               │  │ █ █    ███  █     │  │        ███  █     │
/// │  █                │  │  █     █ █ ███    │  │        █ █ ███    │
/// │ █ █ █████████████ │  │ █ █ █████████████ │  │                   │
/// └───────────────────┘  └───────────────────┘  └───────────────────┘
/// ```
pub fn diff(base: &GrayImage, compare: &GrayImage) -> GrayImage {
    assert_eq!(base.dimensions(), compare.dimensions());

    let mut out = GrayImage::new(base.width(), base.height());

    base.enumerate_pixels().for_each(|(x, y, base_pixel)| {
        let compare_pixel = compare.get_pixel(x, y);
        let diff = base_pixel.0[0].saturating_sub(compare_pixel.0[0]);
        out.put_pixel(x, y, Luma([u8::MAX - diff]));
    });

    out
}

/// Determines the number of pixels in an image that match the given luma.
pub fn count_pixels(img: &GrayImage, luma: &Luma<u8>) -> u32 {
    img.pixels().filter(|p| *p == luma).count() as u32
}

/// Determines the ratio of pixels in an image that match the given luma.
pub fn ratio(img: &GrayImage, luma: &Luma<u8>) -> f32 {
    let total = img.width() * img.height();
    if total == 0 {
        return 0.0;
    }
    count_pixels(img, luma) as f32 / total as f32
}

/// Resizes an image to exactly the given size unless it already has it.
pub fn size_image_to_fit(img: &GrayImage, width: u32, height: u32) -> GrayImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    resize(img, width, height, FilterType::Lanczos3)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bleed() {
        let mut img = GrayImage::from_pixel(5, 5, WHITE);
        img.put_pixel(2, 2, BLACK);
        let bled = bleed(&img, &BLACK);
        assert_eq!(count_pixels(&bled, &BLACK), 5);
        assert_eq!(*bled.get_pixel(2, 1), BLACK);
        assert_eq!(*bled.get_pixel(1, 1), WHITE);
    }

    #[test]
    fn test_diff_shows_only_darker_pixels() {
        let mut base = GrayImage::from_pixel(2, 1, WHITE);
        let mut compare = GrayImage::from_pixel(2, 1, WHITE);
        base.put_pixel(0, 0, BLACK);
        compare.put_pixel(1, 0, BLACK);

        let out = diff(&base, &compare);
        // base is darker at (0, 0): no difference reported
        assert_eq!(*out.get_pixel(0, 0), WHITE);
        // compare is darker at (1, 0)
        assert_eq!(*out.get_pixel(1, 0), BLACK);
    }

    #[test]
    fn test_ratio() {
        let mut img = GrayImage::from_pixel(4, 1, WHITE);
        img.put_pixel(0, 0, BLACK);
        assert_eq!(ratio(&img, &BLACK), 0.25);
        assert_eq!(ratio(&GrayImage::new(0, 0), &BLACK), 0.0);
    }

    #[test]
    fn test_size_image_to_fit() {
        let img = GrayImage::from_pixel(848, 1100, WHITE);
        assert_eq!(size_image_to_fit(&img, 1696, 2200).dimensions(), (1696, 2200));
    }
}
