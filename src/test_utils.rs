use std::ops::Range;

use image::{
    imageops::{self, FilterType},
    GrayImage,
};
use imageproc::{
    drawing::{draw_filled_ellipse_mut, draw_filled_rect_mut, draw_hollow_ellipse_mut},
    geometric_transformations::{rotate_about_center, Interpolation},
};

use crate::{
    ballot_card::{get_scanned_ballot_card_geometry_8pt5x11, BallotCardGeometry},
    geometry::Rect,
    image_utils::{BLACK, WHITE},
    metadata::{ENDER_CODE, METADATA_BITS},
};

pub const GRID_COLUMNS: u32 = 34;
pub const GRID_ROWS: u32 = 41;

/// Front metadata for batch 53, card 54.
pub const CARD_54_FRONT_BITS: [bool; METADATA_BITS] = [
    true, false, true, false, true, false, true, true, false, false, false, false, false, false,
    false, false, true, true, false, true, true, false, false, false, false, false, false, false,
    false, false, false, true,
];

pub fn geometry() -> BallotCardGeometry {
    get_scanned_ballot_card_geometry_8pt5x11()
}

fn write_field(bits: &mut [bool; METADATA_BITS], range: Range<usize>, value: u16) {
    for (offset, i) in range.enumerate() {
        bits[i] = (value >> offset) & 1 == 1;
    }
}

pub fn encode_front_bits(
    batch_or_precinct_number: u16,
    card_number: u16,
    sequence_number: u8,
) -> [bool; METADATA_BITS] {
    let mut bits = [false; METADATA_BITS];
    write_field(&mut bits, 2..15, batch_or_precinct_number);
    write_field(&mut bits, 15..28, card_number);
    write_field(&mut bits, 28..31, sequence_number.into());
    bits[31] = true;
    let checksum = bits[2..].iter().filter(|&&bit| bit).count() % 4;
    write_field(&mut bits, 0..2, checksum as u16);
    bits
}

pub fn encode_back_bits(day: u8, month: u8, year: u8, election_type: u8) -> [bool; METADATA_BITS] {
    let mut bits = [false; METADATA_BITS];
    write_field(&mut bits, 0..5, day.into());
    write_field(&mut bits, 5..9, month.into());
    write_field(&mut bits, 9..16, year.into());
    write_field(&mut bits, 16..21, election_type.into());
    bits[21..32].copy_from_slice(&ENDER_CODE);
    bits
}

/// Where the timing mark for a grid location is printed on a synthetic page.
pub fn timing_mark_rect(column: u32, row: u32) -> Rect {
    Rect::at(4 + 50 * column as i32, 94 + 50 * row as i32).of_size(38, 13)
}

/// Pixel center of the oval at a grid location on a synthetic page.
pub fn oval_center(column: u32, row: u32) -> (i32, i32) {
    (23 + 50 * column as i32, 100 + 50 * row as i32)
}

/// Whether the bottom row has a timing mark in `column` for the given bits.
pub fn bottom_mark_present(bits: &[bool; METADATA_BITS], column: u32) -> bool {
    column == 0 || column == GRID_COLUMNS - 1 || bits[(GRID_COLUMNS - 2 - column) as usize]
}

/// Draws an upright letter-size page: the timing mark border with `bits`
/// in the bottom row, plus filled and blank ovals at the given
/// `(column, row)` locations.
pub fn synthetic_ballot_page(
    bits: &[bool; METADATA_BITS],
    filled_ovals: &[(u32, u32)],
    blank_ovals: &[(u32, u32)],
) -> GrayImage {
    let geometry = geometry();
    let mut img = GrayImage::from_pixel(
        geometry.canvas_size.width,
        geometry.canvas_size.height,
        WHITE,
    );

    for column in 0..GRID_COLUMNS {
        draw_filled_rect_mut(&mut img, timing_mark_rect(column, 0), BLACK);
        if bottom_mark_present(bits, column) {
            draw_filled_rect_mut(&mut img, timing_mark_rect(column, GRID_ROWS - 1), BLACK);
        }
    }

    for row in 0..GRID_ROWS {
        draw_filled_rect_mut(&mut img, timing_mark_rect(0, row), BLACK);
        draw_filled_rect_mut(&mut img, timing_mark_rect(GRID_COLUMNS - 1, row), BLACK);
    }

    for &(column, row) in filled_ovals {
        draw_filled_ellipse_mut(&mut img, oval_center(column, row), 19, 12, BLACK);
    }

    for &(column, row) in blank_ovals {
        draw_hollow_ellipse_mut(&mut img, oval_center(column, row), 19, 12, BLACK);
    }

    img
}

/// Draws a blank upright page as `synthetic_ballot_page` does, then rotates
/// it by `degrees` about its center the way a crooked scan would be. The page
/// is first narrowed to 96% so the side marks stay on the canvas.
pub fn skewed_ballot_page(bits: &[bool; METADATA_BITS], degrees: f32) -> GrayImage {
    let page = synthetic_ballot_page(bits, &[], &[]);
    let (width, height) = page.dimensions();
    let narrowed_width = width * 24 / 25;
    let narrowed = imageops::resize(&page, narrowed_width, height, FilterType::Nearest);

    let mut canvas = GrayImage::from_pixel(width, height, WHITE);
    imageops::overlay(&mut canvas, &narrowed, ((width - narrowed_width) / 2).into(), 0);
    rotate_about_center(&canvas, degrees.to_radians(), Interpolation::Nearest, WHITE)
}
