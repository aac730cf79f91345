use std::fmt::Display;
use std::str::FromStr;

use image::{GenericImageView, GrayImage};
use imageproc::contrast::{otsu_level, threshold};
use log::warn;
use logging_timer::time;
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    ballot_card::BallotSide,
    debug::{draw_scored_oval_marks_debug_image_mut, DebugSink},
    election::{GridLayout, GridLocation, GridPosition},
    geometry::{rect_contains_point, serialize_rect, Point, Rect, Vector},
    grid::PossibleOptionBubblesGrid,
    image_utils::{count_pixels, diff, ratio, BLACK, WHITE},
};

pub const DEFAULT_MAXIMUM_SEARCH_DISTANCE: u32 = 7;

/// How an oval's fill is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OvalScoringMethod {
    /// Align the blank oval template to the outline in the image, then
    /// measure how much of the template's interior is filled in.
    #[default]
    TemplateMatch,

    /// Compare the share of dark pixels against the blank template's share,
    /// keeping the darkest nearby crop.
    ShadedRatio,
}

impl FromStr for OvalScoringMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "template-match" => Ok(OvalScoringMethod::TemplateMatch),
            "shaded-ratio" => Ok(OvalScoringMethod::ShadedRatio),
            _ => Err(format!("unknown oval scoring method: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OvalScoringOptions {
    /// How far to look in each direction from the expected position.
    pub maximum_search_distance: u32,
    pub method: OvalScoringMethod,
}

impl Default for OvalScoringOptions {
    fn default() -> Self {
        Self {
            maximum_search_distance: DEFAULT_MAXIMUM_SEARCH_DISTANCE,
            method: OvalScoringMethod::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpretedOvalMark {
    /// Side, column and row of the oval in the timing mark grid.
    pub location: GridLocation,

    /// How filled in the oval is, from 0 (blank) to 1 (solid).
    pub score: f32,

    /// Where the oval was found.
    #[serde(serialize_with = "serialize_rect")]
    pub bounds: Rect,

    /// Where the grid says the oval should be.
    #[serde(serialize_with = "serialize_rect")]
    pub expected_bounds: Rect,

    /// How far `bounds` is from `expected_bounds`.
    pub scored_offset: Vector,
}

impl Display for InterpretedOvalMark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} column={} row={} score={:.3} offset=({}, {})",
            self.location.side,
            self.location.column,
            self.location.row,
            self.score,
            self.scored_offset.x,
            self.scored_offset.y
        )
    }
}

pub type ScoredOvalMarks = Vec<(GridPosition, Option<InterpretedOvalMark>)>;

/// Scores every oval on `side` of the grid layout against the image. Positions
/// outside `usable_area`, given in grid coordinates, are reported without a
/// score.
#[time]
pub fn score_oval_marks_from_grid_layout(
    img: &GrayImage,
    oval_template: &GrayImage,
    grid: &PossibleOptionBubblesGrid,
    grid_layout: &GridLayout,
    side: BallotSide,
    usable_area: Rect,
    options: &OvalScoringOptions,
    debug: &dyn DebugSink,
) -> ScoredOvalMarks {
    let threshold = otsu_level(img);

    let scored_oval_marks = grid_layout
        .grid_positions
        .par_iter()
        .filter_map(|grid_position| {
            let location = grid_position.location();
            if location.side != side {
                return None;
            }

            let grid_point = Point::new(location.column as f32, location.row as f32);
            if !rect_contains_point(&usable_area, &grid_point) {
                warn!(
                    "grid position {} at column {}, row {} is outside the usable area",
                    grid_position, location.column, location.row
                );
                return Some((grid_position.clone(), None));
            }

            let scored = match grid.point_for_location(location.column, location.row) {
                Some(expected_oval_center) => score_oval_mark(
                    img,
                    oval_template,
                    expected_oval_center,
                    &location,
                    options,
                    threshold,
                ),
                None => {
                    warn!(
                        "grid position {} at column {}, row {} is outside the grid",
                        grid_position, location.column, location.row
                    );
                    None
                }
            };

            Some((grid_position.clone(), scored))
        })
        .collect::<ScoredOvalMarks>();

    debug.layer("scored_oval_marks", img, &|canvas| {
        draw_scored_oval_marks_debug_image_mut(canvas, &scored_oval_marks);
    });

    scored_oval_marks
}

/// Fraction of the template's blank pixels that are dark in `binarized`.
fn fill_score(oval_template: &GrayImage, binarized: &GrayImage) -> f32 {
    let blank_pixels = count_pixels(oval_template, &WHITE);
    if blank_pixels == 0 {
        return 0.0;
    }
    let filled = diff(oval_template, binarized);
    count_pixels(&filled, &BLACK) as f32 / blank_pixels as f32
}

/// Share of dark pixels above what the blank template has, scaled to [0, 1].
fn shaded_ratio_score(oval_template: &GrayImage, binarized: &GrayImage) -> f32 {
    let template_shaded = ratio(oval_template, &BLACK);
    if template_shaded >= 1.0 {
        return 0.0;
    }
    ((ratio(binarized, &BLACK) - template_shaded) / (1.0 - template_shaded)).clamp(0.0, 1.0)
}

/// Scores an oval near `expected_oval_center`. Every offset within the search
/// distance that keeps the oval inside the image is tried; if none do, there
/// is no score.
pub fn score_oval_mark(
    img: &GrayImage,
    oval_template: &GrayImage,
    expected_oval_center: Point<f32>,
    location: &GridLocation,
    options: &OvalScoringOptions,
    threshold_level: u8,
) -> Option<InterpretedOvalMark> {
    let (width, height) = oval_template.dimensions();
    let left = expected_oval_center.x.round() as i32 - (width / 2) as i32;
    let top = expected_oval_center.y.round() as i32 - (height / 2) as i32;
    let expected_bounds = Rect::at(left, top).of_size(width, height);
    let distance = options.maximum_search_distance as i32;

    // (ranking, x offset, y offset, binarized crop)
    let mut best: Option<(f32, i32, i32, GrayImage)> = None;

    for offset_x in -distance..=distance {
        let x = left + offset_x;
        if x < 0 || x as u32 + width > img.width() {
            continue;
        }

        for offset_y in -distance..=distance {
            let y = top + offset_y;
            if y < 0 || y as u32 + height > img.height() {
                continue;
            }

            let cropped = img.view(x as u32, y as u32, width, height).to_image();
            let binarized = threshold(&cropped, threshold_level);
            let ranking = match options.method {
                OvalScoringMethod::TemplateMatch => {
                    ratio(&diff(&binarized, oval_template), &WHITE)
                }
                OvalScoringMethod::ShadedRatio => shaded_ratio_score(oval_template, &binarized),
            };

            if best
                .as_ref()
                .map_or(true, |(best_ranking, ..)| ranking > *best_ranking)
            {
                best = Some((ranking, offset_x, offset_y, binarized));
            }
        }
    }

    let (ranking, offset_x, offset_y, binarized) = best?;
    let score = match options.method {
        OvalScoringMethod::TemplateMatch => fill_score(oval_template, &binarized),
        OvalScoringMethod::ShadedRatio => ranking,
    };

    Some(InterpretedOvalMark {
        location: *location,
        score,
        bounds: Rect::at(left + offset_x, top + offset_y).of_size(width, height),
        expected_bounds,
        scored_offset: Vector::new(offset_x as f32, offset_y as f32),
    })
}
