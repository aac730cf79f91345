use std::f32::consts::PI;
use std::fmt::Display;

use image::{imageops, GrayImage};
use imageproc::contrast::otsu_level;
use log::{debug, info};
use logging_timer::time;
use serde::Serialize;

use crate::{
    ballot_card::{BallotCardGeometry, Orientation},
    best_fit::{find_best_fit_line_segment, BestFitLine},
    debug::{
        draw_border_lines_debug_image_mut, draw_complete_timing_marks_debug_image_mut,
        draw_gap_rects_debug_image_mut, draw_partial_timing_marks_debug_image_mut,
        draw_search_inset_debug_image_mut, draw_timing_mark_grid_debug_image_mut, DebugSink,
    },
    gap_scan::{
        compute_timing_marks_from_gaps, horizontal_timing_mark_gap_scan,
        vertical_timing_mark_gap_scan, MarkAxis,
    },
    geometry::{
        center_of_rect, check_approximately_colinear, distances_between_rects,
        intersection_of_lines, median, normalize_angle, rect_contains_point, rect_from_min_max,
        Point, Rect, Segment,
    },
    grid::{compute_timing_mark_grid, PossibleOptionBubblesGrid},
    image_utils::{is_dark, BLUE, CYAN, GREEN, RED},
    interpolate::interpolate_missing_timing_marks,
    interpret::Error,
    metadata::{
        decode_bottom_row_timing_marks, decode_metadata_bits, BallotPageMetadata, MetadataError,
        METADATA_BITS,
    },
};

/// The most a scanned card is expected to be rotated.
const MAX_ROTATION: f32 = 5.0 * PI / 180.0;

/// How far the top and bottom may stray from perpendicular to the sides, and
/// the sides from each other.
const MAX_ROTATION_ERROR: f32 = 3.0 * PI / 180.0;

const NINETY_DEGREES: f32 = PI / 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BorderSide {
    Top,
    Bottom,
    Left,
    Right,
}

impl Display for BorderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BorderSide::Top => write!(f, "top"),
            BorderSide::Bottom => write!(f, "bottom"),
            BorderSide::Left => write!(f, "left"),
            BorderSide::Right => write!(f, "right"),
        }
    }
}

/// Best fit lines through the timing mark gaps along each edge.
#[derive(Debug, Clone, PartialEq)]
pub struct BorderLines {
    pub top: BestFitLine,
    pub bottom: BestFitLine,
    pub left: BestFitLine,
    pub right: BestFitLine,
}

impl BorderLines {
    /// The same lines as seen on the page turned upside down. Each edge takes
    /// the place of its opposite.
    pub fn rotate180(&self, canvas_size: (u32, u32)) -> BorderLines {
        BorderLines {
            top: self.bottom.rotate180(canvas_size),
            bottom: self.top.rotate180(canvas_size),
            left: self.right.rotate180(canvas_size),
            right: self.left.rotate180(canvas_size),
        }
    }
}

/// Timing marks as found on the page. The bottom row is expected to have
/// holes since it encodes the metadata bits.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialTimingMarks {
    pub top_rects: Vec<Rect>,
    pub bottom_rects: Vec<Rect>,
    pub left_rects: Vec<Rect>,
    pub right_rects: Vec<Rect>,
    pub top_left_rect: Option<Rect>,
    pub top_right_rect: Option<Rect>,
    pub bottom_left_rect: Option<Rect>,
    pub bottom_right_rect: Option<Rect>,
}

/// Timing marks with the holes filled in, one per grid column along the top
/// and bottom and one per grid row along the sides.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteTimingMarks {
    pub top_rects: Vec<Rect>,
    pub bottom_rects: Vec<Rect>,
    pub left_rects: Vec<Rect>,
    pub right_rects: Vec<Rect>,
    pub top_left_rect: Rect,
    pub top_right_rect: Rect,
    pub bottom_left_rect: Rect,
    pub bottom_right_rect: Rect,
}

/// Everything learned about one page from its timing marks.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingMarkGrid {
    pub geometry: BallotCardGeometry,
    pub orientation: Orientation,
    pub border_lines: BorderLines,
    pub partial_timing_marks: PartialTimingMarks,
    pub complete_timing_marks: CompleteTimingMarks,
    pub grid: PossibleOptionBubblesGrid,
    pub metadata: BallotPageMetadata,

    /// The page image, turned right side up if it was scanned upside down.
    pub image: GrayImage,
}

/// Grows a rect outward from `point` along its row and column for as long as
/// the pixels are dark, up to the size of a timing mark. Returns `None` if
/// `point` is not inside something dark.
pub fn find_timing_mark_containing_point(
    img: &GrayImage,
    point: &Point<f32>,
    geometry: &BallotCardGeometry,
    threshold: u8,
) -> Option<Rect> {
    let (width, height) = img.dimensions();
    let x = point.x.round() as i32;
    let y = point.y.round() as i32;
    if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
        return None;
    }

    let dark = |x: i32, y: i32| is_dark(img.get_pixel(x as u32, y as u32)[0], threshold);
    if !dark(x, y) {
        return None;
    }

    let max_width = geometry.timing_mark_size.width.ceil() as i32;
    let max_height = geometry.timing_mark_size.height.ceil() as i32;

    let (mut min_x, mut max_x) = (x, x);
    loop {
        let mut expanded = false;
        if max_x - min_x + 1 < max_width && min_x > 0 && dark(min_x - 1, y) {
            min_x -= 1;
            expanded = true;
        }
        if max_x - min_x + 1 < max_width && max_x + 1 < width as i32 && dark(max_x + 1, y) {
            max_x += 1;
            expanded = true;
        }
        if !expanded {
            break;
        }
    }

    let (mut min_y, mut max_y) = (y, y);
    loop {
        let mut expanded = false;
        if max_y - min_y + 1 < max_height && min_y > 0 && dark(x, min_y - 1) {
            min_y -= 1;
            expanded = true;
        }
        if max_y - min_y + 1 < max_height && max_y + 1 < height as i32 && dark(x, max_y + 1) {
            max_y += 1;
            expanded = true;
        }
        if !expanded {
            break;
        }
    }

    if min_x == max_x || min_y == max_y {
        return None;
    }

    Some(rect_from_min_max(min_x, min_y, max_x, max_y))
}

/// Probes every column position along `segment`, which runs from the center
/// of the bottom left timing mark to the center of the bottom right one.
fn find_bottom_timing_marks_along_segment(
    img: &GrayImage,
    segment: &Segment,
    geometry: &BallotCardGeometry,
    threshold: u8,
) -> Vec<Rect> {
    let columns = geometry.grid_size.width;
    if columns < 2 {
        return vec![];
    }
    let distance_per_mark = segment.length() / (columns - 1) as f32;

    (0..columns)
        .filter_map(|column| {
            let probe = segment.with_length(distance_per_mark * column as f32).end;
            find_timing_mark_containing_point(img, &probe, geometry, threshold)
        })
        .collect()
}

/// Picks the mark at a corner. The true corner mark contains the point where
/// the two border lines cross; failing both candidates, the image is probed
/// at that point directly.
fn resolve_corner(
    img: &GrayImage,
    corner: &Point<f32>,
    side_candidate: Option<&Rect>,
    top_candidate: Option<&Rect>,
    geometry: &BallotCardGeometry,
    threshold: u8,
) -> Option<Rect> {
    side_candidate
        .filter(|rect| rect_contains_point(rect, corner))
        .or_else(|| top_candidate.filter(|rect| rect_contains_point(rect, corner)))
        .copied()
        .or_else(|| find_timing_mark_containing_point(img, corner, geometry, threshold))
}

fn contains(candidate: Option<&Rect>, point: &Point<f32>) -> bool {
    candidate.map_or(false, |rect| rect_contains_point(rect, point))
}

fn check_border_length(side: BorderSide, rects: &[Rect], expected: u32) -> Result<(), Error> {
    if rects.len() != expected as usize {
        return Err(Error::IncompleteBorder {
            side,
            expected: expected as usize,
            actual: rects.len(),
        });
    }
    Ok(())
}

/// Fills in the missing timing marks along every edge. The bottom row uses
/// the top row's spacing since it may have too few neighboring marks to
/// measure its own.
#[time]
pub fn complete_timing_marks(
    partial_timing_marks: &PartialTimingMarks,
    geometry: &BallotCardGeometry,
) -> Result<CompleteTimingMarks, Error> {
    let corner = |rect: Option<Rect>, name: &str| {
        rect.ok_or_else(|| Error::Internal {
            message: format!("{} corner timing mark is missing", name),
        })
    };
    let top_left_rect = corner(partial_timing_marks.top_left_rect, "top left")?;
    let top_right_rect = corner(partial_timing_marks.top_right_rect, "top right")?;
    let bottom_left_rect = corner(partial_timing_marks.bottom_left_rect, "bottom left")?;
    let bottom_right_rect = corner(partial_timing_marks.bottom_right_rect, "bottom right")?;

    let top_spacing = median(&distances_between_rects(&partial_timing_marks.top_rects));

    let top_rects = interpolate_missing_timing_marks(&partial_timing_marks.top_rects, None);
    let bottom_rects =
        interpolate_missing_timing_marks(&partial_timing_marks.bottom_rects, top_spacing);
    let left_rects = interpolate_missing_timing_marks(&partial_timing_marks.left_rects, None);
    let right_rects = interpolate_missing_timing_marks(&partial_timing_marks.right_rects, None);

    check_border_length(BorderSide::Top, &top_rects, geometry.grid_size.width)?;
    check_border_length(BorderSide::Bottom, &bottom_rects, geometry.grid_size.width)?;
    check_border_length(BorderSide::Left, &left_rects, geometry.grid_size.height)?;
    check_border_length(BorderSide::Right, &right_rects, geometry.grid_size.height)?;

    Ok(CompleteTimingMarks {
        top_rects,
        bottom_rects,
        left_rects,
        right_rects,
        top_left_rect,
        top_right_rect,
        bottom_left_rect,
        bottom_right_rect,
    })
}

/// Reads the metadata bits from the bottom row marks that were actually
/// found, measured against the completed top row.
fn read_metadata_bits(
    partial_timing_marks: &PartialTimingMarks,
    complete_timing_marks: &CompleteTimingMarks,
) -> Result<Vec<bool>, Error> {
    decode_bottom_row_timing_marks(
        &complete_timing_marks.top_rects,
        &partial_timing_marks.bottom_rects,
        &complete_timing_marks.bottom_left_rect,
    )
    .ok_or(Error::InvalidMetadata(MetadataError::InvalidBitCount {
        expected: METADATA_BITS,
        actual: partial_timing_marks.bottom_rects.len(),
    }))
}

/// Finds the timing mark border of a page, decodes its metadata and computes
/// the grid of possible oval positions.
///
/// The sides are found first. The top and bottom are then constrained to be
/// roughly perpendicular to them. Whichever of the top and bottom has more
/// marks is taken to be the top; if that is the bottom of the image, the page
/// is upside down and both the lines and the image are turned around before
/// anything else looks at them.
#[time]
pub fn find_timing_mark_grid(
    geometry: &BallotCardGeometry,
    img: &GrayImage,
    debug: &dyn DebugSink,
) -> Result<TimingMarkGrid, Error> {
    let (width, height) = img.dimensions();
    let canvas_size = (width, height);
    let threshold = otsu_level(img);
    let inset = geometry.search_inset();

    let left_strip = rect_from_min_max(0, 0, inset.left as i32, height as i32 - 1);
    let right_strip = rect_from_min_max(
        width as i32 - inset.right as i32,
        0,
        width as i32 - 1,
        height as i32 - 1,
    );
    let top_strip = rect_from_min_max(0, 0, width as i32 - 1, inset.top as i32);
    let bottom_strip = rect_from_min_max(
        0,
        height as i32 - inset.bottom as i32,
        width as i32 - 1,
        height as i32 - 1,
    );

    debug.layer("search_inset", img, &|canvas| {
        draw_search_inset_debug_image_mut(
            canvas,
            &[left_strip, right_strip, top_strip, bottom_strip],
        );
    });

    let ((left_gaps, right_gaps), (top_gaps, bottom_gaps)) = rayon::join(
        || {
            rayon::join(
                || vertical_timing_mark_gap_scan(img, threshold, geometry, left_strip),
                || vertical_timing_mark_gap_scan(img, threshold, geometry, right_strip),
            )
        },
        || {
            rayon::join(
                || horizontal_timing_mark_gap_scan(img, threshold, geometry, top_strip),
                || horizontal_timing_mark_gap_scan(img, threshold, geometry, bottom_strip),
            )
        },
    );
    debug!(
        "timing mark gaps: left={}, right={}, top={}, bottom={}",
        left_gaps.len(),
        right_gaps.len(),
        top_gaps.len(),
        bottom_gaps.len()
    );

    debug.layer("gaps", img, &|canvas| {
        draw_gap_rects_debug_image_mut(canvas, &left_gaps, RED);
        draw_gap_rects_debug_image_mut(canvas, &right_gaps, CYAN);
        draw_gap_rects_debug_image_mut(canvas, &top_gaps, GREEN);
        draw_gap_rects_debug_image_mut(canvas, &bottom_gaps, BLUE);
    });

    let fit = |gaps: &[Rect], expected_angle: f32, tolerance: f32, side: BorderSide| {
        find_best_fit_line_segment(
            gaps,
            canvas_size,
            geometry.timing_mark_size,
            expected_angle,
            tolerance,
        )
        .ok_or(Error::MissingBorder { side })
    };

    let left = fit(&left_gaps, NINETY_DEGREES, MAX_ROTATION, BorderSide::Left)?;
    let right = fit(&right_gaps, NINETY_DEGREES, MAX_ROTATION, BorderSide::Right)?;

    let left_angle = normalize_angle(left.segment.angle());
    let right_angle = normalize_angle(right.segment.angle());
    if !check_approximately_colinear(left_angle, right_angle, MAX_ROTATION_ERROR) {
        return Err(Error::SidesNotParallel {
            left_angle: left_angle.to_degrees(),
            right_angle: right_angle.to_degrees(),
        });
    }

    let expected_horizontal_angle =
        normalize_angle((left_angle - NINETY_DEGREES + right_angle - NINETY_DEGREES) / 2.0);
    let top = fit(
        &top_gaps,
        expected_horizontal_angle,
        MAX_ROTATION_ERROR,
        BorderSide::Top,
    )?;
    let bottom = fit(
        &bottom_gaps,
        expected_horizontal_angle,
        MAX_ROTATION_ERROR,
        BorderSide::Bottom,
    )?;

    let lines = BorderLines {
        top,
        bottom,
        left,
        right,
    };

    let orientation = if lines.top.rects.len() >= lines.bottom.rects.len() {
        Orientation::Portrait
    } else {
        Orientation::PortraitReversed
    };
    info!(
        "page orientation is {:?} (top gaps: {}, bottom gaps: {})",
        orientation,
        lines.top.rects.len(),
        lines.bottom.rects.len()
    );

    let (lines, img) = match orientation {
        Orientation::Portrait => (lines, img.clone()),
        Orientation::PortraitReversed => (lines.rotate180(canvas_size), imageops::rotate180(img)),
    };

    debug.layer("border_lines", &img, &|canvas| {
        draw_border_lines_debug_image_mut(canvas, &lines);
    });

    let top_left_corner = intersection_of_lines(&lines.top.segment, &lines.left.segment, false)
        .ok_or_else(|| Error::Internal {
            message: "top and left border lines do not intersect".to_string(),
        })?;
    let top_right_corner = intersection_of_lines(&lines.top.segment, &lines.right.segment, false)
        .ok_or_else(|| Error::Internal {
            message: "top and right border lines do not intersect".to_string(),
        })?;

    // Gaps outside the corners come from things like the dark edge of the
    // paper rather than the border.
    let mut top_rects = compute_timing_marks_from_gaps(
        lines.top.rects.iter().filter(|gap| {
            gap.right() as f32 > top_left_corner.x && (gap.left() as f32) < top_right_corner.x
        }),
        geometry,
        MarkAxis::Horizontal,
    );
    let mut left_rects = compute_timing_marks_from_gaps(
        lines
            .left
            .rects
            .iter()
            .filter(|gap| gap.bottom() as f32 > top_left_corner.y),
        geometry,
        MarkAxis::Vertical,
    );
    let mut right_rects = compute_timing_marks_from_gaps(
        lines
            .right
            .rects
            .iter()
            .filter(|gap| gap.bottom() as f32 > top_right_corner.y),
        geometry,
        MarkAxis::Vertical,
    );

    let top_left_rect = resolve_corner(
        &img,
        &top_left_corner,
        left_rects.first(),
        top_rects.first(),
        geometry,
        threshold,
    )
    .ok_or_else(|| Error::Internal {
        message: format!("no timing mark at top left corner {:?}", top_left_corner),
    })?;
    if !contains(top_rects.first(), &top_left_corner) {
        top_rects.insert(0, top_left_rect);
    }
    if !contains(left_rects.first(), &top_left_corner) {
        left_rects.insert(0, top_left_rect);
    }

    let top_right_rect = resolve_corner(
        &img,
        &top_right_corner,
        right_rects.first(),
        top_rects.last(),
        geometry,
        threshold,
    )
    .ok_or_else(|| Error::Internal {
        message: format!("no timing mark at top right corner {:?}", top_right_corner),
    })?;
    if !contains(top_rects.last(), &top_right_corner) {
        top_rects.push(top_right_rect);
    }
    if !contains(right_rects.first(), &top_right_corner) {
        right_rects.insert(0, top_right_rect);
    }

    let bottom_left_rect = left_rects
        .iter()
        .max_by_key(|rect| rect.bottom())
        .copied()
        .ok_or_else(|| Error::Internal {
            message: "left border has no timing marks".to_string(),
        })?;
    let bottom_right_rect = right_rects
        .iter()
        .max_by_key(|rect| rect.bottom())
        .copied()
        .ok_or_else(|| Error::Internal {
            message: "right border has no timing marks".to_string(),
        })?;

    let bottom_rects = find_bottom_timing_marks_along_segment(
        &img,
        &Segment::new(
            center_of_rect(&bottom_left_rect),
            center_of_rect(&bottom_right_rect),
        ),
        geometry,
        threshold,
    );

    let partial_timing_marks = PartialTimingMarks {
        top_rects,
        bottom_rects,
        left_rects,
        right_rects,
        top_left_rect: Some(top_left_rect),
        top_right_rect: Some(top_right_rect),
        bottom_left_rect: Some(bottom_left_rect),
        bottom_right_rect: Some(bottom_right_rect),
    };
    debug!(
        "partial timing marks: top={}, bottom={}, left={}, right={}",
        partial_timing_marks.top_rects.len(),
        partial_timing_marks.bottom_rects.len(),
        partial_timing_marks.left_rects.len(),
        partial_timing_marks.right_rects.len()
    );

    debug.layer("partial_timing_marks", &img, &|canvas| {
        draw_partial_timing_marks_debug_image_mut(canvas, &partial_timing_marks);
    });

    let complete_timing_marks = complete_timing_marks(&partial_timing_marks, geometry)?;

    debug.layer("complete_timing_marks", &img, &|canvas| {
        draw_complete_timing_marks_debug_image_mut(
            canvas,
            &partial_timing_marks,
            &complete_timing_marks,
        );
    });

    let bits = read_metadata_bits(&partial_timing_marks, &complete_timing_marks)?;
    let metadata = decode_metadata_bits(&bits).map_err(Error::InvalidMetadata)?;
    info!("decoded page metadata: {:?}", metadata);

    let grid = compute_timing_mark_grid(&complete_timing_marks).map_err(|e| Error::Internal {
        message: e.to_string(),
    })?;

    debug.layer("timing_mark_grid", &img, &|canvas| {
        draw_timing_mark_grid_debug_image_mut(canvas, &grid);
    });

    Ok(TimingMarkGrid {
        geometry: *geometry,
        orientation,
        border_lines: lines,
        partial_timing_marks,
        complete_timing_marks,
        grid,
        metadata,
        image: img,
    })
}
