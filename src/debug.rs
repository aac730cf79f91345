use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::{
    draw_cross_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut, text_size,
};
use log::warn;
use rusttype::{Font, Scale};

use crate::{
    geometry::{Point, Rect, Segment},
    grid::PossibleOptionBubblesGrid,
    image_utils::{BLUE, CYAN, DARK_BLUE, DARK_GREEN, GREEN, ORANGE, PINK, RED, WHITE_RGB},
    ovals::ScoredOvalMarks,
    timing_marks::{BorderLines, CompleteTimingMarks, PartialTimingMarks},
};

/// Drawing surface handed to visualization callbacks.
pub trait Canvas {
    fn rect(&mut self, rect: Rect, color: Rgb<u8>);
    fn filled_rect(&mut self, rect: Rect, color: Rgb<u8>);
    fn line(&mut self, segment: &Segment, color: Rgb<u8>);
    fn cross(&mut self, point: &Point<f32>, color: Rgb<u8>);
    fn text(&mut self, x: i32, y: i32, text: &str, color: Rgb<u8>);
}

/// Receives diagnostic drawings from the interpreter. Each layer is drawn on
/// top of the image the interpreter was looking at when it produced it.
///
/// Implementations must not affect interpretation; `NoDebug` simply never
/// calls `draw`.
pub trait DebugSink: Sync {
    fn layer(&self, label: &str, background: &GrayImage, draw: &dyn Fn(&mut dyn Canvas));
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDebug;

impl DebugSink for NoDebug {
    fn layer(&self, _label: &str, _background: &GrayImage, _draw: &dyn Fn(&mut dyn Canvas)) {}
}

/// Writes each layer as a PNG next to the source image.
#[derive(Debug, Clone)]
pub struct ImageDebugWriter {
    base_path: PathBuf,
    font_bytes: Option<Vec<u8>>,
}

impl ImageDebugWriter {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            font_bytes: None,
        }
    }

    /// Enables text labels using the given TrueType font.
    pub fn with_font(mut self, font_bytes: Vec<u8>) -> Self {
        self.font_bytes = Some(font_bytes);
        self
    }
}

impl DebugSink for ImageDebugWriter {
    fn layer(&self, label: &str, background: &GrayImage, draw: &dyn Fn(&mut dyn Canvas)) {
        let mut canvas = RgbCanvas {
            image: DynamicImage::ImageLuma8(background.clone()).to_rgb8(),
            font: self
                .font_bytes
                .as_ref()
                .and_then(|bytes| Font::try_from_vec(bytes.clone())),
        };
        draw(&mut canvas);

        let path = debug_image_path(&self.base_path, label);
        match canvas.image.save(&path) {
            Ok(()) => log::debug!("wrote debug image: {}", path.display()),
            Err(e) => warn!("failed to write debug image {}: {}", path.display(), e),
        }
    }
}

struct RgbCanvas {
    image: RgbImage,
    font: Option<Font<'static>>,
}

const FONT_SCALE: f32 = 20.0;

impl Canvas for RgbCanvas {
    fn rect(&mut self, rect: Rect, color: Rgb<u8>) {
        draw_hollow_rect_mut(&mut self.image, rect, color);
    }

    fn filled_rect(&mut self, rect: Rect, color: Rgb<u8>) {
        draw_filled_rect_mut(&mut self.image, rect, color);
    }

    fn line(&mut self, segment: &Segment, color: Rgb<u8>) {
        draw_line_segment_mut(
            &mut self.image,
            (segment.start.x, segment.start.y),
            (segment.end.x, segment.end.y),
            color,
        );
    }

    fn cross(&mut self, point: &Point<f32>, color: Rgb<u8>) {
        draw_cross_mut(
            &mut self.image,
            color,
            point.x.round() as i32,
            point.y.round() as i32,
        );
    }

    fn text(&mut self, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let scale = Scale::uniform(FONT_SCALE);
        let (text_width, text_height) = text_size(scale, font, text);
        if text_width > 0 && text_height > 0 {
            draw_filled_rect_mut(
                &mut self.image,
                Rect::at(x, y).of_size(text_width as u32, text_height as u32),
                WHITE_RGB,
            );
        }
        draw_text_mut(&mut self.image, color, x, y, scale, font, text);
    }
}

/// Creates a path for a debug image.
pub fn debug_image_path(base: &Path, label: &str) -> PathBuf {
    let mut result = PathBuf::from(base);
    result.set_file_name(format!(
        "{}_debug_{}.png",
        base.file_stem()
            .unwrap_or_default()
            .to_string_lossy(),
        label
    ));
    result
}

/// Outlines the strips along each edge that are searched for timing marks.
pub fn draw_search_inset_debug_image_mut(canvas: &mut dyn Canvas, strips: &[Rect]) {
    for strip in strips {
        canvas.rect(*strip, RED);
    }
}

/// Draws candidate gap rectangles found by scanning the edges.
pub fn draw_gap_rects_debug_image_mut(canvas: &mut dyn Canvas, gaps: &[Rect], color: Rgb<u8>) {
    for gap in gaps {
        canvas.filled_rect(*gap, color);
    }
}

/// Draws the best fit line along each edge and the rects supporting it.
pub fn draw_border_lines_debug_image_mut(canvas: &mut dyn Canvas, lines: &BorderLines) {
    for (line, color) in [
        (&lines.top, GREEN),
        (&lines.bottom, BLUE),
        (&lines.left, RED),
        (&lines.right, CYAN),
    ] {
        for rect in &line.rects {
            canvas.filled_rect(*rect, color);
        }
        canvas.line(&line.segment, color);
    }
}

fn draw_edges_mut(
    canvas: &mut dyn Canvas,
    top: &[Rect],
    bottom: &[Rect],
    left: &[Rect],
    right: &[Rect],
) {
    for (rects, color) in [(top, GREEN), (bottom, BLUE), (left, RED), (right, CYAN)] {
        for rect in rects {
            canvas.filled_rect(*rect, color);
        }
    }
}

/// Draws the timing marks found along each edge, highlighting the corners.
pub fn draw_partial_timing_marks_debug_image_mut(
    canvas: &mut dyn Canvas,
    partial_timing_marks: &PartialTimingMarks,
) {
    draw_edges_mut(
        canvas,
        &partial_timing_marks.top_rects,
        &partial_timing_marks.bottom_rects,
        &partial_timing_marks.left_rects,
        &partial_timing_marks.right_rects,
    );

    for corner in [
        partial_timing_marks.top_left_rect,
        partial_timing_marks.top_right_rect,
        partial_timing_marks.bottom_left_rect,
        partial_timing_marks.bottom_right_rect,
    ]
    .into_iter()
    .flatten()
    {
        canvas.filled_rect(corner, PINK);
    }
}

/// Draws the complete timing marks, outlining the ones that were inferred.
pub fn draw_complete_timing_marks_debug_image_mut(
    canvas: &mut dyn Canvas,
    partial_timing_marks: &PartialTimingMarks,
    complete_timing_marks: &CompleteTimingMarks,
) {
    draw_edges_mut(
        canvas,
        &complete_timing_marks.top_rects,
        &complete_timing_marks.bottom_rects,
        &complete_timing_marks.left_rects,
        &complete_timing_marks.right_rects,
    );

    let found = [
        &partial_timing_marks.top_rects,
        &partial_timing_marks.bottom_rects,
        &partial_timing_marks.left_rects,
        &partial_timing_marks.right_rects,
    ];
    let completed = [
        &complete_timing_marks.top_rects,
        &complete_timing_marks.bottom_rects,
        &complete_timing_marks.left_rects,
        &complete_timing_marks.right_rects,
    ];
    for (found, completed) in found.iter().zip(completed.iter()) {
        for rect in completed.iter().filter(|rect| !found.contains(rect)) {
            canvas.rect(*rect, ORANGE);
        }
    }
}

/// Draws a debug image showing all the points of the timing mark grid.
pub fn draw_timing_mark_grid_debug_image_mut(
    canvas: &mut dyn Canvas,
    grid: &PossibleOptionBubblesGrid,
) {
    for row in grid.rows() {
        for point in row {
            canvas.cross(point, PINK);
        }
    }
}

/// Draws a debug image outlining all the scored oval marks.
pub fn draw_scored_oval_marks_debug_image_mut(
    canvas: &mut dyn Canvas,
    scored_oval_marks: &ScoredOvalMarks,
) {
    for (grid_position, scored_oval_mark) in scored_oval_marks {
        let Some(scored_oval_mark) = scored_oval_mark else {
            continue;
        };

        canvas.rect(scored_oval_mark.expected_bounds, DARK_BLUE);
        canvas.rect(scored_oval_mark.bounds, DARK_GREEN);

        let mut option_text = grid_position.to_string();
        option_text.truncate(25);
        canvas.text(
            scored_oval_mark.bounds.right() + 5,
            scored_oval_mark.bounds.top(),
            &format!("{} {}", option_text, scored_oval_mark.score),
            DARK_GREEN,
        );
    }
}
