use std::fmt::Display;

use logging_timer::time;

use crate::{
    geometry::{center_of_rect, intersection_of_lines, Point, Rect, Segment, Vector},
    timing_marks::CompleteTimingMarks,
};

/// Centers of every possible oval position inside the timing mark border,
/// indexed `[row][column]` with the border rows and columns left out.
#[derive(Debug, Clone, PartialEq)]
pub struct PossibleOptionBubblesGrid {
    rows: Vec<Vec<Point<f32>>>,
}

impl PossibleOptionBubblesGrid {
    pub fn rows(&self) -> &[Vec<Point<f32>>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Looks up a point by its timing mark coordinates, where column 0 and
    /// row 0 are the left and top border. Border locations have no point.
    pub fn point_for_location(&self, column: u32, row: u32) -> Option<Point<f32>> {
        let column = (column as usize).checked_sub(1)?;
        let row = (row as usize).checked_sub(1)?;
        self.rows.get(row)?.get(column).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GridError {
    MismatchedBorders {
        top: usize,
        bottom: usize,
        left: usize,
        right: usize,
    },
    ParallelLines {
        column: usize,
        row: usize,
    },
}

impl Display for GridError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GridError::MismatchedBorders {
                top,
                bottom,
                left,
                right,
            } => write!(
                f,
                "timing mark borders do not match: top={}, bottom={}, left={}, right={}",
                top, bottom, left, right
            ),
            GridError::ParallelLines { column, row } => write!(
                f,
                "lines for column {} and row {} never intersect",
                column, row
            ),
        }
    }
}

impl std::error::Error for GridError {}

/// Angle of the line through the centers of two opposing timing marks.
fn angle_between(from: &Rect, to: &Rect) -> f32 {
    let from = center_of_rect(from);
    let to = center_of_rect(to);
    (to.y - from.y).atan2(to.x - from.x)
}

fn line_through(point: Point<f32>, angle: f32) -> Segment {
    Segment::new(point, point + Vector::from_angle(angle))
}

/// Computes the center of every interior grid position by intersecting the
/// line down each column with the line across each row. Every row and
/// column gets its own angle so that a slightly warped page still lines up.
#[time]
pub fn compute_timing_mark_grid(
    timing_marks: &CompleteTimingMarks,
) -> Result<PossibleOptionBubblesGrid, GridError> {
    let top = &timing_marks.top_rects;
    let bottom = &timing_marks.bottom_rects;
    let left = &timing_marks.left_rects;
    let right = &timing_marks.right_rects;

    if top.len() != bottom.len() || left.len() != right.len() || top.len() < 2 || left.len() < 2 {
        return Err(GridError::MismatchedBorders {
            top: top.len(),
            bottom: bottom.len(),
            left: left.len(),
            right: right.len(),
        });
    }

    let column_lines: Vec<Segment> = top
        .iter()
        .zip(bottom)
        .map(|(top, bottom)| line_through(center_of_rect(top), angle_between(top, bottom)))
        .collect();
    let row_lines: Vec<Segment> = left
        .iter()
        .zip(right)
        .map(|(left, right)| line_through(center_of_rect(left), angle_between(left, right)))
        .collect();

    let rows = (1..row_lines.len() - 1)
        .map(|row| {
            (1..column_lines.len() - 1)
                .map(|column| {
                    intersection_of_lines(&column_lines[column], &row_lines[row], false)
                        .ok_or(GridError::ParallelLines { column, row })
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PossibleOptionBubblesGrid { rows })
}
