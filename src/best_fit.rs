use logging_timer::time;

use crate::{
    ballot_card::Size,
    geometry::{angle_diff, center_of_rect, extend_segment_to_bounds, Rect, Segment},
};

/// The dominant line along one edge of the card together with the rects that
/// lie on it.
#[derive(Debug, Clone, PartialEq)]
pub struct BestFitLine {
    /// The line spanning the whole canvas.
    pub segment: Segment,
    pub rects: Vec<Rect>,
}

impl BestFitLine {
    pub fn rotate180(&self, canvas_size: (u32, u32)) -> BestFitLine {
        BestFitLine {
            segment: self.segment.rotate180(canvas_size),
            rects: self
                .rects
                .iter()
                .map(|rect| crate::geometry::rotate_rect_180(rect, canvas_size))
                .collect(),
        }
    }
}

/// How far a rect's center sits from a line, measured separately along each
/// axis against the closest point on the line.
fn alignment_errors(line: &Segment, rect: &Rect) -> (f32, f32) {
    let center = center_of_rect(rect);
    let closest = line.closest_point_to(&center);
    ((closest.x - center.x).abs(), (closest.y - center.y).abs())
}

/// Contribution of a rect to a line's score: close to 2 for a rect centered
/// on the line, dropping towards -2 the further it strays.
fn alignment_weight(horizontal_error: f32, vertical_error: f32, mark_size: Size<f32>) -> f32 {
    (1.0 - horizontal_error / mark_size.width).clamp(-1.0, 1.0)
        + (1.0 - vertical_error / mark_size.height).clamp(-1.0, 1.0)
}

/// Finds the line through the centers of two of `rects`, extended across the
/// canvas, that best fits all of them.
///
/// Every pair of rects is tried, so this is O(n²) in candidate lines and
/// O(n³) overall. Edges carry tens of candidates, which keeps this cheap.
/// Lines whose angle is more than `angle_tolerance` from `expected_angle`
/// are skipped. When two lines score the same the first one found is kept.
#[time]
pub fn find_best_fit_line_segment(
    rects: &[Rect],
    canvas_size: (u32, u32),
    mark_size: Size<f32>,
    expected_angle: f32,
    angle_tolerance: f32,
) -> Option<BestFitLine> {
    let mut best: Option<(f32, Segment)> = None;

    for (i, first) in rects.iter().enumerate() {
        for second in &rects[i + 1..] {
            let candidate = Segment::new(center_of_rect(first), center_of_rect(second));
            if angle_diff(candidate.angle(), expected_angle) > angle_tolerance {
                continue;
            }

            let Some(line) = extend_segment_to_bounds(&candidate, canvas_size) else {
                continue;
            };

            let score: f32 = rects
                .iter()
                .map(|rect| {
                    let (horizontal_error, vertical_error) = alignment_errors(&line, rect);
                    alignment_weight(horizontal_error, vertical_error, mark_size)
                })
                .sum();

            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, line));
            }
        }
    }

    let (_, segment) = best?;
    let rects = rects
        .iter()
        .filter(|rect| {
            let (horizontal_error, vertical_error) = alignment_errors(&segment, rect);
            horizontal_error <= mark_size.width / 2.0 && vertical_error <= mark_size.height / 2.0
        })
        .copied()
        .collect();

    Some(BestFitLine { segment, rects })
}

#[cfg(test)]
mod test {
    use std::f32::consts::PI;

    use proptest::prelude::*;

    use super::*;

    const MARK_SIZE: Size<f32> = Size {
        width: 37.5,
        height: 12.5,
    };

    fn column_of_gaps(count: i32) -> Vec<Rect> {
        (0..count)
            .map(|i| Rect::at(4, 107 + 50 * i).of_size(38, 37))
            .collect()
    }

    #[test]
    fn test_best_fit_rejects_offset_rect() {
        let mut rects = column_of_gaps(10);
        let outlier = Rect::at(4 + 60, 107 + 50 * 4 + 25).of_size(38, 37);
        rects.insert(5, outlier);

        let best_fit = find_best_fit_line_segment(
            &rects,
            (1696, 2200),
            MARK_SIZE,
            PI / 2.0,
            5.0_f32.to_radians(),
        )
        .unwrap();

        assert_eq!(best_fit.rects, column_of_gaps(10));
        assert!((best_fit.segment.start.x - 22.5).abs() < 0.01);
        assert!((best_fit.segment.end.x - 22.5).abs() < 0.01);
    }

    #[test]
    fn test_best_fit_respects_expected_angle() {
        let rects = column_of_gaps(5);
        assert_eq!(
            find_best_fit_line_segment(
                &rects,
                (1696, 2200),
                MARK_SIZE,
                0.0,
                3.0_f32.to_radians()
            ),
            None
        );
    }

    #[test]
    fn test_best_fit_needs_two_rects() {
        assert_eq!(
            find_best_fit_line_segment(
                &column_of_gaps(1),
                (1696, 2200),
                MARK_SIZE,
                PI / 2.0,
                5.0_f32.to_radians()
            ),
            None
        );
    }

    #[test]
    fn test_best_fit_rotates_with_canvas() {
        let canvas_size = (1696, 2200);
        let best_fit = find_best_fit_line_segment(
            &column_of_gaps(3),
            canvas_size,
            MARK_SIZE,
            PI / 2.0,
            5.0_f32.to_radians(),
        )
        .unwrap();
        assert_eq!(best_fit.rotate180(canvas_size).rotate180(canvas_size), best_fit);
    }

    proptest! {
        #[test]
        fn prop_best_fit_keeps_collinear_rects(
            x in 0i32..100,
            count in 3i32..20,
            offset in 60i32..200,
            outlier_index in 0i32..20,
        ) {
            let collinear: Vec<Rect> = (0..count)
                .map(|i| Rect::at(x, 107 + 50 * i).of_size(38, 37))
                .collect();
            let mut rects = collinear.clone();
            rects.push(Rect::at(x + offset, 107 + 50 * (outlier_index % count)).of_size(38, 37));

            let best_fit = find_best_fit_line_segment(
                &rects,
                (1696, 2200),
                MARK_SIZE,
                PI / 2.0,
                5.0_f32.to_radians(),
            ).unwrap();

            prop_assert_eq!(best_fit.rects, collinear);
        }
    }
}
