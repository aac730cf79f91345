use logging_timer::time;

use crate::geometry::{
    center_of_rect, distance_between_points, distances_between_rects, heading, median,
    rect_centered_at, Rect,
};

/// Fills in the timing marks missing between consecutive `rects`, which must
/// already be sorted along their edge.
///
/// Marks are expected every `expected_spacing` pixels, defaulting to the
/// median distance between neighboring rects. Wherever two neighbors are
/// `n` spacings apart, `n - 1` evenly spaced rects are inserted between them,
/// each sized as the rounded average of the two neighbors.
#[time]
pub fn interpolate_missing_timing_marks(
    rects: &[Rect],
    expected_spacing: Option<f32>,
) -> Vec<Rect> {
    if rects.len() < 2 {
        return rects.to_vec();
    }

    let spacing = match expected_spacing.or_else(|| median(&distances_between_rects(rects))) {
        Some(spacing) if spacing > 0.0 => spacing,
        _ => return rects.to_vec(),
    };

    let mut result = vec![rects[0]];

    for pair in rects.windows(2) {
        let (previous, next) = (pair[0], pair[1]);
        let previous_center = center_of_rect(&previous);
        let next_center = center_of_rect(&next);
        let distance = distance_between_points(&previous_center, &next_center);
        let steps = (distance / spacing).round() as u32;

        if steps > 1 {
            let direction = heading(&previous_center, &next_center);
            let width = ((previous.width() + next.width()) as f32 / 2.0).round() as u32;
            let height = ((previous.height() + next.height()) as f32 / 2.0).round() as u32;

            for step in 1..steps {
                let center = previous_center + direction * (step as f32 / steps as f32);
                result.push(rect_centered_at(&center, width, height));
            }
        }

        result.push(next);
    }

    result
}
