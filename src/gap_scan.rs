use image::GrayImage;
use logging_timer::time;

use crate::{
    ballot_card::BallotCardGeometry,
    geometry::{rect_from_min_max, rects_overlap, Rect},
    image_utils::is_dark,
};

/// Direction timing marks are laid out along an edge. Top and bottom marks
/// run horizontally, left and right marks run vertically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkAxis {
    Horizontal,
    Vertical,
}

/// Inclusive pixel range of a gap along a single scanline.
type Range = (i32, i32);

struct ScanlineGroup {
    start: i32,
    ranges: Vec<Range>,
}

fn is_foreground(img: &GrayImage, threshold: u8, x: i32, y: i32) -> bool {
    is_dark(img.get_pixel(x as u32, y as u32)[0], threshold)
}

/// Clips `strip` to the image, returning `None` if nothing is left.
fn clip_to_image(img: &GrayImage, strip: Rect) -> Option<Rect> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    strip.intersect(Rect::at(0, 0).of_size(width, height))
}

/// Groups gap ranges from consecutive scanlines whose ends are all within
/// `tolerance` of the previous scanline's range.
fn group_scanline_ranges(
    ranges_by_scanline: &[(i32, Vec<Range>)],
    tolerance: i32,
) -> Vec<ScanlineGroup> {
    let mut groups: Vec<ScanlineGroup> = vec![];

    for (scanline, ranges) in ranges_by_scanline {
        for &(min, max) in ranges {
            let existing = groups.iter_mut().find(|group| {
                if *scanline != group.start + group.ranges.len() as i32 {
                    return false;
                }
                group.ranges.last().map_or(false, |&(last_min, last_max)| {
                    (last_min - min).abs() <= tolerance && (last_max - max).abs() <= tolerance
                })
            });

            match existing {
                Some(group) => group.ranges.push((min, max)),
                None => groups.push(ScanlineGroup {
                    start: *scanline,
                    ranges: vec![(min, max)],
                }),
            }
        }
    }

    groups
}

/// Bounding box of a group: `(along_min, along_max, across_min, across_max)`
/// where "along" is the scanline direction.
fn group_bounds(group: &ScanlineGroup) -> (i32, i32, i32, i32) {
    let along_min = group.ranges.iter().map(|(min, _)| *min).min().unwrap_or(0);
    let along_max = group.ranges.iter().map(|(_, max)| *max).max().unwrap_or(0);
    (
        along_min,
        along_max,
        group.start,
        group.start + group.ranges.len() as i32 - 1,
    )
}

/// Joins gaps that sit side by side across the scan direction and overlap
/// along it. A skewed mark edge can split the scanlines of one gap into a
/// thin sliver next to the rest of it.
fn merge_touching_gaps(gaps: Vec<Rect>, axis: MarkAxis) -> Vec<Rect> {
    let touching = |a: &Rect, b: &Rect| {
        let overlap_x = a.left() <= b.right() && b.left() <= a.right();
        let overlap_y = a.top() <= b.bottom() && b.top() <= a.bottom();
        let adjacent_x = a.left() <= b.right() + 1 && b.left() <= a.right() + 1;
        let adjacent_y = a.top() <= b.bottom() + 1 && b.top() <= a.bottom() + 1;
        match axis {
            MarkAxis::Vertical => overlap_y && adjacent_x,
            MarkAxis::Horizontal => overlap_x && adjacent_y,
        }
    };

    let mut merged: Vec<Rect> = vec![];
    for gap in gaps {
        match merged.iter_mut().find(|existing| touching(existing, &gap)) {
            Some(existing) => {
                *existing = rect_from_min_max(
                    existing.left().min(gap.left()),
                    existing.top().min(gap.top()),
                    existing.right().max(gap.right()),
                    existing.bottom().max(gap.bottom()),
                );
            }
            None => merged.push(gap),
        }
    }
    merged
}

fn within(value: u32, expected: f32, error: f32) -> bool {
    let value = value as f32;
    value >= expected - error && value <= expected + error
}

/// Scans each column of `strip` top to bottom for the pattern of a timing
/// mark, a gap, then another timing mark. Returns rects covering the gaps
/// between vertically stacked timing marks, i.e. along the left and right
/// edges of the card.
#[time]
pub fn vertical_timing_mark_gap_scan(
    img: &GrayImage,
    threshold: u8,
    geometry: &BallotCardGeometry,
    strip: Rect,
) -> Vec<Rect> {
    let Some(strip) = clip_to_image(img, strip) else {
        return vec![];
    };

    let mark_size = geometry.timing_mark_size;
    // side gaps are about as tall as a timing mark is wide
    let gap_width = mark_size.width;
    let gap_height = mark_size.width;
    let mark_height = mark_size.height.round() as i32;
    let period = (mark_size.height + gap_height).round() as i32;
    let half_period = (period as f32 / 2.0).round() as i32;
    let min_run = (mark_size.height / 2.0).round() as i32;
    let max_run = (mark_size.height * 3.0 / 2.0).round() as i32;

    let mut ranges_by_x = vec![];
    for x in strip.left()..=strip.right() {
        let mut ranges = vec![];
        let mut gap_start: Option<i32> = None;
        let mut y_lo = strip.top();

        while y_lo + period <= strip.bottom() {
            let lo = is_foreground(img, threshold, x, y_lo);
            let mid = is_foreground(img, threshold, x, y_lo + half_period);
            let hi = is_foreground(img, threshold, x, y_lo + period);

            if lo && !mid && hi {
                gap_start.get_or_insert(y_lo + mark_height);
            } else if let Some(start) = gap_start.take() {
                // the run is bounded by how tall the timing mark is
                let run = y_lo + mark_height - start + 1;
                if (min_run..=max_run).contains(&run) {
                    ranges.push((start, y_lo + period - 1 - mark_height));
                }
            }

            y_lo += 1;
        }

        if !ranges.is_empty() {
            ranges_by_x.push((x, ranges));
        }
    }

    let tolerance = (mark_size.height / 3.0).ceil() as i32;
    let allowed_width_error = (gap_width * 0.5).round();
    let allowed_height_error = (gap_height * 0.5).round();
    let image_right = img.width() as i32 - 1;

    let gaps = group_scanline_ranges(&ranges_by_x, tolerance)
        .iter()
        .map(|group| {
            let (min_y, max_y, min_x, max_x) = group_bounds(group);
            rect_from_min_max(min_x, min_y, max_x, max_y)
        })
        .collect();

    merge_touching_gaps(gaps, MarkAxis::Vertical)
        .into_iter()
        .filter(|gap| {
            // marks cut off by the edge of a cropped scan leave narrow gaps
            let clipped = gap.left() == 0 || gap.right() == image_right;
            within(gap.height(), gap_height, allowed_height_error)
                && (clipped || within(gap.width(), gap_width, allowed_width_error))
        })
        .collect()
}

/// Scans each row of `strip` left to right for the pattern of a timing mark,
/// a gap, then another timing mark. Returns rects covering the gaps between
/// horizontally adjacent timing marks, i.e. along the top and bottom edges.
#[time]
pub fn horizontal_timing_mark_gap_scan(
    img: &GrayImage,
    threshold: u8,
    geometry: &BallotCardGeometry,
    strip: Rect,
) -> Vec<Rect> {
    let Some(strip) = clip_to_image(img, strip) else {
        return vec![];
    };

    let mark_size = geometry.timing_mark_size;
    // top and bottom gaps are about as wide as a timing mark is tall
    let gap_width = mark_size.height;
    let gap_height = mark_size.height;
    let period = (mark_size.width + gap_width).round() as i32;
    let half_period = (period as f32 / 2.0).round() as i32;
    let min_run = (gap_width / 2.0).round() as i32;
    let max_run = (gap_width * 3.0 / 2.0).round() as i32;

    let mut ranges_by_y = vec![];
    for y in strip.top()..=strip.bottom() {
        let mut ranges = vec![];
        let mut gap_start: Option<i32> = None;
        let mut x_lo = strip.left();

        while x_lo + period <= strip.right() {
            let x_mid = x_lo + half_period;
            let lo = is_foreground(img, threshold, x_lo, y);
            let mid = is_foreground(img, threshold, x_mid, y);
            let hi = is_foreground(img, threshold, x_lo + period, y);

            if lo && !mid && hi {
                gap_start.get_or_insert(x_mid);
            } else if let Some(start) = gap_start.take() {
                // the run is bounded by how wide the gap is
                let run = x_mid - start + 1;
                if (min_run..=max_run).contains(&run) {
                    ranges.push((start, x_mid - 1));
                }
            }

            x_lo += 1;
        }

        if !ranges.is_empty() {
            ranges_by_y.push((y, ranges));
        }
    }

    let tolerance = (mark_size.width / 3.0).ceil() as i32;
    let allowed_width_error = (gap_width * 0.5).ceil();
    let allowed_height_error = (gap_height * 0.5).ceil();

    let gaps = group_scanline_ranges(&ranges_by_y, tolerance)
        .iter()
        .map(|group| {
            let (min_x, max_x, min_y, max_y) = group_bounds(group);
            rect_from_min_max(min_x, min_y, max_x, max_y)
        })
        .collect();

    merge_touching_gaps(gaps, MarkAxis::Horizontal)
        .into_iter()
        .filter(|gap| {
            within(gap.width(), gap_width, allowed_width_error)
                && within(gap.height(), gap_height, allowed_height_error)
        })
        .collect()
}

/// Converts gaps into the timing marks on either side of them. Marks that
/// overlap one already found are skipped, and the result is sorted along
/// `axis`.
pub fn compute_timing_marks_from_gaps<'a>(
    gaps: impl IntoIterator<Item = &'a Rect>,
    geometry: &BallotCardGeometry,
    axis: MarkAxis,
) -> Vec<Rect> {
    let mark_width = geometry.timing_mark_size.width.round() as i32;
    let mark_height = geometry.timing_mark_size.height.round() as i32;
    let mut timing_marks: Vec<Rect> = vec![];

    let mut add_timing_mark = |rect: Rect| {
        if !timing_marks.iter().any(|existing| rects_overlap(existing, &rect)) {
            timing_marks.push(rect);
        }
    };

    for gap in gaps {
        match axis {
            MarkAxis::Horizontal => {
                add_timing_mark(rect_from_min_max(
                    gap.left() - mark_width,
                    gap.top(),
                    gap.left() - 1,
                    gap.bottom(),
                ));
                add_timing_mark(rect_from_min_max(
                    gap.right() + 1,
                    gap.top(),
                    gap.right() + mark_width,
                    gap.bottom(),
                ));
            }
            MarkAxis::Vertical => {
                add_timing_mark(rect_from_min_max(
                    gap.left(),
                    gap.top() - mark_height,
                    gap.right(),
                    gap.top() - 1,
                ));
                add_timing_mark(rect_from_min_max(
                    gap.left(),
                    gap.bottom() + 1,
                    gap.right(),
                    gap.bottom() + mark_height,
                ));
            }
        }
    }

    match axis {
        MarkAxis::Horizontal => timing_marks.sort_by_key(|rect| rect.left()),
        MarkAxis::Vertical => timing_marks.sort_by_key(|rect| rect.top()),
    }
    timing_marks
}

#[cfg(test)]
mod test {
    use imageproc::drawing::draw_filled_rect_mut;

    use super::*;
    use crate::{
        ballot_card::get_scanned_ballot_card_geometry_8pt5x11,
        image_utils::{BLACK, WHITE},
    };

    fn mark_row(count: i32) -> Vec<Rect> {
        (0..count)
            .map(|i| Rect::at(4 + 50 * i, 94).of_size(38, 13))
            .collect()
    }

    fn mark_column(count: i32) -> Vec<Rect> {
        (0..count)
            .map(|i| Rect::at(4, 94 + 50 * i).of_size(38, 13))
            .collect()
    }

    fn draw(width: u32, height: u32, marks: &[Rect]) -> GrayImage {
        let mut img = GrayImage::from_pixel(width, height, WHITE);
        for mark in marks {
            draw_filled_rect_mut(&mut img, *mark, BLACK);
        }
        img
    }

    #[test]
    fn test_horizontal_scan_finds_gaps_and_marks() {
        let geometry = get_scanned_ballot_card_geometry_8pt5x11();
        let marks = mark_row(34);
        let img = draw(1696, 150, &marks);

        let gaps = horizontal_timing_mark_gap_scan(
            &img,
            0,
            &geometry,
            Rect::at(0, 0).of_size(1696, 150),
        );
        assert_eq!(gaps.len(), 33);
        assert_eq!(gaps[0], rect_from_min_max(42, 94, 53, 106));

        let found = compute_timing_marks_from_gaps(&gaps, &geometry, MarkAxis::Horizontal);
        assert_eq!(found, marks);
    }

    #[test]
    fn test_vertical_scan_finds_gaps_and_marks() {
        let geometry = get_scanned_ballot_card_geometry_8pt5x11();
        let marks = mark_column(41);
        let img = draw(113, 2200, &marks);

        let gaps = vertical_timing_mark_gap_scan(
            &img,
            0,
            &geometry,
            Rect::at(0, 0).of_size(113, 2200),
        );
        assert_eq!(gaps.len(), 40);
        assert_eq!(gaps[0], rect_from_min_max(4, 107, 41, 143));

        let found = compute_timing_marks_from_gaps(&gaps, &geometry, MarkAxis::Vertical);
        assert_eq!(found, marks);
    }

    #[test]
    fn test_sliver_beside_a_gap_is_merged_into_it() {
        let geometry = get_scanned_ballot_card_geometry_8pt5x11();
        let mut img = draw(113, 300, &mark_column(3));
        // one more column holding all of the upper mark but only the bottom
        // of the lower one, as along the edge of a skewed mark
        draw_filled_rect_mut(&mut img, Rect::at(42, 94).of_size(1, 13), BLACK);
        draw_filled_rect_mut(&mut img, Rect::at(42, 151).of_size(1, 6), BLACK);

        let gaps = vertical_timing_mark_gap_scan(
            &img,
            0,
            &geometry,
            Rect::at(0, 0).of_size(113, 300),
        );
        assert_eq!(
            gaps,
            vec![
                rect_from_min_max(4, 107, 42, 143),
                rect_from_min_max(4, 157, 41, 193),
            ]
        );
    }

    #[test]
    fn test_narrow_gaps_are_dropped_unless_clipped() {
        let geometry = get_scanned_ballot_card_geometry_8pt5x11();
        let narrow: Vec<Rect> = (0..3)
            .map(|i| Rect::at(60, 94 + 50 * i).of_size(11, 13))
            .collect();
        let img = draw(113, 300, &narrow);
        assert!(vertical_timing_mark_gap_scan(
            &img,
            0,
            &geometry,
            Rect::at(0, 0).of_size(113, 300)
        )
        .is_empty());

        // the same marks hanging off the left edge of the scan
        let clipped: Vec<Rect> = (0..3)
            .map(|i| Rect::at(-27, 94 + 50 * i).of_size(38, 13))
            .collect();
        let img = draw(113, 300, &clipped);
        let gaps = vertical_timing_mark_gap_scan(
            &img,
            0,
            &geometry,
            Rect::at(0, 0).of_size(113, 300),
        );
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0], rect_from_min_max(0, 107, 10, 143));
    }

    #[test]
    fn test_missing_marks_leave_no_gap() {
        let geometry = get_scanned_ballot_card_geometry_8pt5x11();
        let mut marks = mark_row(10);
        marks.remove(5);
        let img = draw(600, 150, &marks);

        let gaps = horizontal_timing_mark_gap_scan(
            &img,
            0,
            &geometry,
            Rect::at(0, 0).of_size(600, 150),
        );
        // two gaps on either side of the missing mark are gone
        assert_eq!(gaps.len(), 7);
    }

    #[test]
    fn test_blank_strip_has_no_gaps() {
        let geometry = get_scanned_ballot_card_geometry_8pt5x11();
        let img = GrayImage::from_pixel(200, 200, WHITE);
        assert!(vertical_timing_mark_gap_scan(
            &img,
            0,
            &geometry,
            Rect::at(0, 0).of_size(200, 200)
        )
        .is_empty());
        // strips outside the image are ignored
        assert!(horizontal_timing_mark_gap_scan(
            &img,
            0,
            &geometry,
            Rect::at(500, 500).of_size(10, 10)
        )
        .is_empty());
    }

    #[test]
    fn test_overlapping_marks_from_gaps_are_merged() {
        let geometry = get_scanned_ballot_card_geometry_8pt5x11();
        let gaps = [
            rect_from_min_max(42, 94, 53, 106),
            rect_from_min_max(43, 94, 54, 106),
        ];
        let marks = compute_timing_marks_from_gaps(&gaps, &geometry, MarkAxis::Horizontal);
        assert_eq!(marks.len(), 2);
    }
}
