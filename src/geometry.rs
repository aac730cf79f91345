use std::f32::consts::PI;
use std::ops::{Add, Mul, Sub};

use serde::{Serialize, Serializer};

pub use imageproc::point::Point;
pub use imageproc::rect::Rect;

/// A displacement between two points. Kept distinct from `Point` so that the
/// two can't be mixed up by accident.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
}

impl Vector {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        self.x.hypot(self.y)
    }

    /// Angle of the vector in radians, in the range `(-π, π]`.
    pub fn angle(&self) -> f32 {
        self.y.atan2(self.x)
    }

    pub fn from_angle(angle: f32) -> Self {
        Self::new(angle.cos(), angle.sin())
    }
}

impl Add for Vector {
    type Output = Vector;

    fn add(self, other: Vector) -> Vector {
        Vector::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Vector {
    type Output = Vector;

    fn sub(self, other: Vector) -> Vector {
        Vector::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f32> for Vector {
    type Output = Vector;

    fn mul(self, scale: f32) -> Vector {
        Vector::new(self.x * scale, self.y * scale)
    }
}

impl Add<Vector> for Point<f32> {
    type Output = Point<f32>;

    fn add(self, vector: Vector) -> Point<f32> {
        Point::new(self.x + vector.x, self.y + vector.y)
    }
}

/// The vector pointing from `from` to `to`.
pub fn heading(from: &Point<f32>, to: &Point<f32>) -> Vector {
    Vector::new(to.x - from.x, to.y - from.y)
}

/// A line segment between two points. Geometrically directionless, but the
/// order matters when extending or walking along it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Segment {
    pub start: Point<f32>,
    pub end: Point<f32>,
}

impl Segment {
    pub const fn new(start: Point<f32>, end: Point<f32>) -> Self {
        Self { start, end }
    }

    pub fn vector(&self) -> Vector {
        heading(&self.start, &self.end)
    }

    pub fn length(&self) -> f32 {
        self.vector().length()
    }

    pub fn angle(&self) -> f32 {
        self.vector().angle()
    }

    /// Returns a segment with the same start and direction as this one but
    /// with the given length.
    pub fn with_length(&self, length: f32) -> Segment {
        let direction = Vector::from_angle(self.angle());
        Segment::new(self.start, self.start + direction * length)
    }

    /// Finds the point on this segment closest to `point`.
    pub fn closest_point_to(&self, point: &Point<f32>) -> Point<f32> {
        let vector = self.vector();
        let length_squared = vector.x * vector.x + vector.y * vector.y;
        if length_squared == 0.0 {
            return self.start;
        }

        let to_point = heading(&self.start, point);
        let t = ((to_point.x * vector.x + to_point.y * vector.y) / length_squared).clamp(0.0, 1.0);
        self.start + vector * t
    }

    pub fn rotate180(&self, canvas_size: (u32, u32)) -> Segment {
        Segment::new(
            rotate_point_180(&self.start, canvas_size),
            rotate_point_180(&self.end, canvas_size),
        )
    }
}

/// Finds the intersection of two lines. If `bounded` is true, the
/// intersection must lie within both segments, otherwise the segments are
/// treated as infinite lines. Returns `None` for parallel lines.
pub fn intersection_of_lines(
    segment1: &Segment,
    segment2: &Segment,
    bounded: bool,
) -> Option<Point<f32>> {
    let (p1, p2) = (segment1.start, segment1.end);
    let (p3, p4) = (segment2.start, segment2.end);
    let d = (p4.y - p3.y) * (p2.x - p1.x) - (p4.x - p3.x) * (p2.y - p1.y);
    if d == 0.0 {
        return None;
    }
    let u_a = ((p4.x - p3.x) * (p1.y - p3.y) - (p4.y - p3.y) * (p1.x - p3.x)) / d;
    let u_b = ((p2.x - p1.x) * (p1.y - p3.y) - (p2.y - p1.y) * (p1.x - p3.x)) / d;
    if !bounded || ((0.0..=1.0).contains(&u_a) && (0.0..=1.0).contains(&u_b)) {
        return Some(Point::new(
            p1.x + u_a * (p2.x - p1.x),
            p1.y + u_a * (p2.y - p1.y),
        ));
    }
    None
}

/// Extends the infinite line through `segment` so that it spans the canvas,
/// clipping it to the canvas bounds. Returns `None` if the line never enters
/// the canvas or the segment has no length.
pub fn extend_segment_to_bounds(segment: &Segment, canvas_size: (u32, u32)) -> Option<Segment> {
    let (width, height) = canvas_size;
    let vector = segment.vector();
    if vector.length() == 0.0 {
        return None;
    }

    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    let mut t_min = f32::NEG_INFINITY;
    let mut t_max = f32::INFINITY;

    // Liang-Barsky clipping against each pair of parallel canvas edges.
    for (p, q_min, q_max) in [
        (vector.x, -segment.start.x, max_x - segment.start.x),
        (vector.y, -segment.start.y, max_y - segment.start.y),
    ] {
        if p == 0.0 {
            if q_min > 0.0 || q_max < 0.0 {
                return None;
            }
            continue;
        }
        let (t0, t1) = if p > 0.0 {
            (q_min / p, q_max / p)
        } else {
            (q_max / p, q_min / p)
        };
        t_min = t_min.max(t0);
        t_max = t_max.min(t1);
    }

    if t_min > t_max {
        return None;
    }

    Some(Segment::new(
        segment.start + vector * t_min,
        segment.start + vector * t_max,
    ))
}

/// Smallest difference between two undirected line angles.
pub fn angle_diff(a: f32, b: f32) -> f32 {
    let diff = normalize_angle(a - b);
    diff.min(PI - diff)
}

/// Normalizes an angle to the half-open range `[0, π)`, i.e. treats lines as
/// undirected.
pub fn normalize_angle(angle: f32) -> f32 {
    let angle = angle.rem_euclid(PI);
    if angle >= PI {
        0.0
    } else {
        angle
    }
}

/// Whether two undirected line angles are within `tolerance` of each other.
pub fn check_approximately_colinear(a: f32, b: f32, tolerance: f32) -> bool {
    angle_diff(a, b) <= tolerance
}

pub fn distance_between_points(p1: &Point<f32>, p2: &Point<f32>) -> f32 {
    heading(p1, p2).length()
}

/// Center of a rect under the inclusive pixel convention, i.e. the midpoint
/// between the centers of its extreme pixels.
pub fn center_of_rect(rect: &Rect) -> Point<f32> {
    Point::new(
        (rect.left() + rect.right()) as f32 / 2.0,
        (rect.top() + rect.bottom()) as f32 / 2.0,
    )
}

/// Builds a rect of the given size centered on `center`, rounding to the
/// nearest pixel.
pub fn rect_centered_at(center: &Point<f32>, width: u32, height: u32) -> Rect {
    Rect::at(
        (center.x - (width as f32 - 1.0) / 2.0).round() as i32,
        (center.y - (height as f32 - 1.0) / 2.0).round() as i32,
    )
    .of_size(width.max(1), height.max(1))
}

/// Builds a rect from inclusive min/max coordinates.
pub fn rect_from_min_max(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Rect {
    Rect::at(min_x, min_y).of_size(
        (max_x - min_x + 1).max(1) as u32,
        (max_y - min_y + 1).max(1) as u32,
    )
}

pub fn rect_contains_point(rect: &Rect, point: &Point<f32>) -> bool {
    rect.left() as f32 <= point.x
        && point.x <= rect.right() as f32
        && rect.top() as f32 <= point.y
        && point.y <= rect.bottom() as f32
}

pub fn rects_overlap(a: &Rect, b: &Rect) -> bool {
    a.intersect(*b).is_some()
}

pub fn rotate_point_180(point: &Point<f32>, canvas_size: (u32, u32)) -> Point<f32> {
    let (width, height) = canvas_size;
    Point::new(
        (width as i32 - 1) as f32 - point.x,
        (height as i32 - 1) as f32 - point.y,
    )
}

pub fn rotate_rect_180(rect: &Rect, canvas_size: (u32, u32)) -> Rect {
    let (width, height) = canvas_size;
    rect_from_min_max(
        width as i32 - 1 - rect.right(),
        height as i32 - 1 - rect.bottom(),
        width as i32 - 1 - rect.left(),
        height as i32 - 1 - rect.top(),
    )
}

/// Gets the distances between the centers of adjacent rects.
pub fn distances_between_rects(rects: &[Rect]) -> Vec<f32> {
    rects
        .windows(2)
        .map(|w| distance_between_points(&center_of_rect(&w[0]), &center_of_rect(&w[1])))
        .collect()
}

/// Median of the given values, or `None` if there are none.
pub fn median(values: &[f32]) -> Option<f32> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted.get(sorted.len() / 2).copied()
}

/// Serializes a rect as `{ x, y, width, height }`.
pub fn serialize_rect<S>(rect: &Rect, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    #[derive(Serialize)]
    struct SerializedRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    }

    SerializedRect {
        x: rect.left(),
        y: rect.top(),
        width: rect.width(),
        height: rect.height(),
    }
    .serialize(serializer)
}

#[cfg(test)]
mod test {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_intersection_of_perpendicular_lines() {
        let horizontal = Segment::new(Point::new(0.0, 5.0), Point::new(10.0, 5.0));
        let vertical = Segment::new(Point::new(3.0, 0.0), Point::new(3.0, 1.0));
        let point = intersection_of_lines(&horizontal, &vertical, false).unwrap();
        assert!(approx_eq(point.x, 3.0));
        assert!(approx_eq(point.y, 5.0));

        // the vertical segment ends before reaching the horizontal one
        assert_eq!(intersection_of_lines(&horizontal, &vertical, true), None);
    }

    #[test]
    fn test_intersection_of_parallel_lines() {
        let a = Segment::new(Point::new(0.0, 0.0), Point::new(10.0, 0.0));
        let b = Segment::new(Point::new(0.0, 1.0), Point::new(10.0, 1.0));
        assert_eq!(intersection_of_lines(&a, &b, false), None);
    }

    #[test]
    fn test_normalize_angle() {
        assert!(approx_eq(normalize_angle(0.0), 0.0));
        assert!(approx_eq(normalize_angle(PI), 0.0));
        assert!(approx_eq(normalize_angle(-PI / 2.0), PI / 2.0));
        assert!(approx_eq(normalize_angle(3.0 * PI / 2.0), PI / 2.0));
    }

    #[test]
    fn test_angle_diff_wraps_around() {
        let almost_pi = PI - 1.0_f32.to_radians();
        assert!(approx_eq(angle_diff(almost_pi, 0.0), 1.0_f32.to_radians()));
        assert!(check_approximately_colinear(
            almost_pi,
            1.0_f32.to_radians(),
            3.0_f32.to_radians()
        ));
        assert!(!check_approximately_colinear(
            0.0,
            10.0_f32.to_radians(),
            3.0_f32.to_radians()
        ));
    }

    #[test]
    fn test_extend_segment_to_bounds() {
        let segment = Segment::new(Point::new(10.0, 50.0), Point::new(20.0, 50.0));
        let extended = extend_segment_to_bounds(&segment, (100, 200)).unwrap();
        assert!(approx_eq(extended.start.x, 0.0));
        assert!(approx_eq(extended.end.x, 99.0));
        assert!(approx_eq(extended.start.y, 50.0));

        let outside = Segment::new(Point::new(10.0, 500.0), Point::new(20.0, 500.0));
        assert_eq!(extend_segment_to_bounds(&outside, (100, 200)), None);
    }

    #[test]
    fn test_closest_point_on_segment() {
        let segment = Segment::new(Point::new(0.0, 0.0), Point::new(10.0, 0.0));
        let closest = segment.closest_point_to(&Point::new(4.0, 7.0));
        assert!(approx_eq(closest.x, 4.0));
        assert!(approx_eq(closest.y, 0.0));

        let clamped = segment.closest_point_to(&Point::new(-4.0, 7.0));
        assert!(approx_eq(clamped.x, 0.0));
    }

    #[test]
    fn test_rect_center_round_trip() {
        let rect = Rect::at(4, 94).of_size(38, 13);
        let center = center_of_rect(&rect);
        assert!(approx_eq(center.x, 22.5));
        assert!(approx_eq(center.y, 100.0));
        assert_eq!(rect_centered_at(&center, 38, 13), rect);
    }

    #[test]
    fn test_rotate_rect_twice_is_identity() {
        let rect = Rect::at(4, 94).of_size(38, 13);
        let rotated = rotate_rect_180(&rect, (1696, 2200));
        assert_eq!(rotated, rect_from_min_max(1654, 2093, 1691, 2105));
        assert_eq!(rotate_rect_180(&rotated, (1696, 2200)), rect);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[50.0, 100.0, 50.0, 50.0]), Some(50.0));
    }
}
