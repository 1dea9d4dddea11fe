//! Geometry primitives and spatial searches.
//!
//! Everything here is pure: points, rectangles, directions and the two
//! nearest-candidate searches used for focus and monitor navigation.

/// A point in screen (or absolute) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::ops::Add for Point {
    type Output = Point;

    fn add(self, o: Point) -> Point {
        Point::new(self.x + o.x, self.y + o.y)
    }
}

impl std::ops::Sub for Point {
    type Output = Point;

    fn sub(self, o: Point) -> Point {
        Point::new(self.x - o.x, self.y - o.y)
    }
}

/// A rectangle representing geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Center point, truncating odd sizes toward the origin
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Inclusive on all four edges, so `origin + (w, h)` is contained.
    ///
    /// Two monitors sharing an edge both contain the points on it; lookups
    /// resolve that by iteration order.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    /// The same rectangle shifted by `offset`
    pub fn translate(&self, offset: Point) -> Rect {
        Rect::new(self.x + offset.x, self.y + offset.y, self.width, self.height)
    }

    /// Zero or negative extent on either axis
    pub fn is_degenerate(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Navigation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    #[cfg(test)]
    pub const ALL: [Direction; 4] = [Direction::Up, Direction::Down, Direction::Left, Direction::Right];

    #[cfg(test)]
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    pub fn is_vertical(self) -> bool {
        matches!(self, Direction::Up | Direction::Down)
    }

    /// Map the vi movement keys (h, j, k, l) onto directions
    pub fn from_vi_keysym(keysym: u32) -> Option<Direction> {
        match keysym {
            0x68 => Some(Direction::Left),
            0x6a => Some(Direction::Down),
            0x6b => Some(Direction::Up),
            0x6c => Some(Direction::Right),
            _ => None,
        }
    }
}

/// Distance from `a` to `b` measured along `dir`.
///
/// `None` means `b` is unreachable in that direction: it lies behind `a`,
/// or level with it on that axis.
pub fn directed_distance(a: Point, b: Point, dir: Direction) -> Option<u32> {
    let dist = match dir {
        Direction::Up => a.y - b.y,
        Direction::Down => b.y - a.y,
        Direction::Left => a.x - b.x,
        Direction::Right => b.x - a.x,
    };
    if dist > 0 {
        Some(dist as u32)
    } else {
        None
    }
}

/// Distance across the axis of `dir`
fn perpendicular_distance(a: Point, b: Point, dir: Direction) -> u32 {
    if dir.is_vertical() {
        a.x.abs_diff(b.x)
    } else {
        a.y.abs_diff(b.y)
    }
}

/// Pick the candidate that lies most directly in `dir` from `origin`.
///
/// Off-axis distance is weighted four times as heavily as on-axis distance,
/// so a window straight below wins over a slightly closer one off to the
/// side. Candidates behind or level with `origin` are never chosen.
pub fn nearest_in_direction<T: Copy>(dir: Direction, origin: Point, candidates: &[(Point, T)]) -> Option<T> {
    let mut best: Option<(u64, T)> = None;

    for &(p, item) in candidates {
        let Some(parallel) = directed_distance(origin, p, dir) else {
            continue;
        };
        let perpendicular = perpendicular_distance(origin, p, dir);

        let parallel = parallel as f64;
        let perpendicular = perpendicular as f64;
        let dist = (parallel * parallel + 4.0 * perpendicular * perpendicular).sqrt() as u64;

        if best.map_or(true, |(d, _)| dist < d) {
            best = Some((dist, item));
        }
    }

    best.map(|(_, item)| item)
}

/// Pick the candidate whose rectangle center is closest to `point`.
pub fn nearest_to_point<T: Copy>(point: Point, candidates: &[(Rect, T)]) -> Option<T> {
    let mut best: Option<(f64, T)> = None;

    for &(rect, item) in candidates {
        let c = rect.center();
        let vert = point.y.abs_diff(c.y) as f64;
        let horz = point.x.abs_diff(c.x) as f64;
        let dist = (vert * vert + horz * horz).sqrt();

        if best.map_or(true, |(d, _)| dist < d) {
            best = Some((dist, item));
        }
    }

    best.map(|(_, item)| item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_center() {
        let rect = Rect::new(0, 0, 1920, 1080);
        assert_eq!(rect.center(), Point::new(960, 540));

        let rect = Rect::new(1920, 0, 1921, 1081);
        assert_eq!(rect.center(), Point::new(2880, 540));
    }

    #[test]
    fn test_contains_is_inclusive() {
        let rect = Rect::new(10, 20, 100, 50);
        assert!(rect.contains(Point::new(10, 20)));
        assert!(rect.contains(Point::new(110, 70)));
        assert!(!rect.contains(Point::new(111, 70)));
        assert!(!rect.contains(Point::new(9, 20)));
        assert!(!rect.contains(Point::new(50, 71)));
    }

    #[test]
    fn test_shared_edge_is_in_both_rects() {
        let a = Rect::new(0, 0, 1920, 1080);
        let b = Rect::new(1920, 0, 1920, 1080);
        let edge = Point::new(1920, 500);
        assert!(a.contains(edge));
        assert!(b.contains(edge));
    }

    #[test]
    fn test_directed_distance() {
        let a = Point::new(100, 100);
        assert_eq!(directed_distance(a, Point::new(150, 90), Direction::Right), Some(50));
        assert_eq!(directed_distance(a, Point::new(150, 90), Direction::Left), None);
        assert_eq!(directed_distance(a, Point::new(150, 90), Direction::Up), Some(10));
        assert_eq!(directed_distance(a, Point::new(150, 90), Direction::Down), None);
    }

    #[test]
    fn test_directed_distance_zero_is_unreachable() {
        let a = Point::new(100, 100);
        let b = Point::new(100, 300);
        assert_eq!(directed_distance(a, b, Direction::Left), None);
        assert_eq!(directed_distance(a, b, Direction::Right), None);
        assert_eq!(directed_distance(a, a, Direction::Down), None);
    }

    #[test]
    fn test_directed_distance_exactly_one_side_finite() {
        let points = [
            (Point::new(0, 0), Point::new(5, -7)),
            (Point::new(-30, 12), Point::new(40, 11)),
            (Point::new(3, 3), Point::new(2, 9)),
        ];
        for (a, b) in points {
            for dir in Direction::ALL {
                let fwd = directed_distance(a, b, dir).is_some();
                let back = directed_distance(a, b, dir.opposite()).is_some();
                assert!(fwd ^ back, "{:?} -> {:?} along {:?}", a, b, dir);
            }
        }
    }

    #[test]
    fn test_nearest_in_direction_skips_origin_and_wrong_side() {
        let origin = Point::new(500, 500);
        let candidates = [
            (Point::new(500, 500), 1),
            (Point::new(200, 500), 2),
            (Point::new(900, 520), 3),
        ];
        assert_eq!(nearest_in_direction(Direction::Right, origin, &candidates), Some(3));
        assert_eq!(nearest_in_direction(Direction::Left, origin, &candidates), Some(2));
        assert_eq!(nearest_in_direction(Direction::Up, origin, &candidates), None);
    }

    #[test]
    fn test_nearest_in_direction_prefers_alignment() {
        // Candidate 1 is closer in euclidean terms but well off-axis.
        let origin = Point::new(0, 0);
        let candidates = [(Point::new(100, 150), 1), (Point::new(250, 10), 2)];
        assert_eq!(nearest_in_direction(Direction::Right, origin, &candidates), Some(2));
    }

    #[test]
    fn test_nearest_in_direction_accepts_aligned_candidates() {
        let origin = Point::new(960, 540);
        let candidates = [(Point::new(960, 1620), 'b')];
        assert_eq!(nearest_in_direction(Direction::Down, origin, &candidates), Some('b'));
    }

    #[test]
    fn test_nearest_in_direction_empty() {
        let none: [(Point, u32); 0] = [];
        assert_eq!(nearest_in_direction(Direction::Down, Point::default(), &none), None);
    }

    #[test]
    fn test_nearest_to_point() {
        let candidates = [
            (Rect::new(0, 0, 100, 100), 'a'),
            (Rect::new(1000, 0, 100, 100), 'b'),
            (Rect::new(0, 1000, 100, 100), 'c'),
        ];
        assert_eq!(nearest_to_point(Point::new(900, 40), &candidates), Some('b'));
        assert_eq!(nearest_to_point(Point::new(50, 50), &candidates), Some('a'));
        // Level with a center on one axis is still a valid distance.
        assert_eq!(nearest_to_point(Point::new(50, 800), &candidates), Some('c'));
    }

    #[test]
    fn test_nearest_to_point_first_wins_ties() {
        let candidates = [(Rect::new(0, 0, 100, 100), 1), (Rect::new(200, 0, 100, 100), 2)];
        assert_eq!(nearest_to_point(Point::new(150, 50), &candidates), Some(1));
    }

    #[test]
    fn test_vi_keys() {
        assert_eq!(Direction::from_vi_keysym(0x68), Some(Direction::Left));
        assert_eq!(Direction::from_vi_keysym(0x6a), Some(Direction::Down));
        assert_eq!(Direction::from_vi_keysym(0x6b), Some(Direction::Up));
        assert_eq!(Direction::from_vi_keysym(0x6c), Some(Direction::Right));
        assert_eq!(Direction::from_vi_keysym(0x67), None);
    }
}
