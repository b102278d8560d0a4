//! Convex hulls of table basins.

use crate::coord::Point;
use crate::dataset::Geometry;

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Counter-clockwise hull without repeated or collinear points.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    let mut sorted: Vec<Point> = points.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    let mut hull: Vec<Point> = Vec::with_capacity(sorted.len() * 2);
    for &p in &sorted {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower = hull.len() + 1;
    for &p in sorted.iter().rev().skip(1) {
        while hull.len() >= lower && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Hull as a geometry; degenerate hulls become a point or a line.
pub fn hull_geometry(points: &[Point]) -> Option<Geometry> {
    let hull = convex_hull(points);
    match hull.len() {
        0 => None,
        1 => Some(Geometry::Point(hull[0])),
        2 => Some(Geometry::LineString(hull)),
        _ => Some(Geometry::Polygon(vec![hull])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hull_drops_interior_points() {
        let points = [
            Point::new(0.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
            Point::new(0.0, 2.0),
            Point::new(1.0, 0.0),
        ];
        let hull = convex_hull(&points);
        assert_eq!(
            hull,
            vec![
                Point::new(0.0, 0.0),
                Point::new(2.0, 0.0),
                Point::new(2.0, 2.0),
                Point::new(0.0, 2.0),
            ]
        );
    }

    #[test]
    fn test_degenerate_hulls() {
        let p = Point::new(1.0, 1.0);
        assert_eq!(hull_geometry(&[p, p]), Some(Geometry::Point(p)));
        let q = Point::new(3.0, 1.0);
        assert_eq!(hull_geometry(&[p, q]), Some(Geometry::LineString(vec![p, q])));
        assert_eq!(hull_geometry(&[]), None);
        // collinear points collapse to their end points
        let m = Point::new(2.0, 1.0);
        assert!(matches!(hull_geometry(&[p, m, q]), Some(Geometry::LineString(_))));
    }
}
