//! Polygon simplification with a perpendicular-distance tolerance.

use super::Point;

/// Simplify a closed ring of vertices with the Ramer-Douglas-Peucker
/// algorithm.
///
/// Every dropped vertex lies within `tolerance` pixels of the simplified
/// boundary. The first vertex is always preserved, which keeps the output
/// deterministic for identical input.
pub fn simplify_polygon(points: &[Point], tolerance: f32) -> Vec<Point> {
    let ring = dedup_ring(points);
    if ring.len() <= 3 {
        return ring;
    }

    // Treat the ring as an open polyline that returns to its start, so
    // the closing edge participates in the tolerance check.
    let mut closed: Vec<Point> = ring.clone();
    closed.push(ring[0]);

    let mut keep = vec![false; closed.len()];
    keep[0] = true;
    keep[closed.len() - 1] = true;
    rdp_mark(&closed, 0, closed.len() - 1, tolerance, &mut keep);

    let mut out: Vec<Point> = Vec::new();
    for (i, point) in closed.iter().enumerate().take(closed.len() - 1) {
        if keep[i] {
            out.push(*point);
        }
    }
    out
}

/// Remove consecutive duplicates, including the wrap-around pair.
fn dedup_ring(points: &[Point]) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        if out.last() != Some(p) {
            out.push(*p);
        }
    }
    if out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

/// Mark the vertices to keep between `first` and `last` (exclusive).
fn rdp_mark(points: &[Point], first: usize, last: usize, tolerance: f32, keep: &mut [bool]) {
    if last <= first + 1 {
        return;
    }

    let mut max_dist = 0.0f32;
    let mut max_index = first;
    for i in (first + 1)..last {
        let d = perpendicular_distance(&points[i], &points[first], &points[last]);
        if d > max_dist {
            max_dist = d;
            max_index = i;
        }
    }

    if max_dist > tolerance {
        keep[max_index] = true;
        rdp_mark(points, first, max_index, tolerance, keep);
        rdp_mark(points, max_index, last, tolerance, keep);
    }
}

/// Distance from `p` to the segment `a`..`b`.
fn perpendicular_distance(p: &Point, a: &Point, b: &Point) -> f32 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f32::EPSILON {
        return p.distance_to(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    let proj = Point::new(a.x + t * dx, a.y + t * dy);
    p.distance_to(&proj)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_square_corners() {
        let square = vec![
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
        ];
        let simplified = simplify_polygon(&square, 1.0);
        // The collinear midpoint on the top edge is dropped
        assert_eq!(simplified.len(), 4);
        assert_eq!(simplified[0], Point::new(0.0, 0.0));
    }

    #[test]
    fn deterministic_for_identical_input() {
        let ring: Vec<Point> = (0..200)
            .map(|i| {
                let t = (i as f32) / 200.0 * std::f32::consts::TAU;
                Point::new(100.0 + 50.0 * t.cos(), 100.0 + 50.0 * t.sin())
            })
            .collect();
        let a = simplify_polygon(&ring, 2.0);
        let b = simplify_polygon(&ring, 2.0);
        assert_eq!(a, b);
    }

    #[test]
    fn dense_circle_reduces_within_tolerance() {
        let tolerance = 2.0;
        let ring: Vec<Point> = (0..200)
            .map(|i| {
                let t = (i as f32) / 200.0 * std::f32::consts::TAU;
                Point::new(100.0 + 50.0 * t.cos(), 100.0 + 50.0 * t.sin())
            })
            .collect();
        let simplified = simplify_polygon(&ring, tolerance);

        assert!(
            simplified.len() * 2 <= ring.len(),
            "expected at least 50% reduction, got {} of {}",
            simplified.len(),
            ring.len()
        );

        // Every original vertex stays within tolerance of the simplified boundary
        let n = simplified.len();
        for p in &ring {
            let mut min_d = f32::INFINITY;
            for i in 0..n {
                let d =
                    perpendicular_distance(p, &simplified[i], &simplified[(i + 1) % n]);
                min_d = min_d.min(d);
            }
            assert!(min_d <= tolerance, "vertex {:?} is {} px away", p, min_d);
        }
    }

    #[test]
    fn tiny_rings_pass_through() {
        let tri = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(5.0, 8.0),
        ];
        assert_eq!(simplify_polygon(&tri, 2.0), tri);
    }
}
