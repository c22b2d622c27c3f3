//! Mask to geometry conversion.
//!
//! A segmentation mask is a per-pixel foreground probability field. The
//! converters here extract the largest connected foreground component and
//! turn it into either a simplified boundary polygon or a tight
//! axis-aligned bounding box.

use ndarray::Array2;

use super::{BoundingBox, MIN_POLYGON_VERTICES, Point, Polygon, simplify_polygon};
use crate::error::EngineError;

/// Default probability above which a pixel counts as foreground.
pub const FOREGROUND_THRESHOLD: f32 = 0.5;

/// A per-pixel foreground probability field over an image.
#[derive(Debug, Clone)]
pub struct Mask {
    /// Probabilities in row-major order, shape `(height, width)`.
    probs: Array2<f32>,
}

impl Mask {
    /// Create an all-background mask.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            probs: Array2::zeros((height, width)),
        }
    }

    /// Create a mask from a probability array of shape `(height, width)`.
    pub fn from_probs(probs: Array2<f32>) -> Self {
        Self { probs }
    }

    /// Create a mask by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        Self {
            probs: Array2::from_shape_fn((height, width), |(y, x)| f(x, y)),
        }
    }

    pub fn width(&self) -> usize {
        self.probs.ncols()
    }

    pub fn height(&self) -> usize {
        self.probs.nrows()
    }

    /// Get the foreground probability at a pixel.
    pub fn prob(&self, x: usize, y: usize) -> f32 {
        self.probs[(y, x)]
    }

    /// Set the foreground probability at a pixel.
    pub fn set(&mut self, x: usize, y: usize, prob: f32) {
        self.probs[(y, x)] = prob;
    }

    fn is_foreground(&self, x: usize, y: usize, threshold: f32) -> bool {
        self.probs[(y, x)] > threshold
    }
}

/// The largest 4-connected foreground component of a mask.
struct Component {
    /// Membership grid, row-major `y * width + x`.
    member: Vec<bool>,
    /// First pixel of the component in row-major scan order.
    seed: (usize, usize),
    /// Pixel count.
    size: usize,
    /// Pixel bounds: (x_min, y_min, x_max, y_max), inclusive.
    bounds: (usize, usize, usize, usize),
}

/// Find the largest 4-connected foreground component.
///
/// Components are discovered in row-major scan order; ties on size keep
/// the first one discovered, so results are reproducible for identical
/// masks. Returns `None` if no pixel is above the threshold.
fn largest_component(mask: &Mask, threshold: f32) -> Option<Component> {
    let width = mask.width();
    let height = mask.height();
    let mut visited = vec![false; width * height];
    let mut best: Option<Component> = None;

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if visited[idx] || !mask.is_foreground(x, y, threshold) {
                continue;
            }

            // Flood fill from the scan pixel, which is the component's
            // topmost-leftmost pixel.
            let mut member = vec![false; width * height];
            let mut queue = vec![(x, y)];
            visited[idx] = true;
            member[idx] = true;
            let mut size = 0usize;
            let (mut x_min, mut y_min, mut x_max, mut y_max) = (x, y, x, y);

            while let Some((cx, cy)) = queue.pop() {
                size += 1;
                x_min = x_min.min(cx);
                y_min = y_min.min(cy);
                x_max = x_max.max(cx);
                y_max = y_max.max(cy);

                let mut push = |nx: usize, ny: usize, queue: &mut Vec<(usize, usize)>| {
                    let nidx = ny * width + nx;
                    if !visited[nidx] && mask.is_foreground(nx, ny, threshold) {
                        visited[nidx] = true;
                        member[nidx] = true;
                        queue.push((nx, ny));
                    }
                };
                if cx > 0 {
                    push(cx - 1, cy, &mut queue);
                }
                if cx + 1 < width {
                    push(cx + 1, cy, &mut queue);
                }
                if cy > 0 {
                    push(cx, cy - 1, &mut queue);
                }
                if cy + 1 < height {
                    push(cx, cy + 1, &mut queue);
                }
            }

            let component = Component {
                member,
                seed: (x, y),
                size,
                bounds: (x_min, y_min, x_max, y_max),
            };
            // Strictly greater: equal-sized later components lose the tie
            if best.as_ref().is_none_or(|b| component.size > b.size) {
                best = Some(component);
            }
        }
    }

    best
}

/// Clockwise 8-neighborhood offsets, starting east (y grows downward).
const DIRS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Trace the outer boundary of a component with Moore neighbor tracing.
///
/// Starts at the component's topmost-leftmost pixel and walks clockwise.
fn trace_boundary(component: &Component, width: usize, height: usize) -> Vec<(usize, usize)> {
    let start = component.seed;
    let is_member = |x: i32, y: i32| -> bool {
        x >= 0
            && y >= 0
            && (x as usize) < width
            && (y as usize) < height
            && component.member[y as usize * width + x as usize]
    };

    let mut boundary = vec![start];
    let mut cur = start;
    // Pretend we arrived at the start moving east, so the clockwise scan
    // begins at the north neighbor (which is background for the
    // topmost-leftmost pixel).
    let mut dir = 0usize;
    // The boundary cannot be longer than the perimeter of the component
    let max_steps = 4 * component.size + 8;

    for _ in 0..max_steps {
        let first = (dir + 6) % 8;
        let mut found = None;
        for i in 0..8 {
            let d = (first + i) % 8;
            let nx = cur.0 as i32 + DIRS[d].0;
            let ny = cur.1 as i32 + DIRS[d].1;
            if is_member(nx, ny) {
                found = Some(((nx as usize, ny as usize), d));
                break;
            }
        }

        let Some((next, d)) = found else {
            break; // isolated pixel
        };
        if next == start {
            break; // boundary closed
        }
        boundary.push(next);
        cur = next;
        dir = d;
    }

    boundary
}

/// Extract a simplified boundary polygon of the largest foreground
/// component.
///
/// Fails with `EmptyMask` when no pixel exceeds the threshold, and with
/// `InvalidGeometry` when the component is too small to form a polygon
/// (a 1-2 pixel speck).
pub fn mask_to_polygon(
    mask: &Mask,
    tolerance: f32,
    threshold: f32,
) -> Result<Polygon, EngineError> {
    let component = largest_component(mask, threshold).ok_or(EngineError::EmptyMask)?;
    let boundary = trace_boundary(&component, mask.width(), mask.height());

    let ring: Vec<Point> = boundary
        .iter()
        .map(|&(x, y)| Point::new(x as f32, y as f32))
        .collect();
    let simplified = simplify_polygon(&ring, tolerance);

    if simplified.len() < MIN_POLYGON_VERTICES {
        return Err(EngineError::invalid_geometry(format!(
            "component boundary degenerates to {} vertices",
            simplified.len()
        )));
    }
    let polygon = Polygon::new(simplified);
    if polygon.area() <= 0.0 {
        return Err(EngineError::invalid_geometry(
            "component boundary has zero area",
        ));
    }
    Ok(polygon)
}

/// Extract the tight axis-aligned bounding box of the largest foreground
/// component.
///
/// The box spans the full extent of the covered pixels, so a single
/// foreground pixel still yields a 1x1 box. Fails with `EmptyMask` when
/// no pixel exceeds the threshold.
pub fn mask_to_tight_box(mask: &Mask, threshold: f32) -> Result<BoundingBox, EngineError> {
    let component = largest_component(mask, threshold).ok_or(EngineError::EmptyMask)?;
    let (x_min, y_min, x_max, y_max) = component.bounds;
    Ok(BoundingBox {
        x_min: x_min as f32,
        y_min: y_min as f32,
        x_max: (x_max + 1) as f32,
        y_max: (y_max + 1) as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_mask(width: usize, height: usize, x0: usize, y0: usize, x1: usize, y1: usize) -> Mask {
        Mask::from_fn(width, height, |x, y| {
            if x >= x0 && x < x1 && y >= y0 && y < y1 {
                1.0
            } else {
                0.0
            }
        })
    }

    #[test]
    fn empty_mask_fails() {
        let mask = Mask::new(32, 32);
        assert_eq!(
            mask_to_polygon(&mask, 2.0, FOREGROUND_THRESHOLD),
            Err(EngineError::EmptyMask)
        );
        assert_eq!(
            mask_to_tight_box(&mask, FOREGROUND_THRESHOLD),
            Err(EngineError::EmptyMask)
        );
    }

    #[test]
    fn below_threshold_is_background() {
        let mask = Mask::from_fn(8, 8, |_, _| 0.4);
        assert_eq!(
            mask_to_tight_box(&mask, FOREGROUND_THRESHOLD),
            Err(EngineError::EmptyMask)
        );
    }

    #[test]
    fn tight_box_covers_component() {
        let mask = rect_mask(64, 64, 10, 20, 30, 40);
        let b = mask_to_tight_box(&mask, FOREGROUND_THRESHOLD).expect("box");
        assert_eq!(b.x_min, 10.0);
        assert_eq!(b.y_min, 20.0);
        assert_eq!(b.x_max, 30.0);
        assert_eq!(b.y_max, 40.0);
    }

    #[test]
    fn single_pixel_yields_unit_box() {
        let mask = rect_mask(16, 16, 5, 5, 6, 6);
        let b = mask_to_tight_box(&mask, FOREGROUND_THRESHOLD).expect("box");
        assert_eq!((b.width(), b.height()), (1.0, 1.0));
    }

    #[test]
    fn single_pixel_polygon_is_degenerate() {
        let mask = rect_mask(16, 16, 5, 5, 6, 6);
        let err = mask_to_polygon(&mask, 2.0, FOREGROUND_THRESHOLD).unwrap_err();
        assert!(matches!(err, EngineError::InvalidGeometry { .. }));
    }

    #[test]
    fn rectangle_polygon_has_four_corners() {
        let mask = rect_mask(64, 64, 8, 8, 40, 24);
        let poly = mask_to_polygon(&mask, 1.0, FOREGROUND_THRESHOLD).expect("polygon");
        assert_eq!(poly.vertices.len(), 4);
        let b = poly.bounds().expect("bounds");
        assert_eq!(b.x_min, 8.0);
        assert_eq!(b.y_min, 8.0);
        assert_eq!(b.x_max, 39.0);
        assert_eq!(b.y_max, 23.0);
    }

    #[test]
    fn polygon_extraction_is_deterministic() {
        let mask = Mask::from_fn(64, 64, |x, y| {
            let dx = x as f32 - 32.0;
            let dy = y as f32 - 32.0;
            if (dx * dx + dy * dy).sqrt() < 20.0 { 1.0 } else { 0.0 }
        });
        let a = mask_to_polygon(&mask, 2.0, FOREGROUND_THRESHOLD).expect("polygon");
        let b = mask_to_polygon(&mask, 2.0, FOREGROUND_THRESHOLD).expect("polygon");
        assert_eq!(a.vertices, b.vertices);
    }

    #[test]
    fn largest_component_wins() {
        // A 3x3 blob and a separate 10x5 blob
        let mask = Mask::from_fn(64, 64, |x, y| {
            let small = x >= 2 && x < 5 && y >= 2 && y < 5;
            let large = x >= 20 && x < 30 && y >= 20 && y < 25;
            if small || large { 1.0 } else { 0.0 }
        });
        let b = mask_to_tight_box(&mask, FOREGROUND_THRESHOLD).expect("box");
        assert_eq!(b.x_min, 20.0);
        assert_eq!(b.y_min, 20.0);
    }

    #[test]
    fn equal_components_resolve_to_first_in_scan_order() {
        // Two 4x4 blobs of identical size; the one whose topmost-leftmost
        // pixel comes first in row-major order must win.
        let mask = Mask::from_fn(32, 32, |x, y| {
            let first = x >= 2 && x < 6 && y >= 2 && y < 6;
            let second = x >= 20 && x < 24 && y >= 10 && y < 14;
            if first || second { 1.0 } else { 0.0 }
        });
        let b = mask_to_tight_box(&mask, FOREGROUND_THRESHOLD).expect("box");
        assert_eq!((b.x_min, b.y_min), (2.0, 2.0));
    }
}
