//! Geometry kernel: polygon/box primitives and mask conversion.
//!
//! This module provides the core geometric types for annotations and the
//! conversions from segmentation masks to clean shapes:
//! - `Point`, `BoundingBox`, `Polygon` primitives with validation
//! - Polygon simplification (perpendicular-distance tolerance)
//! - Mask -> polygon and mask -> tight box extraction

mod mask;
mod simplify;

pub use mask::{FOREGROUND_THRESHOLD, Mask, mask_to_polygon, mask_to_tight_box};
pub use simplify::simplify_polygon;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Calculate distance to another point.
    pub fn distance_to(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// An axis-aligned bounding box in corner form.
///
/// Valid boxes satisfy `x_min < x_max` and `y_min < y_max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    /// Create a normalized bounding box from two corner points.
    ///
    /// Corners may be given in any order.
    pub fn from_corners(p1: Point, p2: Point) -> Self {
        Self {
            x_min: p1.x.min(p2.x),
            y_min: p1.y.min(p2.y),
            x_max: p1.x.max(p2.x),
            y_max: p1.y.max(p2.y),
        }
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    /// Get the area of the box.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Get the center point of the box.
    pub fn center(&self) -> Point {
        Point::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    /// Check if a point is inside the box (edges inclusive).
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.x_min
            && point.x <= self.x_max
            && point.y >= self.y_min
            && point.y <= self.y_max
    }

    /// Clamp the box to the image rectangle `[0, width] x [0, height]`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        Self {
            x_min: self.x_min.clamp(0.0, width as f32),
            y_min: self.y_min.clamp(0.0, height as f32),
            x_max: self.x_max.clamp(0.0, width as f32),
            y_max: self.y_max.clamp(0.0, height as f32),
        }
    }

    /// Validate the box invariants against the image dimensions.
    pub fn validate(&self, width: u32, height: u32) -> Result<(), EngineError> {
        if !self.x_min.is_finite()
            || !self.y_min.is_finite()
            || !self.x_max.is_finite()
            || !self.y_max.is_finite()
        {
            return Err(EngineError::invalid_geometry("box has non-finite corners"));
        }
        if self.x_min >= self.x_max || self.y_min >= self.y_max {
            return Err(EngineError::invalid_geometry(format!(
                "degenerate box: ({}, {}) .. ({}, {})",
                self.x_min, self.y_min, self.x_max, self.y_max
            )));
        }
        if self.x_min < 0.0
            || self.y_min < 0.0
            || self.x_max > width as f32
            || self.y_max > height as f32
        {
            return Err(EngineError::invalid_geometry(format!(
                "box exceeds {}x{} image bounds",
                width, height
            )));
        }
        Ok(())
    }
}

/// A closed polygon defined by an ordered sequence of vertices.
///
/// The last vertex implicitly connects back to the first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Polygon {
    /// The vertices of the polygon in order.
    pub vertices: Vec<Point>,
}

/// Minimum number of distinct vertices for a valid polygon.
pub const MIN_POLYGON_VERTICES: usize = 3;

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Self {
        Self { vertices }
    }

    /// Get the axis-aligned bounding box of the polygon.
    pub fn bounds(&self) -> Option<BoundingBox> {
        let first = self.vertices.first()?;
        let mut b = BoundingBox {
            x_min: first.x,
            y_min: first.y,
            x_max: first.x,
            y_max: first.y,
        };
        for p in &self.vertices[1..] {
            b.x_min = b.x_min.min(p.x);
            b.y_min = b.y_min.min(p.y);
            b.x_max = b.x_max.max(p.x);
            b.y_max = b.y_max.max(p.y);
        }
        Some(b)
    }

    /// Signed area via the shoelace formula, returned as absolute value.
    pub fn area(&self) -> f32 {
        if self.vertices.len() < MIN_POLYGON_VERTICES {
            return 0.0;
        }
        let mut sum = 0.0f32;
        let n = self.vertices.len();
        for i in 0..n {
            let a = &self.vertices[i];
            let b = &self.vertices[(i + 1) % n];
            sum += a.x * b.y - b.x * a.y;
        }
        (sum / 2.0).abs()
    }

    /// Check if a point is inside the polygon (ray casting algorithm).
    pub fn contains(&self, point: &Point) -> bool {
        if self.vertices.len() < MIN_POLYGON_VERTICES {
            return false;
        }

        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let vi = &self.vertices[i];
            let vj = &self.vertices[j];
            if ((vi.y > point.y) != (vj.y > point.y))
                && (point.x < (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x)
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Vertices with consecutive duplicates removed (including the
    /// wrap-around pair).
    pub fn distinct_vertices(&self) -> Vec<Point> {
        let mut out: Vec<Point> = Vec::with_capacity(self.vertices.len());
        for p in &self.vertices {
            if out.last() != Some(p) {
                out.push(*p);
            }
        }
        if out.len() > 1 && out.first() == out.last() {
            out.pop();
        }
        out
    }

    /// Validate the polygon invariants against the image dimensions.
    ///
    /// Degenerate polygons (fewer than 3 distinct points after dedup, or
    /// zero area) are rejected.
    pub fn validate(&self, width: u32, height: u32) -> Result<(), EngineError> {
        for p in &self.vertices {
            if !p.x.is_finite() || !p.y.is_finite() {
                return Err(EngineError::invalid_geometry(
                    "polygon has non-finite vertices",
                ));
            }
            if p.x < 0.0 || p.y < 0.0 || p.x > width as f32 || p.y > height as f32 {
                return Err(EngineError::invalid_geometry(format!(
                    "polygon vertex ({}, {}) exceeds {}x{} image bounds",
                    p.x, p.y, width, height
                )));
            }
        }
        let distinct = self.distinct_vertices();
        if distinct.len() < MIN_POLYGON_VERTICES {
            return Err(EngineError::invalid_geometry(format!(
                "polygon has {} distinct vertices, needs at least {}",
                distinct.len(),
                MIN_POLYGON_VERTICES
            )));
        }
        if Polygon::new(distinct).area() <= 0.0 {
            return Err(EngineError::invalid_geometry("polygon has zero area"));
        }
        Ok(())
    }
}
