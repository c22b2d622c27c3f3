//! Annotation data model.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::geometry::{BoundingBox, Point, Polygon};

/// Unique identifier for an annotation.
///
/// Ids are per-document, monotonically increasing and never reused, even
/// after deletion. This keeps undo/redo unambiguous.
pub type AnnotationId = u64;

/// Provenance of an annotation.
///
/// Does not affect geometry; preserved for downstream reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Drawn by hand
    #[default]
    Manual,
    /// Produced from a segmentation mask
    AiAssisted,
}

/// Shape geometry of an annotation, in image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Axis-aligned bounding box
    BoundingBox(BoundingBox),
    /// Closed polygon with at least 3 distinct vertices
    Polygon(Polygon),
}

impl Shape {
    /// Get the axis-aligned bounds of this shape.
    pub fn bounds(&self) -> BoundingBox {
        match self {
            Shape::BoundingBox(b) => *b,
            Shape::Polygon(poly) => poly.bounds().unwrap_or(BoundingBox {
                x_min: 0.0,
                y_min: 0.0,
                x_max: 0.0,
                y_max: 0.0,
            }),
        }
    }

    /// Check if a point hits this shape.
    pub fn hit_test(&self, point: &Point) -> bool {
        match self {
            Shape::BoundingBox(b) => b.contains(point),
            Shape::Polygon(poly) => poly.contains(point),
        }
    }

    /// Translate the shape by a delta.
    pub fn translated(&self, dx: f32, dy: f32) -> Shape {
        match self {
            Shape::BoundingBox(b) => Shape::BoundingBox(BoundingBox {
                x_min: b.x_min + dx,
                y_min: b.y_min + dy,
                x_max: b.x_max + dx,
                y_max: b.y_max + dy,
            }),
            Shape::Polygon(poly) => Shape::Polygon(Polygon::new(
                poly.vertices
                    .iter()
                    .map(|p| Point::new(p.x + dx, p.y + dy))
                    .collect(),
            )),
        }
    }

    /// Validate the shape against the image dimensions.
    pub fn validate(&self, width: u32, height: u32) -> Result<(), EngineError> {
        match self {
            Shape::BoundingBox(b) => b.validate(width, height),
            Shape::Polygon(poly) => poly.validate(width, height),
        }
    }

    /// Get the display name for this shape kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Shape::BoundingBox(_) => "box",
            Shape::Polygon(_) => "polygon",
        }
    }
}

/// A single labeled shape tied to a class, within one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Unique identifier within the document.
    pub id: AnnotationId,
    /// Id of the class this annotation is tagged with.
    pub class_id: u32,
    /// The shape geometry.
    pub shape: Shape,
    /// Where the annotation came from.
    #[serde(default)]
    pub origin: Origin,
}

impl Annotation {
    /// Create a new manual annotation.
    pub fn new(id: AnnotationId, class_id: u32, shape: Shape) -> Self {
        Self {
            id,
            class_id,
            shape,
            origin: Origin::Manual,
        }
    }

    /// Set the provenance tag.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}
