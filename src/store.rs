//! Per-image annotation storage.
//!
//! An [`AnnotationSet`] owns the ordered annotations of one open image
//! document. Insertion order is z-order for overlapping shapes. All
//! mutations validate geometry first and either fully apply or leave the
//! set unchanged.
//!
//! The set never invents ids: the command layer allocates them through
//! [`AnnotationSet::alloc_id`], a per-document monotonic counter whose
//! values are never reused.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::geometry::Point;
use crate::model::{Annotation, AnnotationId, Shape};

/// The annotation set of a single image document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationSet {
    /// Path of the image this set belongs to.
    image_path: PathBuf,
    /// Image width in pixels.
    image_width: u32,
    /// Image height in pixels.
    image_height: u32,
    /// Annotations in insertion order (z-order, last on top).
    annotations: Vec<Annotation>,
    /// Next annotation id; monotonic, never reused.
    next_id: AnnotationId,
    /// Set when annotations changed since the last save.
    #[serde(skip)]
    dirty: bool,
}

impl AnnotationSet {
    /// Create an empty set for an image.
    pub fn new(image_path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            image_path: image_path.into(),
            image_width: width,
            image_height: height,
            annotations: Vec::new(),
            next_id: 1,
            dirty: false,
        }
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    /// Allocate the next annotation id.
    pub fn alloc_id(&mut self) -> AnnotationId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Append an annotation, validating its geometry first.
    ///
    /// The id must come from [`alloc_id`](Self::alloc_id) (or a loaded
    /// snapshot) and must not collide with a live annotation.
    pub fn insert(&mut self, annotation: Annotation) -> Result<(), EngineError> {
        let at = self.annotations.len();
        self.insert_at(at, annotation)
    }

    /// Insert an annotation at a z-order position, validating first.
    ///
    /// Used by undo to restore a deleted annotation at its original
    /// position. `index` is clamped to the current length.
    pub fn insert_at(&mut self, index: usize, annotation: Annotation) -> Result<(), EngineError> {
        annotation
            .shape
            .validate(self.image_width, self.image_height)?;
        debug_assert!(
            self.get(annotation.id).is_none(),
            "duplicate annotation id {}",
            annotation.id
        );
        // Keep the counter ahead of restored ids
        if annotation.id >= self.next_id {
            self.next_id = annotation.id + 1;
        }
        let index = index.min(self.annotations.len());
        self.annotations.insert(index, annotation);
        self.dirty = true;
        Ok(())
    }

    /// Remove an annotation by id.
    ///
    /// Returns the removed annotation and its z-order position so undo
    /// can restore it in place.
    pub fn remove(&mut self, id: AnnotationId) -> Result<(usize, Annotation), EngineError> {
        let index = self
            .annotations
            .iter()
            .position(|a| a.id == id)
            .ok_or(EngineError::NotFound { id })?;
        let removed = self.annotations.remove(index);
        self.dirty = true;
        Ok((index, removed))
    }

    /// Replace an annotation's shape, validating the new geometry first.
    ///
    /// Returns the previous shape. The set is unchanged on failure.
    pub fn update_shape(&mut self, id: AnnotationId, shape: Shape) -> Result<Shape, EngineError> {
        shape.validate(self.image_width, self.image_height)?;
        let annotation = self
            .annotations
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(EngineError::NotFound { id })?;
        let previous = std::mem::replace(&mut annotation.shape, shape);
        self.dirty = true;
        Ok(previous)
    }

    /// Change an annotation's class. Returns the previous class id.
    pub fn update_class(&mut self, id: AnnotationId, class_id: u32) -> Result<u32, EngineError> {
        let annotation = self
            .annotations
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(EngineError::NotFound { id })?;
        let previous = std::mem::replace(&mut annotation.class_id, class_id);
        self.dirty = true;
        Ok(previous)
    }

    /// Get an annotation by id.
    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id == id)
    }

    /// All annotations in z-order (first drawn first).
    pub fn all(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Find the topmost annotation at a point.
    pub fn hit_test(&self, point: &Point) -> Option<AnnotationId> {
        self.annotations
            .iter()
            .rev()
            .find(|a| a.shape.hit_test(point))
            .map(|a| a.id)
    }

    /// Count annotations referencing a class.
    pub fn count_class(&self, class_id: u32) -> usize {
        self.annotations
            .iter()
            .filter(|a| a.class_id == class_id)
            .count()
    }

    /// Remove annotations whose id duplicates an earlier one, keeping
    /// the first occurrence. Returns the number removed.
    ///
    /// Live mutation cannot produce duplicates (ids come from the
    /// monotonic counter); deserialized snapshot data can.
    pub fn dedupe_ids(&mut self) -> usize {
        let mut seen = HashSet::new();
        let before = self.annotations.len();
        self.annotations.retain(|a| seen.insert(a.id));
        let removed = before - self.annotations.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Check if the set has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the set as modified.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Mark the set as saved.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
