//! Engine error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::AnnotationId;

/// Errors surfaced by the annotation engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A shape failed validation.
    #[error("invalid geometry: {message}")]
    InvalidGeometry { message: String },

    /// No annotation with this id exists.
    #[error("annotation {id} not found")]
    NotFound { id: AnnotationId },

    /// The undo stack is empty.
    #[error("nothing to undo")]
    NothingToUndo,

    /// The redo stack is empty.
    #[error("nothing to redo")]
    NothingToRedo,

    /// A segmentation mask contains no foreground pixels.
    #[error("mask contains no foreground pixels")]
    EmptyMask,

    /// A prompt was submitted before the model finished loading.
    #[error("segmentation model is not loaded")]
    ModelNotLoaded,

    /// The segmentation backend reported a failure.
    #[error("inference failed: {0}")]
    InferenceFailure(String),

    /// An image could not be read or decoded.
    #[error("unreadable image: {path:?}")]
    UnreadableImage { path: PathBuf },

    /// No document is open for this image.
    #[error("no open document for {path:?}")]
    DocumentNotOpen { path: PathBuf },

    /// No class with this id exists.
    #[error("class {id} not found")]
    ClassNotFound { id: u32 },

    /// The class is still referenced by annotations.
    #[error("class {id} is referenced by {count} annotations")]
    ClassInUse { id: u32, count: usize },

    /// A class name failed validation.
    #[error("invalid class name: {message}")]
    InvalidClassName { message: String },
}

impl EngineError {
    /// Build an [`EngineError::InvalidGeometry`].
    pub fn invalid_geometry(message: impl Into<String>) -> Self {
        EngineError::InvalidGeometry {
            message: message.into(),
        }
    }

    /// Build an [`EngineError::InvalidClassName`].
    pub fn invalid_class_name(message: impl Into<String>) -> Self {
        EngineError::InvalidClassName {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_descriptive() {
        let err = EngineError::invalid_geometry("box exceeds image bounds");
        assert_eq!(
            err.to_string(),
            "invalid geometry: box exceeds image bounds"
        );
        assert_eq!(
            EngineError::ClassInUse { id: 2, count: 7 }.to_string(),
            "class 2 is referenced by 7 annotations"
        );
    }
}
