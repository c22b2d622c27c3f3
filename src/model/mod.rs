//! Data models for the annotation engine.

mod annotation;
mod class_def;

pub use annotation::{Annotation, AnnotationId, Origin, Shape};
pub use class_def::{ClassDef, ClassTable};
