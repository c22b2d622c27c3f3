//! PixelMark - local image annotation engine
//!
//! Annotation state and AI-assisted labeling for image datasets: shape
//! primitives with validation, mask-to-geometry conversion, per-document
//! undo/redo, an interactive tool state machine, and a background bridge
//! to a segmentation model.

mod config;
mod error;
mod geometry;
mod loader;
mod model;
mod session;
mod store;
mod tool;
mod undo;
mod worker;

pub use config::{CONFIG_VERSION, EngineConfig, PendingPolicy};
pub use error::EngineError;
pub use geometry::{
    BoundingBox, FOREGROUND_THRESHOLD, MIN_POLYGON_VERTICES, Mask, Point, Polygon,
    mask_to_polygon, mask_to_tight_box, simplify_polygon,
};
pub use loader::{FileImageProvider, ImageData, ImageProvider};
pub use model::{Annotation, AnnotationId, ClassDef, ClassTable, Origin, Shape};
pub use session::{LoadReport, SNAPSHOT_VERSION, Session, SessionSnapshot};
pub use store::AnnotationSet;
pub use tool::{
    AiOutput, HANDLE_HIT_RADIUS, POLYGON_CLOSE_THRESHOLD, Prompt, ToolKind, ToolMachine,
    ToolOutcome, ToolState,
};
pub use undo::{Command, Document, History};
pub use worker::{BridgeEvent, SegmentationBridge, SegmentationModel};
