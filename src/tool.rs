//! Interactive tool state machine.
//!
//! Turns pointer and keyboard events into annotation commands. The
//! machine is `Idle` between gestures and never holds a terminal state:
//! it runs for the lifetime of the session. Edits accumulate while a
//! gesture is in progress and commit as a single command on release, so
//! history granularity stays at the level of one user gesture.
//!
//! AI tools issue a segmentation prompt instead of committing directly;
//! the resulting mask is converted through the geometry kernel and
//! committed as one command tagged [`Origin::AiAssisted`].

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::geometry::{
    BoundingBox, Mask, Point, Polygon, mask_to_polygon, mask_to_tight_box,
};
use crate::model::{Annotation, AnnotationId, Origin, Shape};
use crate::undo::{Command, Document};

/// Distance threshold for closing a polygon by clicking near the first
/// vertex (image pixels).
pub const POLYGON_CLOSE_THRESHOLD: f32 = 15.0;

/// Hit radius for grabbing a vertex or corner handle (image pixels).
pub const HANDLE_HIT_RADIUS: f32 = 8.0;

/// The active annotation tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolKind {
    /// Select and edit existing annotations
    #[default]
    Select,
    /// Draw bounding boxes
    BoundingBox,
    /// Draw polygons vertex by vertex
    Polygon,
    /// Click a point, let the model segment the object under it
    AiPoint,
    /// Drag a rough box, let the model segment the object inside it
    AiBox,
}

impl ToolKind {
    /// Get the display name for this tool.
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Select => "Select",
            ToolKind::BoundingBox => "Bounding Box",
            ToolKind::Polygon => "Polygon",
            ToolKind::AiPoint => "AI Point",
            ToolKind::AiBox => "AI Box",
        }
    }

    /// Check if this tool requests AI segmentation.
    pub fn is_ai(&self) -> bool {
        matches!(self, ToolKind::AiPoint | ToolKind::AiBox)
    }
}

/// What an AI-assisted segmentation should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AiOutput {
    /// Tight bounding box of the segmented object
    Box,
    /// Simplified boundary polygon of the segmented object
    #[default]
    Polygon,
}

/// A point or box supplied by the user to request segmentation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prompt {
    Point(Point),
    Box(BoundingBox),
}

/// Which part of a selected shape a drag gesture grabbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabTarget {
    /// Translate the whole shape
    Whole,
    /// Drag one polygon vertex
    Vertex(usize),
    /// Drag one box corner (0 = top-left, 1 = top-right,
    /// 2 = bottom-right, 3 = bottom-left)
    Corner(usize),
}

/// The per-gesture state of the machine.
#[derive(Debug, Clone)]
pub enum ToolState {
    /// Between gestures.
    Idle,
    /// Dragging out a box (drawing or AI box prompt).
    DrawingBox { start: Point, current: Point },
    /// Placing polygon vertices.
    DrawingPolygon { vertices: Vec<Point> },
    /// An annotation is selected; a drag may be accumulating.
    EditingSelection {
        id: AnnotationId,
        /// Shape at gesture start, None when not dragging
        original: Option<Shape>,
        /// Accumulated pending shape, committed on release
        pending: Option<Shape>,
        grab: Option<GrabTarget>,
        anchor: Point,
    },
    /// A segmentation prompt is in flight.
    AwaitingSegmentation {
        prompt: Prompt,
        /// Request id once the bridge accepted the prompt
        request_id: Option<u64>,
    },
}

impl ToolState {
    /// Check if a gesture or request is in progress.
    pub fn is_idle(&self) -> bool {
        matches!(self, ToolState::Idle)
    }
}

/// What an event produced, for the caller to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Nothing to report
    None,
    /// A command committed this annotation
    Committed(AnnotationId),
    /// A prompt must be submitted to the segmentation bridge; carries
    /// the request id of a superseded prompt to invalidate, if any
    PromptIssued {
        prompt: Prompt,
        superseded: Option<u64>,
    },
    /// Selection changed
    SelectionChanged(Option<AnnotationId>),
    /// An in-progress gesture was discarded; carries the request id of a
    /// cancelled segmentation prompt, if any
    Cancelled(Option<u64>),
}

/// The interactive tool state machine.
#[derive(Debug, Clone)]
pub struct ToolMachine {
    kind: ToolKind,
    state: ToolState,
    active_class: u32,
    ai_output: AiOutput,
    min_box_size: f32,
    simplify_tolerance: f32,
    mask_threshold: f32,
}

impl ToolMachine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            kind: ToolKind::default(),
            state: ToolState::Idle,
            active_class: 0,
            ai_output: AiOutput::default(),
            min_box_size: config.min_box_size,
            simplify_tolerance: config.simplify_tolerance,
            mask_threshold: config.mask_threshold,
        }
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn state(&self) -> &ToolState {
        &self.state
    }

    pub fn active_class(&self) -> u32 {
        self.active_class
    }

    /// Set the class assigned to newly drawn annotations.
    pub fn set_active_class(&mut self, class_id: u32) {
        self.active_class = class_id;
    }

    pub fn ai_output(&self) -> AiOutput {
        self.ai_output
    }

    /// Set what AI segmentation produces (box or polygon).
    pub fn set_ai_output(&mut self, output: AiOutput) {
        self.ai_output = output;
    }

    /// Switch to another tool, discarding any in-progress gesture
    /// without committing it.
    ///
    /// Returns the request id of a cancelled segmentation prompt so the
    /// caller can invalidate it at the bridge.
    pub fn select_tool(&mut self, kind: ToolKind) -> Option<u64> {
        let cancelled = self.cancelled_request_id();
        if !self.state.is_idle() {
            log::debug!("Tool switch to {} discards in-progress gesture", kind.name());
        }
        self.kind = kind;
        self.state = ToolState::Idle;
        cancelled
    }

    /// Abort the current gesture with no command.
    pub fn cancel(&mut self) -> ToolOutcome {
        let cancelled = self.cancelled_request_id();
        self.state = ToolState::Idle;
        ToolOutcome::Cancelled(cancelled)
    }

    /// Reset to `Idle`, e.g. when the session switches documents.
    pub fn reset(&mut self) -> Option<u64> {
        let cancelled = self.cancelled_request_id();
        self.state = ToolState::Idle;
        cancelled
    }

    fn cancelled_request_id(&self) -> Option<u64> {
        match &self.state {
            ToolState::AwaitingSegmentation { request_id, .. } => *request_id,
            _ => None,
        }
    }

    /// Bind the bridge-assigned request id to the awaited prompt.
    ///
    /// Call after submitting the prompt from a `PromptIssued` outcome.
    pub fn bind_request(&mut self, id: u64) {
        if let ToolState::AwaitingSegmentation { request_id, .. } = &mut self.state {
            *request_id = Some(id);
        }
    }

    // --------------------------------
    // Pointer events
    // --------------------------------

    /// Handle pointer-down at an image position.
    pub fn pointer_down(
        &mut self,
        doc: &mut Document,
        pos: Point,
    ) -> Result<ToolOutcome, EngineError> {
        match self.kind {
            ToolKind::Select => Ok(self.select_down(doc, pos)),
            ToolKind::BoundingBox | ToolKind::AiBox => {
                // Starting a new drag while a prompt is awaited cancels
                // that prompt; the new one is issued on release
                if matches!(self.state, ToolState::AwaitingSegmentation { .. }) {
                    let cancelled = self.cancelled_request_id();
                    self.state = ToolState::DrawingBox {
                        start: pos,
                        current: pos,
                    };
                    return Ok(ToolOutcome::Cancelled(cancelled));
                }
                if self.state.is_idle() {
                    self.state = ToolState::DrawingBox {
                        start: pos,
                        current: pos,
                    };
                }
                Ok(ToolOutcome::None)
            }
            ToolKind::Polygon => self.polygon_down(doc, pos),
            ToolKind::AiPoint => {
                // A click while a prompt is awaited supersedes it
                let awaiting =
                    matches!(self.state, ToolState::AwaitingSegmentation { .. });
                if self.state.is_idle() || awaiting {
                    let superseded = self.cancelled_request_id();
                    let prompt = Prompt::Point(pos);
                    self.state = ToolState::AwaitingSegmentation {
                        prompt,
                        request_id: None,
                    };
                    Ok(ToolOutcome::PromptIssued { prompt, superseded })
                } else {
                    Ok(ToolOutcome::None)
                }
            }
        }
    }

    /// Handle pointer-move to an image position.
    pub fn pointer_move(&mut self, doc: &Document, pos: Point) -> ToolOutcome {
        match &mut self.state {
            ToolState::DrawingBox { current, .. } => {
                *current = pos;
                ToolOutcome::None
            }
            ToolState::EditingSelection {
                original: Some(original),
                pending,
                grab: Some(grab),
                anchor,
                ..
            } => {
                let moved = drag_shape(original, *grab, *anchor, pos);
                // Only track geometry that would pass validation on release
                if moved
                    .validate(doc.set().image_width(), doc.set().image_height())
                    .is_ok()
                {
                    *pending = Some(moved);
                }
                ToolOutcome::None
            }
            _ => ToolOutcome::None,
        }
    }

    /// Handle pointer-up at an image position.
    pub fn pointer_up(
        &mut self,
        doc: &mut Document,
        pos: Point,
    ) -> Result<ToolOutcome, EngineError> {
        match std::mem::replace(&mut self.state, ToolState::Idle) {
            ToolState::DrawingBox { start, .. } => self.finish_box(doc, start, pos),
            ToolState::EditingSelection {
                id,
                original,
                pending,
                anchor,
                ..
            } => {
                // Keep the selection; commit the accumulated drag if any
                self.state = ToolState::EditingSelection {
                    id,
                    original: None,
                    pending: None,
                    grab: None,
                    anchor,
                };
                match (original, pending) {
                    (Some(old_shape), Some(new_shape)) if old_shape != new_shape => {
                        doc.execute(Command::UpdateGeometry {
                            id,
                            old_shape,
                            new_shape,
                        })?;
                        Ok(ToolOutcome::Committed(id))
                    }
                    _ => Ok(ToolOutcome::None),
                }
            }
            other => {
                self.state = other;
                Ok(ToolOutcome::None)
            }
        }
    }

    /// Explicit confirm (e.g. Enter): closes an in-progress polygon.
    pub fn confirm(&mut self, doc: &mut Document) -> Result<ToolOutcome, EngineError> {
        if let ToolState::DrawingPolygon { vertices } =
            std::mem::replace(&mut self.state, ToolState::Idle)
        {
            return self.commit_polygon(doc, vertices);
        }
        Ok(ToolOutcome::None)
    }

    /// Delete the selected annotation.
    pub fn delete_selected(&mut self, doc: &mut Document) -> Result<ToolOutcome, EngineError> {
        if let ToolState::EditingSelection { id, .. } = self.state {
            let command = Command::remove_annotation(doc.set(), id)?;
            doc.execute(command)?;
            self.state = ToolState::Idle;
            return Ok(ToolOutcome::SelectionChanged(None));
        }
        Ok(ToolOutcome::None)
    }

    /// Change the class of the selected annotation.
    pub fn set_selected_class(
        &mut self,
        doc: &mut Document,
        class_id: u32,
    ) -> Result<ToolOutcome, EngineError> {
        if let ToolState::EditingSelection { id, .. } = self.state {
            let old_class = doc
                .set()
                .get(id)
                .ok_or(EngineError::NotFound { id })?
                .class_id;
            if old_class != class_id {
                doc.execute(Command::UpdateClass {
                    id,
                    old_class,
                    new_class: class_id,
                })?;
            }
            return Ok(ToolOutcome::Committed(id));
        }
        Ok(ToolOutcome::None)
    }

    // --------------------------------
    // Segmentation results
    // --------------------------------

    /// Handle an arrived segmentation mask.
    ///
    /// Ignores results whose request id does not match the awaited
    /// prompt (stale results are dropped at the bridge; this is the
    /// second line of defense). On success, commits one AI-assisted
    /// annotation and returns to `Idle`. On conversion failure the
    /// machine also returns to `Idle` and the error is surfaced.
    pub fn on_segmentation_result(
        &mut self,
        doc: &mut Document,
        request_id: u64,
        mask: &Mask,
    ) -> Result<ToolOutcome, EngineError> {
        let ToolState::AwaitingSegmentation {
            request_id: Some(awaited),
            ..
        } = &self.state
        else {
            log::debug!("Dropping segmentation result {}: no prompt in flight", request_id);
            return Ok(ToolOutcome::None);
        };
        if *awaited != request_id {
            log::debug!(
                "Dropping segmentation result {}: awaiting {}",
                request_id,
                awaited
            );
            return Ok(ToolOutcome::None);
        }

        self.state = ToolState::Idle;
        let shape = match self.ai_output {
            AiOutput::Polygon => {
                let polygon =
                    mask_to_polygon(mask, self.simplify_tolerance, self.mask_threshold)?;
                Shape::Polygon(polygon)
            }
            AiOutput::Box => {
                let tight = mask_to_tight_box(mask, self.mask_threshold)?;
                Shape::BoundingBox(
                    tight.clamp_to(doc.set().image_width(), doc.set().image_height()),
                )
            }
        };

        let id = doc.alloc_id();
        doc.execute(Command::AddAnnotation {
            annotation: Annotation::new(id, self.active_class, shape)
                .with_origin(Origin::AiAssisted),
        })?;
        log::info!("AI segmentation committed annotation {}", id);
        Ok(ToolOutcome::Committed(id))
    }

    /// Handle a failed segmentation request: return to `Idle` if it was
    /// the awaited prompt.
    pub fn on_segmentation_failure(&mut self, request_id: u64) {
        if self.cancelled_request_id() == Some(request_id) {
            log::warn!("Segmentation request {} failed", request_id);
            self.state = ToolState::Idle;
        }
    }

    // --------------------------------
    // Gesture helpers
    // --------------------------------

    fn select_down(&mut self, doc: &Document, pos: Point) -> ToolOutcome {
        // Grab a handle of the current selection before hit-testing other
        // shapes, so handles win over overlapping annotations.
        if let ToolState::EditingSelection { id, .. } = self.state {
            if let Some(annotation) = doc.set().get(id) {
                if let Some(grab) = grab_target(&annotation.shape, &pos) {
                    self.state = ToolState::EditingSelection {
                        id,
                        original: Some(annotation.shape.clone()),
                        pending: None,
                        grab: Some(grab),
                        anchor: pos,
                    };
                    return ToolOutcome::None;
                }
            }
        }

        match doc.set().hit_test(&pos) {
            Some(id) => {
                let shape = doc.set().get(id).map(|a| a.shape.clone());
                self.state = ToolState::EditingSelection {
                    id,
                    original: shape,
                    pending: None,
                    grab: Some(GrabTarget::Whole),
                    anchor: pos,
                };
                ToolOutcome::SelectionChanged(Some(id))
            }
            None => {
                let had_selection =
                    matches!(self.state, ToolState::EditingSelection { .. });
                self.state = ToolState::Idle;
                if had_selection {
                    ToolOutcome::SelectionChanged(None)
                } else {
                    ToolOutcome::None
                }
            }
        }
    }

    fn polygon_down(
        &mut self,
        doc: &mut Document,
        pos: Point,
    ) -> Result<ToolOutcome, EngineError> {
        match &mut self.state {
            ToolState::Idle => {
                self.state = ToolState::DrawingPolygon {
                    vertices: vec![pos],
                };
                Ok(ToolOutcome::None)
            }
            ToolState::DrawingPolygon { vertices } => {
                let closes = vertices.len() >= 3
                    && vertices[0].distance_to(&pos) <= POLYGON_CLOSE_THRESHOLD;
                if closes {
                    let vertices = std::mem::take(vertices);
                    self.state = ToolState::Idle;
                    self.commit_polygon(doc, vertices)
                } else {
                    vertices.push(pos);
                    Ok(ToolOutcome::None)
                }
            }
            _ => Ok(ToolOutcome::None),
        }
    }

    fn commit_polygon(
        &mut self,
        doc: &mut Document,
        vertices: Vec<Point>,
    ) -> Result<ToolOutcome, EngineError> {
        let polygon = Polygon::new(vertices);
        polygon.validate(doc.set().image_width(), doc.set().image_height())?;
        let id = doc.alloc_id();
        doc.execute(Command::AddAnnotation {
            annotation: Annotation::new(id, self.active_class, Shape::Polygon(polygon)),
        })?;
        Ok(ToolOutcome::Committed(id))
    }

    fn finish_box(
        &mut self,
        doc: &mut Document,
        start: Point,
        end: Point,
    ) -> Result<ToolOutcome, EngineError> {
        let bbox = BoundingBox::from_corners(start, end)
            .clamp_to(doc.set().image_width(), doc.set().image_height());
        if bbox.width() < self.min_box_size || bbox.height() < self.min_box_size {
            log::debug!("Discarding box below {} px minimum", self.min_box_size);
            return Ok(ToolOutcome::Cancelled(None));
        }

        match self.kind {
            ToolKind::AiBox => {
                let prompt = Prompt::Box(bbox);
                self.state = ToolState::AwaitingSegmentation {
                    prompt,
                    request_id: None,
                };
                Ok(ToolOutcome::PromptIssued {
                    prompt,
                    superseded: None,
                })
            }
            _ => {
                bbox.validate(doc.set().image_width(), doc.set().image_height())?;
                let id = doc.alloc_id();
                doc.execute(Command::AddAnnotation {
                    annotation: Annotation::new(id, self.active_class, Shape::BoundingBox(bbox)),
                })?;
                Ok(ToolOutcome::Committed(id))
            }
        }
    }
}

/// Find the handle (vertex or corner) of a shape at a position.
fn grab_target(shape: &Shape, pos: &Point) -> Option<GrabTarget> {
    match shape {
        Shape::Polygon(poly) => poly
            .vertices
            .iter()
            .position(|v| v.distance_to(pos) <= HANDLE_HIT_RADIUS)
            .map(GrabTarget::Vertex),
        Shape::BoundingBox(b) => {
            let corners = [
                Point::new(b.x_min, b.y_min),
                Point::new(b.x_max, b.y_min),
                Point::new(b.x_max, b.y_max),
                Point::new(b.x_min, b.y_max),
            ];
            corners
                .iter()
                .position(|c| c.distance_to(pos) <= HANDLE_HIT_RADIUS)
                .map(GrabTarget::Corner)
        }
    }
}

/// Compute the dragged shape from the gesture-start shape.
fn drag_shape(original: &Shape, grab: GrabTarget, anchor: Point, pos: Point) -> Shape {
    let dx = pos.x - anchor.x;
    let dy = pos.y - anchor.y;
    match (grab, original) {
        (GrabTarget::Whole, shape) => shape.translated(dx, dy),
        (GrabTarget::Vertex(i), Shape::Polygon(poly)) => {
            let mut vertices = poly.vertices.clone();
            if let Some(v) = vertices.get_mut(i) {
                *v = pos;
            }
            Shape::Polygon(Polygon::new(vertices))
        }
        (GrabTarget::Corner(i), Shape::BoundingBox(b)) => {
            // The opposite corner stays fixed
            let opposite = match i {
                0 => Point::new(b.x_max, b.y_max),
                1 => Point::new(b.x_min, b.y_max),
                2 => Point::new(b.x_min, b.y_min),
                _ => Point::new(b.x_max, b.y_min),
            };
            Shape::BoundingBox(BoundingBox::from_corners(opposite, pos))
        }
        // Mismatched grab/shape, keep the original
        (_, shape) => shape.clone(),
    }
}
