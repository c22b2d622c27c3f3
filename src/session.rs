//! Session management.
//!
//! A [`Session`] ties the pieces together: the shared class table, one
//! [`Document`] per open image (each with its own undo history), the
//! active document, and the tool machine. Switching documents is atomic
//! from the caller's perspective: the tool resets and any in-flight
//! segmentation prompt is reported back for invalidation at the bridge,
//! so a result for the previous image can never land in the new one.
//!
//! Sessions snapshot to JSON. Undo histories are not persisted; loading
//! drops annotations that reference unknown classes or no longer pass
//! geometry validation, and reports how many.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::geometry::Point;
use crate::loader::ImageProvider;
use crate::model::{AnnotationId, ClassDef, ClassTable};
use crate::store::AnnotationSet;
use crate::tool::{AiOutput, ToolKind, ToolMachine, ToolOutcome};
use crate::undo::Document;
use crate::worker::BridgeEvent;

/// Current snapshot file format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable state of a session: classes and per-image annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Version of the snapshot format
    pub version: u32,
    /// All class definitions
    pub classes: Vec<ClassDef>,
    /// Annotation sets of the open documents
    pub documents: Vec<AnnotationSet>,
}

/// Outcome of loading a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadReport {
    /// Annotations restored
    pub loaded: usize,
    /// Annotations dropped (unknown class or invalid geometry)
    pub dropped: usize,
}

/// One annotation session: classes, open documents, and the tool.
pub struct Session {
    config: EngineConfig,
    classes: ClassTable,
    documents: HashMap<PathBuf, Document>,
    active: Option<PathBuf>,
    tool: ToolMachine,
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        let tool = ToolMachine::new(&config);
        Self {
            config,
            classes: ClassTable::new(),
            documents: HashMap::new(),
            active: None,
            tool,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --------------------------------
    // Documents
    // --------------------------------

    /// Open (or return to) a document and make it active.
    ///
    /// Returns the request id of a cancelled segmentation prompt, if the
    /// switch interrupted one; forward it to the bridge.
    pub fn open(&mut self, path: impl Into<PathBuf>, width: u32, height: u32) -> Option<u64> {
        let path = path.into();
        self.documents.entry(path.clone()).or_insert_with(|| {
            log::info!("Opening document {:?} ({}x{})", path, width, height);
            Document::new(
                AnnotationSet::new(path.clone(), width, height),
                self.config.max_undo,
            )
        });
        self.activate_opened(path)
    }

    /// Open a document, reading the image dimensions from a provider.
    pub fn open_with(
        &mut self,
        provider: &impl ImageProvider,
        path: impl Into<PathBuf>,
    ) -> Result<Option<u64>, EngineError> {
        let path = path.into();
        if self.documents.contains_key(&path) {
            return Ok(self.activate_opened(path));
        }
        let (width, height) = provider.dimensions(&path)?;
        Ok(self.open(path, width, height))
    }

    /// Switch to an already open document.
    pub fn activate(&mut self, path: &Path) -> Result<Option<u64>, EngineError> {
        if !self.documents.contains_key(path) {
            return Err(EngineError::DocumentNotOpen {
                path: path.to_path_buf(),
            });
        }
        Ok(self.activate_opened(path.to_path_buf()))
    }

    fn activate_opened(&mut self, path: PathBuf) -> Option<u64> {
        if self.active.as_deref() == Some(path.as_path()) {
            return None;
        }
        // Reset the tool so a gesture or prompt from the previous image
        // cannot commit into this one
        let cancelled = self.tool.reset();
        log::debug!("Switching active document to {:?}", path);
        self.active = Some(path);
        cancelled
    }

    /// Close a document, dropping its annotations and history.
    pub fn close(&mut self, path: &Path) -> Result<Option<u64>, EngineError> {
        let doc = self
            .documents
            .remove(path)
            .ok_or_else(|| EngineError::DocumentNotOpen {
                path: path.to_path_buf(),
            })?;
        if doc.is_dirty() {
            log::warn!("Closing {:?} with unsaved changes", path);
        }
        let mut cancelled = None;
        if self.active.as_deref() == Some(path) {
            cancelled = self.tool.reset();
            self.active = None;
        }
        Ok(cancelled)
    }

    /// Path of the active document.
    pub fn active_path(&self) -> Option<&Path> {
        self.active.as_deref()
    }

    /// The active document.
    pub fn active_document(&self) -> Option<&Document> {
        self.documents.get(self.active.as_ref()?)
    }

    /// Paths of all open documents, in no particular order.
    pub fn open_paths(&self) -> impl Iterator<Item = &Path> {
        self.documents.keys().map(PathBuf::as_path)
    }

    /// Paths of documents with unsaved changes.
    pub fn dirty_paths(&self) -> Vec<&Path> {
        self.documents
            .iter()
            .filter(|(_, d)| d.is_dirty())
            .map(|(p, _)| p.as_path())
            .collect()
    }

    fn active_parts(&mut self) -> Option<(&mut Document, &mut ToolMachine)> {
        let Self {
            documents,
            active,
            tool,
            ..
        } = self;
        let doc = documents.get_mut(active.as_ref()?)?;
        Some((doc, tool))
    }

    // --------------------------------
    // Classes
    // --------------------------------

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// Add a class and return its id.
    pub fn add_class(&mut self, name: impl Into<String>) -> Result<u32, EngineError> {
        Ok(self.classes.add(name)?.id)
    }

    /// Rename and/or recolor a class.
    pub fn update_class(
        &mut self,
        id: u32,
        name: Option<&str>,
        color: Option<[u8; 3]>,
    ) -> Result<(), EngineError> {
        self.classes.update(id, name, color)
    }

    /// Remove a class.
    ///
    /// Rejected with `ClassInUse` while any annotation in any open
    /// document still references it; the caller must reassign or delete
    /// those first.
    pub fn remove_class(&mut self, id: u32) -> Result<ClassDef, EngineError> {
        let count: usize = self.documents.values().map(|d| d.set().count_class(id)).sum();
        if count > 0 {
            return Err(EngineError::ClassInUse { id, count });
        }
        let removed = self.classes.remove(id)?;
        if self.tool.active_class() == id {
            let fallback = self.classes.iter().next().map(|c| c.id).unwrap_or(0);
            self.tool.set_active_class(fallback);
        }
        Ok(removed)
    }

    /// Set the class assigned to newly drawn annotations.
    pub fn set_active_class(&mut self, id: u32) -> Result<(), EngineError> {
        if !self.classes.contains(id) {
            return Err(EngineError::ClassNotFound { id });
        }
        self.tool.set_active_class(id);
        Ok(())
    }

    // --------------------------------
    // Tool and editing
    // --------------------------------

    pub fn tool(&self) -> &ToolMachine {
        &self.tool
    }

    /// Switch the active tool. Returns a cancelled request id, if any.
    pub fn select_tool(&mut self, kind: ToolKind) -> Option<u64> {
        self.tool.select_tool(kind)
    }

    /// Set what AI segmentation produces (box or polygon).
    pub fn set_ai_output(&mut self, output: AiOutput) {
        self.tool.set_ai_output(output);
    }

    /// Forward a pointer-down event to the tool.
    pub fn pointer_down(&mut self, pos: Point) -> Result<ToolOutcome, EngineError> {
        match self.active_parts() {
            Some((doc, tool)) => tool.pointer_down(doc, pos),
            None => Ok(ToolOutcome::None),
        }
    }

    /// Forward a pointer-move event to the tool.
    pub fn pointer_move(&mut self, pos: Point) -> ToolOutcome {
        match self.active_parts() {
            Some((doc, tool)) => tool.pointer_move(doc, pos),
            None => ToolOutcome::None,
        }
    }

    /// Forward a pointer-up event to the tool.
    pub fn pointer_up(&mut self, pos: Point) -> Result<ToolOutcome, EngineError> {
        match self.active_parts() {
            Some((doc, tool)) => tool.pointer_up(doc, pos),
            None => Ok(ToolOutcome::None),
        }
    }

    /// Confirm the in-progress gesture (e.g. close a polygon).
    pub fn confirm(&mut self) -> Result<ToolOutcome, EngineError> {
        match self.active_parts() {
            Some((doc, tool)) => tool.confirm(doc),
            None => Ok(ToolOutcome::None),
        }
    }

    /// Abort the in-progress gesture.
    pub fn cancel(&mut self) -> ToolOutcome {
        self.tool.cancel()
    }

    /// Delete the selected annotation.
    pub fn delete_selected(&mut self) -> Result<ToolOutcome, EngineError> {
        match self.active_parts() {
            Some((doc, tool)) => tool.delete_selected(doc),
            None => Ok(ToolOutcome::None),
        }
    }

    /// Change the class of the selected annotation.
    pub fn set_selected_class(&mut self, class_id: u32) -> Result<ToolOutcome, EngineError> {
        if !self.classes.contains(class_id) {
            return Err(EngineError::ClassNotFound { id: class_id });
        }
        match self.active_parts() {
            Some((doc, tool)) => tool.set_selected_class(doc, class_id),
            None => Ok(ToolOutcome::None),
        }
    }

    /// Bind a bridge-assigned request id to the awaited prompt.
    pub fn bind_request(&mut self, id: u64) {
        self.tool.bind_request(id);
    }

    /// Handle an event polled from the segmentation bridge.
    pub fn handle_event(&mut self, event: BridgeEvent) -> Result<ToolOutcome, EngineError> {
        match event {
            BridgeEvent::ModelReady => {
                log::info!("Segmentation model ready");
                Ok(ToolOutcome::None)
            }
            BridgeEvent::ModelFailed(error) => {
                log::error!("Segmentation model failed to load: {}", error);
                self.tool.cancel();
                Ok(ToolOutcome::None)
            }
            BridgeEvent::MaskReady { request_id, mask } => match self.active_parts() {
                Some((doc, tool)) => tool.on_segmentation_result(doc, request_id, &mask),
                None => Ok(ToolOutcome::None),
            },
            BridgeEvent::RequestFailed { request_id, error } => {
                log::warn!("Segmentation request {} failed: {}", request_id, error);
                self.tool.on_segmentation_failure(request_id);
                Ok(ToolOutcome::None)
            }
        }
    }

    /// Undo the most recent command in the active document.
    pub fn undo(&mut self) -> Result<(), EngineError> {
        match self.active_parts() {
            Some((doc, _)) => doc.undo(),
            None => Err(EngineError::NothingToUndo),
        }
    }

    /// Redo the most recently undone command in the active document.
    pub fn redo(&mut self) -> Result<(), EngineError> {
        match self.active_parts() {
            Some((doc, _)) => doc.redo(),
            None => Err(EngineError::NothingToRedo),
        }
    }

    // --------------------------------
    // Persistence
    // --------------------------------

    /// Snapshot classes and annotations. Undo histories are not part of
    /// the snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            classes: self.classes.to_vec(),
            documents: self.documents.values().map(|d| d.set().clone()).collect(),
        }
    }

    /// Serialize a snapshot to pretty-printed JSON.
    pub fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// Mark every document as saved.
    pub fn mark_all_saved(&mut self) {
        for doc in self.documents.values_mut() {
            doc.mark_saved();
        }
    }

    /// Replace the session contents with a snapshot.
    ///
    /// Annotations referencing unknown classes or failing geometry
    /// validation are dropped and counted in the report. Loaded
    /// documents start clean, with empty histories.
    pub fn load_snapshot(&mut self, snapshot: SessionSnapshot) -> Result<LoadReport, EngineError> {
        if snapshot.version != SNAPSHOT_VERSION {
            log::warn!(
                "Snapshot version mismatch: expected {}, found {}",
                SNAPSHOT_VERSION,
                snapshot.version
            );
        }

        let cancelled = self.tool.reset();
        if let Some(id) = cancelled {
            log::debug!("Snapshot load cancelled in-flight request {}", id);
        }
        self.documents.clear();
        self.active = None;

        self.classes = ClassTable::new();
        for class in snapshot.classes {
            self.classes
                .add_with_id(class.id, class.name, Some(class.color))?;
        }

        let mut report = LoadReport::default();
        for mut set in snapshot.documents {
            // Hand-edited snapshots can carry duplicate ids; keep the
            // first occurrence of each
            let duplicates = set.dedupe_ids();
            if duplicates > 0 {
                log::warn!(
                    "Dropping {} duplicate-id annotations from {:?}",
                    duplicates,
                    set.image_path()
                );
                report.dropped += duplicates;
            }
            let invalid: Vec<AnnotationId> = set
                .all()
                .iter()
                .filter(|a| {
                    !self.classes.contains(a.class_id)
                        || a.shape
                            .validate(set.image_width(), set.image_height())
                            .is_err()
                })
                .map(|a| a.id)
                .collect();
            for id in invalid {
                log::warn!("Dropping annotation {} from {:?}", id, set.image_path());
                set.remove(id)?;
                report.dropped += 1;
            }
            report.loaded += set.len();
            set.mark_clean();
            self.documents.insert(
                set.image_path().to_path_buf(),
                Document::new(set, self.config.max_undo),
            );
        }

        log::info!(
            "Loaded snapshot: {} annotations, {} dropped",
            report.loaded,
            report.dropped
        );
        Ok(report)
    }

    /// Load a snapshot from JSON.
    pub fn load_snapshot_json(&mut self, json: &str) -> Result<LoadReport, EngineError> {
        let snapshot: SessionSnapshot = serde_json::from_str(json).map_err(|e| {
            EngineError::invalid_geometry(format!("malformed snapshot: {}", e))
        })?;
        self.load_snapshot(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;
    use crate::model::Shape;
    use crate::tool::ToolState;

    fn session() -> Session {
        let mut s = Session::new(EngineConfig::default());
        s.add_class("object").expect("class");
        s
    }

    fn draw_box(s: &mut Session, x1: f32, y1: f32, x2: f32, y2: f32) -> AnnotationId {
        s.select_tool(ToolKind::BoundingBox);
        s.pointer_down(Point::new(x1, y1)).expect("down");
        let outcome = s.pointer_up(Point::new(x2, y2)).expect("up");
        let ToolOutcome::Committed(id) = outcome else {
            panic!("expected commit, got {:?}", outcome);
        };
        id
    }

    #[test]
    fn open_caches_documents() {
        let mut s = session();
        s.open("a.jpg", 640, 480);
        draw_box(&mut s, 10.0, 10.0, 50.0, 50.0);

        s.open("b.jpg", 800, 600);
        assert_eq!(s.active_document().expect("doc").set().len(), 0);

        // Returning to the first image finds its annotations intact
        s.open("a.jpg", 640, 480);
        assert_eq!(s.active_document().expect("doc").set().len(), 1);
    }

    #[test]
    fn histories_are_per_document() {
        let mut s = session();
        s.open("a.jpg", 640, 480);
        draw_box(&mut s, 10.0, 10.0, 50.0, 50.0);

        s.open("b.jpg", 800, 600);
        assert_eq!(s.undo(), Err(EngineError::NothingToUndo));

        s.activate(Path::new("a.jpg")).expect("activate");
        s.undo().expect("undo");
        assert_eq!(s.active_document().expect("doc").set().len(), 0);
    }

    #[test]
    fn activating_unopened_document_fails() {
        let mut s = session();
        assert!(matches!(
            s.activate(Path::new("nope.jpg")),
            Err(EngineError::DocumentNotOpen { .. })
        ));
    }

    #[test]
    fn switch_cancels_in_flight_prompt() {
        let mut s = session();
        s.open("a.jpg", 640, 480);
        s.select_tool(ToolKind::AiPoint);
        s.pointer_down(Point::new(50.0, 50.0)).expect("down");
        s.bind_request(9);

        let cancelled = s.open("b.jpg", 800, 600);
        assert_eq!(cancelled, Some(9));
        assert!(s.tool().state().is_idle());
    }

    #[test]
    fn reactivating_active_document_is_a_no_op() {
        let mut s = session();
        s.open("a.jpg", 640, 480);
        s.select_tool(ToolKind::AiPoint);
        s.pointer_down(Point::new(50.0, 50.0)).expect("down");
        s.bind_request(9);

        assert_eq!(s.activate(Path::new("a.jpg")).expect("activate"), None);
        assert!(matches!(
            s.tool().state(),
            ToolState::AwaitingSegmentation { .. }
        ));
    }

    #[test]
    fn class_in_use_cannot_be_removed() {
        let mut s = session();
        let class = s.classes().get_by_name("object").expect("class").id;
        s.open("a.jpg", 640, 480);
        draw_box(&mut s, 10.0, 10.0, 50.0, 50.0);

        assert_eq!(
            s.remove_class(class),
            Err(EngineError::ClassInUse { id: class, count: 1 })
        );

        // Annotation gone, class removable
        s.select_tool(ToolKind::Select);
        s.pointer_down(Point::new(30.0, 30.0)).expect("down");
        s.pointer_up(Point::new(30.0, 30.0)).expect("up");
        s.delete_selected().expect("delete");
        assert!(s.remove_class(class).is_ok());
    }

    #[test]
    fn class_references_in_other_documents_count() {
        let mut s = session();
        let class = s.classes().get_by_name("object").expect("class").id;
        s.open("a.jpg", 640, 480);
        draw_box(&mut s, 10.0, 10.0, 50.0, 50.0);
        s.open("b.jpg", 800, 600);

        assert_eq!(
            s.remove_class(class),
            Err(EngineError::ClassInUse { id: class, count: 1 })
        );
    }

    #[test]
    fn removing_active_class_falls_back() {
        let mut s = session();
        let first = s.classes().get_by_name("object").expect("class").id;
        let second = s.add_class("other").expect("class");
        s.set_active_class(second).expect("set");

        s.remove_class(second).expect("remove");
        assert_eq!(s.tool().active_class(), first);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut s = session();
        s.add_class("second").expect("class");
        s.open("a.jpg", 640, 480);
        draw_box(&mut s, 10.0, 10.0, 50.0, 50.0);
        let json = s.snapshot_json().expect("serialize");

        let mut restored = Session::new(EngineConfig::default());
        let report = restored.load_snapshot_json(&json).expect("load");
        assert_eq!(report, LoadReport { loaded: 1, dropped: 0 });
        assert_eq!(restored.classes().len(), 2);

        restored.activate(Path::new("a.jpg")).expect("activate");
        let doc = restored.active_document().expect("doc");
        assert_eq!(doc.set().len(), 1);
        // Loaded documents start clean with empty histories
        assert!(!doc.is_dirty());
        assert!(!doc.history().can_undo());
    }

    #[test]
    fn load_drops_orphaned_annotations() {
        let mut s = session();
        s.open("a.jpg", 640, 480);
        draw_box(&mut s, 10.0, 10.0, 50.0, 50.0);

        let mut snapshot = s.snapshot();
        // Simulate a snapshot written against a class that no longer exists
        snapshot.classes.clear();

        let mut restored = Session::new(EngineConfig::default());
        let report = restored.load_snapshot(snapshot).expect("load");
        assert_eq!(report, LoadReport { loaded: 0, dropped: 1 });
    }

    #[test]
    fn load_drops_duplicate_ids() {
        let mut s = session();
        s.open("a.jpg", 640, 480);
        draw_box(&mut s, 10.0, 10.0, 50.0, 50.0);

        // Simulate a hand-edited snapshot repeating an annotation id
        let mut json: serde_json::Value =
            serde_json::from_str(&s.snapshot_json().expect("serialize")).expect("parse");
        let anns = json["documents"][0]["annotations"]
            .as_array_mut()
            .expect("array");
        let dup = anns[0].clone();
        anns.push(dup);

        let mut restored = Session::new(EngineConfig::default());
        let report = restored
            .load_snapshot_json(&json.to_string())
            .expect("load");
        assert_eq!(report, LoadReport { loaded: 1, dropped: 1 });

        restored.activate(Path::new("a.jpg")).expect("activate");
        assert_eq!(restored.active_document().expect("doc").set().len(), 1);
    }

    #[test]
    fn load_preserves_annotation_ids() {
        let mut s = session();
        s.open("a.jpg", 640, 480);
        let id = draw_box(&mut s, 10.0, 10.0, 50.0, 50.0);
        let snapshot = s.snapshot();

        let mut restored = Session::new(EngineConfig::default());
        restored.load_snapshot(snapshot).expect("load");
        restored.activate(Path::new("a.jpg")).expect("activate");
        assert!(restored.active_document().expect("doc").set().get(id).is_some());
    }

    #[test]
    fn dirty_paths_track_unsaved_documents() {
        let mut s = session();
        s.open("a.jpg", 640, 480);
        draw_box(&mut s, 10.0, 10.0, 50.0, 50.0);
        s.open("b.jpg", 800, 600);

        assert_eq!(s.dirty_paths(), vec![Path::new("a.jpg")]);
        s.mark_all_saved();
        assert!(s.dirty_paths().is_empty());
    }

    #[test]
    fn mask_event_commits_into_active_document() {
        use crate::geometry::Mask;

        let mut s = session();
        s.open("a.jpg", 64, 64);
        s.select_tool(ToolKind::AiPoint);
        s.set_ai_output(AiOutput::Box);
        s.pointer_down(Point::new(16.0, 16.0)).expect("down");
        s.bind_request(1);

        let mask = Mask::from_fn(64, 64, |x, y| {
            if x >= 8 && x < 24 && y >= 8 && y < 24 { 1.0 } else { 0.0 }
        });
        let outcome = s
            .handle_event(BridgeEvent::MaskReady { request_id: 1, mask })
            .expect("event");
        assert!(matches!(outcome, ToolOutcome::Committed(_)));
        assert_eq!(s.active_document().expect("doc").set().len(), 1);
    }

    #[test]
    fn direct_edits_remain_undoable_via_session() {
        let mut s = session();
        s.open("a.jpg", 640, 480);
        let id = draw_box(&mut s, 10.0, 10.0, 50.0, 50.0);
        s.undo().expect("undo");
        assert!(s.active_document().expect("doc").set().get(id).is_none());
        s.redo().expect("redo");
        assert!(s.active_document().expect("doc").set().get(id).is_some());
    }

    #[test]
    fn malformed_snapshot_json_is_rejected() {
        let mut s = session();
        assert!(s.load_snapshot_json("{not json").is_err());
    }

    #[test]
    fn snapshot_survives_polygon_shapes() {
        let mut s = session();
        s.open("a.jpg", 640, 480);
        s.select_tool(ToolKind::Polygon);
        for p in [
            Point::new(100.0, 100.0),
            Point::new(200.0, 100.0),
            Point::new(150.0, 200.0),
        ] {
            s.pointer_down(p).expect("down");
        }
        s.confirm().expect("confirm");

        let mut restored = Session::new(EngineConfig::default());
        let report = restored
            .load_snapshot(s.snapshot())
            .expect("load");
        assert_eq!(report.loaded, 1);
        restored.activate(Path::new("a.jpg")).expect("activate");
        let shape = &restored.active_document().expect("doc").set().all()[0].shape;
        assert!(matches!(shape, Shape::Polygon(Polygon { .. })));
    }
}
