//! Undo/Redo command engine for annotation mutations.
//!
//! Every mutation of an [`AnnotationSet`] goes through an invertible
//! [`Command`]. The [`History`] owns an undo stack and a redo stack per
//! document; executing a new command clears the redo stack (no branching
//! history). Composite edits are grouped into a [`Command::Batch`] so one
//! undo reverts the whole edit.

use crate::error::EngineError;
use crate::model::{Annotation, AnnotationId, Shape};
use crate::store::AnnotationSet;

/// An invertible mutation of an annotation set.
///
/// Commands are immutable once created and store enough state to reverse
/// their effect exactly.
#[derive(Debug, Clone)]
pub enum Command {
    /// Append an annotation.
    AddAnnotation {
        /// The annotation to add (id already allocated)
        annotation: Annotation,
    },
    /// Remove an annotation.
    RemoveAnnotation {
        /// Z-order position of the annotation, for in-place restore
        index: usize,
        /// The removed annotation (stored for undo)
        annotation: Annotation,
    },
    /// Replace an annotation's geometry.
    UpdateGeometry {
        /// The annotation id
        id: AnnotationId,
        /// The shape before modification
        old_shape: Shape,
        /// The shape after modification
        new_shape: Shape,
    },
    /// Change an annotation's class.
    UpdateClass {
        /// The annotation id
        id: AnnotationId,
        /// The class before modification
        old_class: u32,
        /// The class after modification
        new_class: u32,
    },
    /// Group multiple commands into one undo step.
    Batch {
        /// Description of the batch operation
        description: String,
        /// The commands in this batch, applied in order
        commands: Vec<Command>,
    },
}

impl Command {
    /// Build a remove command for a live annotation, capturing its
    /// current z-order position.
    pub fn remove_annotation(
        set: &AnnotationSet,
        id: AnnotationId,
    ) -> Result<Command, EngineError> {
        let index = set
            .all()
            .iter()
            .position(|a| a.id == id)
            .ok_or(EngineError::NotFound { id })?;
        Ok(Command::RemoveAnnotation {
            index,
            annotation: set.all()[index].clone(),
        })
    }

    /// Build a batch deleting several annotations at once.
    pub fn batch_delete(
        set: &AnnotationSet,
        ids: &[AnnotationId],
    ) -> Result<Command, EngineError> {
        let mut commands = Vec::with_capacity(ids.len());
        for &id in ids {
            commands.push(Command::remove_annotation(set, id)?);
        }
        // Order by descending z-index: undo replays the batch in reverse,
        // so re-insertion runs ascending and every annotation lands back
        // at its captured position.
        commands.sort_by_key(|c| match c {
            Command::RemoveAnnotation { index, .. } => std::cmp::Reverse(*index),
            _ => std::cmp::Reverse(usize::MAX),
        });
        Ok(Command::Batch {
            description: format!("Delete {} annotations", ids.len()),
            commands,
        })
    }

    /// Get a human-readable description of this command.
    pub fn description(&self) -> String {
        match self {
            Command::AddAnnotation { annotation } => {
                format!("Add {}", annotation.shape.kind_name())
            }
            Command::RemoveAnnotation { annotation, .. } => {
                format!("Delete {}", annotation.shape.kind_name())
            }
            Command::UpdateGeometry { .. } => "Move/resize annotation".to_string(),
            Command::UpdateClass { .. } => "Change class".to_string(),
            Command::Batch { description, .. } => description.clone(),
        }
    }

    /// Apply the command to a set.
    pub fn apply(&self, set: &mut AnnotationSet) -> Result<(), EngineError> {
        match self {
            Command::AddAnnotation { annotation } => set.insert(annotation.clone()),
            Command::RemoveAnnotation { annotation, .. } => {
                set.remove(annotation.id).map(|_| ())
            }
            Command::UpdateGeometry { id, new_shape, .. } => {
                set.update_shape(*id, new_shape.clone()).map(|_| ())
            }
            Command::UpdateClass { id, new_class, .. } => {
                set.update_class(*id, *new_class).map(|_| ())
            }
            Command::Batch { commands, .. } => {
                for command in commands {
                    command.apply(set)?;
                }
                Ok(())
            }
        }
    }

    /// Reverse the command's effect on a set.
    pub fn invert(&self, set: &mut AnnotationSet) -> Result<(), EngineError> {
        match self {
            Command::AddAnnotation { annotation } => set.remove(annotation.id).map(|_| ()),
            Command::RemoveAnnotation { index, annotation } => {
                set.insert_at(*index, annotation.clone())
            }
            Command::UpdateGeometry { id, old_shape, .. } => {
                set.update_shape(*id, old_shape.clone()).map(|_| ())
            }
            Command::UpdateClass { id, old_class, .. } => {
                set.update_class(*id, *old_class).map(|_| ())
            }
            Command::Batch { commands, .. } => {
                // Undo in reverse order
                for command in commands.iter().rev() {
                    command.invert(set)?;
                }
                Ok(())
            }
        }
    }
}

/// The undo/redo history of one document.
///
/// `undo()` moves the top command to the redo stack after inverting it;
/// `redo()` is symmetric. Executing a new command clears the redo stack.
#[derive(Debug, Clone)]
pub struct History {
    undo_stack: Vec<Command>,
    redo_stack: Vec<Command>,
    max_depth: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(50)
    }
}

impl History {
    /// Create a history keeping at most `max_depth` undo steps.
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_depth,
        }
    }

    /// Apply a command to the set and record it.
    pub fn execute(&mut self, command: Command, set: &mut AnnotationSet) -> Result<(), EngineError> {
        command.apply(set)?;
        log::debug!("Executed '{}'", command.description());
        self.undo_stack.push(command);
        self.redo_stack.clear();
        while self.undo_stack.len() > self.max_depth {
            self.undo_stack.remove(0);
        }
        Ok(())
    }

    /// Undo the most recent command.
    pub fn undo(&mut self, set: &mut AnnotationSet) -> Result<(), EngineError> {
        let command = self.undo_stack.pop().ok_or(EngineError::NothingToUndo)?;
        if let Err(e) = command.invert(set) {
            self.undo_stack.push(command);
            return Err(e);
        }
        log::debug!("Undid '{}'", command.description());
        self.redo_stack.push(command);
        Ok(())
    }

    /// Redo the most recently undone command.
    pub fn redo(&mut self, set: &mut AnnotationSet) -> Result<(), EngineError> {
        let command = self.redo_stack.pop().ok_or(EngineError::NothingToRedo)?;
        if let Err(e) = command.apply(set) {
            self.redo_stack.push(command);
            return Err(e);
        }
        log::debug!("Redid '{}'", command.description());
        self.undo_stack.push(command);
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Description of the command that would be undone.
    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.last().map(|c| c.description())
    }

    /// Description of the command that would be redone.
    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.last().map(|c| c.description())
    }

    /// Drop all history.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}

/// One open image document: an annotation set plus its history.
///
/// All mutation goes through [`execute`](Document::execute); no caller
/// touches the set directly.
#[derive(Debug, Clone)]
pub struct Document {
    set: AnnotationSet,
    history: History,
}

impl Document {
    pub fn new(set: AnnotationSet, max_undo: usize) -> Self {
        Self {
            set,
            history: History::new(max_undo),
        }
    }

    /// Read-only view of the annotation set.
    pub fn set(&self) -> &AnnotationSet {
        &self.set
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Allocate the next annotation id.
    pub fn alloc_id(&mut self) -> AnnotationId {
        self.set.alloc_id()
    }

    /// Execute a command against this document.
    pub fn execute(&mut self, command: Command) -> Result<(), EngineError> {
        self.history.execute(command, &mut self.set)
    }

    /// Undo the most recent command.
    pub fn undo(&mut self) -> Result<(), EngineError> {
        self.history.undo(&mut self.set)
    }

    /// Redo the most recently undone command.
    pub fn redo(&mut self) -> Result<(), EngineError> {
        self.history.redo(&mut self.set)
    }

    pub fn is_dirty(&self) -> bool {
        self.set.is_dirty()
    }

    /// Mark the document as saved.
    pub fn mark_saved(&mut self) {
        self.set.mark_clean();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BoundingBox, Point};
    use crate::model::Annotation;

    fn boxed(x1: f32, y1: f32, x2: f32, y2: f32) -> Shape {
        Shape::BoundingBox(BoundingBox::from_corners(
            Point::new(x1, y1),
            Point::new(x2, y2),
        ))
    }

    fn doc() -> Document {
        Document::new(AnnotationSet::new("test.jpg", 640, 480), 50)
    }

    fn add(doc: &mut Document, x1: f32, y1: f32, x2: f32, y2: f32) -> AnnotationId {
        let id = doc.alloc_id();
        doc.execute(Command::AddAnnotation {
            annotation: Annotation::new(id, 0, boxed(x1, y1, x2, y2)),
        })
        .expect("execute");
        id
    }

    #[test]
    fn add_undo_redo_round_trip() {
        let mut doc = doc();
        let id = add(&mut doc, 10.0, 10.0, 50.0, 50.0);
        assert_eq!(doc.set().len(), 1);

        doc.undo().expect("undo");
        assert_eq!(doc.set().len(), 0);

        doc.redo().expect("redo");
        assert_eq!(doc.set().len(), 1);
        let restored = doc.set().get(id).expect("restored");
        assert_eq!(restored.id, id);
        assert_eq!(restored.shape, boxed(10.0, 10.0, 50.0, 50.0));
    }

    #[test]
    fn empty_stacks_report_errors() {
        let mut doc = doc();
        assert_eq!(doc.undo(), Err(EngineError::NothingToUndo));
        assert_eq!(doc.redo(), Err(EngineError::NothingToRedo));
    }

    #[test]
    fn execute_clears_redo() {
        let mut doc = doc();
        add(&mut doc, 10.0, 10.0, 50.0, 50.0);
        doc.undo().expect("undo");
        assert!(doc.history().can_redo());

        add(&mut doc, 20.0, 20.0, 60.0, 60.0);
        assert!(!doc.history().can_redo());
    }

    #[test]
    fn k_executes_then_k_undos_restores_initial_state() {
        let mut doc = doc();
        let k = 5;
        for i in 0..k {
            let offset = i as f32 * 10.0;
            add(&mut doc, offset, offset, offset + 8.0, offset + 8.0);
        }
        assert_eq!(doc.set().len(), k);

        for _ in 0..k {
            doc.undo().expect("undo");
        }
        assert_eq!(doc.set().len(), 0);
    }

    #[test]
    fn round_trip_after_every_command_kind() {
        let mut doc = doc();
        let id = add(&mut doc, 10.0, 10.0, 50.0, 50.0);

        let commands = vec![
            Command::UpdateGeometry {
                id,
                old_shape: boxed(10.0, 10.0, 50.0, 50.0),
                new_shape: boxed(15.0, 15.0, 55.0, 55.0),
            },
            Command::UpdateClass {
                id,
                old_class: 0,
                new_class: 3,
            },
        ];
        for command in commands {
            doc.execute(command).expect("execute");
            let after = doc.set().clone();
            doc.undo().expect("undo");
            doc.redo().expect("redo");
            assert_eq!(doc.set().all(), after.all());
        }
    }

    #[test]
    fn remove_restores_z_order_on_undo() {
        let mut doc = doc();
        let a = add(&mut doc, 0.0, 0.0, 10.0, 10.0);
        let b = add(&mut doc, 20.0, 0.0, 30.0, 10.0);
        let c = add(&mut doc, 40.0, 0.0, 50.0, 10.0);

        let command = Command::remove_annotation(doc.set(), b).expect("build");
        doc.execute(command).expect("execute");
        assert_eq!(doc.set().len(), 2);

        doc.undo().expect("undo");
        let ids: Vec<_> = doc.set().all().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn batch_undoes_as_one_step() {
        let mut doc = doc();
        let a = add(&mut doc, 0.0, 0.0, 10.0, 10.0);
        let b = add(&mut doc, 20.0, 0.0, 30.0, 10.0);

        let batch = Command::batch_delete(doc.set(), &[a, b]).expect("build");
        doc.execute(batch).expect("execute");
        assert_eq!(doc.set().len(), 0);

        doc.undo().expect("undo");
        assert_eq!(doc.set().len(), 2);
        let ids: Vec<_> = doc.set().all().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn batch_delete_of_scattered_annotations_restores_z_order() {
        let mut doc = doc();
        let ids: Vec<_> = (0..4)
            .map(|i| {
                let x = i as f32 * 20.0;
                add(&mut doc, x, 0.0, x + 10.0, 10.0)
            })
            .collect();

        // Non-adjacent deletions: first and third in z-order
        let batch = Command::batch_delete(doc.set(), &[ids[0], ids[2]]).expect("build");
        doc.execute(batch).expect("execute");
        assert_eq!(doc.set().len(), 2);

        doc.undo().expect("undo");
        let order: Vec<_> = doc.set().all().iter().map(|a| a.id).collect();
        assert_eq!(order, ids);

        // Same holds when ids are given back-to-front
        let batch = Command::batch_delete(doc.set(), &[ids[3], ids[1]]).expect("build");
        doc.execute(batch).expect("execute");
        doc.undo().expect("undo");
        let order: Vec<_> = doc.set().all().iter().map(|a| a.id).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn history_depth_is_capped() {
        let mut doc = Document::new(AnnotationSet::new("test.jpg", 640, 480), 3);
        for i in 0..5 {
            let offset = i as f32 * 10.0;
            add(&mut doc, offset, 0.0, offset + 8.0, 8.0);
        }
        assert_eq!(doc.history().undo_count(), 3);
    }
}
