//! Reversible commands and the undo/redo history
//!
//! Every change to a [`Document`] is a [`Command`] value that carries the
//! prior state it overwrites, so reverting it restores the document exactly.

use crate::annotation::{Annotation, AnnotationId, PropertyValue};
use crate::document::Document;
use crate::error::StateError;
use crate::geometry::{PagePoint, PageRect};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Default number of undo steps kept.
pub const MAX_HISTORY: usize = 200;

/// Corner of a rectangle that stays fixed while resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub old: PropertyValue,
    pub new: PropertyValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create { annotation: Annotation, z: usize },
    Move { id: AnnotationId, from: PagePoint, to: PagePoint },
    Resize { id: AnnotationId, from: PageRect, to: PageRect, anchor: Corner },
    EditProperty { id: AnnotationId, change: PropertyChange },
    Delete { annotation: Annotation, z: usize },
    Reorder { id: AnnotationId, from: usize, to: usize },
    /// Applied in order, reverted in reverse order, one undo step.
    Batch(Vec<Command>),
}

impl Command {
    /// Create `annotation` on top of its page's stack.
    pub fn create(document: &Document, annotation: Annotation) -> Self {
        let z = document.annotations(annotation.page_index()).len();
        Command::Create { annotation, z }
    }

    /// Delete `id`, remembering the annotation and its z-index.
    pub fn delete(document: &Document, id: AnnotationId) -> Result<Self, StateError> {
        let annotation = document.get(id).ok_or(StateError::UnknownAnnotation(id))?.clone();
        let z = document.z_index(id).ok_or(StateError::UnknownAnnotation(id))?;
        Ok(Command::Delete { annotation, z })
    }

    /// Set a property, capturing its current value.
    pub fn edit(
        document: &Document,
        id: AnnotationId,
        new: PropertyValue,
    ) -> Result<Self, StateError> {
        let annotation = document.get(id).ok_or(StateError::UnknownAnnotation(id))?;
        let old = annotation
            .property(&new)
            .ok_or(StateError::UnsupportedProperty { id, field: new.field() })?;
        Ok(Command::EditProperty { id, change: PropertyChange { old, new } })
    }

    /// Move `id` to z-index `to` within its page (clamped to the top).
    pub fn reorder(document: &Document, id: AnnotationId, to: usize) -> Result<Self, StateError> {
        let from = document.z_index(id).ok_or(StateError::UnknownAnnotation(id))?;
        let page = document.get(id).map(Annotation::page_index).unwrap_or_default();
        let top = document.annotations(page).len().saturating_sub(1);
        Ok(Command::Reorder { id, from, to: to.min(top) })
    }

    /// Offset of a move in page-normalized units.
    pub fn delta(&self) -> Option<(f32, f32)> {
        match self {
            Command::Move { from, to, .. } => Some((to.x - from.x, to.y - from.y)),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Move { .. } => "move",
            Command::Resize { .. } => "resize",
            Command::EditProperty { .. } => "edit",
            Command::Delete { .. } => "delete",
            Command::Reorder { .. } => "reorder",
            Command::Batch(_) => "batch",
        }
    }

    /// True when applying the command would not change anything.
    pub fn is_noop(&self) -> bool {
        match self {
            Command::Create { .. } | Command::Delete { .. } => false,
            Command::Move { from, to, .. } => from == to,
            Command::Resize { from, to, .. } => from == to,
            Command::EditProperty { change, .. } => change.old == change.new,
            Command::Reorder { from, to, .. } => from == to,
            Command::Batch(commands) => commands.iter().all(Command::is_noop),
        }
    }

    /// Fold `next` into `self` when both move (or both resize) the same
    /// annotation back to back. Returns false when they cannot be combined.
    pub fn merge(&mut self, next: &Command) -> bool {
        match (self, next) {
            (
                Command::Move { id, to, .. },
                Command::Move { id: next_id, from: next_from, to: next_to },
            ) if id == next_id && to == next_from => {
                *to = *next_to;
                true
            }
            (
                Command::Resize { id, to, anchor, .. },
                Command::Resize { id: next_id, from: next_from, to: next_to, anchor: next_anchor },
            ) if id == next_id && to == next_from && anchor == next_anchor => {
                *to = *next_to;
                true
            }
            _ => false,
        }
    }

    /// Perform the command. On error the document is left unchanged.
    pub fn apply(&self, document: &mut Document) -> Result<(), StateError> {
        match self {
            Command::Create { annotation, z } => document.add(annotation.clone(), *z),
            Command::Move { id, to, .. } => {
                document.update(*id, |a| a.set_rect(a.rect().with_origin(*to)))
            }
            Command::Resize { id, to, .. } => document.update(*id, |a| a.set_rect(*to)),
            Command::EditProperty { id, change } => {
                document.update(*id, |a| a.set_property(change.new.clone()))?.map(drop)
            }
            Command::Delete { annotation, .. } => document.remove(annotation.id()).map(drop),
            Command::Reorder { id, to, .. } => document.reorder(*id, *to).map(drop),
            Command::Batch(commands) => {
                for (done, command) in commands.iter().enumerate() {
                    if let Err(err) = command.apply(document) {
                        rollback(&commands[..done], document, Command::revert);
                        return Err(err);
                    }
                }
                Ok(())
            }
        }
    }

    /// Undo the command's effect. On error the document is left unchanged.
    pub fn revert(&self, document: &mut Document) -> Result<(), StateError> {
        match self {
            Command::Create { annotation, .. } => document.remove(annotation.id()).map(drop),
            Command::Move { id, from, .. } => {
                document.update(*id, |a| a.set_rect(a.rect().with_origin(*from)))
            }
            Command::Resize { id, from, .. } => document.update(*id, |a| a.set_rect(*from)),
            Command::EditProperty { id, change } => {
                document.update(*id, |a| a.set_property(change.old.clone()))?.map(drop)
            }
            Command::Delete { annotation, z } => document.add(annotation.clone(), *z),
            Command::Reorder { id, from, .. } => document.reorder(*id, *from).map(drop),
            Command::Batch(commands) => {
                for (done, command) in commands.iter().rev().enumerate() {
                    if let Err(err) = command.revert(document) {
                        for command in &commands[commands.len() - done..] {
                            if let Err(err) = command.apply(document) {
                                warn!(command = command.label(), %err, "rollback step failed");
                            }
                        }
                        return Err(err);
                    }
                }
                Ok(())
            }
        }
    }
}

fn rollback(
    applied: &[Command],
    document: &mut Document,
    undo: fn(&Command, &mut Document) -> Result<(), StateError>,
) {
    for command in applied.iter().rev() {
        if let Err(err) = undo(command, document) {
            warn!(command = command.label(), %err, "rollback step failed");
        }
    }
}

/// Linear undo/redo stacks with bounded depth.
#[derive(Debug, Clone)]
pub struct History {
    undo_stack: VecDeque<Command>,
    redo_stack: Vec<Command>,
    max_depth: usize,
    /// The newest undo entry came from [`History::apply_coalesced`] and may absorb the next one.
    coalescing: bool,
}

impl Default for History {
    fn default() -> Self {
        Self::new(MAX_HISTORY)
    }
}

impl History {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
            coalescing: false,
        }
    }

    /// Apply `command` and record it. A failing command is not recorded.
    pub fn apply(&mut self, document: &mut Document, command: Command) -> Result<(), StateError> {
        command.apply(document)?;
        debug!(command = command.label(), "applied");
        self.push(command);
        Ok(())
    }

    /// Like [`History::apply`], but folds the command into the previous entry
    /// when that entry was also recorded here and [`Command::merge`] allows it.
    pub fn apply_coalesced(
        &mut self,
        document: &mut Document,
        command: Command,
    ) -> Result<(), StateError> {
        command.apply(document)?;
        self.redo_stack.clear();

        if self.coalescing {
            if let Some(last) = self.undo_stack.back_mut() {
                if last.merge(&command) {
                    debug!(command = command.label(), "coalesced");
                    return Ok(());
                }
            }
        }

        self.push(command);
        self.coalescing = true;
        Ok(())
    }

    /// Apply `command` as part of the newest undo entry, so one undo reverts
    /// both. Recorded as a new entry when there is nothing to extend.
    pub fn amend_last(
        &mut self,
        document: &mut Document,
        command: Command,
    ) -> Result<(), StateError> {
        let Some(last) = self.undo_stack.pop_back() else {
            return self.apply(document, command);
        };
        if let Err(err) = command.apply(document) {
            self.undo_stack.push_back(last);
            return Err(err);
        }

        debug!(command = command.label(), onto = last.label(), "amended");
        let steps = match last {
            Command::Batch(mut steps) => {
                steps.push(command);
                steps
            }
            last => vec![last, command],
        };
        self.push(Command::Batch(steps));
        Ok(())
    }

    /// Revert the newest undo entry without making it redoable.
    pub fn discard_last(&mut self, document: &mut Document) -> Result<(), StateError> {
        let Some(last) = self.undo_stack.pop_back() else {
            return Ok(());
        };
        if let Err(err) = last.revert(document) {
            self.undo_stack.push_back(last);
            return Err(err);
        }

        debug!(command = last.label(), "discarded");
        self.coalescing = false;
        Ok(())
    }

    /// Annotation created by the newest undo entry, if that entry is a bare create.
    pub fn last_created(&self) -> Option<AnnotationId> {
        match self.undo_stack.back()? {
            Command::Create { annotation, .. } => Some(annotation.id()),
            _ => None,
        }
    }

    fn push(&mut self, command: Command) {
        self.redo_stack.clear();
        self.coalescing = false;
        self.undo_stack.push_back(command);

        while self.undo_stack.len() > self.max_depth {
            self.undo_stack.pop_front();
        }
    }

    /// Revert the most recent command. Returns false when there is nothing to undo.
    pub fn undo(&mut self, document: &mut Document) -> bool {
        let Some(command) = self.undo_stack.pop_back() else {
            return false;
        };
        self.coalescing = false;

        match command.revert(document) {
            Ok(()) => {
                debug!(command = command.label(), "undone");
                self.redo_stack.push(command);
                true
            }
            Err(err) => {
                warn!(command = command.label(), %err, "undo failed, dropping command");
                false
            }
        }
    }

    /// Re-apply the most recently undone command.
    pub fn redo(&mut self, document: &mut Document) -> bool {
        let Some(command) = self.redo_stack.pop() else {
            return false;
        };
        self.coalescing = false;

        match command.apply(document) {
            Ok(()) => {
                debug!(command = command.label(), "redone");
                self.undo_stack.push_back(command);
                true
            }
            Err(err) => {
                warn!(command = command.label(), %err, "redo failed, dropping command");
                false
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.coalescing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationKind, StampGlyph, TextContent, TextStyle};
    use crate::geometry::PageSize;

    fn doc() -> Document {
        Document::new(&[PageSize::LETTER], 16.0)
    }

    fn stamp(x: f32) -> Annotation {
        let rect = PageRect::new(x, 0.1, 0.05, 0.05);
        Annotation::new(0, rect, AnnotationKind::Stamp(StampGlyph::Checkmark))
    }

    fn text(content: &str) -> Annotation {
        Annotation::new(
            0,
            PageRect::new(0.2, 0.2, 0.3, 0.05),
            AnnotationKind::Text(TextContent {
                content: content.to_string(),
                style: TextStyle::default(),
            }),
        )
    }

    fn create(history: &mut History, document: &mut Document, annotation: Annotation) {
        let command = Command::create(document, annotation);
        history.apply(document, command).expect("create");
    }

    fn snapshot(document: &Document) -> Vec<Annotation> {
        document.annotations(0).to_vec()
    }

    #[test]
    fn undo_redo_restores_every_state() {
        let mut document = doc();
        let mut history = History::default();
        let a = stamp(0.1);
        let b = text("hello");
        let (a_id, b_id) = (a.id(), b.id());

        let mut states = vec![snapshot(&document)];
        let steps: Vec<Box<dyn Fn(&Document) -> Command>> = vec![
            Box::new(move |d| Command::create(d, a.clone())),
            Box::new(move |d| Command::create(d, b.clone())),
            Box::new(move |_| Command::Move {
                id: a_id,
                from: PagePoint::new(0.1, 0.1),
                to: PagePoint::new(0.4, 0.6),
            }),
            Box::new(move |d| {
                Command::edit(d, b_id, PropertyValue::Text("bye".into())).expect("edit")
            }),
            Box::new(move |d| Command::reorder(d, a_id, usize::MAX).expect("reorder")),
            Box::new(move |d| Command::delete(d, b_id).expect("delete")),
        ];

        for step in &steps {
            let command = step(&document);
            history.apply(&mut document, command).expect("apply");
            states.push(snapshot(&document));
        }

        for expected in states.iter().rev().skip(1) {
            assert!(history.undo(&mut document));
            assert_eq!(&snapshot(&document), expected);
        }
        assert!(!history.undo(&mut document));

        for expected in states.iter().skip(1) {
            assert!(history.redo(&mut document));
            assert_eq!(&snapshot(&document), expected);
        }
        assert!(!history.redo(&mut document));
    }

    #[test]
    fn new_command_after_undo_clears_redo() {
        let mut document = doc();
        let mut history = History::default();

        create(&mut history, &mut document, stamp(0.1));
        create(&mut history, &mut document, stamp(0.2));
        assert!(history.undo(&mut document));
        assert!(history.can_redo());

        create(&mut history, &mut document, stamp(0.3));
        assert!(!history.can_redo());
        assert_eq!(history.undo_count(), 2);
    }

    #[test]
    fn failing_command_is_not_recorded() {
        let mut document = doc();
        let mut history = History::default();
        let before = snapshot(&document);

        let stale = Command::Move {
            id: AnnotationId::new(),
            from: PagePoint::new(0.0, 0.0),
            to: PagePoint::new(0.5, 0.5),
        };
        let err = history.apply(&mut document, stale).expect_err("stale id");
        assert!(matches!(err, StateError::UnknownAnnotation(_)));
        assert!(!history.can_undo());
        assert_eq!(snapshot(&document), before);
    }

    #[test]
    fn failing_batch_rolls_back_earlier_steps() {
        let mut document = doc();
        let mut history = History::default();
        let a = stamp(0.1);
        let a_id = a.id();
        create(&mut history, &mut document, a);
        let before = snapshot(&document);

        let batch = Command::Batch(vec![
            Command::Move {
                id: a_id,
                from: PagePoint::new(0.1, 0.1),
                to: PagePoint::new(0.9, 0.9),
            },
            Command::Move {
                id: AnnotationId::new(),
                from: PagePoint::default(),
                to: PagePoint::default(),
            },
        ]);
        assert!(history.apply(&mut document, batch).is_err());
        assert_eq!(snapshot(&document), before);
        assert_eq!(history.undo_count(), 1);
    }

    #[test]
    fn failing_batch_revert_reapplies_reverted_steps() {
        let mut document = doc();
        let mut history = History::default();
        let a = stamp(0.1);
        let a_id = a.id();
        create(&mut history, &mut document, a);

        let b = stamp(0.5);
        let b_id = b.id();
        let batch = Command::Batch(vec![
            Command::create(&document, b),
            Command::Move {
                id: a_id,
                from: PagePoint::new(0.1, 0.1),
                to: PagePoint::new(0.7, 0.7),
            },
        ]);
        history.apply(&mut document, batch).expect("batch");
        document.remove(b_id).expect("removed behind the history's back");

        assert!(!history.undo(&mut document));
        assert_eq!(document.get(a_id).expect("exists").rect().origin(), PagePoint::new(0.7, 0.7));
        assert_eq!(history.undo_count(), 1);
    }

    #[test]
    fn amended_step_undoes_with_its_base() {
        let mut document = doc();
        let mut history = History::default();
        let note = text("");
        let id = note.id();
        create(&mut history, &mut document, note);
        assert_eq!(history.last_created(), Some(id));

        let signed = PropertyValue::Text("Signed".into());
        let edit = Command::edit(&document, id, signed).expect("edit");
        history.amend_last(&mut document, edit).expect("amend");
        assert_eq!(history.undo_count(), 1);
        assert_eq!(history.last_created(), None);

        assert!(history.undo(&mut document));
        assert_eq!(document.annotation_count(), 0);
        assert!(history.redo(&mut document));
        assert_eq!(document.get(id).and_then(Annotation::text).expect("text").content, "Signed");
    }

    #[test]
    fn discarded_step_leaves_nothing_to_undo_or_redo() {
        let mut document = doc();
        let mut history = History::default();
        create(&mut history, &mut document, text(""));

        history.discard_last(&mut document).expect("discard");

        assert_eq!(document.annotation_count(), 0);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn delete_undo_restores_id_and_z() {
        let mut document = doc();
        let mut history = History::default();
        let ids: Vec<_> = (0..3)
            .map(|i| {
                let annotation = stamp(i as f32 * 0.1);
                let id = annotation.id();
                create(&mut history, &mut document, annotation);
                id
            })
            .collect();

        let delete = Command::delete(&document, ids[1]).expect("delete");
        history.apply(&mut document, delete).expect("apply");
        assert_eq!(document.annotation_count(), 2);

        assert!(history.undo(&mut document));
        assert_eq!(document.z_index(ids[1]), Some(1));
        let order: Vec<_> = document.annotations(0).iter().map(Annotation::id).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn history_depth_is_bounded() {
        let mut document = doc();
        let mut history = History::new(3);

        for i in 0..5 {
            let command = Command::create(&document, stamp(i as f32 * 0.1));
            history.apply(&mut document, command).expect("apply");
        }

        assert_eq!(history.undo_count(), 3);
        while history.undo(&mut document) {}
        assert_eq!(document.annotation_count(), 2);
    }

    #[test]
    fn consecutive_moves_merge_into_one_step() {
        let mut document = doc();
        let mut history = History::default();
        let a = stamp(0.1);
        let a_id = a.id();
        create(&mut history, &mut document, a);

        let mut from = PagePoint::new(0.1, 0.1);
        for step in 1..=3 {
            let to = PagePoint::new(0.1 + step as f32 * 0.05, 0.1);
            history
                .apply_coalesced(&mut document, Command::Move { id: a_id, from, to })
                .expect("move");
            from = to;
        }

        assert_eq!(history.undo_count(), 2);
        assert!(history.undo(&mut document));
        assert_eq!(document.get(a_id).expect("exists").rect().origin(), PagePoint::new(0.1, 0.1));
    }

    #[test]
    fn coalescing_never_joins_a_plain_entry() {
        let mut document = doc();
        let mut history = History::default();
        let a = stamp(0.1);
        let a_id = a.id();
        create(&mut history, &mut document, a);

        let dragged = PagePoint::new(0.3, 0.1);
        let drag = Command::Move { id: a_id, from: PagePoint::new(0.1, 0.1), to: dragged };
        history.apply(&mut document, drag).expect("drag");
        let nudge = Command::Move { id: a_id, from: dragged, to: PagePoint::new(0.35, 0.1) };
        history.apply_coalesced(&mut document, nudge).expect("nudge");

        assert_eq!(history.undo_count(), 3);
        assert!(history.undo(&mut document));
        assert_eq!(document.get(a_id).expect("exists").rect().origin(), dragged);
    }

    #[test]
    fn merge_rejects_other_targets() {
        let first_id = AnnotationId::new();
        let mut first = Command::Move {
            id: first_id,
            from: PagePoint::new(0.0, 0.0),
            to: PagePoint::new(0.1, 0.0),
        };
        let other = Command::Move {
            id: AnnotationId::new(),
            from: PagePoint::new(0.1, 0.0),
            to: PagePoint::new(0.2, 0.0),
        };

        assert!(!first.merge(&other));
        assert_eq!(first.delta(), Some((0.1, 0.0)));
    }

    #[test]
    fn noop_detection() {
        let id = AnnotationId::new();
        let rect = PageRect::new(0.1, 0.1, 0.2, 0.2);
        assert!(Command::Resize { id, from: rect, to: rect, anchor: Corner::TopLeft }.is_noop());
        assert!(Command::Batch(vec![]).is_noop());
        assert!(!Command::Move { id, from: PagePoint::default(), to: PagePoint::new(0.1, 0.0) }
            .is_noop());
    }
}
