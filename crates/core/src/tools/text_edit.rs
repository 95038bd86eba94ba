//! In-place editing of a text annotation

use crate::annotation::{Annotation, AnnotationId, PropertyValue, TextContent};
use crate::document::Document;
use crate::error::StateError;
use crate::geometry::{PageRect, PageSize};
use crate::history::{Command, Corner};
use crate::raster::TextPainter;

/// Editing buffer for one text annotation. Nothing reaches the document
/// until [`TextEditSession::commit`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextEditSession {
    id: AnnotationId,
    original: String,
    buffer: Vec<char>,
    /// Caret position in characters, `0..=buffer.len()`
    caret: usize,
}

impl TextEditSession {
    /// Start editing `annotation` with the caret at the end. `None` for non-text annotations.
    pub fn begin(annotation: &Annotation) -> Option<Self> {
        let text = annotation.text()?;
        let buffer: Vec<char> = text.content.chars().collect();
        let original = text.content.clone();
        Some(Self { id: annotation.id(), original, caret: buffer.len(), buffer })
    }

    pub fn id(&self) -> AnnotationId {
        self.id
    }

    pub fn text(&self) -> String {
        self.buffer.iter().collect()
    }

    pub fn caret(&self) -> usize {
        self.caret
    }

    pub fn insert_char(&mut self, ch: char) {
        self.buffer.insert(self.caret, ch);
        self.caret += 1;
    }

    pub fn insert_str(&mut self, text: &str) {
        for ch in text.chars() {
            self.insert_char(ch);
        }
    }

    pub fn backspace(&mut self) {
        if self.caret > 0 {
            self.caret -= 1;
            self.buffer.remove(self.caret);
        }
    }

    pub fn delete(&mut self) {
        if self.caret < self.buffer.len() {
            self.buffer.remove(self.caret);
        }
    }

    pub fn move_left(&mut self) {
        self.caret = self.caret.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.caret = (self.caret + 1).min(self.buffer.len());
    }

    pub fn home(&mut self) {
        self.caret = 0;
    }

    pub fn end(&mut self) {
        self.caret = self.buffer.len();
    }

    /// Turn the edit into a single command.
    ///
    /// Empty text deletes the annotation; unchanged text yields `None`.
    /// Otherwise the text is replaced and the box resized to fit it.
    pub fn commit(
        self,
        document: &Document,
        painter: &dyn TextPainter,
    ) -> Result<Option<Command>, StateError> {
        let annotation = document.get(self.id).ok_or(StateError::UnknownAnnotation(self.id))?;
        let text = self.text();

        if text.trim().is_empty() {
            return Command::delete(document, self.id).map(Some);
        }
        if text == self.original {
            return Ok(None);
        }

        let mut steps = vec![Command::edit(document, self.id, PropertyValue::Text(text.clone()))?];

        let page_index = annotation.page_index();
        let page = document.page(page_index).ok_or(StateError::UnknownPage(page_index))?;
        let style = annotation.text().map(|t| t.style.clone()).unwrap_or_default();
        let from = annotation.rect();
        let to = fit_text_box(from, &TextContent { content: text, style }, page.size(), painter);
        if to != from {
            steps.push(Command::Resize { id: self.id, from, to, anchor: Corner::TopLeft });
        }

        Ok(Some(Command::Batch(steps)))
    }

    /// Abandon the edit.
    pub fn cancel(self) {}
}

/// Box of `rect` resized, from its top-left corner, to fit `text`.
pub fn fit_text_box(
    rect: PageRect,
    text: &TextContent,
    page: PageSize,
    painter: &dyn TextPainter,
) -> PageRect {
    let (width_pt, height_pt) = painter.measure(text);
    rect.with_size(width_pt / page.width_pt, height_pt / page.height_pt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationKind, TextStyle};
    use crate::history::History;
    use crate::raster::BlockPainter;

    fn setup(content: &str) -> (Document, History, AnnotationId) {
        let mut document = Document::new(&[PageSize::new(100.0, 100.0)], 0.0);
        let mut history = History::default();
        let annotation = Annotation::new(
            0,
            PageRect::new(0.1, 0.1, 0.2, 0.1),
            AnnotationKind::Text(TextContent {
                content: content.to_string(),
                style: TextStyle { font_size: 10.0, ..TextStyle::default() },
            }),
        );
        let id = annotation.id();
        let create = Command::create(&document, annotation);
        history.apply(&mut document, create).expect("create");
        (document, history, id)
    }

    #[test]
    fn caret_editing() {
        let (document, _, id) = setup("helo");
        let mut session = TextEditSession::begin(document.get(id).expect("exists")).expect("text");

        session.move_left();
        session.insert_char('l');
        assert_eq!(session.text(), "hello");
        assert_eq!(session.caret(), 4);

        session.home();
        session.delete();
        session.end();
        session.backspace();
        session.move_right();
        assert_eq!(session.text(), "ell");
        assert_eq!(session.caret(), 3);
    }

    #[test]
    fn commit_is_one_undo_step_with_autosize() {
        let (mut document, mut history, id) = setup("Hi");
        let mut session = TextEditSession::begin(document.get(id).expect("exists")).expect("text");
        session.insert_str(" there");

        let command = session.commit(&document, &BlockPainter).expect("commit").expect("changed");
        history.apply(&mut document, command).expect("apply");

        let annotation = document.get(id).expect("exists");
        assert_eq!(annotation.text().expect("text").content, "Hi there");
        // 8 characters at 6pt each on a 100pt page.
        assert!((annotation.rect().width - 0.48).abs() < 1e-5);
        assert_eq!(annotation.rect().origin(), PageRect::new(0.1, 0.1, 0.0, 0.0).origin());

        assert!(history.undo(&mut document));
        let annotation = document.get(id).expect("exists");
        assert_eq!(annotation.text().expect("text").content, "Hi");
        assert_eq!(annotation.rect(), PageRect::new(0.1, 0.1, 0.2, 0.1));
    }

    #[test]
    fn unchanged_commit_records_nothing() {
        let (document, _, id) = setup("same");
        let session = TextEditSession::begin(document.get(id).expect("exists")).expect("text");
        assert_eq!(session.commit(&document, &BlockPainter), Ok(None));
    }

    #[test]
    fn empty_commit_deletes() {
        let (document, _, id) = setup("x");
        let mut session = TextEditSession::begin(document.get(id).expect("exists")).expect("text");
        session.backspace();

        let command = session.commit(&document, &BlockPainter).expect("commit").expect("delete");
        assert!(matches!(
            command,
            Command::Delete { ref annotation, z: 0 } if annotation.id() == id
        ));
    }

    #[test]
    fn non_text_annotation_cannot_be_edited() {
        let stamp = Annotation::new(
            0,
            PageRect::default(),
            AnnotationKind::Stamp(crate::annotation::StampGlyph::Checkmark),
        );
        assert!(TextEditSession::begin(&stamp).is_none());
    }
}
