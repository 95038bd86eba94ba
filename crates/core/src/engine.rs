//! Engine context
//!
//! [`Engine`] is the single owner of the open document and of everything that
//! edits it: history, selection, armed tool, text defaults, gesture state,
//! viewport, pending toasts and the export lock. UI code talks to the engine
//! only through the entry points here.

use crate::annotation::{
    Annotation, AnnotationId, AnnotationKind, Color, RasterImage, RasterPayload, StampGlyph,
    TextContent, TextStyle,
};
use crate::config::EngineConfig;
use crate::document::{Document, PageBitmap, Selection};
use crate::error::{EngineError, EngineResult, InputError, RenderError, StateError};
use crate::flatten::FlattenJob;
use crate::geometry::{fit_width_zoom, PagePoint, PageRect, PageSize, ScreenPoint, Viewport};
use crate::gesture::{
    EngineAction, GestureContext, GestureController, GestureEffect, GestureState, PointerEvent,
};
use crate::history::{Command, Corner, History};
use crate::raster::{composite_annotation, BlockPainter, FontPainter, TextPainter};
use crate::tools::photo::{pick_image_file, MediaCapture, PhotoModal};
use crate::tools::signature::SignaturePad;
use crate::tools::text_edit::{fit_text_box, TextEditSession};
use crate::tools::{TextSetting, Tool};
use pdf_engine::{PdfRasterizer, PdfWriter, RgbaImage};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Warning,
    Error,
}

/// Short message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

pub struct Engine {
    config: EngineConfig,
    document: Option<Document>,
    history: History,
    selection: Selection,
    tool: Tool,
    text_defaults: TextStyle,
    gestures: GestureController,
    viewport: Viewport,
    toasts: VecDeque<Toast>,
    /// Shared with the running [`FlattenJob`]; held while a clone is alive.
    export_lock: Arc<()>,
    current_page: u32,
    painter: Arc<dyn TextPainter>,
    text_edit: Option<TextEditSession>,
}

impl Engine {
    /// Create an engine. A configured font that cannot be loaded falls back to
    /// block text and leaves a warning toast.
    pub fn new(config: EngineConfig) -> Self {
        let mut toasts = VecDeque::new();
        let painter: Arc<dyn TextPainter> = match &config.font_path {
            Some(path) => match FontPainter::load(path) {
                Ok(painter) => Arc::new(painter),
                Err(err) => {
                    warn!(%err, "falling back to block text");
                    let message = err.to_string();
                    toasts.push_back(Toast { level: ToastLevel::Warning, message });
                    Arc::new(BlockPainter)
                }
            },
            None => Arc::new(BlockPainter),
        };

        Self {
            history: History::new(config.max_history),
            viewport: Viewport::new(config.min_zoom, config.max_zoom),
            config,
            document: None,
            selection: Selection::default(),
            tool: Tool::None,
            text_defaults: TextStyle::default(),
            gestures: GestureController::new(),
            toasts,
            export_lock: Arc::new(()),
            current_page: 0,
            painter,
            text_edit: None,
        }
    }

    pub fn with_painter(mut self, painter: Arc<dyn TextPainter>) -> Self {
        self.painter = painter;
        self
    }

    pub fn with_text_defaults(mut self, style: TextStyle) -> Self {
        self.text_defaults = style;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn selection(&self) -> Option<AnnotationId> {
        self.selection.id()
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn text_defaults(&self) -> &TextStyle {
        &self.text_defaults
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn gesture_state(&self) -> &GestureState {
        self.gestures.state()
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn is_exporting(&self) -> bool {
        Arc::strong_count(&self.export_lock) > 1
    }

    pub fn text_edit(&self) -> Option<&TextEditSession> {
        self.text_edit.as_ref()
    }

    /// Live editing buffer, for keystrokes from the host.
    pub fn text_edit_mut(&mut self) -> Option<&mut TextEditSession> {
        self.text_edit.as_mut()
    }

    fn document_ref(&self) -> Result<&Document, StateError> {
        self.document.as_ref().ok_or(StateError::NoDocument)
    }

    // Toasts

    fn toast(&mut self, level: ToastLevel, message: impl Into<String>) -> EngineAction {
        self.toasts.push_back(Toast { level, message: message.into() });
        EngineAction::ToastAvailable
    }

    /// Report a failed operation to the user where appropriate and pass it on.
    fn surface(&mut self, err: EngineError) -> EngineError {
        match &err {
            EngineError::Input(input) => {
                warn!(%input, "input rejected");
                self.toast(ToastLevel::Warning, input.to_string());
            }
            EngineError::Render(render) => {
                warn!(%render, "render failed");
                self.toast(ToastLevel::Error, render.to_string());
            }
            EngineError::ExportInProgress => {
                self.toast(ToastLevel::Info, err.to_string());
            }
            EngineError::State(state) => debug!(%state, "ignored stale operation"),
        }
        err
    }

    pub fn drain_toasts(&mut self) -> Vec<Toast> {
        self.toasts.drain(..).collect()
    }

    // Document lifecycle

    /// Open a document, replacing any open one. Viewing starts at zoom 1.
    pub fn open_document(
        &mut self,
        rasterizer: &dyn PdfRasterizer,
    ) -> EngineResult<Vec<EngineAction>> {
        let page_count = rasterizer.page_count();
        if page_count == 0 {
            let err = InputError::UnreadableDocument("the document has no pages".to_string());
            return Err(self.surface(err.into()));
        }

        let sizes = (0..page_count)
            .map(|page| rasterizer.page_size(page))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| InputError::UnreadableDocument(err.to_string()));
        let sizes = match sizes {
            Ok(sizes) => sizes,
            Err(err) => return Err(self.surface(err.into())),
        };

        self.close_document();
        self.document = Some(Document::new(&sizes, self.config.page_gap_pt));
        self.viewport.set_zoom(1.0);
        self.viewport.set_pan(ScreenPoint::default());
        info!(pages = page_count, "document opened");

        Ok(vec![EngineAction::SelectionChanged(None), EngineAction::RedrawAll])
    }

    /// Close the document. Pending edits and the undo history are discarded.
    pub fn close_document(&mut self) {
        if self.document.take().is_some() {
            info!("document closed");
        }
        self.history.clear();
        self.selection.clear();
        self.gestures.reset();
        self.text_edit = None;
        self.current_page = 0;
    }

    pub fn set_current_page(&mut self, page: u32) -> Result<(), StateError> {
        let document = self.document_ref()?;
        if page >= document.page_count() {
            return Err(StateError::UnknownPage(page));
        }
        self.current_page = page;
        Ok(())
    }

    // Viewport

    pub fn set_zoom(&mut self, zoom: f32) -> Vec<EngineAction> {
        self.viewport.set_zoom(zoom);
        vec![EngineAction::RedrawAll]
    }

    pub fn zoom_about(&mut self, anchor: ScreenPoint, zoom: f32) -> Vec<EngineAction> {
        self.viewport.zoom_about(anchor, zoom);
        vec![EngineAction::RedrawAll]
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) -> Vec<EngineAction> {
        self.viewport.pan_by(dx, dy);
        vec![EngineAction::RedrawAll]
    }

    pub fn set_device_pixel_ratio(&mut self, ratio: f32) -> Vec<EngineAction> {
        self.viewport.set_device_pixel_ratio(ratio);
        vec![EngineAction::RedrawAll]
    }

    /// Zoom so the current page fills `viewport_width_px`.
    pub fn fit_width(&mut self, viewport_width_px: f32) -> Vec<EngineAction> {
        let page = self.document.as_ref().and_then(|d| d.page(self.current_page));
        let Some(size) = page.map(|p| p.size()) else {
            return Vec::new();
        };
        self.set_zoom(fit_width_zoom(viewport_width_px, size))
    }

    /// Screen position of a page point under the current view.
    pub fn page_to_screen(&self, page: u32, point: PagePoint) -> Option<ScreenPoint> {
        let placement = self.document.as_ref()?.placement(page)?;
        Some(self.viewport.to_screen(point, placement))
    }

    // Tools and selection

    pub fn set_tool(&mut self, tool: Tool) -> Vec<EngineAction> {
        debug!(tool = tool.label(), "tool armed");
        self.tool = tool;
        self.settle_gestures();
        Vec::new()
    }

    /// Select an annotation, or clear the selection with `None` or a missing id.
    pub fn select(&mut self, id: Option<AnnotationId>) -> Vec<EngineAction> {
        let before = self.selection.id();
        match (id, self.document.as_ref()) {
            (Some(id), Some(document)) => {
                if !self.selection.select(document, id) {
                    debug!(%id, "selection target missing");
                }
            }
            _ => self.selection.clear(),
        }

        let mut actions = Vec::new();
        if let Some(session) = &self.text_edit {
            if Some(session.id()) != self.selection.id() {
                actions.extend(self.commit_text_edit());
            }
        }

        self.settle_gestures();
        if before != self.selection.id() {
            actions.push(EngineAction::SelectionChanged(self.selection.id()));
        }
        actions
    }

    fn settle_gestures(&mut self) {
        if let Some(document) = self.document.as_ref() {
            self.gestures.settle(document, self.tool, self.selection.id());
        } else {
            self.gestures.reset();
        }
    }

    fn redraw_for(&self, command: &Command) -> EngineAction {
        let document = self.document.as_ref();
        let page = match command {
            Command::Create { annotation, .. } | Command::Delete { annotation, .. } => {
                Some(annotation.page_index())
            }
            Command::Move { id, .. }
            | Command::Resize { id, .. }
            | Command::EditProperty { id, .. }
            | Command::Reorder { id, .. } => {
                document.and_then(|d| d.get(*id)).map(Annotation::page_index)
            }
            Command::Batch(_) => None,
        };
        page.map_or(EngineAction::RedrawAll, EngineAction::RedrawPage)
    }

    // Commands

    /// Apply and record a command. Commands that change nothing are skipped.
    pub fn apply_command(&mut self, command: Command) -> EngineResult<Vec<EngineAction>> {
        if command.is_noop() {
            return Ok(Vec::new());
        }

        let Some(document) = self.document.as_mut() else {
            return Err(self.surface(StateError::NoDocument.into()));
        };
        if let Err(err) = self.history.apply(document, command.clone()) {
            warn!(command = command.label(), %err, "command rejected");
            return Err(self.surface(err.into()));
        }

        Ok(self.after_change(&command))
    }

    fn after_change(&mut self, command: &Command) -> Vec<EngineAction> {
        let mut actions = vec![self.redraw_for(command)];
        let before = self.selection.id();

        if let Some(document) = self.document.as_ref() {
            self.selection.prune(document);
            if self.text_edit.as_ref().is_some_and(|session| !document.contains(session.id())) {
                self.text_edit = None;
            }
        }
        self.settle_gestures();

        if before != self.selection.id() {
            actions.push(EngineAction::SelectionChanged(self.selection.id()));
        }
        actions
    }

    pub fn undo(&mut self) -> Vec<EngineAction> {
        let Some(document) = self.document.as_mut() else {
            return Vec::new();
        };
        if !self.history.undo(document) {
            return Vec::new();
        }
        self.after_change(&Command::Batch(Vec::new()))
    }

    pub fn redo(&mut self) -> Vec<EngineAction> {
        let Some(document) = self.document.as_mut() else {
            return Vec::new();
        };
        if !self.history.redo(document) {
            return Vec::new();
        }
        self.after_change(&Command::Batch(Vec::new()))
    }

    /// Delete the selected annotation. A no-op when nothing is selected.
    pub fn delete_selected(&mut self) -> Vec<EngineAction> {
        let (Some(id), Some(document)) = (self.selection.id(), self.document.as_ref()) else {
            return Vec::new();
        };

        match Command::delete(document, id) {
            Ok(command) => self.apply_command(command).unwrap_or_default(),
            Err(err) => {
                debug!(%err, "nothing to delete");
                Vec::new()
            }
        }
    }

    fn reorder_selected(&mut self, to: usize) -> Vec<EngineAction> {
        let (Some(id), Some(document)) = (self.selection.id(), self.document.as_ref()) else {
            return Vec::new();
        };

        match Command::reorder(document, id, to) {
            Ok(command) => self.apply_command(command).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    pub fn bring_to_front(&mut self) -> Vec<EngineAction> {
        self.reorder_selected(usize::MAX)
    }

    pub fn send_to_back(&mut self) -> Vec<EngineAction> {
        self.reorder_selected(0)
    }

    /// Move the selection by a screen-pixel offset. Consecutive nudges of the
    /// same annotation collapse into one undo step.
    pub fn nudge_selected(&mut self, dx_px: f32, dy_px: f32) -> Vec<EngineAction> {
        let (Some(id), Some(document)) = (self.selection.id(), self.document.as_mut()) else {
            return Vec::new();
        };
        let Some(annotation) = document.get(id) else {
            return Vec::new();
        };
        let Some(placement) = document.placement(annotation.page_index()) else {
            return Vec::new();
        };

        let from = annotation.rect().origin();
        let (dx, dy) = self.viewport.screen_delta_to_page(dx_px, dy_px, placement.size);
        let command = Command::Move { id, from, to: PagePoint::new(from.x + dx, from.y + dy) };
        if command.is_noop() {
            return Vec::new();
        }

        match self.history.apply_coalesced(document, command.clone()) {
            Ok(()) => self.after_change(&command),
            Err(err) => {
                warn!(%err, "nudge rejected");
                Vec::new()
            }
        }
    }

    // Pointer input

    pub fn handle_pointer(&mut self, event: PointerEvent) -> Vec<EngineAction> {
        let Some(document) = self.document.as_ref() else {
            return Vec::new();
        };

        let mut ctx = GestureContext {
            document,
            viewport: &mut self.viewport,
            config: &self.config,
            tool: self.tool,
            selection: self.selection.id(),
        };
        let effects = self.gestures.handle(&event, &mut ctx);

        let mut actions = Vec::new();
        for effect in effects {
            match effect {
                GestureEffect::Select(id) => actions.extend(self.select(id)),
                GestureEffect::Place { tool, page, at } => {
                    let queued = self.toasts.len();
                    match self.place_with_tool(tool, page, at) {
                        Ok((_, placed)) => actions.extend(placed),
                        Err(err) => {
                            debug!(%err, "placement failed");
                            if self.toasts.len() > queued {
                                actions.push(EngineAction::ToastAvailable);
                            }
                        }
                    }
                }
                GestureEffect::Commit(command) => match self.apply_command(command) {
                    Ok(applied) => actions.extend(applied),
                    Err(err) => debug!(%err, "gesture edit dropped"),
                },
                GestureEffect::EditText(id) => match self.begin_text_edit(id) {
                    Ok(started) => actions.extend(started),
                    Err(err) => debug!(%err, "text edit not started"),
                },
                GestureEffect::RedrawPage(page) => actions.push(EngineAction::RedrawPage(page)),
                GestureEffect::RedrawAll => actions.push(EngineAction::RedrawAll),
            }
        }

        self.settle_gestures();
        actions.dedup();
        actions
    }

    // Placement

    fn text_content(&self, content: &str) -> TextContent {
        TextContent { content: content.to_string(), style: self.text_defaults.clone() }
    }

    /// Create an annotation for a placement tool at a page point and select it.
    /// Text placement also opens a text edit session.
    pub fn place_with_tool(
        &mut self,
        tool: Tool,
        page: u32,
        at: PagePoint,
    ) -> EngineResult<(AnnotationId, Vec<EngineAction>)> {
        let document = self.document_ref()?;
        let size = document.page(page).ok_or(StateError::UnknownPage(page))?.size();

        let (annotation, edit) = match tool {
            Tool::Text => {
                let text = self.text_content("");
                let anchor = PageRect::new(at.x, at.y, 0.0, 0.0);
                let rect = fit_text_box(anchor, &text, size, self.painter.as_ref());
                (Annotation::new(page, rect, AnnotationKind::Text(text)), true)
            }
            Tool::Stamp => {
                let side = self.config.stamp_size_pt;
                let rect = PageRect::centered(at, side / size.width_pt, side / size.height_pt);
                (Annotation::new(page, rect, AnnotationKind::Stamp(StampGlyph::Checkmark)), false)
            }
            Tool::None => return Err(StateError::NoToolArmed.into()),
        };

        let id = annotation.id();
        let mut actions = self.insert(annotation)?;
        self.tool = Tool::None;
        if edit {
            actions.extend(self.begin_text_edit(id)?);
        }
        self.settle_gestures();
        Ok((id, actions))
    }

    fn insert(&mut self, annotation: Annotation) -> EngineResult<Vec<EngineAction>> {
        let id = annotation.id();
        debug!(%id, kind = annotation.kind().label(), "placing annotation");
        let command = Command::create(self.document_ref()?, annotation);
        let mut actions = self.apply_command(command)?;
        actions.extend(self.select(Some(id)));
        Ok(actions)
    }

    /// Rectangle of a raster scaled to fit `footprint` (page-normalized),
    /// centred on `page`.
    fn fitted_rect(
        &self,
        page: u32,
        raster: &RasterImage,
        footprint: (f32, f32),
    ) -> Result<PageRect, StateError> {
        let size = self.document_ref()?.page(page).ok_or(StateError::UnknownPage(page))?.size();
        let (max_w, max_h) = (footprint.0 * size.width_pt, footprint.1 * size.height_pt);
        let (w, h) = (raster.width().max(1) as f32, raster.height().max(1) as f32);
        let scale = (max_w / w).min(max_h / h);
        let (width, height) = (w * scale / size.width_pt, h * scale / size.height_pt);
        Ok(PageRect::centered(PagePoint::new(0.5, 0.5), width, height))
    }

    fn place_raster(
        &mut self,
        image: RgbaImage,
        footprint: (f32, f32),
        signature: bool,
    ) -> EngineResult<AnnotationId> {
        let page = self.current_page;
        let raster = RasterImage::new(image);
        let rect = match self.fitted_rect(page, &raster, footprint) {
            Ok(rect) => rect,
            Err(err) => return Err(self.surface(err.into())),
        };

        let payload = RasterPayload { raster, aspect_locked: true };
        let kind = if signature {
            AnnotationKind::Signature(payload)
        } else {
            AnnotationKind::Image(payload)
        };
        let annotation = Annotation::new(page, rect, kind);
        let id = annotation.id();
        self.insert(annotation)?;
        Ok(id)
    }

    /// Place the pad's drawing on the current page. An empty pad is rejected
    /// and the pad is left as it was.
    pub fn place_signature(&mut self, pad: &SignaturePad) -> EngineResult<AnnotationId> {
        let image = match pad.rasterize(self.config.signature_stroke_px, Color::INK_BLUE) {
            Ok(image) => image,
            Err(err) => return Err(self.surface(err.into())),
        };
        self.place_raster(image, self.config.signature_footprint, true)
    }

    pub fn place_photo(&mut self, image: RgbaImage) -> EngineResult<AnnotationId> {
        self.place_raster(image, self.config.image_footprint, false)
    }

    /// Open the camera modal. When the camera is unavailable the user is told
    /// and the file picker is offered instead; `Ok(None)` then means the picked
    /// image was already placed.
    pub fn open_photo_capture(
        &mut self,
        capture: &mut dyn MediaCapture,
    ) -> EngineResult<Option<PhotoModal>> {
        match PhotoModal::open(capture) {
            Ok(modal) => Ok(Some(modal)),
            Err(err) => {
                warn!(%err, "camera unavailable, offering file picker");
                self.toast(ToastLevel::Warning, format!("{err}. Choose a file instead."));
                self.place_photo_from_file(capture).map(|_| None)
            }
        }
    }

    /// Finish a camera capture, placing the captured frame.
    pub fn use_captured_photo(&mut self, modal: PhotoModal) -> EngineResult<AnnotationId> {
        match modal.use_photo() {
            Ok(image) => self.place_photo(image),
            Err(err) => Err(self.surface(err.into())),
        }
    }

    pub fn place_photo_from_file(
        &mut self,
        capture: &mut dyn MediaCapture,
    ) -> EngineResult<AnnotationId> {
        match pick_image_file(capture) {
            Ok(image) => self.place_photo(image),
            Err(err) => Err(self.surface(err.into())),
        }
    }

    // Text editing

    /// Start editing a text annotation, committing any other edit first.
    pub fn begin_text_edit(&mut self, id: AnnotationId) -> EngineResult<Vec<EngineAction>> {
        let mut actions = Vec::new();
        if self.text_edit.as_ref().is_some_and(|session| session.id() != id) {
            actions.extend(self.commit_text_edit());
        } else if self.text_edit.is_some() {
            return Ok(actions);
        }

        let annotation = self.document_ref()?.get(id).ok_or(StateError::UnknownAnnotation(id))?;
        let session = TextEditSession::begin(annotation)
            .ok_or(StateError::UnsupportedProperty { id, field: "text" })?;
        self.text_edit = Some(session);
        actions.extend(self.select(Some(id)));
        actions.push(EngineAction::BeginTextEdit(id));
        Ok(actions)
    }

    /// Apply the open edit session as one undo step. The first commit of a
    /// box that was just placed joins its creation, and an empty new box is
    /// dropped without leaving any history.
    pub fn commit_text_edit(&mut self) -> Vec<EngineAction> {
        let Some(session) = self.text_edit.take() else {
            return Vec::new();
        };
        let Some(document) = self.document.as_ref() else {
            return Vec::new();
        };

        let id = session.id();
        let command = match session.commit(document, self.painter.as_ref()) {
            Ok(Some(command)) => command,
            Ok(None) => return Vec::new(),
            Err(err) => {
                debug!(%err, "text edit target vanished");
                return Vec::new();
            }
        };
        if self.history.last_created() != Some(id) {
            return self.apply_command(command).unwrap_or_default();
        }

        let Some(document) = self.document.as_mut() else {
            return Vec::new();
        };
        let result = match &command {
            Command::Delete { .. } => self.history.discard_last(document),
            _ => self.history.amend_last(document, command.clone()),
        };
        match result {
            Ok(()) => self.after_change(&command),
            Err(err) => {
                warn!(%err, "text edit rejected");
                Vec::new()
            }
        }
    }

    /// Abandon the open edit. A box placed for this edit is removed again.
    pub fn cancel_text_edit(&mut self) -> Vec<EngineAction> {
        let Some(session) = self.text_edit.take() else {
            return Vec::new();
        };
        let id = session.id();
        session.cancel();
        if self.history.last_created() != Some(id) {
            return Vec::new();
        }

        let Some(document) = self.document.as_mut() else {
            return Vec::new();
        };
        let Ok(command) = Command::delete(document, id) else {
            return Vec::new();
        };
        match self.history.discard_last(document) {
            Ok(()) => self.after_change(&command),
            Err(err) => {
                warn!(%err, "new text box could not be removed");
                Vec::new()
            }
        }
    }

    /// Change a text setting. With a text annotation selected the change is
    /// applied to it (resizing the box to fit); otherwise it updates the
    /// defaults for the next text box.
    pub fn apply_text_setting(&mut self, setting: TextSetting) -> EngineResult<Vec<EngineAction>> {
        let selected_text = self
            .selection
            .id()
            .and_then(|id| self.document.as_ref()?.get(id))
            .filter(|annotation| annotation.text().is_some())
            .cloned();

        let Some(annotation) = selected_text else {
            setting.apply_to(&mut self.text_defaults);
            return Ok(Vec::new());
        };

        let document = self.document_ref()?;
        let id = annotation.id();
        let edit = Command::edit(document, id, setting.to_property())?;

        let mut text = annotation.text().cloned().unwrap_or_else(|| self.text_content(""));
        setting.apply_to(&mut text.style);
        let size =
            document.page(annotation.page_index()).map(|p| p.size()).unwrap_or(PageSize::LETTER);
        let from = annotation.rect();
        let to = fit_text_box(from, &text, size, self.painter.as_ref());

        let command = if to == from {
            edit
        } else {
            Command::Batch(vec![edit, Command::Resize { id, from, to, anchor: Corner::TopLeft }])
        };
        self.apply_command(command)
    }

    // Rendering and export

    /// Re-rasterize page bitmaps whose scale no longer matches the view.
    pub fn refresh_page_bitmaps(
        &mut self,
        rasterizer: &dyn PdfRasterizer,
    ) -> EngineResult<Vec<EngineAction>> {
        let scale = self.viewport.render_scale();
        let Some(document) = self.document.as_mut() else {
            return Ok(Vec::new());
        };

        let stale: Vec<u32> = document
            .pages()
            .iter()
            .filter(|page| page.bitmap().map_or(true, |bitmap| bitmap.scale != scale))
            .map(|page| page.index())
            .collect();

        let mut actions = Vec::new();
        for page in stale {
            let image = match rasterizer.render_page(page, scale) {
                Ok(image) => image,
                Err(source) => return Err(self.surface(RenderError::Page { page, source }.into())),
            };
            if let Some(document) = self.document.as_mut() {
                document.set_page_bitmap(page, PageBitmap { scale, image: Arc::new(image) })?;
            }
            actions.push(EngineAction::RedrawPage(page));
        }
        Ok(actions)
    }

    /// Annotations of `page` on a transparent layer at the view's render scale,
    /// including any drag or resize in progress.
    pub fn render_overlay(&self, page: u32) -> EngineResult<RgbaImage> {
        let document = self.document_ref()?;
        let size = document.page(page).ok_or(StateError::UnknownPage(page))?.size();
        let scale = self.viewport.render_scale();
        let (width, height) = size.pixel_size(scale);
        let px_per_pt = width as f32 / size.width_pt;
        let preview = self.gestures.preview(document);

        let mut layer = RgbaImage::new(width, height);
        for annotation in document.annotations(page) {
            let rect = preview.filter(|(id, _)| *id == annotation.id()).map(|(_, rect)| rect);
            let painter = self.painter.as_ref();
            composite_annotation(&mut layer, annotation, rect, size, px_per_pt, painter);
        }
        Ok(layer)
    }

    /// Snapshot the document for export. The job holds the export lock until
    /// it has run or is dropped, so a job abandoned by a worker never blocks
    /// later exports.
    pub fn begin_export(&mut self) -> EngineResult<FlattenJob> {
        if self.is_exporting() {
            return Err(self.surface(EngineError::ExportInProgress));
        }
        let scale = self.config.export_scale;
        let job = self
            .document
            .as_ref()
            .map(|document| FlattenJob::snapshot(document, scale, Arc::clone(&self.painter)));
        let Some(job) = job else {
            return Err(self.surface(StateError::NoDocument.into()));
        };

        info!(pages = job.pages().len(), annotations = job.annotation_count(), "export started");
        Ok(job.holding(Arc::clone(&self.export_lock)))
    }

    /// Report the outcome of a job from [`Engine::begin_export`].
    pub fn finish_export(&mut self, result: Result<Vec<u8>, RenderError>) -> EngineResult<Vec<u8>> {
        match result {
            Ok(bytes) => {
                info!(bytes = bytes.len(), "export finished");
                Ok(bytes)
            }
            Err(err) => Err(self.surface(err.into())),
        }
    }

    /// Flatten and encode the document on the calling thread.
    pub fn export_flattened(
        &mut self,
        rasterizer: &dyn PdfRasterizer,
        writer: &dyn PdfWriter,
    ) -> EngineResult<Vec<u8>> {
        let job = self.begin_export()?;
        let result = job.run(rasterizer, writer);
        self.finish_export(result)
    }

    // Geometry helpers for hosts and scripted input

    /// Screen position of an annotation's centre.
    pub fn annotation_center_on_screen(&self, id: AnnotationId) -> Option<ScreenPoint> {
        let annotation = self.document.as_ref()?.get(id)?;
        self.page_to_screen(annotation.page_index(), annotation.rect().center())
    }

    /// Screen position of an annotation's resize handle.
    pub fn resize_handle_on_screen(&self, id: AnnotationId) -> Option<ScreenPoint> {
        let document = self.document.as_ref()?;
        let annotation = document.get(id)?;
        let rect = document.handle_rect(annotation, &self.viewport, self.config.handle_size_px)?;
        Some(ScreenPoint::new(rect.x + rect.width / 2.0, rect.y + rect.height / 2.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdf_engine::PdfEngineError;

    struct Sheets(Vec<PageSize>);

    impl PdfRasterizer for Sheets {
        fn page_count(&self) -> u32 {
            self.0.len() as u32
        }

        fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
            self.0.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
                page: page_index,
                page_count: self.0.len() as u32,
            })
        }

        fn render_page(&self, page_index: u32, scale: f32) -> Result<RgbaImage, PdfEngineError> {
            let (w, h) = self.page_size(page_index)?.pixel_size(scale);
            Ok(RgbaImage::from_pixel(w, h, image::Rgba([255, 255, 255, 255])))
        }
    }

    fn engine() -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine.open_document(&Sheets(vec![PageSize::new(200.0, 200.0)])).expect("open");
        engine
    }

    fn stamp_at(engine: &mut Engine, x: f32, y: f32) -> AnnotationId {
        engine.place_with_tool(Tool::Stamp, 0, PagePoint::new(x, y)).expect("place").0
    }

    #[test]
    fn empty_document_is_rejected_with_toast() {
        let mut engine = Engine::new(EngineConfig::default());
        let err = engine.open_document(&Sheets(Vec::new())).expect_err("no pages");

        assert!(matches!(err, EngineError::Input(InputError::UnreadableDocument(_))));
        assert_eq!(engine.drain_toasts().len(), 1);
        assert!(engine.document().is_none());
    }

    #[test]
    fn armed_tool_places_on_tap_and_disarms() {
        let mut engine = engine();
        engine.set_tool(Tool::Stamp);

        engine.handle_pointer(PointerEvent::down(1, 100.0, 100.0));
        let actions = engine.handle_pointer(PointerEvent::up(1, 100.0, 100.0));

        let document = engine.document().expect("open");
        assert_eq!(document.annotation_count(), 1);
        let id = document.annotations(0)[0].id();
        assert!(actions.contains(&EngineAction::SelectionChanged(Some(id))));
        assert_eq!(engine.tool(), Tool::None);
        assert_eq!(engine.gesture_state(), &GestureState::Selected(id));
        assert_eq!(document.get(id).expect("stamp").rect().center(), PagePoint::new(0.5, 0.5));
    }

    #[test]
    fn double_tap_creates_text_and_starts_editing() {
        let mut engine = engine();

        engine.handle_pointer(PointerEvent::down(1, 50.0, 60.0).with_tap_count(2));
        let actions = engine.handle_pointer(PointerEvent::up(1, 50.0, 60.0).with_tap_count(2));

        let session = engine.text_edit().expect("editing");
        assert!(actions.contains(&EngineAction::BeginTextEdit(session.id())));

        engine.text_edit_mut().expect("editing").insert_str("Hello");
        engine.commit_text_edit();

        let id = engine.selection().expect("selected");
        let annotation = engine.document().expect("open").get(id).expect("text");
        assert_eq!(annotation.text().expect("text").content, "Hello");
        assert_eq!(annotation.rect().origin(), PagePoint::new(0.25, 0.3));
    }

    #[test]
    fn committing_empty_new_text_removes_it() {
        let mut engine = engine();
        engine.place_with_tool(Tool::Text, 0, PagePoint::new(0.1, 0.1)).expect("place");

        engine.commit_text_edit();

        assert_eq!(engine.document().expect("open").annotation_count(), 0);
        assert_eq!(engine.selection(), None);
        assert!(!engine.history().can_undo());
        assert!(engine.undo().is_empty());
        assert_eq!(engine.document().expect("open").annotation_count(), 0);
    }

    #[test]
    fn cancelling_new_text_removes_it_and_keeps_edits() {
        let mut engine = engine();
        engine.place_with_tool(Tool::Text, 0, PagePoint::new(0.1, 0.1)).expect("place");

        let actions = engine.cancel_text_edit();
        assert!(actions.contains(&EngineAction::SelectionChanged(None)));
        assert_eq!(engine.document().expect("open").annotation_count(), 0);
        assert!(!engine.history().can_undo());

        let (id, _) =
            engine.place_with_tool(Tool::Text, 0, PagePoint::new(0.1, 0.1)).expect("place");
        engine.text_edit_mut().expect("editing").insert_str("kept");
        engine.commit_text_edit();
        engine.begin_text_edit(id).expect("edit again");
        engine.text_edit_mut().expect("editing").insert_str(" not");

        assert!(engine.cancel_text_edit().is_empty());
        let annotation = engine.document().expect("open").get(id).expect("text");
        assert_eq!(annotation.text().expect("text").content, "kept");
        assert_eq!(engine.history().undo_count(), 1);
    }

    #[test]
    fn delete_undo_redo_keep_selection_consistent() {
        let mut engine = engine();
        let id = stamp_at(&mut engine, 0.5, 0.5);

        let actions = engine.delete_selected();
        assert!(actions.contains(&EngineAction::SelectionChanged(None)));
        assert!(engine.delete_selected().is_empty());

        engine.undo();
        assert!(engine.document().expect("open").contains(id));
        engine.redo();
        assert!(!engine.document().expect("open").contains(id));
        assert!(engine.redo().is_empty());
    }

    #[test]
    fn select_missing_id_clears() {
        let mut engine = engine();
        stamp_at(&mut engine, 0.5, 0.5);

        let actions = engine.select(Some(AnnotationId::new()));
        assert_eq!(engine.selection(), None);
        assert_eq!(actions, vec![EngineAction::SelectionChanged(None)]);
    }

    #[test]
    fn text_setting_targets_selection_or_defaults() {
        let mut engine = engine();
        engine.apply_text_setting(TextSetting::Bold(true)).expect("defaults");
        assert!(engine.text_defaults().bold);

        let (id, _) =
            engine.place_with_tool(Tool::Text, 0, PagePoint::new(0.1, 0.1)).expect("place");
        engine.text_edit_mut().expect("editing").insert_str("abc");
        engine.commit_text_edit();

        engine.apply_text_setting(TextSetting::FontSize(28.0)).expect("apply");
        let annotation = engine.document().expect("open").get(id).expect("text");
        assert_eq!(annotation.text().expect("text").style.font_size, 28.0);
        assert_eq!(engine.text_defaults().font_size, 14.0);

        // One undo reverts both the size and the box.
        let grown = annotation.rect();
        engine.undo();
        let annotation = engine.document().expect("open").get(id).expect("text");
        assert_eq!(annotation.text().expect("text").style.font_size, 14.0);
        assert!(annotation.rect().height < grown.height);
    }

    #[test]
    fn empty_signature_leaves_state_untouched() {
        let mut engine = engine();
        let err = engine.place_signature(&SignaturePad::new()).expect_err("empty");

        assert!(matches!(err, EngineError::Input(InputError::EmptySignature)));
        assert_eq!(engine.drain_toasts()[0].level, ToastLevel::Warning);
        assert!(!engine.history().can_undo());
    }

    #[test]
    fn signature_fits_footprint_and_is_aspect_locked() {
        let mut engine = engine();
        let mut pad = SignaturePad::new();
        pad.push_stroke(vec![(0.0, 0.0), (400.0, 0.0)]);

        let id = engine.place_signature(&pad).expect("placed");
        let annotation = engine.document().expect("open").get(id).expect("signature");

        assert!(annotation.kind().aspect_locked());
        let (fw, fh) = engine.config().signature_footprint;
        assert!(annotation.rect().width <= fw + 1e-5);
        assert!(annotation.rect().height <= fh + 1e-5);
        assert!((annotation.rect().center().x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn second_export_is_rejected_until_first_finishes() {
        let mut engine = engine();
        let job = engine.begin_export().expect("first");

        assert!(matches!(engine.begin_export(), Err(EngineError::ExportInProgress)));
        assert_eq!(engine.drain_toasts().len(), 1);

        stamp_at(&mut engine, 0.5, 0.5);
        assert_eq!(job.annotation_count(), 0);

        let sheets = Sheets(vec![PageSize::new(200.0, 200.0)]);
        let result = job.run(&sheets, &pdf_engine::ImagePdfWriter::new());
        assert!(!engine.is_exporting());
        engine.finish_export(result).expect("finished");
        assert_eq!(engine.begin_export().expect("second").annotation_count(), 1);
    }

    #[test]
    fn dropped_job_releases_export_lock() {
        let mut engine = engine();
        let job = engine.begin_export().expect("first");
        assert!(engine.is_exporting());

        drop(job);

        assert!(!engine.is_exporting());
        assert!(engine.begin_export().is_ok());
        assert!(engine.drain_toasts().is_empty());
    }

    #[test]
    fn overlay_shows_drag_preview_without_touching_model() {
        let mut engine = engine();
        let id = stamp_at(&mut engine, 0.25, 0.25);
        let before = engine.document().expect("open").get(id).expect("stamp").rect();

        engine.handle_pointer(PointerEvent::down(1, 50.0, 50.0));
        engine.handle_pointer(PointerEvent::moved(1, 150.0, 150.0));
        let overlay = engine.render_overlay(0).expect("overlay");

        assert_eq!(engine.document().expect("open").get(id).expect("stamp").rect(), before);
        let ink = |x0: u32, y0: u32| {
            (x0..x0 + 24).any(|x| (y0..y0 + 24).any(|y| overlay.get_pixel(x, y).0[3] > 0))
        };
        assert!(ink(138, 138));
        assert!(!ink(38, 38));

        engine.handle_pointer(PointerEvent::cancel(1));
        assert_eq!(engine.history().undo_count(), 1);
    }

    #[test]
    fn page_bitmaps_follow_render_scale() {
        let mut engine = engine();
        let sheets = Sheets(vec![PageSize::new(200.0, 200.0)]);

        let redraws = engine.refresh_page_bitmaps(&sheets).expect("render");
        assert_eq!(redraws, vec![EngineAction::RedrawPage(0)]);
        assert!(engine.refresh_page_bitmaps(&sheets).expect("fresh").is_empty());

        engine.set_device_pixel_ratio(2.0);
        engine.refresh_page_bitmaps(&sheets).expect("render");
        let page = engine.document().expect("open").page(0).expect("page");
        let bitmap = page.bitmap().expect("bitmap").clone();
        assert_eq!(bitmap.scale, 2.0);
        assert_eq!(bitmap.image.dimensions(), (400, 400));
    }

    #[test]
    fn nudges_coalesce() {
        let mut engine = engine();
        let id = stamp_at(&mut engine, 0.5, 0.5);
        let start = engine.document().expect("open").get(id).expect("stamp").rect().origin();

        engine.nudge_selected(2.0, 0.0);
        engine.nudge_selected(2.0, 0.0);
        assert_eq!(engine.history().undo_count(), 2);

        engine.undo();
        assert_eq!(engine.document().expect("open").get(id).expect("stamp").rect().origin(), start);
    }

    #[test]
    fn nudge_after_drag_is_its_own_step() {
        let mut engine = engine();
        let id = stamp_at(&mut engine, 0.5, 0.5);
        let center = engine.annotation_center_on_screen(id).expect("on screen");

        engine.handle_pointer(PointerEvent::down(1, center.x, center.y));
        engine.handle_pointer(PointerEvent::moved(1, center.x + 40.0, center.y));
        engine.handle_pointer(PointerEvent::up(1, center.x + 40.0, center.y));
        let dragged = engine.document().expect("open").get(id).expect("stamp").rect().origin();

        engine.nudge_selected(2.0, 0.0);
        assert_eq!(engine.history().undo_count(), 3);

        engine.undo();
        let origin = engine.document().expect("open").get(id).expect("stamp").rect().origin();
        assert_eq!(origin, dragged);
    }

    #[test]
    fn stale_placement_queues_no_toast() {
        let mut engine = engine();

        let at = PagePoint::new(0.5, 0.5);
        let err = engine.place_with_tool(Tool::Stamp, 3, at).expect_err("no page 3");
        assert!(matches!(err, EngineError::State(StateError::UnknownPage(3))));
        assert!(engine.drain_toasts().is_empty());
    }

    #[test]
    fn close_discards_history() {
        let mut engine = engine();
        stamp_at(&mut engine, 0.5, 0.5);
        engine.close_document();

        assert!(engine.document().is_none());
        assert!(!engine.history().can_undo());
        assert!(engine.undo().is_empty());
    }
}
