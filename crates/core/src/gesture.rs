//! Pointer gesture state machine
//!
//! Turns raw pointer events into intents ([`GestureEffect`]) that the engine
//! carries out. A drag or resize in progress is only a preview held here: the
//! document is not touched until the pointer lifts and a single command is
//! committed.

use crate::annotation::AnnotationId;
use crate::config::EngineConfig;
use crate::document::{Document, HitPart, HitSlop};
use crate::geometry::{PagePoint, PageRect, PageSize, ScreenPoint, Viewport};
use crate::history::{Command, Corner};
use crate::tools::Tool;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub pointer_id: u64,
    pub phase: PointerPhase,
    pub position: ScreenPoint,
    /// 1 for a single tap, 2 for a double tap
    pub tap_count: u8,
}

impl PointerEvent {
    pub fn new(pointer_id: u64, phase: PointerPhase, position: ScreenPoint) -> Self {
        Self { pointer_id, phase, position, tap_count: 1 }
    }

    pub fn down(pointer_id: u64, x: f32, y: f32) -> Self {
        Self::new(pointer_id, PointerPhase::Down, ScreenPoint::new(x, y))
    }

    pub fn moved(pointer_id: u64, x: f32, y: f32) -> Self {
        Self::new(pointer_id, PointerPhase::Move, ScreenPoint::new(x, y))
    }

    pub fn up(pointer_id: u64, x: f32, y: f32) -> Self {
        Self::new(pointer_id, PointerPhase::Up, ScreenPoint::new(x, y))
    }

    pub fn cancel(pointer_id: u64) -> Self {
        Self::new(pointer_id, PointerPhase::Cancel, ScreenPoint::default())
    }

    pub fn with_tap_count(mut self, tap_count: u8) -> Self {
        self.tap_count = tap_count;
        self
    }
}

/// Notifications for the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    RedrawPage(u32),
    RedrawAll,
    SelectionChanged(Option<AnnotationId>),
    BeginTextEdit(AnnotationId),
    ToastAvailable,
}

/// What the engine should do in response to a gesture.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureEffect {
    Select(Option<AnnotationId>),
    /// Place a new annotation of the given tool at a tapped page point.
    Place { tool: Tool, page: u32, at: PagePoint },
    Commit(Command),
    EditText(AnnotationId),
    RedrawPage(u32),
    RedrawAll,
}

/// Two pointers on the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoFingerGesture {
    pub pointers: (u64, u64),
    pub start_distance: f32,
    pub start_mid: ScreenPoint,
    pub start_zoom: f32,
    pub start_pan: ScreenPoint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GestureState {
    Idle,
    /// A placement tool is armed.
    Drawing(Tool),
    Selected(AnnotationId),
    Dragging { pointer: u64, page: u32, start: ScreenPoint, pending: Command },
    Resizing { pointer: u64, page: u32, start: ScreenPoint, pending: Command },
    PanningCanvas(TwoFingerGesture),
    PinchZooming(TwoFingerGesture),
}

impl GestureState {
    pub fn name(&self) -> &'static str {
        match self {
            GestureState::Idle => "idle",
            GestureState::Drawing(_) => "drawing",
            GestureState::Selected(_) => "selected",
            GestureState::Dragging { .. } => "dragging",
            GestureState::Resizing { .. } => "resizing",
            GestureState::PanningCanvas(_) => "panning",
            GestureState::PinchZooming(_) => "pinch-zooming",
        }
    }

    fn is_resting(&self) -> bool {
        matches!(self, GestureState::Idle | GestureState::Drawing(_) | GestureState::Selected(_))
    }

    fn resting(tool: Tool, selection: Option<AnnotationId>) -> Self {
        match (tool, selection) {
            (Tool::None, None) => GestureState::Idle,
            (Tool::None, Some(id)) => GestureState::Selected(id),
            (tool, _) => GestureState::Drawing(tool),
        }
    }
}

/// Everything the controller reads while interpreting an event.
pub struct GestureContext<'a> {
    pub document: &'a Document,
    pub viewport: &'a mut Viewport,
    pub config: &'a EngineConfig,
    pub tool: Tool,
    pub selection: Option<AnnotationId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingTap {
    pointer: u64,
    start: ScreenPoint,
    tap_count: u8,
}

#[derive(Debug, Clone)]
pub struct GestureController {
    state: GestureState,
    active: Vec<(u64, ScreenPoint)>,
    tap: Option<PendingTap>,
}

impl Default for GestureController {
    fn default() -> Self {
        Self::new()
    }
}

impl GestureController {
    pub fn new() -> Self {
        Self { state: GestureState::Idle, active: Vec::new(), tap: None }
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    /// Annotation being dragged or resized, with the rectangle shown for it.
    pub fn preview(&self, document: &Document) -> Option<(AnnotationId, PageRect)> {
        match &self.state {
            GestureState::Dragging { pending: Command::Move { id, to, .. }, .. } => {
                let rect = document.get(*id)?.rect().with_origin(*to);
                Some((*id, rect))
            }
            GestureState::Resizing { pending: Command::Resize { id, to, .. }, .. } => {
                Some((*id, *to))
            }
            _ => None,
        }
    }

    pub fn handle(
        &mut self,
        event: &PointerEvent,
        ctx: &mut GestureContext<'_>,
    ) -> Vec<GestureEffect> {
        match event.phase {
            PointerPhase::Down => self.pointer_down(event, ctx),
            PointerPhase::Move => self.pointer_move(event, ctx),
            PointerPhase::Up => self.pointer_up(event, ctx),
            PointerPhase::Cancel => {
                self.forget_pointer(event.pointer_id);
                self.abort(ctx.tool, ctx.selection)
            }
        }
    }

    /// Return to the resting state for the current tool and selection.
    ///
    /// A drag or resize whose target no longer exists is discarded.
    pub fn settle(
        &mut self,
        document: &Document,
        tool: Tool,
        selection: Option<AnnotationId>,
    ) -> bool {
        let stale = match &self.state {
            GestureState::Dragging { pending, .. } | GestureState::Resizing { pending, .. } => {
                pending_target(pending).is_some_and(|id| !document.contains(id))
            }
            _ => false,
        };

        if stale {
            debug!(state = self.state.name(), "target removed, discarding pending edit");
            self.transition(GestureState::resting(tool, selection));
        } else if self.state.is_resting() {
            self.state = GestureState::resting(tool, selection);
        }
        stale
    }

    /// Drop every pointer and pending edit.
    pub fn reset(&mut self) {
        self.active.clear();
        self.tap = None;
        self.transition(GestureState::Idle);
    }

    fn transition(&mut self, next: GestureState) {
        if self.state.name() != next.name() {
            debug!(from = self.state.name(), to = next.name(), "gesture transition");
        }
        self.state = next;
    }

    fn forget_pointer(&mut self, pointer: u64) {
        self.active.retain(|(id, _)| *id != pointer);
        if self.tap.is_some_and(|tap| tap.pointer == pointer) {
            self.tap = None;
        }
    }

    fn position_of(&self, pointer: u64) -> Option<ScreenPoint> {
        self.active.iter().find(|(id, _)| *id == pointer).map(|(_, point)| *point)
    }

    /// Discard whatever is in progress without committing anything.
    fn abort(&mut self, tool: Tool, selection: Option<AnnotationId>) -> Vec<GestureEffect> {
        self.tap = None;
        let effects = match &self.state {
            GestureState::Dragging { page, .. } | GestureState::Resizing { page, .. } => {
                debug!(state = self.state.name(), "gesture cancelled, pending edit discarded");
                vec![GestureEffect::RedrawPage(*page)]
            }
            _ => Vec::new(),
        };

        if !self.state.is_resting() {
            self.transition(GestureState::resting(tool, selection));
        }
        effects
    }

    fn pointer_down(
        &mut self,
        event: &PointerEvent,
        ctx: &mut GestureContext<'_>,
    ) -> Vec<GestureEffect> {
        self.forget_pointer(event.pointer_id);
        self.active.push((event.pointer_id, event.position));

        match self.active.len() {
            1 => self.first_pointer_down(event, ctx),
            2 => {
                let mut effects = self.abort(ctx.tool, ctx.selection);
                let (first, a) = self.active[0];
                let (second, b) = self.active[1];
                let gesture = TwoFingerGesture {
                    pointers: (first, second),
                    start_distance: a.distance_to(b).max(1.0),
                    start_mid: a.midpoint(b),
                    start_zoom: ctx.viewport.zoom(),
                    start_pan: ctx.viewport.pan(),
                };
                self.transition(GestureState::PanningCanvas(gesture));
                effects.push(GestureEffect::RedrawAll);
                effects
            }
            _ => Vec::new(),
        }
    }

    fn first_pointer_down(
        &mut self,
        event: &PointerEvent,
        ctx: &mut GestureContext<'_>,
    ) -> Vec<GestureEffect> {
        let slop = HitSlop {
            handle_size_px: ctx.config.handle_size_px,
            tolerance_px: ctx.config.hit_tolerance_px,
        };

        let Some(hit) = ctx.document.hit_test(event.position, ctx.viewport, slop) else {
            self.tap = Some(PendingTap {
                pointer: event.pointer_id,
                start: event.position,
                tap_count: event.tap_count,
            });
            return Vec::new();
        };

        let Some(annotation) = ctx.document.get(hit.id) else {
            return Vec::new();
        };

        let mut effects = Vec::new();
        if ctx.selection != Some(hit.id) {
            effects.push(GestureEffect::Select(Some(hit.id)));
        }

        let page = annotation.page_index();
        let rect = annotation.rect();
        match hit.part {
            HitPart::ResizeHandle => {
                let pending =
                    Command::Resize { id: hit.id, from: rect, to: rect, anchor: Corner::TopLeft };
                self.transition(GestureState::Resizing {
                    pointer: event.pointer_id,
                    page,
                    start: event.position,
                    pending,
                });
            }
            HitPart::Body if event.tap_count >= 2 && annotation.text().is_some() => {
                effects.push(GestureEffect::EditText(hit.id));
            }
            HitPart::Body => {
                let pending = Command::Move { id: hit.id, from: rect.origin(), to: rect.origin() };
                self.transition(GestureState::Dragging {
                    pointer: event.pointer_id,
                    page,
                    start: event.position,
                    pending,
                });
            }
        }

        effects.push(GestureEffect::RedrawPage(page));
        effects
    }

    fn pointer_move(
        &mut self,
        event: &PointerEvent,
        ctx: &mut GestureContext<'_>,
    ) -> Vec<GestureEffect> {
        let Some(slot) = self.active.iter_mut().find(|(id, _)| *id == event.pointer_id) else {
            return Vec::new();
        };
        slot.1 = event.position;

        if let Some(tap) = self.tap {
            if tap.pointer == event.pointer_id
                && tap.start.distance_to(event.position) > ctx.config.tap_slop_px
            {
                self.tap = None;
            }
        }

        let document = ctx.document;
        match &mut self.state {
            GestureState::Dragging { pointer, page, start, pending }
                if *pointer == event.pointer_id =>
            {
                let Some(placement) = document.placement(*page) else {
                    return Vec::new();
                };
                let Command::Move { id, from, to } = pending else {
                    return Vec::new();
                };

                let (dx, dy) = ctx.viewport.screen_delta_to_page(
                    event.position.x - start.x,
                    event.position.y - start.y,
                    placement.size,
                );
                let target = PagePoint::new(from.x + dx, from.y + dy);
                let step = Command::Move { id: *id, from: *to, to: target };
                pending.merge(&step);
                vec![GestureEffect::RedrawPage(*page)]
            }
            GestureState::Resizing { pointer, page, start, pending }
                if *pointer == event.pointer_id =>
            {
                let Some(placement) = document.placement(*page) else {
                    return Vec::new();
                };
                let Command::Resize { id, from, to, anchor } = pending else {
                    return Vec::new();
                };
                let aspect_locked =
                    document.get(*id).is_some_and(|a| a.kind().aspect_locked());

                let (dx, dy) = ctx.viewport.screen_delta_to_page(
                    event.position.x - start.x,
                    event.position.y - start.y,
                    placement.size,
                );
                let resized = resize_from_top_left(
                    *from,
                    dx,
                    dy,
                    aspect_locked,
                    ctx.config.min_annotation_size_pt,
                    placement.size,
                );
                let step = Command::Resize { id: *id, from: *to, to: resized, anchor: *anchor };
                pending.merge(&step);
                vec![GestureEffect::RedrawPage(*page)]
            }
            GestureState::PanningCanvas(gesture) | GestureState::PinchZooming(gesture) => {
                let gesture = *gesture;
                self.two_finger_move(gesture, ctx)
            }
            _ => Vec::new(),
        }
    }

    fn two_finger_move(
        &mut self,
        gesture: TwoFingerGesture,
        ctx: &mut GestureContext<'_>,
    ) -> Vec<GestureEffect> {
        let (first, second) = gesture.pointers;
        let (Some(a), Some(b)) = (self.position_of(first), self.position_of(second)) else {
            return Vec::new();
        };

        let mid = a.midpoint(b);
        let ratio = a.distance_to(b) / gesture.start_distance;

        if matches!(self.state, GestureState::PanningCanvas(_))
            && (ratio - 1.0).abs() > ctx.config.pinch_threshold
        {
            self.transition(GestureState::PinchZooming(gesture));
        }

        match self.state {
            GestureState::PinchZooming(_) => {
                // Canvas point that sat under the midpoint when the gesture began.
                let canvas_x = (gesture.start_mid.x - gesture.start_pan.x) / gesture.start_zoom;
                let canvas_y = (gesture.start_mid.y - gesture.start_pan.y) / gesture.start_zoom;
                ctx.viewport.set_zoom(gesture.start_zoom * ratio);
                let zoom = ctx.viewport.zoom();
                let pan = ScreenPoint::new(mid.x - canvas_x * zoom, mid.y - canvas_y * zoom);
                ctx.viewport.set_pan(pan);
            }
            _ => {
                ctx.viewport.set_pan(ScreenPoint::new(
                    gesture.start_pan.x + mid.x - gesture.start_mid.x,
                    gesture.start_pan.y + mid.y - gesture.start_mid.y,
                ));
            }
        }

        vec![GestureEffect::RedrawAll]
    }

    fn pointer_up(
        &mut self,
        event: &PointerEvent,
        ctx: &mut GestureContext<'_>,
    ) -> Vec<GestureEffect> {
        let tap = self.tap.filter(|tap| tap.pointer == event.pointer_id);
        let known = self.position_of(event.pointer_id).is_some();
        self.forget_pointer(event.pointer_id);

        if !known {
            return Vec::new();
        }

        let resting = GestureState::resting(ctx.tool, ctx.selection);
        let state = std::mem::replace(&mut self.state, resting);
        match state {
            GestureState::Dragging { pointer, page, pending, .. }
            | GestureState::Resizing { pointer, page, pending, .. } => {
                if pointer != event.pointer_id {
                    self.state = GestureState::resting(ctx.tool, ctx.selection);
                    debug!("drag pointer lost, pending edit discarded");
                    return vec![GestureEffect::RedrawPage(page)];
                }

                debug!(command = pending.label(), "gesture finished");
                let mut effects = Vec::new();
                if !pending.is_noop() {
                    effects.push(GestureEffect::Commit(pending));
                }
                effects.push(GestureEffect::RedrawPage(page));
                effects
            }
            GestureState::PanningCanvas(_) | GestureState::PinchZooming(_) => {
                debug!("two-finger gesture finished");
                vec![GestureEffect::RedrawAll]
            }
            resting => {
                self.state = resting;
                match tap {
                    Some(tap)
                        if tap.start.distance_to(event.position) <= ctx.config.tap_slop_px =>
                    {
                        self.tap_on_canvas(tap, event.position, ctx)
                    }
                    _ => Vec::new(),
                }
            }
        }
    }

    fn tap_on_canvas(
        &self,
        tap: PendingTap,
        at: ScreenPoint,
        ctx: &GestureContext<'_>,
    ) -> Vec<GestureEffect> {
        let page = ctx.document.page_at(at, ctx.viewport);
        let page_point = page
            .and_then(|page| ctx.document.placement(page))
            .map(|placement| ctx.viewport.to_page(at, placement));

        match (ctx.tool, page.zip(page_point)) {
            (Tool::Text | Tool::Stamp, Some((page, at))) => {
                vec![GestureEffect::Place { tool: ctx.tool, page, at }]
            }
            (Tool::None, Some((page, at))) if tap.tap_count >= 2 => {
                vec![GestureEffect::Place { tool: Tool::Text, page, at }]
            }
            (Tool::None, _) if ctx.selection.is_some() => vec![GestureEffect::Select(None)],
            _ => Vec::new(),
        }
    }
}

fn pending_target(command: &Command) -> Option<AnnotationId> {
    match command {
        Command::Move { id, .. } | Command::Resize { id, .. } => Some(*id),
        _ => None,
    }
}

/// Grow or shrink `from` by a bottom-right handle delta, keeping the top-left
/// corner fixed. Sizes never fall below `min_size_pt`.
pub fn resize_from_top_left(
    from: PageRect,
    dx: f32,
    dy: f32,
    aspect_locked: bool,
    min_size_pt: f32,
    size: PageSize,
) -> PageRect {
    let from_w = (from.width * size.width_pt).max(f32::EPSILON);
    let from_h = (from.height * size.height_pt).max(f32::EPSILON);
    let mut w = (from.width + dx) * size.width_pt;
    let mut h = (from.height + dy) * size.height_pt;

    if aspect_locked {
        let scale = (w / from_w).max(h / from_h);
        let floor = (min_size_pt / from_w).max(min_size_pt / from_h);
        let scale = scale.max(floor);
        w = from_w * scale;
        h = from_h * scale;
    } else {
        w = w.max(min_size_pt);
        h = h.max(min_size_pt);
    }

    from.with_size(w / size.width_pt, h / size.height_pt)
}
