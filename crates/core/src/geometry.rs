//! Coordinate spaces and the view transform
//!
//! Three spaces are involved when a pointer touches the canvas:
//! - page-normalized: origin at the page's top-left corner, `1.0` is the full
//!   page width (x) or height (y). This is the only space the model stores.
//! - canvas: PDF points, pages stacked vertically by [`PageLayout`].
//! - screen: logical pixels after zoom and pan. Device pixels are screen
//!   pixels times the device pixel ratio.

use serde::{Deserialize, Serialize};

pub use pdf_engine::PageSize;

/// Point in page-normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PagePoint {
    pub x: f32,
    pub y: f32,
}

impl PagePoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Convert to PDF points measured from the page's top-left corner.
    pub fn to_points(self, size: PageSize) -> (f32, f32) {
        (self.x * size.width_pt, self.y * size.height_pt)
    }

    pub fn from_points(x_pt: f32, y_pt: f32, size: PageSize) -> Self {
        Self { x: x_pt / size.width_pt, y: y_pt / size.height_pt }
    }
}

/// Rectangle in page-normalized coordinates, anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PageRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle of the given size centred on `center`.
    pub fn centered(center: PagePoint, width: f32, height: f32) -> Self {
        Self { x: center.x - width / 2.0, y: center.y - height / 2.0, width, height }
    }

    pub fn origin(&self) -> PagePoint {
        PagePoint::new(self.x, self.y)
    }

    pub fn center(&self) -> PagePoint {
        PagePoint::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn bottom_right(&self) -> PagePoint {
        PagePoint::new(self.x + self.width, self.y + self.height)
    }

    pub fn with_origin(&self, origin: PagePoint) -> Self {
        Self { x: origin.x, y: origin.y, ..*self }
    }

    pub fn with_size(&self, width: f32, height: f32) -> Self {
        Self { width, height, ..*self }
    }

    pub fn contains(&self, point: PagePoint) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }
}

/// Point in logical screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

impl ScreenPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: ScreenPoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn midpoint(&self, other: ScreenPoint) -> ScreenPoint {
        ScreenPoint::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Rectangle in logical screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ScreenRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Square of side `size` centred on `center`.
    pub fn square(center: ScreenPoint, size: f32) -> Self {
        Self { x: center.x - size / 2.0, y: center.y - size / 2.0, width: size, height: size }
    }

    pub fn inflate(&self, amount: f32) -> Self {
        Self {
            x: self.x - amount,
            y: self.y - amount,
            width: self.width + amount * 2.0,
            height: self.height + amount * 2.0,
        }
    }

    pub fn contains(&self, point: ScreenPoint) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }
}

/// Where a page sits in canvas space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PagePlacement {
    /// Canvas x of the page's top-left corner, in points
    pub origin_x: f32,
    /// Canvas y of the page's top-left corner, in points
    pub origin_y: f32,
    pub size: PageSize,
}

/// Vertical stack of pages separated by a fixed gap.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageLayout {
    placements: Vec<PagePlacement>,
}

impl PageLayout {
    pub fn new(sizes: &[PageSize], gap_pt: f32) -> Self {
        let mut cursor = 0.0;
        let placements = sizes
            .iter()
            .map(|size| {
                let placement = PagePlacement { origin_x: 0.0, origin_y: cursor, size: *size };
                cursor += size.height_pt + gap_pt;
                placement
            })
            .collect();

        Self { placements }
    }

    pub fn placement(&self, page_index: u32) -> Option<PagePlacement> {
        self.placements.get(page_index as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Page containing a canvas point, if any. Gaps between pages belong to no page.
    pub fn page_at(&self, canvas_x: f32, canvas_y: f32) -> Option<u32> {
        self.placements
            .iter()
            .position(|p| {
                canvas_x >= p.origin_x
                    && canvas_x <= p.origin_x + p.size.width_pt
                    && canvas_y >= p.origin_y
                    && canvas_y <= p.origin_y + p.size.height_pt
            })
            .map(|index| index as u32)
    }
}

/// Zoom, pan and device pixel ratio of the on-screen canvas.
///
/// `screen = canvas * zoom + pan`. At zoom 1 one PDF point is one logical pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    zoom: f32,
    pan: ScreenPoint,
    device_pixel_ratio: f32,
    min_zoom: f32,
    max_zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.25, 5.0)
    }
}

impl Viewport {
    pub fn new(min_zoom: f32, max_zoom: f32) -> Self {
        let min_zoom = min_zoom.max(f32::EPSILON);
        let max_zoom = max_zoom.max(min_zoom);
        Self {
            zoom: 1.0_f32.clamp(min_zoom, max_zoom),
            pan: ScreenPoint::default(),
            device_pixel_ratio: 1.0,
            min_zoom,
            max_zoom,
        }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn pan(&self) -> ScreenPoint {
        self.pan
    }

    pub fn device_pixel_ratio(&self) -> f32 {
        self.device_pixel_ratio
    }

    pub fn zoom_bounds(&self) -> (f32, f32) {
        (self.min_zoom, self.max_zoom)
    }

    /// Set zoom, clamped to the configured bounds. Non-finite input is ignored.
    pub fn set_zoom(&mut self, zoom: f32) {
        if zoom.is_finite() {
            self.zoom = zoom.clamp(self.min_zoom, self.max_zoom);
        }
    }

    pub fn set_pan(&mut self, pan: ScreenPoint) {
        self.pan = pan;
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.pan.x += dx;
        self.pan.y += dy;
    }

    pub fn set_device_pixel_ratio(&mut self, ratio: f32) {
        if ratio.is_finite() && ratio > 0.0 {
            self.device_pixel_ratio = ratio;
        }
    }

    /// Zoom while keeping the canvas point under `anchor` fixed on screen.
    pub fn zoom_about(&mut self, anchor: ScreenPoint, zoom: f32) {
        let (canvas_x, canvas_y) = self.screen_to_canvas(anchor);
        self.set_zoom(zoom);
        self.pan =
            ScreenPoint::new(anchor.x - canvas_x * self.zoom, anchor.y - canvas_y * self.zoom);
    }

    /// Scale, in device pixels per point, for on-screen page bitmaps and overlays.
    pub fn render_scale(&self) -> f32 {
        self.zoom * self.device_pixel_ratio
    }

    pub fn canvas_to_screen(&self, canvas_x: f32, canvas_y: f32) -> ScreenPoint {
        ScreenPoint::new(canvas_x * self.zoom + self.pan.x, canvas_y * self.zoom + self.pan.y)
    }

    pub fn screen_to_canvas(&self, point: ScreenPoint) -> (f32, f32) {
        ((point.x - self.pan.x) / self.zoom, (point.y - self.pan.y) / self.zoom)
    }

    pub fn to_screen(&self, point: PagePoint, page: PagePlacement) -> ScreenPoint {
        let (x_pt, y_pt) = point.to_points(page.size);
        self.canvas_to_screen(page.origin_x + x_pt, page.origin_y + y_pt)
    }

    pub fn to_page(&self, point: ScreenPoint, page: PagePlacement) -> PagePoint {
        let (canvas_x, canvas_y) = self.screen_to_canvas(point);
        PagePoint::from_points(canvas_x - page.origin_x, canvas_y - page.origin_y, page.size)
    }

    pub fn to_device(&self, point: ScreenPoint) -> (f32, f32) {
        (point.x * self.device_pixel_ratio, point.y * self.device_pixel_ratio)
    }

    pub fn rect_to_screen(&self, rect: PageRect, page: PagePlacement) -> ScreenRect {
        let origin = self.to_screen(rect.origin(), page);
        ScreenRect::new(
            origin.x,
            origin.y,
            rect.width * page.size.width_pt * self.zoom,
            rect.height * page.size.height_pt * self.zoom,
        )
    }

    /// Convert a screen-pixel motion into a page-normalized delta.
    pub fn screen_delta_to_page(&self, dx: f32, dy: f32, size: PageSize) -> (f32, f32) {
        (dx / (self.zoom * size.width_pt), dy / (self.zoom * size.height_pt))
    }

    /// Convert a screen-pixel length into page points.
    pub fn screen_len_to_points(&self, len: f32) -> f32 {
        len / self.zoom
    }
}

/// Zoom that makes a page exactly as wide as the viewport.
pub fn fit_width_zoom(viewport_width_px: f32, page: PageSize) -> f32 {
    if viewport_width_px <= 0.0 || page.width_pt <= 0.0 {
        return 1.0;
    }

    viewport_width_px / page.width_pt
}

/// Zoom that fits the whole page inside the viewport.
pub fn fit_page_zoom(viewport_width_px: f32, viewport_height_px: f32, page: PageSize) -> f32 {
    if viewport_width_px <= 0.0
        || viewport_height_px <= 0.0
        || page.width_pt <= 0.0
        || page.height_pt <= 0.0
    {
        return 1.0;
    }

    (viewport_width_px / page.width_pt).min(viewport_height_px / page.height_pt)
}

/// Rotate `point` about `center` by `degrees` (clockwise on screen, y down).
pub fn rotate_about(point: (f32, f32), center: (f32, f32), degrees: f32) -> (f32, f32) {
    if degrees == 0.0 {
        return point;
    }

    let (sin, cos) = degrees.to_radians().sin_cos();
    let dx = point.0 - center.0;
    let dy = point.1 - center.1;
    (center.0 + dx * cos - dy * sin, center.1 + dx * sin + dy * cos)
}
