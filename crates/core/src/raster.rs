//! Pixel compositing of annotations onto page bitmaps
//!
//! Used both for the on-screen overlay (at the view's render scale) and for
//! flattening (at the export scale). Geometry comes from the page-normalized
//! model and a pixels-per-point factor only, never from the view zoom.

use crate::annotation::{Annotation, AnnotationKind, Color, StampGlyph, TextContent};
use crate::error::InputError;
use crate::geometry::{rotate_about, PageRect, PageSize};
use ab_glyph::{point, Font, FontArc, PxScale, ScaleFont};
use image::imageops::{self, FilterType};
use image::Rgba;
use pdf_engine::RgbaImage;
use std::path::Path;

/// Line advance as a multiple of the font size.
pub const LINE_HEIGHT: f32 = 1.2;

/// Average glyph advance as a multiple of the font size, used when no font
/// metrics are available.
pub const AVERAGE_ADVANCE: f32 = 0.6;

const ITALIC_SHEAR: f32 = 0.2;

/// Draws text runs onto a bitmap.
pub trait TextPainter: Send + Sync {
    /// Paint `text` with its top-left corner at `origin` (pixels).
    fn draw_text(
        &self,
        canvas: &mut RgbaImage,
        text: &TextContent,
        origin: (f32, f32),
        px_per_pt: f32,
    );

    /// Size of the laid out text in points.
    fn measure(&self, text: &TextContent) -> (f32, f32) {
        estimate_text_size(text)
    }
}

/// Text size from average advance, one line per `\n`.
pub fn estimate_text_size(text: &TextContent) -> (f32, f32) {
    let size = text.style.font_size;
    let longest = text.content.lines().map(|line| line.chars().count()).max().unwrap_or(0).max(1);
    let lines = text.content.lines().count().max(1);
    (longest as f32 * size * AVERAGE_ADVANCE, lines as f32 * size * LINE_HEIGHT)
}

/// Paints every non-blank character as a solid cell.
///
/// Used when no font file is configured, so exports stay legible as text
/// placement even without glyph outlines.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockPainter;

impl TextPainter for BlockPainter {
    fn draw_text(
        &self,
        canvas: &mut RgbaImage,
        text: &TextContent,
        origin: (f32, f32),
        px_per_pt: f32,
    ) {
        let style = &text.style;
        let em = style.font_size * px_per_pt;
        let advance = em * AVERAGE_ADVANCE;
        let cell_width = if style.bold { advance * 0.85 } else { advance * 0.7 };
        let cell_height = em * 0.7;
        let color = style.color.to_rgba();

        for (row, line) in text.content.lines().enumerate() {
            let line_top = origin.1 + row as f32 * em * LINE_HEIGHT;
            let top = line_top + (em * LINE_HEIGHT - cell_height) / 2.0;
            for (column, ch) in line.chars().enumerate() {
                if ch.is_whitespace() {
                    continue;
                }

                let left = origin.0 + column as f32 * advance + (advance - cell_width) / 2.0;
                if style.italic {
                    let rows = cell_height.ceil().max(1.0) as i64;
                    for dy in 0..rows {
                        let y = top + dy as f32;
                        let shear = (top + cell_height - y) * ITALIC_SHEAR;
                        let x = left + shear;
                        fill_rect(canvas, x, y, x + cell_width, y + 1.0, color);
                    }
                } else {
                    fill_rect(canvas, left, top, left + cell_width, top + cell_height, color);
                }
            }
        }
    }
}

/// Renders glyph outlines from a TrueType/OpenType font.
#[derive(Clone)]
pub struct FontPainter {
    font: FontArc,
}

impl std::fmt::Debug for FontPainter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontPainter").finish_non_exhaustive()
    }
}

impl FontPainter {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, InputError> {
        let font = FontArc::try_from_vec(bytes)
            .map_err(|err| InputError::UnreadableFont(err.to_string()))?;
        Ok(Self { font })
    }

    pub fn load(path: &Path) -> Result<Self, InputError> {
        let bytes = std::fs::read(path)
            .map_err(|err| InputError::UnreadableFont(format!("{}: {err}", path.display())))?;
        Self::from_bytes(bytes)
    }
}

impl TextPainter for FontPainter {
    fn draw_text(
        &self,
        canvas: &mut RgbaImage,
        text: &TextContent,
        origin: (f32, f32),
        px_per_pt: f32,
    ) {
        let style = &text.style;
        let size_px = style.font_size * px_per_pt;
        if size_px <= 0.0 {
            return;
        }

        let scaled = self.font.as_scaled(PxScale::from(size_px));
        let color = style.color.to_rgba();
        let embolden = (size_px / 24.0).max(1.0);

        for (row, line) in text.content.lines().enumerate() {
            let baseline = origin.1 + row as f32 * size_px * LINE_HEIGHT + scaled.ascent();
            let mut x = origin.0;
            let mut previous = None;

            for ch in line.chars() {
                let glyph_id = scaled.glyph_id(ch);
                if let Some(previous) = previous {
                    x += scaled.kern(previous, glyph_id);
                }

                let glyph = glyph_id.with_scale_and_position(size_px, point(x, baseline));
                if let Some(outlined) = self.font.outline_glyph(glyph) {
                    let bounds = outlined.px_bounds();
                    outlined.draw(|gx, gy, coverage| {
                        let y = bounds.min.y + gy as f32;
                        let shear = if style.italic { (baseline - y) * ITALIC_SHEAR } else { 0.0 };
                        let px = bounds.min.x + gx as f32 + shear;
                        blend_at(canvas, px, y, color, coverage);
                        if style.bold {
                            blend_at(canvas, px + embolden, y, color, coverage);
                        }
                    });
                }

                x += scaled.h_advance(glyph_id);
                previous = Some(glyph_id);
            }
        }
    }

    fn measure(&self, text: &TextContent) -> (f32, f32) {
        let size = text.style.font_size;
        let scaled = self.font.as_scaled(PxScale::from(size));
        let widest = text
            .content
            .lines()
            .map(|line| line.chars().map(|ch| scaled.h_advance(scaled.glyph_id(ch))).sum::<f32>())
            .fold(0.0_f32, f32::max);
        let lines = text.content.lines().count().max(1);
        (widest.max(size * AVERAGE_ADVANCE), lines as f32 * size * LINE_HEIGHT)
    }
}

/// Source-over blend of `color` scaled by `coverage` into one pixel.
pub fn blend_pixel(canvas: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>, coverage: f32) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }

    let src_a = color.0[3] as f32 / 255.0 * coverage.clamp(0.0, 1.0);
    if src_a <= 0.0 {
        return;
    }

    let dst = canvas.get_pixel_mut(x as u32, y as u32);
    let dst_a = dst.0[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    for channel in 0..3 {
        let src = color.0[channel] as f32;
        let existing = dst.0[channel] as f32;
        let value = (src * src_a + existing * dst_a * (1.0 - src_a)) / out_a;
        dst.0[channel] = value.round().clamp(0.0, 255.0) as u8;
    }
    dst.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

fn blend_at(canvas: &mut RgbaImage, x: f32, y: f32, color: Rgba<u8>, coverage: f32) {
    blend_pixel(canvas, x.floor() as i64, y.floor() as i64, color, coverage);
}

/// Fill the pixels whose centres fall inside `[x0, x1) x [y0, y1)`.
pub fn fill_rect(canvas: &mut RgbaImage, x0: f32, y0: f32, x1: f32, y1: f32, color: Rgba<u8>) {
    let (left, right) = ((x0 - 0.5).ceil() as i64, (x1 - 0.5).ceil() as i64);
    let (top, bottom) = ((y0 - 0.5).ceil() as i64, (y1 - 0.5).ceil() as i64);
    for y in top..bottom {
        for x in left..right {
            blend_pixel(canvas, x, y, color, 1.0);
        }
    }
}

fn distance_to_segment(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    let length_sq = dx * dx + dy * dy;

    let (cx, cy) = if length_sq < 1e-6 {
        a
    } else {
        let t = (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / length_sq).clamp(0.0, 1.0);
        (a.0 + t * dx, a.1 + t * dy)
    };

    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

/// Anti-aliased line of the given width with round caps.
pub fn draw_thick_line(
    canvas: &mut RgbaImage,
    a: (f32, f32),
    b: (f32, f32),
    width: f32,
    color: Rgba<u8>,
) {
    let radius = (width / 2.0).max(0.5);
    let left = (a.0.min(b.0) - radius - 1.0).floor() as i64;
    let right = (a.0.max(b.0) + radius + 1.0).ceil() as i64;
    let top = (a.1.min(b.1) - radius - 1.0).floor() as i64;
    let bottom = (a.1.max(b.1) + radius + 1.0).ceil() as i64;

    for y in top..=bottom {
        for x in left..=right {
            let d = distance_to_segment((x as f32 + 0.5, y as f32 + 0.5), a, b);
            let coverage = (radius + 0.5 - d).clamp(0.0, 1.0);
            if coverage > 0.0 {
                blend_pixel(canvas, x, y, color, coverage);
            }
        }
    }
}

pub fn draw_polyline(canvas: &mut RgbaImage, points: &[(f32, f32)], width: f32, color: Rgba<u8>) {
    match points {
        [] => {}
        [single] => draw_thick_line(canvas, *single, *single, width, color),
        _ => {
            for pair in points.windows(2) {
                draw_thick_line(canvas, pair[0], pair[1], width, color);
            }
        }
    }
}

/// Unit-square checkmark path, scaled to the stamp's box when drawn.
const CHECKMARK: [(f32, f32); 3] = [(0.15, 0.55), (0.4, 0.8), (0.85, 0.2)];

/// Render one annotation into a transparent layer the size of its box.
fn render_layer(
    annotation: &Annotation,
    width: u32,
    height: u32,
    px_per_pt: f32,
    painter: &dyn TextPainter,
) -> RgbaImage {
    match annotation.kind() {
        AnnotationKind::Text(text) => {
            let mut layer = RgbaImage::new(width, height);
            painter.draw_text(&mut layer, text, (0.0, 0.0), px_per_pt);
            layer
        }
        AnnotationKind::Stamp(StampGlyph::Checkmark) => {
            let mut layer = RgbaImage::new(width, height);
            let (w, h) = (width as f32, height as f32);
            let points: Vec<_> = CHECKMARK.iter().map(|(x, y)| (x * w, y * h)).collect();
            let stroke = (w.min(h) * 0.12).max(1.0);
            draw_polyline(&mut layer, &points, stroke, Color::CHECK_GREEN.to_rgba());
            layer
        }
        AnnotationKind::Signature(payload) | AnnotationKind::Image(payload) => {
            imageops::resize(payload.raster.pixels(), width, height, FilterType::Triangle)
        }
    }
}

/// Composite `layer` with its top-left at `(x, y)`, rotated about its centre.
fn blit_rotated(canvas: &mut RgbaImage, layer: &RgbaImage, x: f32, y: f32, degrees: f32) {
    let (lw, lh) = (layer.width() as f32, layer.height() as f32);

    if degrees.rem_euclid(360.0) == 0.0 {
        let (ox, oy) = (x.round() as i64, y.round() as i64);
        for (lx, ly, pixel) in layer.enumerate_pixels() {
            if pixel.0[3] > 0 {
                blend_pixel(canvas, ox + lx as i64, oy + ly as i64, *pixel, 1.0);
            }
        }
        return;
    }

    let center = (x + lw / 2.0, y + lh / 2.0);
    let corners = [(x, y), (x + lw, y), (x, y + lh), (x + lw, y + lh)]
        .map(|corner| rotate_about(corner, center, degrees));
    let left = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min).floor() as i64;
    let right = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max).ceil() as i64;
    let top = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min).floor() as i64;
    let bottom = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max).ceil() as i64;

    for py in top..bottom {
        for px in left..right {
            let (sx, sy) = rotate_about((px as f32 + 0.5, py as f32 + 0.5), center, -degrees);
            let (lx, ly) = ((sx - x).floor(), (sy - y).floor());
            if lx < 0.0 || ly < 0.0 || lx >= lw || ly >= lh {
                continue;
            }
            let pixel = *layer.get_pixel(lx as u32, ly as u32);
            if pixel.0[3] > 0 {
                blend_pixel(canvas, px, py, pixel, 1.0);
            }
        }
    }
}

/// Composite one annotation onto a page bitmap rendered at `px_per_pt`.
///
/// `rect` overrides the stored rectangle, which lets a live drag preview be
/// drawn without touching the model.
pub fn composite_annotation(
    canvas: &mut RgbaImage,
    annotation: &Annotation,
    rect: Option<PageRect>,
    page: PageSize,
    px_per_pt: f32,
    painter: &dyn TextPainter,
) {
    let rect = rect.unwrap_or_else(|| annotation.rect());
    let x = rect.x * page.width_pt * px_per_pt;
    let y = rect.y * page.height_pt * px_per_pt;
    let width = (rect.width * page.width_pt * px_per_pt).round().max(1.0) as u32;
    let height = (rect.height * page.height_pt * px_per_pt).round().max(1.0) as u32;

    let layer = render_layer(annotation, width, height, px_per_pt, painter);
    blit_rotated(canvas, &layer, x, y, annotation.rotation());
}

/// Composite a page's annotations bottom to top.
pub fn composite_page(
    canvas: &mut RgbaImage,
    annotations: &[Annotation],
    page: PageSize,
    px_per_pt: f32,
    painter: &dyn TextPainter,
) {
    for annotation in annotations {
        composite_annotation(canvas, annotation, None, page, px_per_pt, painter);
    }
}
