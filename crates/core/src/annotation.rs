//! Annotation data model
//!
//! Every annotation shares one envelope (id, page, rectangle, rotation) and
//! carries a variant payload. Geometry is always page-normalized so the model
//! is independent of zoom, pan and device pixel ratio.

use crate::error::StateError;
use crate::geometry::PageRect;
use pdf_engine::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for an annotation
///
/// Stable across undo/redo: deleting and restoring an annotation keeps its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotationId(Uuid);

impl AnnotationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnnotationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// RGBA color representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 255, a: 255 };
    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const INK_BLUE: Color = Color { r: 20, g: 40, b: 140, a: 255 };
    pub const CHECK_GREEN: Color = Color { r: 16, g: 128, b: 48, a: 255 };

    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn to_rgba(self) -> image::Rgba<u8> {
        image::Rgba([self.r, self.g, self.b, self.a])
    }
}

/// Typography of a text annotation. Sizes are in page points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    pub font_family: String,
    pub font_size: f32,
    pub color: Color,
    pub bold: bool,
    pub italic: bool,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: "Helvetica".to_string(),
            font_size: 14.0,
            color: Color::BLACK,
            bold: false,
            italic: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextContent {
    pub content: String,
    pub style: TextStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampGlyph {
    Checkmark,
}

/// Shared, immutable pixel buffer of a signature or photo.
#[derive(Clone)]
pub struct RasterImage(Arc<RgbaImage>);

impl RasterImage {
    pub fn new(image: RgbaImage) -> Self {
        Self(Arc::new(image))
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.0
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f32 {
        self.width().max(1) as f32 / self.height().max(1) as f32
    }
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RasterImage({}x{})", self.width(), self.height())
    }
}

impl PartialEq for RasterImage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterPayload {
    pub raster: RasterImage,
    pub aspect_locked: bool,
}

/// Variant payload of an annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationKind {
    Text(TextContent),
    Stamp(StampGlyph),
    Signature(RasterPayload),
    Image(RasterPayload),
}

impl AnnotationKind {
    pub fn label(&self) -> &'static str {
        match self {
            AnnotationKind::Text(_) => "text",
            AnnotationKind::Stamp(_) => "stamp",
            AnnotationKind::Signature(_) => "signature",
            AnnotationKind::Image(_) => "image",
        }
    }

    pub fn aspect_locked(&self) -> bool {
        match self {
            AnnotationKind::Signature(payload) | AnnotationKind::Image(payload) => {
                payload.aspect_locked
            }
            AnnotationKind::Text(_) | AnnotationKind::Stamp(_) => false,
        }
    }
}

/// Editable property of an annotation, with its value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    FontFamily(String),
    FontSize(f32),
    Color(Color),
    Bold(bool),
    Italic(bool),
    AspectLock(bool),
    Rotation(f32),
}

impl PropertyValue {
    pub fn field(&self) -> &'static str {
        match self {
            PropertyValue::Text(_) => "text",
            PropertyValue::FontFamily(_) => "font_family",
            PropertyValue::FontSize(_) => "font_size",
            PropertyValue::Color(_) => "color",
            PropertyValue::Bold(_) => "bold",
            PropertyValue::Italic(_) => "italic",
            PropertyValue::AspectLock(_) => "aspect_lock",
            PropertyValue::Rotation(_) => "rotation",
        }
    }
}

/// A placed annotation
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    id: AnnotationId,

    /// Page index this annotation belongs to (0-based)
    page_index: u32,

    rect: PageRect,

    /// Clockwise rotation about the rectangle centre, in degrees
    rotation: f32,

    kind: AnnotationKind,
}

impl Annotation {
    /// Create a new annotation with a generated ID
    pub fn new(page_index: u32, rect: PageRect, kind: AnnotationKind) -> Self {
        Self::with_id(AnnotationId::new(), page_index, rect, kind)
    }

    pub fn with_id(
        id: AnnotationId,
        page_index: u32,
        rect: PageRect,
        kind: AnnotationKind,
    ) -> Self {
        Self { id, page_index, rect, rotation: 0.0, kind }
    }

    pub fn id(&self) -> AnnotationId {
        self.id
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn rect(&self) -> PageRect {
        self.rect
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn kind(&self) -> &AnnotationKind {
        &self.kind
    }

    pub fn text(&self) -> Option<&TextContent> {
        match &self.kind {
            AnnotationKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub(crate) fn set_rect(&mut self, rect: PageRect) {
        self.rect = rect;
    }

    /// Read the current value of the property named by `like`.
    pub fn property(&self, like: &PropertyValue) -> Option<PropertyValue> {
        let value = match (like, &self.kind) {
            (PropertyValue::Rotation(_), _) => PropertyValue::Rotation(self.rotation),
            (PropertyValue::Text(_), AnnotationKind::Text(text)) => {
                PropertyValue::Text(text.content.clone())
            }
            (PropertyValue::FontFamily(_), AnnotationKind::Text(text)) => {
                PropertyValue::FontFamily(text.style.font_family.clone())
            }
            (PropertyValue::FontSize(_), AnnotationKind::Text(text)) => {
                PropertyValue::FontSize(text.style.font_size)
            }
            (PropertyValue::Color(_), AnnotationKind::Text(text)) => {
                PropertyValue::Color(text.style.color)
            }
            (PropertyValue::Bold(_), AnnotationKind::Text(text)) => {
                PropertyValue::Bold(text.style.bold)
            }
            (PropertyValue::Italic(_), AnnotationKind::Text(text)) => {
                PropertyValue::Italic(text.style.italic)
            }
            (
                PropertyValue::AspectLock(_),
                AnnotationKind::Signature(payload) | AnnotationKind::Image(payload),
            ) => PropertyValue::AspectLock(payload.aspect_locked),
            _ => return None,
        };

        Some(value)
    }

    /// Write a property, returning the value it replaced.
    pub(crate) fn set_property(
        &mut self,
        value: PropertyValue,
    ) -> Result<PropertyValue, StateError> {
        let unsupported = StateError::UnsupportedProperty { id: self.id, field: value.field() };

        let old = match (value, &mut self.kind) {
            (PropertyValue::Rotation(degrees), _) => {
                PropertyValue::Rotation(std::mem::replace(&mut self.rotation, degrees))
            }
            (PropertyValue::Text(content), AnnotationKind::Text(text)) => {
                PropertyValue::Text(std::mem::replace(&mut text.content, content))
            }
            (PropertyValue::FontFamily(family), AnnotationKind::Text(text)) => {
                PropertyValue::FontFamily(std::mem::replace(&mut text.style.font_family, family))
            }
            (PropertyValue::FontSize(size), AnnotationKind::Text(text)) => {
                PropertyValue::FontSize(std::mem::replace(&mut text.style.font_size, size))
            }
            (PropertyValue::Color(color), AnnotationKind::Text(text)) => {
                PropertyValue::Color(std::mem::replace(&mut text.style.color, color))
            }
            (PropertyValue::Bold(bold), AnnotationKind::Text(text)) => {
                PropertyValue::Bold(std::mem::replace(&mut text.style.bold, bold))
            }
            (PropertyValue::Italic(italic), AnnotationKind::Text(text)) => {
                PropertyValue::Italic(std::mem::replace(&mut text.style.italic, italic))
            }
            (
                PropertyValue::AspectLock(locked),
                AnnotationKind::Signature(payload) | AnnotationKind::Image(payload),
            ) => PropertyValue::AspectLock(std::mem::replace(&mut payload.aspect_locked, locked)),
            _ => return Err(unsupported),
        };

        Ok(old)
    }
}
