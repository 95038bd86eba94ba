//! PaperStamp core
//!
//! Annotation model, undo history, pointer gestures and flattening for
//! filling in and signing PDF pages.

pub mod annotation;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod flatten;
pub mod geometry;
pub mod gesture;
pub mod history;
pub mod raster;
pub mod tools;

pub use annotation::{
    Annotation, AnnotationId, AnnotationKind, Color, PropertyValue, RasterImage, RasterPayload,
    StampGlyph, TextContent, TextStyle,
};
pub use config::EngineConfig;
pub use document::{Document, Hit, HitPart, HitSlop, Page, PageBitmap, Selection};
pub use engine::{Engine, Toast, ToastLevel};
pub use error::{EngineError, EngineResult, InputError, RenderError, StateError};
pub use flatten::{FlattenJob, FlattenPage};
pub use geometry::{PagePoint, PageRect, PageSize, ScreenPoint, ScreenRect, Viewport};
pub use gesture::{EngineAction, GestureController, GestureState, PointerEvent, PointerPhase};
pub use history::{Command, Corner, History, MAX_HISTORY};
pub use raster::{BlockPainter, FontPainter, TextPainter};
pub use tools::photo::{CameraStream, MediaCapture, PhotoModal};
pub use tools::signature::SignaturePad;
pub use tools::text_edit::TextEditSession;
pub use tools::{TextSetting, Tool};
