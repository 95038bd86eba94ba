//! Engine error taxonomy
//!
//! - [`InputError`]: recoverable problems with what the user supplied. Surfaced
//!   as a toast; engine state is left untouched.
//! - [`RenderError`]: a page failed to rasterize, composite or encode. Fatal to
//!   the export in progress only.
//! - [`StateError`]: an operation referenced something that no longer exists.
//!   Treated as a no-op by callers.

use crate::annotation::AnnotationId;
use pdf_engine::PdfEngineError;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("the signature is empty, draw something first")]
    EmptySignature,
    #[error("no file was selected")]
    NoFileSelected,
    #[error("the selected file is not a supported image: {0}")]
    UnreadableImage(String),
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("no frame has been captured yet")]
    NoFrameCaptured,
    #[error("unable to read document: {0}")]
    UnreadableDocument(String),
    #[error("unable to load font: {0}")]
    UnreadableFont(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("page {page} failed to render: {source}")]
    Page {
        page: u32,
        #[source]
        source: PdfEngineError,
    },
    #[error("page {page} rendered at {actual:?} pixels, expected {expected:?}")]
    SizeMismatch { page: u32, expected: (u32, u32), actual: (u32, u32) },
    #[error("failed to write output document: {0}")]
    Write(#[source] PdfEngineError),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    #[error("annotation {0} no longer exists")]
    UnknownAnnotation(AnnotationId),
    #[error("annotation {0} already exists")]
    DuplicateAnnotation(AnnotationId),
    #[error("page {0} does not exist")]
    UnknownPage(u32),
    #[error("annotation {id} does not support {field}")]
    UnsupportedProperty { id: AnnotationId, field: &'static str },
    #[error("no placement tool is armed")]
    NoToolArmed,
    #[error("no document is open")]
    NoDocument,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("an export is already in progress")]
    ExportInProgress,
}

pub type EngineResult<T> = Result<T, EngineError>;
