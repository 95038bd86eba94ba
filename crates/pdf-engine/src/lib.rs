//! PDF collaborators consumed by the annotation engine.
//!
//! The engine never parses or encodes PDF itself. It asks a [`PdfRasterizer`]
//! for page sizes and page bitmaps and hands finished bitmaps to a
//! [`PdfWriter`]. The default implementations here are backed by `lopdf`;
//! enable the `pdfium` feature for a rasterizer that draws real page content.

use image::{ImageBuffer, Rgba};
use lopdf::Document;
use std::fs;
use std::path::{Path, PathBuf};

mod writer;

pub use writer::ImagePdfWriter;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Intrinsic page size in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    pub const LETTER: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

    pub fn new(width_pt: f32, height_pt: f32) -> Self {
        Self { width_pt, height_pt }
    }

    /// Pixel dimensions of this page rendered at `scale` pixels per point.
    pub fn pixel_size(&self, scale: f32) -> (u32, u32) {
        let scale = if scale <= 0.0 { 1.0 } else { scale };
        let width = (self.width_pt * scale).round().max(1.0) as u32;
        let height = (self.height_pt * scale).round().max(1.0) as u32;
        (width, height)
    }
}

/// A composited page ready to be written into the output document.
#[derive(Debug, Clone)]
pub struct FlattenedPage {
    pub image: RgbaImage,
    pub size: PageSize,
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("document has no pages")]
    NoPages,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Turns pages of an opened document into bitmaps.
pub trait PdfRasterizer {
    fn page_count(&self) -> u32;

    fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError>;

    /// Render a page at `scale` pixels per point.
    fn render_page(&self, page_index: u32, scale: f32) -> Result<RgbaImage, PdfEngineError>;
}

/// Encodes flattened page bitmaps into a standalone PDF file.
pub trait PdfWriter {
    fn write_document(&self, pages: &[FlattenedPage]) -> Result<Vec<u8>, PdfEngineError>;
}

/// A PDF opened with `lopdf`.
///
/// Only page geometry is read. Pages rasterize to blank white sheets of the
/// correct size, which is enough to flatten annotations onto forms whose
/// content is supplied by another backend.
#[derive(Debug, Clone)]
pub struct LoadedPdf {
    bytes: Vec<u8>,
    page_sizes: Vec<PageSize>,
}

impl LoadedPdf {
    pub fn open(source: impl Into<OpenSource>) -> Result<Self, PdfEngineError> {
        let bytes = match source.into() {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let page_sizes = Self::parse_sizes(&bytes)?;
        tracing::debug!(pages = page_sizes.len(), bytes = bytes.len(), "opened pdf");

        Ok(Self { bytes, page_sizes })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn page_sizes(&self) -> &[PageSize] {
        &self.page_sizes
    }

    fn parse_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(bytes)?;
        let pages = doc.get_pages();
        let mut sizes = Vec::with_capacity(pages.len());

        for (_, object_id) in pages {
            let dict = doc.get_dictionary(object_id)?;
            let size = dict
                .get(b"MediaBox")
                .ok()
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| {
                    if array.len() != 4 {
                        return None;
                    }
                    let x0 = array[0].as_float().ok()?;
                    let y0 = array[1].as_float().ok()?;
                    let x1 = array[2].as_float().ok()?;
                    let y1 = array[3].as_float().ok()?;
                    Some(PageSize::new((x1 - x0).abs(), (y1 - y0).abs()))
                })
                .unwrap_or(PageSize::LETTER);

            sizes.push(size);
        }

        if sizes.is_empty() {
            return Err(PdfEngineError::NoPages);
        }

        Ok(sizes)
    }
}

impl PdfRasterizer for LoadedPdf {
    fn page_count(&self) -> u32 {
        self.page_sizes.len() as u32
    }

    fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
        self.page_sizes.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: self.page_count(),
        })
    }

    fn render_page(&self, page_index: u32, scale: f32) -> Result<RgbaImage, PdfEngineError> {
        let (width, height) = self.page_size(page_index)?.pixel_size(scale);
        Ok(RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])))
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::*;
    use pdfium_render::prelude::*;

    /// Rasterizer drawing real page content through a system PDFium library.
    pub struct PdfiumRasterizer {
        pdfium: Pdfium,
        inner: LoadedPdf,
    }

    impl PdfiumRasterizer {
        pub fn open(source: impl Into<OpenSource>) -> Result<Self, PdfEngineError> {
            let bindings = Pdfium::bind_to_system_library().map_err(|err| {
                PdfEngineError::Backend(format!("failed to bind pdfium system library: {err}"))
            })?;

            Ok(Self { pdfium: Pdfium::new(bindings), inner: LoadedPdf::open(source)? })
        }
    }

    impl PdfRasterizer for PdfiumRasterizer {
        fn page_count(&self) -> u32 {
            self.inner.page_count()
        }

        fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
            self.inner.page_size(page_index)
        }

        fn render_page(&self, page_index: u32, scale: f32) -> Result<RgbaImage, PdfEngineError> {
            let (width, height) = self.page_size(page_index)?.pixel_size(scale);
            let backend = |err: PdfiumError| PdfEngineError::Backend(err.to_string());

            let document =
                self.pdfium.load_pdf_from_byte_slice(self.inner.bytes(), None).map_err(backend)?;
            let page = document.pages().get(page_index as u16).map_err(backend)?;
            let config = PdfRenderConfig::new()
                .set_target_width(width as i32)
                .set_maximum_height(height as i32);
            let bitmap = page.render_with_config(&config).map_err(backend)?;

            Ok(bitmap.as_image().to_rgba8())
        }
    }
}
