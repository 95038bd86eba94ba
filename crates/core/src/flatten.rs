//! Flattening annotations into page bitmaps for export
//!
//! A [`FlattenJob`] is an owned snapshot, so it can run on a worker thread
//! while the user keeps editing the live document. A job taken from the engine
//! holds the engine's export lock until it is run or dropped.

use crate::annotation::Annotation;
use crate::document::Document;
use crate::error::RenderError;
use crate::geometry::PageSize;
use crate::raster::{composite_page, TextPainter};
use pdf_engine::{FlattenedPage, PdfRasterizer, PdfWriter};
use std::sync::Arc;
use tracing::{debug, info};

/// One page of the snapshot.
#[derive(Debug, Clone)]
pub struct FlattenPage {
    pub index: u32,
    pub size: PageSize,
    /// Bottom to top
    pub annotations: Vec<Annotation>,
}

#[derive(Clone)]
pub struct FlattenJob {
    pages: Vec<FlattenPage>,
    export_scale: f32,
    painter: Arc<dyn TextPainter>,
    lock: Option<Arc<()>>,
}

impl std::fmt::Debug for FlattenJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlattenJob")
            .field("pages", &self.pages.len())
            .field("export_scale", &self.export_scale)
            .finish_non_exhaustive()
    }
}

impl FlattenJob {
    pub fn snapshot(document: &Document, export_scale: f32, painter: Arc<dyn TextPainter>) -> Self {
        let pages = document
            .pages()
            .iter()
            .map(|page| FlattenPage {
                index: page.index(),
                size: page.size(),
                annotations: page.annotations().to_vec(),
            })
            .collect();

        let export_scale =
            if export_scale.is_finite() && export_scale > 0.0 { export_scale } else { 1.0 };
        Self { pages, export_scale, painter, lock: None }
    }

    /// Keep `lock` alive for as long as this job (or a clone of it) exists.
    pub(crate) fn holding(mut self, lock: Arc<()>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn pages(&self) -> &[FlattenPage] {
        &self.pages
    }

    pub fn export_scale(&self) -> f32 {
        self.export_scale
    }

    pub fn annotation_count(&self) -> usize {
        self.pages.iter().map(|page| page.annotations.len()).sum()
    }

    /// Rasterize one page and composite its annotations.
    pub fn render_page(
        &self,
        page: &FlattenPage,
        rasterizer: &dyn PdfRasterizer,
    ) -> Result<FlattenedPage, RenderError> {
        let mut image = rasterizer
            .render_page(page.index, self.export_scale)
            .map_err(|source| RenderError::Page { page: page.index, source })?;

        let expected = page.size.pixel_size(self.export_scale);
        let actual = image.dimensions();
        if actual.0.abs_diff(expected.0) > 1 || actual.1.abs_diff(expected.1) > 1 {
            return Err(RenderError::SizeMismatch { page: page.index, expected, actual });
        }

        // Backends may round page dimensions differently; follow the bitmap.
        let px_per_pt = actual.0 as f32 / page.size.width_pt;
        composite_page(&mut image, &page.annotations, page.size, px_per_pt, self.painter.as_ref());
        debug!(page = page.index, annotations = page.annotations.len(), "page flattened");

        Ok(FlattenedPage { image, size: page.size })
    }

    /// Flatten every page and encode the result. Nothing is written unless
    /// every page renders.
    pub fn run(
        self,
        rasterizer: &dyn PdfRasterizer,
        writer: &dyn PdfWriter,
    ) -> Result<Vec<u8>, RenderError> {
        let flattened = self
            .pages
            .iter()
            .map(|page| self.render_page(page, rasterizer))
            .collect::<Result<Vec<_>, _>>()?;

        let bytes = writer.write_document(&flattened).map_err(RenderError::Write)?;
        info!(pages = flattened.len(), bytes = bytes.len(), "export written");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationKind, StampGlyph};
    use crate::geometry::PageRect;
    use crate::raster::BlockPainter;
    use pdf_engine::{PdfEngineError, RgbaImage};
    use std::sync::Mutex;

    struct Blank {
        sizes: Vec<PageSize>,
        fail_on: Option<u32>,
    }

    impl PdfRasterizer for Blank {
        fn page_count(&self) -> u32 {
            self.sizes.len() as u32
        }

        fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
            Ok(self.sizes[page_index as usize])
        }

        fn render_page(&self, page_index: u32, scale: f32) -> Result<RgbaImage, PdfEngineError> {
            if self.fail_on == Some(page_index) {
                return Err(PdfEngineError::Backend("boom".to_string()));
            }
            let (w, h) = self.sizes[page_index as usize].pixel_size(scale);
            Ok(RgbaImage::from_pixel(w, h, image::Rgba([255, 255, 255, 255])))
        }
    }

    #[derive(Default)]
    struct Recorder {
        pages: Mutex<Vec<(u32, u32)>>,
    }

    impl PdfWriter for Recorder {
        fn write_document(&self, pages: &[FlattenedPage]) -> Result<Vec<u8>, PdfEngineError> {
            let mut recorded =
                self.pages.lock().map_err(|_| PdfEngineError::Backend("poisoned".into()))?;
            recorded.extend(pages.iter().map(|page| page.image.dimensions()));
            Ok(b"%PDF".to_vec())
        }
    }

    fn document_with_stamp() -> Document {
        let mut document = Document::new(&[PageSize::new(100.0, 50.0); 2], 10.0);
        let rect = PageRect::new(0.1, 0.1, 0.2, 0.4);
        let stamp = Annotation::new(1, rect, AnnotationKind::Stamp(StampGlyph::Checkmark));
        document.add(stamp, 0).expect("add");
        document
    }

    #[test]
    fn run_renders_every_page_at_export_scale() {
        let document = document_with_stamp();
        let job = FlattenJob::snapshot(&document, 3.0, Arc::new(BlockPainter));
        let rasterizer = Blank { sizes: vec![PageSize::new(100.0, 50.0); 2], fail_on: None };
        let writer = Recorder::default();

        let bytes = job.run(&rasterizer, &writer).expect("export");

        assert_eq!(bytes, b"%PDF");
        assert_eq!(*writer.pages.lock().expect("lock"), vec![(300, 150), (300, 150)]);
    }

    #[test]
    fn annotations_land_on_their_page_only() {
        let document = document_with_stamp();
        let job = FlattenJob::snapshot(&document, 1.0, Arc::new(BlockPainter));
        let rasterizer = Blank { sizes: vec![PageSize::new(100.0, 50.0); 2], fail_on: None };

        let first = job.render_page(&job.pages()[0], &rasterizer).expect("page 0");
        let second = job.render_page(&job.pages()[1], &rasterizer).expect("page 1");

        assert!(first.image.pixels().all(|p| p.0 == [255, 255, 255, 255]));
        assert!(second.image.pixels().any(|p| p.0 != [255, 255, 255, 255]));
    }

    #[test]
    fn page_failure_aborts_before_writing() {
        let document = document_with_stamp();
        let job = FlattenJob::snapshot(&document, 1.0, Arc::new(BlockPainter));
        let rasterizer = Blank { sizes: vec![PageSize::new(100.0, 50.0); 2], fail_on: Some(1) };
        let writer = Recorder::default();

        let err = job.run(&rasterizer, &writer).expect_err("page 1 fails");

        assert!(matches!(err, RenderError::Page { page: 1, .. }));
        assert!(writer.pages.lock().expect("lock").is_empty());
    }

    #[test]
    fn snapshot_is_independent_of_later_edits() {
        let mut document = document_with_stamp();
        let job = FlattenJob::snapshot(&document, 2.0, Arc::new(BlockPainter));

        let id = document.annotations(1)[0].id();
        document.remove(id).expect("remove");

        assert_eq!(job.annotation_count(), 1);
        assert_eq!(document.annotation_count(), 0);
    }

    #[test]
    fn lock_is_released_when_the_job_is_done() {
        let lock = Arc::new(());
        let job = FlattenJob::snapshot(&document_with_stamp(), 1.0, Arc::new(BlockPainter))
            .holding(Arc::clone(&lock));
        let copy = job.clone();
        assert_eq!(Arc::strong_count(&lock), 3);

        drop(copy);
        let rasterizer = Blank { sizes: vec![PageSize::new(100.0, 50.0); 2], fail_on: Some(0) };
        job.run(&rasterizer, &Recorder::default()).expect_err("page 0 fails");
        assert_eq!(Arc::strong_count(&lock), 1);
    }

    #[test]
    fn job_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FlattenJob>();
    }
}
