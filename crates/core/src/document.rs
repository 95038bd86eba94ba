//! Document, pages and per-page annotation stacks
//!
//! The mutating operations are crate-private: only command application in
//! [`crate::history`] calls them, which keeps the history authoritative.

use crate::annotation::{Annotation, AnnotationId};
use crate::error::StateError;
use crate::geometry::{
    rotate_about, PageLayout, PagePlacement, PagePoint, PageSize, ScreenPoint, ScreenRect, Viewport,
};
use pdf_engine::RgbaImage;
use std::sync::Arc;

/// Page raster produced at a given scale. Replaced wholesale on rescale.
#[derive(Debug, Clone)]
pub struct PageBitmap {
    /// Device pixels per point
    pub scale: f32,
    pub image: Arc<RgbaImage>,
}

#[derive(Debug, Clone)]
pub struct Page {
    index: u32,
    size: PageSize,
    bitmap: Option<PageBitmap>,
    /// Bottom to top; the position in this list is the z-index
    annotations: Vec<Annotation>,
}

impl Page {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn size(&self) -> PageSize {
        self.size
    }

    pub fn bitmap(&self) -> Option<&PageBitmap> {
        self.bitmap.as_ref()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

/// Which part of an annotation a point landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitPart {
    Body,
    ResizeHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub id: AnnotationId,
    pub part: HitPart,
}

/// Screen-space sizes used by hit testing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitSlop {
    pub handle_size_px: f32,
    pub tolerance_px: f32,
}

/// The single selected annotation, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection(Option<AnnotationId>);

impl Selection {
    pub fn id(&self) -> Option<AnnotationId> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Select `id` if it exists in `document`, otherwise clear.
    pub fn select(&mut self, document: &Document, id: AnnotationId) -> bool {
        self.0 = document.contains(id).then_some(id);
        self.0.is_some()
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }

    /// Drop the selection if its annotation no longer exists.
    pub fn prune(&mut self, document: &Document) {
        if self.0.is_some_and(|id| !document.contains(id)) {
            self.0 = None;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pages: Vec<Page>,
    layout: PageLayout,
}

impl Document {
    pub fn new(page_sizes: &[PageSize], page_gap_pt: f32) -> Self {
        let pages = page_sizes
            .iter()
            .enumerate()
            .map(|(index, size)| Page {
                index: index as u32,
                size: *size,
                bitmap: None,
                annotations: Vec::new(),
            })
            .collect();

        Self { pages, layout: PageLayout::new(page_sizes, page_gap_pt) }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, page_index: u32) -> Option<&Page> {
        self.pages.get(page_index as usize)
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn placement(&self, page_index: u32) -> Option<PagePlacement> {
        self.layout.placement(page_index)
    }

    /// Page under a screen point, if any.
    pub fn page_at(&self, point: ScreenPoint, viewport: &Viewport) -> Option<u32> {
        let (canvas_x, canvas_y) = viewport.screen_to_canvas(point);
        self.layout.page_at(canvas_x, canvas_y)
    }

    pub fn annotations(&self, page_index: u32) -> &[Annotation] {
        self.page(page_index).map(|page| page.annotations.as_slice()).unwrap_or_default()
    }

    pub fn annotation_count(&self) -> usize {
        self.pages.iter().map(|page| page.annotations.len()).sum()
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.pages.iter().flat_map(|page| page.annotations.iter()).find(|a| a.id() == id)
    }

    pub fn contains(&self, id: AnnotationId) -> bool {
        self.get(id).is_some()
    }

    /// Position of the annotation in its page's stack (0 = bottom).
    pub fn z_index(&self, id: AnnotationId) -> Option<usize> {
        self.pages.iter().find_map(|page| page.annotations.iter().position(|a| a.id() == id))
    }

    pub fn set_page_bitmap(
        &mut self,
        page_index: u32,
        bitmap: PageBitmap,
    ) -> Result<(), StateError> {
        let page =
            self.pages.get_mut(page_index as usize).ok_or(StateError::UnknownPage(page_index))?;
        page.bitmap = Some(bitmap);
        Ok(())
    }

    pub(crate) fn add(&mut self, annotation: Annotation, z: usize) -> Result<(), StateError> {
        if self.contains(annotation.id()) {
            return Err(StateError::DuplicateAnnotation(annotation.id()));
        }

        let page_index = annotation.page_index();
        let page =
            self.pages.get_mut(page_index as usize).ok_or(StateError::UnknownPage(page_index))?;
        let z = z.min(page.annotations.len());
        page.annotations.insert(z, annotation);
        Ok(())
    }

    pub(crate) fn update<R>(
        &mut self,
        id: AnnotationId,
        f: impl FnOnce(&mut Annotation) -> R,
    ) -> Result<R, StateError> {
        let annotation = self
            .pages
            .iter_mut()
            .flat_map(|page| page.annotations.iter_mut())
            .find(|a| a.id() == id)
            .ok_or(StateError::UnknownAnnotation(id))?;
        Ok(f(annotation))
    }

    /// Remove an annotation, returning it with the z-index it occupied.
    pub(crate) fn remove(&mut self, id: AnnotationId) -> Result<(Annotation, usize), StateError> {
        for page in &mut self.pages {
            if let Some(z) = page.annotations.iter().position(|a| a.id() == id) {
                return Ok((page.annotations.remove(z), z));
            }
        }

        Err(StateError::UnknownAnnotation(id))
    }

    /// Move an annotation to `z` within its page, returning its previous z-index.
    pub(crate) fn reorder(&mut self, id: AnnotationId, z: usize) -> Result<usize, StateError> {
        for page in &mut self.pages {
            if let Some(old) = page.annotations.iter().position(|a| a.id() == id) {
                let annotation = page.annotations.remove(old);
                let z = z.min(page.annotations.len());
                page.annotations.insert(z, annotation);
                return Ok(old);
            }
        }

        Err(StateError::UnknownAnnotation(id))
    }

    /// Screen square of an annotation's bottom-right resize handle.
    pub fn handle_rect(
        &self,
        annotation: &Annotation,
        viewport: &Viewport,
        handle_size_px: f32,
    ) -> Option<ScreenRect> {
        let placement = self.placement(annotation.page_index())?;
        let corner = rotated_corner(annotation, placement.size);
        Some(ScreenRect::square(viewport.to_screen(corner, placement), handle_size_px))
    }

    /// Topmost annotation under a screen point.
    ///
    /// Resize handles are checked before bodies on every page, so a handle wins
    /// over any body it overlaps, even one stacked above it.
    pub fn hit_test(&self, point: ScreenPoint, viewport: &Viewport, slop: HitSlop) -> Option<Hit> {
        let topmost_first = || self.pages.iter().flat_map(|page| page.annotations.iter().rev());

        let handle_hit = topmost_first().find(|annotation| {
            self.handle_rect(annotation, viewport, slop.handle_size_px)
                .is_some_and(|rect| rect.contains(point))
        });
        if let Some(annotation) = handle_hit {
            return Some(Hit { id: annotation.id(), part: HitPart::ResizeHandle });
        }

        topmost_first()
            .find(|annotation| self.body_contains(annotation, point, viewport, slop.tolerance_px))
            .map(|annotation| Hit { id: annotation.id(), part: HitPart::Body })
    }

    fn body_contains(
        &self,
        annotation: &Annotation,
        point: ScreenPoint,
        viewport: &Viewport,
        tolerance_px: f32,
    ) -> bool {
        let Some(placement) = self.placement(annotation.page_index()) else {
            return false;
        };

        let size = placement.size;
        let rect = annotation.rect();
        let local = viewport.to_page(point, placement).to_points(size);
        let center = rect.center().to_points(size);
        let (x, y) = rotate_about(local, center, -annotation.rotation());

        let slop = viewport.screen_len_to_points(tolerance_px);
        let (left, top) = rect.origin().to_points(size);
        let (right, bottom) = rect.bottom_right().to_points(size);

        x >= left - slop && x <= right + slop && y >= top - slop && y <= bottom + slop
    }
}

/// Bottom-right corner after rotating the rectangle about its centre.
fn rotated_corner(annotation: &Annotation, size: PageSize) -> PagePoint {
    let rect = annotation.rect();
    let corner = rect.bottom_right().to_points(size);
    let center = rect.center().to_points(size);
    let (x, y) = rotate_about(corner, center, annotation.rotation());
    PagePoint::from_points(x, y, size)
}
