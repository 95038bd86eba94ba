//! Hand-drawn signature pad

use crate::annotation::Color;
use crate::error::InputError;
use crate::raster::draw_polyline;
use pdf_engine::RgbaImage;

/// Freehand strokes captured in pad pixels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignaturePad {
    strokes: Vec<Vec<(f32, f32)>>,
    drawing: bool,
}

impl SignaturePad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_stroke(&mut self, x: f32, y: f32) {
        self.strokes.push(vec![(x, y)]);
        self.drawing = true;
    }

    /// Extend the current stroke. Ignored unless a stroke is in progress.
    pub fn extend_stroke(&mut self, x: f32, y: f32) {
        if !self.drawing {
            return;
        }
        if let Some(stroke) = self.strokes.last_mut() {
            if stroke.last() != Some(&(x, y)) {
                stroke.push((x, y));
            }
        }
    }

    pub fn end_stroke(&mut self) {
        self.drawing = false;
    }

    /// Add a complete stroke at once.
    pub fn push_stroke(&mut self, points: Vec<(f32, f32)>) {
        if !points.is_empty() {
            self.strokes.push(points);
        }
        self.drawing = false;
    }

    pub fn strokes(&self) -> &[Vec<(f32, f32)>] {
        &self.strokes
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
        self.drawing = false;
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.iter().all(Vec::is_empty)
    }

    /// Draw the strokes onto a transparent bitmap trimmed to the ink.
    pub fn rasterize(&self, stroke_px: f32, ink: Color) -> Result<RgbaImage, InputError> {
        let points = || self.strokes.iter().flatten();
        let Some(first) = points().next() else {
            return Err(InputError::EmptySignature);
        };

        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.0, first.1, first.0, first.1);
        for (x, y) in points() {
            min_x = min_x.min(*x);
            min_y = min_y.min(*y);
            max_x = max_x.max(*x);
            max_y = max_y.max(*y);
        }

        let pad = (stroke_px / 2.0).ceil() + 1.0;
        let width = (max_x - min_x + pad * 2.0).ceil().max(1.0) as u32;
        let height = (max_y - min_y + pad * 2.0).ceil().max(1.0) as u32;
        let mut bitmap = RgbaImage::new(width, height);

        for stroke in &self.strokes {
            let shifted: Vec<_> =
                stroke.iter().map(|(x, y)| (x - min_x + pad, y - min_y + pad)).collect();
            draw_polyline(&mut bitmap, &shifted, stroke_px, ink.to_rgba());
        }

        Ok(bitmap)
    }
}
