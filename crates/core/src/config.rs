//! Engine tuning knobs
//!
//! Every field has a default so partial configuration files stay valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_zoom: f32,
    pub max_zoom: f32,

    /// Side of the square resize handle, in screen pixels
    pub handle_size_px: f32,

    /// Extra screen pixels around an annotation body that still count as a hit
    pub hit_tolerance_px: f32,

    /// Pointer travel, in screen pixels, below which a press counts as a tap
    pub tap_slop_px: f32,

    /// Relative change in pinch distance that turns a two-finger pan into a zoom
    pub pinch_threshold: f32,

    /// Smallest width or height an annotation can be resized to, in points
    pub min_annotation_size_pt: f32,

    /// Vertical gap between stacked pages, in points
    pub page_gap_pt: f32,

    /// Largest page-normalized (width, height) a new signature may occupy
    pub signature_footprint: (f32, f32),

    /// Largest page-normalized (width, height) a new photo may occupy
    pub image_footprint: (f32, f32),

    /// Side of a new checkmark stamp, in points
    pub stamp_size_pt: f32,

    /// Ink width on the signature pad, in pad pixels
    pub signature_stroke_px: f32,

    /// Pixels per point used when flattening pages for export
    pub export_scale: f32,

    /// Maximum number of undo steps kept
    pub max_history: usize,

    /// TrueType/OpenType font used to draw text when flattening
    pub font_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_zoom: 0.25,
            max_zoom: 5.0,
            handle_size_px: 14.0,
            hit_tolerance_px: 4.0,
            tap_slop_px: 6.0,
            pinch_threshold: 0.04,
            min_annotation_size_pt: 8.0,
            page_gap_pt: 16.0,
            signature_footprint: (0.35, 0.12),
            image_footprint: (0.5, 0.4),
            stamp_size_pt: 24.0,
            signature_stroke_px: 3.0,
            export_scale: 2.0,
            max_history: 200,
            font_path: None,
        }
    }
}
