// THEORY:
// The `canvas` module is the seam between "what to draw" and "what we draw on".
// The pipeline and the tracker only ever speak in boxes, labels and polylines;
// a `Canvas` implementation turns those into pixels for a concrete frame type.
// `image::RgbImage` is supported out of the box through `imageproc`; the OpenCV
// backend implements the same trait for `Mat`.
//
// Colours are always given as RGB triples here. Backends that store pixels in a
// different channel order (OpenCV uses BGR) convert at the boundary.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::core_modules::observation::BoundingBox;
use crate::error::CanvasError;

pub type RgbColor = [u8; 3];

/// Fixed palette used to colour boxes by class (or by track when no class is known).
pub const PALETTE: [RgbColor; 20] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x92, 0xCC, 0x17],
    [0x3D, 0xDB, 0x86],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
    [0x2C, 0x99, 0xA8],
    [0x00, 0xC2, 0xFF],
    [0x34, 0x45, 0x93],
    [0x64, 0x73, 0xFF],
    [0x00, 0x18, 0xEC],
    [0x84, 0x38, 0xFF],
    [0x52, 0x00, 0x85],
    [0xCB, 0x38, 0xFF],
    [0xFF, 0x95, 0xC8],
    [0xFF, 0x37, 0xC7],
];

pub fn palette_color(index: u64) -> RgbColor {
    PALETTE[(index % PALETTE.len() as u64) as usize]
}

/// Approximate glyph cell used to size label backgrounds.
const LABEL_CHAR_WIDTH: u32 = 7;
const LABEL_HEIGHT: u32 = 14;

/// A frame that overlays can be drawn on.
pub trait Canvas {
    /// Frame size in pixels as `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    fn draw_rect(
        &mut self,
        bbox: &BoundingBox,
        color: RgbColor,
        thickness: u32,
    ) -> Result<(), CanvasError>;

    /// Draws `text` just above `anchor`, the top-left corner of the labelled box.
    fn draw_label(
        &mut self,
        text: &str,
        anchor: (i32, i32),
        color: RgbColor,
    ) -> Result<(), CanvasError>;

    /// Draws an open polyline through `points` in order.
    fn draw_polyline(
        &mut self,
        points: &[(i32, i32)],
        color: RgbColor,
        thickness: u32,
    ) -> Result<(), CanvasError>;
}

/// Top edge of a label placed above `anchor`, pushed inside the frame when the
/// box touches the top border.
pub fn label_top(anchor: (i32, i32), label_height: i32) -> i32 {
    let top = anchor.1 - label_height;
    if top < 0 { anchor.1.max(0) } else { top }
}

impl Canvas for RgbImage {
    fn dimensions(&self) -> (u32, u32) {
        RgbImage::dimensions(self)
    }

    fn draw_rect(
        &mut self,
        bbox: &BoundingBox,
        color: RgbColor,
        thickness: u32,
    ) -> Result<(), CanvasError> {
        // Edges outside the frame stay outside, but within i32 range.
        let Some(visible) = bbox.clipped_to(self.dimensions(), thickness as f64 + 1.0) else {
            return Ok(());
        };
        let left = visible.left as i32;
        let top = visible.top as i32;
        let width = visible.width as i32;
        let height = visible.height as i32;
        // Inset one rectangle per unit of thickness.
        for inset in 0..thickness as i32 {
            let w = width - 2 * inset;
            let h = height - 2 * inset;
            if w < 1 || h < 1 {
                break;
            }
            let rect = Rect::at(left + inset, top + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(self, rect, Rgb(color));
        }
        Ok(())
    }

    /// `RgbImage` frames carry no font, so only the label background is drawn.
    fn draw_label(
        &mut self,
        text: &str,
        anchor: (i32, i32),
        color: RgbColor,
    ) -> Result<(), CanvasError> {
        if text.is_empty() {
            return Ok(());
        }
        let width = LABEL_CHAR_WIDTH * text.chars().count() as u32 + 4;
        let top = label_top(anchor, LABEL_HEIGHT as i32);
        let rect = Rect::at(anchor.0, top).of_size(width, LABEL_HEIGHT);
        draw_filled_rect_mut(self, rect, Rgb(color));
        Ok(())
    }

    fn draw_polyline(
        &mut self,
        points: &[(i32, i32)],
        color: RgbColor,
        thickness: u32,
    ) -> Result<(), CanvasError> {
        let thickness = thickness.max(1) as i32;
        let shift = (thickness - 1) / 2;
        let segments: Vec<((i32, i32), (i32, i32))> = match points {
            [] => return Ok(()),
            [only] => vec![(*only, *only)],
            _ => points.windows(2).map(|pair| (pair[0], pair[1])).collect(),
        };
        for (start, end) in segments {
            for dx in 0..thickness {
                for dy in 0..thickness {
                    let ox = (dx - shift) as f32;
                    let oy = (dy - shift) as f32;
                    draw_line_segment_mut(
                        self,
                        (start.0 as f32 + ox, start.1 as f32 + oy),
                        (end.0 as f32 + ox, end.1 as f32 + oy),
                        Rgb(color),
                    );
                }
            }
        }
        Ok(())
    }
}
