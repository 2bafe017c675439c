use ab_glyph::{FontArc, PxScale};
use image::Rgb;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::analytics::LatestDetections;
use crate::config::AnnotateConfig;
use crate::frame::{Frame, MotionRegion};
use crate::storage::DetectionEvent;
use crate::Assets;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;
const DEFAULT_FONT: &str = "fonts/DejaVuSansMono.ttf";

pub fn caption(event: &DetectionEvent) -> String {
    format!(
        "{}: {} ({:.2})",
        event.category.to_uppercase(),
        event.label,
        event.confidence
    )
}

/// Draws motion boxes and one caption line per category.
pub struct Annotator {
    font: Option<FontArc>,
    margin: i32,
    line_height: i32,
    scale: PxScale,
}

impl Annotator {
    pub fn new(font: Option<FontArc>, margin: i32, line_height: i32, font_scale: f32) -> Self {
        Self {
            font,
            margin,
            line_height,
            scale: PxScale::from(font_scale),
        }
    }

    /// Uses `font_path` when it loads, the embedded default font otherwise.
    pub fn from_config(config: &AnnotateConfig) -> Self {
        let configured = config.font_path.as_ref().and_then(|path| {
            match std::fs::read(path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()))
            {
                Ok(font) => Some(font),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load font, using default"
                    );
                    None
                }
            }
        });

        let font = configured.or_else(default_font);
        if font.is_none() {
            tracing::warn!("no usable font, captions disabled");
        }
        Self::new(font, config.margin, config.line_height, config.font_scale)
    }

    /// Top-left origin of the caption for the category at `index`.
    pub fn caption_origin(&self, index: usize) -> (i32, i32) {
        (self.margin, self.margin + self.line_height * index as i32)
    }

    /// Captions in registration order, each with its drawing origin.
    pub fn layout(&self, latest: &LatestDetections) -> Vec<((i32, i32), String)> {
        latest
            .iter()
            .map(|(index, event)| (self.caption_origin(index), caption(event)))
            .collect()
    }

    pub fn annotate(
        &self,
        mut frame: Frame,
        regions: &[MotionRegion],
        latest: &LatestDetections,
    ) -> Frame {
        for region in regions {
            draw_box(&mut frame, region);
        }

        if let Some(font) = &self.font {
            for ((x, y), text) in self.layout(latest) {
                draw_text_mut(&mut frame.image, TEXT_COLOR, x, y, self.scale, font, &text);
            }
        }

        frame
    }
}

fn default_font() -> Option<FontArc> {
    let file = Assets::get(DEFAULT_FONT)?;
    match FontArc::try_from_vec(file.data.into_owned()) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, "embedded font is invalid");
            None
        }
    }
}

fn draw_box(frame: &mut Frame, region: &MotionRegion) {
    for inset in 0..BOX_THICKNESS {
        let w = region.width.saturating_sub(2 * inset);
        let h = region.height.saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((region.x + inset) as i32, (region.y + inset) as i32).of_size(w, h);
        draw_hollow_rect_mut(&mut frame.image, rect, BOX_COLOR);
    }
}
