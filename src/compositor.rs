//! Ticket Compositor
//!
//! Pastes a credential code onto a template, draws the display label and
//! saves the flattened PNG atomically.

use ab_glyph::{FontVec, PxScale};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat, Rgba, RgbaImage, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::hashing::ticket_digest;
use crate::layout::{LabelStyle, TicketLayout};
use crate::persist::{write_atomic_bytes, PersistError, RetryPolicy};
use crate::templates::{load_template, TemplateError};

const OUTLINE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const FILL: Rgba<u8> = Rgba([0, 0, 0, 255]);
const OUTLINE_OFFSETS: [(i32, i32); 4] = [(-1, -1), (1, -1), (-1, 1), (1, 1)];

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// A ticket written to disk.
#[derive(Debug, Clone, Serialize)]
pub struct ComposedTicket {
    pub path: PathBuf,
    pub sha256: String,
    pub width: u32,
    pub height: u32,
}

/// Side of the pasted code: `scale * width`, never larger than the template.
pub fn code_side(template_w: u32, template_h: u32, scale: f64) -> u32 {
    let wanted = (f64::from(template_w) * scale) as u32;
    wanted.clamp(1, template_w.min(template_h).max(1))
}

/// Top-left paste position for a code of `side` pixels, clamped so the code
/// stays inside the template.
pub fn place_code(template_w: u32, template_h: u32, side: u32, layout: &TicketLayout) -> (i64, i64) {
    let (tw, th, s) = (i64::from(template_w), i64::from(template_h), i64::from(side));

    let (x, y) = match &layout.anchor {
        Some(anchor) => {
            let x = (tw as f64 * anchor.x_pct) as i64 - s / 2 + anchor.offset_x_px;
            let y = (th as f64 * anchor.y_pct) as i64 - s / 2 + anchor.offset_y_px;
            debug!(x_pct = anchor.x_pct, y_pct = anchor.y_pct, x, y, "anchor placement");
            (x, y)
        }
        None => {
            let x = tw - s - layout.margin_px;
            let y = th - s - layout.margin_px;
            debug!(margin = layout.margin_px, x, y, "margin placement");
            (x, y)
        }
    };

    let clamped = (x.clamp(0, (tw - s).max(0)), y.clamp(0, (th - s).max(0)));
    debug!(x = clamped.0, y = clamped.1, "final paste position");
    clamped
}

/// Largest size from the scaled start that fits `max_width_ratio`, shrinking
/// by the configured step down to the floor. Returns (size, width, height).
pub fn fit_label(font: &FontVec, text: &str, template_w: u32, style: &LabelStyle) -> (u32, u32, u32) {
    let mut size = (template_w * style.size_dp / 800).max(style.min_start_px);
    let max_w = (f64::from(template_w) * style.max_width_ratio) as u32;
    let step = style.shrink_step_px.max(1);

    loop {
        let (w, h) = text_size(PxScale::from(size as f32), font, text);
        if w <= max_w || size <= style.floor_px {
            return (size, w, h);
        }
        size = size.saturating_sub(step).max(style.floor_px);
    }
}

/// Axis-aligned pixel box on the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub w: u32,
    pub h: u32,
}

impl PixelRect {
    pub fn intersects(&self, other: &PixelRect) -> bool {
        self.x < other.x + i64::from(other.w)
            && other.x < self.x + i64::from(self.w)
            && self.y < other.y + i64::from(other.h)
            && other.y < self.y + i64::from(self.h)
    }
}

/// Fitted size and box of `text` on a template of `template_w` x `template_h`.
pub fn label_rect(
    font: &FontVec,
    text: &str,
    template_w: u32,
    template_h: u32,
    style: &LabelStyle,
) -> (u32, PixelRect) {
    let (size, w, h) = fit_label(font, text, template_w, style);
    let x = (i64::from(template_w) - i64::from(w)) / 2;
    let y = (f64::from(template_h) * style.y_pct) as i64 + style.offset_px;
    (size, PixelRect { x, y, w, h })
}

fn load_font(paths: &[PathBuf]) -> Option<FontVec> {
    for path in paths {
        let Ok(bytes) = fs::read(path) else {
            continue;
        };
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                debug!(font = %path.display(), "loaded label font");
                return Some(font);
            }
            Err(e) => warn!(font = %path.display(), error = %e, "unusable font file"),
        }
    }
    None
}

pub struct TicketCompositor {
    layout: TicketLayout,
    retry: RetryPolicy,
    font: Option<FontVec>,
}

impl fmt::Debug for TicketCompositor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketCompositor")
            .field("layout", &self.layout)
            .field("retry", &self.retry)
            .field("font_loaded", &self.font.is_some())
            .finish()
    }
}

impl TicketCompositor {
    pub fn new(layout: TicketLayout, retry: RetryPolicy) -> Self {
        let font = load_font(&layout.label.font_paths);
        if font.is_none() {
            warn!("no label font could be loaded; tickets will be produced without a label");
        }
        Self { layout, retry, font }
    }

    pub fn layout(&self) -> &TicketLayout {
        &self.layout
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Where the code lands on a template of `template_w` x `template_h`.
    pub fn code_rect(&self, template_w: u32, template_h: u32) -> PixelRect {
        let side = code_side(template_w, template_h, self.layout.qr_scale);
        let (x, y) = place_code(template_w, template_h, side, &self.layout);
        PixelRect { x, y, w: side, h: side }
    }

    /// `None` when no font is loaded or the label is blank.
    pub fn label_overlaps_code(&self, template_w: u32, template_h: u32, label: &str) -> Option<bool> {
        let font = self.font.as_ref()?;
        let text = label.trim().to_uppercase();
        if text.is_empty() {
            return None;
        }
        let (_, rect) = label_rect(font, &text, template_w, template_h, &self.layout.label);
        Some(rect.intersects(&self.code_rect(template_w, template_h)))
    }

    /// Compose in memory. The result is opaque RGB.
    pub fn render(&self, template: &RgbaImage, code: &GrayImage, label: &str) -> RgbImage {
        let (tw, th) = template.dimensions();
        debug!(width = tw, height = th, "template size");

        let code_box = self.code_rect(tw, th);
        let code_rgba = DynamicImage::ImageLuma8(code.clone()).to_rgba8();
        let resized = imageops::resize(&code_rgba, code_box.w, code_box.h, FilterType::Lanczos3);

        let mut canvas = template.clone();
        imageops::overlay(&mut canvas, &resized, code_box.x, code_box.y);

        let text = label.trim().to_uppercase();
        match (&self.font, text.is_empty()) {
            (_, true) => {}
            (None, false) => warn!(label = %text, "label skipped, no font available"),
            (Some(font), false) => self.draw_label(&mut canvas, font, &text, &code_box),
        }

        DynamicImage::ImageRgba8(canvas).to_rgb8()
    }

    fn draw_label(&self, canvas: &mut RgbaImage, font: &FontVec, text: &str, code_box: &PixelRect) {
        let (tw, th) = canvas.dimensions();
        let (size, rect) = label_rect(font, text, tw, th, &self.layout.label);
        if rect.intersects(code_box) {
            warn!(
                label = %text,
                label_y = rect.y,
                code_y = code_box.y,
                "label overlaps the code; the ticket may not scan"
            );
        }

        let (x, y) = (rect.x as i32, rect.y as i32);
        let scale = PxScale::from(size as f32);
        debug!(label = %text, x, y, size, "drawing label");

        for (ox, oy) in OUTLINE_OFFSETS {
            draw_text_mut(canvas, OUTLINE, x + ox, y + oy, scale, font, text);
        }
        draw_text_mut(canvas, FILL, x, y, scale, font, text);
    }

    /// Compose the ticket and save it atomically at `out_path`.
    pub fn compose(
        &self,
        template_path: &Path,
        code: &GrayImage,
        label: &str,
        out_path: &Path,
    ) -> Result<ComposedTicket, ComposeError> {
        debug!(template = %template_path.display(), out = %out_path.display(), "composing ticket");
        let template = load_template(template_path)?;
        let ticket = self.render(&template, code, label);

        let mut png = Vec::new();
        ticket.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        write_atomic_bytes(out_path, &png, &self.retry)?;
        info!(path = %out_path.display(), "saved composed ticket");

        Ok(ComposedTicket {
            path: out_path.to_path_buf(),
            sha256: ticket_digest(&png),
            width: ticket.width(),
            height: ticket.height(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Anchor;
    use image::Luma;

    fn no_font_layout() -> TicketLayout {
        let mut layout = TicketLayout::default();
        layout.label.font_paths = vec![];
        layout
    }

    fn checker(side: u32) -> GrayImage {
        GrayImage::from_fn(side, side, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn test_anchor_centres_code() {
        let layout = TicketLayout::default();
        let side = code_side(800, 800, layout.qr_scale);
        assert_eq!(side, 240);
        let (x, y) = place_code(800, 800, side, &layout);
        assert_eq!(x, 400 - 120);
        // 800 * 0.73 = 584 -> 584 - 120
        assert_eq!(y, 464);
    }

    #[test]
    fn test_anchor_clamped_on_short_template() {
        let layout = TicketLayout::default();
        // 400 * 0.73 - 120 = 172 would run past the bottom edge; 400 - 240 = 160
        assert_eq!(place_code(800, 400, 240, &layout), (280, 160));
    }

    fn any_font() -> Option<FontVec> {
        load_font(&crate::layout::default_font_paths())
    }

    #[test]
    fn test_short_label_keeps_start_size() {
        let Some(font) = any_font() else { return };
        let style = LabelStyle::default();
        let (size, w, _) = fit_label(&font, "ADA", 800, &style);
        assert_eq!(size, 60);
        assert!(w <= 680);

        // Narrow templates start from the 12 px minimum
        let (size, _, _) = fit_label(&font, "A", 100, &style);
        assert_eq!(size, 12);
    }

    #[test]
    fn test_long_label_shrinks_in_steps_to_fit() {
        let Some(font) = any_font() else { return };
        let style = LabelStyle::default();
        let text = "THE ANALYTICAL ENGINE APPRECIATION SOCIETY";
        let (size, w, _) = fit_label(&font, text, 800, &style);

        assert!(size < 60 && size > style.floor_px);
        assert_eq!((60 - size) % style.shrink_step_px, 0);
        assert!(w <= 680);
        let (wider, _) = text_size(PxScale::from((size + 2) as f32), &font, text);
        assert!(wider > 680, "one step larger must not fit");
    }

    #[test]
    fn test_overflowing_label_stops_at_floor() {
        let Some(font) = any_font() else { return };
        let style = LabelStyle::default();
        let text = "VERY LONG TEAM NAME ".repeat(20);
        let (size, w, _) = fit_label(&font, &text, 400, &style);
        assert_eq!(size, style.floor_px);
        assert!(w > 340);
    }

    #[test]
    fn test_label_drawn_with_outline() {
        let Some(_) = any_font() else { return };
        let compositor = TicketCompositor::new(TicketLayout::default(), RetryPolicy::immediate(1));
        let template = RgbaImage::from_pixel(800, 1100, Rgba([120, 120, 120, 255]));
        let out = compositor.render(&template, &checker(40), "ada");

        // Row band where the label sits: both fill and outline colours appear.
        let (_, rect) = label_rect(
            compositor.font.as_ref().unwrap(),
            "ADA",
            800,
            1100,
            &compositor.layout.label,
        );
        let band: Vec<_> = (rect.y.max(0) as u32..(rect.y as u32 + rect.h + 4).min(1100))
            .flat_map(|y| (0..800).map(move |x| (x, y)))
            .map(|(x, y)| out.get_pixel(x, y).0)
            .collect();
        assert!(band.contains(&[0, 0, 0]));
        assert!(band.contains(&[255, 255, 255]));
    }

    #[test]
    fn test_label_overlap_detected() {
        let Some(_) = any_font() else { return };
        let compositor = TicketCompositor::new(TicketLayout::default(), RetryPolicy::immediate(1));
        assert_eq!(compositor.label_overlaps_code(800, 400, "Ada Lovelace"), Some(true));
        assert_eq!(compositor.label_overlaps_code(1000, 1400, "Ada Lovelace"), Some(false));
        assert_eq!(compositor.label_overlaps_code(1000, 1400, "  "), None);
    }

    #[test]
    fn test_rect_intersection() {
        let a = PixelRect { x: 0, y: 0, w: 10, h: 10 };
        assert!(a.intersects(&PixelRect { x: 9, y: 9, w: 5, h: 5 }));
        assert!(!a.intersects(&PixelRect { x: 10, y: 0, w: 5, h: 5 }));
        assert!(!a.intersects(&PixelRect { x: 0, y: -5, w: 10, h: 5 }));
    }

    #[test]
    fn test_offsets_applied_then_clamped() {
        let layout = TicketLayout {
            anchor: Some(Anchor {
                x_pct: 1.0,
                y_pct: 1.0,
                offset_x_px: 50,
                offset_y_px: 50,
            }),
            ..TicketLayout::default()
        };
        let (x, y) = place_code(800, 400, 240, &layout);
        assert_eq!((x, y), (560, 160));
    }

    #[test]
    fn test_margin_placement() {
        let layout = TicketLayout {
            anchor: None,
            ..TicketLayout::default()
        };
        assert_eq!(place_code(800, 400, 240, &layout), (536, 136));
    }

    #[test]
    fn test_code_larger_than_template_is_clamped() {
        let layout = TicketLayout {
            qr_scale: 1.0,
            ..no_font_layout()
        };
        let side = code_side(50, 30, layout.qr_scale);
        assert_eq!(side, 30);
        let (x, y) = place_code(50, 30, side, &layout);
        assert!(x >= 0 && x + i64::from(side) <= 50);
        assert!(y >= 0 && y + i64::from(side) <= 30);

        let compositor = TicketCompositor::new(layout, RetryPolicy::immediate(1));
        let template = RgbaImage::from_pixel(50, 30, Rgba([200, 10, 10, 255]));
        let out = compositor.render(&template, &checker(64), "tiny");
        assert_eq!(out.dimensions(), (50, 30));
    }

    #[test]
    fn test_render_is_opaque_and_keeps_size() {
        let compositor = TicketCompositor::new(no_font_layout(), RetryPolicy::immediate(1));
        let template = RgbaImage::from_pixel(200, 100, Rgba([10, 200, 10, 0]));
        let out = compositor.render(&template, &checker(40), "team");
        assert_eq!(out.dimensions(), (200, 100));
        // untouched corner keeps template colour with alpha dropped
        assert_eq!(out.get_pixel(0, 0).0, [10, 200, 10]);
    }

    #[test]
    fn test_compose_writes_png_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("bg.png");
        RgbaImage::from_pixel(300, 150, Rgba([255, 255, 255, 255]))
            .save(&template_path)
            .unwrap();

        let compositor = TicketCompositor::new(no_font_layout(), RetryPolicy::immediate(1));
        let out = dir.path().join("out/ticket_x.png");
        let ticket = compositor
            .compose(&template_path, &checker(40), "x", &out)
            .unwrap();

        let bytes = fs::read(&out).unwrap();
        assert_eq!(ticket.sha256, ticket_digest(&bytes));
        assert_eq!(image::image_dimensions(&out).unwrap(), (300, 150));
    }

    #[test]
    fn test_failed_replace_leaves_destination_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("bg.png");
        RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255]))
            .save(&template_path)
            .unwrap();

        // A non-empty directory sits where the ticket should go.
        let out = dir.path().join("ticket_blocked.png");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("keep.txt"), b"keep").unwrap();

        let compositor = TicketCompositor::new(no_font_layout(), RetryPolicy::immediate(2));
        let err = compositor
            .compose(&template_path, &checker(20), "x", &out)
            .unwrap_err();
        assert!(matches!(err, ComposeError::Persist(_)));
        assert_eq!(fs::read(out.join("keep.txt")).unwrap(), b"keep");
    }
}
