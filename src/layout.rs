//! Ticket Layout
//!
//! All visual constants for composing a ticket live here so the compositor
//! never hard-codes placement decisions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LayoutError {
    #[error("QR scale must be in (0, 1], got {0}")]
    Scale(f64),

    #[error("{field} must be between 0 and 1, got {value}")]
    Fraction { field: &'static str, value: f64 },

    #[error("Font sizes must satisfy 0 < min ({min}) <= floor ({floor})")]
    FontSizes { min: u32, floor: u32 },
}

/// Where the code is centred, as fractions of the template plus pixel nudges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub x_pct: f64,
    pub y_pct: f64,
    #[serde(default)]
    pub offset_x_px: i64,
    #[serde(default)]
    pub offset_y_px: i64,
}

impl Default for Anchor {
    fn default() -> Self {
        Self {
            x_pct: 0.5,
            y_pct: 0.73,
            offset_x_px: 0,
            offset_y_px: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelStyle {
    /// Vertical position of the label's top edge, fraction of template height.
    pub y_pct: f64,
    pub offset_px: i64,
    /// Widest the label may be, fraction of template width.
    pub max_width_ratio: f64,
    /// Design size at an 800px-wide template; scaled with the template.
    pub size_dp: u32,
    /// Lower bound for the scaled starting size.
    pub min_start_px: u32,
    /// Shrinking stops at this size even if the text still overflows.
    pub floor_px: u32,
    pub shrink_step_px: u32,
    /// Fonts tried in order; the first one that loads is used.
    pub font_paths: Vec<PathBuf>,
}

impl Default for LabelStyle {
    fn default() -> Self {
        Self {
            y_pct: 0.43,
            offset_px: 0,
            max_width_ratio: 0.85,
            size_dp: 60,
            min_start_px: 12,
            floor_px: 10,
            shrink_step_px: 2,
            font_paths: default_font_paths(),
        }
    }
}

pub fn default_font_paths() -> Vec<PathBuf> {
    [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
        "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
        "/Library/Fonts/Arial.ttf",
        "C:/Windows/Fonts/arial.ttf",
        "C:/Windows/Fonts/Calibri.ttf",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketLayout {
    /// Code side as a fraction of template width.
    pub qr_scale: f64,
    /// `None` selects bottom-right margin placement.
    pub anchor: Option<Anchor>,
    /// Used only for margin placement.
    pub margin_px: i64,
    pub label: LabelStyle,
}

impl Default for TicketLayout {
    fn default() -> Self {
        Self {
            qr_scale: 0.30,
            anchor: Some(Anchor::default()),
            margin_px: 24,
            label: LabelStyle::default(),
        }
    }
}

impl TicketLayout {
    /// Build a layout from operator overrides, rejecting values that would
    /// place the code or label off the template.
    pub fn from_user(
        qr_scale: f64,
        anchor: Option<Anchor>,
        label: LabelStyle,
    ) -> Result<Self, LayoutError> {
        let layout = Self {
            qr_scale,
            anchor,
            label,
            ..Self::default()
        };
        layout.check()?;
        Ok(layout)
    }

    pub fn check(&self) -> Result<(), LayoutError> {
        if !(self.qr_scale > 0.0 && self.qr_scale <= 1.0) {
            return Err(LayoutError::Scale(self.qr_scale));
        }
        if let Some(anchor) = &self.anchor {
            fraction("anchor.x_pct", anchor.x_pct)?;
            fraction("anchor.y_pct", anchor.y_pct)?;
        }
        fraction("label.y_pct", self.label.y_pct)?;
        fraction("label.max_width_ratio", self.label.max_width_ratio)?;
        if self.label.floor_px == 0 || self.label.floor_px > self.label.min_start_px {
            return Err(LayoutError::FontSizes {
                min: self.label.min_start_px,
                floor: self.label.floor_px,
            });
        }
        Ok(())
    }
}

fn fraction(field: &'static str, value: f64) -> Result<(), LayoutError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(LayoutError::Fraction { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TicketLayout::default().check().is_ok());
    }

    #[test]
    fn test_from_user_rejects_bad_scale() {
        let err = TicketLayout::from_user(1.5, None, LabelStyle::default()).unwrap_err();
        assert_eq!(err, LayoutError::Scale(1.5));
        assert!(TicketLayout::from_user(0.0, None, LabelStyle::default()).is_err());
    }

    #[test]
    fn test_from_user_rejects_offscreen_anchor() {
        let anchor = Anchor {
            x_pct: 1.2,
            ..Anchor::default()
        };
        let err = TicketLayout::from_user(0.3, Some(anchor), LabelStyle::default()).unwrap_err();
        assert!(matches!(err, LayoutError::Fraction { field: "anchor.x_pct", .. }));
    }

    #[test]
    fn test_from_user_accepts_margin_placement() {
        let layout = TicketLayout::from_user(0.25, None, LabelStyle::default()).unwrap();
        assert!(layout.anchor.is_none());
        assert_eq!(layout.margin_px, 24);
    }
}
