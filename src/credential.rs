//! Credential Encoder - payload <-> QR raster
//!
//! Wire format: a JSON object with a required string `id` and optional
//! descriptive keys (`name`, `team_name`, `leader_name`, `members`, or any
//! other key). Issuance and verification must agree on this shape.

use image::{GrayImage, Luma};
use qrcode::{EcLevel, QrCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::hashing::canonical_json;
use crate::identity::Identifier;

/// Error-correction level used for every issued credential.
pub const CREDENTIAL_EC_LEVEL: EcLevel = EcLevel::M;

/// Smallest rendered side in pixels, before the compositor rescales it.
const MIN_RENDER_SIDE: u32 = 300;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payload does not fit in a QR code: {0}")]
    TooLarge(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("No scannable code found in image")]
    NoCode,

    #[error("Code could not be read: {0}")]
    Unreadable(String),

    #[error("Invalid QR code format: {0}")]
    Malformed(String),

    #[error("QR code missing required field: id")]
    MissingId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialPayload {
    pub id: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
    /// Any other descriptive keys, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CredentialPayload {
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            name: None,
            team_name: None,
            leader_name: None,
            members: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Best label for the ticket: team name, then person name.
    pub fn display_label(&self) -> &str {
        self.team_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("")
    }

    /// Serialized text carried inside the code.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        canonical_json(self)
    }
}

/// Render a payload as a QR raster.
pub fn encode(payload: &CredentialPayload) -> Result<GrayImage, EncodeError> {
    let text = payload.to_wire()?;
    let code = QrCode::with_error_correction_level(text.as_bytes(), CREDENTIAL_EC_LEVEL)
        .map_err(|e| EncodeError::TooLarge(e.to_string()))?;

    Ok(code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_RENDER_SIDE, MIN_RENDER_SIDE)
        .build())
}

/// Parse scanned text into a payload.
pub fn decode_text(text: &str) -> Result<CredentialPayload, DecodeError> {
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let Value::Object(map) = &value else {
        return Err(DecodeError::Malformed("expected a JSON object".into()));
    };

    match map.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => {}
        _ => return Err(DecodeError::MissingId),
    }

    serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Locate and read the first QR code in a greyscale image.
pub fn decode_image(image: &GrayImage) -> Result<CredentialPayload, DecodeError> {
    let text = scan_text(image)?;
    decode_text(&text)
}

/// Raw text of the first decodable QR grid in the image.
pub fn scan_text(image: &GrayImage) -> Result<String, DecodeError> {
    let (width, height) = image.dimensions();
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        width as usize,
        height as usize,
        |x, y| image.get_pixel(x as u32, y as u32)[0],
    );

    let grids = prepared.detect_grids();
    if grids.is_empty() {
        return Err(DecodeError::NoCode);
    }

    let mut last_error = None;
    for grid in grids {
        let mut bytes = Vec::new();
        match grid.decode_to(&mut bytes) {
            Ok(_) => {
                return String::from_utf8(bytes)
                    .map_err(|e| DecodeError::Unreadable(e.to_string()));
            }
            Err(e) => last_error = Some(format!("{:?}", e)),
        }
    }

    Err(DecodeError::Unreadable(
        last_error.unwrap_or_else(|| "no grid decoded".to_string()),
    ))
}
