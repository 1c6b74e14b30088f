//! Identity Deriver
//!
//! `normalize(timestamp) + "_" + hash8(timestamp + email)`. The identifier is
//! the only join key between sheet rows, ledger records and scanned
//! credentials, so every caller must go through [`derive`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::hashing::sha1_hash8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Missing identity field: {0}")]
    MissingIdentityField(&'static str),
}

/// Stable submission identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Wrap an identifier read back from a scanned credential.
    ///
    /// No re-derivation happens here; the value is only meaningful if it
    /// matches a record that was created through [`derive`].
    pub fn from_scanned(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the composed ticket for this identifier.
    pub fn ticket_file_name(&self) -> String {
        format!("ticket_{}.png", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip `/`, `:` and spaces. Nothing else is normalized.
pub fn normalize_timestamp(timestamp: &str) -> String {
    timestamp
        .chars()
        .filter(|c| !matches!(c, '/' | ':' | ' '))
        .collect()
}

/// Derive the identifier for a submission.
///
/// The digest covers the raw timestamp immediately followed by the raw
/// email, with no trimming or case folding.
pub fn derive(timestamp: &str, email: &str) -> Result<Identifier, IdentityError> {
    if timestamp.trim().is_empty() {
        return Err(IdentityError::MissingIdentityField("timestamp"));
    }
    if email.trim().is_empty() {
        return Err(IdentityError::MissingIdentityField("email"));
    }

    let mut material = String::with_capacity(timestamp.len() + email.len());
    material.push_str(timestamp);
    material.push_str(email);

    Ok(Identifier(format!(
        "{}_{}",
        normalize_timestamp(timestamp),
        sha1_hash8(material.as_bytes())
    )))
}
