//! Remote proof images
//!
//! Registrants may upload a proof image (payment screenshot, student ID)
//! whose URL lands in the sheet. Fetching it is best effort: any failure
//! degrades to [`ProofImage::Unavailable`] and never blocks issuance.

use image::DynamicImage;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::submission::Submission;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RemoteFetchError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Not an image (content-type {0})")]
    NotAnImage(String),

    #[error("Image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),

    #[error("HTTP client unavailable")]
    ClientUnavailable,
}

impl RemoteFetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_timeout())
    }
}

#[derive(Debug)]
pub enum ProofImage {
    Available { url: String, image: DynamicImage },
    Missing,
    Unavailable { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProofStatus {
    Available { url: String, width: u32, height: u32 },
    Missing,
    Unavailable { url: String, reason: String },
}

impl ProofImage {
    pub fn status(&self) -> ProofStatus {
        match self {
            Self::Available { url, image } => ProofStatus::Available {
                url: url.clone(),
                width: image.width(),
                height: image.height(),
            },
            Self::Missing => ProofStatus::Missing,
            Self::Unavailable { url, reason } => ProofStatus::Unavailable {
                url: url.clone(),
                reason: reason.clone(),
            },
        }
    }
}

/// Header names accepted for the proof URL, tried in order.
pub fn default_proof_aliases() -> Vec<String> {
    [
        "Screenshot URL",
        "Payment Screenshot",
        "Upload payment screenshot",
        "Proof of payment",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone)]
pub struct ProofFetcher {
    client: Option<reqwest::blocking::Client>,
    aliases: Vec<String>,
}

impl ProofFetcher {
    pub fn new(aliases: Vec<String>, timeout: Duration) -> Self {
        let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "proof fetching disabled, HTTP client unavailable");
                None
            }
        };
        Self { client, aliases }
    }

    pub fn proof_url<'a>(&self, submission: &'a Submission) -> Option<&'a str> {
        submission
            .first_field(&self.aliases)
            .filter(|v| v.starts_with("http://") || v.starts_with("https://"))
    }

    pub fn fetch(&self, url: &str) -> Result<DynamicImage, RemoteFetchError> {
        let Some(client) = &self.client else {
            return Err(RemoteFetchError::ClientUnavailable);
        };
        let response = client.get(url).send()?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("image/") {
            return Err(RemoteFetchError::NotAnImage(content_type));
        }
        let bytes = response.bytes()?;
        debug!(url, bytes = bytes.len(), "fetched proof image");
        Ok(image::load_from_memory(&bytes)?)
    }

    /// Never fails: errors become `Unavailable`.
    pub fn proof_for(&self, submission: &Submission) -> ProofImage {
        let Some(url) = self.proof_url(submission) else {
            return ProofImage::Missing;
        };
        match self.fetch(url) {
            Ok(image) => ProofImage::Available {
                url: url.to_string(),
                image,
            },
            Err(e) => {
                warn!(url, error = %e, timeout = e.is_timeout(), "proof image unavailable");
                ProofImage::Unavailable {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }
}
