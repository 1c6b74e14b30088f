//! Verification Lookup
//!
//! Door-side check of a scanned credential. Never returns an error: every
//! failure becomes a `valid: false` result with a message.
//!
//! An identifier is known iff the issuance ledger holds a record for it.

use image::GrayImage;
use serde::Serialize;
use tracing::{info, warn};

use crate::credential::{decode_image, decode_text, CredentialPayload, DecodeError};
use crate::ledger::IssuanceLedger;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<CredentialPayload>,
    /// `true` when the ledger says the ticket was mailed.
    pub sent: bool,
}

impl Verification {
    fn rejected(message: impl Into<String>, payload: Option<CredentialPayload>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            payload,
            sent: false,
        }
    }

    fn from_decode_error(err: &DecodeError) -> Self {
        Self::rejected(err.to_string(), None)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Verifier<'a> {
    ledger: &'a IssuanceLedger,
}

impl<'a> Verifier<'a> {
    pub fn new(ledger: &'a IssuanceLedger) -> Self {
        Self { ledger }
    }

    /// Verify scanned text (what a browser scanner posts).
    pub fn verify_text(&self, scanned: &str) -> Verification {
        info!(content = %scanned, "scanned credential");
        match decode_text(scanned) {
            Ok(payload) => self.check(payload),
            Err(e) => {
                warn!(error = %e, "credential rejected at decode");
                Verification::from_decode_error(&e)
            }
        }
    }

    /// Verify a camera frame or uploaded image.
    pub fn verify_image(&self, image: &GrayImage) -> Verification {
        match decode_image(image) {
            Ok(payload) => self.check(payload),
            Err(e) => {
                warn!(error = %e, "credential rejected at decode");
                Verification::from_decode_error(&e)
            }
        }
    }

    fn check(&self, payload: CredentialPayload) -> Verification {
        let Some(record) = self.ledger.get(&payload.id) else {
            warn!(id = %payload.id, "unknown credential");
            return Verification::rejected("QR code not found", Some(payload));
        };

        if let (Some(scanned), Some(known)) = (&payload.name, &record.display_name) {
            if scanned.trim() != known.trim() {
                warn!(id = %payload.id, "credential name mismatch");
                return Verification::rejected("QR code name does not match registration", Some(payload));
            }
        }

        let label = payload.display_label().to_string();
        info!(id = %payload.id, "credential verified");
        Verification {
            valid: true,
            message: if label.is_empty() {
                "QR Verified!".to_string()
            } else {
                format!("QR Verified! Name: {}", label)
            },
            payload: Some(payload),
            sent: record.sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::encode;
    use crate::identity::{derive, Identifier};
    use crate::ledger::IssuanceDetails;
    use crate::persist::RetryPolicy;

    fn ledger(dir: &std::path::Path) -> IssuanceLedger {
        IssuanceLedger::open(dir.join("ledger.json"), RetryPolicy::immediate(1)).unwrap()
    }

    #[test]
    fn test_unknown_id_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        let result = Verifier::new(&ledger).verify_text(r#"{"id": "unknown123"}"#);
        assert!(!result.valid);
        assert_eq!(result.message, "QR code not found");
    }

    #[test]
    fn test_issued_id_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        ledger.record_issued(&Identifier::from_scanned("unknown123")).unwrap();
        let result = Verifier::new(&ledger).verify_text(r#"{"id": "unknown123"}"#);
        assert!(result.valid);
        assert!(!result.sent);
        assert_eq!(result.payload.unwrap().id.as_str(), "unknown123");
    }

    #[test]
    fn test_garbage_and_missing_id_are_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        let verifier = Verifier::new(&ledger);
        let garbage = verifier.verify_text("not a ticket");
        assert!(!garbage.valid);
        assert!(garbage.message.starts_with("Invalid QR code format"));
        let no_id = verifier.verify_text(r#"{"name": "Ada"}"#);
        assert!(!no_id.valid);
        assert!(no_id.payload.is_none());
    }

    #[test]
    fn test_name_must_match_registration() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        let id = derive("9/14/2025 10:00:00", "a@b.com").unwrap();
        ledger
            .record_issuance(
                &id,
                IssuanceDetails {
                    display_name: Some("Ada".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        ledger.mark_sent(&id).unwrap();

        let verifier = Verifier::new(&ledger);
        let good = CredentialPayload::new(id.clone()).with_name("Ada");
        let ok = verifier.verify_text(&good.to_wire().unwrap());
        assert!(ok.valid);
        assert!(ok.sent);
        assert_eq!(ok.message, "QR Verified! Name: Ada");

        let forged = CredentialPayload::new(id).with_name("Mallory");
        assert!(!verifier.verify_text(&forged.to_wire().unwrap()).valid);
    }

    #[test]
    fn test_verify_from_image() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        let id = derive("9/14/2025 10:00:00", "a@b.com").unwrap();
        ledger.record_issued(&id).unwrap();
        let image = encode(&CredentialPayload::new(id).with_name("Ada")).unwrap();
        assert!(Verifier::new(&ledger).verify_image(&image).valid);

        let blank = GrayImage::new(32, 32);
        assert!(!Verifier::new(&ledger).verify_image(&blank).valid);
    }
}
