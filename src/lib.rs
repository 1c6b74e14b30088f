//! TicketForge Core - Event Ticket Issuance and Verification
//!
//! # Guarantees
//! 1. Identifiers are derived, never stored as input
//! 2. A credential carries its identifier and nothing secret
//! 3. Files are replaced atomically or not at all
//! 4. The ledger is written to disk before it changes in memory
//! 5. Sent is sticky until an explicit reset
//! 6. Verification never errors; it answers valid or not

pub mod hashing;
pub mod identity;
pub mod credential;
pub mod layout;
pub mod templates;
pub mod persist;
pub mod compositor;
pub mod ledger;
pub mod verify;
pub mod submission;
pub mod validation;
pub mod roster;
pub mod mailer;
pub mod remote;
pub mod pipeline;
pub mod config;

pub use identity::{derive, Identifier, IdentityError};
pub use credential::{decode_image, decode_text, encode, CredentialPayload, DecodeError, EncodeError};
pub use layout::TicketLayout;
pub use compositor::{ComposedTicket, TicketCompositor};
pub use ledger::{IssuanceLedger, IssuanceRecord, IssuanceState};
pub use verify::{Verification, Verifier};
pub use submission::{Submission, SubmissionSource};
pub use mailer::{Mailer, OutgoingMail, SmtpMailer};
pub use pipeline::{DispatchMode, DispatchOutcome, IssuancePipeline, IssuedTicket, PipelineError};
pub use config::AppConfig;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
