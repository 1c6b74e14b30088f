//! Issuance Pipeline - Single Entry Point
//!
//! `issue` always screens the submission first. Only template selection,
//! the ticket write and the ledger write can fail an issuance; a mail
//! failure is reported in the outcome and leaves the record issued.

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::compositor::{ComposeError, ComposedTicket, TicketCompositor};
use crate::credential::{encode, CredentialPayload, EncodeError};
use crate::identity::{Identifier, IdentityError};
use crate::ledger::{IssuanceDetails, IssuanceLedger, LedgerError};
use crate::mailer::{ticket_mail, Mailer};
use crate::submission::Submission;
use crate::templates::{pick_template, TemplateError};
use crate::validation::Screener;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Submission not eligible: {0}")]
    Ineligible(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Credential encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Skip registrants whose ticket was already mailed.
    #[default]
    Once,
    /// Regenerate and mail again even if already sent.
    Resend,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedTicket {
    pub id: Identifier,
    pub payload: CredentialPayload,
    pub ticket: ComposedTicket,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub id: Identifier,
    pub sent: bool,
    /// Already mailed earlier; nothing was done.
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Paths the pipeline writes to or reads templates from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePaths {
    pub template_dir: PathBuf,
    pub ticket_dir: PathBuf,
}

/// The issuance pipeline - single entry point for ticket operations
#[derive(Debug)]
pub struct IssuancePipeline {
    paths: PipelinePaths,
    compositor: TicketCompositor,
    ledger: IssuanceLedger,
    screener: Screener,
}

impl IssuancePipeline {
    pub fn new(paths: PipelinePaths, compositor: TicketCompositor, ledger: IssuanceLedger) -> Self {
        Self {
            paths,
            compositor,
            ledger,
            screener: Screener::new(),
        }
    }

    pub fn ledger(&self) -> &IssuanceLedger {
        &self.ledger
    }

    pub fn screener(&self) -> &Screener {
        &self.screener
    }

    pub fn ticket_path(&self, id: &Identifier) -> PathBuf {
        self.paths.ticket_dir.join(id.ticket_file_name())
    }

    pub fn template_dir(&self) -> &Path {
        &self.paths.template_dir
    }

    pub fn payload_for(&self, id: Identifier, submission: &Submission) -> CredentialPayload {
        let mut payload = CredentialPayload::new(id).with_name(submission.display_name.clone());
        payload.team_name = submission.team_name.clone();
        payload
    }

    /// Compose the ticket and record the issuance.
    ///
    /// MANDATORY: screening runs first. Re-issuing regenerates the image and
    /// refreshes the stored digest without touching the sent flag.
    pub fn issue(&self, submission: &Submission) -> Result<IssuedTicket, PipelineError> {
        let screening = self.screener.screen(submission);
        if !screening.eligible {
            return Err(PipelineError::Ineligible(screening.summary()));
        }

        let id = submission.identifier()?;
        let payload = self.payload_for(id.clone(), submission);
        let code = encode(&payload)?;

        let template = pick_template(&self.paths.template_dir)?;
        let out = self.ticket_path(&id);
        let ticket = self
            .compositor
            .compose(&template, &code, payload.display_label(), &out)?;

        self.ledger.record_issuance(
            &id,
            IssuanceDetails {
                display_name: payload.name.clone(),
                email: Some(submission.email.trim().to_string()),
                ticket_path: Some(ticket.path.clone()),
                ticket_sha256: Some(ticket.sha256.clone()),
            },
        )?;
        info!(id = %id, ticket = %ticket.path.display(), "ticket issued");

        Ok(IssuedTicket { id, payload, ticket })
    }

    /// Issue, then mail the ticket and mark it sent.
    pub fn dispatch(
        &self,
        submission: &Submission,
        mailer: &dyn Mailer,
        mode: DispatchMode,
    ) -> Result<DispatchOutcome, PipelineError> {
        let id = submission.identifier()?;
        if mode == DispatchMode::Once && self.ledger.is_sent(&id) {
            info!(id = %id, "already sent, skipping");
            return Ok(DispatchOutcome {
                id,
                sent: true,
                skipped: true,
                ticket: None,
                error: None,
            });
        }

        let issued = self.issue(submission)?;
        let mail = ticket_mail(
            &submission.display_name,
            &submission.email,
            &issued.ticket.path,
        );

        match mailer.send(&mail) {
            Ok(()) => {
                self.ledger.mark_sent(&issued.id)?;
                Ok(DispatchOutcome {
                    id: issued.id,
                    sent: true,
                    skipped: false,
                    ticket: Some(issued.ticket.path),
                    error: None,
                })
            }
            Err(e) => {
                warn!(id = %issued.id, error = %e, "ticket issued but not sent");
                Ok(DispatchOutcome {
                    id: issued.id,
                    sent: false,
                    skipped: false,
                    ticket: Some(issued.ticket.path),
                    error: Some(e.to_string()),
                })
            }
        }
    }
}
