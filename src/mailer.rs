//! Mail dispatch
//!
//! The core decides what to send and when; transport, TLS and
//! authentication belong to the [`Mailer`] implementation.

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const TICKET_SUBJECT: &str = "Your QR Code Ticket 🎟️";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("Could not build message: {0}")]
    Build(String),

    #[error("Could not read attachment {}: {source}", path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SMTP delivery failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

/// The standard ticket message for a registrant.
pub fn ticket_mail(name: &str, email: &str, ticket: &Path) -> OutgoingMail {
    OutgoingMail {
        to: email.trim().to_string(),
        subject: TICKET_SUBJECT.to_string(),
        body: format!(
            "Hello {},\n\nHere is your unique QR code ticket.\n\nThanks!",
            name
        ),
        attachment: Some(ticket.to_path_buf()),
    }
}

/// Write-only mail collaborator.
pub trait Mailer {
    fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Defaults to `username` when unset.
    pub from: Option<String>,
}

pub struct SmtpMailer {
    from: Mailbox,
    transport: SmtpTransport,
}

impl std::fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailer").field("from", &self.from).finish_non_exhaustive()
    }
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

fn mime_for(path: &Path) -> &'static str {
    let png = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("png"));
    if png {
        "image/png"
    } else {
        "application/octet-stream"
    }
}

fn content_type_for(path: &Path) -> ContentType {
    ContentType::parse(mime_for(path)).unwrap_or(ContentType::TEXT_PLAIN)
}

impl SmtpMailer {
    /// STARTTLS relay with login credentials.
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let from = mailbox(settings.from.as_deref().unwrap_or(&settings.username))?;
        let transport = SmtpTransport::starttls_relay(&settings.host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .build();
        Ok(Self { from, transport })
    }
}

fn build_message(from: &Mailbox, mail: &OutgoingMail) -> Result<Message, MailError> {
    let builder = Message::builder()
        .from(from.clone())
        .to(mailbox(&mail.to)?)
        .subject(mail.subject.clone());
    let text = SinglePart::plain(mail.body.clone());

    // A missing attachment is not an error; the mail goes out without it.
    let attachment = match &mail.attachment {
        Some(path) if path.exists() => Some(path),
        Some(path) => {
            warn!(path = %path.display(), "attachment missing, sending without it");
            None
        }
        None => None,
    };

    let message = match attachment {
        Some(path) => {
            let bytes = fs::read(path).map_err(|source| MailError::Attachment {
                path: path.clone(),
                source,
            })?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "ticket.png".to_string());
            let part = Attachment::new(filename).body(bytes, content_type_for(path));
            builder.multipart(MultiPart::mixed().singlepart(text).singlepart(part))
        }
        None => builder.singlepart(text),
    };
    message.map_err(|e| MailError::Build(e.to_string()))
}

impl Mailer for SmtpMailer {
    fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let message = build_message(&self.from, mail)?;
        self.transport
            .send(&message)
            .map_err(|e| MailError::Transport(e.to_string()))?;
        info!(to = %mail.to, "mail sent");
        Ok(())
    }
}
