//! Configuration
//!
//! Command-line flags with environment fallbacks (`.env` is loaded by the
//! binary). Each component receives only its own slice of the config.

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::layout::{default_font_paths, LabelStyle, LayoutError, TicketLayout};
use crate::mailer::SmtpSettings;
use crate::persist::RetryPolicy;
use crate::pipeline::PipelinePaths;
use crate::remote::{default_proof_aliases, ProofFetcher};
use crate::submission::{ColumnNames, CsvFileSource, CsvUrlSource, SourceError, SubmissionSource};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No submission source configured; set SHEET_CSV or SHEET_URL")]
    NoSource,

    #[error("Mail credentials missing; set MAIL_USER and MAIL_PASS")]
    MissingMailCredentials,

    #[error("Invalid ticket layout: {0}")]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, Args)]
pub struct AppConfig {
    /// Directory holding the ticket background image
    #[arg(long, env = "TEMPLATE_DIR", default_value = "ticket_image")]
    pub template_dir: PathBuf,

    /// Directory composed tickets are written to
    #[arg(long, env = "TICKET_DIR", default_value = "ticket_output")]
    pub ticket_dir: PathBuf,

    /// Issuance ledger file
    #[arg(long, env = "LEDGER_PATH", default_value = "responses/ledger.json")]
    pub ledger_path: PathBuf,

    /// CSV export of the response sheet
    #[arg(long, env = "SHEET_CSV")]
    pub sheet_csv: Option<PathBuf>,

    /// Published CSV URL of the response sheet (used when SHEET_CSV is unset)
    #[arg(long, env = "SHEET_URL")]
    pub sheet_url: Option<String>,

    #[arg(long, env = "TIMESTAMP_COLUMN", default_value = "Timestamp")]
    pub timestamp_column: String,

    #[arg(long, env = "EMAIL_COLUMN", default_value = "Email address")]
    pub email_column: String,

    #[arg(long, env = "NAME_COLUMN", default_value = "Name")]
    pub name_column: String,

    /// Column printed on the ticket instead of the name, when present
    #[arg(long, env = "TEAM_COLUMN", default_value = "Team Name")]
    pub team_column: String,

    /// Proof-image URL columns, tried in order (comma separated)
    #[arg(long, env = "PROOF_FIELDS", value_delimiter = ',')]
    pub proof_fields: Vec<String>,

    /// Timeout for remote fetches, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 30)]
    pub fetch_timeout_secs: u64,

    #[arg(long, env = "SMTP_HOST", default_value = "smtp.gmail.com")]
    pub smtp_host: String,

    #[arg(long, env = "SMTP_PORT", default_value_t = 587)]
    pub smtp_port: u16,

    #[arg(long, env = "MAIL_USER")]
    pub mail_user: Option<String>,

    #[arg(long, env = "MAIL_PASS", hide_env_values = true)]
    pub mail_pass: Option<String>,

    #[arg(long, env = "MAIL_FROM")]
    pub mail_from: Option<String>,

    /// Label fonts, tried in order (comma separated)
    #[arg(long, env = "FONT_PATHS", value_delimiter = ',')]
    pub font_paths: Vec<PathBuf>,

    /// Code side as a fraction of template width
    #[arg(long, env = "QR_SCALE", default_value_t = 0.30)]
    pub qr_scale: f64,

    /// Attempts for each atomic file replace
    #[arg(long, env = "WRITE_ATTEMPTS", default_value_t = 5)]
    pub write_attempts: u32,

    #[arg(long, env = "WRITE_BACKOFF_MS", default_value_t = 400)]
    pub write_backoff_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl AppConfig {
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.write_attempts.max(1),
            backoff: Duration::from_millis(self.write_backoff_ms),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn columns(&self) -> ColumnNames {
        ColumnNames {
            timestamp: self.timestamp_column.clone(),
            email: self.email_column.clone(),
            name: self.name_column.clone(),
            team: Some(self.team_column.clone()).filter(|c| !c.trim().is_empty()),
        }
    }

    pub fn layout(&self) -> Result<TicketLayout, ConfigError> {
        let font_paths = if self.font_paths.is_empty() {
            default_font_paths()
        } else {
            self.font_paths.clone()
        };
        let defaults = TicketLayout::default();
        let label = LabelStyle {
            font_paths,
            ..defaults.label
        };
        Ok(TicketLayout::from_user(self.qr_scale, defaults.anchor, label)?)
    }

    pub fn pipeline_paths(&self) -> PipelinePaths {
        PipelinePaths {
            template_dir: self.template_dir.clone(),
            ticket_dir: self.ticket_dir.clone(),
        }
    }

    pub fn smtp(&self) -> Result<SmtpSettings, ConfigError> {
        match (&self.mail_user, &self.mail_pass) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Ok(SmtpSettings {
                host: self.smtp_host.clone(),
                port: self.smtp_port,
                username: user.clone(),
                password: pass.clone(),
                from: self.mail_from.clone(),
            }),
            _ => Err(ConfigError::MissingMailCredentials),
        }
    }

    /// A local export wins over the published URL.
    pub fn source(&self) -> Result<Box<dyn SubmissionSource>, ConfigError> {
        if let Some(path) = &self.sheet_csv {
            return Ok(Box::new(CsvFileSource::new(path.clone())));
        }
        if let Some(url) = &self.sheet_url {
            return Ok(Box::new(CsvUrlSource::new(url.clone(), self.fetch_timeout())?));
        }
        Err(ConfigError::NoSource)
    }

    pub fn proof_fetcher(&self) -> ProofFetcher {
        let aliases = if self.proof_fields.is_empty() {
            default_proof_aliases()
        } else {
            self.proof_fields.clone()
        };
        ProofFetcher::new(aliases, self.fetch_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(flatten)]
        config: AppConfig,
    }

    fn parse(args: &[&str]) -> AppConfig {
        let mut argv = vec!["ticketforge"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).unwrap().config
    }

    #[test]
    fn test_explicit_flags() {
        let config = parse(&[
            "--template-dir",
            "bg",
            "--ledger-path",
            "state/ledger.json",
            "--proof-fields",
            "Receipt,Screenshot URL",
            "--write-attempts",
            "0",
        ]);
        assert_eq!(config.template_dir, PathBuf::from("bg"));
        assert_eq!(config.ledger_path, PathBuf::from("state/ledger.json"));
        assert_eq!(config.proof_fields, ["Receipt", "Screenshot URL"]);
        assert_eq!(config.retry().attempts, 1);
    }

    #[test]
    fn test_bad_scale_rejected() {
        let config = parse(&["--qr-scale", "2.0"]);
        assert!(matches!(config.layout(), Err(ConfigError::Layout(_))));
    }

    #[test]
    fn test_csv_source_preferred() {
        let config = parse(&["--sheet-csv", "responses.csv", "--sheet-url", "https://example.org/x.csv"]);
        assert!(config.source().is_ok());
    }

    #[test]
    fn test_blank_team_column_disables_team() {
        let config = parse(&["--team-column", ""]);
        assert_eq!(config.columns().team, None);
    }
}
