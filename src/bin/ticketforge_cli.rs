//! TicketForge CLI - Operator interface
//!
//! Commands: roster, issue, send, verify, proof, templates, reset
//! Outputs JSON to stdout, logs to stderr
//! Returns non-zero on failure or on a rejected credential

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use ticketforge_core::{
    config::AppConfig,
    ledger::IssuanceLedger,
    mailer::SmtpMailer,
    roster::{Roster, RosterEntry},
    templates::TemplateCatalog,
    validation::Screener,
    DispatchMode, Identifier, IssuancePipeline, TicketCompositor, Verifier,
};

type CliResult = Result<ExitCode, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "ticketforge-cli")]
#[command(version, about = "TicketForge CLI - Event ticket issuance and verification")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    config: AppConfig,
}

#[derive(Subcommand)]
enum Commands {
    /// List submissions joined with their issuance state
    Roster {
        /// Only registrants whose ticket has not been mailed
        #[arg(long)]
        pending: bool,
    },

    /// Compose a ticket for one registrant without mailing it
    Issue {
        /// Registrant identifier
        id: String,
    },

    /// Issue and mail tickets
    Send {
        /// Registrant identifier
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        /// Every registrant not yet mailed
        #[arg(long, conflicts_with = "id")]
        all: bool,

        /// Mail again even if already sent
        #[arg(long)]
        resend: bool,
    },

    /// Verify a scanned credential
    Verify {
        /// Scanned text
        #[arg(long, conflicts_with = "image", required_unless_present = "image")]
        payload: Option<String>,

        /// Image containing the code
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// Show the proof image status for a registrant
    Proof {
        /// Registrant identifier
        id: String,
    },

    /// List ticket templates and the one that would be used
    Templates,

    /// Forget every issuance and sent flag
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> ExitCode {
    _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            emit(&serde_json::json!({ "success": false, "error": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}

fn emit(value: &impl Serialize) {
    let text = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!(r#"{{"success": false, "error": "{}"}}"#, e));
    println!("{}", text);
}

fn open_pipeline(config: &AppConfig) -> Result<IssuancePipeline, Box<dyn std::error::Error>> {
    let compositor = TicketCompositor::new(config.layout()?, config.retry());
    let ledger = IssuanceLedger::open(config.ledger_path.clone(), config.retry())?;
    Ok(IssuancePipeline::new(config.pipeline_paths(), compositor, ledger))
}

fn load_roster(config: &AppConfig, ledger: &IssuanceLedger) -> Result<Roster, Box<dyn std::error::Error>> {
    let rows = config.source()?.rows()?;
    Ok(Roster::build(&rows, &config.columns(), &Screener::new(), ledger))
}

fn lookup<'r>(roster: &'r Roster, id: &str) -> Result<&'r RosterEntry, Box<dyn std::error::Error>> {
    roster
        .find(&Identifier::from_scanned(id.trim()))
        .ok_or_else(|| format!("No submission with id {}", id).into())
}

fn run(cli: Cli) -> CliResult {
    let config = cli.config;

    match cli.command {
        Commands::Roster { pending } => {
            let ledger = IssuanceLedger::open(config.ledger_path.clone(), config.retry())?;
            let roster = load_roster(&config, &ledger)?;
            if pending {
                let entries: Vec<_> = roster.pending().collect();
                emit(&entries);
            } else {
                emit(&roster);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Issue { id } => {
            let pipeline = open_pipeline(&config)?;
            let roster = load_roster(&config, pipeline.ledger())?;
            let entry = lookup(&roster, &id)?;
            let issued = pipeline.issue(&entry.submission)?;
            emit(&serde_json::json!({ "success": true, "issued": issued }));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Send { id, all, resend } => {
            let pipeline = open_pipeline(&config)?;
            let mailer = SmtpMailer::new(&config.smtp()?)?;
            let roster = load_roster(&config, pipeline.ledger())?;
            let mode = if resend { DispatchMode::Resend } else { DispatchMode::Once };

            let targets: Vec<&RosterEntry> = match id {
                Some(id) => vec![lookup(&roster, &id)?],
                None if all => roster.pending().collect(),
                None => vec![],
            };

            let mut outcomes = vec![];
            let mut failed = false;
            for entry in targets {
                match pipeline.dispatch(&entry.submission, &mailer, mode) {
                    Ok(outcome) => {
                        failed |= outcome.error.is_some();
                        outcomes.push(serde_json::to_value(&outcome)?);
                    }
                    Err(e) => {
                        failed = true;
                        outcomes.push(serde_json::json!({
                            "id": entry.id,
                            "sent": false,
                            "skipped": false,
                            "error": e.to_string(),
                        }));
                    }
                }
            }

            emit(&serde_json::json!({ "success": !failed, "outcomes": outcomes }));
            Ok(if failed { ExitCode::from(2) } else { ExitCode::SUCCESS })
        }

        Commands::Verify { payload, image: image_path } => {
            let ledger = IssuanceLedger::open(config.ledger_path.clone(), config.retry())?;
            let verifier = Verifier::new(&ledger);
            let result = match (payload, image_path) {
                (Some(text), _) => verifier.verify_text(&text),
                (None, Some(path)) => verifier.verify_image(&image::open(&path)?.to_luma8()),
                (None, None) => return Err("Provide --payload or --image".into()),
            };
            emit(&result);
            Ok(if result.valid { ExitCode::SUCCESS } else { ExitCode::from(2) })
        }

        Commands::Proof { id } => {
            let ledger = IssuanceLedger::open(config.ledger_path.clone(), config.retry())?;
            let roster = load_roster(&config, &ledger)?;
            let entry = lookup(&roster, &id)?;
            let status = config.proof_fetcher().proof_for(&entry.submission).status();
            emit(&serde_json::json!({ "id": entry.id, "proof": status }));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Templates => {
            let catalog = TemplateCatalog::scan(&config.template_dir)?;
            let selected = catalog.pick().ok().map(|p| p.to_path_buf());
            emit(&serde_json::json!({
                "dir": config.template_dir,
                "selected": selected,
                "templates": catalog.list(),
            }));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Reset { yes } => {
            if !yes {
                return Err("Refusing to reset without --yes".into());
            }
            let ledger = IssuanceLedger::open(config.ledger_path.clone(), config.retry())?;
            let cleared = ledger.len();
            ledger.reset()?;
            emit(&serde_json::json!({ "success": true, "cleared": cleared }));
            Ok(ExitCode::SUCCESS)
        }
    }
}
