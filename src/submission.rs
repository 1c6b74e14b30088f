//! Submissions and the tabular sources they come from
//!
//! Sources are read-only. A row is an ordered list of header/value pairs,
//! exactly as the sheet export presents it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::identity::{derive, Identifier, IdentityError};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Could not read sheet export {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Sheet export is not valid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Sheet fetch failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Column headers that carry the identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnNames {
    pub timestamp: String,
    pub email: String,
    pub name: String,
    /// Optional team column; printed on the ticket instead of the name.
    pub team: Option<String>,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            timestamp: "Timestamp".to_string(),
            email: "Email address".to_string(),
            name: "Name".to_string(),
            team: Some("Team Name".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionRow {
    pub cells: Vec<(String, String)>,
}

impl SubmissionRow {
    pub fn new(cells: Vec<(String, String)>) -> Self {
        Self { cells }
    }

    /// First cell under `header`.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    pub fn to_submission(&self, columns: &ColumnNames) -> Submission {
        let cell = |h: &str| self.get(h).unwrap_or_default().to_string();
        Submission {
            timestamp: cell(&columns.timestamp),
            email: cell(&columns.email),
            display_name: cell(&columns.name).trim().to_string(),
            team_name: columns
                .team
                .as_deref()
                .and_then(|h| self.get(h))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            fields: self.cells.clone(),
        }
    }
}

/// One form submission. Never written back to the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub timestamp: String,
    pub email: String,
    pub display_name: String,
    pub team_name: Option<String>,
    pub fields: Vec<(String, String)>,
}

impl Submission {
    pub fn identifier(&self) -> Result<Identifier, IdentityError> {
        derive(&self.timestamp, &self.email)
    }

    pub fn field(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty value among `aliases`, tried in order.
    pub fn first_field(&self, aliases: &[String]) -> Option<&str> {
        aliases
            .iter()
            .filter_map(|alias| self.field(alias))
            .map(str::trim)
            .find(|v| !v.is_empty())
    }
}

/// Read-only tabular collaborator.
pub trait SubmissionSource {
    /// All data rows, in sheet order, header row excluded.
    fn rows(&self) -> Result<Vec<SubmissionRow>, SourceError>;
}

fn rows_from_reader<R: std::io::Read>(reader: R) -> Result<Vec<SubmissionRow>, csv::Error> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = csv.headers()?.clone();

    let mut rows = vec![];
    for record in csv.records() {
        let record = record?;
        let cells = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.to_string(), record.get(i).unwrap_or_default().to_string()))
            .collect();
        rows.push(SubmissionRow::new(cells));
    }
    Ok(rows)
}

/// A CSV export of the response sheet on disk.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SubmissionSource for CsvFileSource {
    fn rows(&self) -> Result<Vec<SubmissionRow>, SourceError> {
        let file = std::fs::File::open(&self.path).map_err(|e| SourceError::File {
            path: self.path.clone(),
            source: csv::Error::from(e),
        })?;
        let rows = rows_from_reader(file).map_err(|source| SourceError::File {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), rows = rows.len(), "read sheet export");
        Ok(rows)
    }
}

/// A sheet published as CSV, fetched over HTTP on every read.
#[derive(Debug, Clone)]
pub struct CsvUrlSource {
    url: String,
    client: reqwest::blocking::Client,
}

impl CsvUrlSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl SubmissionSource for CsvUrlSource {
    fn rows(&self) -> Result<Vec<SubmissionRow>, SourceError> {
        let body = self
            .client
            .get(&self.url)
            .send()?
            .error_for_status()?
            .bytes()?;
        let rows = rows_from_reader(body.as_ref())?;
        debug!(url = %self.url, rows = rows.len(), "fetched published sheet");
        Ok(rows)
    }
}

/// Fixed rows, for tests and for piping rows from another process.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    pub rows: Vec<SubmissionRow>,
}

impl SubmissionSource for StaticSource {
    fn rows(&self) -> Result<Vec<SubmissionRow>, SourceError> {
        Ok(self.rows.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "\
Timestamp,Email address,Name,Team Name,Payment screenshot
9/14/2025 10:00:00,a@b.com,  Ada Lovelace ,Engines,https://example.org/a.png
9/14/2025 10:05:00,c@d.com,Grace,,
";

    #[test]
    fn test_csv_file_rows_keep_header_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.csv");
        std::fs::write(&path, SHEET).unwrap();

        let rows = CsvFileSource::new(&path).rows().unwrap();
        assert_eq!(rows.len(), 2);
        let headers: Vec<_> = rows[0].cells.iter().map(|(h, _)| h.as_str()).collect();
        assert_eq!(headers, ["Timestamp", "Email address", "Name", "Team Name", "Payment screenshot"]);
        assert_eq!(rows[1].get("Team Name"), Some(""));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = CsvFileSource::new("/definitely/not/here.csv").rows().unwrap_err();
        assert!(matches!(err, SourceError::File { .. }));
    }

    #[test]
    fn test_to_submission_uses_configured_columns() {
        let rows = rows_from_reader(SHEET.as_bytes()).unwrap();
        let sub = rows[0].to_submission(&ColumnNames::default());
        assert_eq!(sub.display_name, "Ada Lovelace");
        assert_eq!(sub.email, "a@b.com");
        assert_eq!(sub.team_name.as_deref(), Some("Engines"));
        assert_eq!(rows[1].to_submission(&ColumnNames::default()).team_name, None);
        assert_eq!(
            sub.identifier().unwrap(),
            derive("9/14/2025 10:00:00", "a@b.com").unwrap()
        );
    }

    #[test]
    fn test_first_field_follows_alias_order() {
        let rows = rows_from_reader(SHEET.as_bytes()).unwrap();
        let sub = rows[0].to_submission(&ColumnNames::default());
        let aliases = vec!["Screenshot URL".to_string(), "Payment screenshot".to_string()];
        assert_eq!(sub.first_field(&aliases), Some("https://example.org/a.png"));

        let empty = rows[1].to_submission(&ColumnNames::default());
        assert_eq!(empty.first_field(&aliases), None);
    }
}
