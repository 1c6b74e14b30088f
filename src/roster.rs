//! Roster - the operator's view of the response sheet
//!
//! Joins sheet rows with the ledger through the derived identifier.
//! Repeated submissions (same timestamp and email) collapse onto the first.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::identity::Identifier;
use crate::ledger::{IssuanceLedger, IssuanceState};
use crate::submission::{ColumnNames, Submission, SubmissionRow};
use crate::validation::Screener;

#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub id: Identifier,
    pub name: String,
    pub email: String,
    pub timestamp: String,
    pub state: IssuanceState,
    /// Later rows that derived the same identifier.
    pub duplicates: usize,
    #[serde(skip)]
    pub submission: Submission,
}

impl RosterEntry {
    pub fn sent(&self) -> bool {
        self.state == IssuanceState::Sent
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    /// 1-based data row number in the sheet.
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Roster {
    pub entries: Vec<RosterEntry>,
    pub skipped: Vec<SkippedRow>,
}

impl Roster {
    pub fn build(
        rows: &[SubmissionRow],
        columns: &ColumnNames,
        screener: &Screener,
        ledger: &IssuanceLedger,
    ) -> Self {
        let mut roster = Roster::default();
        let mut index: HashMap<Identifier, usize> = HashMap::new();

        for (n, row) in rows.iter().enumerate() {
            let submission = row.to_submission(columns);
            let screening = screener.screen(&submission);
            if !screening.eligible {
                roster.skipped.push(SkippedRow {
                    row: n + 1,
                    reason: screening.summary(),
                });
                continue;
            }

            let id = match submission.identifier() {
                Ok(id) => id,
                Err(e) => {
                    roster.skipped.push(SkippedRow {
                        row: n + 1,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if let Some(&at) = index.get(&id) {
                warn!(id = %id, row = n + 1, "duplicate submission");
                if let Some(entry) = roster.entries.get_mut(at) {
                    entry.duplicates += 1;
                }
                continue;
            }

            index.insert(id.clone(), roster.entries.len());
            roster.entries.push(RosterEntry {
                state: ledger.state(&id),
                id,
                name: submission.display_name.clone(),
                email: submission.email.trim().to_string(),
                timestamp: submission.timestamp.clone(),
                duplicates: 0,
                submission,
            });
        }

        debug!(
            entries = roster.entries.len(),
            skipped = roster.skipped.len(),
            "roster built"
        );
        roster
    }

    pub fn find(&self, id: &Identifier) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.iter().filter(|e| !e.sent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::RetryPolicy;

    fn row(ts: &str, email: &str, name: &str) -> SubmissionRow {
        SubmissionRow::new(vec![
            ("Timestamp".into(), ts.into()),
            ("Email address".into(), email.into()),
            ("Name".into(), name.into()),
        ])
    }

    #[test]
    fn test_duplicates_collapse_and_blank_rows_skip() {
        let dir = tempfile::tempdir().unwrap();
        let ledger =
            IssuanceLedger::open(dir.path().join("ledger.json"), RetryPolicy::immediate(1)).unwrap();
        let rows = vec![
            row("9/14/2025 10:00:00", "a@b.com", "Ada"),
            row("9/14/2025 10:00:00", "a@b.com", "Ada again"),
            row("9/14/2025 10:01:00", "", "No Email"),
            row("9/14/2025 10:02:00", "g@h.com", "Grace"),
        ];

        let roster = Roster::build(&rows, &ColumnNames::default(), &Screener::new(), &ledger);
        assert_eq!(roster.entries.len(), 2);
        assert_eq!(roster.entries[0].name, "Ada");
        assert_eq!(roster.entries[0].duplicates, 1);
        assert_eq!(roster.skipped.len(), 1);
        assert_eq!(roster.skipped[0].row, 3);
    }

    #[test]
    fn test_state_comes_from_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger =
            IssuanceLedger::open(dir.path().join("ledger.json"), RetryPolicy::immediate(1)).unwrap();
        let rows = vec![
            row("9/14/2025 10:00:00", "a@b.com", "Ada"),
            row("9/14/2025 10:02:00", "g@h.com", "Grace"),
        ];
        let first = rows[0].to_submission(&ColumnNames::default()).identifier().unwrap();
        ledger.mark_sent(&first).unwrap();

        let roster = Roster::build(&rows, &ColumnNames::default(), &Screener::new(), &ledger);
        assert!(roster.find(&first).unwrap().sent());
        let pending: Vec<_> = roster.pending().map(|e| e.name.as_str()).collect();
        assert_eq!(pending, ["Grace"]);
    }
}
