//! `SHOW QUERIES` table parsing
//!
//! The engine exposes running persistent queries only as a text table:
//!
//! ```text
//! +----------+-------------+--------------------------------+---------+
//! | Query ID | Topics      | Statement                      | Status  |
//! +----------+-------------+--------------------------------+---------+
//! | CTAS_1   | BAR_1M_LIVE | CREATE TABLE BAR_1M_LIVE ...   | RUNNING |
//! +----------+-------------+--------------------------------+---------+
//! ```
//!
//! Borders may be ASCII or box-drawing characters. Identifiers are compared
//! after trimming, stripping quotes and upper-casing.

use serde::{Deserialize, Serialize};
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// One persistent query from the listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRow {
    pub id: String,
    /// Normalized sink topic names.
    pub topics: Vec<String>,
    pub statement: String,
    pub status: String,
}

impl QueryRow {
    pub fn is_running(&self) -> bool {
        self.status.trim().to_uppercase().starts_with("RUNNING")
    }

    pub fn writes_topic(&self, topic: &str) -> bool {
        let target = normalize_identifier(topic);
        self.topics.iter().any(|t| *t == target)
    }
}

const CELL_SEPARATORS: &[char] = &['|', '│', '┃'];

/// Trim, strip quotes and upper-case an identifier.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '`' || c == '\'')
        .trim()
        .to_uppercase()
}

fn normalize_statement(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn is_border_cell(cell: &str) -> bool {
    cell.chars()
        .all(|c| matches!(c, '-' | '=' | '+' | ':' | ' ') || ('\u{2500}'..='\u{257F}').contains(&c))
}

/// Parse the listing into rows, skipping borders, headers and any line that
/// is not a table row.
pub fn parse(text: &str) -> Vec<QueryRow> {
    let mut rows = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if !line.contains(CELL_SEPARATORS) {
            continue;
        }
        let inner = line
            .trim_start_matches(CELL_SEPARATORS)
            .trim_end_matches(CELL_SEPARATORS);
        let cells: Vec<&str> = inner.split(CELL_SEPARATORS).map(str::trim).collect();
        if cells.len() < 4 || cells.iter().all(|c| is_border_cell(c)) {
            continue;
        }
        if cells[0].eq_ignore_ascii_case("query id") || cells[0].eq_ignore_ascii_case("id") {
            continue;
        }

        let last = cells.len() - 1;
        rows.push(QueryRow {
            id: cells[0].to_string(),
            topics: cells[1]
                .split(',')
                .map(normalize_identifier)
                .filter(|t| !t.is_empty())
                .collect(),
            // statement text may itself contain separators
            statement: cells[2..last].join("|"),
            status: cells[last].to_string(),
        });
    }
    rows
}

/// Locate the query writing `topic`.
///
/// A row whose statement equals `statement` wins, then an exact match on a
/// normalized topic name, then a row whose topic contains the target or whose
/// statement contains `statement`. Among several candidates at the same level
/// the newest query is taken, so a stale query for the same sink never
/// shadows a fresh one. `None` when nothing matches.
pub fn find_query_id(rows: &[QueryRow], topic: &str, statement: Option<&str>) -> Option<String> {
    let target = normalize_identifier(topic);
    let wanted = statement.map(normalize_statement).filter(|s| !s.is_empty());

    if let Some(wanted) = wanted.as_deref() {
        if let Some(row) = newest(rows, |r| normalize_statement(&r.statement) == wanted) {
            return Some(row.id.clone());
        }
    }
    if let Some(row) = newest(rows, |r| r.topics.iter().any(|t| *t == target)) {
        return Some(row.id.clone());
    }

    newest(rows, |r| {
        let topic_hit = !target.is_empty() && r.topics.iter().any(|t| t.contains(&target));
        let statement_hit = wanted
            .as_deref()
            .map(|w| normalize_statement(&r.statement).contains(w))
            .unwrap_or(false);
        topic_hit || statement_hit
    })
    .map(|r| r.id.clone())
}

/// Highest query sequence among matching rows; later rows break ties.
fn newest(rows: &[QueryRow], matches: impl Fn(&QueryRow) -> bool) -> Option<&QueryRow> {
    rows.iter()
        .enumerate()
        .filter(|(_, r)| matches(*r))
        .max_by_key(|(pos, r)| (query_sequence(&r.id), *pos))
        .map(|(_, r)| r)
}

/// Trailing number of ids such as `CTAS_BAR_1M_LIVE_12`.
fn query_sequence(id: &str) -> Option<u64> {
    id.rsplit('_').next()?.parse().ok()
}

#[derive(Tabled)]
struct DisplayRow {
    #[tabled(rename = "Query ID")]
    id: String,
    #[tabled(rename = "Topics")]
    topics: String,
    #[tabled(rename = "Statement")]
    statement: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// Render rows in the listing format `parse` reads back.
pub fn render_table(rows: &[QueryRow]) -> String {
    let display: Vec<DisplayRow> = rows
        .iter()
        .map(|r| DisplayRow {
            id: r.id.clone(),
            topics: r.topics.join(","),
            statement: r.statement.split_whitespace().collect::<Vec<_>>().join(" "),
            status: r.status.clone(),
        })
        .collect();
    Table::new(display).with(Style::ascii()).to_string()
}
