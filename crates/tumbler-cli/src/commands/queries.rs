//! Persistent query listing

use anyhow::{Context, Result};
use serde::Serialize;
use tabled::Tabled;
use tumbler_ksql::show_queries::parse;
use tumbler_ksql::{KsqlRestClient, QueryRow, StatementExecutor};

use crate::config::Config;
use crate::format::Formatter;

#[derive(Serialize, Tabled)]
pub struct QueryListRow {
    #[tabled(rename = "Query ID")]
    pub id: String,
    #[tabled(rename = "Sink Topics")]
    pub topics: String,
    #[tabled(rename = "Status")]
    pub status: String,
}

impl From<&QueryRow> for QueryListRow {
    fn from(row: &QueryRow) -> Self {
        Self {
            id: row.id.clone(),
            topics: row.topics.join(", "),
            status: row.status.clone(),
        }
    }
}

pub async fn handle_queries(config: &Config, formatter: &Formatter) -> Result<()> {
    let client = KsqlRestClient::new(config.ksql_url.clone())?;
    let listing = client
        .show_queries()
        .await
        .with_context(|| format!("Failed to list queries on {}", config.ksql_url))?;
    let rows = parse(&listing);

    if formatter.is_json() {
        formatter.print_json(&rows)?;
    } else {
        formatter.print_list(rows.iter().map(QueryListRow::from).collect())?;
    }
    Ok(())
}
