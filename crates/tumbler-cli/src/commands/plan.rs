//! Offline planning
//!
//! ```bash
//! tumblerctl plan bars.toml
//! tumblerctl plan bars.toml --query bar --format json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use tumbler_orchestrator::PlannedEntity;
use tumbler_sql::{plan, synthesize_plan, DerivedEntity};

use crate::format::Formatter;
use crate::query_file::QueryFile;

#[derive(Args)]
pub struct PlanArgs {
    /// Query declaration files (TOML, or JSON by extension)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Only plan the query with this name
    #[arg(short, long)]
    pub query: Option<String>,
}

#[derive(Serialize, Tabled)]
pub struct EntityRow {
    #[tabled(rename = "Entity")]
    pub entity: String,
    #[tabled(rename = "Role")]
    pub role: String,
    #[tabled(rename = "Shape")]
    pub shape: String,
    #[tabled(rename = "Window")]
    pub window: String,
    #[tabled(rename = "Grace (s)")]
    pub grace: String,
    #[tabled(rename = "Depends On")]
    pub depends_on: String,
}

impl From<&DerivedEntity> for EntityRow {
    fn from(entity: &DerivedEntity) -> Self {
        Self {
            entity: entity.id.clone(),
            role: entity.role.to_string(),
            shape: entity.shape.keyword().to_string(),
            window: entity
                .timeframe
                .map(|tf| tf.to_string())
                .unwrap_or_else(|| "-".to_string()),
            grace: entity
                .grace_seconds
                .map(|g| g.to_string())
                .unwrap_or_else(|| "-".to_string()),
            depends_on: entity.depends_on.join(", "),
        }
    }
}

#[derive(Serialize)]
struct QueryPlan {
    query: String,
    entities: Vec<PlannedEntity>,
}

pub fn handle_plan(args: PlanArgs, formatter: &Formatter) -> Result<()> {
    let file = QueryFile::load_all(&args.files)?;
    let resolver = file.resolver();

    let mut plans = Vec::new();
    for query in file.select(args.query.as_deref())? {
        let entities =
            plan(query, &resolver).with_context(|| format!("Failed to plan '{}'", query.name))?;
        let ddls = synthesize_plan(&entities, query, &resolver)
            .with_context(|| format!("Failed to synthesize '{}'", query.name))?;

        if formatter.is_json() {
            plans.push(QueryPlan {
                query: query.name.clone(),
                entities: entities
                    .into_iter()
                    .zip(ddls)
                    .map(|(entity, ddl)| PlannedEntity { entity, ddl })
                    .collect(),
            });
            continue;
        }

        formatter.print_list(entities.iter().map(EntityRow::from).collect())?;
        println!();
        for ddl in &ddls {
            let statements: Vec<String> = ddl.statements.iter().map(|s| s.sql.clone()).collect();
            formatter.print_statements(&format!("{} ({})", ddl.entity, ddl.role), &statements);
        }
    }

    if formatter.is_json() {
        formatter.print_json(&plans)?;
    }
    Ok(())
}
