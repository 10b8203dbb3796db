//! Query declaration files
//!
//! A file declares the source entities it reads and one or more rollup
//! queries, in TOML or JSON:
//!
//! ```toml
//! [[sources]]
//! name = "ticks"
//! topic = "fx.ticks"
//! shape = "stream"
//! fields = [
//!     { name = "Broker", type = "VARCHAR", is_key = true },
//!     { name = "Bid", type = "DOUBLE" },
//! ]
//!
//! [[queries]]
//! name = "bar"
//! windows = ["1m", "5m"]
//! # ...
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tumbler_sql::{EntityDescriptor, QueryModel};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFile {
    #[serde(default)]
    pub sources: Vec<EntityDescriptor>,
    #[serde(default)]
    pub queries: Vec<QueryModel>,
}

impl QueryFile {
    /// Parse by extension: `.json` as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let file: QueryFile = if is_json {
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid query file {}", path.display()))?
        } else {
            toml::from_str(&contents)
                .with_context(|| format!("Invalid query file {}", path.display()))?
        };
        if file.queries.is_empty() {
            anyhow::bail!("{} declares no queries", path.display());
        }
        Ok(file)
    }

    /// Merge several files; sources are shared by every query.
    pub fn load_all(paths: &[impl AsRef<Path>]) -> Result<Self> {
        let mut merged = QueryFile::default();
        for path in paths {
            let file = Self::load(path.as_ref())?;
            merged.sources.extend(file.sources);
            merged.queries.extend(file.queries);
        }
        Ok(merged)
    }

    /// Declared sources by name; later declarations win.
    pub fn resolver(&self) -> HashMap<String, EntityDescriptor> {
        self.sources
            .iter()
            .map(|d| (d.name.clone(), d.clone()))
            .collect()
    }

    /// Every query, or only the one named `name`.
    pub fn select(&self, name: Option<&str>) -> Result<Vec<&QueryModel>> {
        match name {
            None => Ok(self.queries.iter().collect()),
            Some(name) => {
                let query = self
                    .queries
                    .iter()
                    .find(|q| q.name == name)
                    .with_context(|| format!("No query named '{}'", name))?;
                Ok(vec![query])
            }
        }
    }
}
