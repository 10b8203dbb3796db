//! Terminal output for tumblerctl
//!
//! Lists render as rounded tables unless `--format json` is given, in which
//! case every command prints exactly one JSON document on stdout.

use anyhow::Result;
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use crate::config::OutputFormat;

pub struct Formatter {
    format: OutputFormat,
    colored: bool,
}

impl Formatter {
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self { format, colored }
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// One row per item, or a JSON array
    pub fn print_list<T: Serialize + Tabled>(&self, items: Vec<T>) -> Result<()> {
        match self.format {
            OutputFormat::Table => {
                println!("{}", render_table(items));
                Ok(())
            }
            OutputFormat::Json => self.print_json(&items),
        }
    }

    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Section header followed by a block of statements
    pub fn print_statements(&self, title: &str, statements: &[String]) {
        if self.colored {
            println!("{}", format!("-- {}", title).bold());
        } else {
            println!("-- {}", title);
        }
        for statement in statements {
            println!("{}", statement);
        }
        println!();
    }

    pub fn print_success(&self, message: &str) {
        if self.colored {
            println!("{} {}", "✅".green(), message);
        } else {
            println!("✅ {}", message);
        }
    }

    pub fn print_error(&self, message: &str) {
        if self.colored {
            eprintln!("{} {}", "❌".red(), message.red());
        } else {
            eprintln!("❌ {}", message);
        }
    }
}

/// Rounded table with a centered header, or a placeholder when empty
pub fn render_table<T: Tabled>(items: Vec<T>) -> String {
    if items.is_empty() {
        return "No items found".to_string();
    }
    let mut table = Table::new(items);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    table.to_string()
}
