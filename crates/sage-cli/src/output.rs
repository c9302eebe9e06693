//! Terminal output for the sage CLI.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use sage_core::{IngestOutcome, KnowledgeStats, ResearchAnswer};
use serde::Serialize;
use std::fmt::Display;
use std::time::Duration;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Human,
    /// JSON output for scripting
    Json,
}

/// Print a success message
pub fn success(msg: impl Display) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message
pub fn error(msg: impl Display) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: impl Display) {
    println!("{} {}", style("⚠").yellow().bold(), msg);
}

/// Print an info message
pub fn info(msg: impl Display) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Print a section header
pub fn header(msg: impl Display) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Print a key-value pair
pub fn kv(key: impl Display, value: impl Display) {
    println!("  {}: {}", style(key).cyan(), value);
}

/// Create a spinner for long-running operations
pub fn spinner(msg: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Print any serializable value as pretty JSON
pub fn json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Shorten `text` to at most `max` characters on one line.
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// Create a formatted table
pub struct TableBuilder {
    table: Table,
}

impl TableBuilder {
    pub fn new() -> Self {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        Self { table }
    }

    pub fn header<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String> + Display,
    {
        let row: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).fg(Color::Cyan))
            .collect();
        self.table.set_header(row);
        self
    }

    pub fn row<I, S>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String> + Display,
    {
        let row: Vec<Cell> = cells.into_iter().map(Cell::new).collect();
        self.table.add_row(row);
        self
    }

    pub fn print(self) {
        println!("{}", self.table);
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Print the outcome of one research query.
pub fn print_answer(result: &ResearchAnswer, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return json(result);
    }

    for report in &result.ingestion {
        match &report.outcome {
            IngestOutcome::Added { index } => {
                success(format!("Added info from {} (#{})", report.source, index))
            }
            IngestOutcome::Empty => info(format!("{}: no result", report.source)),
            IngestOutcome::Failed { reason } => {
                warning(format!("{} error: {}", report.source, reason))
            }
        }
    }

    if !result.context.is_empty() {
        header("Retrieved research");
        let mut table = TableBuilder::new().header(["#", "Distance", "Snippet"]);
        for snippet in &result.context {
            table = table.row([
                snippet.index.to_string(),
                format!("{:.4}", snippet.distance),
                preview(&snippet.content, 100),
            ]);
        }
        table.print();
    }

    header("Final Answer");
    println!("{}", result.answer);
    Ok(())
}

/// Print knowledge base statistics.
pub fn print_stats(stats: &KnowledgeStats, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return json(stats);
    }

    header("Knowledge base");
    kv("Snippets", stats.snippets);
    kv("Vectors", stats.vectors);
    kv("Dimension", stats.dimension);
    if let Some(path) = &stats.vector_path {
        kv("Vector file", path.display());
    }
    if let Some(path) = &stats.document_path {
        kv("Document file", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview("short\n\ntext", 20), "short text");
        assert_eq!(preview("abcdefghij", 5), "abcd…");
        assert_eq!(preview("", 5), "");
    }
}
