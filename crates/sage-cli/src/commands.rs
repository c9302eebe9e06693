//! CLI command implementations.

use crate::output::{self, OutputFormat};
use crate::web;
use anyhow::{Context, Result};
use sage_core::config::DEFAULT_CONFIG_FILE;
use sage_core::{KnowledgeBase, ResearchEngine, SageConfig, SageError};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Load the effective configuration.
pub async fn load_config(path: Option<&Path>) -> Result<(SageConfig, Option<PathBuf>)> {
    SageConfig::resolve(path)
        .await
        .context("Failed to load configuration")
}

/// Load models and open the knowledge base.
pub async fn build_engine(config: &SageConfig) -> Result<ResearchEngine> {
    let spinner = output::spinner("Loading embedding and language models...");
    let engine = ResearchEngine::from_config(config).await;
    spinner.finish_and_clear();

    let engine = engine.context("Failed to start the research engine")?;
    output::success(format!(
        "Research analyst ready ({} snippets in the knowledge base)",
        engine.stats().snippets
    ));
    Ok(engine)
}

// ============================================================================
// Ask / REPL
// ============================================================================

/// Run a single research query and print the answer.
pub async fn ask(config: &SageConfig, question: &str, format: OutputFormat) -> Result<()> {
    if question.trim().is_empty() {
        return Err(SageError::EmptyQuestion.into());
    }

    let mut engine = build_engine(config).await?;
    research_and_print(&mut engine, question, format).await
}

async fn research_and_print(
    engine: &mut ResearchEngine,
    question: &str,
    format: OutputFormat,
) -> Result<()> {
    let spinner = output::spinner(format!("Researching: {}", question));
    let result = engine.research(question).await;
    spinner.finish_and_clear();

    output::print_answer(&result.context("Research failed")?, format)
}

/// One line of REPL input.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplInput<'a> {
    Exit,
    Skip,
    Question(&'a str),
}

/// Classify a REPL line. Surrounding whitespace only matters for the exit
/// and blank checks; a question is passed on exactly as typed.
pub fn parse_repl_line(line: &str) -> ReplInput<'_> {
    let trimmed = line.trim();
    if trimmed.eq_ignore_ascii_case("exit") {
        ReplInput::Exit
    } else if trimmed.is_empty() {
        ReplInput::Skip
    } else {
        ReplInput::Question(line)
    }
}

/// Interactive loop on stdin.
pub async fn repl(config: &SageConfig, format: OutputFormat) -> Result<()> {
    let mut engine = build_engine(config).await?;
    run_repl(&mut engine, BufReader::new(tokio::io::stdin()), format).await
}

/// Answer questions read from `input` until `exit` or end of input.
///
/// A failed question is reported and the loop continues.
pub async fn run_repl<R>(engine: &mut ResearchEngine, input: R, format: OutputFormat) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout
            .write_all(b"\nAsk a research question (or type exit): ")
            .await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };

        match parse_repl_line(&line) {
            ReplInput::Exit => break,
            ReplInput::Skip => continue,
            ReplInput::Question(question) => {
                if let Err(e) = research_and_print(engine, question, format).await {
                    output::error(format!("{:#}", e));
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Serve
// ============================================================================

/// Start the web form.
pub async fn serve(config: &SageConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    let engine = build_engine(config).await?;
    output::info(format!("Open http://{}:{}/ in a browser", host, port));
    web::serve(engine, &host, port).await
}

// ============================================================================
// Stats
// ============================================================================

/// Print knowledge base statistics without loading any model or touching
/// the store files.
pub async fn stats(config: &SageConfig, format: OutputFormat) -> Result<()> {
    let kb = KnowledgeBase::open_read_only(
        &config.vector_path(),
        &config.document_path(),
        config.embedding.dimension,
    )
    .await
    .context("Failed to open the knowledge base")?;

    output::print_stats(&kb.stats(), format)
}

// ============================================================================
// Config
// ============================================================================

/// Print the effective configuration as TOML.
pub fn config_show(config: &SageConfig, source: Option<&Path>, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return output::json(config);
    }

    match source {
        Some(path) => output::info(format!("Loaded from {}", path.display())),
        None => output::info("Using built-in defaults"),
    }
    println!("{}", config.to_toml()?);
    Ok(())
}

/// Write the default configuration file.
pub async fn config_init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    SageConfig::default()
        .save_to_path(&path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    output::success(format!("Wrote default configuration to {}", path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_repl_line() {
        assert_eq!(parse_repl_line("exit"), ReplInput::Exit);
        assert_eq!(parse_repl_line("  EXIT \n"), ReplInput::Exit);
        assert_eq!(parse_repl_line("   "), ReplInput::Skip);
        assert_eq!(parse_repl_line(""), ReplInput::Skip);
        assert_eq!(
            parse_repl_line(" What is dark matter? "),
            ReplInput::Question(" What is dark matter? ")
        );
        assert_eq!(
            parse_repl_line("exit strategies in venture capital"),
            ReplInput::Question("exit strategies in venture capital")
        );
    }

    #[tokio::test]
    async fn test_config_init_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sage.toml");

        config_init(Some(path.clone()), false).await.unwrap();
        assert!(path.exists());

        assert!(config_init(Some(path.clone()), false).await.is_err());
        config_init(Some(path.clone()), true).await.unwrap();

        let loaded = SageConfig::load_from_path(&path).await.unwrap();
        assert_eq!(loaded.retrieval.top_k, 4);
    }

    #[tokio::test]
    async fn test_stats_does_not_create_store_files() {
        let dir = tempdir().unwrap();
        let mut config = SageConfig::default();
        config.general.data_dir = dir.path().join("store");

        stats(&config, OutputFormat::Json).await.unwrap();

        assert!(!config.vector_path().exists());
        assert!(!config.document_path().exists());
    }
}
