use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use webclip_core::logging::{self, PrivacyConfig};
use webclip_core::{Config, read_records};
use webclip_store::{CaptureStore, SearchHit, StoreOptions};

/// Webclip - local capture graph for saved web pages
#[derive(Parser, Debug)]
#[command(name = "webclip")]
#[command(about = "Store, search and inspect web captures in a local SQLite graph", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to webclip.toml (default: ./webclip.toml when present)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Database file, overriding the configured one
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Skip the full-text index and use substring search
    #[arg(long)]
    no_fts: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save capture records from JSON files (one record or an array per file)
    Save {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
    /// List the most recent captures
    Recent {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Search chunk text and comments
    Search {
        #[arg(required = true, value_name = "QUERY")]
        query: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show everything stored for a document
    Context {
        #[arg(value_name = "DOCUMENT_ID")]
        document_id: String,
    },
    /// Look up a document by URL
    Url {
        #[arg(value_name = "URL")]
        url: String,
    },
    /// Show row counts and schema state
    Stats,
    /// Show schema version and migration history
    Schema,
    /// Rebuild the full-text index
    Reindex,
    /// Print an example webclip.toml
    ExampleConfig,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::ExampleConfig => {
            print!("{}", Config::example());
            return Ok(());
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "webclip", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(cli.config.as_deref())?;
    let mut logging_config = logging::LoggingConfig::from(config.logging.clone());
    if cli.verbose {
        logging_config = logging_config.with_level("debug");
    }
    let privacy = logging_config.privacy.clone();
    let _guard = logging::init_logging(Some(logging_config)).context("Failed to initialize logging")?;

    let db_path = cli.db.clone().unwrap_or_else(|| config.store.db_path.clone());
    let options = StoreOptions::from(&config.store).with_fts(config.store.enable_fts && !cli.no_fts);
    if cli.verbose {
        println!("{} Database: {}", "Info:".blue().bold(), logging::sanitize_path(&db_path));
    }

    let store = CaptureStore::open(&db_path, options)
        .await
        .with_context(|| format!("Failed to open capture store at {}", db_path.display()))?;

    let output = Output { json: cli.json };
    match cli.command {
        Commands::Save { files } => cmd_save(&store, &files, &privacy, output).await?,
        Commands::Recent { limit, offset } => cmd_recent(&store, limit, offset, output).await?,
        Commands::Search { query, limit } => cmd_search(&store, &query, limit, output).await?,
        Commands::Context { document_id } => cmd_context(&store, &document_id, output).await?,
        Commands::Url { url } => cmd_url(&store, &url, output).await?,
        Commands::Stats => cmd_stats(&store, output).await?,
        Commands::Schema => cmd_schema(&store, output).await?,
        Commands::Reindex => cmd_reindex(&store, output).await?,
        Commands::ExampleConfig | Commands::Completions { .. } => {}
    }

    store.close().await.context("Failed to close capture store")?;
    Ok(())
}

/// Load config from an explicit path, `./webclip.toml`, or built-in defaults
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let local = Path::new("webclip.toml");
            if local.exists() {
                Config::from_file(local).context("Failed to load ./webclip.toml")
            } else {
                Ok(Config::default())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value).context("Failed to encode output")?);
        Ok(())
    }
}

fn one_line(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let truncated: String = flat.chars().take(max_chars).collect();
    format!("{truncated}...")
}

/// Save every record found in the given files
async fn cmd_save(store: &CaptureStore, files: &[PathBuf], privacy: &PrivacyConfig, output: Output) -> Result<()> {
    let mut outcomes = Vec::new();

    for file in files {
        let records = read_records(file).with_context(|| format!("Failed to read records from {}", file.display()))?;
        for record in records {
            tracing::debug!(
                capture_id = %record.id,
                text = %logging::redact_text(record.document_text().unwrap_or_default(), privacy),
                "Saving capture"
            );
            let capture_id = record.id.clone();
            let outcome = store
                .save_capture(record)
                .await
                .with_context(|| format!("Failed to save capture {capture_id}"))?;

            if !output.json {
                println!(
                    "{} {} -> {} ({} chunks, {} annotations, {} segments)",
                    "Saved:".green().bold(),
                    outcome.capture_id.cyan(),
                    outcome.document_id,
                    outcome.chunk_count,
                    outcome.annotation_count,
                    outcome.segment_count
                );
            }
            outcomes.push(outcome);
        }
    }

    if output.json {
        output.print_json(&outcomes)?;
    }
    Ok(())
}

async fn cmd_recent(store: &CaptureStore, limit: usize, offset: usize, output: Output) -> Result<()> {
    let captures = store.list_recent_captures(limit, offset).await.context("Failed to list captures")?;
    if output.json {
        return output.print_json(&captures);
    }

    if captures.is_empty() {
        println!("{} No captures stored", "Info:".blue().bold());
        return Ok(());
    }
    for capture in &captures {
        println!(
            "{}  {}  {}  {}",
            capture.saved_at.dimmed(),
            capture.capture_type.yellow(),
            capture.title.as_deref().unwrap_or(&capture.url).bold(),
            capture.document_id.dimmed()
        );
        println!("    {}", capture.url.cyan());
    }
    Ok(())
}

fn print_hit(hit: &SearchHit) {
    let title = hit.title.as_deref().unwrap_or(&hit.url);
    println!("{} {}  {}", format!("[{}]", hit.chunk_type).yellow(), title.bold(), hit.url.cyan());
    println!("    {}", one_line(&hit.text, 160));
    if let Some(comment) = hit.comment.as_deref().filter(|c| !c.trim().is_empty()) {
        println!("    {} {}", "note:".magenta(), one_line(comment, 160));
    }
}

async fn cmd_search(store: &CaptureStore, query: &str, limit: usize, output: Output) -> Result<()> {
    let (mode, hits) = store.search_with_mode(query, limit).await.context("Search failed")?;
    if output.json {
        return output.print_json(&hits);
    }

    println!("{} {} hits ({:?})", "Search:".blue().bold(), hits.len(), mode);
    hits.iter().for_each(print_hit);
    Ok(())
}

async fn cmd_context(store: &CaptureStore, document_id: &str, output: Output) -> Result<()> {
    let Some(context) = store.get_document_context(document_id).await.context("Failed to load document")? else {
        anyhow::bail!("No document with id {document_id}");
    };
    if output.json {
        return output.print_json(&context);
    }

    let document = &context.document;
    println!("{} {}", "Document:".green().bold(), document.title.as_deref().unwrap_or(&document.url).bold());
    println!("  {} {}", "url:".dimmed(), document.url.cyan());
    if let Some(canonical) = &document.canonical_url {
        println!("  {} {}", "canonical:".dimmed(), canonical);
    }
    if let Some(site) = &document.site {
        println!("  {} {}", "site:".dimmed(), site);
    }

    println!("{} {}", "Captures:".blue().bold(), context.captures.len());
    for capture in &context.captures {
        println!("  {}  {}  {}", capture.saved_at.dimmed(), capture.capture_type.yellow(), capture.capture_id);
    }

    println!("{} {}", "Chunks:".blue().bold(), context.chunks.len());
    for chunk in &context.chunks {
        println!(
            "  #{:<3} {:<18} {}",
            chunk.chunk_index.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string()),
            chunk.chunk_type.yellow(),
            one_line(&chunk.text, 100)
        );
    }

    println!(
        "{} {} annotations, {} transcript segments, {} entities, {} edges",
        "Graph:".blue().bold(),
        context.annotations.len(),
        context.transcript_segments.len(),
        context.entities.len(),
        context.edges.len()
    );
    for edge in &context.edges {
        println!("  {} -[{}]-> {}", edge.from_entity_id, edge.predicate.magenta(), edge.to_entity_id);
    }
    Ok(())
}

async fn cmd_url(store: &CaptureStore, url: &str, output: Output) -> Result<()> {
    let Some(document) = store.get_document_by_url(url).await.context("Failed to look up URL")? else {
        anyhow::bail!("No document stored for {url}");
    };
    if output.json {
        return output.print_json(&document);
    }

    println!(
        "{} {}  {}",
        "Document:".green().bold(),
        document.document_id.cyan(),
        document.title.as_deref().unwrap_or(&document.url)
    );
    println!("  {} {}", "url:".dimmed(), document.url);
    Ok(())
}

async fn cmd_stats(store: &CaptureStore, output: Output) -> Result<()> {
    let stats = store.stats().await.context("Failed to read stats")?;
    if output.json {
        return output.print_json(&stats);
    }

    println!(
        "{} schema v{}, full-text search {}",
        "Store:".green().bold(),
        stats.schema_version,
        if stats.fts_enabled { "on".green().to_string() } else { "off".yellow().to_string() }
    );
    let rows = [
        ("documents", stats.documents),
        ("captures", stats.captures),
        ("chunks", stats.chunks),
        ("annotations", stats.annotations),
        ("transcript segments", stats.transcript_segments),
        ("entities", stats.entities),
        ("entity aliases", stats.entity_aliases),
        ("edges", stats.edges),
        ("provenance", stats.provenance),
    ];
    for (label, count) in rows {
        println!("  {:<20} {}", label, count);
    }
    Ok(())
}

async fn cmd_schema(store: &CaptureStore, output: Output) -> Result<()> {
    let status = store.schema_status().await.context("Failed to read schema status")?;
    if output.json {
        return output.print_json(&status);
    }

    println!(
        "{} v{} ({})",
        "Schema:".green().bold(),
        status.version,
        status.name.as_deref().unwrap_or("unnamed")
    );
    for entry in &status.history {
        let kind = entry.details.get("kind").and_then(|k| k.as_str()).unwrap_or("unknown");
        println!("  {}  {}  {}", entry.at.dimmed(), kind.yellow(), entry.id);
    }
    Ok(())
}

async fn cmd_reindex(store: &CaptureStore, output: Output) -> Result<()> {
    let rebuilt = store.rebuild_search_index().await.context("Failed to rebuild search index")?;
    if output.json {
        return output.print_json(&serde_json::json!({ "rebuilt": rebuilt }));
    }

    if rebuilt {
        println!("{} Search index rebuilt", "Success:".green().bold());
    } else {
        println!("{} Full-text search is disabled; nothing to rebuild", "Warning:".yellow().bold());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RECORD_JSON: &str = r#"{
        "id": "cap-1",
        "captureType": "selection",
        "savedAt": "2024-05-01T09:30:00Z",
        "source": { "url": "https://example.com/article?utm_source=feed", "title": "An article" },
        "content": {
            "documentText": "Ownership moves values. Borrowing lends them out.",
            "annotations": [{ "selectedText": "Borrowing lends", "comment": "remember this" }]
        }
    }"#;

    async fn store_with_record(temp_dir: &TempDir) -> CaptureStore {
        let store = CaptureStore::open(&temp_dir.path().join("webclip.db"), StoreOptions::default()).await.unwrap();
        let path = temp_dir.path().join("record.json");
        std::fs::write(&path, RECORD_JSON).unwrap();
        cmd_save(&store, &[path], &PrivacyConfig::default(), Output { json: false }).await.unwrap();
        store
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["webclip", "stats"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.db.is_none());
        assert!(!cli.no_fts);
        assert!(!cli.json);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["webclip", "--db", "/tmp/x.db", "--no-fts", "--json", "-v", "stats"]).unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        assert!(cli.no_fts);
        assert!(cli.json);
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_save_requires_files() {
        assert!(Cli::try_parse_from(["webclip", "save"]).is_err());
        let cli = Cli::try_parse_from(["webclip", "save", "a.json", "b.json"]).unwrap();
        match cli.command {
            Commands::Save { files } => assert_eq!(files.len(), 2),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_recent_defaults() {
        let cli = Cli::try_parse_from(["webclip", "recent"]).unwrap();
        match cli.command {
            Commands::Recent { limit, offset } => {
                assert_eq!(limit, 20);
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_search_command() {
        let cli = Cli::try_parse_from(["webclip", "search", "borrow checker", "--limit", "5"]).unwrap();
        match cli.command {
            Commands::Search { query, limit } => {
                assert_eq!(query, "borrow checker");
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_completions_command() {
        let cli = Cli::try_parse_from(["webclip", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions { shell: Shell::Bash }));
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config(Some(Path::new("/nonexistent/webclip.toml"))).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("clips.db");
        let config_path = temp_dir.path().join("webclip.toml");
        std::fs::write(
            &config_path,
            format!("[store]\ndb_path = {:?}\nenable_fts = false\n", db_path.display().to_string()),
        )
        .unwrap();

        let config = load_config(Some(&config_path)).unwrap();
        assert_eq!(config.store.db_path, db_path);
        assert!(!config.store.enable_fts);
    }

    #[test]
    fn test_one_line() {
        assert_eq!(one_line("a\n  b\tc", 10), "a b c");
        assert_eq!(one_line("abcdefghij", 4), "abcd...");
    }

    #[tokio::test]
    async fn test_cmd_save_and_queries() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_record(&temp_dir).await;
        let output = Output { json: false };

        let recent = store.list_recent_captures(10, 0).await.unwrap();
        assert_eq!(recent.len(), 1);
        let document_id = recent[0].document_id.clone();

        cmd_recent(&store, 10, 0, output).await.unwrap();
        cmd_search(&store, "borrowing", 10, output).await.unwrap();
        cmd_context(&store, &document_id, output).await.unwrap();
        cmd_url(&store, "https://example.com/article", output).await.unwrap();
        cmd_stats(&store, output).await.unwrap();
        cmd_schema(&store, output).await.unwrap();
        cmd_reindex(&store, output).await.unwrap();
    }

    #[tokio::test]
    async fn test_cmd_json_output() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_record(&temp_dir).await;
        let output = Output { json: true };

        cmd_recent(&store, 10, 0, output).await.unwrap();
        cmd_search(&store, "ownership", 10, output).await.unwrap();
        cmd_stats(&store, output).await.unwrap();
    }

    #[tokio::test]
    async fn test_cmd_context_unknown_document() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_record(&temp_dir).await;

        assert!(cmd_context(&store, "doc_missing", Output { json: false }).await.is_err());
        assert!(cmd_url(&store, "https://example.com/missing", Output { json: false }).await.is_err());
    }

    #[tokio::test]
    async fn test_cmd_save_rejects_bad_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = CaptureStore::open(&temp_dir.path().join("webclip.db"), StoreOptions::default()).await.unwrap();
        let path = temp_dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = cmd_save(&store, &[path], &PrivacyConfig::default(), Output { json: false }).await;
        assert!(result.is_err());
        assert_eq!(store.stats().await.unwrap().captures, 0);
    }
}
