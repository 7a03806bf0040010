//! tracelens - CLI to analyze Playwright trace containers
//!
//! Reconstructs the action tree from a trace.zip (or extracted folder),
//! composes the first-failure stack trace, and deduplicates recurring
//! failures against a persisted analysis context before asking an LLM for
//! an explanation.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracelens_core::analysis::{create_llm_client, FolderEntry, LlmClient, TraceAnalyzer};
use tracelens_core::store::ContextStore;
use tracelens_core::{AnalysisOutcome, Config};

#[derive(Parser)]
#[command(name = "tracelens")]
#[command(about = "Analyze Playwright trace containers with failure deduplication")]
#[command(version)]
struct Args {
    /// A trace.zip, an extracted trace folder, or a test-results folder
    /// containing subfolders with trace.zip files
    target: PathBuf,

    /// Similarity threshold for reusing a prior analysis (0.0-1.0)
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Reconstruct and fingerprint only, never call the LLM
    #[arg(long)]
    no_llm: bool,

    /// Path to the analysis context document (defaults to
    /// analysis-context.json next to the analyzed traces)
    #[arg(long)]
    context: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        tracelens_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let threshold = args
        .threshold
        .unwrap_or(config.analysis.similarity_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        anyhow::bail!("threshold must be between 0.0 and 1.0, got {threshold}");
    }

    // The LLM client is optional: without one, tracelens still reconstructs
    // the trace and fingerprints the failure.
    let client: Option<Box<dyn LlmClient>> = if args.no_llm {
        None
    } else {
        match &config.llm {
            Some(llm) => Some(create_llm_client(llm).context("failed to create LLM client")?),
            None => {
                tracing::info!("No [llm] section in config, running without explanations");
                None
            }
        }
    };
    let analyzer = TraceAnalyzer::new(client.as_deref(), threshold)
        .with_max_prompt_chars(config.analysis.max_prompt_chars);

    if args.target.is_dir() && !contains_trace_stream(&args.target) {
        // A results folder: analyze every */trace.zip inside it.
        let store_path = args
            .context
            .clone()
            .unwrap_or_else(|| ContextStore::path_for_scope(&args.target));
        let mut store = ContextStore::load(&store_path);
        let entries = analyzer
            .analyze_folder(&args.target, &mut store)
            .with_context(|| format!("failed to analyze folder {}", args.target.display()))?;
        print_folder_entries(&entries, &args.format)?;
    } else {
        let scope = args
            .target
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| args.target.clone());
        let store_path = args
            .context
            .clone()
            .unwrap_or_else(|| ContextStore::path_for_scope(&scope));
        let mut store = ContextStore::load(&store_path);
        let outcome = analyzer
            .analyze_trace(&args.target, &mut store)
            .with_context(|| format!("failed to analyze {}", args.target.display()))?;
        print_outcome(&outcome, &args.format)?;
    }

    Ok(())
}

/// Whether `dir` is itself an extracted trace folder, i.e. holds a `.trace`
/// stream under any name, as opposed to a results folder of subfolders.
fn contains_trace_stream(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.path().extension().is_some_and(|ext| ext == "trace"))
        })
        .unwrap_or(false)
}

fn print_outcome(outcome: &AnalysisOutcome, format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(outcome)?),
        _ => {
            println!("── {} ──", outcome.folder_path.display());
            println!("{}", outcome.action_summary);
            println!("Stack trace:\n{}\n", outcome.stack_trace);
            if let Some(reused) = &outcome.reused {
                println!(
                    "Known failure (score {:.2}, first seen in {}):",
                    reused.score,
                    reused.source_folder.display()
                );
            }
            println!("{}", outcome.explanation);
        }
    }
    Ok(())
}

fn print_folder_entries(entries: &[FolderEntry], format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(entries)?),
        _ => {
            for entry in entries {
                match (&entry.outcome, &entry.error) {
                    (Some(outcome), _) => print_outcome(outcome, format)?,
                    (None, Some(error)) => {
                        println!("── {} ──", entry.subfolder.display());
                        println!("error: {error}");
                    }
                    (None, None) => {}
                }
                println!();
            }
            println!("{} trace(s) processed", entries.len());
        }
    }
    Ok(())
}
