//! Local CLI over `psp_core`.
//!
//! # Responsibility
//! - Provide a small executable to ingest records, run production and
//!   inspect prompts against a local database.
//! - Keep output deterministic for quick local sanity checks.

use clap::{Parser, Subcommand};
use psp_core::{
    init_from_config, EngineConfig, FeedbackSignal, PersonalizationEngine, QueryContext,
    Satisfaction, SearchQuery,
};
use std::error::Error;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "psp")]
#[command(about = "Local HiNATA ingestion and personal system prompt engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML config file
    #[arg(long, global = true, env = "PSP_CONFIG")]
    config: Option<PathBuf>,

    /// Database path, overrides the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Check core linkage
    Ping,

    /// Submit HiNATA JSON (one object or an array) from a file or `-` for stdin
    Submit { input: PathBuf },

    /// Run the production pass
    Produce {
        /// Reference time in epoch ms, defaults to now
        #[arg(long)]
        at: Option<i64>,
    },

    /// Compose a personalized prompt for a query
    Prompt {
        query: String,

        /// Requesting app id
        #[arg(long)]
        app: Option<String>,

        /// Character budget, defaults to the configured one
        #[arg(long)]
        budget: Option<usize>,

        #[arg(long)]
        max_fragments: Option<usize>,

        /// Print the prompt as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report satisfaction for an invocation
    Feedback {
        invocation_id: Uuid,

        /// positive | neutral | negative
        satisfaction: String,

        /// Restrict feedback to these fragments
        #[arg(long = "fragment")]
        fragments: Vec<Uuid>,

        /// Reporting app id
        #[arg(long)]
        app: Option<String>,
    },

    /// Full-text search over stored records
    Search {
        text: String,

        #[arg(long)]
        app: Option<String>,

        #[arg(long)]
        tag: Option<String>,

        #[arg(long, default_value = "20")]
        limit: u32,

        /// Pass the text through as raw FTS5 syntax
        #[arg(long)]
        raw: bool,
    },

    /// Soft-delete a record
    Delete { id: Uuid },

    /// Show store counters and strategy weights
    Stats,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    if let Command::Ping = cli.command {
        println!("psp_core ping={}", psp_core::ping());
        println!("psp_core version={}", psp_core::core_version());
        return Ok(());
    }

    let config = load_config(cli.config, cli.db)?;
    init_from_config(&config)?;
    let engine = PersonalizationEngine::open(config)?;

    match cli.command {
        Command::Ping => {}
        Command::Submit { input } => {
            let raw = read_input(&input)?;
            let ids = engine.submit_hinata_json(&raw)?;
            for id in ids {
                println!("{id}");
            }
        }
        Command::Produce { at } => {
            let report = match at {
                Some(now_ms) => engine.run_production_at(now_ms)?,
                None => engine.run_production()?,
            };
            println!(
                "records={} candidates={} inserted={} refreshed={} retired={} skipped={}",
                report.record_count,
                report.candidate_count,
                report.outcome.inserted,
                report.outcome.refreshed,
                report.outcome.retired,
                report.skipped
            );
        }
        Command::Prompt {
            query,
            app,
            budget,
            max_fragments,
            json,
        } => {
            let mut context = QueryContext::new(query);
            context.source_app = app;
            context.char_budget = budget.unwrap_or(engine.config().invocation.char_budget);
            context.max_fragments =
                max_fragments.unwrap_or(engine.config().invocation.max_fragments);
            let prompt = engine.get_personalized_prompt(&context)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&prompt)?);
            } else {
                if let Some(id) = prompt.invocation_id {
                    eprintln!(
                        "invocation={id} chars={}/{} truncated={}",
                        prompt.char_count, prompt.char_budget, prompt.truncated
                    );
                }
                println!("{}", prompt.text);
            }
        }
        Command::Feedback {
            invocation_id,
            satisfaction,
            fragments,
            app,
        } => {
            let satisfaction = Satisfaction::parse(&satisfaction)
                .ok_or_else(|| format!("unknown satisfaction `{satisfaction}`"))?;
            let mut signal = FeedbackSignal::new(invocation_id, satisfaction);
            signal.fragment_ids = fragments;
            signal.source_app = app;
            let outcome = engine.record_feedback(&signal)?;
            let weights = outcome.strategy_weights;
            println!(
                "fragments={} prediction_error={:.4} relevance={:.4} weight={:.4} recency={:.4} source_match={:.4}",
                outcome.fragment_changes.len(),
                outcome.prediction_error,
                weights.relevance,
                weights.weight,
                weights.recency,
                weights.source_match
            );
        }
        Command::Search {
            text,
            app,
            tag,
            limit,
            raw,
        } => {
            let mut query = SearchQuery::new(text);
            query.source_app = app;
            query.tag = tag;
            query.limit = limit;
            query.raw_fts_syntax = raw;
            for hit in engine.search_records(&query)? {
                println!("{}\t{}\t{}", hit.record_id, hit.source_app, hit.snippet);
            }
        }
        Command::Delete { id } => {
            engine.delete_record(id)?;
            println!("deleted {id}");
        }
        Command::Stats => {
            let stats = engine.stats()?;
            println!("records.active={}", stats.active_records);
            println!("records.total={}", stats.total_records);
            println!("tags={}", stats.tags);
            println!("fragments.active={}", stats.fragments.active_fragments);
            println!("fragments.retired={}", stats.fragments.retired_fragments);
            println!("invocations={}", stats.fragments.invocations);
            println!("feedback={}", stats.fragments.feedback);
            println!("apps={}", stats.registered_apps);
            let weights = stats.strategy_weights;
            println!(
                "weights relevance={:.4} weight={:.4} recency={:.4} source_match={:.4} samples={}",
                weights.relevance,
                weights.weight,
                weights.recency,
                weights.source_match,
                weights.sample_count
            );
            if let Some(run) = stats.last_production {
                println!(
                    "last_production started_at={} records={} skipped={}",
                    run.started_at, run.record_count, run.skipped
                );
            }
        }
    }

    Ok(())
}

fn load_config(
    path: Option<PathBuf>,
    db: Option<PathBuf>,
) -> Result<EngineConfig, Box<dyn Error>> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };
    if let Some(db) = db {
        config.db_path = db;
        config.validate()?;
    }
    Ok(config)
}

fn read_input(input: &Path) -> std::io::Result<String> {
    if input.as_os_str() == "-" {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        return Ok(raw);
    }
    std::fs::read_to_string(input)
}
