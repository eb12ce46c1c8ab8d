use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use kbo_reconcile::config::{self, ConfigArgs, PipelineConfig};
use kbo_reconcile::logging;
use kbo_reconcile::pipeline::{self, RunSummary};

#[derive(Parser)]
#[command(name = "kbo_reconcile")]
#[command(about = "Attach, repair and reconcile game ids across scraped KBO tables")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    config: ConfigArgs,

    /// Debug-level logging for this crate
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Build player team intervals from season observations
    History,
    /// Add a game id column to daily stat files
    Attach,
    /// Split duplicate game ids and fix shifted dates
    Repair,
    /// Merge player attribute fragments into one row per id
    Players,
    /// Insert player ids into name-only stat files
    LinkIds,
    /// Derive a date column from game ids in the games table
    GameDates,
    /// history, attach, repair and players in order
    All,
}

fn main() -> ExitCode {
    config::load_env_files();
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match run(cli) {
        Ok(run) if run.all_failed() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<RunSummary> {
    let cfg = cli.config.resolve();
    let summary = match cli.command {
        Command::History => pipeline::run_history(&cfg, &pipeline::load_aliases(&cfg)?),
        Command::Attach => pipeline::run_attach(&cfg, &pipeline::load_aliases(&cfg)?),
        Command::Repair => pipeline::run_repair(&cfg),
        Command::Players => pipeline::run_players(&cfg),
        Command::LinkIds => pipeline::run_link_ids(&cfg),
        Command::GameDates => pipeline::run_game_dates(&cfg),
        Command::All => pipeline::run_all(&cfg, &pipeline::load_aliases(&cfg)?),
    };
    print_summary(&cfg, &summary);
    if let Some(path) = &cfg.summary_json {
        summary
            .write_json(path)
            .with_context(|| format!("unable to write summary to {}", path.display()))?;
    }
    Ok(summary)
}

fn print_summary(cfg: &PipelineConfig, summary: &RunSummary) {
    println!("{} complete", summary.command);
    println!("Root: {}", cfg.root.display());
    if let Some(index) = &summary.game_index {
        println!(
            "Games: {} indexed, {} collisions, {} malformed ids",
            index.games, index.key_collisions, index.malformed_ids
        );
    }
    for file in &summary.files {
        println!(
            "{}: rows={} changed={} skipped={} unresolved_team={} unresolved_game_id={} ambiguous={} collisions={}",
            file.path.display(),
            file.rows,
            file.changed,
            file.skipped,
            file.unresolved_team,
            file.unresolved_game_id,
            file.ambiguous_names,
            file.key_collisions
        );
        if !file.errors.is_empty() {
            println!("  errors: {}", file.errors.len());
            for err in file.errors.iter().take(6) {
                println!("   - {err}");
            }
        }
    }
    if !summary.duplicate_names.is_empty() {
        println!("Duplicate names: {}", summary.duplicate_names.len());
        for (name, ids) in summary.duplicate_names.iter().take(10) {
            let ids = ids.iter().map(String::as_str).collect::<Vec<_>>();
            println!("  {name}: {}", ids.join(", "));
        }
    }
    println!("Total changed: {}", summary.changed());
}
