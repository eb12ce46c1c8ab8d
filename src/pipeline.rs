use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::dates::year_from_path;
use crate::error::ReconcileError;
use crate::game_index::{self, GameIndex, GameIndexSummary};
use crate::player_merge::{self, PlayerRegistry, Role, RoleIndex};
use crate::repair::{self, RepairOptions};
use crate::resolver::Resolver;
use crate::table::{self, Table};
use crate::team_alias::TeamAliases;
use crate::team_history::{self, TeamHistory};

/// What happened to one file during one command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub changed: usize,
    pub skipped: usize,
    pub unresolved_team: usize,
    pub unresolved_game_id: usize,
    pub ambiguous_names: usize,
    pub key_collisions: usize,
    pub errors: Vec<String>,
    /// The file could not be read at all.
    pub read_failed: bool,
}

impl FileSummary {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ..Self::default()
        }
    }

    fn fail(&mut self, err: impl std::fmt::Display) {
        self.errors.push(err.to_string());
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub command: String,
    pub files: Vec<FileSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_index: Option<GameIndexSummary>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub duplicate_names: BTreeMap<String, BTreeSet<String>>,
}

impl RunSummary {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            ..Self::default()
        }
    }

    /// True when there were inputs and none of them could be read.
    pub fn all_failed(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|f| f.read_failed)
    }

    pub fn changed(&self) -> usize {
        self.files.iter().map(|f| f.changed).sum()
    }

    pub fn extend(&mut self, other: RunSummary) {
        self.files.extend(other.files);
        if other.game_index.is_some() {
            self.game_index = other.game_index;
        }
        self.duplicate_names.extend(other.duplicate_names);
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("create summary directory")?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).context("serialize run summary")?;
        fs::write(&tmp, json).context("write run summary")?;
        fs::rename(&tmp, path).context("swap run summary")?;
        Ok(())
    }
}

/// Read `path`, let `op` edit the table, and write it back atomically when
/// `op` reports a change. Read and write failures land in the summary.
fn rewrite_file(
    path: &Path,
    op: impl FnOnce(&mut Table, &mut FileSummary) -> Result<bool>,
) -> FileSummary {
    let mut summary = FileSummary::new(path);
    let mut table = match table::read_table(path) {
        Ok(table) => table,
        Err(err) => {
            warn!(path = %path.display(), %err, "skipping unreadable file");
            summary.read_failed = true;
            summary.fail(err);
            return summary;
        }
    };
    summary.rows = table.len();
    match op(&mut table, &mut summary) {
        Ok(true) => {
            if let Err(err) = table::write_table_atomic(path, &table) {
                summary.fail(err);
            }
        }
        Ok(false) => {}
        Err(err) => summary.fail(format!("{err:#}")),
    }
    summary
}

/// Built-in aliases, extended from the configured alias table if any.
pub fn load_aliases(cfg: &PipelineConfig) -> Result<TeamAliases> {
    let mut aliases = TeamAliases::with_defaults();
    if let Some(path) = &cfg.team_aliases {
        let table = table::read_table(path)
            .with_context(|| format!("read team aliases {}", path.display()))?;
        let applied = aliases.extend_from_table(&table);
        info!(path = %path.display(), applied, "loaded team aliases");
    }
    Ok(aliases)
}

/// `history`: raw observations -> team history table.
pub fn run_history(cfg: &PipelineConfig, aliases: &TeamAliases) -> RunSummary {
    let mut run = RunSummary::new("history");
    let mut summary = FileSummary::new(&cfg.observations);
    let observations = table::read_table(&cfg.observations)
        .map_err(anyhow::Error::from)
        .and_then(|table| {
            team_history::observations_from_table(&table)
                .with_context(|| format!("observations {}", cfg.observations.display()))
        });
    match observations {
        Ok(observations) => {
            summary.rows = observations.len();
            let (history, built) = TeamHistory::build(observations, aliases);
            summary.skipped = built.skipped_rows;
            summary.changed = built.intervals;
            if let Err(err) = table::write_table_atomic(&cfg.team_history, &history.to_table()) {
                summary.fail(err);
            }
        }
        Err(err) => {
            summary.read_failed = matches!(
                err.downcast_ref::<ReconcileError>(),
                Some(e) if e.is_fatal()
            );
            summary.fail(format!("{err:#}"));
        }
    }
    run.files.push(summary);
    run
}

fn load_history(cfg: &PipelineConfig, aliases: &TeamAliases, run: &mut RunSummary) -> TeamHistory {
    let mut summary = FileSummary::new(&cfg.team_history);
    let loaded = table::read_table(&cfg.team_history)
        .and_then(|table| TeamHistory::from_table(&table, aliases));
    let history = match loaded {
        Ok((history, skipped)) => {
            summary.rows = history.interval_count();
            summary.skipped = skipped;
            info!(
                players = history.player_count(),
                intervals = history.interval_count(),
                "loaded team history"
            );
            history
        }
        Err(err) => {
            warn!(%err, "attaching without team history");
            summary.read_failed = err.is_fatal();
            summary.fail(err);
            TeamHistory::default()
        }
    };
    run.files.push(summary);
    history
}

fn load_games(cfg: &PipelineConfig, aliases: &TeamAliases, run: &mut RunSummary) -> Option<GameIndex> {
    let mut summary = FileSummary::new(&cfg.games);
    let loaded = table::read_table(&cfg.games).and_then(|table| game_index::games_from_table(&table));
    let index = match loaded {
        Ok((games, skipped)) => {
            summary.rows = games.len() + skipped;
            summary.skipped = skipped;
            let index = GameIndex::build(games, aliases);
            summary.key_collisions = index.summary().key_collisions;
            info!(teams = index.team_abbrevs().len(), "voted team codes");
            run.game_index = Some(index.summary().clone());
            Some(index)
        }
        Err(err) => {
            summary.read_failed = err.is_fatal();
            summary.fail(err);
            None
        }
    };
    run.files.push(summary);
    index
}

/// `attach`: add the game id column to every daily file.
pub fn run_attach(cfg: &PipelineConfig, aliases: &TeamAliases) -> RunSummary {
    let mut run = RunSummary::new("attach");
    let Some(games) = load_games(cfg, aliases, &mut run) else {
        return run;
    };
    let history = load_history(cfg, aliases, &mut run);
    let resolver = Resolver::new(aliases, &history, &games);

    for path in &cfg.daily {
        let year_hint = year_from_path(path);
        let summary = rewrite_file(path, |table, summary| {
            let outcome =
                resolver.attach_to_table(table, &cfg.game_id_column, year_hint, cfg.force)?;
            if outcome.skipped_existing {
                info!(path = %path.display(), "game id column already present");
                return Ok(false);
            }
            summary.changed = outcome.resolved() + outcome.dates_normalized;
            summary.skipped = outcome.malformed_rows;
            summary.unresolved_team = outcome.unresolved_team;
            summary.unresolved_game_id = outcome.unresolved_game_id;
            summary.key_collisions = games.summary().key_collisions;
            info!(
                path = %path.display(),
                rows = outcome.rows,
                resolved = outcome.resolved(),
                unresolved = outcome.unresolved(),
                "attached game ids"
            );
            Ok(true)
        });
        run.files.push(summary);
    }
    run
}

/// `repair`: overrides and the repair passes over every daily file.
pub fn run_repair(cfg: &PipelineConfig) -> RunSummary {
    let mut run = RunSummary::new("repair");
    for path in &cfg.daily {
        run.files.push(repair_file(path, &cfg.game_id_column, &cfg.repair));
    }
    run
}

pub fn repair_file(path: &Path, column: &str, options: &RepairOptions) -> FileSummary {
    rewrite_file(path, |table, summary| {
        let outcome = repair::repair_table(table, column, options)?;
        summary.changed = outcome.changed();
        summary.key_collisions = outcome.shift_collisions;
        Ok(outcome.changed() > 0)
    })
}

/// `game-dates`: derive a date column from game ids in the games table.
pub fn run_game_dates(cfg: &PipelineConfig) -> RunSummary {
    let mut run = RunSummary::new("game-dates");
    run.files.push(rewrite_file(&cfg.games, |table, summary| {
        let filled = game_index::add_game_dates(table)?;
        summary.changed = filled;
        summary.skipped = table.len().saturating_sub(filled);
        Ok(filled > 0)
    }));
    run
}

/// Every CSV file below `root`, sorted.
pub fn collect_csv_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let is_csv = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if is_csv {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

fn role_files(cfg: &PipelineConfig) -> Vec<PathBuf> {
    cfg.stats_roots
        .iter()
        .flat_map(|root| collect_csv_files(root))
        .filter(|path| Role::from_path(path).is_some())
        .collect()
}

/// `players`: merge attribute fragments into one row per player id.
pub fn run_players(cfg: &PipelineConfig) -> RunSummary {
    let mut run = RunSummary::new("players");
    let mut summary = FileSummary::new(&cfg.player_attributes);

    let mut sources = Vec::new();
    if cfg.player_attributes.exists() {
        sources.push(cfg.player_attributes.clone());
    }
    let stat_files = role_files(cfg);
    sources.extend(stat_files.iter().cloned());

    let (fragments, errors) = player_merge::collect_fragments(&sources);
    let fragment_count = fragments.len();
    let registry = PlayerRegistry::merge(fragments);
    let merged = registry.summary(fragment_count);
    summary.rows = merged.players;
    summary.skipped = merged.malformed;
    summary.ambiguous_names = merged.duplicate_names;
    summary.errors.extend(errors);
    summary.read_failed = !sources.is_empty() && fragment_count == 0;

    if !registry.is_empty()
        && let Err(err) = table::write_table_atomic(&cfg.player_attributes, &registry.to_table())
    {
        summary.fail(err);
    }
    info!(
        sources = sources.len(),
        players = merged.players,
        duplicate_names = merged.duplicate_names,
        "merged player attributes"
    );
    run.duplicate_names = registry.duplicate_names();
    run.files.push(summary);
    run
}

/// `link-ids`: insert `player_id` into name-only stat tables.
pub fn run_link_ids(cfg: &PipelineConfig) -> RunSummary {
    let mut run = RunSummary::new("link-ids");
    let mut attr_summary = FileSummary::new(&cfg.player_attributes);
    let registry = match table::read_table(&cfg.player_attributes) {
        Ok(table) => match player_merge::fragments_from_table(&table, None) {
            Some(fragments) => {
                attr_summary.rows = fragments.len();
                PlayerRegistry::merge(fragments)
            }
            None => {
                attr_summary.fail("player attributes have no id/name columns");
                PlayerRegistry::default()
            }
        },
        Err(err) => {
            attr_summary.read_failed = true;
            attr_summary.fail(err);
            run.files.push(attr_summary);
            return run;
        }
    };
    let duplicates = registry.duplicate_names();
    attr_summary.ambiguous_names = duplicates.len();
    run.duplicate_names = duplicates;
    run.files.push(attr_summary);

    let all_stats = role_files(cfg);
    let (roles, errors) = RoleIndex::scan(&all_stats);
    for err in errors {
        warn!(%err, "role scan skipped a file");
    }

    let targets = if cfg.link_files.is_empty() {
        all_stats
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with("_hitter_advanced.csv") || n.ends_with("_pitcher_advanced.csv"))
            })
            .collect()
    } else {
        cfg.link_files.clone()
    };

    for path in &targets {
        let role = Role::from_path(path);
        run.files.push(rewrite_file(path, |table, summary| {
            let outcome = player_merge::link_ids_in_table(table, &registry, &roles, role)?;
            if outcome.skipped_existing {
                return Ok(false);
            }
            summary.changed = outcome.linked;
            summary.ambiguous_names = outcome.ambiguous;
            summary.skipped = outcome.unknown;
            Ok(true)
        }));
    }
    run
}

/// `all`: history, attach, repair, players, in that order.
pub fn run_all(cfg: &PipelineConfig, aliases: &TeamAliases) -> RunSummary {
    let mut run = RunSummary::new("all");
    run.extend(run_history(cfg, aliases));
    run.extend(run_attach(cfg, aliases));
    run.extend(run_repair(cfg));
    run.extend(run_players(cfg));
    run
}
