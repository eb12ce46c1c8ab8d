use std::path::{Path, PathBuf};

use clap::Args;

use crate::repair::{IdOverride, RepairOptions};

pub const DEFAULT_GAME_ID_COLUMN: &str = "GAME_ID";

/// Load `.env.local` then `.env`; variables already set win.
pub fn load_env_files() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

/// Settings shared by every subcommand. Each flag falls back to its `KBO_*`
/// variable, then to a path under `--root`.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Project root holding `data/` and `data_etl/`
    #[arg(long, env = "KBO_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Combined games table
    #[arg(long, env = "KBO_GAMES")]
    pub games: Option<PathBuf>,

    /// Raw `(player_id, year, team)` observations
    #[arg(long, env = "KBO_OBSERVATIONS")]
    pub observations: Option<PathBuf>,

    /// Team history table (written by `history`, read by `attach`)
    #[arg(long, env = "KBO_TEAM_HISTORY")]
    pub team_history: Option<PathBuf>,

    /// Extra `alias,canonical` rows for the team alias table
    #[arg(long, env = "KBO_TEAM_ALIASES")]
    pub team_aliases: Option<PathBuf>,

    /// Merged player attributes table
    #[arg(long, env = "KBO_PLAYER_ATTRIBUTES")]
    pub player_attributes: Option<PathBuf>,

    /// Daily stat files to attach and repair
    #[arg(long = "daily", env = "KBO_DAILY_FILES", value_delimiter = ',')]
    pub daily: Vec<PathBuf>,

    /// Directories scanned for per-role statistics files
    #[arg(long = "stats-root", env = "KBO_STATS_ROOTS", value_delimiter = ',')]
    pub stats_roots: Vec<PathBuf>,

    /// Name-only stat files that get a `player_id` column
    #[arg(long = "link", env = "KBO_LINK_FILES", value_delimiter = ',')]
    pub link_files: Vec<PathBuf>,

    #[arg(long, env = "KBO_GAME_ID_COLUMN", default_value = DEFAULT_GAME_ID_COLUMN)]
    pub game_id_column: String,

    /// Recompute game ids even when the column already exists
    #[arg(long, env = "KBO_FORCE")]
    pub force: bool,

    /// Also shift 01/02/03 days on rows left without a game id
    #[arg(long, env = "KBO_REMAP_UNRESOLVED_DATES")]
    pub remap_unresolved_dates: bool,

    /// Known game id corrections, `FROM=TO`
    #[arg(long = "override", env = "KBO_ID_OVERRIDES", value_delimiter = ',')]
    pub overrides: Vec<IdOverride>,

    /// Write the run summary as JSON here
    #[arg(long, env = "KBO_SUMMARY_JSON")]
    pub summary_json: Option<PathBuf>,
}

/// Fully resolved paths and switches for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub root: PathBuf,
    pub games: PathBuf,
    pub observations: PathBuf,
    pub team_history: PathBuf,
    pub team_aliases: Option<PathBuf>,
    pub player_attributes: PathBuf,
    pub daily: Vec<PathBuf>,
    pub stats_roots: Vec<PathBuf>,
    pub link_files: Vec<PathBuf>,
    pub game_id_column: String,
    pub force: bool,
    pub repair: RepairOptions,
    pub summary_json: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn resolve(self) -> PipelineConfig {
        let root = self.root;
        let under = |parts: &[&str]| parts.iter().fold(root.clone(), |acc, p| acc.join(p));

        let daily = if self.daily.is_empty() {
            vec![
                under(&["data_etl", "all_years_hitter_daily.csv"]),
                under(&["data_etl", "all_years_pitcher_daily.csv"]),
            ]
        } else {
            self.daily
        };
        let stats_roots = if self.stats_roots.is_empty() {
            vec![under(&["data"])]
        } else {
            self.stats_roots
        };
        let game_id_column = match self.game_id_column.trim() {
            "" => DEFAULT_GAME_ID_COLUMN.to_string(),
            name => name.to_string(),
        };

        PipelineConfig {
            games: self
                .games
                .unwrap_or_else(|| under(&["data_etl", "all_years_Games_all.csv"])),
            observations: self
                .observations
                .unwrap_or_else(|| under(&["data", "player_info", "player_team_observations.csv"])),
            team_history: self
                .team_history
                .unwrap_or_else(|| under(&["data", "player_info", "player_team_history.csv"])),
            team_aliases: self.team_aliases,
            player_attributes: self
                .player_attributes
                .unwrap_or_else(|| under(&["data", "player_info", "player_attributes.csv"])),
            daily,
            stats_roots,
            link_files: self.link_files,
            game_id_column,
            force: self.force,
            repair: RepairOptions {
                overrides: self.overrides,
                remap_unresolved_dates: self.remap_unresolved_dates,
            },
            summary_json: self.summary_json,
            root,
        }
    }
}

impl PipelineConfig {
    pub fn from_root(root: &Path) -> Self {
        ConfigArgs {
            root: root.to_path_buf(),
            game_id_column: DEFAULT_GAME_ID_COLUMN.to_string(),
            ..ConfigArgs::default()
        }
        .resolve()
    }
}
