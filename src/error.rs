use std::path::PathBuf;

use chrono::NaiveDate;

/// Anomalies raised while reconciling scraped tables.
///
/// Only `Unreadable`, `Io` and `Csv` are fatal, and only for the single file
/// they name. Everything else is recovered locally by the caller and surfaces
/// as a counter in a [`crate::pipeline::FileSummary`].
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("no team interval covers player {player_id} on {date}")]
    UnresolvedTeam { player_id: String, date: NaiveDate },

    #[error("no indexed game for {date} against {opponent:?}")]
    UnresolvedGameId { date: NaiveDate, opponent: String },

    #[error("name {name:?} maps to {} player ids", candidates.len())]
    AmbiguousName {
        name: String,
        candidates: Vec<String>,
    },

    #[error("malformed row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },

    #[error("key {key} already holds {kept}; discarded {discarded}")]
    KeyCollision {
        key: String,
        kept: String,
        discarded: String,
    },

    #[error("unable to read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("csv error on {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

impl ReconcileError {
    pub fn malformed(row: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRow {
            row,
            reason: reason.into(),
        }
    }

    /// Fatal errors abort the file they concern; the rest degrade to counters.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unreadable { .. } | Self::Io { .. } | Self::Csv { .. }
        )
    }
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;
