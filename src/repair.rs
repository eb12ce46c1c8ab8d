use std::collections::HashSet;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use crate::dates::{self, iso, shifted_day_fix};
use crate::error::{ReconcileError, Result};
use crate::game_index::date_from_game_id;
use crate::table::{Table, columns, normalize_id};

/// Suffix marking the second game of a double-header that had no free
/// sequence digit.
pub const DOUBLE_HEADER_MARKER: &str = "_2";

/// A known-bad game id and its correction, written `FROM=TO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdOverride {
    pub from: String,
    pub to: String,
}

impl FromStr for IdOverride {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let (from, to) = raw
            .split_once('=')
            .ok_or_else(|| format!("override {raw:?} is not FROM=TO"))?;
        let (from, to) = (from.trim(), to.trim());
        if from.is_empty() || to.is_empty() {
            return Err(format!("override {raw:?} has an empty side"));
        }
        Ok(Self {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepairOptions {
    pub overrides: Vec<IdOverride>,
    /// Also shift `01`/`02`/`03` days on rows that never got a game id.
    pub remap_unresolved_dates: bool,
}

/// The three fields the repair passes read and rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairRow {
    pub player_id: String,
    pub game_id: String,
    pub date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    pub rows: usize,
    pub overrides_applied: usize,
    pub duplicates_split: usize,
    pub dates_shifted: usize,
    pub shift_collisions: usize,
    pub unresolved_dates_shifted: usize,
}

impl RepairSummary {
    pub fn changed(&self) -> usize {
        self.overrides_applied
            + self.duplicates_split
            + self.dates_shifted
            + self.unresolved_dates_shifted
    }
}

/// Run every repair pass over `rows`, in file order.
///
/// Overrides go first, then duplicate splitting, then the day-digit fix on
/// marked ids, then (opt-in) the day-digit fix on rows without an id. Running
/// this again on its own output changes nothing.
pub fn repair_rows(rows: &mut [RepairRow], options: &RepairOptions) -> RepairSummary {
    let mut summary = RepairSummary {
        rows: rows.len(),
        ..RepairSummary::default()
    };
    summary.overrides_applied = apply_overrides(rows, &options.overrides);
    let mut seen = split_duplicates(rows, &mut summary);
    shift_marked_dates(rows, &mut seen, &mut summary);
    if options.remap_unresolved_dates {
        summary.unresolved_dates_shifted = shift_unresolved_dates(rows);
    }
    summary
}

fn apply_overrides(rows: &mut [RepairRow], overrides: &[IdOverride]) -> usize {
    let mut applied = 0;
    for ov in overrides {
        if ov.from == ov.to {
            continue;
        }
        let new_date = date_from_game_id(&ov.to).map(iso);
        for row in rows.iter_mut().filter(|row| row.game_id.trim() == ov.from) {
            row.game_id = ov.to.clone();
            if let Some(date) = &new_date {
                row.date = date.clone();
            }
            applied += 1;
        }
    }
    applied
}

/// Pass A: the first `(player, game)` pair keeps its id; repeats get the
/// second-game id. Returns the set of pairs present afterwards.
fn split_duplicates(rows: &mut [RepairRow], summary: &mut RepairSummary) -> HashSet<(String, String)> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for (idx, row) in rows.iter_mut().enumerate() {
        if row.game_id.trim().is_empty() {
            continue;
        }
        if seen.insert((row.player_id.clone(), row.game_id.clone())) {
            continue;
        }
        let mut candidate = second_game_id(&row.game_id);
        while seen.contains(&(row.player_id.clone(), candidate.clone())) {
            candidate.push_str(DOUBLE_HEADER_MARKER);
        }
        debug!(row = idx + 1, from = %row.game_id, to = %candidate, "split duplicate game id");
        row.game_id = candidate;
        seen.insert((row.player_id.clone(), row.game_id.clone()));
        summary.duplicates_split += 1;
    }
    seen
}

fn second_game_id(game_id: &str) -> String {
    if game_id.len() == 13 && game_id.ends_with('1') {
        format!("{}2", &game_id[..12])
    } else {
        format!("{game_id}{DOUBLE_HEADER_MARKER}")
    }
}

/// Pass B: a marked id whose row date falls on day 1, 2 or 3 was scraped
/// with its day digits shifted. Fix the date, rewrite the id's embedded day
/// and drop the marker, unless that would collide with an existing pair.
fn shift_marked_dates(
    rows: &mut [RepairRow],
    seen: &mut HashSet<(String, String)>,
    summary: &mut RepairSummary,
) {
    for (idx, row) in rows.iter_mut().enumerate() {
        let Some(stripped) = row.game_id.strip_suffix(DOUBLE_HEADER_MARKER) else {
            continue;
        };
        let Some(fixed) = dates::parse_date(&row.date, None).and_then(shifted_day_fix) else {
            continue;
        };
        let Some(new_id) = with_embedded_day(stripped, fixed) else {
            continue;
        };
        let new_key = (row.player_id.clone(), new_id.clone());
        if seen.contains(&new_key) {
            let err = ReconcileError::KeyCollision {
                key: format!("{}/{}", row.player_id, new_id),
                kept: new_id.clone(),
                discarded: row.game_id.clone(),
            };
            debug!(row = idx + 1, %err, "day shift would duplicate an existing row");
            summary.shift_collisions += 1;
            continue;
        }
        seen.remove(&(row.player_id.clone(), row.game_id.clone()));
        seen.insert(new_key);
        row.game_id = new_id;
        row.date = iso(fixed);
        summary.dates_shifted += 1;
    }
}

/// Replace the day digits of the first `YYYYMMDD` run in `game_id`.
fn with_embedded_day(game_id: &str, fixed: NaiveDate) -> Option<String> {
    let bytes = game_id.as_bytes();
    let start = (0..bytes.len().saturating_sub(7))
        .find(|&i| bytes[i..i + 8].iter().all(|b| b.is_ascii_digit()))?;
    let mut out = String::with_capacity(game_id.len());
    out.push_str(&game_id[..start + 6]);
    out.push_str(&format!("{:02}", fixed.day()));
    out.push_str(&game_id[start + 8..]);
    Some(out)
}

/// Pass C: same day-digit fix for rows the resolver could not match.
fn shift_unresolved_dates(rows: &mut [RepairRow]) -> usize {
    let mut shifted = 0;
    for row in rows.iter_mut().filter(|row| row.game_id.trim().is_empty()) {
        let Some(fixed) = dates::parse_date(&row.date, None).and_then(shifted_day_fix) else {
            continue;
        };
        row.date = iso(fixed);
        shifted += 1;
    }
    shifted
}

/// Repair a daily table in place. The game id column is looked up by
/// `column` first, then by the usual header names. Needs a player id column
/// too; the day-digit passes additionally need a date column.
pub fn repair_table(table: &mut Table, column: &str, options: &RepairOptions) -> Result<RepairSummary> {
    let gid_col = match table.column_index(column) {
        Some(col) => col,
        None => columns::GAME_ID.require(&table.headers)?,
    };
    let pid_col = columns::PLAYER_ID.require(&table.headers)?;
    let date_col = columns::GAME_DATE.find(&table.headers);

    let mut rows = (0..table.len())
        .map(|idx| RepairRow {
            player_id: normalize_id(table.cell(idx, pid_col)).unwrap_or_default(),
            game_id: table.cell(idx, gid_col).trim().to_string(),
            date: date_col
                .map(|col| table.cell(idx, col).to_string())
                .unwrap_or_default(),
        })
        .collect::<Vec<_>>();

    let summary = repair_rows(&mut rows, options);

    for (idx, row) in rows.into_iter().enumerate() {
        if table.cell(idx, gid_col).trim() != row.game_id {
            table.set_cell(idx, gid_col, row.game_id);
        }
        if let Some(col) = date_col
            && table.cell(idx, col) != row.date
        {
            table.set_cell(idx, col, row.date);
        }
    }
    info!(
        rows = summary.rows,
        overrides = summary.overrides_applied,
        duplicates = summary.duplicates_split,
        shifted = summary.dates_shifted,
        unresolved_shifted = summary.unresolved_dates_shifted,
        "repaired game ids"
    );
    Ok(summary)
}
