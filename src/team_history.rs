use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use crate::dates::{self, days_in_year, iso, year_bounds};
use crate::error::{ReconcileError, Result};
use crate::table::{Table, columns, normalize_id};
use crate::team_alias::TeamAliases;

const MIN_YEAR: i32 = 1982;
const MAX_YEAR: i32 = 2100;

pub const HISTORY_HEADERS: [&str; 5] = ["player_id", "name", "team", "start_date", "end_date"];

/// One scraped `(player, season, team)` line, as read from the season table.
///
/// `order` is the position the line had in the source; within a season the
/// teams are listed in the order the player played for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamObservation {
    pub player_id: String,
    pub name: String,
    pub year: String,
    pub team: String,
    pub order: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamInterval {
    pub player_id: String,
    pub team: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TeamInterval {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Per-player, start-sorted, non-overlapping team intervals.
#[derive(Debug, Clone, Default)]
pub struct TeamHistory {
    by_player: HashMap<String, Vec<TeamInterval>>,
    names: HashMap<String, String>,
    players: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryBuildSummary {
    pub observations: usize,
    pub players: usize,
    pub intervals: usize,
    pub skipped_rows: usize,
}

impl TeamHistory {
    /// Build intervals from raw season observations.
    ///
    /// Seasons with one team cover the full year, two teams split at
    /// Jun 30 / Jul 1, more teams get near-equal contiguous chunks in
    /// observation order. Adjacent same-team intervals are then coalesced.
    pub fn build(
        observations: impl IntoIterator<Item = TeamObservation>,
        aliases: &TeamAliases,
    ) -> (Self, HistoryBuildSummary) {
        let mut summary = HistoryBuildSummary::default();
        let mut history = TeamHistory::default();
        // player -> year -> (order, team)
        let mut seasons: HashMap<String, HashMap<i32, Vec<(usize, String)>>> = HashMap::new();

        for obs in observations {
            summary.observations += 1;
            let Some(player_id) = normalize_id(&obs.player_id) else {
                summary.skipped_rows += 1;
                continue;
            };
            let Some(year) = parse_year(&obs.year) else {
                debug!(player_id = %player_id, year = %obs.year, "skipping observation with bad year");
                summary.skipped_rows += 1;
                continue;
            };
            let team = aliases.normalize(&obs.team);
            if team.is_empty() {
                summary.skipped_rows += 1;
                continue;
            }

            history.remember_player(&player_id, &obs.name);
            seasons
                .entry(player_id)
                .or_default()
                .entry(year)
                .or_default()
                .push((obs.order, team));
        }

        for (player_id, years) in seasons {
            let mut years = years.into_iter().collect::<Vec<_>>();
            years.sort_by_key(|(year, _)| *year);

            let mut atomic = Vec::new();
            for (year, mut teams) in years {
                teams.sort_by_key(|(order, _)| *order);
                let teams = teams.into_iter().map(|(_, team)| team).collect::<Vec<_>>();
                atomic.extend(split_year(&player_id, year, &teams));
            }
            let merged = coalesce(atomic);
            history.by_player.insert(player_id, merged);
        }

        summary.players = history.by_player.len();
        summary.intervals = history.by_player.values().map(|v| v.len()).sum();
        info!(
            observations = summary.observations,
            players = summary.players,
            intervals = summary.intervals,
            skipped = summary.skipped_rows,
            "built team history"
        );
        (history, summary)
    }

    /// Load a previously written `player_team_history` table.
    ///
    /// Rows that would overlap an earlier interval of the same player are
    /// dropped and counted, so the store's non-overlap invariant holds even for
    /// hand-edited inputs.
    pub fn from_table(table: &Table, aliases: &TeamAliases) -> Result<(Self, usize)> {
        let id_col = columns::PLAYER_ID.require(&table.headers)?;
        let team_col = columns::TEAM.require(&table.headers)?;
        let start_col = columns::START_DATE.require(&table.headers)?;
        let end_col = columns::END_DATE.require(&table.headers)?;
        let name_col = columns::PLAYER_NAME.find(&table.headers);

        let mut history = TeamHistory::default();
        let mut skipped = 0usize;
        for (idx, row) in table.rows.iter().enumerate() {
            let cell = |col: usize| row.get(col).map(|s| s.as_str()).unwrap_or("");
            let parsed = normalize_id(cell(id_col)).and_then(|player_id| {
                let start = dates::parse_date(cell(start_col), None)?;
                let end = dates::parse_date(cell(end_col), None)?;
                let team = aliases.normalize(cell(team_col));
                (start <= end && !team.is_empty()).then_some(TeamInterval {
                    player_id,
                    team,
                    start,
                    end,
                })
            });
            let Some(interval) = parsed else {
                debug!(row = idx, "skipping malformed team history row");
                skipped += 1;
                continue;
            };
            let name = name_col.map(cell).unwrap_or("");
            history.remember_player(&interval.player_id, name);
            history
                .by_player
                .entry(interval.player_id.clone())
                .or_default()
                .push(interval);
        }

        for intervals in history.by_player.values_mut() {
            intervals.sort_by_key(|iv| iv.start);
            let mut kept: Vec<TeamInterval> = Vec::with_capacity(intervals.len());
            for iv in intervals.drain(..) {
                if kept.last().is_some_and(|last| iv.start <= last.end) {
                    skipped += 1;
                    continue;
                }
                kept.push(iv);
            }
            *intervals = coalesce(kept);
        }
        Ok((history, skipped))
    }

    /// Point-in-interval lookup of the player's team on `date`.
    pub fn team_on(&self, player_id: &str, date: NaiveDate) -> Result<&str> {
        let unresolved = || ReconcileError::UnresolvedTeam {
            player_id: player_id.to_string(),
            date,
        };
        let intervals = self.by_player.get(player_id).ok_or_else(unresolved)?;
        let idx = intervals.partition_point(|iv| iv.start <= date);
        if idx == 0 {
            return Err(unresolved());
        }
        let candidate = &intervals[idx - 1];
        if candidate.contains(date) {
            Ok(candidate.team.as_str())
        } else {
            Err(unresolved())
        }
    }

    pub fn intervals(&self, player_id: &str) -> &[TeamInterval] {
        self.by_player
            .get(player_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn player_count(&self) -> usize {
        self.by_player.len()
    }

    pub fn interval_count(&self) -> usize {
        self.by_player.values().map(|v| v.len()).sum()
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new(HISTORY_HEADERS.iter().map(|h| h.to_string()).collect());
        for player_id in &self.players {
            let name = self.names.get(player_id).cloned().unwrap_or_default();
            for iv in self.intervals(player_id) {
                table.push_row(vec![
                    iv.player_id.clone(),
                    name.clone(),
                    iv.team.clone(),
                    iso(iv.start),
                    iso(iv.end),
                ]);
            }
        }
        table
    }

    fn remember_player(&mut self, player_id: &str, name: &str) {
        if !self.names.contains_key(player_id) {
            self.players.push(player_id.to_string());
            self.names.insert(player_id.to_string(), String::new());
        }
        let name = name.trim();
        if let Some(slot) = self.names.get_mut(player_id)
            && slot.is_empty()
            && !name.is_empty()
        {
            *slot = name.to_string();
        }
    }
}

/// Read raw observations from a `player_id[,name],year,team` table.
pub fn observations_from_table(table: &Table) -> Result<Vec<TeamObservation>> {
    let id_col = columns::PLAYER_ID.require(&table.headers)?;
    let year_col = columns::YEAR.require(&table.headers)?;
    let team_col = columns::TEAM.require(&table.headers)?;
    let name_col = columns::PLAYER_NAME.find(&table.headers);

    Ok(table
        .rows
        .iter()
        .enumerate()
        .map(|(order, row)| {
            let cell = |col: usize| row.get(col).cloned().unwrap_or_default();
            TeamObservation {
                player_id: cell(id_col),
                name: name_col.map(cell).unwrap_or_default(),
                year: cell(year_col),
                team: cell(team_col),
                order,
            }
        })
        .collect())
}

fn parse_year(raw: &str) -> Option<i32> {
    let digits = raw
        .trim()
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect::<String>();
    if digits.len() != 4 {
        return None;
    }
    let year = digits.parse::<i32>().ok()?;
    (MIN_YEAR..=MAX_YEAR).contains(&year).then_some(year)
}

fn split_year(player_id: &str, year: i32, teams: &[String]) -> Vec<TeamInterval> {
    let Some((jan1, dec31)) = year_bounds(year) else {
        return Vec::new();
    };
    let interval = |team: &String, start: NaiveDate, end: NaiveDate| TeamInterval {
        player_id: player_id.to_string(),
        team: team.clone(),
        start,
        end,
    };

    match teams {
        [] => Vec::new(),
        [only] => vec![interval(only, jan1, dec31)],
        [first, second] => {
            let (Some(jun30), Some(jul1)) = (
                NaiveDate::from_ymd_opt(year, 6, 30),
                NaiveDate::from_ymd_opt(year, 7, 1),
            ) else {
                return Vec::new();
            };
            vec![interval(first, jan1, jun30), interval(second, jul1, dec31)]
        }
        many => {
            let n = many.len() as i64;
            let chunk = days_in_year(year) / n;
            many.iter()
                .enumerate()
                .map(|(i, team)| {
                    let i = i as i64;
                    let start = jan1 + Duration::days(i * chunk);
                    let end = if i == n - 1 {
                        dec31
                    } else {
                        jan1 + Duration::days((i + 1) * chunk - 1)
                    };
                    interval(team, start, end)
                })
                .collect()
        }
    }
}

fn coalesce(mut atomic: Vec<TeamInterval>) -> Vec<TeamInterval> {
    atomic.sort_by_key(|iv| iv.start);
    let mut merged: Vec<TeamInterval> = Vec::with_capacity(atomic.len());
    for iv in atomic {
        if let Some(last) = merged.last_mut()
            && last.team == iv.team
            && last.end.succ_opt() == Some(iv.start)
        {
            last.end = last.end.max(iv.end);
            continue;
        }
        merged.push(iv);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn obs(order: usize, player: &str, year: &str, team: &str) -> TeamObservation {
        TeamObservation {
            player_id: player.to_string(),
            name: String::new(),
            year: year.to_string(),
            team: team.to_string(),
            order,
        }
    }

    #[test]
    fn three_way_split_covers_the_year_without_gaps() {
        let teams = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let out = split_year("1", 2023, &teams);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].start, d(2023, 1, 1));
        assert_eq!(out[0].end, d(2023, 5, 1));
        assert_eq!(out[1].start, d(2023, 5, 2));
        assert_eq!(out[2].end, d(2023, 12, 31));
        for pair in out.windows(2) {
            assert_eq!(pair[0].end.succ_opt(), Some(pair[1].start));
        }
    }

    #[test]
    fn coalesce_merges_only_adjacent_same_team() {
        let (history, _) = TeamHistory::build(
            vec![
                obs(0, "7", "2021", "A"),
                obs(1, "7", "2022", "A"),
                obs(2, "7", "2022", "B"),
                obs(3, "7", "2024", "B"),
            ],
            &TeamAliases::empty(),
        );
        let teams = history
            .intervals("7")
            .iter()
            .map(|iv| (iv.team.as_str(), iv.start, iv.end))
            .collect::<Vec<_>>();
        assert_eq!(
            teams,
            vec![
                ("A", d(2021, 1, 1), d(2022, 6, 30)),
                ("B", d(2022, 7, 1), d(2022, 12, 31)),
                ("B", d(2024, 1, 1), d(2024, 12, 31)),
            ]
        );
    }

    #[test]
    fn team_on_returns_unresolved_outside_intervals() {
        let (history, _) =
            TeamHistory::build(vec![obs(0, "7", "2021", "A")], &TeamAliases::empty());
        assert_eq!(history.team_on("7", d(2021, 8, 1)).unwrap(), "A");
        assert!(matches!(
            history.team_on("7", d(2022, 1, 1)),
            Err(ReconcileError::UnresolvedTeam { .. })
        ));
        assert!(history.team_on("8", d(2021, 8, 1)).is_err());
    }

    #[test]
    fn parse_year_accepts_decorated_years() {
        assert_eq!(parse_year("2023"), Some(2023));
        assert_eq!(parse_year(" 2023년 "), Some(2023));
        assert_eq!(parse_year("23"), None);
        assert_eq!(parse_year("통산"), None);
    }
}
