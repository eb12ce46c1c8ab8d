use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::dates::{self, iso};
use crate::error::{ReconcileError, Result};
use crate::game_index::GameIndex;
use crate::table::{Table, columns, normalize_id};
use crate::team_alias::TeamAliases;
use crate::team_history::TeamHistory;

/// One per-player daily stat line, reduced to what identifies its game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStatRow {
    pub player_id: Option<String>,
    pub date: NaiveDate,
    pub opponent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvePath {
    /// `(date, opponent)` probe of the date-team index.
    DateTeam,
    /// `(date, away code, home code)` probe after resolving the player's team.
    AbbrevPair,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub game_id: String,
    pub path: ResolvePath,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveSummary {
    pub rows: usize,
    pub resolved_by_team: usize,
    pub resolved_by_abbrev: usize,
    pub unresolved_team: usize,
    pub unresolved_game_id: usize,
    pub malformed_rows: usize,
    pub dates_normalized: usize,
    pub skipped_existing: bool,
}

impl ResolveSummary {
    pub fn resolved(&self) -> usize {
        self.resolved_by_team + self.resolved_by_abbrev
    }

    pub fn unresolved(&self) -> usize {
        self.unresolved_team + self.unresolved_game_id
    }
}

/// Attaches game ids to daily rows using only index-verified lookups.
///
/// An id is never built from parts: if neither index holds a matching game
/// the row stays unresolved.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    aliases: &'a TeamAliases,
    history: &'a TeamHistory,
    games: &'a GameIndex,
}

impl<'a> Resolver<'a> {
    pub fn new(aliases: &'a TeamAliases, history: &'a TeamHistory, games: &'a GameIndex) -> Self {
        Self {
            aliases,
            history,
            games,
        }
    }

    pub fn resolve(&self, row: &DailyStatRow) -> Result<Resolution> {
        let opponent = self.aliases.normalize(&row.opponent);
        let own_team = row
            .player_id
            .as_deref()
            .and_then(|pid| self.history.team_on(pid, row.date).ok());

        if !opponent.is_empty()
            && let Some(game_id) = self.games.by_date_team(row.date, &opponent)
        {
            let verified = match own_team {
                Some(team) => self
                    .games
                    .record(game_id)
                    .is_some_and(|game| team != opponent && game.involves(team)),
                None => true,
            };
            if verified {
                return Ok(Resolution {
                    game_id: game_id.to_string(),
                    path: ResolvePath::DateTeam,
                });
            }
            debug!(
                game_id,
                date = %row.date,
                opponent = %opponent,
                "date-team hit does not involve the player's team"
            );
        }

        let unresolved_game = || ReconcileError::UnresolvedGameId {
            date: row.date,
            opponent: row.opponent.trim().to_string(),
        };
        let Some(player_id) = row.player_id.as_deref() else {
            return Err(unresolved_game());
        };
        let team = self.history.team_on(player_id, row.date)?;
        let own_code = self.games.abbrev_for(team).ok_or_else(unresolved_game)?;
        let opp_code = self
            .games
            .abbrev_for(&opponent)
            .map(|s| s.to_string())
            .or_else(|| literal_abbrev(&row.opponent))
            .ok_or_else(unresolved_game)?;

        let hit = self
            .games
            .by_abbrev_pair(row.date, own_code, &opp_code)
            .or_else(|| self.games.by_abbrev_pair(row.date, &opp_code, own_code));
        match hit {
            Some(game_id) => Ok(Resolution {
                game_id: game_id.to_string(),
                path: ResolvePath::AbbrevPair,
            }),
            None => Err(unresolved_game()),
        }
    }

    /// Resolve `row`, folding the outcome into `summary`. Unresolved rows
    /// come back as `None` and bump exactly one counter.
    pub fn resolve_counted(&self, row: &DailyStatRow, summary: &mut ResolveSummary) -> Option<String> {
        match self.resolve(row) {
            Ok(resolution) => {
                match resolution.path {
                    ResolvePath::DateTeam => summary.resolved_by_team += 1,
                    ResolvePath::AbbrevPair => summary.resolved_by_abbrev += 1,
                }
                Some(resolution.game_id)
            }
            Err(err) => {
                debug!(%err, "row left unresolved");
                match err {
                    ReconcileError::UnresolvedTeam { .. } => summary.unresolved_team += 1,
                    _ => summary.unresolved_game_id += 1,
                }
                None
            }
        }
    }

    /// Add a first `column` holding the resolved game id of every row.
    ///
    /// Tables that already carry a game id column are skipped unless `force`
    /// is set, in which case that column is recomputed and moved first.
    /// Parsed dates are rewritten as `YYYY-MM-DD`; year-less dates take their
    /// year from the row's year column, else from `year_hint`.
    pub fn attach_to_table(
        &self,
        table: &mut Table,
        column: &str,
        year_hint: Option<i32>,
        force: bool,
    ) -> Result<ResolveSummary> {
        let mut summary = ResolveSummary::default();
        let existing = columns::GAME_ID
            .find(&table.headers)
            .or_else(|| table.column_index(column));
        if existing.is_some() && !force {
            summary.skipped_existing = true;
            return Ok(summary);
        }

        let date_col = columns::GAME_DATE.require(&table.headers)?;
        let opp_col = columns::OPPONENT.require(&table.headers)?;
        let pid_col = columns::PLAYER_ID.find(&table.headers);
        let year_col = columns::YEAR.find(&table.headers);

        let mut ids = Vec::with_capacity(table.len());
        for idx in 0..table.len() {
            summary.rows += 1;
            let row_year = year_col.and_then(|col| table.cell(idx, col).trim().parse::<i32>().ok());
            let raw_date = table.cell(idx, date_col).to_string();
            let Some(date) = dates::parse_date(&raw_date, row_year.or(year_hint)) else {
                let err = ReconcileError::malformed(idx + 1, format!("unparseable date {raw_date:?}"));
                debug!(%err, "daily row skipped");
                summary.malformed_rows += 1;
                ids.push(String::new());
                continue;
            };
            let normalized = iso(date);
            if normalized != raw_date {
                table.set_cell(idx, date_col, normalized);
                summary.dates_normalized += 1;
            }

            let row = DailyStatRow {
                player_id: pid_col.and_then(|col| normalize_id(table.cell(idx, col))),
                date,
                opponent: table.cell(idx, opp_col).to_string(),
            };
            ids.push(self.resolve_counted(&row, &mut summary).unwrap_or_default());
        }

        match existing {
            Some(col) => {
                for (idx, id) in ids.into_iter().enumerate() {
                    table.set_cell(idx, col, id);
                }
                table.move_column_first(col);
            }
            None => table.insert_first_column(column, ids),
        }
        Ok(summary)
    }
}

/// An opponent already written as a 2-3 letter uppercase code.
fn literal_abbrev(raw: &str) -> Option<String> {
    let s = raw.trim();
    let looks_like_code = (2..=3).contains(&s.len())
        && s.chars().all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit())
        && s.chars().any(|ch| ch.is_ascii_uppercase());
    looks_like_code.then(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_index::GameRecord;
    use crate::team_history::TeamObservation;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn game(id: &str, date: NaiveDate, away: &str, home: &str) -> GameRecord {
        GameRecord {
            game_id: id.to_string(),
            date,
            team_home: home.to_string(),
            team_away: away.to_string(),
            status: String::new(),
            score_home: None,
            score_away: None,
        }
    }

    fn history(rows: &[(&str, &str, &str)]) -> TeamHistory {
        let obs = rows
            .iter()
            .enumerate()
            .map(|(order, (pid, year, team))| TeamObservation {
                player_id: pid.to_string(),
                name: String::new(),
                year: year.to_string(),
                team: team.to_string(),
                order,
            })
            .collect::<Vec<_>>();
        TeamHistory::build(obs, &TeamAliases::empty()).0
    }

    fn row(pid: Option<&str>, date: NaiveDate, opponent: &str) -> DailyStatRow {
        DailyStatRow {
            player_id: pid.map(str::to_string),
            date,
            opponent: opponent.to_string(),
        }
    }

    #[test]
    fn date_team_probe_resolves_opponent() {
        let aliases = TeamAliases::empty();
        let games = GameIndex::build(vec![game("20230815XXYY0", d(2023, 8, 15), "A", "B")], &aliases);
        let hist = history(&[("1", "2023", "A")]);
        let resolver = Resolver::new(&aliases, &hist, &games);
        let out = resolver.resolve(&row(Some("1"), d(2023, 8, 15), "B")).unwrap();
        assert_eq!(out.game_id, "20230815XXYY0");
        assert_eq!(out.path, ResolvePath::DateTeam);
    }

    #[test]
    fn date_team_hit_for_another_team_falls_through() {
        let aliases = TeamAliases::empty();
        // B plays C; the player is on A and has no game that day.
        let games = GameIndex::build(vec![game("20230815CCBB0", d(2023, 8, 15), "C", "B")], &aliases);
        let hist = history(&[("1", "2023", "A")]);
        let resolver = Resolver::new(&aliases, &hist, &games);
        let err = resolver.resolve(&row(Some("1"), d(2023, 8, 15), "B")).unwrap_err();
        assert!(matches!(err, ReconcileError::UnresolvedGameId { .. }));
    }

    #[test]
    fn abbrev_pair_probe_tries_both_orders() {
        let aliases = TeamAliases::empty();
        let games = GameIndex::build(
            vec![
                game("20230801AABB0", d(2023, 8, 1), "A", "B"),
                game("20230815BBAA0", d(2023, 8, 15), "B", "A"),
            ],
            &aliases,
        );
        let hist = history(&[("1", "2023", "A")]);
        let resolver = Resolver::new(&aliases, &hist, &games);
        // "BB" is no team name, so only the code lookup can find the game.
        let out = resolver.resolve(&row(Some("1"), d(2023, 8, 15), "BB")).unwrap();
        assert_eq!(out.game_id, "20230815BBAA0");
        assert_eq!(out.path, ResolvePath::AbbrevPair);
    }

    #[test]
    fn unresolved_team_counts_once() {
        let aliases = TeamAliases::empty();
        let games = GameIndex::build(vec![game("20230815XXYY0", d(2023, 8, 15), "A", "B")], &aliases);
        let hist = history(&[("1", "2022", "A")]);
        let resolver = Resolver::new(&aliases, &hist, &games);
        let mut summary = ResolveSummary::default();
        let out = resolver.resolve_counted(&row(Some("1"), d(2023, 8, 16), "B"), &mut summary);
        assert_eq!(out, None);
        assert_eq!(summary.unresolved_team, 1);
        assert_eq!(summary.unresolved(), 1);
    }

    #[test]
    fn no_index_hit_never_synthesizes_an_id() {
        let aliases = TeamAliases::empty();
        let games = GameIndex::build(vec![game("20230815XXYY0", d(2023, 8, 15), "A", "B")], &aliases);
        let hist = history(&[("1", "2023", "A")]);
        let resolver = Resolver::new(&aliases, &hist, &games);
        let mut summary = ResolveSummary::default();
        assert_eq!(resolver.resolve_counted(&row(Some("1"), d(2023, 8, 16), "B"), &mut summary), None);
        assert_eq!(summary.unresolved_game_id, 1);
        assert_eq!(summary.unresolved_team, 0);
    }

    #[test]
    fn attach_inserts_first_column_and_normalizes_dates() {
        let aliases = TeamAliases::with_defaults();
        let games = GameIndex::build(vec![game("20220404LTSS0", d(2022, 4, 4), "롯데", "삼성")], &aliases);
        let hist = TeamHistory::default();
        let resolver = Resolver::new(&aliases, &hist, &games);
        let mut table = Table::from_rows(
            vec!["PLAYER_ID".into(), "일자".into(), "상대".into()],
            vec![
                vec!["9".into(), "04.04".into(), "삼성".into()],
                vec!["9".into(), "??".into(), "삼성".into()],
            ],
        );
        let summary = resolver.attach_to_table(&mut table, "GAME_ID", Some(2022), false).unwrap();
        assert_eq!(table.headers[0], "GAME_ID");
        assert_eq!(table.rows[0][0], "20220404LTSS0");
        assert_eq!(table.rows[0][2], "2022-04-04");
        assert_eq!(table.rows[1][0], "");
        assert_eq!(summary.resolved(), 1);
        assert_eq!(summary.malformed_rows, 1);

        let again = resolver.attach_to_table(&mut table, "GAME_ID", Some(2022), false).unwrap();
        assert!(again.skipped_existing);
    }

    #[test]
    fn literal_abbrev_accepts_short_uppercase_codes() {
        assert_eq!(literal_abbrev(" LT ").as_deref(), Some("LT"));
        assert_eq!(literal_abbrev("SSG").as_deref(), Some("SSG"));
        assert_eq!(literal_abbrev("Lotte"), None);
        assert_eq!(literal_abbrev("lt"), None);
    }
}
