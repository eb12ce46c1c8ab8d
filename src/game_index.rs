use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dates::{self, iso};
use crate::error::{ReconcileError, Result};
use crate::table::{Table, columns};
use crate::team_alias::TeamAliases;

/// Shortest game id that still carries the date and both team codes.
pub const MIN_WELL_FORMED_LEN: usize = 12;

/// Structured view of a well-formed game id: `YYYYMMDD` + away code (2) +
/// home code (2) + optional sequence digit, e.g. `20230815LTSS0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameId {
    pub raw: String,
    pub date: NaiveDate,
    pub away_code: String,
    pub home_code: String,
    pub sequence: Option<char>,
}

impl GameId {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() < MIN_WELL_FORMED_LEN || !raw.is_ascii() {
            return None;
        }
        let digits = &raw[..8];
        if !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        let date = NaiveDate::parse_from_str(digits, "%Y%m%d").ok()?;
        let away_code = &raw[8..10];
        let home_code = &raw[10..12];
        let is_code = |code: &str| code.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_code(away_code) || !is_code(home_code) {
            return None;
        }
        let sequence = raw[12..].chars().next().filter(|ch| ch.is_ascii_digit());
        Some(Self {
            raw: raw.to_string(),
            date,
            away_code: away_code.to_string(),
            home_code: home_code.to_string(),
            sequence,
        })
    }
}

/// Date encoded in the first eight characters of a game id, if any.
pub fn date_from_game_id(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let digits = raw.get(..8)?;
    if !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecord {
    pub game_id: String,
    pub date: NaiveDate,
    pub team_home: String,
    pub team_away: String,
    pub status: String,
    pub score_home: Option<i32>,
    pub score_away: Option<i32>,
}

impl GameRecord {
    /// Whether `team` (already canonical) played in this game.
    pub fn involves(&self, team: &str) -> bool {
        self.team_home == team || self.team_away == team
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GameIndexSummary {
    pub games: usize,
    pub date_team_keys: usize,
    pub abbrev_pair_keys: usize,
    pub key_collisions: usize,
    pub duplicate_games: usize,
    pub malformed_ids: usize,
}

/// Lookups from `(date, team)` and `(date, away code, home code)` to game ids.
///
/// Every key is written through [`insert_if_absent`]: the first game seen for
/// a key keeps it and later ones only bump the collision counter.
#[derive(Debug, Clone, Default)]
pub struct GameIndex {
    by_date_team: HashMap<(NaiveDate, String), String>,
    by_abbrev_pair: HashMap<(NaiveDate, String, String), String>,
    records: HashMap<String, GameRecord>,
    team_abbrev: HashMap<String, String>,
    summary: GameIndexSummary,
}

impl GameIndex {
    /// Index `games` in the order given. Team names go through `aliases` so
    /// that lookups with any spelling of a team land on the same key.
    pub fn build(games: impl IntoIterator<Item = GameRecord>, aliases: &TeamAliases) -> Self {
        let mut index = GameIndex::default();
        let mut votes: HashMap<String, HashMap<String, usize>> = HashMap::new();
        let mut seen_games: HashSet<(NaiveDate, String, String, char)> = HashSet::new();

        for mut game in games {
            index.summary.games += 1;
            game.game_id = game.game_id.trim().to_string();
            game.team_home = aliases.normalize(&game.team_home);
            game.team_away = aliases.normalize(&game.team_away);

            let parsed = GameId::parse(&game.game_id);
            let sequence = parsed.as_ref().and_then(|id| id.sequence).unwrap_or('0');
            if !seen_games.insert((
                game.date,
                game.team_home.clone(),
                game.team_away.clone(),
                sequence,
            )) {
                debug!(game_id = %game.game_id, date = %game.date, "duplicate game record");
                index.summary.duplicate_games += 1;
            }

            for team in [&game.team_home, &game.team_away] {
                if team.is_empty() {
                    continue;
                }
                let key = (game.date, team.clone());
                index.register_date_team(key, &game.game_id);
            }

            match &parsed {
                Some(id) => {
                    let key = (game.date, id.away_code.clone(), id.home_code.clone());
                    index.register_abbrev_pair(key, &game.game_id);
                    for (team, code) in [
                        (&game.team_away, &id.away_code),
                        (&game.team_home, &id.home_code),
                    ] {
                        if team.is_empty() {
                            continue;
                        }
                        *votes
                            .entry(team.clone())
                            .or_default()
                            .entry(code.clone())
                            .or_insert(0) += 1;
                    }
                }
                None => index.summary.malformed_ids += 1,
            }

            let game_id = game.game_id.clone();
            if !insert_if_absent(&mut index.records, game_id, game) {
                index.summary.key_collisions += 1;
            }
        }

        index.team_abbrev = majority_abbrev(votes);
        index.summary.date_team_keys = index.by_date_team.len();
        index.summary.abbrev_pair_keys = index.by_abbrev_pair.len();

        info!(
            games = index.summary.games,
            date_team_keys = index.summary.date_team_keys,
            abbrev_pair_keys = index.summary.abbrev_pair_keys,
            malformed_ids = index.summary.malformed_ids,
            "built game index"
        );
        if index.summary.key_collisions > 0 {
            warn!(
                collisions = index.summary.key_collisions,
                duplicate_games = index.summary.duplicate_games,
                "game index kept first-seen ids on key collisions"
            );
        }
        index
    }

    fn register_date_team(&mut self, key: (NaiveDate, String), game_id: &str) {
        let label = format!("{}/{}", iso(key.0), key.1);
        if !insert_if_absent(&mut self.by_date_team, key.clone(), game_id.to_string()) {
            let kept = self.by_date_team.get(&key).cloned().unwrap_or_default();
            self.note_collision(label, kept, game_id);
        }
    }

    fn register_abbrev_pair(&mut self, key: (NaiveDate, String, String), game_id: &str) {
        let label = format!("{}/{}@{}", iso(key.0), key.1, key.2);
        if !insert_if_absent(&mut self.by_abbrev_pair, key.clone(), game_id.to_string()) {
            let kept = self.by_abbrev_pair.get(&key).cloned().unwrap_or_default();
            self.note_collision(label, kept, game_id);
        }
    }

    fn note_collision(&mut self, key: String, kept: String, discarded: &str) {
        self.summary.key_collisions += 1;
        let err = ReconcileError::KeyCollision {
            key,
            kept,
            discarded: discarded.to_string(),
        };
        debug!(%err, "index key collision");
    }

    pub fn by_date_team(&self, date: NaiveDate, team: &str) -> Option<&str> {
        self.by_date_team
            .get(&(date, team.to_string()))
            .map(|s| s.as_str())
    }

    pub fn by_abbrev_pair(&self, date: NaiveDate, away: &str, home: &str) -> Option<&str> {
        self.by_abbrev_pair
            .get(&(date, away.to_string(), home.to_string()))
            .map(|s| s.as_str())
    }

    pub fn record(&self, game_id: &str) -> Option<&GameRecord> {
        self.records.get(game_id)
    }

    /// Majority-vote two-letter code for a canonical team name.
    pub fn abbrev_for(&self, team: &str) -> Option<&str> {
        self.team_abbrev.get(team).map(|s| s.as_str())
    }

    pub fn team_abbrevs(&self) -> &HashMap<String, String> {
        &self.team_abbrev
    }

    pub fn summary(&self) -> &GameIndexSummary {
        &self.summary
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The one place where the first-wins policy lives. Returns `false` when the
/// key was already taken and `value` was discarded.
pub fn insert_if_absent<K: Eq + Hash, V>(map: &mut HashMap<K, V>, key: K, value: V) -> bool {
    match map.entry(key) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(value);
            true
        }
    }
}

/// Most frequent code per team; ties go to the lexicographically smaller code.
fn majority_abbrev(votes: HashMap<String, HashMap<String, usize>>) -> HashMap<String, String> {
    votes
        .into_iter()
        .filter_map(|(team, codes)| {
            codes
                .into_iter()
                .max_by(|(code_a, n_a), (code_b, n_b)| n_a.cmp(n_b).then_with(|| code_b.cmp(code_a)))
                .map(|(code, _)| (team, code))
        })
        .collect()
}

/// Read game records from a games table.
///
/// Rows without a game id are skipped. When the table has no date column, or a
/// row's date does not parse, the date comes from the game id prefix. Returns
/// the records and the number of skipped rows.
pub fn games_from_table(table: &Table) -> Result<(Vec<GameRecord>, usize)> {
    let id_col = columns::GAME_ID.require(&table.headers)?;
    let home_col = columns::TEAM_HOME.require(&table.headers)?;
    let away_col = columns::TEAM_AWAY.require(&table.headers)?;
    let date_col = columns::GAME_DATE.find(&table.headers);
    let status_col = columns::STATUS.find(&table.headers);
    let score_home_col = columns::SCORE_HOME.find(&table.headers);
    let score_away_col = columns::SCORE_AWAY.find(&table.headers);

    let mut games = Vec::with_capacity(table.len());
    let mut skipped = 0usize;
    for (idx, row) in table.rows.iter().enumerate() {
        let cell = |col: usize| row.get(col).map(|s| s.trim()).unwrap_or("");
        let game_id = cell(id_col);
        if game_id.is_empty() {
            skipped += 1;
            continue;
        }
        let date = date_col
            .and_then(|col| dates::parse_date(cell(col), None))
            .or_else(|| date_from_game_id(game_id));
        let Some(date) = date else {
            let err = ReconcileError::malformed(idx + 1, format!("no usable date for game {game_id}"));
            debug!(%err, "skipping game row");
            skipped += 1;
            continue;
        };
        let score = |col: Option<usize>| col.and_then(|c| cell(c).parse::<i32>().ok());
        games.push(GameRecord {
            game_id: game_id.to_string(),
            date,
            team_home: cell(home_col).to_string(),
            team_away: cell(away_col).to_string(),
            status: status_col.map(cell).unwrap_or("").to_string(),
            score_home: score(score_home_col),
            score_away: score(score_away_col),
        });
    }
    Ok((games, skipped))
}

/// Insert a first `date` column derived from each row's game id.
///
/// Tables that already carry a date column are left alone. Returns the number
/// of rows that received a date.
pub fn add_game_dates(table: &mut Table) -> Result<usize> {
    let id_col = columns::GAME_ID.require(&table.headers)?;
    if columns::GAME_DATE.find(&table.headers).is_some() {
        return Ok(0);
    }
    let values = table
        .rows
        .iter()
        .map(|row| {
            row.get(id_col)
                .and_then(|gid| date_from_game_id(gid))
                .map(iso)
                .unwrap_or_default()
        })
        .collect::<Vec<_>>();
    let filled = values.iter().filter(|v| !v.is_empty()).count();
    table.insert_first_column("date", values);
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn parses_well_formed_ids() {
        let id = GameId::parse("20230815LTSS1").unwrap();
        assert_eq!(id.date, d(2023, 8, 15));
        assert_eq!(id.away_code, "LT");
        assert_eq!(id.home_code, "SS");
        assert_eq!(id.sequence, Some('1'));

        let short = GameId::parse("20230815LTSS").unwrap();
        assert_eq!(short.sequence, None);

        assert!(GameId::parse("20230815LT").is_none());
        assert!(GameId::parse("2023-08-15LTSS0").is_none());
        assert!(GameId::parse("20231345LTSS0").is_none());
    }

    #[test]
    fn first_game_wins_on_both_indices() {
        let index = GameIndex::build(
            vec![
                game("20230815LTSS0", d(2023, 8, 15), "롯데", "삼성"),
                game("20230815LTSS9", d(2023, 8, 15), "롯데", "삼성"),
            ],
            &TeamAliases::with_defaults(),
        );
        assert_eq!(index.by_date_team(d(2023, 8, 15), "롯데"), Some("20230815LTSS0"));
        assert_eq!(index.by_date_team(d(2023, 8, 15), "삼성"), Some("20230815LTSS0"));
        assert_eq!(index.by_abbrev_pair(d(2023, 8, 15), "LT", "SS"), Some("20230815LTSS0"));
        assert_eq!(index.summary().key_collisions, 3);
    }

    #[test]
    fn team_names_are_normalized_before_indexing() {
        let index = GameIndex::build(
            vec![game("20230815HTSK0", d(2023, 8, 15), "기아 타이거즈", "SK Wyverns")],
            &TeamAliases::with_defaults(),
        );
        assert_eq!(index.by_date_team(d(2023, 8, 15), "KIA"), Some("20230815HTSK0"));
        assert_eq!(index.by_date_team(d(2023, 8, 15), "SSG"), Some("20230815HTSK0"));
        assert!(index.record("20230815HTSK0").unwrap().involves("SSG"));
    }

    #[test]
    fn majority_vote_picks_most_frequent_code() {
        let index = GameIndex::build(
            vec![
                game("20210401SKLG0", d(2021, 4, 1), "SSG", "LG"),
                game("20210402SKLG0", d(2021, 4, 2), "SSG", "LG"),
                game("20210403SSLG0", d(2021, 4, 3), "SSG", "LG"),
            ],
            &TeamAliases::empty(),
        );
        assert_eq!(index.abbrev_for("SSG"), Some("SK"));
        assert_eq!(index.abbrev_for("LG"), Some("LG"));
    }

    #[test]
    fn majority_vote_ties_break_lexicographically() {
        let mut votes = HashMap::new();
        votes.insert(
            "KIA".to_string(),
            HashMap::from([("KI".to_string(), 2), ("HT".to_string(), 2)]),
        );
        assert_eq!(majority_abbrev(votes).get("KIA").map(String::as_str), Some("HT"));
    }

    #[test]
    fn games_without_date_column_use_id_prefix() {
        let table = Table::from_rows(
            vec!["game_id".into(), "TEAM_AWAY".into(), "TEAM_HOME".into()],
            vec![
                vec!["20240501NCOB0".into(), "NC".into(), "두산".into()],
                vec!["".into(), "NC".into(), "두산".into()],
                vec!["garbage".into(), "NC".into(), "두산".into()],
            ],
        );
        let (games, skipped) = games_from_table(&table).unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].date, d(2024, 5, 1));
        assert_eq!(skipped, 2);
    }

    #[test]
    fn add_game_dates_inserts_first_column() {
        let mut table = Table::from_rows(
            vec!["game_id".into(), "TEAM_AWAY".into()],
            vec![vec!["20240501NCOB0".into(), "NC".into()], vec!["x".into(), "NC".into()]],
        );
        assert_eq!(add_game_dates(&mut table).unwrap(), 1);
        assert_eq!(table.headers[0], "date");
        assert_eq!(table.rows[0][0], "2024-05-01");
        assert_eq!(table.rows[1][0], "");
        assert_eq!(add_game_dates(&mut table).unwrap(), 0);
    }
}
