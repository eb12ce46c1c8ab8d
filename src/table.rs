use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use encoding_rs::EUC_KR;
use tracing::debug;

use crate::error::{ReconcileError, Result};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Which encoding a table was decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Utf8Bom,
    Utf8,
    /// CP949 / EUC-KR, the legacy encoding of the source site's exports.
    Legacy,
}

/// A fully materialized CSV table. Rows are padded to the header width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let mut table = Self::new(headers);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    pub fn push_row(&mut self, mut row: Vec<String>) {
        if row.len() < self.headers.len() {
            row.resize(self.headers.len(), String::new());
        }
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn set_cell(&mut self, row: usize, col: usize, value: impl Into<String>) {
        if let Some(r) = self.rows.get_mut(row) {
            if r.len() <= col {
                r.resize(col + 1, String::new());
            }
            r[col] = value.into();
        }
    }

    /// Insert a column at position 0 holding `values` (padded with empties).
    pub fn insert_first_column(&mut self, name: &str, values: Vec<String>) {
        self.headers.insert(0, name.to_string());
        let mut values = values.into_iter();
        for row in &mut self.rows {
            row.insert(0, values.next().unwrap_or_default());
        }
    }

    /// Move an existing column to position 0.
    pub fn move_column_first(&mut self, col: usize) {
        if col == 0 || col >= self.headers.len() {
            return;
        }
        let header = self.headers.remove(col);
        self.headers.insert(0, header);
        for row in &mut self.rows {
            if col < row.len() {
                let cell = row.remove(col);
                row.insert(0, cell);
            }
        }
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
        let to_err = |source: csv::Error| ReconcileError::Csv {
            path: PathBuf::from("<memory>"),
            source,
        };
        writer.write_record(&self.headers).map_err(to_err)?;
        for row in &self.rows {
            writer.write_record(row).map_err(to_err)?;
        }
        let bytes = writer.into_inner().map_err(|e| ReconcileError::Io {
            path: PathBuf::from("<memory>"),
            source: e.into_error(),
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Trimmed player id; float-looking numeric ids (`55460.0`) lose the fraction.
/// Empty and `nan` cells yield `None`.
pub fn normalize_id(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return None;
    }
    if let Some((int_part, frac)) = s.split_once('.')
        && !int_part.is_empty()
        && int_part.chars().all(|ch| ch.is_ascii_digit())
        && frac.chars().all(|ch| ch == '0')
    {
        return Some(strip_leading_zeros(int_part));
    }
    if s.chars().all(|ch| ch.is_ascii_digit()) {
        return Some(strip_leading_zeros(s));
    }
    Some(s.to_string())
}

fn strip_leading_zeros(digits: &str) -> String {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Decode raw bytes through the encoding chain: UTF-8 with BOM, plain UTF-8,
/// then the legacy Korean code page. Fails only when all three reject the input.
pub fn decode_bytes(bytes: &[u8]) -> Option<(String, SourceEncoding)> {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        return std::str::from_utf8(rest)
            .ok()
            .map(|s| (s.to_string(), SourceEncoding::Utf8Bom));
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        return Some((s.to_string(), SourceEncoding::Utf8));
    }
    EUC_KR
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|s| (s.into_owned(), SourceEncoding::Legacy))
}

pub fn parse_table(text: &str) -> std::result::Result<Table, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();
    let mut table = Table::new(headers);
    for record in reader.records() {
        let record = record?;
        let row = record.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        table.push_row(row);
    }
    Ok(table)
}

pub fn read_table(path: &Path) -> Result<Table> {
    let bytes = fs::read(path).map_err(|e| ReconcileError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let (text, encoding) = decode_bytes(&bytes).ok_or_else(|| ReconcileError::Unreadable {
        path: path.to_path_buf(),
        reason: "not valid UTF-8 or CP949".to_string(),
    })?;
    debug!(path = %path.display(), ?encoding, "decoded table");
    parse_table(&text).map_err(|e| ReconcileError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Write `table` as UTF-8 with BOM to a sibling temp file, then rename it over
/// `path`. A failed run never leaves a half-written table behind.
pub fn write_table_atomic(path: &Path, table: &Table) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| ReconcileError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let body = table.to_csv_string()?;
    let tmp = tmp_path(path);
    let io_err = |source| ReconcileError::Io {
        path: tmp.clone(),
        source,
    };
    let mut file = fs::File::create(&tmp).map_err(io_err)?;
    file.write_all(UTF8_BOM).map_err(io_err)?;
    file.write_all(body.as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    fs::rename(&tmp, path).map_err(|source| ReconcileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// How a [`ColumnSpec`] candidate is compared against a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// Trimmed, ASCII-case-insensitive equality.
    Exact,
    /// Header contains the candidate (ASCII-case-insensitive).
    Contains,
}

/// Ordered candidate list for one logical column.
///
/// Candidates are tried in priority order; each candidate is checked against
/// every header before moving to the next one.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub label: &'static str,
    pub candidates: &'static [(&'static str, Match)],
}

impl ColumnSpec {
    pub fn find(&self, headers: &[String]) -> Option<usize> {
        for (candidate, mode) in self.candidates {
            let wanted = candidate.to_lowercase();
            let hit = headers.iter().position(|h| {
                let h = h.trim().to_lowercase();
                match mode {
                    Match::Exact => h == wanted,
                    Match::Contains => h.contains(&wanted),
                }
            });
            if hit.is_some() {
                return hit;
            }
        }
        None
    }

    pub fn require(&self, headers: &[String]) -> Result<usize> {
        self.find(headers).ok_or_else(|| {
            ReconcileError::malformed(0, format!("missing {} column (headers: {headers:?})", self.label))
        })
    }
}

pub mod columns {
    use super::{ColumnSpec, Match};

    pub const GAME_ID: ColumnSpec = ColumnSpec {
        label: "game id",
        candidates: &[
            ("GAME_ID", Match::Exact),
            ("game_id", Match::Exact),
            ("gameid", Match::Exact),
            ("게임ID", Match::Exact),
            ("경기ID", Match::Exact),
        ],
    };

    pub const GAME_DATE: ColumnSpec = ColumnSpec {
        label: "date",
        candidates: &[
            ("GAME_DATE", Match::Exact),
            ("game_date", Match::Exact),
            ("date", Match::Exact),
            ("일자", Match::Exact),
            ("날짜", Match::Exact),
            ("date", Match::Contains),
        ],
    };

    pub const TEAM_HOME: ColumnSpec = ColumnSpec {
        label: "home team",
        candidates: &[
            ("TEAM_HOME", Match::Exact),
            ("team_home", Match::Exact),
            ("home", Match::Exact),
            ("홈팀", Match::Exact),
        ],
    };

    pub const TEAM_AWAY: ColumnSpec = ColumnSpec {
        label: "away team",
        candidates: &[
            ("TEAM_AWAY", Match::Exact),
            ("team_away", Match::Exact),
            ("away", Match::Exact),
            ("원정팀", Match::Exact),
        ],
    };

    pub const STATUS: ColumnSpec = ColumnSpec {
        label: "status",
        candidates: &[("status", Match::Exact), ("상태", Match::Exact)],
    };

    pub const SCORE_HOME: ColumnSpec = ColumnSpec {
        label: "home score",
        candidates: &[
            ("score_home", Match::Exact),
            ("SCORE_HOME", Match::Exact),
            ("home_score", Match::Exact),
        ],
    };

    pub const SCORE_AWAY: ColumnSpec = ColumnSpec {
        label: "away score",
        candidates: &[
            ("score_away", Match::Exact),
            ("SCORE_AWAY", Match::Exact),
            ("away_score", Match::Exact),
        ],
    };

    pub const OPPONENT: ColumnSpec = ColumnSpec {
        label: "opponent",
        candidates: &[
            ("OPPONENT", Match::Exact),
            ("opponent", Match::Exact),
            ("상대", Match::Exact),
            ("상대팀", Match::Exact),
        ],
    };

    pub const PLAYER_ID: ColumnSpec = ColumnSpec {
        label: "player id",
        candidates: &[
            ("PLAYER_ID", Match::Exact),
            ("player_id", Match::Exact),
            ("playerid", Match::Exact),
            ("선수_ID", Match::Exact),
            ("선수ID", Match::Exact),
            ("id", Match::Exact),
            ("player_id", Match::Contains),
            ("선수_id", Match::Contains),
        ],
    };

    pub const PLAYER_NAME: ColumnSpec = ColumnSpec {
        label: "player name",
        candidates: &[
            ("name", Match::Exact),
            ("player_name", Match::Exact),
            ("선수명", Match::Exact),
            ("이름", Match::Exact),
            ("선수명", Match::Contains),
            ("name", Match::Contains),
        ],
    };

    pub const YEAR: ColumnSpec = ColumnSpec {
        label: "year",
        candidates: &[("year", Match::Exact), ("season", Match::Exact), ("연도", Match::Exact)],
    };

    pub const TEAM: ColumnSpec = ColumnSpec {
        label: "team",
        candidates: &[
            ("team", Match::Exact),
            ("TEAM", Match::Exact),
            ("팀명", Match::Exact),
            ("팀", Match::Exact),
        ],
    };

    pub const START_DATE: ColumnSpec = ColumnSpec {
        label: "start date",
        candidates: &[("start_date", Match::Exact)],
    };

    pub const END_DATE: ColumnSpec = ColumnSpec {
        label: "end date",
        candidates: &[("end_date", Match::Exact)],
    };

    pub const BACK_NUMBER: ColumnSpec = ColumnSpec {
        label: "uniform number",
        candidates: &[
            ("등번호", Match::Exact),
            ("back_number", Match::Exact),
            ("번호", Match::Contains),
            ("no", Match::Exact),
        ],
    };

    pub const POSITION: ColumnSpec = ColumnSpec {
        label: "position",
        candidates: &[
            ("포지션", Match::Exact),
            ("position", Match::Exact),
            ("포지션", Match::Contains),
            ("position", Match::Contains),
        ],
    };

    pub const BATS_THROWS: ColumnSpec = ColumnSpec {
        label: "bats/throws",
        candidates: &[("투타", Match::Exact), ("bats_throws", Match::Exact)],
    };

    pub const HEIGHT_CM: ColumnSpec = ColumnSpec {
        label: "height (cm)",
        candidates: &[("신장_cm", Match::Exact), ("height_cm", Match::Exact)],
    };

    pub const WEIGHT_KG: ColumnSpec = ColumnSpec {
        label: "weight (kg)",
        candidates: &[("체중_kg", Match::Exact), ("weight_kg", Match::Exact)],
    };

    pub const HEIGHT_WEIGHT: ColumnSpec = ColumnSpec {
        label: "height/weight",
        candidates: &[
            ("신장/체중", Match::Exact),
            ("height/weight", Match::Exact),
            ("신장", Match::Contains),
            ("height", Match::Contains),
        ],
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalize_id_drops_float_suffix() {
        assert_eq!(normalize_id("55460.0").as_deref(), Some("55460"));
        assert_eq!(normalize_id(" 55460 ").as_deref(), Some("55460"));
        assert_eq!(normalize_id("nan"), None);
        assert_eq!(normalize_id(""), None);
        assert_eq!(normalize_id("A-17").as_deref(), Some("A-17"));
    }

    #[test]
    fn column_spec_prefers_earlier_candidates() {
        let h = headers(&["date_scraped", "일자", "상대"]);
        assert_eq!(columns::GAME_DATE.find(&h), Some(1));
        let h = headers(&["scraped_date", "x"]);
        assert_eq!(columns::GAME_DATE.find(&h), Some(0));
        assert_eq!(columns::OPPONENT.find(&headers(&["a", "b"])), None);
    }

    #[test]
    fn column_spec_is_case_insensitive() {
        let h = headers(&[" game_date ", "Opponent"]);
        assert_eq!(columns::GAME_DATE.find(&h), Some(0));
        assert_eq!(columns::OPPONENT.find(&h), Some(1));
    }

    #[test]
    fn missing_required_column_is_malformed() {
        let err = columns::OPPONENT.require(&headers(&["a"])).unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedRow { .. }));
    }

    #[test]
    fn decode_chain_handles_bom_and_legacy() {
        let mut bom = UTF8_BOM.to_vec();
        bom.extend_from_slice("a,b\n1,2\n".as_bytes());
        let (text, enc) = decode_bytes(&bom).unwrap();
        assert_eq!(enc, SourceEncoding::Utf8Bom);
        assert!(text.starts_with("a,b"));

        let (legacy, _, _) = EUC_KR.encode("일자,상대\n");
        let (text, enc) = decode_bytes(&legacy).unwrap();
        assert_eq!(enc, SourceEncoding::Legacy);
        assert_eq!(text, "일자,상대\n");
    }

    #[test]
    fn parse_table_pads_short_rows_and_skips_blank_lines() {
        let t = parse_table("a,b,c\n1,2\n,,\n4,5,6\n").unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.rows[0], vec!["1", "2", ""]);
    }

    #[test]
    fn insert_and_move_columns() {
        let mut t = Table::from_rows(headers(&["a", "b"]), vec![headers(&["1", "2"])]);
        t.insert_first_column("id", vec!["x".into()]);
        assert_eq!(t.headers, headers(&["id", "a", "b"]));
        assert_eq!(t.rows[0], headers(&["x", "1", "2"]));
        t.move_column_first(2);
        assert_eq!(t.headers, headers(&["b", "id", "a"]));
        assert_eq!(t.rows[0], headers(&["2", "x", "1"]));
    }
}
