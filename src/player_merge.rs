use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, Result};
use crate::table::{Table, columns, normalize_id, read_table};

/// Statistical role implied by the file a player id was seen in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Hitter,
    Pitcher,
    Defense,
    Runner,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Hitter, Role::Pitcher, Role::Defense, Role::Runner];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Hitter => "hitter",
            Role::Pitcher => "pitcher",
            Role::Defense => "defense",
            Role::Runner => "runner",
        }
    }

    /// First role keyword found in the file name, checked in declaration order.
    pub fn from_path(path: &Path) -> Option<Role> {
        let name = path.file_name()?.to_str()?.to_lowercase();
        Role::ALL.into_iter().find(|role| name.contains(role.as_str()))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One player row as scraped from one page or file, before merging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerFragment {
    pub player_id: String,
    pub name: String,
    pub role: Option<Role>,
    pub back_number: String,
    pub position: String,
    pub bats_throws: String,
    pub height_weight: String,
}

/// Merged, cleaned attributes of one player id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlayerAttributeRecord {
    pub player_id: String,
    pub name: String,
    pub back_number: Option<u32>,
    pub position: String,
    pub bats_throws: String,
    pub height_cm: Option<u32>,
    pub weight_kg: Option<u32>,
    pub roles: BTreeSet<Role>,
}

pub const ATTRIBUTE_HEADERS: [&str; 7] = ["선수_ID", "선수명", "등번호", "포지션", "투타", "신장_cm", "체중_kg"];

/// How a bare name was (or was not) turned into a player id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameResolution {
    Unique(String),
    ByRole(String),
    Unknown,
    Ambiguous(Vec<String>),
}

impl NameResolution {
    pub fn player_id(&self) -> Option<&str> {
        match self {
            NameResolution::Unique(id) | NameResolution::ByRole(id) => Some(id.as_str()),
            _ => None,
        }
    }
}

/// Player id -> roles it was observed in.
#[derive(Debug, Clone, Default)]
pub struct RoleIndex {
    by_id: HashMap<String, BTreeSet<Role>>,
}

impl RoleIndex {
    pub fn insert(&mut self, player_id: &str, role: Role) {
        if let Some(id) = normalize_id(player_id) {
            self.by_id.entry(id).or_default().insert(role);
        }
    }

    pub fn has_role(&self, player_id: &str, role: Role) -> bool {
        self.by_id
            .get(player_id)
            .is_some_and(|roles| roles.contains(&role))
    }

    pub fn roles(&self, player_id: &str) -> Option<&BTreeSet<Role>> {
        self.by_id.get(player_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Record every id in `table` under `role`. Falls back to the first
    /// column when no id-like header exists.
    pub fn add_table(&mut self, role: Role, table: &Table) {
        let Some(col) = columns::PLAYER_ID
            .find(&table.headers)
            .or_else(|| (!table.headers.is_empty()).then_some(0))
        else {
            return;
        };
        for idx in 0..table.len() {
            self.insert(table.cell(idx, col), role);
        }
    }

    fn absorb(&mut self, other: RoleIndex) {
        for (id, roles) in other.by_id {
            self.by_id.entry(id).or_default().extend(roles);
        }
    }

    /// Scan statistics files in parallel. Files whose name carries no role
    /// keyword are ignored; unreadable files are reported and skipped.
    pub fn scan(paths: &[PathBuf]) -> (Self, Vec<String>) {
        let results: Vec<(RoleIndex, Option<String>)> = paths
            .par_iter()
            .filter_map(|path| Role::from_path(path).map(|role| (path, role)))
            .map(|(path, role)| match read_table(path) {
                Ok(table) => {
                    let mut index = RoleIndex::default();
                    index.add_table(role, &table);
                    (index, None)
                }
                Err(err) => (RoleIndex::default(), Some(err.to_string())),
            })
            .collect();

        let mut index = RoleIndex::default();
        let mut errors = Vec::new();
        for (part, err) in results {
            if let Some(err) = err {
                errors.push(err);
            }
            index.absorb(part);
        }
        info!(files = paths.len(), ids = index.len(), "scanned player roles");
        (index, errors)
    }
}

/// One record per player id plus the name -> ids map used to link bare names.
#[derive(Debug, Clone, Default)]
pub struct PlayerRegistry {
    records: HashMap<String, PlayerAttributeRecord>,
    name_to_ids: HashMap<String, BTreeSet<String>>,
    malformed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeSummary {
    pub fragments: usize,
    pub players: usize,
    pub malformed: usize,
    pub duplicate_names: usize,
}

impl PlayerRegistry {
    /// Merge fragments in the order given. The first non-empty value of each
    /// field wins; every observed `(name, id)` pair feeds the name map.
    pub fn merge(fragments: impl IntoIterator<Item = PlayerFragment>) -> Self {
        let mut registry = PlayerRegistry::default();
        for fragment in fragments {
            registry.absorb(fragment);
        }
        let dups = registry.duplicate_names();
        if !dups.is_empty() {
            warn!(names = dups.len(), "names shared by more than one player id");
        }
        registry
    }

    fn absorb(&mut self, fragment: PlayerFragment) {
        let Some(player_id) = normalize_id(&fragment.player_id) else {
            self.malformed += 1;
            return;
        };
        let name = clean_name(&fragment.name);
        if !name.is_empty() {
            self.name_to_ids
                .entry(name.to_string())
                .or_default()
                .insert(player_id.clone());
        }

        let record = self
            .records
            .entry(player_id.clone())
            .or_insert_with(|| PlayerAttributeRecord {
                player_id,
                ..PlayerAttributeRecord::default()
            });
        if record.name.is_empty() {
            record.name = name.to_string();
        }
        if let Some(role) = fragment.role {
            record.roles.insert(role);
        }
        if record.back_number.is_none() {
            record.back_number = clean_back_number(&fragment.back_number);
        }
        let (position, hand) = split_position_and_hand(&fragment.position);
        if record.position.is_empty() {
            record.position = position;
        }
        if record.bats_throws.is_empty() {
            record.bats_throws = if hand.is_empty() {
                fragment.bats_throws.trim().to_string()
            } else {
                hand
            };
        }
        let (height, weight) = split_height_weight(&fragment.height_weight);
        if record.height_cm.is_none() {
            record.height_cm = height;
        }
        if record.weight_kg.is_none() {
            record.weight_kg = weight;
        }
    }

    pub fn get(&self, player_id: &str) -> Option<&PlayerAttributeRecord> {
        self.records.get(player_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Names observed with two or more distinct ids.
    pub fn duplicate_names(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.name_to_ids
            .iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(name, ids)| (name.clone(), ids.clone()))
            .collect()
    }

    pub fn summary(&self, fragments: usize) -> MergeSummary {
        MergeSummary {
            fragments,
            players: self.records.len(),
            malformed: self.malformed,
            duplicate_names: self.duplicate_names().len(),
        }
    }

    /// Attach an id to a bare name. A shared name is settled only when
    /// exactly one of its ids has `role`; anything else stays unresolved.
    pub fn resolve_name(&self, name: &str, role: Option<Role>, roles: &RoleIndex) -> NameResolution {
        let Some(ids) = self.name_to_ids.get(name.trim()) else {
            return NameResolution::Unknown;
        };
        let candidates = ids.iter().cloned().collect::<Vec<_>>();
        if let [only] = candidates.as_slice() {
            return NameResolution::Unique(only.clone());
        }
        if let Some(role) = role {
            let matching = candidates
                .iter()
                .filter(|id| roles.has_role(id, role))
                .collect::<Vec<_>>();
            if let [only] = matching.as_slice() {
                return NameResolution::ByRole((*only).clone());
            }
        }
        NameResolution::Ambiguous(candidates)
    }

    /// Records sorted by name, then id.
    pub fn to_table(&self) -> Table {
        let mut records = self.records.values().collect::<Vec<_>>();
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.player_id.cmp(&b.player_id)));
        let mut table = Table::new(ATTRIBUTE_HEADERS.iter().map(|h| h.to_string()).collect());
        let opt = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();
        for r in records {
            table.push_row(vec![
                r.player_id.clone(),
                r.name.clone(),
                opt(r.back_number),
                r.position.clone(),
                r.bats_throws.clone(),
                opt(r.height_cm),
                opt(r.weight_kg),
            ]);
        }
        table
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkSummary {
    pub rows: usize,
    pub linked: usize,
    pub by_role: usize,
    pub ambiguous: usize,
    pub unknown: usize,
    pub skipped_existing: bool,
}

/// Insert a first `player_id` column into a name-only stats table.
pub fn link_ids_in_table(
    table: &mut Table,
    registry: &PlayerRegistry,
    roles: &RoleIndex,
    role: Option<Role>,
) -> Result<LinkSummary> {
    let mut summary = LinkSummary::default();
    if columns::PLAYER_ID.find(&table.headers).is_some() {
        summary.skipped_existing = true;
        return Ok(summary);
    }
    let name_col = columns::PLAYER_NAME.require(&table.headers)?;

    let mut ids = Vec::with_capacity(table.len());
    for idx in 0..table.len() {
        summary.rows += 1;
        let name = clean_name(table.cell(idx, name_col));
        if name.is_empty() {
            ids.push(String::new());
            continue;
        }
        let id = match registry.resolve_name(name, role, roles) {
            NameResolution::Unique(id) => id,
            NameResolution::ByRole(id) => {
                summary.by_role += 1;
                id
            }
            NameResolution::Unknown => {
                summary.unknown += 1;
                String::new()
            }
            NameResolution::Ambiguous(candidates) => {
                let err = ReconcileError::AmbiguousName {
                    name: name.to_string(),
                    candidates,
                };
                debug!(row = idx + 1, %err, "left player id empty");
                summary.ambiguous += 1;
                String::new()
            }
        };
        if !id.is_empty() {
            summary.linked += 1;
        }
        ids.push(id);
    }
    table.insert_first_column("player_id", ids);
    Ok(summary)
}

/// Player fragments from a stats or attributes table; `None` when the table
/// has no usable id or name column.
pub fn fragments_from_table(table: &Table, role: Option<Role>) -> Option<Vec<PlayerFragment>> {
    let id_col = columns::PLAYER_ID.find(&table.headers)?;
    let name_col = columns::PLAYER_NAME.find(&table.headers)?;
    let number_col = columns::BACK_NUMBER.find(&table.headers);
    let position_col = columns::POSITION.find(&table.headers);
    let hand_col = columns::BATS_THROWS.find(&table.headers);
    let split_cols = columns::HEIGHT_CM
        .find(&table.headers)
        .zip(columns::WEIGHT_KG.find(&table.headers));
    let combined_col = columns::HEIGHT_WEIGHT.find(&table.headers);

    let fragments = (0..table.len())
        .map(|idx| {
            let cell = |col: Option<usize>| col.map(|c| table.cell(idx, c).to_string()).unwrap_or_default();
            let height_weight = match split_cols {
                Some((h, w)) => format!("{}/{}", table.cell(idx, h), table.cell(idx, w)),
                None => cell(combined_col),
            };
            PlayerFragment {
                player_id: cell(Some(id_col)),
                name: cell(Some(name_col)),
                role,
                back_number: cell(number_col),
                position: cell(position_col),
                bats_throws: cell(hand_col),
                height_weight,
            }
        })
        .collect();
    Some(fragments)
}

/// Read fragments from many files in parallel, returned in input order.
/// Name-only tables contribute nothing; only unreadable files are errors.
pub fn collect_fragments(paths: &[PathBuf]) -> (Vec<PlayerFragment>, Vec<String>) {
    let results: Vec<(Vec<PlayerFragment>, Option<String>)> = paths
        .par_iter()
        .map(|path| match read_table(path) {
            Ok(table) => match fragments_from_table(&table, Role::from_path(path)) {
                Some(fragments) => (fragments, None),
                None => {
                    debug!(path = %path.display(), "no player id/name columns; not a fragment source");
                    (Vec::new(), None)
                }
            },
            Err(err) => (Vec::new(), Some(err.to_string())),
        })
        .collect();

    let mut fragments = Vec::new();
    let mut errors = Vec::new();
    for (part, err) in results {
        if let Some(err) = err {
            errors.push(err);
        }
        fragments.extend(part);
    }
    (fragments, errors)
}

/// Drop team or number prefixes scraped into a name cell: `LG김현수` and
/// `1 김현수` become `김현수`. Names without Hangul come back trimmed.
pub fn clean_name(raw: &str) -> &str {
    let s = raw.trim();
    match s.find(|ch: char| ('\u{AC00}'..='\u{D7A3}').contains(&ch)) {
        Some(start) => s[start..].trim(),
        None => s,
    }
}

/// Uniform number: `No. 17`, `#17`, `17번` -> `17`.
pub fn clean_back_number(raw: &str) -> Option<u32> {
    let digits = raw
        .trim()
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect::<String>();
    digits.parse().ok()
}

const POSITION_KEYWORDS: [(&str, &str); 7] = [
    ("투수", "투수"),
    ("포수", "포수"),
    ("내야수", "내야수"),
    ("외야수", "외야수"),
    ("INF", "내야수"),
    ("IF", "내야수"),
    ("OF", "외야수"),
];

/// Split `내야수(우투좌타)` into the position and the bats/throws string.
pub fn split_position_and_hand(raw: &str) -> (String, String) {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return (String::new(), String::new());
    }

    let mut hand = String::new();
    let mut rest = s.to_string();
    if let Some(open) = s.find('(')
        && let Some(close_rel) = s[open..].find(')')
    {
        let close = open + close_rel;
        let inner = s[open + 1..close].trim();
        if inner.chars().count() == 4 || looks_like_hand(inner) {
            hand = inner.to_string();
        }
        rest = format!("{}{}", &s[..open], &s[close + 1..]).trim().to_string();
    }

    let position = POSITION_KEYWORDS
        .iter()
        .find(|(key, _)| rest.contains(key))
        .map(|(_, canonical)| canonical.to_string())
        .or_else(|| {
            if rest.contains("내야") {
                Some("내야수".to_string())
            } else if rest.contains("외야") {
                Some("외야수".to_string())
            } else if rest.contains('포') {
                Some("포수".to_string())
            } else if rest.contains('투') {
                Some("투수".to_string())
            } else {
                None
            }
        })
        .unwrap_or(rest);
    (position, hand)
}

/// `우투좌타`-like: a side, then 투, then a side, then 타.
fn looks_like_hand(s: &str) -> bool {
    let mut chars = s.chars().filter(|ch| matches!(ch, '우' | '좌' | '양' | '투' | '타'));
    matches!(
        (chars.next(), chars.next(), chars.next(), chars.next()),
        (Some('우' | '좌'), Some('투'), Some('우' | '좌' | '양'), Some('타'))
    )
}

/// `185cm/85kg`, `185 / 85`, `185cm 85kg` -> `(185, 85)`.
pub fn split_height_weight(raw: &str) -> (Option<u32>, Option<u32>) {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return (None, None);
    }
    let numbers = number_runs(s);
    if let [height, weight, ..] = numbers.as_slice() {
        return (Some(height.0), Some(weight.0));
    }
    let lower = s.to_ascii_lowercase();
    let unit_after = |unit: &str| {
        numbers
            .iter()
            .find(|(_, end)| lower[*end..].trim_start().starts_with(unit))
            .map(|(n, _)| *n)
    };
    (unit_after("cm"), unit_after("kg"))
}

/// 2-3 digit runs with the byte offset just past each run.
fn number_runs(s: &str) -> Vec<(u32, usize)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, ch) in s.char_indices().chain(std::iter::once((s.len(), ' '))) {
        match (ch.is_ascii_digit(), start) {
            (true, None) => start = Some(i),
            (false, Some(st)) => {
                let run = &s[st..i];
                if (2..=3).contains(&run.len())
                    && let Ok(n) = run.parse()
                {
                    out.push((n, i));
                }
                start = None;
            }
            _ => {}
        }
    }
    out
}
