use std::collections::HashMap;

use crate::table::{ColumnSpec, Match, Table};

/// Built-in aliases: `(observed label, canonical name)`.
///
/// Canonical names are the short labels the league site prints in its
/// standings tables. Two-letter codes are the ones embedded in game ids.
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    // game-id codes
    ("HH", "한화"),
    ("OB", "두산"),
    ("LT", "롯데"),
    ("WO", "키움"),
    ("SS", "삼성"),
    ("HT", "KIA"),
    ("SK", "SSG"),
    ("LG", "LG"),
    ("KT", "KT"),
    ("NC", "NC"),
    // Samsung
    ("삼성", "삼성"),
    ("Samsung", "삼성"),
    ("Samsung Lions", "삼성"),
    ("삼성 라이온즈", "삼성"),
    // Lotte
    ("롯데", "롯데"),
    ("Lotte", "롯데"),
    ("Lotte Giants", "롯데"),
    ("롯데 자이언츠", "롯데"),
    // KIA
    ("KIA", "KIA"),
    ("기아", "KIA"),
    ("KIA Tigers", "KIA"),
    ("기아 타이거즈", "KIA"),
    ("KIA 타이거즈", "KIA"),
    // LG
    ("LG 트윈스", "LG"),
    ("LG Twins", "LG"),
    // Doosan
    ("두산", "두산"),
    ("Doosan", "두산"),
    ("Doosan Bears", "두산"),
    ("두산 베어스", "두산"),
    // Kiwoom (formerly Nexen)
    ("키움", "키움"),
    ("Kiwoom", "키움"),
    ("Kiwoom Heroes", "키움"),
    ("키움 히어로즈", "키움"),
    ("넥센", "키움"),
    ("Nexen", "키움"),
    ("히어로즈", "키움"),
    // KT
    ("KT Wiz", "KT"),
    ("KT 위즈", "KT"),
    // NC
    ("NC Dinos", "NC"),
    ("NC 다이노스", "NC"),
    ("엔씨", "NC"),
    ("NCD", "NC"),
    // SSG (formerly SK)
    ("SSG", "SSG"),
    ("SSG Landers", "SSG"),
    ("SSG 랜더스", "SSG"),
    ("SK 와이번스", "SSG"),
    ("SK Wyverns", "SSG"),
    // Hanwha
    ("한화", "한화"),
    ("Hanwha", "한화"),
    ("Hanwha Eagles", "한화"),
    ("한화 이글스", "한화"),
];

const ALIAS_COLUMN: ColumnSpec = ColumnSpec {
    label: "alias",
    candidates: &[("alias", Match::Exact), ("label", Match::Exact)],
};

const CANONICAL_COLUMN: ColumnSpec = ColumnSpec {
    label: "canonical",
    candidates: &[("canonical", Match::Exact), ("team", Match::Exact)],
};

/// Immutable alias lookup, constructed once per run and passed by reference.
#[derive(Debug, Clone, Default)]
pub struct TeamAliases {
    by_key: HashMap<String, String>,
}

impl TeamAliases {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut out = Self::empty();
        for (alias, canonical) in DEFAULT_ALIASES {
            out.insert(alias, canonical);
        }
        out
    }

    /// Extend with `alias,canonical` rows; returns how many rows were applied.
    pub fn extend_from_table(&mut self, table: &Table) -> usize {
        let (Some(alias_col), Some(canonical_col)) = (
            ALIAS_COLUMN.find(&table.headers),
            CANONICAL_COLUMN.find(&table.headers),
        ) else {
            return 0;
        };
        let mut applied = 0;
        for row in &table.rows {
            let alias = row.get(alias_col).map(|s| s.trim()).unwrap_or("");
            let canonical = row.get(canonical_col).map(|s| s.trim()).unwrap_or("");
            if alias.is_empty() || canonical.is_empty() {
                continue;
            }
            self.insert(alias, canonical);
            applied += 1;
        }
        applied
    }

    pub fn insert(&mut self, alias: &str, canonical: &str) {
        let key = alias_key(alias);
        if key.is_empty() {
            return;
        }
        self.by_key.insert(key, canonical.trim().to_string());
        // A canonical name always resolves to itself.
        let canonical_key = alias_key(canonical);
        self.by_key
            .entry(canonical_key)
            .or_insert_with(|| canonical.trim().to_string());
    }

    /// Canonical name for `label`; unknown labels come back trimmed but unchanged.
    pub fn normalize(&self, label: &str) -> String {
        self.lookup(label)
            .map(|s| s.to_string())
            .unwrap_or_else(|| label.trim().to_string())
    }

    pub fn lookup(&self, label: &str) -> Option<&str> {
        self.by_key.get(&alias_key(label)).map(|s| s.as_str())
    }

    pub fn is_known(&self, label: &str) -> bool {
        self.lookup(label).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Case, whitespace and punctuation insensitive key.
pub fn alias_key(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(|ch| ch.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_key_ignores_case_space_and_punctuation() {
        assert_eq!(alias_key(" SSG-Landers "), "ssglanders");
        assert_eq!(alias_key("KIA\u{a0}타이거즈"), "kia타이거즈");
        assert_eq!(alias_key("Lotte.Giants"), "lottegiants");
    }

    #[test]
    fn known_aliases_collapse_to_one_name() {
        let aliases = TeamAliases::with_defaults();
        assert_eq!(aliases.normalize("ht"), "KIA");
        assert_eq!(aliases.normalize("기아 타이거즈"), "KIA");
        assert_eq!(aliases.normalize("sk wyverns"), "SSG");
        assert_eq!(aliases.normalize("넥센"), "키움");
        assert_eq!(aliases.normalize("삼성"), "삼성");
    }

    #[test]
    fn unknown_labels_pass_through() {
        let aliases = TeamAliases::with_defaults();
        assert_eq!(aliases.normalize("  Busan Seagulls "), "Busan Seagulls");
        assert!(!aliases.is_known("Busan Seagulls"));
    }

    #[test]
    fn table_rows_extend_the_defaults() {
        let mut aliases = TeamAliases::with_defaults();
        let table = Table::from_rows(
            vec!["alias".into(), "canonical".into()],
            vec![
                vec!["Eagles".into(), "한화".into()],
                vec!["".into(), "x".into()],
            ],
        );
        assert_eq!(aliases.extend_from_table(&table), 1);
        assert_eq!(aliases.normalize("eagles"), "한화");
    }
}
