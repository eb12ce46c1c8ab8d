use std::collections::BTreeSet;

use chrono::NaiveDate;

use kbo_reconcile::game_index::{GameIndex, GameRecord};
use kbo_reconcile::player_merge::{PlayerFragment, PlayerRegistry, Role};
use kbo_reconcile::repair::{RepairOptions, RepairRow, repair_rows};
use kbo_reconcile::resolver::{DailyStatRow, ResolveSummary, Resolver};
use kbo_reconcile::team_alias::TeamAliases;
use kbo_reconcile::team_history::{TeamHistory, TeamObservation};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
}

fn observations(rows: &[(&str, &str, &str)]) -> Vec<TeamObservation> {
    rows.iter()
        .enumerate()
        .map(|(order, (pid, year, team))| TeamObservation {
            player_id: pid.to_string(),
            name: String::new(),
            year: year.to_string(),
            team: team.to_string(),
            order,
        })
        .collect()
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
fn intervals_are_sorted_and_disjoint() {
    let (history, summary) = TeamHistory::build(
        observations(&[
            ("1", "2021", "A"),
            ("1", "2022", "A"),
            ("1", "2022", "B"),
            ("1", "2022", "C"),
            ("1", "2023", "C"),
            ("1", "2024", "B"),
            ("1", "2024", "A"),
            ("2", "2020", "D"),
            ("2", "bad", "D"),
            ("3", "2023", ""),
        ]),
        &TeamAliases::empty(),
    );
    assert_eq!(summary.skipped_rows, 2);
    for pid in ["1", "2"] {
        let intervals = history.intervals(pid);
        assert!(!intervals.is_empty());
        for iv in intervals {
            assert!(iv.start <= iv.end);
        }
        for pair in intervals.windows(2) {
            assert!(pair[0].end < pair[1].start);
        }
    }
}

#[test]
fn same_team_across_years_is_one_interval() {
    let (history, _) = TeamHistory::build(
        observations(&[("1", "2021", "A"), ("1", "2022", "A")]),
        &TeamAliases::empty(),
    );
    let intervals = history.intervals("1");
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].team, "A");
    assert_eq!(intervals[0].start, d(2021, 1, 1));
    assert_eq!(intervals[0].end, d(2022, 12, 31));
}

#[test]
fn two_teams_in_a_year_split_at_july() {
    let (history, _) = TeamHistory::build(
        observations(&[("1", "2023", "A"), ("1", "2023", "B")]),
        &TeamAliases::empty(),
    );
    let got = history
        .intervals("1")
        .iter()
        .map(|iv| (iv.team.clone(), iv.start, iv.end))
        .collect::<Vec<_>>();
    assert_eq!(
        got,
        vec![
            ("A".to_string(), d(2023, 1, 1), d(2023, 6, 30)),
            ("B".to_string(), d(2023, 7, 1), d(2023, 12, 31)),
        ]
    );
}

#[test]
fn first_game_keeps_both_index_keys() {
    let index = GameIndex::build(
        vec![
            game("20230815AABB0", d(2023, 8, 15), "A", "B"),
            game("20230815AABB7", d(2023, 8, 15), "A", "B"),
        ],
        &TeamAliases::empty(),
    );
    assert_eq!(index.by_date_team(d(2023, 8, 15), "A"), Some("20230815AABB0"));
    assert_eq!(index.by_date_team(d(2023, 8, 15), "B"), Some("20230815AABB0"));
    assert_eq!(index.by_abbrev_pair(d(2023, 8, 15), "AA", "BB"), Some("20230815AABB0"));
    assert!(index.summary().key_collisions >= 3);
    assert_eq!(index.summary().duplicate_games, 0);
}

#[test]
fn resolver_finds_the_indexed_game() {
    let aliases = TeamAliases::empty();
    let games = GameIndex::build(vec![game("20230815XXYY0", d(2023, 8, 15), "A", "B")], &aliases);
    let (history, _) = TeamHistory::build(observations(&[("10", "2023", "A")]), &aliases);
    let resolver = Resolver::new(&aliases, &history, &games);
    let row = DailyStatRow {
        player_id: Some("10".into()),
        date: d(2023, 8, 15),
        opponent: "B".into(),
    };
    assert_eq!(resolver.resolve(&row).expect("resolved").game_id, "20230815XXYY0");
}

#[test]
fn uncovered_date_resolves_to_empty() {
    let aliases = TeamAliases::empty();
    let games = GameIndex::build(vec![game("20230815XXYY0", d(2023, 8, 15), "A", "B")], &aliases);
    let (history, _) = TeamHistory::build(observations(&[("10", "2022", "A")]), &aliases);
    let resolver = Resolver::new(&aliases, &history, &games);
    let row = DailyStatRow {
        player_id: Some("10".into()),
        date: d(2023, 9, 1),
        opponent: "B".into(),
    };
    let mut summary = ResolveSummary::default();
    assert_eq!(resolver.resolve_counted(&row, &mut summary), None);
    assert_eq!(summary.unresolved(), 1);
    assert_eq!(summary.unresolved_team, 1);
}

#[test]
fn repair_is_idempotent() {
    let row = |pid: &str, gid: &str, date: &str| RepairRow {
        player_id: pid.into(),
        game_id: gid.into(),
        date: date.into(),
    };
    let mut rows = vec![
        row("1", "20240501NCOB0", "2024-05-01"),
        row("1", "20240501NCOB0", "2024-05-01"),
        row("1", "20240708LTSS1", "2024-07-08"),
        row("1", "20240708LTSS1", "2024-07-08"),
        row("1", "20240708LTSS1", "2024-07-08"),
        row("2", "20240708LTSS1", "2024-07-08"),
        row("2", "20240803HTLG0_2", "2024-08-03"),
    ];
    let options = RepairOptions::default();
    let first = repair_rows(&mut rows, &options);
    assert!(first.changed() > 0);
    let after_first = rows.clone();

    let second = repair_rows(&mut rows, &options);
    assert_eq!(second.changed(), 0);
    assert_eq!(rows, after_first);
}

#[test]
fn marked_row_gets_its_day_back() {
    let mut rows = vec![RepairRow {
        player_id: "1".into(),
        game_id: "20240501NCOB0_2".into(),
        date: "2024-05-01".into(),
    }];
    let summary = repair_rows(&mut rows, &RepairOptions::default());
    assert_eq!(summary.dates_shifted, 1);
    assert_eq!(rows[0].date, "2024-05-10");
    assert_eq!(rows[0].game_id, "20240510NCOB0");
}

#[test]
fn merge_has_one_record_per_id_and_reports_shared_names() {
    let frag = |id: &str, name: &str, role: Role| PlayerFragment {
        player_id: id.into(),
        name: name.into(),
        role: Some(role),
        ..PlayerFragment::default()
    };
    let registry = PlayerRegistry::merge(vec![
        frag("100", "김현수", Role::Hitter),
        frag("100.0", "김현수", Role::Defense),
        frag("200", "김현수", Role::Pitcher),
        frag("300", "양의지", Role::Hitter),
        frag("300", "양의지", Role::Runner),
        frag("400", "양의지", Role::Hitter),
        frag("500", "최정", Role::Hitter),
    ]);
    assert_eq!(registry.len(), 5);
    let table = registry.to_table();
    let ids = table.rows.iter().map(|r| r[0].clone()).collect::<BTreeSet<_>>();
    assert_eq!(ids.len(), table.len());

    let dups = registry.duplicate_names();
    assert_eq!(dups.keys().cloned().collect::<Vec<_>>(), vec!["김현수".to_string(), "양의지".to_string()]);
}
