//! End-to-end engine scenarios across tenants, billing and rankings.

use std::collections::HashSet;
use std::sync::Arc;

use rankport_core::error::RankportError;
use rankport_core::types::{Role, ScoreRow};
use rankport_platform::auth::create_token;
use rankport_platform::sheet::parse_score_sheet;
use rankport_platform::{Platform, TenantPartition, ViewerAuthority};

const SECRET: &str = "scenario-secret";

fn platform() -> Platform {
    Platform::in_memory(ViewerAuthority::from_secret(SECRET)).unwrap()
}

fn tenant(platform: &Platform, name: &str) -> Arc<TenantPartition> {
    platform.directory().provision(name, &format!("{name} league")).unwrap();
    platform.directory().resolve(name).unwrap()
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn billing_scenario_one_scorer_visits() {
    let platform = platform();
    let partition = tenant(&platform, "kaifu");
    let store = partition.store();

    let players = store.add_players(&names(&["p1", "p2", "p3"])).unwrap();
    let competition = store.add_competition("Final").unwrap();
    let sheet = parse_score_sheet("player_name,score\np1,100\np2,100\n").unwrap();
    store.replace_scores(competition.id, &sheet).unwrap();

    for viewer in [players[0].id, players[2].id] {
        platform.ranking().rank(&partition, competition.id, Some(viewer), 0).unwrap();
    }
    store.finish_competition(competition.id).unwrap();

    let report = platform.billing().report(&partition, competition.id).unwrap();
    assert_eq!(report.billing_yen, 160);
    assert_eq!(report.player_count, 2);
    assert_eq!(report.competition_title, "Final");
}

#[test]
fn concurrent_player_batches_get_distinct_ids() {
    let platform = platform();
    let partition = tenant(&platform, "kaifu");

    let (left, right) = std::thread::scope(|s| {
        let a = s.spawn(|| partition.store().add_players(&names(&["a", "b"])).unwrap());
        let b = s.spawn(|| partition.store().add_players(&names(&["c"])).unwrap());
        (a.join().unwrap(), b.join().unwrap())
    });

    let ids: HashSet<u64> = left.iter().chain(&right).map(|p| p.id).collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(partition.store().list_players().unwrap().len(), 3);
}

#[test]
fn finished_competition_refuses_new_scores() {
    let platform = platform();
    let partition = tenant(&platform, "kaifu");
    let store = partition.store();
    store.add_players(&names(&["alice"])).unwrap();
    let c = store.add_competition("Cup").unwrap();
    store.replace_scores(c.id, &[ScoreRow { player_name: "alice".into(), score: 3 }]).unwrap();
    store.finish_competition(c.id).unwrap();

    let err = store.replace_scores(c.id, &[ScoreRow { player_name: "alice".into(), score: 9 }]).unwrap_err();
    assert!(matches!(err, RankportError::Conflict(_)));

    let ranks = platform.ranking().rank(&partition, c.id, None, 0).unwrap();
    assert_eq!(ranks.len(), 1);
    assert_eq!(ranks[0].score, 3);
}

#[test]
fn disqualified_player_fails_standing_check() {
    let platform = platform();
    let partition = tenant(&platform, "kaifu");
    let player = partition.store().add_players(&names(&["cheater"])).unwrap().remove(0);
    partition.store().disqualify(player.id).unwrap();

    let token = create_token(Role::Player, "kaifu", &player.id.to_string(), 3600, SECRET).unwrap();
    let viewer = platform.authority().authorize(Some(&token)).unwrap();
    viewer.require_tenant(partition.name()).unwrap();
    let err = platform.authority().authorize_player_read(&viewer, partition.store()).unwrap_err();
    assert!(matches!(err, RankportError::Forbidden(_)));
}

#[test]
fn forged_token_fails_before_standing_is_checked() {
    let platform = platform();
    let partition = tenant(&platform, "kaifu");
    let player = partition.store().add_players(&names(&["cheater"])).unwrap().remove(0);
    partition.store().disqualify(player.id).unwrap();

    let forged = create_token(Role::Player, "kaifu", &player.id.to_string(), 3600, "not-the-secret").unwrap();
    let err = platform.authority().authorize(Some(&forged)).unwrap_err();
    assert!(matches!(err, RankportError::Auth(_)));
}

#[test]
fn tenants_are_isolated() {
    let platform = platform();
    let alpha = tenant(&platform, "alpha");
    let bravo = tenant(&platform, "bravo");

    alpha.store().add_players(&names(&["shared"])).unwrap();
    // Same display name is fine in another tenant.
    bravo.store().add_players(&names(&["shared"])).unwrap();
    let c = alpha.store().add_competition("Alpha Cup").unwrap();

    assert!(bravo.store().list_competitions().unwrap().is_empty());
    assert!(matches!(bravo.store().get_competition(c.id), Err(RankportError::NotFound(_))));

    // An alpha credential is no good against bravo.
    let token = create_token(Role::Organizer, "alpha", "org", 3600, SECRET).unwrap();
    let viewer = platform.authority().authorize(Some(&token)).unwrap();
    assert!(matches!(viewer.require_tenant(bravo.name()), Err(RankportError::Forbidden(_))));
}

#[test]
fn admin_totals_follow_cursor() {
    let platform = platform();
    for name in ["charlie", "alpha", "bravo"] {
        tenant(&platform, name);
    }
    let alpha = platform.directory().resolve("alpha").unwrap();
    alpha.store().add_players(&names(&["x"])).unwrap();
    let c = alpha.store().add_competition("Solo").unwrap();
    alpha.store().replace_scores(c.id, &[ScoreRow { player_name: "x".into(), score: 1 }]).unwrap();
    platform.ranking().rank(&alpha, c.id, Some(alpha.store().list_players().unwrap()[0].id), 0).unwrap();
    alpha.store().finish_competition(c.id).unwrap();

    let totals = platform.billing().tenant_totals(platform.directory(), None).unwrap();
    let pairs: Vec<(&str, i64)> = totals.iter().map(|t| (t.name.as_str(), t.billing)).collect();
    assert_eq!(pairs, vec![("alpha", 100), ("bravo", 0), ("charlie", 0)]);

    let page = platform.billing().tenant_totals(platform.directory(), Some("bravo")).unwrap();
    assert_eq!(page.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), vec!["bravo", "charlie"]);
}
