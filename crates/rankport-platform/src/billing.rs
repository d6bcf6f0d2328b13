//! Per-competition billing with a single-flight report cache.
//!
//! A finished competition's report never changes, so it is computed once,
//! persisted in the central `billing_report` table and memoized. Concurrent
//! requests for a report that is not cached yet collapse into one computation
//! whose result (or error) every waiter receives.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rankport_core::config::BillingConfig;
use rankport_core::error::{RankportError, Result};
use rankport_core::types::{BillingReport, CompetitionId, PlayerId, TenantId, TenantWithBilling};
use rusqlite::{OptionalExtension, params};

use crate::db::{CenterDb, db_err, now_unix};
use crate::store::ScoringSnapshot;
use crate::tenant::{TenantDirectory, TenantPartition};
use crate::visit::VisitTracker;

/// Tenants per page of the admin billing listing.
pub const TENANT_BILLING_PAGE_SIZE: usize = 20;

type SlotKey = (TenantId, CompetitionId);

enum Slot {
    InFlight(Arc<Flight>),
    Done(BillingReport),
}

/// One in-progress computation that late arrivals wait on.
struct Flight {
    outcome: Mutex<Option<Result<BillingReport>>>,
    ready: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self { outcome: Mutex::new(None), ready: Condvar::new() }
    }

    fn complete(&self, outcome: Result<BillingReport>) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.ready.notify_all();
    }

    fn wait(&self) -> Result<BillingReport> {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut slot);
        }
    }
}

/// Completes the flight if the leader unwinds before publishing.
struct FlightGuard<'a> {
    calculator: &'a BillingCalculator,
    key: SlotKey,
    flight: Arc<Flight>,
    armed: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.calculator.slots.lock().remove(&self.key);
            self.flight.complete(Err(RankportError::internal(format!(
                "billing computation for tenant={} competition={} aborted",
                self.key.0, self.key.1
            ))));
        }
    }
}

/// Counts computations and can hold them at the door.
#[cfg(test)]
struct ComputeGate {
    entered: std::sync::atomic::AtomicUsize,
    open: Mutex<bool>,
    opened: Condvar,
}

#[cfg(test)]
impl Default for ComputeGate {
    fn default() -> Self {
        Self { entered: Default::default(), open: Mutex::new(true), opened: Condvar::new() }
    }
}

#[cfg(test)]
impl ComputeGate {
    fn enter(&self) {
        self.entered.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }

    fn entered(&self) -> usize {
        self.entered.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn close(&self) {
        *self.open.lock() = false;
    }

    fn release(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

pub struct BillingCalculator {
    db: Arc<CenterDb>,
    visits: VisitTracker,
    rates: BillingConfig,
    slots: Mutex<HashMap<SlotKey, Slot>>,
    #[cfg(test)]
    gate: ComputeGate,
}

impl BillingCalculator {
    pub fn new(db: Arc<CenterDb>, visits: VisitTracker, rates: BillingConfig) -> Self {
        Self {
            db,
            visits,
            rates,
            slots: Mutex::new(HashMap::new()),
            #[cfg(test)]
            gate: ComputeGate::default(),
        }
    }

    /// Billing for one competition.
    ///
    /// Unfinished competitions get a live figure that is not cached.
    pub fn report(&self, partition: &TenantPartition, competition_id: CompetitionId) -> Result<BillingReport> {
        let key = (partition.id(), competition_id);

        let flight = {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(Slot::Done(report)) => {
                    tracing::debug!(tenant_id = key.0, competition_id, "billing cache hit");
                    return Ok(report.clone());
                }
                Some(Slot::InFlight(flight)) => {
                    let flight = Arc::clone(flight);
                    drop(slots);
                    tracing::debug!(tenant_id = key.0, competition_id, "joining in-flight billing computation");
                    return flight.wait();
                }
                None => {
                    let flight = Arc::new(Flight::new());
                    slots.insert(key, Slot::InFlight(Arc::clone(&flight)));
                    flight
                }
            }
        };

        let mut guard = FlightGuard { calculator: self, key, flight: Arc::clone(&flight), armed: true };
        let outcome = self.compute(partition, competition_id);

        {
            let mut slots = self.slots.lock();
            match &outcome {
                Ok((report, true)) => {
                    slots.insert(key, Slot::Done(report.clone()));
                }
                Ok((_, false)) => {
                    slots.remove(&key);
                }
                Err(e) => {
                    slots.remove(&key);
                    tracing::error!(tenant_id = key.0, competition_id, "billing computation failed: {e}");
                }
            }
        }
        guard.armed = false;

        let outcome = outcome.map(|(report, _)| report);
        flight.complete(outcome.clone());
        outcome
    }

    /// Report plus whether it is final.
    fn compute(&self, partition: &TenantPartition, competition_id: CompetitionId) -> Result<(BillingReport, bool)> {
        #[cfg(test)]
        self.gate.enter();

        let tenant_id = partition.id();
        if let Some(report) = self.load_persisted(tenant_id, competition_id)? {
            tracing::debug!(tenant_id, competition_id, "billing report loaded from storage");
            return Ok((report, true));
        }

        let snapshot = partition.store().scoring_snapshot(competition_id)?;
        let visitors = self.visits.visitors(tenant_id, competition_id)?;
        let report = tally(&snapshot, &visitors, &self.rates);

        let finished = snapshot.competition.is_finished();
        if finished {
            self.persist(tenant_id, &report)?;
            tracing::info!(
                tenant_id, competition_id,
                billing_yen = report.billing_yen, player_count = report.player_count,
                "billing finalized"
            );
        }
        Ok((report, finished))
    }

    fn load_persisted(&self, tenant_id: TenantId, competition_id: CompetitionId) -> Result<Option<BillingReport>> {
        self.db.conn().query_row(
            "SELECT competition_id, competition_title, player_count, billing_yen FROM billing_report
             WHERE tenant_id = ?1 AND competition_id = ?2",
            params![tenant_id, competition_id],
            |row| Ok(BillingReport {
                competition_id: row.get(0)?,
                competition_title: row.get(1)?,
                player_count: row.get(2)?,
                billing_yen: row.get(3)?,
            }),
        ).optional()
            .map_err(db_err(format!("Get billing report tenant={tenant_id} competition={competition_id}")))
    }

    fn persist(&self, tenant_id: TenantId, report: &BillingReport) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO billing_report (tenant_id, competition_id, competition_title, player_count, billing_yen, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (tenant_id, competition_id) DO NOTHING",
            params![
                tenant_id, report.competition_id, report.competition_title,
                report.player_count, report.billing_yen, now_unix()
            ],
        ).map_err(db_err(format!(
            "Insert billing report tenant={tenant_id} competition={}", report.competition_id
        )))?;
        Ok(())
    }

    /// Every competition of a tenant, newest first.
    pub fn tenant_report(&self, partition: &TenantPartition) -> Result<Vec<BillingReport>> {
        let mut competitions = partition.store().list_competitions()?;
        competitions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        competitions.iter().map(|c| self.report(partition, c.id)).collect()
    }

    /// Admin listing: up to one page of tenants from `before`, each with its total.
    pub fn tenant_totals(&self, directory: &TenantDirectory, before: Option<&str>) -> Result<Vec<TenantWithBilling>> {
        let tenants = directory.list_tenants(before, TENANT_BILLING_PAGE_SIZE)?;
        let mut totals = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            let partition = directory.resolve(&tenant.name)?;
            let billing = self.tenant_report(&partition)?.iter().map(|r| r.billing_yen).sum();
            totals.push(TenantWithBilling {
                id: tenant.id,
                name: tenant.name,
                display_name: tenant.display_name,
                billing,
            });
        }
        Ok(totals)
    }
}

/// Price a competition from its scorers and visitors.
///
/// A finished competition only counts visits made up to its finish time.
pub fn tally(snapshot: &ScoringSnapshot, visitors: &HashMap<PlayerId, i64>, rates: &BillingConfig) -> BillingReport {
    let competition = &snapshot.competition;
    let counted = |at: i64| competition.finished_at.is_none_or(|finished| at <= finished);

    let mut billing_yen = 0i64;
    for player_id in &snapshot.scorers {
        billing_yen += match visitors.get(player_id) {
            Some(&at) if counted(at) => rates.scorer_visitor_yen,
            _ => rates.scorer_yen,
        };
    }
    for (player_id, &at) in visitors {
        if counted(at) && !snapshot.scorers.contains(player_id) {
            billing_yen += rates.visitor_yen;
        }
    }

    BillingReport {
        competition_id: competition.id,
        competition_title: competition.title.clone(),
        player_count: snapshot.scorers.len() as i64,
        billing_yen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SequenceIdGenerator;
    use crate::store::CompetitionRow;
    use crate::tenant::PartitionStorage;
    use rankport_core::types::ScoreRow;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    struct Fixture {
        directory: TenantDirectory,
        visits: VisitTracker,
        billing: BillingCalculator,
    }

    fn fixture() -> Fixture {
        let center = Arc::new(CenterDb::open(&PathBuf::from(":memory:")).unwrap());
        let directory = TenantDirectory::new(
            Arc::clone(&center),
            Arc::new(SequenceIdGenerator::default()),
            PartitionStorage::InMemory,
            Duration::from_secs(1),
        ).unwrap();
        let visits = VisitTracker::new(Arc::clone(&center));
        let billing = BillingCalculator::new(center, visits.clone(), BillingConfig::default());
        Fixture { directory, visits, billing }
    }

    fn competition(finished_at: Option<i64>) -> CompetitionRow {
        CompetitionRow { id: 7, tenant_id: 1, title: "Cup".into(), finished_at, created_at: 0, updated_at: 0 }
    }

    fn rows(list: &[(&str, i64)]) -> Vec<ScoreRow> {
        list.iter().map(|(n, s)| ScoreRow { player_name: n.to_string(), score: *s }).collect()
    }

    #[test]
    fn test_tally_tiers() {
        let snapshot = ScoringSnapshot { competition: competition(Some(1_000)), scorers: BTreeSet::from([1, 2]) };
        // 1 scored and visited, 2 scored only, 3 visited only, 4 visited too late.
        let visitors = HashMap::from([(1, 900), (3, 1_000), (4, 1_001)]);
        let report = tally(&snapshot, &visitors, &BillingConfig::default());
        assert_eq!(report.billing_yen, 100 + 50 + 10);
        assert_eq!(report.player_count, 2);
    }

    #[test]
    fn test_tally_late_visit_by_scorer() {
        let snapshot = ScoringSnapshot { competition: competition(Some(1_000)), scorers: BTreeSet::from([1]) };
        let report = tally(&snapshot, &HashMap::from([(1, 2_000)]), &BillingConfig::default());
        assert_eq!(report.billing_yen, 50);
    }

    #[test]
    fn test_tally_unfinished_counts_every_visit() {
        let snapshot = ScoringSnapshot { competition: competition(None), scorers: BTreeSet::new() };
        let report = tally(&snapshot, &HashMap::from([(1, i64::MAX), (2, 0)]), &BillingConfig::default());
        assert_eq!(report.billing_yen, 20);
        assert_eq!(report.player_count, 0);
    }

    #[test]
    fn test_tally_custom_rates() {
        let rates = BillingConfig { scorer_visitor_yen: 7, scorer_yen: 3, visitor_yen: 1 };
        let snapshot = ScoringSnapshot { competition: competition(None), scorers: BTreeSet::from([1, 2]) };
        let report = tally(&snapshot, &HashMap::from([(1, 0), (3, 0)]), &rates);
        assert_eq!(report.billing_yen, 7 + 3 + 1);
    }

    #[test]
    fn test_finished_report_is_cached_and_persisted() {
        let f = fixture();
        f.directory.provision("kaifu", "Kaifu").unwrap();
        let partition = f.directory.resolve("kaifu").unwrap();
        let store = partition.store();
        let players = store.add_players(&["p1".to_string(), "p2".to_string(), "p3".to_string()]).unwrap();
        let c = store.add_competition("Cup").unwrap();
        store.replace_scores(c.id, &rows(&[("p1", 100), ("p2", 100)])).unwrap();
        f.visits.record_visit(partition.id(), c.id, players[0].id, 0).unwrap();
        f.visits.record_visit(partition.id(), c.id, players[2].id, 0).unwrap();
        store.finish_competition(c.id).unwrap();

        let first = f.billing.report(&partition, c.id).unwrap();
        assert_eq!(first.billing_yen, 160);
        assert_eq!(first.player_count, 2);

        // A visit after finalization changes nothing.
        f.visits.record_visit(partition.id(), c.id, players[1].id, now_unix() + 60).unwrap();
        assert_eq!(f.billing.report(&partition, c.id).unwrap(), first);

        // A fresh calculator reads the persisted row.
        let fresh = BillingCalculator::new(Arc::clone(f.directory.center()), f.visits.clone(), BillingConfig::default());
        assert_eq!(fresh.report(&partition, c.id).unwrap(), first);
    }

    #[test]
    fn test_unfinished_report_is_live() {
        let f = fixture();
        f.directory.provision("kaifu", "Kaifu").unwrap();
        let partition = f.directory.resolve("kaifu").unwrap();
        let store = partition.store();
        store.add_players(&["p1".to_string(), "p2".to_string()]).unwrap();
        let c = store.add_competition("Cup").unwrap();

        store.replace_scores(c.id, &rows(&[("p1", 1)])).unwrap();
        assert_eq!(f.billing.report(&partition, c.id).unwrap().billing_yen, 50);

        store.replace_scores(c.id, &rows(&[("p1", 1), ("p2", 2)])).unwrap();
        assert_eq!(f.billing.report(&partition, c.id).unwrap().billing_yen, 100);
        assert!(f.billing.load_persisted(partition.id(), c.id).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_reports_agree() {
        let f = fixture();
        f.directory.provision("kaifu", "Kaifu").unwrap();
        let partition = f.directory.resolve("kaifu").unwrap();
        let store = partition.store();
        let names: Vec<String> = (0..30).map(|i| format!("p{i}")).collect();
        let players = store.add_players(&names).unwrap();
        let c = store.add_competition("Cup").unwrap();
        let sheet: Vec<ScoreRow> = names[..20].iter().map(|n| ScoreRow { player_name: n.clone(), score: 1 }).collect();
        store.replace_scores(c.id, &sheet).unwrap();
        for p in &players[10..] {
            f.visits.record_visit(partition.id(), c.id, p.id, 0).unwrap();
        }
        store.finish_competition(c.id).unwrap();

        let reports: Vec<BillingReport> = std::thread::scope(|s| {
            let joins: Vec<_> = (0..16).map(|_| s.spawn(|| f.billing.report(&partition, c.id).unwrap())).collect();
            joins.into_iter().map(|j| j.join().unwrap()).collect()
        });
        // 10 scorer-only, 10 scorer+visitor, 10 visitor-only.
        assert!(reports.iter().all(|r| r.billing_yen == 10 * 50 + 10 * 100 + 10 * 10));
    }

    /// Callers holding the in-flight computation for `key`, besides its leader.
    fn joined(billing: &BillingCalculator, key: SlotKey) -> usize {
        match billing.slots.lock().get(&key) {
            // The slot, the leader and its guard each hold one reference.
            Some(Slot::InFlight(flight)) => Arc::strong_count(flight).saturating_sub(3),
            _ => 0,
        }
    }

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    /// Run `callers` concurrent reports for one key while the first computation is held.
    fn contend(f: &Fixture, partition: &TenantPartition, competition_id: CompetitionId, callers: usize) -> Vec<Result<BillingReport>> {
        let key = (partition.id(), competition_id);
        f.billing.gate.close();
        std::thread::scope(|s| {
            let joins: Vec<_> = (0..callers)
                .map(|_| s.spawn(|| f.billing.report(partition, competition_id)))
                .collect();
            let all_joined = wait_until(|| f.billing.gate.entered() >= 1 && joined(&f.billing, key) == callers - 1);
            f.billing.gate.release();
            let outcomes = joins.into_iter().map(|j| j.join().unwrap()).collect();
            assert!(all_joined, "callers never converged on one flight");
            outcomes
        })
    }

    fn scored_competition(f: &Fixture, finish: bool) -> (Arc<TenantPartition>, CompetitionId) {
        f.directory.provision("kaifu", "Kaifu").unwrap();
        let partition = f.directory.resolve("kaifu").unwrap();
        let store = partition.store();
        let players = store.add_players(&["p1".to_string(), "p2".to_string()]).unwrap();
        let c = store.add_competition("Cup").unwrap();
        store.replace_scores(c.id, &rows(&[("p1", 10), ("p2", 20)])).unwrap();
        f.visits.record_visit(partition.id(), c.id, players[0].id, 0).unwrap();
        if finish {
            store.finish_competition(c.id).unwrap();
        }
        (partition, c.id)
    }

    #[test]
    fn test_concurrent_callers_share_one_computation() {
        let f = fixture();
        let (partition, competition_id) = scored_competition(&f, true);

        let outcomes = contend(&f, &partition, competition_id, 8);
        assert_eq!(f.billing.gate.entered(), 1);
        for outcome in outcomes {
            assert_eq!(outcome.unwrap().billing_yen, 150);
        }
        assert!(matches!(f.billing.slots.lock().get(&(partition.id(), competition_id)), Some(Slot::Done(_))));

        f.billing.report(&partition, competition_id).unwrap();
        assert_eq!(f.billing.gate.entered(), 1);
    }

    #[test]
    fn test_distinct_keys_compute_in_parallel() {
        let f = fixture();
        let (partition, first) = scored_competition(&f, true);
        let second = partition.store().add_competition("Plate").unwrap().id;
        partition.store().finish_competition(second).unwrap();

        f.billing.gate.close();
        let (a, b, both_entered) = std::thread::scope(|s| {
            let a = s.spawn(|| f.billing.report(&partition, first));
            let b = s.spawn(|| f.billing.report(&partition, second));
            let both_entered = wait_until(|| f.billing.gate.entered() == 2);
            f.billing.gate.release();
            (a.join().unwrap(), b.join().unwrap(), both_entered)
        });
        assert!(both_entered, "second key waited on the first");
        assert_eq!(a.unwrap().billing_yen, 150);
        assert_eq!(b.unwrap().billing_yen, 0);
        assert_eq!(f.billing.gate.entered(), 2);
    }

    #[test]
    fn test_leader_error_reaches_every_waiter() {
        let f = fixture();
        f.directory.provision("kaifu", "Kaifu").unwrap();
        let partition = f.directory.resolve("kaifu").unwrap();

        let outcomes = contend(&f, &partition, 99, 6);
        assert_eq!(f.billing.gate.entered(), 1);
        let first = outcomes[0].clone().unwrap_err();
        assert!(matches!(first, RankportError::NotFound(_)));
        assert!(outcomes.iter().all(|o| o.as_ref().err() == Some(&first)));
        assert!(f.billing.slots.lock().is_empty());
    }

    #[test]
    fn test_unfinished_result_leaves_no_slot() {
        let f = fixture();
        let (partition, competition_id) = scored_competition(&f, false);

        let outcomes = contend(&f, &partition, competition_id, 4);
        assert_eq!(f.billing.gate.entered(), 1);
        assert!(outcomes.iter().all(|o| o.as_ref().map(|r| r.billing_yen).ok() == Some(150)));
        assert!(f.billing.slots.lock().is_empty());

        // Live figures are recomputed on every call.
        f.billing.report(&partition, competition_id).unwrap();
        assert_eq!(f.billing.gate.entered(), 2);
    }

    #[test]
    fn test_error_is_not_memoized() {
        let f = fixture();
        f.directory.provision("kaifu", "Kaifu").unwrap();
        let partition = f.directory.resolve("kaifu").unwrap();

        assert!(matches!(f.billing.report(&partition, 99), Err(RankportError::NotFound(_))));
        assert!(f.billing.slots.lock().is_empty());

        // Same key succeeds once it can.
        let c = partition.store().add_competition("Later").unwrap();
        assert!(f.billing.report(&partition, c.id).is_ok());
    }

    #[test]
    fn test_tenant_report_and_totals() {
        let f = fixture();
        for name in ["alpha", "bravo"] {
            f.directory.provision(name, name).unwrap();
        }
        let alpha = f.directory.resolve("alpha").unwrap();
        alpha.store().add_players(&["p".to_string()]).unwrap();
        let c1 = alpha.store().add_competition("One").unwrap();
        let c2 = alpha.store().add_competition("Two").unwrap();
        alpha.store().replace_scores(c1.id, &rows(&[("p", 1)])).unwrap();
        alpha.store().replace_scores(c2.id, &rows(&[("p", 1)])).unwrap();

        let reports = f.billing.tenant_report(&alpha).unwrap();
        let ids: Vec<CompetitionId> = reports.iter().map(|r| r.competition_id).collect();
        assert_eq!(ids, vec![c2.id, c1.id]);

        let totals = f.billing.tenant_totals(&f.directory, None).unwrap();
        let pairs: Vec<(&str, i64)> = totals.iter().map(|t| (t.name.as_str(), t.billing)).collect();
        assert_eq!(pairs, vec![("alpha", 100), ("bravo", 0)]);

        let from_b = f.billing.tenant_totals(&f.directory, Some("b")).unwrap();
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_b[0].name, "bravo");
    }
}
