//! Competition leaderboards.

use rankport_core::error::Result;
use rankport_core::types::{CompetitionId, CompetitionRank, PlayerId};

use crate::db::now_unix;
use crate::store::RankedScore;
use crate::tenant::TenantPartition;
use crate::visit::VisitTracker;

/// Maximum entries returned per ranking page.
pub const RANKING_PAGE_SIZE: usize = 100;

pub struct RankingEngine {
    visits: VisitTracker,
}

impl RankingEngine {
    pub fn new(visits: VisitTracker) -> Self {
        Self { visits }
    }

    /// One page of the leaderboard, skipping the first `rank_after` entries.
    ///
    /// When `viewer` is a player, their first visit to this competition is recorded.
    pub fn rank(
        &self,
        partition: &TenantPartition,
        competition_id: CompetitionId,
        viewer: Option<PlayerId>,
        rank_after: usize,
    ) -> Result<Vec<CompetitionRank>> {
        let (_, scores) = partition.store().ranking_snapshot(competition_id)?;

        if let Some(player_id) = viewer {
            self.visits.record_visit(partition.id(), competition_id, player_id, now_unix())?;
        }

        Ok(page(scores, rank_after))
    }
}

/// Order by score, then by player id (both descending), and cut one page.
pub fn page(mut scores: Vec<RankedScore>, rank_after: usize) -> Vec<CompetitionRank> {
    scores.sort_by(|a, b| b.score.cmp(&a.score).then(b.player_id.cmp(&a.player_id)));
    scores
        .into_iter()
        .enumerate()
        .skip(rank_after)
        .take(RANKING_PAGE_SIZE)
        .map(|(i, s)| CompetitionRank {
            rank: i as i64 + 1,
            score: s.score,
            player_id: s.player_id,
            player_display_name: s.display_name,
        })
        .collect()
}
