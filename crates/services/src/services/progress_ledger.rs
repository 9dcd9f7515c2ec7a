use std::sync::Arc;

use db::models::user::UserProgress;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::stores::{GamificationError, ProgressStore, retry_on_conflict};

pub const POINTS_PER_LEVEL: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsAndLevel {
    pub points: i64,
    pub level: i64,
}

impl From<&UserProgress> for PointsAndLevel {
    fn from(progress: &UserProgress) -> Self {
        Self {
            points: progress.points,
            level: progress.level,
        }
    }
}

/// Largest level L >= 1 with `points >= (L - 1) * 100`
pub fn level_for_points(points: i64) -> i64 {
    points.max(0) / POINTS_PER_LEVEL + 1
}

/// Add `delta` to the user's points and advance the level past every threshold crossed.
/// The level never goes down.
pub fn apply_points(progress: &mut UserProgress, delta: u32) -> PointsAndLevel {
    progress.points += i64::from(delta);
    while progress.points >= progress.level * POINTS_PER_LEVEL {
        progress.level += 1;
    }
    PointsAndLevel::from(&*progress)
}

/// Reject deltas that would take points away or do not fit a single award
pub fn checked_delta(delta: i64) -> Result<u32, GamificationError> {
    if delta < 0 {
        return Err(GamificationError::InvalidPointsDelta(delta));
    }
    u32::try_from(delta).map_err(|_| GamificationError::PointsOverflow(delta))
}

/// Persists point awards for one user at a time
#[derive(Clone)]
pub struct ProgressLedger {
    store: Arc<dyn ProgressStore>,
    max_retries: usize,
}

impl ProgressLedger {
    pub fn new(store: Arc<dyn ProgressStore>, max_retries: usize) -> Self {
        Self { store, max_retries }
    }

    /// Add `delta` points and save. Reruns the load/apply/save cycle if another update to
    /// the same user landed in between.
    pub async fn award_points(
        &self,
        user_id: Uuid,
        delta: u32,
    ) -> Result<PointsAndLevel, GamificationError> {
        retry_on_conflict(self.max_retries, || self.award_once(user_id, delta)).await
    }

    pub async fn current(&self, user_id: Uuid) -> Result<PointsAndLevel, GamificationError> {
        let progress = self.store.load(user_id).await?;
        Ok(PointsAndLevel::from(&progress))
    }

    async fn award_once(
        &self,
        user_id: Uuid,
        delta: u32,
    ) -> Result<PointsAndLevel, GamificationError> {
        let mut progress = self.store.load(user_id).await?;
        let previous_level = progress.level;
        let result = apply_points(&mut progress, delta);

        if delta == 0 && result.level == previous_level {
            debug!(user_id = %user_id, "Zero-point award, nothing to save");
            return Ok(result);
        }

        self.store.save(&mut progress).await?;

        if result.level > previous_level {
            info!(
                user_id = %user_id,
                level = result.level,
                points = result.points,
                "User levelled up"
            );
        } else {
            debug!(user_id = %user_id, delta, points = result.points, "Awarded points");
        }
        Ok(result)
    }
}
