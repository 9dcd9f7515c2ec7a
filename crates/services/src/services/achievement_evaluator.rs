use std::sync::Arc;

use chrono::Utc;
use db::models::achievement::Achievement;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    criteria::{CriteriaRegistry, StatsSnapshot},
    progress_ledger::{PointsAndLevel, apply_points, checked_delta},
    stores::{
        AchievementCatalog, GamificationError, ProgressStore, StatisticsProvider,
        retry_on_conflict,
    },
};

/// What one evaluation changed
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub newly_unlocked: Vec<Achievement>,
    /// Points and level after any unlock bonuses
    pub progress: PointsAndLevel,
}

/// Checks a user's statistics against every achievement they have not unlocked yet and
/// records the ones now satisfied, crediting their bonus points in the same save.
///
/// Evaluation is a single pass: a level reached through bonuses awarded here is only seen by
/// level-based criteria on the next evaluation.
#[derive(Clone)]
pub struct AchievementEvaluator {
    statistics: Arc<dyn StatisticsProvider>,
    catalog: Arc<dyn AchievementCatalog>,
    progress: Arc<dyn ProgressStore>,
    registry: Arc<CriteriaRegistry>,
    max_retries: usize,
}

impl AchievementEvaluator {
    pub fn new(
        statistics: Arc<dyn StatisticsProvider>,
        catalog: Arc<dyn AchievementCatalog>,
        progress: Arc<dyn ProgressStore>,
        registry: Arc<CriteriaRegistry>,
        max_retries: usize,
    ) -> Self {
        Self {
            statistics,
            catalog,
            progress,
            registry,
            max_retries,
        }
    }

    pub fn registry(&self) -> &CriteriaRegistry {
        &self.registry
    }

    /// Unlock every newly satisfied achievement and return them. Empty if nothing changed.
    pub async fn evaluate(&self, user_id: Uuid) -> Result<Vec<Achievement>, GamificationError> {
        Ok(self.evaluate_with_progress(user_id).await?.newly_unlocked)
    }

    /// Same as [`Self::evaluate`], also reporting the resulting points and level
    pub async fn evaluate_with_progress(
        &self,
        user_id: Uuid,
    ) -> Result<Evaluation, GamificationError> {
        retry_on_conflict(self.max_retries, || self.evaluate_once(user_id)).await
    }

    async fn evaluate_once(&self, user_id: Uuid) -> Result<Evaluation, GamificationError> {
        let mut progress = self.progress.load(user_id).await?;
        let unchanged = |progress: PointsAndLevel| Evaluation {
            newly_unlocked: Vec::new(),
            progress,
        };

        let candidates = self.catalog.list_excluding(&progress.unlocked_ids()).await?;
        if candidates.is_empty() {
            debug!(user_id = %user_id, "Every achievement already unlocked");
            return Ok(unchanged(PointsAndLevel::from(&progress)));
        }

        let counts = self.statistics.task_counts(user_id).await?;
        let stats = StatsSnapshot {
            completed_tasks: counts.completed,
            created_tasks: counts.created,
            high_priority_completed_tasks: counts.high_priority_completed,
            level: progress.level,
            points: progress.points,
        };

        let newly_unlocked: Vec<Achievement> = candidates
            .into_iter()
            .filter(|achievement| self.is_satisfied(user_id, achievement, &stats))
            .collect();
        if newly_unlocked.is_empty() {
            return Ok(unchanged(PointsAndLevel::from(&progress)));
        }

        let bonus = newly_unlocked
            .iter()
            .fold(0i64, |sum, achievement| sum.saturating_add(achievement.points.max(0)));
        let bonus = checked_delta(bonus)?;

        let unlocked_at = Utc::now();
        for achievement in &newly_unlocked {
            progress.record_unlock(achievement.id, unlocked_at);
        }
        let result = apply_points(&mut progress, bonus);

        self.progress.save(&mut progress).await?;

        for achievement in &newly_unlocked {
            info!(
                user_id = %user_id,
                achievement_id = %achievement.id,
                title = %achievement.title,
                bonus = achievement.points,
                "Achievement unlocked"
            );
        }

        Ok(Evaluation {
            newly_unlocked,
            progress: result,
        })
    }

    fn is_satisfied(&self, user_id: Uuid, achievement: &Achievement, stats: &StatsSnapshot) -> bool {
        match self.registry.matches(&achievement.criteria, stats) {
            Some(satisfied) => satisfied,
            None => {
                warn!(
                    user_id = %user_id,
                    achievement_id = %achievement.id,
                    criteria = %achievement.criteria,
                    "Unknown achievement criteria, treating as not satisfied"
                );
                false
            }
        }
    }
}
