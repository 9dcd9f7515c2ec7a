use std::sync::Arc;

use db::models::achievement::Achievement;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use super::{
    achievement_evaluator::AchievementEvaluator,
    config::Config,
    criteria::CriteriaRegistry,
    progress_ledger::{PointsAndLevel, ProgressLedger, checked_delta},
    stores::{GamificationError, SqliteStore},
};

#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub progress: PointsAndLevel,
    pub newly_unlocked: Vec<Achievement>,
}

/// Ledger and evaluator wired together for the operations that change evaluation inputs
#[derive(Clone)]
pub struct GamificationService {
    ledger: ProgressLedger,
    evaluator: AchievementEvaluator,
}

impl GamificationService {
    pub fn new(ledger: ProgressLedger, evaluator: AchievementEvaluator) -> Self {
        Self { ledger, evaluator }
    }

    /// Ledger and evaluator backed by `pool`, using the standard criteria
    pub fn sqlite(pool: SqlitePool, config: &Config) -> Self {
        let store = Arc::new(SqliteStore::new(pool));
        Self {
            ledger: ProgressLedger::new(store.clone(), config.max_update_retries),
            evaluator: AchievementEvaluator::new(
                store.clone(),
                store.clone(),
                store,
                Arc::new(CriteriaRegistry::standard()),
                config.max_update_retries,
            ),
        }
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    pub fn evaluator(&self) -> &AchievementEvaluator {
        &self.evaluator
    }

    /// Points update requested by a client: validate, award, then evaluate.
    /// Unlike [`Self::reward`], an evaluation failure is returned to the caller.
    pub async fn add_points(
        &self,
        user_id: Uuid,
        delta: i64,
    ) -> Result<ProgressUpdate, GamificationError> {
        let delta = checked_delta(delta)?;
        self.ledger.award_points(user_id, delta).await?;
        let evaluation = self.evaluator.evaluate_with_progress(user_id).await?;
        Ok(ProgressUpdate {
            progress: evaluation.progress,
            newly_unlocked: evaluation.newly_unlocked,
        })
    }

    /// Award points earned by some other operation, then evaluate. The award must succeed;
    /// a failed evaluation is logged and reported as no unlocks.
    pub async fn reward(
        &self,
        user_id: Uuid,
        delta: u32,
    ) -> Result<ProgressUpdate, GamificationError> {
        let awarded = self.ledger.award_points(user_id, delta).await?;
        match self.evaluator.evaluate_with_progress(user_id).await {
            Ok(evaluation) => Ok(ProgressUpdate {
                progress: evaluation.progress,
                newly_unlocked: evaluation.newly_unlocked,
            }),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Achievement evaluation failed after award");
                Ok(ProgressUpdate {
                    progress: awarded,
                    newly_unlocked: Vec::new(),
                })
            }
        }
    }

    /// Re-check achievements after a change that awarded no points
    pub async fn recheck(&self, user_id: Uuid) -> Vec<Achievement> {
        match self.evaluator.evaluate(user_id).await {
            Ok(unlocked) => unlocked,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Achievement evaluation failed");
                Vec::new()
            }
        }
    }
}
