//! Collaborators read and written by progress evaluation, plus their SQLite implementation.

use std::{collections::HashSet, future::Future, time::Duration};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use db::models::{
    achievement::Achievement,
    task::{Task, TaskCounts, TaskPriority},
    user::{SaveOutcome, UserProgress},
};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GamificationError {
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    #[error("achievement definition not found")]
    AchievementNotFound,
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("user {0} was updated concurrently")]
    ConcurrentUpdate(Uuid),
    #[error("points delta must not be negative, got {0}")]
    InvalidPointsDelta(i64),
    #[error("points award of {0} is too large")]
    PointsOverflow(i64),
}

impl GamificationError {
    /// Lost an optimistic-concurrency race; the whole read-modify-write can be rerun
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentUpdate(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound(_) | Self::AchievementNotFound)
    }
}

/// Task counters scoped to one user, reflecting persisted state at call time
#[async_trait]
pub trait StatisticsProvider: Send + Sync {
    async fn count_completed_tasks(&self, user_id: Uuid) -> Result<i64, GamificationError>;

    async fn count_created_tasks(&self, user_id: Uuid) -> Result<i64, GamificationError>;

    async fn count_completed_high_priority_tasks(
        &self,
        user_id: Uuid,
    ) -> Result<i64, GamificationError>;

    /// All counters at once. Stores that can batch the read should override this.
    async fn task_counts(&self, user_id: Uuid) -> Result<TaskCounts, GamificationError> {
        Ok(TaskCounts {
            created: self.count_created_tasks(user_id).await?,
            completed: self.count_completed_tasks(user_id).await?,
            high_priority_completed: self.count_completed_high_priority_tasks(user_id).await?,
        })
    }
}

/// Read access to achievement definitions
#[async_trait]
pub trait AchievementCatalog: Send + Sync {
    /// Every definition whose id is not in `unlocked`
    async fn list_excluding(
        &self,
        unlocked: &HashSet<Uuid>,
    ) -> Result<Vec<Achievement>, GamificationError>;
}

/// Load and atomically save a user's points, level and unlock records
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self, user_id: Uuid) -> Result<UserProgress, GamificationError>;

    /// Fails with `ConcurrentUpdate` if the user was saved since `progress` was loaded and
    /// with `UserNotFound` if the user is gone. Nothing is written in either case.
    async fn save(&self, progress: &mut UserProgress) -> Result<(), GamificationError>;
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatisticsProvider for SqliteStore {
    async fn count_completed_tasks(&self, user_id: Uuid) -> Result<i64, GamificationError> {
        Ok(Task::count_completed(&self.pool, user_id).await?)
    }

    async fn count_created_tasks(&self, user_id: Uuid) -> Result<i64, GamificationError> {
        Ok(Task::count_created(&self.pool, user_id).await?)
    }

    async fn count_completed_high_priority_tasks(
        &self,
        user_id: Uuid,
    ) -> Result<i64, GamificationError> {
        Ok(Task::count_completed_with_priority(&self.pool, user_id, TaskPriority::High).await?)
    }

    async fn task_counts(&self, user_id: Uuid) -> Result<TaskCounts, GamificationError> {
        Ok(Task::counts_for_user(&self.pool, user_id).await?)
    }
}

#[async_trait]
impl AchievementCatalog for SqliteStore {
    async fn list_excluding(
        &self,
        unlocked: &HashSet<Uuid>,
    ) -> Result<Vec<Achievement>, GamificationError> {
        Ok(Achievement::find_excluding(&self.pool, unlocked).await?)
    }
}

#[async_trait]
impl ProgressStore for SqliteStore {
    async fn load(&self, user_id: Uuid) -> Result<UserProgress, GamificationError> {
        UserProgress::load(&self.pool, user_id)
            .await?
            .ok_or(GamificationError::UserNotFound(user_id))
    }

    async fn save(&self, progress: &mut UserProgress) -> Result<(), GamificationError> {
        let outcome = progress.save(&self.pool).await.map_err(|e| match e {
            // An unlock record pointing at a definition that was removed meanwhile
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                GamificationError::AchievementNotFound
            }
            other => GamificationError::Store(other),
        })?;

        match outcome {
            SaveOutcome::Saved => Ok(()),
            SaveOutcome::Stale => Err(GamificationError::ConcurrentUpdate(progress.user_id)),
            SaveOutcome::Missing => Err(GamificationError::UserNotFound(progress.user_id)),
        }
    }
}

/// Rerun `op` from scratch while it loses optimistic-concurrency races, up to `max_retries`
/// extra attempts. Any other error is returned immediately.
pub(crate) async fn retry_on_conflict<T, F, Fut>(
    max_retries: usize,
    op: F,
) -> Result<T, GamificationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GamificationError>>,
{
    op.retry(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(200))
            .with_max_times(max_retries)
            .with_jitter(),
    )
    .when(GamificationError::is_conflict)
    .notify(|e, dur| {
        warn!(
            error = %e,
            "Progress update lost a concurrent race, retrying after {:.3}s",
            dur.as_secs_f64()
        )
    })
    .await
}
