use db::models::{
    achievement::{Achievement, AchievementWithStatus},
    task::Task,
    user::User,
};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use super::suggestions::{ProductivityTip, dashboard_tips};

const RECENT_LIMIT: i64 = 5;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("user {0} not found")]
    UserNotFound(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub pending_tasks: i64,
    pub completed_tasks: i64,
    pub unlocked_achievements: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub points: i64,
    pub level: i64,
    pub stats: DashboardStats,
    pub recent_tasks: Vec<Task>,
    pub recent_achievements: Vec<AchievementWithStatus>,
    pub suggestions: Vec<ProductivityTip>,
}

/// Read-only views over a user's progress
#[derive(Clone)]
pub struct DashboardService {
    pool: SqlitePool,
}

impl DashboardService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn summary(&self, user_id: Uuid) -> Result<Dashboard, DashboardError> {
        let user = User::find_by_id(&self.pool, user_id)
            .await?
            .ok_or(DashboardError::UserNotFound(user_id))?;

        let counts = Task::counts_for_user(&self.pool, user_id).await?;
        let unlocked = Achievement::count_unlocked(&self.pool, user_id).await?;
        let recent_tasks = Task::find_recent_by_user(&self.pool, user_id, RECENT_LIMIT).await?;
        let recent_achievements =
            Achievement::find_recently_unlocked(&self.pool, user_id, RECENT_LIMIT).await?;

        Ok(Dashboard {
            points: user.points,
            level: user.level,
            stats: DashboardStats {
                pending_tasks: counts.pending(),
                completed_tasks: counts.completed,
                unlocked_achievements: unlocked,
            },
            recent_tasks,
            recent_achievements,
            suggestions: dashboard_tips(),
        })
    }

    /// Every achievement definition flagged with the user's unlock state
    pub async fn achievements_with_status(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<AchievementWithStatus>, DashboardError> {
        if User::find_by_id(&self.pool, user_id).await?.is_none() {
            return Err(DashboardError::UserNotFound(user_id));
        }
        Ok(Achievement::find_all_with_status(&self.pool, user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use db::{
        DBService,
        models::{
            achievement::CreateAchievement,
            task::{CreateTask, TaskPriority, UpdateTask},
            user::CreateUser,
        },
    };

    use super::*;
    use crate::services::{config::Config, gamification::GamificationService, tasks::TaskService};

    async fn setup() -> (DBService, DashboardService, TaskService, Uuid) {
        let db = DBService::new_in_memory().await.unwrap();
        let config = Config::default();
        let tasks = TaskService::new(
            db.pool.clone(),
            config.task_points,
            GamificationService::sqlite(db.pool.clone(), &config),
        );
        let user = User::create(
            &db.pool,
            &CreateUser {
                name: "Joana".to_string(),
                email: "joana@example.com".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        (db.clone(), DashboardService::new(db.pool.clone()), tasks, user.id)
    }

    async fn define(db: &DBService, title: &str, criteria: &str) -> Achievement {
        Achievement::create(
            &db.pool,
            &CreateAchievement {
                title: title.to_string(),
                description: String::new(),
                icon: None,
                points: None,
                criteria: criteria.to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn summary_reflects_tasks_and_unlocks() {
        let (db, dashboard, tasks, user_id) = setup().await;
        let first_step = define(&db, "First Step", "TASKS_COMPLETED_1").await;
        define(&db, "Ten Down", "TASKS_COMPLETED_10").await;

        let mut ids = Vec::new();
        for i in 0..7 {
            let created = tasks
                .create_task(
                    user_id,
                    CreateTask {
                        title: format!("task {i}"),
                        priority: Some(TaskPriority::Medium),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            ids.push(created.task.id);
        }
        tasks
            .update_task(
                user_id,
                ids[0],
                UpdateTask {
                    completed: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let summary = dashboard.summary(user_id).await.unwrap();
        assert_eq!(
            summary.stats,
            DashboardStats {
                pending_tasks: 6,
                completed_tasks: 1,
                unlocked_achievements: 1,
            }
        );
        assert_eq!(summary.points, 60);
        assert_eq!(summary.recent_tasks.len(), 5);
        assert_eq!(summary.recent_achievements.len(), 1);
        assert_eq!(summary.recent_achievements[0].id, first_step.id);
        assert_eq!(summary.suggestions, dashboard_tips());
    }

    #[tokio::test]
    async fn achievements_view_flags_unlocked_ones() {
        let (db, dashboard, tasks, user_id) = setup().await;
        let first_step = define(&db, "First Step", "TASKS_COMPLETED_1").await;
        let ten_down = define(&db, "Ten Down", "TASKS_COMPLETED_10").await;

        let created = tasks
            .create_task(
                user_id,
                CreateTask {
                    title: "only".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tasks
            .update_task(
                user_id,
                created.task.id,
                UpdateTask {
                    completed: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let view = dashboard.achievements_with_status(user_id).await.unwrap();
        let flags: Vec<(Uuid, bool)> = view.iter().map(|a| (a.id, a.is_unlocked)).collect();
        assert!(flags.contains(&(first_step.id, true)));
        assert!(flags.contains(&(ten_down.id, false)));
        assert!(view.iter().filter(|a| a.is_unlocked).all(|a| a.unlocked_at.is_some()));
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (_db, dashboard, _tasks, _) = setup().await;
        assert!(matches!(
            dashboard.summary(Uuid::new_v4()).await,
            Err(DashboardError::UserNotFound(_))
        ));
    }
}
