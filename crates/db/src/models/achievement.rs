use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

pub const DEFAULT_ACHIEVEMENT_POINTS: i64 = 50;
pub const DEFAULT_ACHIEVEMENT_ICON: &str = "default-icon.png";

/// Reference data describing an unlockable milestone. Created out-of-band and never mutated
/// by progress evaluation.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Achievement {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub points: i64, // Bonus awarded on unlock
    pub criteria: String, // Criteria tag; unknown tags are stored but never match
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAchievement {
    pub title: String,
    pub description: String,
    pub icon: Option<String>,
    pub points: Option<i64>,
    pub criteria: String,
}

/// An achievement together with whether a given user has unlocked it
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AchievementWithStatus {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub achievement: Achievement,
    pub is_unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl std::ops::Deref for AchievementWithStatus {
    type Target = Achievement;
    fn deref(&self) -> &Self::Target {
        &self.achievement
    }
}

impl Achievement {
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateAchievement,
        id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let icon = data
            .icon
            .clone()
            .unwrap_or_else(|| DEFAULT_ACHIEVEMENT_ICON.to_string());
        let points = data.points.unwrap_or(DEFAULT_ACHIEVEMENT_POINTS);
        sqlx::query_as::<_, Achievement>(
            r#"INSERT INTO achievements (id, title, description, icon, points, criteria, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id, title, description, icon, points, criteria, created_at"#,
        )
        .bind(id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(icon)
        .bind(points)
        .bind(&data.criteria)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Achievement>(
            r#"SELECT id, title, description, icon, points, criteria, created_at
               FROM achievements
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Achievement>(
            r#"SELECT id, title, description, icon, points, criteria, created_at
               FROM achievements
               ORDER BY points ASC, title ASC"#,
        )
        .fetch_all(pool)
        .await
    }

    /// All definitions whose id is not in `excluded`
    pub async fn find_excluding(
        pool: &SqlitePool,
        excluded: &HashSet<Uuid>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, title, description, icon, points, criteria, created_at FROM achievements",
        );

        if !excluded.is_empty() {
            query.push(" WHERE id NOT IN (");
            let mut ids = query.separated(", ");
            for id in excluded {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
        }
        query.push(" ORDER BY points ASC, title ASC");

        query.build_query_as::<Achievement>().fetch_all(pool).await
    }

    /// Every definition, flagged with the user's unlock state
    pub async fn find_all_with_status(
        pool: &SqlitePool,
        user_id: Uuid,
    ) -> Result<Vec<AchievementWithStatus>, sqlx::Error> {
        sqlx::query_as::<_, AchievementWithStatus>(
            r#"SELECT
                a.id, a.title, a.description, a.icon, a.points, a.criteria, a.created_at,
                ua.achievement_id IS NOT NULL AS is_unlocked,
                ua.unlocked_at
               FROM achievements a
               LEFT JOIN user_achievements ua
                 ON ua.achievement_id = a.id AND ua.user_id = $1
               ORDER BY a.points ASC, a.title ASC"#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// The user's most recently unlocked achievements, newest first
    pub async fn find_recently_unlocked(
        pool: &SqlitePool,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AchievementWithStatus>, sqlx::Error> {
        sqlx::query_as::<_, AchievementWithStatus>(
            r#"SELECT
                a.id, a.title, a.description, a.icon, a.points, a.criteria, a.created_at,
                1 AS is_unlocked,
                ua.unlocked_at
               FROM user_achievements ua
               JOIN achievements a ON a.id = ua.achievement_id
               WHERE ua.user_id = $1
               ORDER BY ua.unlocked_at DESC
               LIMIT $2"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn count_unlocked(pool: &SqlitePool, user_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM user_achievements WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
    }
}
