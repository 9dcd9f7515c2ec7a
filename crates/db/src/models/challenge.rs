use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

/// A time-boxed goal users can opt into
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub duration_days: i64,
    pub points: i64, // Paid out on completion
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChallenge {
    pub title: String,
    pub description: String,
    pub duration_days: i64,
    pub points: Option<i64>,
}

/// A user's participation in a challenge
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct UserChallenge {
    pub user_id: Uuid,
    pub challenge_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub progress: i64,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Challenge {
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateChallenge,
        id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Challenge>(
            r#"INSERT INTO challenges (id, title, description, duration_days, points, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id, title, description, duration_days, points, active, created_at"#,
        )
        .bind(id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.duration_days)
        .bind(data.points.unwrap_or(0))
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Challenge>(
            r#"SELECT id, title, description, duration_days, points, active, created_at
               FROM challenges
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_active(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Challenge>(
            r#"SELECT id, title, description, duration_days, points, active, created_at
               FROM challenges
               WHERE active = 1
               ORDER BY created_at ASC"#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn set_active(pool: &SqlitePool, id: Uuid, active: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE challenges SET active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(pool)
            .await?;
        Ok(())
    }
}

impl UserChallenge {
    pub async fn create(
        pool: &SqlitePool,
        user_id: Uuid,
        challenge_id: Uuid,
        started_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, UserChallenge>(
            r#"INSERT INTO user_challenges (user_id, challenge_id, started_at, ends_at)
               VALUES ($1, $2, $3, $4)
               RETURNING user_id, challenge_id, started_at, ends_at, progress, completed_at"#,
        )
        .bind(user_id)
        .bind(challenge_id)
        .bind(started_at)
        .bind(ends_at)
        .fetch_one(pool)
        .await
    }

    pub async fn find(
        pool: &SqlitePool,
        user_id: Uuid,
        challenge_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, UserChallenge>(
            r#"SELECT user_id, challenge_id, started_at, ends_at, progress, completed_at
               FROM user_challenges
               WHERE user_id = $1 AND challenge_id = $2"#,
        )
        .bind(user_id)
        .bind(challenge_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_user(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, UserChallenge>(
            r#"SELECT user_id, challenge_id, started_at, ends_at, progress, completed_at
               FROM user_challenges
               WHERE user_id = $1
               ORDER BY started_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Set `completed_at` unless it is already set. Returns whether this call completed it.
    pub async fn mark_completed(
        pool: &SqlitePool,
        user_id: Uuid,
        challenge_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE user_challenges
               SET completed_at = $3, progress = 100
               WHERE user_id = $1 AND challenge_id = $2 AND completed_at IS NULL"#,
        )
        .bind(user_id)
        .bind(challenge_id)
        .bind(completed_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Revert a completion whose payout failed
    pub async fn clear_completed(
        pool: &SqlitePool,
        user_id: Uuid,
        challenge_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE user_challenges
               SET completed_at = NULL, progress = 0
               WHERE user_id = $1 AND challenge_id = $2"#,
        )
        .bind(user_id)
        .bind(challenge_id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
