use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub points: i64,
    pub level: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
}

/// A user satisfied an achievement's criteria at `unlocked_at`. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct UnlockRecord {
    pub achievement_id: Uuid,
    pub unlocked_at: DateTime<Utc>,
}

/// The gamification slice of a user: points, level and the unlock records it owns.
///
/// Loaded and saved as one unit. `version` is the optimistic concurrency token read at load
/// time; `save` only succeeds if nobody else saved the same user in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProgress {
    pub user_id: Uuid,
    pub points: i64,
    pub level: i64,
    pub unlocked: Vec<UnlockRecord>,
    #[serde(skip)]
    pub version: i64,
}

/// Result of a versioned save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Another writer saved this user after it was loaded
    Stale,
    /// The user row no longer exists
    Missing,
}

impl User {
    pub async fn create(pool: &SqlitePool, data: &CreateUser, id: Uuid) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, User>(
            r#"INSERT INTO users (id, name, email, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $4)
               RETURNING id, name, email, points, level, created_at, updated_at"#,
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.email)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"SELECT id, name, email, points, level, created_at, updated_at
               FROM users
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"SELECT id, name, email, points, level, created_at, updated_at
               FROM users
               WHERE email = $1"#,
        )
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    /// Removes the user together with the unlock records, tasks and challenge entries it owns
    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

impl UserProgress {
    pub fn unlocked_ids(&self) -> HashSet<Uuid> {
        self.unlocked.iter().map(|r| r.achievement_id).collect()
    }

    pub fn is_unlocked(&self, achievement_id: Uuid) -> bool {
        self.unlocked.iter().any(|r| r.achievement_id == achievement_id)
    }

    /// Append an unlock record. Returns false (and changes nothing) if the achievement is
    /// already unlocked for this user.
    pub fn record_unlock(&mut self, achievement_id: Uuid, unlocked_at: DateTime<Utc>) -> bool {
        if self.is_unlocked(achievement_id) {
            return false;
        }
        self.unlocked.push(UnlockRecord {
            achievement_id,
            unlocked_at,
        });
        true
    }

    pub async fn load(pool: &SqlitePool, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        // Both reads come from the same snapshot
        let mut tx = pool.begin().await?;

        let row: Option<(i64, i64, i64)> =
            sqlx::query_as("SELECT points, level, version FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((points, level, version)) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let unlocked = sqlx::query_as::<_, UnlockRecord>(
            r#"SELECT achievement_id, unlocked_at
               FROM user_achievements
               WHERE user_id = $1
               ORDER BY unlocked_at ASC"#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(Self {
            user_id,
            points,
            level,
            unlocked,
            version,
        }))
    }

    /// Write points, level and any new unlock records in one transaction, guarded by the
    /// version read at load time. On success the in-memory version is advanced so the same
    /// value can be saved again.
    pub async fn save(&mut self, pool: &SqlitePool) -> Result<SaveOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let updated = sqlx::query(
            r#"UPDATE users
               SET points = $2, level = $3, version = version + 1, updated_at = $5
               WHERE id = $1 AND version = $4"#,
        )
        .bind(self.user_id)
        .bind(self.points)
        .bind(self.level)
        .bind(self.version)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = $1")
                .bind(self.user_id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            return Ok(if exists.is_some() {
                SaveOutcome::Stale
            } else {
                SaveOutcome::Missing
            });
        }

        // Unlock records are append-only, so replaying the whole set only adds the new ones
        for record in &self.unlocked {
            sqlx::query(
                r#"INSERT INTO user_achievements (user_id, achievement_id, unlocked_at)
                   VALUES ($1, $2, $3)
                   ON CONFLICT (user_id, achievement_id) DO NOTHING"#,
            )
            .bind(self.user_id)
            .bind(record.achievement_id)
            .bind(record.unlocked_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.version += 1;

        Ok(SaveOutcome::Saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DBService,
        models::achievement::{Achievement, CreateAchievement},
    };

    async fn setup() -> (DBService, User) {
        let db = DBService::new_in_memory().await.unwrap();
        let user = User::create(
            &db.pool,
            &CreateUser {
                name: "Ana".to_string(),
                email: "ana@example.com".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        (db, user)
    }

    #[tokio::test]
    async fn new_user_starts_at_level_one_with_no_points() {
        let (db, user) = setup().await;
        assert_eq!(user.points, 0);
        assert_eq!(user.level, 1);

        let progress = UserProgress::load(&db.pool, user.id).await.unwrap().unwrap();
        assert_eq!(progress.points, 0);
        assert_eq!(progress.level, 1);
        assert!(progress.unlocked.is_empty());
    }

    #[tokio::test]
    async fn load_returns_none_for_unknown_user() {
        let (db, _) = setup().await;
        assert!(UserProgress::load(&db.pool, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_persists_points_level_and_unlocks() {
        let (db, user) = setup().await;
        let achievement = Achievement::create(
            &db.pool,
            &CreateAchievement {
                title: "First Step".to_string(),
                description: "Complete a task".to_string(),
                icon: None,
                points: None,
                criteria: "TASKS_COMPLETED_1".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let mut progress = UserProgress::load(&db.pool, user.id).await.unwrap().unwrap();
        progress.points = 150;
        progress.level = 2;
        assert!(progress.record_unlock(achievement.id, Utc::now()));
        assert!(!progress.record_unlock(achievement.id, Utc::now()));

        assert_eq!(progress.save(&db.pool).await.unwrap(), SaveOutcome::Saved);

        let reloaded = UserProgress::load(&db.pool, user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.points, 150);
        assert_eq!(reloaded.level, 2);
        assert_eq!(reloaded.unlocked_ids(), HashSet::from([achievement.id]));
        assert_eq!(reloaded.version, progress.version);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let (db, user) = setup().await;
        let mut first = UserProgress::load(&db.pool, user.id).await.unwrap().unwrap();
        let mut second = first.clone();

        first.points = 10;
        assert_eq!(first.save(&db.pool).await.unwrap(), SaveOutcome::Saved);

        second.points = 20;
        assert_eq!(second.save(&db.pool).await.unwrap(), SaveOutcome::Stale);

        let reloaded = UserProgress::load(&db.pool, user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.points, 10);
    }

    #[tokio::test]
    async fn save_reports_missing_user() {
        let (db, user) = setup().await;
        let mut progress = UserProgress::load(&db.pool, user.id).await.unwrap().unwrap();
        assert_eq!(User::delete(&db.pool, user.id).await.unwrap(), 1);

        progress.points = 5;
        assert_eq!(progress.save(&db.pool).await.unwrap(), SaveOutcome::Missing);
    }

    #[tokio::test]
    async fn emails_are_unique_and_searchable() {
        let (db, user) = setup().await;
        let found = User::find_by_email(&db.pool, "ana@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);

        let duplicate = User::create(
            &db.pool,
            &CreateUser {
                name: "Other Ana".to_string(),
                email: "ana@example.com".to_string(),
            },
            Uuid::new_v4(),
        )
        .await;
        assert!(duplicate.is_err());
    }
}
