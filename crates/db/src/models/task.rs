use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display, Default,
)]
#[sqlx(type_name = "task_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid, // Owner
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub rewarded: bool, // Completion points already paid out
    pub due_date: Option<DateTime<Utc>>,
    pub priority: TaskPriority,
    pub points: i64,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<TaskPriority>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<TaskPriority>,
}

/// Per-user task counters read in a single pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct TaskCounts {
    pub created: i64,
    pub completed: i64,
    pub high_priority_completed: i64,
}

impl TaskCounts {
    pub fn pending(&self) -> i64 {
        self.created - self.completed
    }
}

const TASK_COLUMNS: &str = "id, user_id, title, description, completed, rewarded, due_date, priority, points, completed_at, created_at, updated_at";

impl Task {
    pub async fn create(
        pool: &SqlitePool,
        user_id: Uuid,
        data: &CreateTask,
        points: i64,
        task_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let priority = data.priority.unwrap_or_default();
        let now = Utc::now();
        sqlx::query_as::<_, Task>(&format!(
            r#"INSERT INTO tasks (id, user_id, title, description, due_date, priority, points, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
               RETURNING {TASK_COLUMNS}"#
        ))
        .bind(task_id)
        .bind(user_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.due_date)
        .bind(priority)
        .bind(points)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    /// Find a task only if it belongs to `user_id`
    pub async fn find_for_user(
        pool: &SqlitePool,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// All tasks of a user, soonest due first; undated tasks last
    pub async fn find_by_user(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            r#"SELECT {TASK_COLUMNS}
               FROM tasks
               WHERE user_id = $1
               ORDER BY due_date IS NULL, due_date ASC, created_at ASC"#
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_recent_by_user(
        pool: &SqlitePool,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            r#"SELECT {TASK_COLUMNS}
               FROM tasks
               WHERE user_id = $1
               ORDER BY created_at DESC
               LIMIT $2"#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Most recently completed tasks, newest first
    pub async fn find_recently_completed(
        pool: &SqlitePool,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            r#"SELECT {TASK_COLUMNS}
               FROM tasks
               WHERE user_id = $1 AND completed = 1
               ORDER BY completed_at DESC
               LIMIT $2"#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Open tasks due on or before `until`
    pub async fn find_pending_due_by(
        pool: &SqlitePool,
        user_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            r#"SELECT {TASK_COLUMNS}
               FROM tasks
               WHERE user_id = $1 AND completed = 0 AND due_date IS NOT NULL AND due_date <= $2
               ORDER BY due_date ASC"#
        ))
        .bind(user_id)
        .bind(until)
        .fetch_all(pool)
        .await
    }

    /// Persist every mutable field of `task`
    pub async fn update(pool: &SqlitePool, task: &Task) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            r#"UPDATE tasks
               SET title = $3, description = $4, completed = $5, due_date = $6,
                   priority = $7, points = $8, completed_at = $9, updated_at = $10
               WHERE id = $1 AND user_id = $2
               RETURNING {TASK_COLUMNS}"#
        ))
        .bind(task.id)
        .bind(task.user_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.completed)
        .bind(task.due_date)
        .bind(task.priority)
        .bind(task.points)
        .bind(task.completed_at)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    /// Atomically flag the task as rewarded. Returns false if it already was, so completion
    /// points are paid at most once even under concurrent updates.
    pub async fn claim_reward(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE tasks SET rewarded = 1 WHERE id = $1 AND rewarded = 0")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Undo a claim whose payout failed
    pub async fn release_reward(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET rewarded = 0 WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid, user_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_created(pool: &SqlitePool, user_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
    }

    pub async fn count_completed(pool: &SqlitePool, user_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE user_id = $1 AND completed = 1")
            .bind(user_id)
            .fetch_one(pool)
            .await
    }

    pub async fn count_completed_with_priority(
        pool: &SqlitePool,
        user_id: Uuid,
        priority: TaskPriority,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE user_id = $1 AND completed = 1 AND priority = $2",
        )
        .bind(user_id)
        .bind(priority)
        .fetch_one(pool)
        .await
    }

    /// Created, completed and completed high-priority counts in one query
    pub async fn counts_for_user(pool: &SqlitePool, user_id: Uuid) -> Result<TaskCounts, sqlx::Error> {
        sqlx::query_as::<_, TaskCounts>(
            r#"SELECT
                COUNT(*) AS created,
                COALESCE(SUM(CASE WHEN completed = 1 THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN completed = 1 AND priority = 'high' THEN 1 ELSE 0 END), 0)
                    AS high_priority_completed
               FROM tasks
               WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
    }
}
