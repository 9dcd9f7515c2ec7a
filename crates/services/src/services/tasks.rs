use chrono::Utc;
use db::models::{
    achievement::Achievement,
    task::{CreateTask, Task, TaskPriority, UpdateTask},
    user::User,
};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    config::TaskPoints, gamification::GamificationService, progress_ledger::PointsAndLevel,
    stores::GamificationError,
};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Gamification(#[from] GamificationError),
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    #[error("task not found")]
    NotFound,
    #[error("task title must not be empty")]
    EmptyTitle,
}

/// A task after a mutation, with whatever progress the mutation produced
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task: Task,
    /// Set when completing the task paid out points
    pub progress: Option<PointsAndLevel>,
    pub newly_unlocked: Vec<Achievement>,
}

impl TaskOutcome {
    fn unrewarded(task: Task, newly_unlocked: Vec<Achievement>) -> Self {
        Self {
            task,
            progress: None,
            newly_unlocked,
        }
    }
}

#[derive(Clone)]
pub struct TaskService {
    pool: SqlitePool,
    task_points: TaskPoints,
    gamification: GamificationService,
}

impl TaskService {
    pub fn new(pool: SqlitePool, task_points: TaskPoints, gamification: GamificationService) -> Self {
        Self {
            pool,
            task_points,
            gamification,
        }
    }

    fn points_for(&self, priority: TaskPriority) -> i64 {
        i64::from(self.task_points.for_priority(priority))
    }

    pub async fn create_task(&self, user_id: Uuid, data: CreateTask) -> Result<TaskOutcome, TaskError> {
        if data.title.trim().is_empty() {
            return Err(TaskError::EmptyTitle);
        }
        if User::find_by_id(&self.pool, user_id).await?.is_none() {
            return Err(TaskError::UserNotFound(user_id));
        }

        let points = self.points_for(data.priority.unwrap_or_default());
        let task = Task::create(&self.pool, user_id, &data, points, Uuid::new_v4()).await?;
        info!(
            user_id = %user_id,
            task_id = %task.id,
            priority = %task.priority,
            "Created task"
        );

        let newly_unlocked = self.gamification.recheck(user_id).await;
        Ok(TaskOutcome::unrewarded(task, newly_unlocked))
    }

    pub async fn get_task(&self, user_id: Uuid, task_id: Uuid) -> Result<Task, TaskError> {
        Task::find_for_user(&self.pool, task_id, user_id)
            .await?
            .ok_or(TaskError::NotFound)
    }

    /// The user's tasks, soonest due first
    pub async fn list_tasks(&self, user_id: Uuid) -> Result<Vec<Task>, TaskError> {
        Ok(Task::find_by_user(&self.pool, user_id).await?)
    }

    /// Apply the provided fields. A completed task that has not paid out yet awards its
    /// points and re-evaluates achievements. If the payout fails the task is put back the
    /// way it was, so the user is never left with a completed task that paid nothing.
    pub async fn update_task(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        data: UpdateTask,
    ) -> Result<TaskOutcome, TaskError> {
        let previous = self.get_task(user_id, task_id).await?;
        let mut task = previous.clone();
        let was_completed = task.completed;

        if let Some(title) = data.title {
            if title.trim().is_empty() {
                return Err(TaskError::EmptyTitle);
            }
            task.title = title;
        }
        if data.description.is_some() {
            task.description = data.description;
        }
        if data.due_date.is_some() {
            task.due_date = data.due_date;
        }
        if let Some(priority) = data.priority {
            task.priority = priority;
            task.points = self.points_for(priority);
        }
        if let Some(completed) = data.completed {
            task.completed = completed;
            task.completed_at = match (was_completed, completed) {
                (false, true) => Some(Utc::now()),
                (_, false) => None,
                (true, true) => task.completed_at,
            };
        }

        let task = Task::update(&self.pool, &task).await?;
        if task.completed && !task.rewarded {
            return self.reward_completion(&previous, task).await;
        }
        if !was_completed && task.completed {
            let newly_unlocked = self.gamification.recheck(task.user_id).await;
            return Ok(TaskOutcome::unrewarded(task, newly_unlocked));
        }
        Ok(TaskOutcome::unrewarded(task, Vec::new()))
    }

    async fn reward_completion(&self, previous: &Task, mut task: Task) -> Result<TaskOutcome, TaskError> {
        if !Task::claim_reward(&self.pool, task.id).await? {
            debug!(task_id = %task.id, "Task already paid out, skipping award");
            let newly_unlocked = self.gamification.recheck(task.user_id).await;
            return Ok(TaskOutcome::unrewarded(task, newly_unlocked));
        }
        task.rewarded = true;

        let delta = u32::try_from(task.points).unwrap_or(0);
        match self.gamification.reward(task.user_id, delta).await {
            Ok(update) => {
                info!(
                    user_id = %task.user_id,
                    task_id = %task.id,
                    points = delta,
                    unlocked = update.newly_unlocked.len(),
                    "Task completed"
                );
                Ok(TaskOutcome {
                    task,
                    progress: Some(update.progress),
                    newly_unlocked: update.newly_unlocked,
                })
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Task payout failed, reverting update");
                if let Err(revert_err) = Task::update(&self.pool, previous).await {
                    warn!(task_id = %task.id, error = %revert_err, "Failed to revert task update");
                }
                if let Err(release_err) = Task::release_reward(&self.pool, task.id).await {
                    warn!(task_id = %task.id, error = %release_err, "Failed to release task reward");
                }
                Err(e.into())
            }
        }
    }

    pub async fn delete_task(&self, user_id: Uuid, task_id: Uuid) -> Result<(), TaskError> {
        if Task::delete(&self.pool, task_id, user_id).await? == 0 {
            return Err(TaskError::NotFound);
        }
        debug!(user_id = %user_id, task_id = %task_id, "Deleted task");
        Ok(())
    }
}
