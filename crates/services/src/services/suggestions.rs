//! Productivity suggestions from a pluggable text-generation source.
//!
//! The source is asked for a JSON answer. Anything that goes wrong on the way (missing user,
//! unavailable source, unparseable or empty answer) degrades to a fixed fallback so callers
//! always get something to show.

use std::sync::Arc;

use async_trait::async_trait;
use db::models::{
    task::{Task, TaskPriority},
    user::User,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const RECENT_TASKS_FOR_SUGGESTIONS: i64 = 10;
const RECENT_TASKS_FOR_TIPS: i64 = 20;

#[derive(Debug, Error)]
pub enum SuggestionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    #[error("suggestion source unavailable: {0}")]
    Unavailable(String),
    #[error("answer contained no JSON object")]
    MissingJson,
    #[error("malformed answer: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Opaque generator answering a prompt with free text that embeds a JSON object
#[async_trait]
pub trait SuggestionSource: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, SuggestionError>;
}

/// Source used when no generator is configured; every request falls back
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSource;

#[async_trait]
impl SuggestionSource for DisabledSource {
    async fn complete(&self, _prompt: &str) -> Result<String, SuggestionError> {
        Err(SuggestionError::Unavailable(
            "no suggestion source configured".to_string(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSuggestion {
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineItem {
    pub time: String,
    pub activity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductivityTip {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestions<T> {
    pub items: Vec<T>,
    /// True when `items` is the fixed fallback rather than a generated answer
    pub fallback: bool,
}

#[derive(Deserialize)]
struct TaskSuggestionsAnswer {
    suggestions: Vec<TaskSuggestion>,
}

#[derive(Deserialize)]
struct RoutineAnswer {
    routine: Vec<RoutineItem>,
}

#[derive(Deserialize)]
struct TipsAnswer {
    tips: Vec<ProductivityTip>,
}

#[derive(Serialize)]
struct TaskSummary<'a> {
    title: &'a str,
    priority: TaskPriority,
}

#[derive(Clone)]
pub struct SuggestionService {
    pool: SqlitePool,
    source: Arc<dyn SuggestionSource>,
}

impl SuggestionService {
    pub fn new(pool: SqlitePool, source: Arc<dyn SuggestionSource>) -> Self {
        Self { pool, source }
    }

    /// Three new tasks based on the user's level and recently completed work
    pub async fn task_suggestions(&self, user_id: Uuid) -> Suggestions<TaskSuggestion> {
        let result = self.try_task_suggestions(user_id).await;
        resolve("task suggestions", user_id, result, fallback_task_suggestions)
    }

    /// A timed plan for today built around the tasks that are due
    pub async fn daily_routine(&self, user_id: Uuid) -> Suggestions<RoutineItem> {
        let result = self.try_daily_routine(user_id).await;
        resolve("daily routine", user_id, result, fallback_routine)
    }

    pub async fn productivity_tips(&self, user_id: Uuid) -> Suggestions<ProductivityTip> {
        let result = self.try_productivity_tips(user_id).await;
        resolve("productivity tips", user_id, result, fallback_tips)
    }

    async fn try_task_suggestions(&self, user_id: Uuid) -> Result<Vec<TaskSuggestion>, SuggestionError> {
        let level = self.level_of(user_id).await?;
        let recent =
            Task::find_recently_completed(&self.pool, user_id, RECENT_TASKS_FOR_SUGGESTIONS).await?;
        let prompt = format!(
            "Act as a productivity assistant. The user is level {level} and recently completed \
             these tasks: {}. Suggest 3 new tasks with title, description and priority \
             (low, medium or high). Answer ONLY with JSON shaped as {{\"suggestions\": [...]}}.",
            summarize(&recent)?
        );
        let answer: TaskSuggestionsAnswer = self.ask(&prompt).await?;
        Ok(answer.suggestions)
    }

    async fn try_daily_routine(&self, user_id: Uuid) -> Result<Vec<RoutineItem>, SuggestionError> {
        let level = self.level_of(user_id).await?;
        let due = Task::find_pending_due_by(&self.pool, user_id, chrono::Utc::now()).await?;
        let prompt = format!(
            "Act as a productivity coach. Build a motivating daily routine for a level {level} \
             user whose pending tasks for today are: {}. If the list is empty, plan around \
             planning, focused work blocks and breaks. Always include start of work, lunch and \
             end of day. Answer ONLY with JSON shaped as \
             {{\"routine\": [{{\"time\": \"HH:MM\", \"activity\": \"...\"}}]}}.",
            summarize(&due)?
        );
        let answer: RoutineAnswer = self.ask(&prompt).await?;
        Ok(answer.routine)
    }

    async fn try_productivity_tips(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ProductivityTip>, SuggestionError> {
        let level = self.level_of(user_id).await?;
        let recent =
            Task::find_recently_completed(&self.pool, user_id, RECENT_TASKS_FOR_TIPS).await?;
        let prompt = format!(
            "As a coach, give 4 productivity tips to a level {level} user with this task \
             history: {}. Answer ONLY with JSON shaped as \
             {{\"tips\": [{{\"title\": \"...\", \"description\": \"...\"}}]}}.",
            summarize(&recent)?
        );
        let answer: TipsAnswer = self.ask(&prompt).await?;
        Ok(answer.tips)
    }

    async fn level_of(&self, user_id: Uuid) -> Result<i64, SuggestionError> {
        User::find_by_id(&self.pool, user_id)
            .await?
            .map(|user| user.level)
            .ok_or(SuggestionError::UserNotFound(user_id))
    }

    async fn ask<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, SuggestionError> {
        let answer = self.source.complete(prompt).await?;
        parse_answer(&answer)
    }
}

/// Fixed tips shown on the dashboard
pub fn dashboard_tips() -> Vec<ProductivityTip> {
    vec![
        ProductivityTip {
            title: "Pomodoro technique".to_string(),
            description: "Work in 25-minute blocks with 5-minute breaks to keep your focus."
                .to_string(),
        },
        ProductivityTip {
            title: "Morning planning".to_string(),
            description: "Spend 15 minutes every morning planning your day and setting priorities."
                .to_string(),
        },
    ]
}

fn resolve<T>(
    kind: &'static str,
    user_id: Uuid,
    result: Result<Vec<T>, SuggestionError>,
    fallback: fn() -> Vec<T>,
) -> Suggestions<T> {
    match result {
        Ok(items) if !items.is_empty() => {
            debug!(user_id = %user_id, kind, count = items.len(), "Generated suggestions");
            Suggestions {
                items,
                fallback: false,
            }
        }
        Ok(_) => {
            warn!(user_id = %user_id, kind, "Suggestion source answered with nothing, using fallback");
            Suggestions {
                items: fallback(),
                fallback: true,
            }
        }
        Err(e) => {
            warn!(user_id = %user_id, kind, error = %e, "Suggestion request failed, using fallback");
            Suggestions {
                items: fallback(),
                fallback: true,
            }
        }
    }
}

fn summarize(tasks: &[Task]) -> Result<String, SuggestionError> {
    let summary: Vec<TaskSummary<'_>> = tasks
        .iter()
        .map(|task| TaskSummary {
            title: &task.title,
            priority: task.priority,
        })
        .collect();
    Ok(serde_json::to_string(&summary)?)
}

/// Pull the JSON object out of a free-text answer: a ```json fenced block if there is one,
/// otherwise the span from the first `{` to the last `}`.
fn extract_json(answer: &str) -> Option<&str> {
    if let Some(start) = answer.find("```json") {
        let body = &answer[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }
    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    (start < end).then(|| &answer[start..=end])
}

fn parse_answer<T: DeserializeOwned>(answer: &str) -> Result<T, SuggestionError> {
    let json = extract_json(answer).ok_or(SuggestionError::MissingJson)?;
    Ok(serde_json::from_str(json)?)
}

fn fallback_task_suggestions() -> Vec<TaskSuggestion> {
    vec![TaskSuggestion {
        title: "Plan your day".to_string(),
        description: "Take 15 minutes to plan your tasks.".to_string(),
        priority: TaskPriority::High,
    }]
}

fn fallback_routine() -> Vec<RoutineItem> {
    vec![
        RoutineItem {
            time: "08:00".to_string(),
            activity: "Plan the day".to_string(),
        },
        RoutineItem {
            time: "09:00".to_string(),
            activity: "Full focus on the most important task".to_string(),
        },
    ]
}

fn fallback_tips() -> Vec<ProductivityTip> {
    vec![ProductivityTip {
        title: "Two-minute rule".to_string(),
        description: "If a task takes less than two minutes, do it right away.".to_string(),
    }]
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use db::{
        DBService,
        models::{task::CreateTask, user::CreateUser},
    };

    use super::*;

    /// Replies with a fixed answer and remembers the prompts it saw
    struct ScriptedSource {
        answer: String,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SuggestionSource for ScriptedSource {
        async fn complete(&self, prompt: &str) -> Result<String, SuggestionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.answer.clone())
        }
    }

    async fn setup(source: Arc<dyn SuggestionSource>) -> (DBService, SuggestionService, Uuid) {
        let db = DBService::new_in_memory().await.unwrap();
        let user = User::create(
            &db.pool,
            &CreateUser {
                name: "Iara".to_string(),
                email: "iara@example.com".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let service = SuggestionService::new(db.pool.clone(), source);
        (db, service, user.id)
    }

    #[test]
    fn extracts_fenced_json() {
        let answer = "Sure!\n```json\n{\"tips\": []}\n```\nGood luck";
        assert_eq!(extract_json(answer), Some("{\"tips\": []}"));
    }

    #[test]
    fn extracts_bare_json_object() {
        let answer = "Here you go: {\"routine\": [{\"time\": \"08:00\", \"activity\": \"Plan\"}]} enjoy";
        let parsed: RoutineAnswer = parse_answer(answer).unwrap();
        assert_eq!(parsed.routine[0].time, "08:00");
    }

    #[test]
    fn text_without_json_is_rejected() {
        assert!(matches!(
            parse_answer::<TipsAnswer>("no structure here"),
            Err(SuggestionError::MissingJson)
        ));
        assert!(matches!(
            parse_answer::<TipsAnswer>("{\"tips\": \"oops\"}"),
            Err(SuggestionError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn generated_suggestions_are_returned() {
        let source = ScriptedSource::new(
            r#"```json
{"suggestions": [{"title": "Review notes", "description": "Skim yesterday's notes", "priority": "low"}]}
```"#,
        );
        let (db, service, user_id) = setup(source.clone()).await;
        let mut done = Task::create(
            &db.pool,
            user_id,
            &CreateTask {
                title: "Write report".to_string(),
                ..Default::default()
            },
            10,
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        done.completed = true;
        done.completed_at = Some(chrono::Utc::now());
        Task::update(&db.pool, &done).await.unwrap();

        let suggestions = service.task_suggestions(user_id).await;
        assert!(!suggestions.fallback);
        assert_eq!(
            suggestions.items,
            vec![TaskSuggestion {
                title: "Review notes".to_string(),
                description: "Skim yesterday's notes".to_string(),
                priority: TaskPriority::Low,
            }]
        );

        let prompts = source.prompts.lock().unwrap();
        assert!(prompts[0].contains("level 1"));
        assert!(prompts[0].contains("Write report"));
    }

    #[tokio::test]
    async fn unavailable_source_falls_back() {
        let (_db, service, user_id) = setup(Arc::new(DisabledSource)).await;
        let routine = service.daily_routine(user_id).await;
        assert!(routine.fallback);
        assert_eq!(routine.items, fallback_routine());

        let tips = service.productivity_tips(user_id).await;
        assert!(tips.fallback);
        assert_eq!(tips.items, fallback_tips());
    }

    #[tokio::test]
    async fn empty_or_garbled_answers_fall_back() {
        let (_db, service, user_id) = setup(ScriptedSource::new("{\"tips\": []}")).await;
        assert!(service.productivity_tips(user_id).await.fallback);

        let (_db, service, user_id) = setup(ScriptedSource::new("I cannot help with that")).await;
        let suggestions = service.task_suggestions(user_id).await;
        assert!(suggestions.fallback);
        assert_eq!(suggestions.items, fallback_task_suggestions());
    }

    #[tokio::test]
    async fn unknown_user_falls_back_without_asking() {
        let source = ScriptedSource::new("{\"tips\": [{\"title\": \"t\", \"description\": \"d\"}]}");
        let (_db, service, _) = setup(source.clone()).await;
        assert!(service.productivity_tips(Uuid::new_v4()).await.fallback);
        assert!(source.prompts.lock().unwrap().is_empty());
    }
}
