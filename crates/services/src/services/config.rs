//! Runtime configuration read from the environment (and `.env` when present).

use std::str::FromStr;

use db::models::task::TaskPriority;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://productivity.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Points a task is worth on completion, by priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPoints {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
}

impl Default for TaskPoints {
    fn default() -> Self {
        Self {
            low: 5,
            medium: 10,
            high: 20,
        }
    }
}

impl TaskPoints {
    pub fn for_priority(&self, priority: TaskPriority) -> u32 {
        match priority {
            TaskPriority::Low => self.low,
            TaskPriority::Medium => self.medium,
            TaskPriority::High => self.high,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub task_points: TaskPoints,
    /// How many times a lost optimistic-concurrency race is retried before giving up
    pub max_update_retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 5,
            task_points: TaskPoints::default(),
            max_update_retries: 3,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded environment file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; unset keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            task_points: TaskPoints {
                low: parse(&lookup, "TASK_POINTS_LOW", defaults.task_points.low)?,
                medium: parse(&lookup, "TASK_POINTS_MEDIUM", defaults.task_points.medium)?,
                high: parse(&lookup, "TASK_POINTS_HIGH", defaults.task_points.high)?,
            },
            max_update_retries: parse(
                &lookup,
                "EVALUATION_MAX_RETRIES",
                defaults.max_update_retries,
            )?,
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.task_points.for_priority(TaskPriority::High), 20);
        assert_eq!(config.task_points.for_priority(TaskPriority::Medium), 10);
        assert_eq!(config.task_points.for_priority(TaskPriority::Low), 5);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("TASK_POINTS_HIGH", " 30 "),
            ("EVALUATION_MAX_RETRIES", "7"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.task_points.high, 30);
        assert_eq!(config.task_points.low, 5);
        assert_eq!(config.max_update_retries, 7);
    }

    #[test]
    fn test_malformed_value_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("TASK_POINTS_LOW", "-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TASK_POINTS_LOW", .. }));
    }
}
