use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// Everything a criteria predicate may look at, captured once per evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub completed_tasks: i64,
    pub created_tasks: i64,
    pub high_priority_completed_tasks: i64,
    pub level: i64,
    pub points: i64,
}

/// Criteria tags understood out of the box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, EnumIter)]
pub enum Criterion {
    #[strum(to_string = "TASKS_COMPLETED_1")]
    TasksCompleted1,
    #[strum(to_string = "TASKS_COMPLETED_10")]
    TasksCompleted10,
    #[strum(to_string = "TASKS_COMPLETED_25")]
    TasksCompleted25,
    #[strum(to_string = "TASKS_COMPLETED_50")]
    TasksCompleted50,
    #[strum(to_string = "TASKS_CREATED_5")]
    TasksCreated5,
    #[strum(to_string = "REACH_LEVEL_5")]
    ReachLevel5,
    #[strum(to_string = "POINTS_EARNED_1000")]
    PointsEarned1000,
    #[strum(to_string = "HIGH_PRIORITY_TASKS_5")]
    HighPriorityTasks5,
}

impl Criterion {
    pub fn is_met(self, stats: &StatsSnapshot) -> bool {
        match self {
            Self::TasksCompleted1 => stats.completed_tasks >= 1,
            Self::TasksCompleted10 => stats.completed_tasks >= 10,
            Self::TasksCompleted25 => stats.completed_tasks >= 25,
            Self::TasksCompleted50 => stats.completed_tasks >= 50,
            Self::TasksCreated5 => stats.created_tasks >= 5,
            Self::ReachLevel5 => stats.level >= 5,
            Self::PointsEarned1000 => stats.points >= 1000,
            Self::HighPriorityTasks5 => stats.high_priority_completed_tasks >= 5,
        }
    }
}

pub type Predicate = Arc<dyn Fn(&StatsSnapshot) -> bool + Send + Sync>;

/// Maps criteria tags to predicates over a [`StatsSnapshot`].
///
/// Tags are matched exactly. A tag without a predicate never matches; callers decide how to
/// report it. Registered predicates cannot be replaced, so the meaning of a tag stays fixed
/// once achievements reference it.
#[derive(Clone)]
pub struct CriteriaRegistry {
    predicates: HashMap<String, Predicate>,
}

impl CriteriaRegistry {
    pub fn empty() -> Self {
        Self {
            predicates: HashMap::new(),
        }
    }

    /// Registry containing every [`Criterion`]
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for criterion in Criterion::iter() {
            registry.register(criterion.to_string(), move |stats| criterion.is_met(stats));
        }
        registry
    }

    /// Add a predicate for `tag`. Returns false and keeps the existing predicate if the tag
    /// is already registered.
    pub fn register<F>(&mut self, tag: impl Into<String>, predicate: F) -> bool
    where
        F: Fn(&StatsSnapshot) -> bool + Send + Sync + 'static,
    {
        let tag = tag.into();
        if self.predicates.contains_key(&tag) {
            return false;
        }
        self.predicates.insert(tag, Arc::new(predicate));
        true
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.predicates.contains_key(tag)
    }

    /// `None` if no predicate is registered for `tag`
    pub fn matches(&self, tag: &str, stats: &StatsSnapshot) -> Option<bool> {
        self.predicates.get(tag).map(|predicate| predicate(stats))
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.predicates.keys().map(String::as_str)
    }
}

impl Default for CriteriaRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for CriteriaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&str> = self.tags().collect();
        tags.sort_unstable();
        f.debug_struct("CriteriaRegistry").field("tags", &tags).finish()
    }
}
