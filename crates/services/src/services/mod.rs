pub mod achievement_evaluator;
pub mod challenges;
pub mod config;
pub mod criteria;
pub mod dashboard;
pub mod gamification;
pub mod progress_ledger;
pub mod stores;
pub mod suggestions;
pub mod tasks;
