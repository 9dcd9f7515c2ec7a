pub mod achievement;
pub mod challenge;
pub mod task;
pub mod user;
