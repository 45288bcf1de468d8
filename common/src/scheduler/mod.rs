// Scheduler module: cron trigger evaluation and run firing

pub mod engine;

pub use engine::{Scheduler, SchedulerEngine};
