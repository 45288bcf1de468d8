// Common library shared by the scheduler daemon and the dispatch command

pub mod artifact;
pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod lock;
pub mod models;
pub mod pipeline;
pub mod process;
pub mod schedule;
pub mod scheduler;
pub mod secret;
pub mod storage;
pub mod telemetry;
pub mod workspace;
