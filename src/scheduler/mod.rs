//! Cron scheduling
//!
//! [`CronTrigger`] parses six-field cron expressions and computes fire times;
//! [`TokioScheduler`] runs recurring jobs against those triggers.

pub mod cron;
pub mod engine;

pub use cron::CronTrigger;
pub use engine::{Job, JobFuture, JobScheduler, TokioScheduler};
