//! Cron expression handling.

use std::str::FromStr;

use chrono::{DateTime, Local};
use cron::Schedule;

use super::types::SchedulerError;

/// Parse a cron expression, accepting the classic five-field form.
pub fn parse_cron(expression: &str) -> Result<Schedule, SchedulerError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Next fire time after now, in local time.
pub fn next_fire(schedule: &Schedule) -> Option<DateTime<Local>> {
    schedule.upcoming(Local).next()
}
