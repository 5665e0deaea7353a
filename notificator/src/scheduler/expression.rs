//! Recurring time expressions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone};

use crate::{Error, Result};

/// Parsed cron expression.
///
/// Accepts the classic five-field form (`min hour dom month dow`) as well as
/// the six/seven-field form with seconds (and year). Day-of-week names
/// (`MON-FRI`) are unambiguous; numeric days start at 1 = Sunday.
#[derive(Debug, Clone)]
pub struct ScheduleExpression {
    source: String,
    schedule: cron::Schedule,
}

impl ScheduleExpression {
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let normalized = match trimmed.split_whitespace().count() {
            5 => format!("0 {trimmed}"),
            _ => trimmed.to_string(),
        };

        let schedule = cron::Schedule::from_str(&normalized)
            .map_err(|e| Error::schedule(expression, e.to_string()))?;

        Ok(Self {
            source: expression.to_string(),
            schedule,
        })
    }

    /// Expression as written in the configuration.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// First occurrence strictly after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(after).next()
    }
}

impl fmt::Display for ScheduleExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
