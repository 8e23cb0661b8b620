//! Recurring triggers bound to a queue.
//!
//! Cron expressions are accepted in two dialects:
//!
//! - 5 fields (`minute hour day-of-month month day-of-week`), crontab style,
//!   where day-of-week runs 0-6 with Sunday as 0 (7 is also Sunday);
//! - 6 or 7 fields with a leading seconds column, passed to the `cron` crate
//!   unchanged (its day-of-week runs 1-7 with Sunday as 1).

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::ScheduleOptions;

/// Errors raised while validating or evaluating a schedule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),
}

/// A recurring trigger: at every cron occurrence, one job is sent to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Queue the fired jobs go to; at most one schedule per queue.
    pub queue_name: String,
    /// Cron expression as registered.
    pub cron: String,
    /// IANA timezone the expression is evaluated in.
    pub timezone: String,
    /// Fixed payload for every fired job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Options for every fired job.
    #[serde(default)]
    pub options: ScheduleOptions,
    /// Last occurrence that produced a job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fired: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl Schedule {
    /// Build and validate a schedule.
    pub fn new(
        queue_name: impl Into<String>,
        cron: impl Into<String>,
        timezone: impl Into<String>,
        payload: Option<serde_json::Value>,
        options: ScheduleOptions,
    ) -> Result<Self, ScheduleError> {
        let now = Utc::now();
        let schedule = Self {
            queue_name: queue_name.into(),
            cron: cron.into(),
            timezone: timezone.into(),
            payload,
            options,
            last_fired: None,
            created_on: now,
            updated_on: now,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Check that the expression parses and the timezone is known.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        parse_cron(&self.cron)?;
        parse_timezone(&self.timezone)?;
        Ok(())
    }

    /// Latest occurrence in `(now - window, now]`, if any.
    pub fn latest_occurrence(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        let cron = parse_cron(&self.cron)?;
        let tz = parse_timezone(&self.timezone)?;
        let from = (now - window).with_timezone(&tz);

        Ok(cron
            .after(&from)
            .map(|t| t.with_timezone(&Utc))
            .take_while(|t| *t <= now)
            .last())
    }

    /// Next occurrence strictly after `now`.
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        let cron = parse_cron(&self.cron)?;
        let tz = parse_timezone(&self.timezone)?;

        Ok(cron
            .after(&now.with_timezone(&tz))
            .next()
            .map(|t| t.with_timezone(&Utc)))
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Parse a 5-, 6- or 7-field cron expression.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule, ScheduleError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();

    let normalized = match fields.len() {
        5 => {
            let dow = translate_day_of_week(fields[4]).ok_or_else(|| ScheduleError::InvalidCron {
                expression: expression.to_string(),
                reason: format!("invalid day-of-week field '{}'", fields[4]),
            })?;
            format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], dow)
        }
        6 | 7 => fields.join(" "),
        n => {
            return Err(ScheduleError::InvalidCron {
                expression: expression.to_string(),
                reason: format!("expected 5, 6 or 7 fields, got {}", n),
            });
        }
    };

    cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Map crontab day-of-week numbers (0-7, Sunday = 0 or 7) to the `cron`
/// crate's numbering (1-7, Sunday = 1). Names and step values pass through.
fn translate_day_of_week(field: &str) -> Option<String> {
    let parts: Option<Vec<String>> = field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };

            let range = match range.split_once('-') {
                // Sunday closing a range ("5-7") wraps to the start of the week.
                Some((start, "7")) if step.is_none() => format!("{}-7,1", shift_day(start)?),
                Some((start, end)) => format!("{}-{}", shift_day(start)?, shift_day(end)?),
                None => shift_day(range)?,
            };

            Some(match step {
                Some(step) => format!("{}/{}", range, step),
                None => range,
            })
        })
        .collect();

    parts.map(|p| p.join(","))
}

fn shift_day(token: &str) -> Option<String> {
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
        return Some(token.to_string());
    }
    match token.parse::<u8>().ok()? {
        0 | 7 => Some("1".to_string()),
        n @ 1..=6 => Some((n + 1).to_string()),
        _ => None,
    }
}
