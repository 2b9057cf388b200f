// src/core/scheduler/schedule.rs

//! Schedule expressions. One parsing entry point covers the three kinds:
//! `every <duration>` (fixed interval), `daily <HH:MM>`, and cron
//! expressions (five-field forms get a seconds column prepended).

use crate::core::errors::FlywallError;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Schedule {
    Cron(Box<cron::Schedule>),
    Interval(Duration),
    Daily { hour: u32, minute: u32 },
}

impl Schedule {
    /// Parses any supported schedule form.
    pub fn parse(input: &str) -> Result<Self, FlywallError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(FlywallError::Validation("schedule cannot be empty".into()));
        }

        if let Some(rest) = input.strip_prefix("every ") {
            let interval = humantime::parse_duration(rest.trim()).map_err(|e| {
                FlywallError::Validation(format!("invalid interval '{rest}': {e}"))
            })?;
            if interval < Duration::from_secs(1) {
                return Err(FlywallError::Validation(
                    "interval must be at least one second".into(),
                ));
            }
            return Ok(Schedule::Interval(interval));
        }

        if let Some(rest) = input.strip_prefix("daily ") {
            let (hour, minute) = rest
                .trim()
                .split_once(':')
                .and_then(|(h, m)| Some((h.parse::<u32>().ok()?, m.parse::<u32>().ok()?)))
                .ok_or_else(|| {
                    FlywallError::Validation(format!("invalid daily time '{rest}'"))
                })?;
            if hour > 23 || minute > 59 {
                return Err(FlywallError::Validation(format!(
                    "daily time '{rest}' out of range"
                )));
            }
            return Ok(Schedule::Daily { hour, minute });
        }

        // Classic five-field cron gets a seconds column prepended for the
        // Quartz-style parser.
        let expression = if input.split_whitespace().count() == 5 {
            format!("0 {input}")
        } else {
            input.to_string()
        };
        let schedule = cron::Schedule::from_str(&expression)
            .map_err(|e| FlywallError::Validation(format!("invalid cron '{input}': {e}")))?;
        Ok(Schedule::Cron(Box::new(schedule)))
    }

    /// The next fire time strictly after `after`.
    pub fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(schedule) => schedule.after(&after).next(),
            Schedule::Interval(interval) => {
                Some(after + ChronoDuration::from_std(*interval).ok()?)
            }
            Schedule::Daily { hour, minute } => {
                let today = after
                    .with_hour(*hour)?
                    .with_minute(*minute)?
                    .with_second(0)?
                    .with_nanosecond(0)?;
                if today > after {
                    Some(today)
                } else {
                    Some(today + ChronoDuration::days(1))
                }
            }
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Cron(schedule) => write!(f, "{schedule}"),
            Schedule::Interval(interval) => {
                write!(f, "every {}", humantime::format_duration(*interval))
            }
            Schedule::Daily { hour, minute } => write!(f, "daily {hour:02}:{minute:02}"),
        }
    }
}
