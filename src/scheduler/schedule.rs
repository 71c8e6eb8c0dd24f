//! Cron expression parsing
//!
//! Jobs accept classic five-field crontab expressions as well as the
//! seconds-first six or seven field form understood by the `cron` crate.

use crate::error::{Result, SyncError};
use chrono::{DateTime, Local};
use cron::Schedule;
use std::collections::BTreeSet;
use std::str::FromStr;

/// Parse a job expression into a schedule
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let normalized = normalize_expression(expression);
    Schedule::from_str(&normalized).map_err(|e| SyncError::MalformedSchedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// First fire time strictly after now, in local time
pub fn next_fire(schedule: &Schedule) -> Option<DateTime<Local>> {
    schedule.upcoming(Local).next()
}

/// Rewrite a five-field crontab expression into the seconds-first form.
///
/// Crontab numbers weekdays 0-7 from Sunday, the `cron` crate 1-7 from
/// Sunday, so numeric day-of-week fields are renumbered. Other expressions
/// pass through with whitespace collapsed.
pub(crate) fn normalize_expression(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return fields.join(" ");
    }
    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        translate_day_of_week(fields[4])
    )
}

fn translate_day_of_week(field: &str) -> String {
    if field == "*" || field == "?" {
        return field.to_string();
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        match crontab_days(item) {
            Some(list) => days.extend(list.into_iter().map(|d| d % 7 + 1)),
            // Day names mean the same thing in both notations
            None => return field.to_string(),
        }
    }
    days.iter().map(u8::to_string).collect::<Vec<_>>().join(",")
}

/// Expand one numeric crontab day-of-week item (`3`, `1-5`, `*/2`, `1-7/3`)
fn crontab_days(item: &str) -> Option<Vec<u8>> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None => (item, 1),
    };

    let (start, end) = if range == "*" {
        (0, 6)
    } else if let Some((a, b)) = range.split_once('-') {
        (a.parse::<u8>().ok()?, b.parse::<u8>().ok()?)
    } else {
        let day = range.parse::<u8>().ok()?;
        if item.contains('/') {
            (day, 6)
        } else {
            (day, day)
        }
    };

    if start > end || end > 7 {
        return None;
    }
    Some((start..=end).step_by(step).collect())
}
