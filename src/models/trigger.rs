use crate::models::error::{BackupError, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;

/// When a periodic job fires: a fixed interval or a cron expression.
#[derive(Debug, Clone)]
pub enum Trigger {
    Interval(Duration),
    Cron(Box<Schedule>),
}

impl Trigger {
    pub fn parse(expression: &str) -> Result<Trigger> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(invalid(expression, "expression is empty"));
        }

        let interval_part = trimmed.strip_prefix("@every").map(str::trim);
        if let Some(duration) = parse_interval(interval_part.unwrap_or(trimmed)) {
            if duration.is_zero() {
                return Err(invalid(expression, "interval must be greater than zero"));
            }
            return Ok(Trigger::Interval(duration));
        }
        if interval_part.is_some() {
            return Err(invalid(expression, "expected an interval like '6h' after @every"));
        }

        Schedule::from_str(trimmed)
            .map(|schedule| Trigger::Cron(Box::new(schedule)))
            .map_err(|e| invalid(expression, &e.to_string()))
    }

    /// Next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval(interval) => {
                let step = chrono::Duration::from_std(*interval).ok()?;
                after.checked_add_signed(step)
            }
            Trigger::Cron(schedule) => schedule.after(&after).next(),
        }
    }
}

impl FromStr for Trigger {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        Trigger::parse(s)
    }
}

fn invalid(expression: &str, reason: &str) -> BackupError {
    BackupError::InvalidTrigger {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}

/// "90s", "15m", "6h", "1d" or bare seconds
fn parse_interval(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    if number.is_empty() {
        return None;
    }
    let amount: u64 = number.parse().ok()?;
    let multiplier = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return None,
    };
    amount.checked_mul(multiplier).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parses_interval_units() {
        for (expr, secs) in [("90s", 90), ("15m", 900), ("6h", 21_600), ("1d", 86_400), ("3600", 3600)] {
            match Trigger::parse(expr).unwrap() {
                Trigger::Interval(d) => assert_eq!(d.as_secs(), secs, "{}", expr),
                other => panic!("expected interval for {}, got {:?}", expr, other),
            }
        }
    }

    #[test]
    fn test_parses_every_prefix() {
        match Trigger::parse("@every 2h").unwrap() {
            Trigger::Interval(d) => assert_eq!(d.as_secs(), 7200),
            other => panic!("expected interval, got {:?}", other),
        }
        assert!(Trigger::parse("@every soon").is_err());
    }

    #[test]
    fn test_rejects_zero_and_empty() {
        assert!(Trigger::parse("0s").is_err());
        assert!(Trigger::parse("   ").is_err());
    }

    #[test]
    fn test_parses_cron_expression() {
        let trigger = Trigger::parse("0 30 2 * * *").unwrap();
        assert!(matches!(trigger, Trigger::Cron(_)));

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = trigger.next_after(start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 2, 30, 0).unwrap());
    }

    #[test]
    fn test_rejects_garbage() {
        let err = Trigger::parse("whenever").unwrap_err();
        assert_eq!(err.kind(), "invalid_trigger");
    }

    #[test]
    fn test_interval_next_after() {
        let trigger = Trigger::parse("10m").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(start).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap()
        );
    }
}
