use core::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Day-count convention used to weight ratable buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayCountConvention {
    /// Calendar days, both window endpoints included.
    #[default]
    ActualActual,
    /// 30/360 US (bond basis): every full month weighs 30 days.
    #[serde(rename = "thirty_360", alias = "30/360")]
    Thirty360,
}

impl DayCountConvention {
    /// Weight of the inclusive window `start..=end`.
    pub fn days(self, start: NaiveDate, end: NaiveDate) -> i64 {
        if end < start {
            return 0;
        }
        match self {
            DayCountConvention::ActualActual => (end - start).num_days() + 1,
            DayCountConvention::Thirty360 => match end.succ_opt() {
                Some(after) => days_30_360(start, after),
                None => (end - start).num_days() + 1,
            },
        }
    }
}

fn days_30_360(from: NaiveDate, to: NaiveDate) -> i64 {
    let mut d1 = from.day() as i64;
    let mut d2 = to.day() as i64;
    if d1 == 31 {
        d1 = 30;
    }
    if d2 == 31 && d1 >= 30 {
        d2 = 30;
    }
    360 * (to.year() as i64 - from.year() as i64) + 30 * (to.month() as i64 - from.month() as i64) + (d2 - d1)
}

impl FromStr for DayCountConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "actual_actual" | "actual/actual" | "act/act" => Ok(DayCountConvention::ActualActual),
            "thirty_360" | "30/360" | "30_360" => Ok(DayCountConvention::Thirty360),
            other => Err(format!("unknown day-count convention '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn actual_counts_calendar_days_inclusive() {
        let c = DayCountConvention::ActualActual;
        assert_eq!(c.days(date(2026, 1, 1), date(2026, 1, 31)), 31);
        assert_eq!(c.days(date(2026, 2, 1), date(2026, 2, 28)), 28);
        assert_eq!(c.days(date(2026, 1, 15), date(2026, 1, 15)), 1);
        assert_eq!(c.days(date(2026, 1, 1), date(2026, 12, 31)), 365);
        assert_eq!(c.days(date(2026, 2, 1), date(2026, 1, 1)), 0);
    }

    #[test]
    fn thirty_360_weighs_full_months_equally() {
        let c = DayCountConvention::Thirty360;
        assert_eq!(c.days(date(2026, 1, 1), date(2026, 1, 31)), 30);
        assert_eq!(c.days(date(2026, 2, 1), date(2026, 2, 28)), 30);
        assert_eq!(c.days(date(2026, 1, 1), date(2026, 12, 31)), 360);
        assert_eq!(c.days(date(2026, 1, 16), date(2026, 1, 31)), 15);
    }

    #[test]
    fn parses_config_spellings() {
        assert_eq!("30/360".parse::<DayCountConvention>(), Ok(DayCountConvention::Thirty360));
        assert_eq!("Actual_Actual".parse::<DayCountConvention>(), Ok(DayCountConvention::ActualActual));
        assert!("actual/365".parse::<DayCountConvention>().is_err());
    }

    #[test]
    fn serde_uses_the_same_names_as_parsing() {
        let json = serde_json::to_string(&DayCountConvention::Thirty360).unwrap();
        assert_eq!(json, r#""thirty_360""#);
        let back: DayCountConvention = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DayCountConvention::Thirty360);
        let alias: DayCountConvention = serde_json::from_str(r#""30/360""#).unwrap();
        assert_eq!(alias, DayCountConvention::Thirty360);
        let actual: DayCountConvention = serde_json::from_str(r#""actual_actual""#).unwrap();
        assert_eq!(actual, DayCountConvention::ActualActual);
    }
}
