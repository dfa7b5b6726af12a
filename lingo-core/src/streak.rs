use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

/// A run of consecutive days with practice activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Streak {
    /// Number of consecutive active days ending today or yesterday
    pub streak: u32,
    /// The most recent active day, if any
    pub last_active: Option<NaiveDate>,
    /// Every distinct active day, most recent first
    pub days: Vec<NaiveDate>,
}

/// Computes the streak for the given activity timestamps.
///
/// Timestamps are grouped by calendar day in `timezone`. A streak is only
/// alive if there was activity today or yesterday, in which case it counts
/// backwards from the most recent of the two until a day without activity.
pub fn compute_streak(timestamps: &[DateTime<Utc>], now: DateTime<Utc>, timezone: Tz) -> Streak {
    let active: BTreeSet<NaiveDate> = timestamps
        .iter()
        .map(|t| t.with_timezone(&timezone).date_naive())
        .collect();

    let today = now.with_timezone(&timezone).date_naive();
    let yesterday = today - Duration::days(1);

    let start = [today, yesterday]
        .into_iter()
        .find(|day| active.contains(day));

    let streak = match start {
        Some(start) => std::iter::successors(Some(start), |day| day.pred_opt())
            .take_while(|day| active.contains(day))
            .count() as u32,
        None => 0,
    };

    let days: Vec<_> = active.into_iter().rev().collect();

    Streak {
        streak,
        last_active: days.first().copied(),
        days,
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    use super::*;

    /// Noon in New York, `days_ago` days before `now`
    fn noon(now: DateTime<Utc>, days_ago: i64) -> DateTime<Utc> {
        let date = now.with_timezone(&New_York).date_naive() - Duration::days(days_ago);

        New_York
            .from_local_datetime(&date.and_hms_opt(12, 0, 0).unwrap())
            .unwrap()
            .with_timezone(&Utc)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 18, 0, 0).unwrap()
    }

    #[test]
    fn counts_consecutive_days_ending_today() {
        let now = now();
        let timestamps = vec![
            noon(now, 0),
            noon(now, 0),
            noon(now, 1),
            noon(now, 2),
            noon(now, 4),
        ];

        let streak = compute_streak(&timestamps, now, New_York);

        assert_eq!(streak.streak, 3);
        assert_eq!(streak.last_active, Some(noon(now, 0).with_timezone(&New_York).date_naive()));
        assert_eq!(streak.days.len(), 4);
    }

    #[test]
    fn streak_survives_until_end_of_next_day() {
        let now = now();
        let timestamps = vec![noon(now, 1), noon(now, 2)];

        let streak = compute_streak(&timestamps, now, New_York);

        assert_eq!(streak.streak, 2);
    }

    #[test]
    fn broken_streak_is_zero() {
        let now = now();
        let timestamps = vec![noon(now, 2), noon(now, 3)];

        let streak = compute_streak(&timestamps, now, New_York);

        assert_eq!(streak.streak, 0);
        assert_eq!(streak.days.len(), 2);
    }

    #[test]
    fn no_activity() {
        let streak = compute_streak(&[], now(), New_York);

        assert_eq!(
            streak,
            Streak {
                streak: 0,
                last_active: None,
                days: vec![]
            }
        );
    }

    #[test]
    fn days_are_grouped_in_the_given_timezone() {
        // 02:00 UTC on the 20th is still the 19th in New York
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 15, 0, 0).unwrap();
        let late_evening = Utc.with_ymd_and_hms(2024, 3, 20, 2, 0, 0).unwrap();
        let morning = Utc.with_ymd_and_hms(2024, 3, 20, 14, 0, 0).unwrap();

        let streak = compute_streak(&[late_evening, morning], now, New_York);

        assert_eq!(streak.streak, 2);
        assert_eq!(
            streak.days,
            vec![
                NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 19).unwrap(),
            ]
        );
    }
}
