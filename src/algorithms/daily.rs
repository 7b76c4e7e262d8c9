//! Deterministic once-a-day selection.

use crate::models::UserId;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// The calendar day a timestamp belongs to when days start at
/// `rollover_hour` UTC.
pub fn pick_day(now: DateTime<Utc>, rollover_hour: u32) -> NaiveDate {
    (now - Duration::hours(rollover_hour as i64)).date_naive()
}

/// Start of the day after `day`, i.e. when the next pick becomes due.
pub fn next_rollover(day: NaiveDate, rollover_hour: u32) -> DateTime<Utc> {
    let next = day + Duration::days(1);
    next.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc() + Duration::hours(rollover_hour as i64))
        .unwrap_or_else(Utc::now)
}

/// FNV-1a over `"{user}:{YYYY-MM-DD}"`. Stable across processes and releases,
/// unlike `DefaultHasher`.
pub fn daily_seed(user_id: UserId, day: NaiveDate) -> u64 {
    let key = format!("{}:{}", user_id, day.format("%Y-%m-%d"));
    key.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

/// Index into a candidate pool of `pool_size` for this user and day.
pub fn pick_index(user_id: UserId, day: NaiveDate, pool_size: usize) -> Option<usize> {
    if pool_size == 0 {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(daily_seed(user_id, day));
    Some(rng.gen_range(0..pool_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user() -> UserId {
        UserId::new(76561197960287930).unwrap()
    }

    #[test]
    fn same_day_same_index() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        let first = pick_index(user(), day, 20);
        for _ in 0..10 {
            assert_eq!(pick_index(user(), day, 20), first);
        }
        assert!(first.unwrap() < 20);
    }

    #[test]
    fn seeds_differ_by_day_and_user() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        let next = day.succ_opt().unwrap();
        assert_ne!(daily_seed(user(), day), daily_seed(user(), next));
        assert_ne!(daily_seed(user(), day), daily_seed(UserId::new(7).unwrap(), day));
    }

    #[test]
    fn rollover_boundary() {
        let before = Utc.with_ymd_and_hms(2024, 3, 15, 5, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 15, 6, 0, 0).unwrap();
        assert_eq!(pick_day(before, 6), NaiveDate::from_ymd_opt(2024, 3, 14).unwrap());
        assert_eq!(pick_day(after, 6), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(next_rollover(pick_day(before, 6), 6), after);
    }

    #[test]
    fn empty_pool() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        assert_eq!(pick_index(user(), day, 0), None);
    }
}
