// fusebackup/src/utils/schedule.rs
use chrono::{DateTime, NaiveDate, Utc};
use std::future::Future;

/// Cron expression of the backup trigger: every day at 00:00:00 UTC.
pub const DAILY_SCHEDULE: &str = "0 0 0 * * *";

/// First midnight UTC strictly after `now`.
pub fn next_midnight_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .succ_opt()
        .unwrap_or(NaiveDate::MAX)
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

/// Runs `job` every day at midnight UTC, forever.
///
/// Each run is awaited before the next fire time is computed, so runs never
/// overlap within one process.
pub async fn run_daily<F, Fut>(mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    tracing::info!("⏰ Scheduler started ({})", DAILY_SCHEDULE);
    loop {
        let now = Utc::now();
        let next = next_midnight_utc(now);
        tracing::info!("Next backup scheduled at {}", next.to_rfc3339());

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        job().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_midnight_during_the_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 8, 7, 9).unwrap();
        assert_eq!(
            next_midnight_utc(now),
            Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_midnight_at_midnight_is_next_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        assert_eq!(
            next_midnight_utc(now),
            Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_midnight_crosses_month_and_year() {
        let leap = Utc.with_ymd_and_hms(2024, 2, 28, 23, 59, 59).unwrap();
        assert_eq!(
            next_midnight_utc(leap),
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );

        let new_year = Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap();
        assert_eq!(
            next_midnight_utc(new_year),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_daily_fires_job() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let scheduler = tokio::spawn(run_daily(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        // paused clock auto-advances to the next midnight
        tokio::time::sleep(std::time::Duration::from_secs(2 * 24 * 60 * 60)).await;
        scheduler.abort();
        assert!(runs.load(Ordering::SeqCst) >= 1);
    }
}
