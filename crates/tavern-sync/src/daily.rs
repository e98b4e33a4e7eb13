//! Once-per-day global transition without a leader.
//!
//! Every session that notices a new day races a single compare-and-set on
//! [`DAILY_STATE_KEY`]. Whoever's write commits runs the day-advance logic;
//! everyone else sees `AlreadyCurrent`. The outcome comes straight from the
//! atomic update, never from re-reading the record afterwards.

use chrono::{DateTime, Duration, Utc};
use tavern_db::Transform;
use tavern_types::{DailyLockRecord, UpdateOutcome};
use tracing::{debug, info, warn};

use crate::state::{DAILY_STATE_KEY, StateSynchronizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This session owns `day` and should run the reset.
    Committed,
    /// Some session already processed `day` or a later one.
    AlreadyCurrent,
    /// Storage was unavailable or the race never settled; try again on the
    /// next scheduled check.
    Skipped,
}

/// Game day containing `now`, where days roll over at `reset_hour_utc`
/// (0-23) instead of midnight. Day 0 starts at the Unix epoch.
pub fn day_number(now: DateTime<Utc>, reset_hour_utc: u32) -> i64 {
    let shifted = now - Duration::hours(i64::from(reset_hour_utc % 24));
    shifted.timestamp().div_euclid(86_400)
}

/// Decide what the lock record should become for a claim on `day`.
/// A record that does not parse is overwritten.
pub fn claim_transform(
    current: Option<&str>,
    day: i64,
    claimant: &str,
    now: DateTime<Utc>,
) -> Transform {
    let existing = current
        .filter(|v| !v.is_empty())
        .and_then(|v| match serde_json::from_str::<DailyLockRecord>(v) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Corrupt daily lock record, overwriting: {}", e);
                None
            }
        });

    if existing.is_some_and(|record| record.last_reset_day >= day) {
        return Transform::Keep;
    }

    let record = DailyLockRecord {
        last_reset_day: day,
        processed_by: claimant.to_string(),
        processed_at: now,
    };
    match serde_json::to_string(&record) {
        Ok(json) => Transform::Write(json),
        // Unreachable for this plain struct; keeping the record is the safe choice.
        Err(_) => Transform::Keep,
    }
}

impl StateSynchronizer {
    /// Try to become the session that runs the reset for `day`.
    pub async fn try_claim_daily_reset(&self, day: i64) -> ClaimOutcome {
        let claimant = self.identity().to_string();
        let now = self.backend().now();
        let result = self
            .atomic_update_raw(DAILY_STATE_KEY, move |current| {
                claim_transform(current, day, &claimant, now)
            })
            .await;

        match result {
            Ok(UpdateOutcome::Committed { .. }) => {
                info!("Acquired daily reset lock for day {}", day);
                ClaimOutcome::Committed
            }
            Ok(UpdateOutcome::AlreadyCurrent { .. }) => {
                debug!("Daily reset for day {} already processed", day);
                ClaimOutcome::AlreadyCurrent
            }
            Ok(UpdateOutcome::Conflict) => {
                warn!("Daily reset claim for day {} kept losing races, skipping", day);
                ClaimOutcome::Skipped
            }
            Err(e) => {
                warn!("Failed to coordinate daily reset for day {}: {}", day, e);
                ClaimOutcome::Skipped
            }
        }
    }

    /// Current lock record, if any session has ever claimed a day.
    pub async fn daily_lock(&self) -> Option<DailyLockRecord> {
        let entry = self.load_state(DAILY_STATE_KEY).await.ok().flatten()?;
        serde_json::from_str(&entry.value).ok()
    }
}
