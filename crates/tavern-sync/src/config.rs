use std::time::Duration;

use crate::error::SyncError;

/// Timer cadences and thresholds for online sessions.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often a session refreshes its presence record.
    pub heartbeat_interval: Duration,
    /// How often a session polls for new messages.
    pub poll_interval: Duration,
    /// How often a session reaps other sessions' stale presence records.
    pub sweep_interval: Duration,
    /// Heartbeat silence after which a presence record is dead.
    pub stale_after: Duration,
    /// Entries shown by `/news` when no count is given.
    pub news_page: usize,
    /// Incoming chat lines kept per session.
    pub chat_history: usize,
    /// UTC hour at which the game day rolls over.
    pub reset_hour_utc: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(120),
            news_page: 15,
            chat_history: 100,
            reset_hour_utc: 0,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `TAVERN_HEARTBEAT_SECS`, `TAVERN_POLL_SECS`,
    /// `TAVERN_SWEEP_SECS`, `TAVERN_STALE_SECS` and `TAVERN_RESET_HOUR_UTC`
    /// when set.
    pub fn from_env() -> Result<Self, SyncError> {
        let mut config = Self::default();
        if let Some(d) = env_secs("TAVERN_HEARTBEAT_SECS")? {
            config.heartbeat_interval = d;
        }
        if let Some(d) = env_secs("TAVERN_POLL_SECS")? {
            config.poll_interval = d;
        }
        if let Some(d) = env_secs("TAVERN_SWEEP_SECS")? {
            config.sweep_interval = d;
        }
        if let Some(d) = env_secs("TAVERN_STALE_SECS")? {
            config.stale_after = d;
        }
        if let Some(hour) = env_parse::<u32>("TAVERN_RESET_HOUR_UTC")? {
            config.reset_hour_utc = hour;
        }
        config.validate()?;
        Ok(config)
    }

    /// A heartbeat slower than the staleness window would reap live sessions.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.heartbeat_interval.is_zero()
            || self.poll_interval.is_zero()
            || self.sweep_interval.is_zero()
        {
            return Err(SyncError::Config("timer intervals must be non-zero".into()));
        }
        if self.heartbeat_interval >= self.stale_after {
            return Err(SyncError::Config(format!(
                "heartbeat interval {:?} must be shorter than stale threshold {:?}",
                self.heartbeat_interval, self.stale_after
            )));
        }
        if self.reset_hour_utc > 23 {
            return Err(SyncError::Config(format!(
                "reset hour {} is not an hour of the day",
                self.reset_hour_utc
            )));
        }
        Ok(())
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>, SyncError> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_secs))
}

fn env_parse<T>(name: &str) -> Result<Option<T>, SyncError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SyncError::Config(format!("{}='{}': {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_cadence() {
        let config = SyncConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.stale_after, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn heartbeat_slower_than_staleness_is_rejected() {
        let config = SyncConfig {
            heartbeat_interval: Duration::from_secs(200),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn reset_hour_must_be_on_the_clock() {
        let config = SyncConfig {
            reset_hour_utc: 24,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }
}
