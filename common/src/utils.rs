// common/src/utils.rs
use chrono::{DateTime, Utc};
use tracing_subscriber::EnvFilter;

/// Setup tracing for consistent logging across services.
///
/// Honors `RUST_LOG`, defaulting to `info`. Calling it twice keeps the first subscriber.
pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Current time truncated to whole seconds, the resolution records are stored at
pub fn now_whole_seconds() -> DateTime<Utc> {
    from_epoch_seconds(Utc::now().timestamp())
}

pub fn from_epoch_seconds(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_whole_seconds_has_no_fraction() {
        let now = now_whole_seconds();
        assert_eq!(now.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_setup_tracing_twice_is_harmless() {
        setup_tracing();
        setup_tracing();
    }

    #[test]
    fn test_from_epoch_seconds_round_trips() {
        assert_eq!(from_epoch_seconds(1_700_000_000).timestamp(), 1_700_000_000);
    }
}
