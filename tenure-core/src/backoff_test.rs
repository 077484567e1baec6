#[cfg(test)]
mod tests {
    use crate::backoff::{Backoff, BackoffConfig, BackoffError, ExponentialBackoff};
    use std::time::Duration;

    #[test]
    fn test_default_backoff_schedule() {
        let mut backoff = ExponentialBackoff::default();
        backoff.start();

        assert_eq!(backoff.next(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(1500)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(2250)));
        assert_eq!(backoff.next(), None);
        assert_eq!(backoff.attempts(), 3);
        assert_eq!(backoff.max_attempts(), 3);

        // Exhausted stays exhausted until restarted
        assert_eq!(backoff.next(), None);
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_start_resets_cycle() {
        let mut backoff = ExponentialBackoff::default();
        backoff.start();
        while backoff.next().is_some() {}

        backoff.start();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(1500)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(2250)));
        assert_eq!(backoff.next(), None);
    }

    #[test]
    fn test_no_retry_yields_nothing() {
        let mut backoff = ExponentialBackoff::no_retry();
        backoff.start();
        assert_eq!(backoff.max_attempts(), 0);
        assert_eq!(backoff.next(), None);
        assert_eq!(backoff.attempts(), 0);
    }

    #[test]
    fn test_custom_schedule() {
        let mut backoff = ExponentialBackoff::new(4, Duration::from_millis(125), 2.0).unwrap();
        backoff.start();
        let intervals: Vec<Duration> = std::iter::from_fn(|| backoff.next()).collect();
        assert_eq!(
            intervals,
            vec![
                Duration::from_millis(125),
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(1000),
            ]
        );
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert_eq!(
            ExponentialBackoff::new(3, Duration::ZERO, 1.5),
            Err(BackoffError::ZeroInterval)
        );
        assert!(matches!(
            ExponentialBackoff::new(3, Duration::from_secs(1), 0.0),
            Err(BackoffError::InvalidMultiplier(_))
        ));
        assert!(matches!(
            ExponentialBackoff::new(3, Duration::from_secs(1), f64::NAN),
            Err(BackoffError::InvalidMultiplier(_))
        ));
    }

    #[test]
    fn test_huge_intervals_saturate() {
        let mut backoff = ExponentialBackoff::new(2000, Duration::from_secs(1), 10.0).unwrap();
        backoff.start();
        let last = std::iter::from_fn(|| backoff.next()).last();
        assert_eq!(last, Some(Duration::MAX));
    }

    #[test]
    fn test_total_wait() {
        assert_eq!(ExponentialBackoff::default().total_wait(), Duration::from_millis(4750));
        assert_eq!(ExponentialBackoff::no_retry().total_wait(), Duration::ZERO);

        let huge = ExponentialBackoff::new(2000, Duration::from_secs(1), 10.0).unwrap();
        assert_eq!(huge.total_wait(), Duration::MAX);
    }

    #[test]
    fn test_config_conversion() {
        let config: BackoffConfig = serde_json::from_str(
            r#"{"max_attempts": 2, "initial_interval_ms": 250, "multiplier": 3.0}"#,
        )
        .unwrap();
        let mut backoff = ExponentialBackoff::try_from(&config).unwrap();
        backoff.start();
        assert_eq!(backoff.next(), Some(Duration::from_millis(250)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(750)));
        assert_eq!(backoff.next(), None);

        let default = ExponentialBackoff::try_from(&BackoffConfig::default()).unwrap();
        assert_eq!(default, ExponentialBackoff::default());
    }
}
