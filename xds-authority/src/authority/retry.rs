//! Reconnect backoff policy for the ADS stream.

use std::time::Duration;

use crate::error::{Error, Result};

/// Exponential backoff policy for stream reconnection.
///
/// Reconnection attempts continue for as long as the authority is open;
/// there is no attempt cap. The backoff resets once a message is received
/// on a newly established stream.
///
/// # Example
///
/// ```
/// use xds_authority::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_initial_backoff(Duration::from_secs(1)).unwrap()
///     .with_max_backoff(Duration::from_secs(30)).unwrap()
///     .with_backoff_multiplier(2.0).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Backoff before the first reconnection attempt.
    ///
    /// Default: 1 second.
    pub initial_backoff: Duration,

    /// Upper bound on the backoff, regardless of how many attempts have
    /// failed.
    ///
    /// Default: 30 seconds.
    pub max_backoff: Duration,

    /// Factor applied to the backoff after each failed attempt.
    ///
    /// Default: 2.0.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Create a retry policy with custom parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `initial_backoff` is zero
    /// - `backoff_multiplier` is less than 1.0
    /// - `max_backoff` is less than `initial_backoff`
    pub fn new(
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self> {
        Self {
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
        .validated()
    }

    /// Set the initial backoff duration.
    ///
    /// # Errors
    ///
    /// Returns an error if `duration` is zero or greater than `max_backoff`.
    pub fn with_initial_backoff(mut self, duration: Duration) -> Result<Self> {
        self.initial_backoff = duration;
        self.validated()
    }

    /// Set the maximum backoff duration.
    ///
    /// # Errors
    ///
    /// Returns an error if `duration` is less than `initial_backoff`.
    pub fn with_max_backoff(mut self, duration: Duration) -> Result<Self> {
        self.max_backoff = duration;
        self.validated()
    }

    /// Set the backoff multiplier.
    ///
    /// # Errors
    ///
    /// Returns an error if `multiplier` is less than 1.0.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Result<Self> {
        self.backoff_multiplier = multiplier;
        self.validated()
    }

    fn validated(self) -> Result<Self> {
        if self.initial_backoff.is_zero() {
            return Err(Error::Config(
                "initial_backoff must be greater than zero".into(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(Error::Config(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(Error::Config(format!(
                "max_backoff ({:?}) must be >= initial_backoff ({:?})",
                self.max_backoff, self.initial_backoff
            )));
        }
        Ok(self)
    }

    /// Backoff duration for a given attempt number (0-indexed).
    fn backoff_duration(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        self.initial_backoff.mul_f64(multiplier).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Stateful backoff calculator based on a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff calculator from a retry policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// The next backoff duration; advances the attempt counter.
    pub fn next_backoff(&mut self) -> Duration {
        let duration = self.policy.backoff_duration(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        duration
    }

    /// Reset after a successful receive, so the next failure starts over
    /// at the initial backoff.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_multiplier_and_saturates() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(8), 2.0).unwrap();
        let mut backoff = Backoff::new(policy);

        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(8));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(8));
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(RetryPolicy::default());
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));

        backoff.reset();
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(RetryPolicy::new(Duration::ZERO, Duration::from_secs(30), 2.0).is_err());
        assert!(RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(30), 0.5).is_err());
        assert!(RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(1), 2.0).is_err());
        assert!(
            RetryPolicy::default()
                .with_max_backoff(Duration::from_millis(1))
                .is_err()
        );
    }
}
