//! ---
//! rao_section: "05-case-dispatch"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Optimisation engine dispatch and process adapter."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use rao_common::DispatchConfig;

/// Timeout, polling and retry parameters for engine dispatch.
///
/// Built from the `[dispatch]` configuration section, which has no defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Retries allowed after the first attempt.
    pub retry_budget: u32,
    pub backoff_base: Duration,
    pub backoff_max: Option<Duration>,
    pub jitter: Duration,
    /// How long a timed-out run is still watched for a late result.
    pub late_result_horizon: Duration,
}

impl DispatchPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            timeout: config.timeout,
            poll_interval: config.poll_interval,
            retry_budget: config.retry_budget,
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
            jitter: config.jitter.unwrap_or(Duration::ZERO),
            late_result_horizon: config.late_result_horizon,
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.retry_budget.saturating_add(1)
    }

    /// Delay before retry `retry` (1-indexed): `base * 2^(retry-1)` plus jitter, capped.
    pub fn backoff_delay(&self, retry: u32, rng: &mut StdRng) -> Duration {
        let exponent = retry.saturating_sub(1).min(8);
        let mut delay = self.backoff_base.mul_f64(2u32.pow(exponent) as f64);
        if !self.jitter.is_zero() {
            let jitter_ms = rng.gen_range(0..=self.jitter.as_millis().max(1)) as u64;
            delay += Duration::from_millis(jitter_ms);
        }
        match self.backoff_max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn policy(jitter_ms: u64, max_ms: Option<u64>) -> DispatchPolicy {
        DispatchPolicy {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            retry_budget: 3,
            backoff_base: Duration::from_millis(200),
            backoff_max: max_ms.map(Duration::from_millis),
            jitter: Duration::from_millis(jitter_ms),
            late_result_horizon: Duration::from_secs(10),
        }
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = policy(0, None);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(policy.backoff_delay(1, &mut rng), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2, &mut rng), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3, &mut rng), Duration::from_millis(800));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn backoff_respects_cap_and_jitter_bounds() {
        let capped = policy(0, Some(500));
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(capped.backoff_delay(5, &mut rng), Duration::from_millis(500));

        let jittered = policy(50, None);
        for _ in 0..32 {
            let delay = jittered.backoff_delay(2, &mut rng);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(450));
        }
    }
}
