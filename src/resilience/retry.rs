use crate::error::ErrorContext;
use crate::error_class::ErrorClass;
use crate::{Error, Result};
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound for every computed delay, jitter and Retry-After included.
    pub backoff_cap: Duration,
    /// Jitter factor band, drawn uniformly. `(1.0, 1.0)` disables jitter.
    pub jitter_band: (f64, f64),
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(30_000),
            jitter_band: (0.5, 1.5),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_backoff_cap(mut self, cap: Duration) -> Self {
        self.backoff_cap = cap;
        self
    }

    pub fn with_jitter_band(mut self, min: f64, max: f64) -> Self {
        self.jitter_band = (min, max);
        self
    }

    /// Disable jitter; delays become deterministic.
    pub fn without_jitter(self) -> Self {
        self.with_jitter_band(1.0, 1.0)
    }

    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = self.jitter_band;
        if !lo.is_finite() || !hi.is_finite() || lo < 0.0 || lo > hi {
            return Err(Error::configuration_with_context(
                "jitter band must satisfy 0 <= min <= max",
                ErrorContext::new()
                    .with_field_path("retry.jitter_band")
                    .with_details(format!("[{}, {}]", lo, hi)),
            ));
        }
        if self.base_delay > self.backoff_cap {
            return Err(Error::configuration_with_context(
                "base delay must not exceed the backoff cap",
                ErrorContext::new()
                    .with_field_path("retry.base_delay_ms")
                    .with_details(format!(
                        "base={}ms cap={}ms",
                        self.base_delay.as_millis(),
                        self.backoff_cap.as_millis()
                    )),
            ));
        }
        Ok(())
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Retry / backoff policy. Holds no per-call state.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `attempt` is 0-based: the first failure is attempt 0.
    pub fn should_retry(&self, err: &Error, attempt: u32) -> bool {
        attempt < self.config.max_retries && err.is_retryable()
    }

    /// `min(cap, base * 2^attempt)`, before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let cap_ms = self.cap_ms();
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
    }

    /// Exponential backoff with jitter, never above the cap.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let jittered = backoff.as_millis() as f64 * self.jitter_factor();
        Duration::from_millis((jittered.max(0.0) as u64).min(self.cap_ms()))
    }

    /// Delay before retrying after `err`. A provider Retry-After hint replaces
    /// the computed backoff.
    pub fn delay_for(&self, err: &Error, attempt: u32) -> Duration {
        match err.retry_after() {
            Some(hint) => hint.min(self.config.backoff_cap),
            None => self.next_delay(attempt),
        }
    }

    pub fn decide(&self, err: &Error, attempt: u32) -> Decision {
        if self.should_retry(err, attempt) {
            Decision::Retry {
                delay: self.delay_for(err, attempt),
            }
        } else {
            Decision::Fail
        }
    }

    fn cap_ms(&self) -> u64 {
        self.config.backoff_cap.as_millis().min(u64::MAX as u128) as u64
    }

    fn jitter_factor(&self) -> f64 {
        let (lo, hi) = self.config.jitter_band;
        if lo >= hi {
            return lo;
        }
        rand::rng().random_range(lo..=hi)
    }
}

/// Phase of one call's retry state machine.
///
/// `Pending -> Attempting -> {Succeeded | Retrying -> Attempting | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Pending,
    Attempting,
    Retrying { delay: Duration },
    Succeeded,
    Failed,
}

impl RetryPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryPhase::Succeeded | RetryPhase::Failed)
    }
}

/// Per-call retry bookkeeping; created for a call and dropped when it resolves.
#[derive(Debug, Clone)]
pub struct RetryState {
    /// 0-based index of the current (or last) attempt.
    pub attempt: u32,
    /// Total attempts allowed, first attempt included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub last_error: Option<ErrorClass>,
    phase: RetryPhase,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.config().max_retries.saturating_add(1),
            base_delay: policy.config().base_delay,
            last_error: None,
            phase: RetryPhase::Pending,
        }
    }

    pub fn phase(&self) -> RetryPhase {
        self.phase
    }

    /// Transport attempts started so far.
    pub fn attempts_made(&self) -> u32 {
        match self.phase {
            RetryPhase::Pending => 0,
            RetryPhase::Retrying { .. } => self.attempt,
            _ => self.attempt + 1,
        }
    }

    /// `Pending | Retrying -> Attempting`.
    pub fn begin_attempt(&mut self) -> Result<()> {
        match self.phase {
            RetryPhase::Pending | RetryPhase::Retrying { .. } => {
                self.phase = RetryPhase::Attempting;
                Ok(())
            }
            other => Err(illegal_transition(other, "begin_attempt")),
        }
    }

    /// `Attempting -> Succeeded`.
    pub fn succeed(&mut self) -> Result<()> {
        match self.phase {
            RetryPhase::Attempting => {
                self.phase = RetryPhase::Succeeded;
                Ok(())
            }
            other => Err(illegal_transition(other, "succeed")),
        }
    }

    /// `Attempting -> Retrying | Failed`, as decided by `policy`.
    pub fn fail(&mut self, err: &Error, policy: &RetryPolicy) -> Result<RetryPhase> {
        if self.phase != RetryPhase::Attempting {
            return Err(illegal_transition(self.phase, "fail"));
        }
        self.last_error = Some(err.class());
        self.phase = match policy.decide(err, self.attempt) {
            Decision::Retry { delay } => {
                self.attempt += 1;
                RetryPhase::Retrying { delay }
            }
            Decision::Fail => RetryPhase::Failed,
        };
        Ok(self.phase)
    }

    /// `Any non-terminal -> Failed`, used when the caller cancels.
    pub fn abort(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = RetryPhase::Failed;
        }
    }
}

fn illegal_transition(from: RetryPhase, op: &str) -> Error {
    Error::runtime_with_context(
        format!("illegal retry transition: {} from {:?}", op, from),
        ErrorContext::new().with_source("retry_state"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::new()
                .with_max_retries(max_retries)
                .with_base_delay(Duration::from_millis(100))
                .with_backoff_cap(Duration::from_millis(1_000))
                .without_jitter(),
        )
    }

    #[test]
    fn test_config_defaults() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.base_delay, Duration::from_millis(1000));
        assert_eq!(cfg.backoff_cap, Duration::from_millis(30_000));
        assert_eq!(cfg.jitter_band, (0.5, 1.5));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::new()
            .with_jitter_band(1.5, 0.5)
            .validate()
            .is_err());
        assert!(RetryConfig::new()
            .with_jitter_band(-0.1, 1.0)
            .validate()
            .is_err());
        assert!(RetryConfig::new()
            .with_base_delay(Duration::from_secs(60))
            .validate()
            .is_err());
    }

    #[test]
    fn test_should_retry_bounds() {
        let p = policy(3);
        let server = Error::from_status(500, "", None);
        assert!(p.should_retry(&server, 0));
        assert!(p.should_retry(&server, 2));
        assert!(!p.should_retry(&server, 3));
        assert!(!p.should_retry(&server, 10));
        assert!(!p.should_retry(&Error::from_status(400, "", None), 0));
        assert!(!policy(0).should_retry(&server, 0));
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let p = policy(10);
        let delays: Vec<u64> = (0..6).map(|a| p.next_delay(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(p.next_delay(200), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_band_and_under_cap() {
        let p = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay(Duration::from_millis(100))
                .with_backoff_cap(Duration::from_millis(1_000))
                .with_jitter_band(0.5, 1.5),
        );
        for _ in 0..200 {
            let d = p.next_delay(1).as_millis() as u64;
            assert!((100..=300).contains(&d), "delay {} outside band", d);
            let capped = p.next_delay(8).as_millis() as u64;
            assert!((500..=1000).contains(&capped), "delay {} outside cap", capped);
        }
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let p = policy(3);
        let hinted = Error::from_status(429, "", Some(Duration::from_millis(250)));
        assert_eq!(p.delay_for(&hinted, 0), Duration::from_millis(250));
        let huge = Error::from_status(429, "", Some(Duration::from_secs(600)));
        assert_eq!(p.delay_for(&huge, 0), Duration::from_millis(1000));
        let unhinted = Error::from_status(429, "", None);
        assert_eq!(p.delay_for(&unhinted, 2), Duration::from_millis(400));
    }

    #[test]
    fn test_state_machine_exhausts() {
        let p = policy(3);
        let mut st = RetryState::new(&p);
        assert_eq!(st.max_attempts, 4);
        assert_eq!(st.phase(), RetryPhase::Pending);
        let err = Error::from_status(503, "", None);
        let mut attempts = 0;
        loop {
            st.begin_attempt().unwrap();
            attempts += 1;
            match st.fail(&err, &p).unwrap() {
                RetryPhase::Retrying { .. } => continue,
                RetryPhase::Failed => break,
                other => panic!("unexpected phase {:?}", other),
            }
        }
        assert_eq!(attempts, 4);
        assert_eq!(st.attempts_made(), 4);
        assert_eq!(st.last_error, Some(ErrorClass::ServerError));
        assert!(st.phase().is_terminal());
        assert!(st.begin_attempt().is_err());
    }

    #[test]
    fn test_state_machine_fails_fast_on_client_error() {
        let p = policy(3);
        let mut st = RetryState::new(&p);
        st.begin_attempt().unwrap();
        let phase = st.fail(&Error::from_status(400, "bad", None), &p).unwrap();
        assert_eq!(phase, RetryPhase::Failed);
        assert_eq!(st.attempts_made(), 1);
    }

    #[test]
    fn test_state_machine_success_after_retry() {
        let p = policy(3);
        let mut st = RetryState::new(&p);
        st.begin_attempt().unwrap();
        let phase = st.fail(&Error::transport("reset"), &p).unwrap();
        assert_eq!(
            phase,
            RetryPhase::Retrying {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(st.attempts_made(), 1);
        st.begin_attempt().unwrap();
        st.succeed().unwrap();
        assert_eq!(st.phase(), RetryPhase::Succeeded);
        assert_eq!(st.attempts_made(), 2);
        assert!(st.succeed().is_err());
        assert!(st.fail(&Error::transport("x"), &p).is_err());
    }

    #[test]
    fn test_illegal_transitions() {
        let p = policy(1);
        let mut st = RetryState::new(&p);
        assert!(st.succeed().is_err());
        assert!(st.fail(&Error::transport("x"), &p).is_err());
        st.abort();
        assert_eq!(st.phase(), RetryPhase::Failed);
    }
}
