//! Bounded fixed-backoff retries for cloner calls

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::storage::RetryConfig;

/// Retry a fallible call a fixed number of times with a fixed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.delay(),
        }
    }
}

impl RetryPolicy {
    /// Policy that tries exactly once
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Runs `op` until it succeeds or the retries are used up
    ///
    /// The last error is returned unchanged.
    pub fn run<T, E, F>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        operation = what,
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "Retrying after failure"
                    );
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let result: Result<u32, String> = quick(3).run("op", || {
            calls += 1;
            if calls < 3 {
                Err(format!("attempt {}", calls))
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result, Ok(3));
    }

    #[test]
    fn gives_up_with_last_error() {
        let mut calls = 0;
        let result: Result<(), String> = quick(2).run("op", || {
            calls += 1;
            Err(format!("attempt {}", calls))
        });

        assert_eq!(result, Err("attempt 3".to_string()));
        assert_eq!(calls, 3);
    }

    #[test]
    fn none_tries_once() {
        let mut calls = 0;
        let _: Result<(), &str> = RetryPolicy::none().run("op", || {
            calls += 1;
            Err("no")
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_retries: 5,
            delay_ms: 250,
        });
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }
}
