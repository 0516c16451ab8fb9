//! Bounded exponential backoff for calls to the API server.
//!
//! Only errors that [`Error::is_transient`] accepts are retried; a rejected request
//! (bad name, missing permission, conflict) fails on the first attempt.

use std::{future::Future, time::Duration};

use log::{error, warn};
use rand::Rng;

use crate::Error;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts including the first one; always at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }
}

pub async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match operation().await {
            Ok(x) => return Ok(x),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= config.max_attempts.max(1) => {
                error!("{operation_name} failed after {attempt} attempts: {e}");
                return Err(e);
            }
            Err(e) => {
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
                warn!(
                    "{operation_name} failed (attempt {attempt}), retrying in {}ms: {e}",
                    jittered.as_millis()
                );
                tokio::time::sleep(jittered).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
