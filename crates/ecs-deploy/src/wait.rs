//! Polling with exponential backoff, a deadline and cancellation
//!
//! Used to wait for a workload to drain before its service is deleted.

use crate::reconcile::ProviderError;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Delay after the first unsuccessful check
    pub initial_delay: Duration,
    /// Cap for exponential growth
    pub max_delay: Duration,
    /// Total time allowed before giving up
    pub timeout: Duration,
    pub jitter: bool,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            timeout: Duration::from_secs(ecs_deploy_common::defaults::DEFAULT_DRAIN_TIMEOUT_SECS),
            jitter: true,
        }
    }
}

impl WaitConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out waiting for {resource} after {timeout:?} ({attempts} checks)")]
    Timeout {
        resource: String,
        timeout: Duration,
        attempts: u32,
    },

    #[error("wait for {resource} cancelled")]
    Cancelled { resource: String },

    #[error("check for {resource} failed")]
    Check {
        resource: String,
        #[source]
        source: ProviderError,
    },
}

/// Call `check` until it returns `Ok(true)`.
///
/// Sleeps between checks never run past the deadline; one last check is
/// made at the deadline before reporting a timeout.
pub async fn wait_for_resource<F, Fut>(
    config: WaitConfig,
    cancel: Option<&CancellationToken>,
    check: F,
    resource_name: &str,
) -> Result<(), WaitError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool, ProviderError>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    let mut builder = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0);
    if config.jitter {
        builder = builder.with_jitter();
    }
    let mut delays = builder.build();

    let cancelled = || WaitError::Cancelled {
        resource: resource_name.to_string(),
    };

    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(cancelled());
        }

        attempts += 1;
        match check().await {
            Ok(true) => {
                debug!(resource = %resource_name, attempts, "Condition met");
                return Ok(());
            }
            Ok(false) => {}
            Err(source) => {
                warn!(resource = %resource_name, error = %source, "Check failed");
                return Err(WaitError::Check {
                    resource: resource_name.to_string(),
                    source,
                });
            }
        }

        let remaining = config.timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(WaitError::Timeout {
                resource: resource_name.to_string(),
                timeout: config.timeout,
                attempts,
            });
        }

        let delay = delays.next().unwrap_or(config.max_delay).min(remaining);
        debug!(
            resource = %resource_name,
            attempt = attempts,
            delay_ms = delay.as_millis(),
            "Not ready, waiting"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                return Err(cancelled());
            }
        }
    }
}
