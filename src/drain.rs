//! Drain Detector
//!
//! Decides when the store has finished absorbing submitted work by polling a queue-depth
//! signal until it reads zero for N consecutive polls. This is a quiescence heuristic, not a
//! barrier: a burst that arrives after the last poll is not seen. Callers bound the wait with
//! the cancellation token.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, VerifyError};

pub const DEFAULT_QUEUE_NAME: &str = "tuple-processing";

/// Reads the number of pending items on a named queue of the store under test.
#[async_trait]
pub trait QueueDepthProbe: Send + Sync {
    async fn queue_depth(&self, queue: &str) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainConfig {
    pub queue_name: String,
    #[serde(with = "crate::config::duration_ms")]
    pub poll_interval: Duration,
    pub required_consecutive_empty: usize,
    /// Ignore empty readings until the queue has been seen non-empty at least once.
    #[serde(default)]
    pub require_activity: bool,
    /// Extra wait after drain is declared, for consumers finishing in-flight work.
    #[serde(with = "crate::config::duration_ms")]
    pub settle_delay: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            poll_interval: Duration::from_secs(1),
            required_consecutive_empty: 3,
            require_activity: false,
            settle_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub polls: usize,
    pub probe_errors: usize,
    pub max_depth_seen: usize,
}

/// Poll `probe` until `required_consecutive_empty` consecutive zero readings.
///
/// The first poll is immediate. Any non-zero reading resets the counter, and so does a failed
/// probe: a poll that could not be read never counts toward drain.
pub async fn wait_for_drain<P>(
    cancel: &CancellationToken,
    probe: &P,
    config: &DrainConfig,
) -> Result<DrainReport>
where
    P: QueueDepthProbe + ?Sized,
{
    if config.required_consecutive_empty == 0 {
        return Err(VerifyError::Configuration(
            "required_consecutive_empty must be positive".into(),
        ));
    }
    if config.poll_interval.is_zero() {
        return Err(VerifyError::Configuration(
            "drain poll interval must be non-zero".into(),
        ));
    }

    let mut report = DrainReport::default();
    let mut consecutive_empty = 0usize;
    let mut seen_activity = false;

    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(queue = %config.queue_name, "waiting for queue to drain");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(VerifyError::Cancelled),
            _ = ticker.tick() => {}
        }

        let reading = tokio::select! {
            _ = cancel.cancelled() => return Err(VerifyError::Cancelled),
            res = probe.queue_depth(&config.queue_name) => res,
        };
        report.polls += 1;

        match reading {
            Ok(0) if config.require_activity && !seen_activity => {
                debug!(queue = %config.queue_name, "queue empty, no activity seen yet");
            }
            Ok(0) => {
                consecutive_empty += 1;
                debug!(queue = %config.queue_name, consecutive_empty, "queue empty");
            }
            Ok(depth) => {
                seen_activity = true;
                consecutive_empty = 0;
                report.max_depth_seen = report.max_depth_seen.max(depth);
                debug!(queue = %config.queue_name, depth, "queue length");
            }
            Err(e) => {
                let err = VerifyError::Probe {
                    queue: config.queue_name.clone(),
                    reason: format!("{:#}", e),
                };
                warn!(error = %err, "unable to read queue length");
                report.probe_errors += 1;
                consecutive_empty = 0;
            }
        }

        if consecutive_empty >= config.required_consecutive_empty {
            break;
        }
    }

    info!(
        queue = %config.queue_name,
        polls = report.polls,
        "queue drained; producer has stopped"
    );

    if !config.settle_delay.is_zero() {
        tokio::select! {
            _ = cancel.cancelled() => return Err(VerifyError::Cancelled),
            _ = tokio::time::sleep(config.settle_delay) => {}
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays a fixed script of readings; `None` is a probe failure. Reads 0 once exhausted.
    struct ScriptedProbe {
        script: Mutex<VecDeque<Option<usize>>>,
    }

    impl ScriptedProbe {
        fn new(script: &[Option<usize>]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
            }
        }
    }

    #[async_trait]
    impl QueueDepthProbe for ScriptedProbe {
        async fn queue_depth(&self, _queue: &str) -> anyhow::Result<usize> {
            match self.script.lock().pop_front() {
                Some(Some(depth)) => Ok(depth),
                Some(None) => anyhow::bail!("probe unavailable"),
                None => Ok(0),
            }
        }
    }

    fn config(required: usize) -> DrainConfig {
        DrainConfig {
            poll_interval: Duration::from_millis(1),
            required_consecutive_empty: required,
            settle_delay: Duration::ZERO,
            ..DrainConfig::default()
        }
    }

    fn depths(values: &[usize]) -> Vec<Option<usize>> {
        values.iter().map(|v| Some(*v)).collect()
    }

    #[tokio::test]
    async fn test_returns_after_required_empty_polls() {
        let probe = ScriptedProbe::new(&depths(&[5, 3, 0, 0, 0]));
        let report = wait_for_drain(&CancellationToken::new(), &probe, &config(3))
            .await
            .unwrap();
        assert_eq!(report.polls, 5);
        assert_eq!(report.max_depth_seen, 5);
    }

    #[tokio::test]
    async fn test_non_zero_reading_resets_counter() {
        let probe = ScriptedProbe::new(&depths(&[0, 0, 5, 0, 0, 0]));
        let report = wait_for_drain(&CancellationToken::new(), &probe, &config(3))
            .await
            .unwrap();
        assert_eq!(report.polls, 6);
    }

    #[tokio::test]
    async fn test_probe_error_never_counts_as_empty() {
        let probe = ScriptedProbe::new(&[Some(0), Some(0), None, Some(0), Some(0), Some(0)]);
        let report = wait_for_drain(&CancellationToken::new(), &probe, &config(3))
            .await
            .unwrap();
        assert_eq!(report.polls, 6);
        assert_eq!(report.probe_errors, 1);
    }

    #[tokio::test]
    async fn test_require_activity_ignores_leading_zeros() {
        let probe = ScriptedProbe::new(&depths(&[0, 0, 0, 2, 0, 0, 0]));
        let cfg = DrainConfig {
            require_activity: true,
            ..config(3)
        };
        let report = wait_for_drain(&CancellationToken::new(), &probe, &cfg)
            .await
            .unwrap();
        assert_eq!(report.polls, 7);
    }

    #[tokio::test]
    async fn test_cancellation_ends_wait() {
        // Never drains on its own.
        struct BusyProbe;

        #[async_trait]
        impl QueueDepthProbe for BusyProbe {
            async fn queue_depth(&self, _queue: &str) -> anyhow::Result<usize> {
                Ok(1)
            }
        }

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = wait_for_drain(&cancel, &BusyProbe, &config(3))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Cancelled));
    }

    #[tokio::test]
    async fn test_zero_required_polls_is_rejected() {
        let probe = ScriptedProbe::new(&[]);
        let err = wait_for_drain(&CancellationToken::new(), &probe, &config(0))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Configuration(_)));
    }
}
