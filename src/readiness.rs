//! Gate on every registered group-version serving its OpenAPI v3 document.
//!
//! The poller probes the still-unconfirmed group-versions in rounds at a fixed
//! cadence. Each round probes the whole set it started with; confirmations only
//! shrink the set seen by the next round. The probing loop races an overall
//! deadline and a cancellation token, whichever finishes first decides the
//! outcome:
//!
//! ```text
//! Polling ──(set empty after a round)──▶ AllReady
//!    │
//!    ├──(deadline elapsed)─────────────▶ TimedOut  (lists unanswered)
//!    │
//!    └──(token cancelled)──────────────▶ Cancelled
//! ```

use crate::k8s::{DiscoveryClient, GroupVersion};
use crate::{ExtractorError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fixed delay between probing rounds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Terminal summary of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessReport {
    /// Size of the unconfirmed set after each completed round.
    pub pending_per_round: Vec<usize>,
    pub elapsed: Duration,
}

impl ReadinessReport {
    pub fn rounds(&self) -> usize {
        self.pending_per_round.len()
    }
}

enum RoundOutcome {
    Completed,
    TimedOut,
    Cancelled,
}

pub struct ReadinessPoller {
    client: Arc<dyn DiscoveryClient>,
    interval: Duration,
    timeout: Duration,
}

impl ReadinessPoller {
    pub fn new(client: Arc<dyn DiscoveryClient>, timeout: Duration) -> Self {
        Self {
            client,
            interval: DEFAULT_POLL_INTERVAL,
            timeout,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Waits until every group-version in `group_versions` answers its v3 probe.
    pub async fn wait(
        &self,
        group_versions: &[GroupVersion],
        cancel: &CancellationToken,
    ) -> Result<ReadinessReport> {
        let started = Instant::now();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut pending = group_versions.to_vec();
        let mut confirmed = HashSet::new();
        let mut pending_per_round = Vec::new();

        info!(
            "Waiting up to {:?} for OpenAPI v3 of {} group versions",
            self.timeout,
            pending.len()
        );

        loop {
            confirmed.clear();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => RoundOutcome::Cancelled,
                _ = &mut deadline => RoundOutcome::TimedOut,
                _ = self.probe_round(&pending, &mut confirmed) => RoundOutcome::Completed,
            };

            // Answers from an interrupted round still count.
            pending.retain(|gv| !confirmed.contains(gv));
            match outcome {
                RoundOutcome::Completed => {}
                RoundOutcome::TimedOut => return Err(self.timed_out(pending)),
                RoundOutcome::Cancelled => return Err(ExtractorError::Cancelled),
            }
            pending_per_round.push(pending.len());

            if pending.is_empty() {
                info!("All API services are available");
                return Ok(ReadinessReport {
                    pending_per_round,
                    elapsed: started.elapsed(),
                });
            }

            info!(
                "Not all API services are available, unavailable group versions: {}",
                join(&pending)
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExtractorError::Cancelled),
                _ = &mut deadline => return Err(self.timed_out(pending)),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Probes every element of `pending` once, recording each success in
    /// `confirmed` as soon as it answers.
    async fn probe_round(
        &self,
        pending: &[GroupVersion],
        confirmed: &mut HashSet<GroupVersion>,
    ) {
        for gv in pending {
            let path = gv.openapi_v3_path();
            match self.client.head(&path).await {
                Ok(()) => {
                    debug!("{} is serving OpenAPI v3", gv);
                    confirmed.insert(gv.clone());
                }
                Err(e) => debug!("{} is not ready: {}", gv, e),
            }
        }
    }

    fn timed_out(&self, unready: Vec<GroupVersion>) -> ExtractorError {
        ExtractorError::ReadinessTimeout {
            timeout: self.timeout,
            unready,
        }
    }
}

fn join(gvs: &[GroupVersion]) -> String {
    gvs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::client::fake::FakeDiscovery;
    use async_trait::async_trait;

    fn compute() -> GroupVersion {
        GroupVersion::new("compute.example.com", "v1alpha1")
    }

    fn storage() -> GroupVersion {
        GroupVersion::new("storage.example.com", "v1alpha1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_ready_within_rounds() {
        let fake = Arc::new(
            FakeDiscovery::default()
                .ready_after(&compute().openapi_v3_path(), 2)
                .ready_after(&storage().openapi_v3_path(), 1),
        );
        let poller = ReadinessPoller::new(fake.clone(), Duration::from_secs(30));

        let report = poller
            .wait(&[compute(), storage()], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.pending_per_round, vec![2, 1, 0]);
        assert_eq!(report.elapsed, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_set_never_grows() {
        let fake = Arc::new(
            FakeDiscovery::default()
                .ready_after(&compute().openapi_v3_path(), 4)
                .ready_after(&storage().openapi_v3_path(), 0),
        );
        let poller = ReadinessPoller::new(fake, Duration::from_secs(30));

        let report = poller
            .wait(&[compute(), storage()], &CancellationToken::new())
            .await
            .unwrap();

        assert!(report
            .pending_per_round
            .windows(2)
            .all(|pair| pair[1] <= pair[0]));
        assert_eq!(report.pending_per_round.last(), Some(&0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_group_versions_are_not_probed_again() {
        let fake = Arc::new(
            FakeDiscovery::default()
                .ready_after(&compute().openapi_v3_path(), 2)
                .ready_after(&storage().openapi_v3_path(), 0),
        );
        let poller = ReadinessPoller::new(fake.clone(), Duration::from_secs(30));

        poller
            .wait(&[compute(), storage()], &CancellationToken::new())
            .await
            .unwrap();

        let heads = fake.heads.lock().unwrap();
        let storage_probes = heads
            .iter()
            .filter(|p| **p == storage().openapi_v3_path())
            .count();
        assert_eq!(storage_probes, 1);
        assert_eq!(heads.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_exactly_unready() {
        let fake = Arc::new(FakeDiscovery::default().ready_after(&compute().openapi_v3_path(), 1));
        let poller = ReadinessPoller::new(fake, Duration::from_secs(5));

        let err = poller
            .wait(&[compute(), storage()], &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ExtractorError::ReadinessTimeout { timeout, unready } => {
                assert_eq!(timeout, Duration::from_secs(5));
                assert_eq!(unready, vec![storage()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_cancel_returns_before_first_round() {
        let fake = Arc::new(FakeDiscovery::default());
        let poller = ReadinessPoller::new(fake.clone(), Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = Instant::now();
        let err = poller.wait(&[compute()], &cancel).await.unwrap_err();

        assert!(matches!(err, ExtractorError::Cancelled));
        assert!(started.elapsed() < DEFAULT_POLL_INTERVAL);
        assert!(fake.heads.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_does_not_wait_for_timeout() {
        let fake = Arc::new(FakeDiscovery::default());
        let poller = ReadinessPoller::new(fake, Duration::from_secs(300));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = poller.wait(&[compute()], &cancel).await.unwrap_err();

        assert!(matches!(err, ExtractorError::Cancelled));
        assert!(started.elapsed() < Duration::from_millis(2500) + DEFAULT_POLL_INTERVAL);
    }

    /// A probe that never answers, standing in for a hung connection.
    struct HangingDiscovery;

    #[async_trait]
    impl DiscoveryClient for HangingDiscovery {
        async fn head(&self, _path: &str) -> Result<()> {
            std::future::pending().await
        }

        async fn get(&self, _path: &str) -> Result<Vec<u8>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_hung_round() {
        let poller = ReadinessPoller::new(Arc::new(HangingDiscovery), Duration::from_secs(5));

        let started = Instant::now();
        let err = poller
            .wait(&[compute(), storage()], &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(started.elapsed(), Duration::from_secs(5));
        match err {
            ExtractorError::ReadinessTimeout { unready, .. } => {
                assert_eq!(unready, vec![compute(), storage()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Answers every path except `stalled`, which never completes.
    struct StalledOn {
        stalled: String,
    }

    #[async_trait]
    impl DiscoveryClient for StalledOn {
        async fn head(&self, path: &str) -> Result<()> {
            if path == self.stalled {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn get(&self, _path: &str) -> Result<Vec<u8>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_mid_round_excludes_answered_group_versions() {
        let client = Arc::new(StalledOn {
            stalled: storage().openapi_v3_path(),
        });
        let poller = ReadinessPoller::new(client, Duration::from_secs(5));

        let started = Instant::now();
        let err = poller
            .wait(&[compute(), storage()], &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(started.elapsed(), Duration::from_secs(5));
        match err {
            ExtractorError::ReadinessTimeout { unready, .. } => {
                assert_eq!(unready, vec![storage()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_set_is_immediately_ready() {
        let poller =
            ReadinessPoller::new(Arc::new(FakeDiscovery::default()), Duration::from_secs(5));

        let report = poller.wait(&[], &CancellationToken::new()).await.unwrap();

        assert_eq!(report.rounds(), 1);
        assert_eq!(report.elapsed, Duration::ZERO);
    }
}
