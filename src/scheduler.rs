//! Background sync scheduler: two fixed-interval jobs on plain tokio
//! timers, no external cron dependency.
//!
//! Each job runs on its own task, so a tick can never overlap a run of the
//! same job, and `MissedTickBehavior::Skip` collapses missed ticks into a
//! single run. Jobs are handed in once at startup as a typed pair.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::state::{SessionKey, SyncStatus};

pub const FULL_SYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const LIGHT_SYNC_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// The light job stands down when a full sync completed this recently.
pub const LIGHT_SKIP_WINDOW: Duration = Duration::from_secs(15 * 60);

pub type JobFuture =
    Pin<Box<dyn Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// The two sync callbacks, supplied once at startup.
#[derive(Clone)]
pub struct SyncJobs {
    pub full: JobFn,
    pub light: JobFn,
}

#[derive(Debug, PartialEq)]
pub enum TickOutcome {
    Ran,
    Failed,
    SkippedNoSession,
    SkippedRecentFullSync,
}

async fn run_full_tick(session: &SessionKey, job: &JobFn) -> TickOutcome {
    if session.get().await.is_none() {
        tracing::debug!("full sync skipped: no active session credentials");
        return TickOutcome::SkippedNoSession;
    }
    match job().await {
        Ok(()) => TickOutcome::Ran,
        Err(error) => {
            tracing::error!(%error, "full sync failed");
            TickOutcome::Failed
        }
    }
}

async fn run_light_tick(session: &SessionKey, sync: &SyncStatus, job: &JobFn) -> TickOutcome {
    if session.get().await.is_none() {
        tracing::debug!("light sync skipped: no active session credentials");
        return TickOutcome::SkippedNoSession;
    }
    if sync.full_sync_within(LIGHT_SKIP_WINDOW).await {
        tracing::debug!("light sync skipped: full sync completed recently");
        return TickOutcome::SkippedRecentFullSync;
    }
    match job().await {
        Ok(()) => TickOutcome::Ran,
        Err(error) => {
            tracing::error!(%error, "light sync failed");
            TickOutcome::Failed
        }
    }
}

pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the timers without waiting. A job already in flight finishes
    /// on its own task.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
        tracing::info!("background scheduler shutdown");
    }
}

/// Register both jobs and start ticking. Schedules live in memory only and
/// are reconstructed on every startup.
pub fn start(session: SessionKey, sync: SyncStatus, jobs: SyncJobs) -> SchedulerHandle {
    let full_task = {
        let session = session.clone();
        let job = jobs.full.clone();
        tokio::spawn(async move {
            let mut ticker =
                interval_at(Instant::now() + FULL_SYNC_INTERVAL, FULL_SYNC_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                run_full_tick(&session, &job).await;
            }
        })
    };

    let light_task = {
        let session = session.clone();
        let sync = sync.clone();
        let job = jobs.light.clone();
        tokio::spawn(async move {
            let mut ticker =
                interval_at(Instant::now() + LIGHT_SYNC_INTERVAL, LIGHT_SYNC_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                run_light_tick(&session, &sync, &job).await;
            }
        })
    };

    tracing::info!(
        full_minutes = FULL_SYNC_INTERVAL.as_secs() / 60,
        light_minutes = LIGHT_SYNC_INTERVAL.as_secs() / 60,
        "background scheduler started"
    );

    SchedulerHandle {
        tasks: vec![full_task, light_task],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: Arc<AtomicUsize>) -> JobFn {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn jobs_skip_without_session_credentials() {
        let session = SessionKey::default();
        let sync = SyncStatus::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let job = counting_job(runs.clone());

        assert_eq!(run_full_tick(&session, &job).await, TickOutcome::SkippedNoSession);
        assert_eq!(
            run_light_tick(&session, &sync, &job).await,
            TickOutcome::SkippedNoSession
        );
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn full_tick_runs_with_session() {
        let session = SessionKey::default();
        session.set("passphrase".into()).await;
        let runs = Arc::new(AtomicUsize::new(0));
        let job = counting_job(runs.clone());

        assert_eq!(run_full_tick(&session, &job).await, TickOutcome::Ran);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn light_tick_skips_after_recent_full_sync() {
        let session = SessionKey::default();
        session.set("passphrase".into()).await;
        let sync = SyncStatus::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let job = counting_job(runs.clone());

        assert_eq!(run_light_tick(&session, &sync, &job).await, TickOutcome::Ran);

        sync.mark_full_sync().await;
        assert_eq!(
            run_light_tick(&session, &sync, &job).await,
            TickOutcome::SkippedRecentFullSync
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_job_is_contained() {
        let session = SessionKey::default();
        session.set("passphrase".into()).await;
        let job: JobFn = Arc::new(|| Box::pin(async { Err("boom".into()) }));

        assert_eq!(run_full_tick(&session, &job).await, TickOutcome::Failed);
    }
}
