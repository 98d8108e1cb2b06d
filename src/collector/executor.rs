use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use tokio::runtime::Handle;

use crate::collector::cadence::Job;
use crate::metrics::METRICS;
use crate::plugins::contract::Collector;

/// Launches `job` as an independent task and returns immediately.
///
/// The join handle is dropped on the spot:
/// - no completion notification
/// - no cancellation
/// - a panic or error inside `job` stays inside the task
///
/// ERRORS:
/// - Only when called outside a tokio runtime
pub fn run_threaded<F>(job: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = Handle::try_current()
        .context("no async runtime available to launch a detached job")?;
    handle.spawn(job);
    Ok(())
}

/// Builds the cadence job for a collector.
///
/// Every invocation launches one detached `collector.job()`. Nothing
/// stops a second launch while a previous one is still running; the
/// collector body has to tolerate that.
///
/// A failing job body is logged with the collector name and counted,
/// never reported back to the dispatcher.
pub fn detached<C>(collector: Arc<C>) -> Job
where
    C: Collector + ?Sized,
{
    Arc::new(move || {
        let collector = Arc::clone(&collector);
        run_threaded(async move {
            METRICS.jobs_launched.fetch_add(1, Ordering::Relaxed);
            log::debug!("job started for {}", collector.name());

            match collector.job().await {
                Ok(()) => {
                    METRICS.jobs_completed.fetch_add(1, Ordering::Relaxed);
                    log::debug!("job finished for {}", collector.name());
                }
                Err(e) => {
                    METRICS.jobs_failed.fetch_add(1, Ordering::Relaxed);
                    log::error!("job failed for {}: {:#}", collector.name(), e);
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::oneshot;

    #[test]
    fn fails_without_runtime() {
        let err = run_threaded(async {}).unwrap_err();
        assert!(err.to_string().contains("no async runtime"));
    }

    #[tokio::test]
    async fn returns_before_job_completes() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        run_threaded(async move {
            let _ = release_rx.await;
            flag.store(true, Ordering::SeqCst);
            let _ = done_tx.send(());
        })
        .unwrap();

        // launch returned while the job is still parked
        assert!(!finished.load(Ordering::SeqCst));

        release_tx.send(()).unwrap();
        done_rx.await.unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_job_does_not_reach_caller() {
        run_threaded(async { panic!("collector blew up") }).unwrap();
        tokio::task::yield_now().await;

        // caller keeps working
        run_threaded(async {}).unwrap();
    }
}
