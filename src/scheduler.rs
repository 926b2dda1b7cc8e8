use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing::{error, info, warn};

/// A job that fails this many times in a row is considered structurally
/// broken and stops running until the process is restarted.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Which periodic jobs have self-terminated. Read by the health endpoint.
#[derive(Clone, Default)]
pub struct JobHealth {
    dead_jobs: Arc<RwLock<Vec<&'static str>>>,
}

impl JobHealth {
    pub fn mark_dead(&self, name: &'static str) {
        if let Ok(mut dead) = self.dead_jobs.write()
            && !dead.contains(&name)
        {
            dead.push(name);
        }
    }

    pub fn dead_jobs(&self) -> Vec<&'static str> {
        self.dead_jobs.read().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn is_healthy(&self) -> bool {
        self.dead_jobs.read().map(|d| d.is_empty()).unwrap_or(false)
    }
}

/// Drives the periodic jobs: each runs on its own cadence, never overlaps
/// itself, and stops cleanly on shutdown.
pub struct Scheduler {
    cancel: CancellationToken,
    health: JobHealth,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            health: JobHealth::default(),
            handles: Vec::new(),
        }
    }

    pub fn health(&self) -> JobHealth {
        self.health.clone()
    }

    /// Spawn a periodic job. The job body runs to completion before the next
    /// tick is considered; a due tick that finds the previous run still in
    /// progress is skipped with a warning. Repeated failures stop the job.
    pub fn spawn_job<F, Fut>(&mut self, name: &'static str, period: Duration, job: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let cancel = self.cancel.clone();
        let health = self.health.clone();

        let handle = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let mut consecutive_failures = 0u32;

                info!("Job {} started (period {:?})", name, period);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Job {} stopping on shutdown signal", name);
                            break;
                        }
                        _ = interval.tick() => {}
                    }

                    let started = std::time::Instant::now();
                    match job(cancel.clone()).await {
                        Ok(()) => {
                            consecutive_failures = 0;
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            error!(
                                "Job {} failed ({} consecutive): {:#}",
                                name, consecutive_failures, e
                            );
                            metrics::counter!("scheduler.job_failures", "job" => name)
                                .increment(1);
                            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                                error!(
                                    "Job {} failed {} times in a row; stopping until restart",
                                    name, consecutive_failures
                                );
                                health.mark_dead(name);
                                break;
                            }
                        }
                    }

                    let elapsed = started.elapsed();
                    if elapsed > period {
                        warn!(
                            "Job {} ran for {:.1}s, past its {:.0}s period; due ticks were skipped",
                            name,
                            elapsed.as_secs_f64(),
                            period.as_secs_f64()
                        );
                        metrics::counter!("scheduler.ticks_skipped", "job" => name).increment(1);
                    }
                }
            }
            .instrument(tracing::info_span!("job", job_name = name)),
        );

        self.handles.push((name, handle));
    }

    /// Signal every job to stop, then wait up to the grace period for each
    /// to finish its current run. Jobs still running after the grace period
    /// are aborted.
    pub async fn shutdown(self, grace: Duration) {
        info!("Scheduler shutting down ({} jobs, grace {:?})", self.handles.len(), grace);
        self.cancel.cancel();

        for (name, handle) in self.handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => info!("Job {} stopped cleanly", name),
                Ok(Err(e)) => warn!("Job {} panicked during shutdown: {}", name, e),
                Err(_) => {
                    warn!("Job {} did not stop within the grace period, aborting", name);
                    abort.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_on_cadence_and_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let mut scheduler = Scheduler::new(cancel.clone());
        let runs = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&runs);
        scheduler.spawn_job("counter", Duration::from_secs(60), move |_| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(181)).await;
        assert!(runs.load(Ordering::SeqCst) >= 3);

        scheduler.shutdown(Duration::from_secs(5)).await;
        let after_shutdown = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_kill_the_job() {
        let cancel = CancellationToken::new();
        let mut scheduler = Scheduler::new(cancel.clone());
        let health = scheduler.health();

        scheduler.spawn_job("broken", Duration::from_secs(10), move |_| async move {
            anyhow::bail!("always fails")
        });

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(!health.is_healthy());
        assert_eq!(health.dead_jobs(), vec!["broken"]);

        scheduler.shutdown(Duration::from_secs(5)).await;
    }

    #[test]
    fn test_job_health_default_is_healthy() {
        let health = JobHealth::default();
        assert!(health.is_healthy());
        assert!(health.dead_jobs().is_empty());
    }
}
