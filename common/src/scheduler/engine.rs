// Scheduler engine: fires the pipeline when its cron trigger comes due

use crate::artifact::ArtifactStore;
use crate::config::SchedulerConfig;
use crate::lock::{schedule_resource, TriggerLock};
use crate::models::PipelineRun;
use crate::pipeline::PipelineExecutor;
use crate::schedule::ScheduleCursor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Scheduler trait for trigger evaluation
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run the polling loop until stopped
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Signal the polling loop to stop once the current run, if any, finishes
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Fire the pipeline if a trigger instant came due at or before `now`
    async fn process_due(&self, now: DateTime<Utc>) -> Option<PipelineRun>;
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    config: SchedulerConfig,
    executor: Arc<dyn PipelineExecutor>,
    cursor: Mutex<ScheduleCursor>,
    lock: Arc<dyn TriggerLock>,
    artifacts: Arc<dyn ArtifactStore>,
    display_timezone: Tz,
    /// Latched, so a stop issued before `start` still ends the loop
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        executor: Arc<dyn PipelineExecutor>,
        cursor: ScheduleCursor,
        lock: Arc<dyn TriggerLock>,
        artifacts: Arc<dyn ArtifactStore>,
        display_timezone: Tz,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        Self {
            config,
            executor,
            cursor: Mutex::new(cursor),
            lock,
            artifacts,
            display_timezone,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver; its value turns true once stopped
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Next instant the pipeline will fire for
    pub async fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.cursor.lock().await.next_fire()
    }

    /// Remove artifacts past their retention
    #[instrument(skip(self))]
    pub async fn prune_artifacts(&self) -> usize {
        match self.artifacts.prune_expired(Utc::now()).await {
            Ok(0) => {
                debug!("No expired artifacts");
                0
            }
            Ok(count) => {
                info!(pruned = count, "Expired artifacts pruned");
                count
            }
            Err(e) => {
                warn!(error = %e, "Artifact pruning failed");
                0
            }
        }
    }

    async fn log_next_fire(&self) {
        match self.next_fire().await {
            Some(next) => info!(
                pipeline = self.executor.pipeline_name(),
                next_fire_utc = %next,
                next_fire_local = %next.with_timezone(&self.display_timezone),
                "Next scheduled run"
            ),
            None => warn!(
                pipeline = self.executor.pipeline_name(),
                "Trigger has no upcoming instants"
            ),
        }
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self), fields(pipeline = self.executor.pipeline_name()))]
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut shutdown_rx = self.shutdown_receiver();
        if *shutdown_rx.borrow_and_update() {
            info!("Scheduler was stopped before it started");
            return Ok(());
        }

        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            prune_interval_hours = self.config.prune_interval_hours,
            "Starting scheduler engine"
        );
        self.log_next_fire().await;

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_seconds));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut prune_interval =
            interval(Duration::from_secs(self.config.prune_interval_hours * 3600));
        prune_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // A run in progress is awaited inside its branch, so shutdown
            // is only observed between runs
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Some(run) = self.process_due(Utc::now()).await {
                        info!(
                            run_id = %run.id,
                            status = run.status.as_str(),
                            "Scheduled run finished"
                        );
                        self.log_next_fire().await;
                    }
                }
                _ = prune_interval.tick() => {
                    self.prune_artifacts().await;
                }
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Scheduler engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Stopping scheduler engine");
        if self.shutdown_tx.send_replace(true) {
            debug!("Scheduler was already stopped");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn process_due(&self, now: DateTime<Utc>) -> Option<PipelineRun> {
        let (due, expression) = {
            let mut cursor = self.cursor.lock().await;
            (cursor.poll(now), cursor.trigger().expression().to_string())
        };

        let Some(instant) = due else {
            debug!("No trigger instant due");
            return None;
        };

        let resource = schedule_resource(self.executor.pipeline_name(), instant);
        let ttl = Duration::from_secs(self.config.claim_ttl_seconds);
        if !self.lock.claim(&resource, ttl).await {
            debug!(scheduled_for = %instant, "Instant already claimed, skipping");
            return None;
        }

        info!(
            scheduled_for = %instant,
            scheduled_for_local = %instant.with_timezone(&self.display_timezone),
            "Trigger fired"
        );

        let run = self.executor.run_scheduled(instant, &expression).await;
        if run.error.is_some() {
            error!(run_id = %run.id, "Scheduled run failed");
        }
        Some(run)
    }
}
