// Property-based tests for trigger evaluation

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::artifact::FilesystemArtifactStore;
use common::config::SchedulerConfig;
use common::lock::{InMemoryTriggerLock, TriggerLock};
use common::models::{PipelineRun, RunStatus};
use common::pipeline::PipelineExecutor;
use common::schedule::{CronTrigger, ScheduleCursor};
use common::scheduler::{Scheduler, SchedulerEngine};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

/// Records every instant it is asked to run for
#[derive(Default)]
struct RecordingExecutor {
    instants: Mutex<Vec<DateTime<Utc>>>,
}

#[async_trait]
impl PipelineExecutor for RecordingExecutor {
    fn pipeline_name(&self) -> &str {
        "weekly-crypto-report"
    }

    async fn run_scheduled(&self, scheduled_for: DateTime<Utc>, expression: &str) -> PipelineRun {
        self.instants.lock().unwrap().push(scheduled_for);
        let mut run = PipelineRun::new_scheduled(self.pipeline_name(), scheduled_for, expression);
        run.status = RunStatus::Succeeded;
        run
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn weekly_expression() -> impl Strategy<Value = String> {
    (0u32..60, 0u32..24, 0u32..7).prop_map(|(m, h, d)| format!("{} {} * * {}", m, h, d))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Polled more often than the trigger matches, every instant fires exactly once, in order
    #[test]
    fn prop_cursor_fires_each_instant_once(
        expression in weekly_expression(),
        steps in prop::collection::vec(1i64..=3600, 1..600),
    ) {
        let trigger = CronTrigger::new(&expression, chrono_tz::UTC).unwrap();
        let mut cursor = ScheduleCursor::new(trigger.clone(), start());

        let mut now = start();
        let mut fired = Vec::new();
        for step in steps {
            now += Duration::seconds(step);
            if let Some(instant) = cursor.poll(now) {
                prop_assert!(instant <= now);
                fired.push(instant);
            }
        }

        let expected: Vec<_> = trigger
            .upcoming(start(), 16)
            .into_iter()
            .take_while(|instant| *instant <= now)
            .collect();
        prop_assert_eq!(fired, expected);
    }

    /// With arbitrary gaps and repeated polls, an instant never fires twice
    #[test]
    fn prop_cursor_never_refires(
        expression in weekly_expression(),
        steps in prop::collection::vec(-3600i64..=30 * 86_400, 1..50),
    ) {
        let trigger = CronTrigger::new(&expression, chrono_tz::UTC).unwrap();
        let mut cursor = ScheduleCursor::new(trigger.clone(), start());

        let mut now = start();
        let mut fired: Vec<DateTime<Utc>> = Vec::new();
        for step in steps {
            now += Duration::seconds(step);
            if let Some(instant) = cursor.poll(now) {
                prop_assert!(instant > start());
                prop_assert!(fired.last().map_or(true, |last| instant > *last));
                prop_assert_eq!(trigger.next_after(instant - Duration::seconds(1)), Some(instant));
                fired.push(instant);
            }
        }
    }

    /// Two engines sharing a claim table run each instant exactly once between them
    #[test]
    fn prop_engines_sharing_claims_run_once(
        steps in prop::collection::vec(1i64..=7200, 1..300),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (fired, expected) = runtime.block_on(async {
            let dir = tempfile::TempDir::new().unwrap();
            let lock: Arc<dyn TriggerLock> = Arc::new(InMemoryTriggerLock::new());
            let executor = Arc::new(RecordingExecutor::default());
            let trigger = CronTrigger::new("45 8 * * 4", chrono_tz::UTC).unwrap();

            let engine = || {
                SchedulerEngine::new(
                    SchedulerConfig {
                        poll_interval_seconds: 1,
                        claim_ttl_seconds: 3600,
                        prune_interval_hours: 24,
                    },
                    executor.clone(),
                    ScheduleCursor::new(trigger.clone(), start()),
                    lock.clone(),
                    Arc::new(FilesystemArtifactStore::new(dir.path())),
                    chrono_tz::Africa::Johannesburg,
                )
            };
            let first = engine();
            let second = engine();

            let mut now = start();
            for step in steps {
                now += Duration::seconds(step);
                let _ = tokio::join!(first.process_due(now), second.process_due(now));
            }

            let expected: Vec<_> = trigger
                .upcoming(start(), 16)
                .into_iter()
                .take_while(|instant| *instant <= now)
                .collect();
            let fired = executor.instants.lock().unwrap().clone();
            (fired, expected)
        });

        prop_assert_eq!(fired, expected);
    }
}

#[test]
fn test_weekly_trigger_fires_thursday_morning() {
    let trigger = CronTrigger::new("45 8 * * 4", chrono_tz::UTC).unwrap();
    let next = trigger.upcoming(start(), 2);
    assert_eq!(
        next,
        vec![
            Utc.with_ymd_and_hms(2024, 1, 4, 8, 45, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 11, 8, 45, 0).unwrap(),
        ]
    );
    assert_eq!(
        next[0]
            .with_timezone(&chrono_tz::Africa::Johannesburg)
            .format("%A %H:%M")
            .to_string(),
        "Thursday 10:45"
    );
}
