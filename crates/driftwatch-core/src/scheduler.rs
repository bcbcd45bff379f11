//! Daily timer loop around a shared [`SuiteRunner`].

use crate::config::settings::OperatorSettings;
use crate::engine::SuiteRunner;
use crate::model::SuiteRun;
use crate::storage::RunRepository;
use chrono::{DateTime, Duration as ChronoDuration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// How long to wait before re-reading settings when no schedule times are set.
const IDLE_RECHECK: Duration = Duration::from_secs(3600);

pub struct Scheduler {
    runner: Arc<SuiteRunner>,
    store: Arc<dyn RunRepository>,
}

impl Scheduler {
    pub fn new(runner: Arc<SuiteRunner>, store: Arc<dyn RunRepository>) -> Self {
        Self { runner, store }
    }

    /// Manual trigger. Waits for any in-flight run to finish first.
    pub async fn run_now(&self) -> anyhow::Result<SuiteRun> {
        self.runner.run_suite().await
    }

    /// Manual trigger that yields to `shutdown`. `None` means the run was
    /// abandoned before anything was persisted.
    pub async fn run_now_until(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Option<anyhow::Result<SuiteRun>> {
        tokio::select! {
            res = self.runner.run_suite() => Some(res),
            _ = shutdown.recv() => {
                tracing::warn!("manual run interrupted by shutdown");
                self.runner.release_run_lock().await;
                None
            }
        }
    }

    /// Runs until `shutdown` fires. Suite failures are logged and the loop continues.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("scheduler started");
        loop {
            let settings = match OperatorSettings::load(self.store.as_ref()).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to load settings; using defaults");
                    OperatorSettings::default()
                }
            };

            let now = Utc::now();
            let next = match next_fire(now, &settings.schedule_times, settings.timezone) {
                Some(next) => next,
                None => {
                    tracing::warn!("no schedule_times configured");
                    tokio::select! {
                        _ = tokio::time::sleep(IDLE_RECHECK) => {}
                        _ = shutdown.recv() => {
                            tracing::info!("scheduler shutting down");
                            break;
                        }
                    }
                    continue;
                }
            };
            tracing::info!(
                next_run = %next.to_rfc3339(),
                timezone = settings.timezone.name(),
                "next scheduled run"
            );
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => {
                    tracing::info!("scheduler shutting down");
                    break;
                }
            }

            tokio::select! {
                res = self.runner.run_suite() => match res {
                    Ok(run) => tracing::info!(
                        run_id = run.id,
                        status = %run.status,
                        "scheduled run complete"
                    ),
                    Err(e) => tracing::error!(error = %e, "scheduled run failed"),
                },
                _ = shutdown.recv() => {
                    tracing::warn!("scheduler interrupted during a run");
                    self.runner.release_run_lock().await;
                    break;
                }
            }
        }
    }
}

/// Next instant strictly after `now` at which any of `times` occurs in `tz`.
///
/// A local time skipped by a DST jump fires at the first valid instant after
/// the gap; a repeated local time fires at its earlier occurrence.
pub fn next_fire(now: DateTime<Utc>, times: &[NaiveTime], tz: Tz) -> Option<DateTime<Utc>> {
    let today = now.with_timezone(&tz).date_naive();
    let mut best: Option<DateTime<Utc>> = None;
    for offset in 0..=2 {
        let date = today + ChronoDuration::days(offset);
        for t in times {
            let Some(candidate) = resolve_local(tz, date.and_time(*t)) else {
                continue;
            };
            if candidate > now && best.map_or(true, |b| candidate < b) {
                best = Some(candidate);
            }
        }
        if best.is_some() {
            break;
        }
    }
    best
}

fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    let mut probe = local;
    // Real-world gaps are at most a couple of hours.
    for _ in 0..(24 * 60) {
        match tz.from_local_datetime(&probe) {
            LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest.with_timezone(&Utc)),
            LocalResult::None => probe += ChronoDuration::minutes(1),
        }
    }
    None
}
