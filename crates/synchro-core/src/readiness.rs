//! System-wide readiness derived from per-job statuses.
//!
//! Every synchronizer owns one job name and reports its status here; health
//! probes only read. Once the process has been up longer than the grace
//! timeout the overall state is forced to `Ready` so one stuck job cannot
//! keep the probe red forever.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Status of one named job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
}

/// Overall readiness exposed to health probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Ready,
    Running,
    NotReady,
}

impl ReadinessState {
    /// Derive the overall state from job statuses: any failure wins, then any
    /// running job; otherwise (including no jobs at all) ready.
    pub fn derive<'a, I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = &'a JobStatus>,
    {
        let mut any_running = false;
        for status in statuses {
            match status {
                JobStatus::Failed => return ReadinessState::NotReady,
                JobStatus::Running => any_running = true,
                JobStatus::Succeeded => {}
            }
        }
        if any_running {
            ReadinessState::Running
        } else {
            ReadinessState::Ready
        }
    }
}

impl std::fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReadinessState::Ready => "ready",
            ReadinessState::Running => "running",
            ReadinessState::NotReady => "not_ready",
        };
        f.write_str(s)
    }
}

/// Health payload served to orchestration probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: ReadinessState,
    /// True when `status` was forced to ready by the grace timeout.
    pub forced: bool,
    pub uptime_secs: u64,
    pub jobs: BTreeMap<String, JobStatus>,
}

/// Mutex-guarded job status map plus the uptime clock.
#[derive(Debug)]
pub struct ReadinessAggregator {
    jobs: RwLock<HashMap<String, JobStatus>>,
    started: Instant,
    grace: Duration,
    forced_logged: AtomicBool,
}

impl ReadinessAggregator {
    /// Start the uptime clock now.
    pub fn new(grace: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            started: Instant::now(),
            grace,
            forced_logged: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the status of `job`. Called by synchronizers only.
    pub fn set_status(&self, job: impl Into<String>, status: JobStatus) {
        let job = job.into();
        debug!(event = "readiness.job_status", job = %job, status = ?status);
        self.write().insert(job, status);
    }

    /// Forget `job`, returning its last status. Used when a job is renamed.
    pub fn remove_job(&self, job: &str) -> Option<JobStatus> {
        self.write().remove(job)
    }

    pub fn job_status(&self, job: &str) -> Option<JobStatus> {
        self.read().get(job).copied()
    }

    /// Consistent copy of every job's status.
    pub fn snapshot(&self) -> BTreeMap<String, JobStatus> {
        self.read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Overall readiness, with the grace rule applied.
    pub fn status(&self) -> ReadinessState {
        self.report().status
    }

    /// Overall readiness plus the data it was derived from.
    pub fn report(&self) -> HealthReport {
        let jobs = self.snapshot();
        let derived = ReadinessState::derive(jobs.values());
        let uptime = self.uptime();
        let forced = derived != ReadinessState::Ready && uptime >= self.grace;

        if forced {
            if !self.forced_logged.swap(true, Ordering::Relaxed) {
                let stuck: Vec<&String> = jobs
                    .iter()
                    .filter(|(_, s)| **s != JobStatus::Succeeded)
                    .map(|(name, _)| name)
                    .collect();
                warn!(
                    event = "readiness.forced",
                    derived = %derived,
                    grace_secs = self.grace.as_secs(),
                    jobs = ?stuck,
                    "grace timeout elapsed, reporting ready despite job state",
                );
            }
        } else {
            self.forced_logged.store(false, Ordering::Relaxed);
        }

        HealthReport {
            status: if forced { ReadinessState::Ready } else { derived },
            forced,
            uptime_secs: uptime.as_secs(),
            jobs,
        }
    }
}
