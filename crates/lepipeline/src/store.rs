//! Bounded in-memory job store
//!
//! Capacity eviction (oldest first) runs synchronously on insert; TTL eviction
//! runs on a background sweeper owned by the store.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::ProgressBroadcaster;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::job::{JobId, JobRecord, WebhookEvent};
use crate::sync::{lock, read, write};

/// Shared, cloneable handle to the job store
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    jobs: RwLock<Jobs>,
    max_jobs: usize,
    ttl: chrono::Duration,
    sweep_interval: Duration,
    webhook_cap: usize,
    broadcaster: ProgressBroadcaster,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Default)]
struct Jobs {
    by_id: HashMap<JobId, Arc<JobSlot>>,
    /// Sorted by creation time, oldest first; ties keep insertion order
    order: VecDeque<(DateTime<Utc>, JobId)>,
}

impl Jobs {
    fn insert(&mut self, job_id: JobId, slot: Arc<JobSlot>) {
        let created_at = slot.created_at;
        let at = self.order.partition_point(|(t, _)| *t <= created_at);
        self.order.insert(at, (created_at, job_id.clone()));
        self.by_id.insert(job_id, slot);
    }

    fn remove(&mut self, job_id: &JobId) -> bool {
        if self.by_id.remove(job_id).is_none() {
            return false;
        }
        self.order.retain(|(_, id)| id != job_id);
        true
    }
}

struct JobSlot {
    created_at: DateTime<Utc>,
    record: Mutex<JobRecord>,
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

/// Exclusive right to run a job; released on drop
#[derive(Debug)]
pub struct RunGuard {
    job_id: JobId,
    _guard: OwnedMutexGuard<()>,
}

impl RunGuard {
    /// Job this guard belongs to
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

impl JobStore {
    /// Create an empty store. The TTL sweeper is not running until
    /// [`JobStore::start_sweeper`] is called.
    pub fn new(config: &OrchestratorConfig, broadcaster: ProgressBroadcaster) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                jobs: RwLock::new(Jobs::default()),
                max_jobs: config.max_jobs,
                ttl: config.job_ttl(),
                sweep_interval: config.sweep_interval(),
                webhook_cap: config.webhook_event_cap,
                broadcaster,
                shutdown: CancellationToken::new(),
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Broadcaster eviction is reported to
    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.inner.broadcaster
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.inner.max_jobs
    }

    /// Insert a new `PENDING` job, evicting the oldest ones if the store is full
    pub fn create(&self, target: impl Into<String>, analysis_type: impl Into<String>) -> Result<JobId> {
        self.create_at(target, analysis_type, Utc::now())
    }

    /// [`JobStore::create`] with an explicit creation time
    pub fn create_at(
        &self,
        target: impl Into<String>,
        analysis_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<JobId> {
        let capacity = self.inner.max_jobs;
        if capacity == 0 {
            return Err(OrchestratorError::CapacityExceeded { capacity });
        }

        let job_id = JobId::new();
        let slot = Arc::new(JobSlot {
            created_at: now,
            record: Mutex::new(JobRecord::new(job_id.clone(), target, analysis_type, now)),
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
        });

        let mut evicted = Vec::new();
        let total = {
            let mut jobs = write(&self.inner.jobs);
            while jobs.by_id.len() >= capacity {
                let Some((_, oldest)) = jobs.order.pop_front() else {
                    break;
                };
                if jobs.by_id.remove(&oldest).is_some() {
                    evicted.push(oldest);
                }
            }
            if jobs.by_id.len() >= capacity {
                return Err(OrchestratorError::CapacityExceeded { capacity });
            }
            jobs.insert(job_id.clone(), slot);
            jobs.by_id.len()
        };

        for id in &evicted {
            self.inner.broadcaster.remove(id);
            info!(job_id = %id, capacity, "evicted oldest job to stay within capacity");
        }
        debug!(%job_id, total, "created job");
        Ok(job_id)
    }

    /// Snapshot of a job
    pub fn get(&self, job_id: &JobId) -> Result<JobRecord> {
        let jobs = read(&self.inner.jobs);
        let slot = jobs
            .by_id
            .get(job_id)
            .ok_or_else(|| OrchestratorError::NotFound(job_id.clone()))?;
        let record = lock(&slot.record).clone();
        Ok(record)
    }

    /// Mutate a job under its record lock.
    ///
    /// The structural lock is held shared for the duration, so the job cannot
    /// be evicted halfway through a mutation.
    pub fn update<F, T>(&self, job_id: &JobId, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut JobRecord) -> T,
    {
        let jobs = read(&self.inner.jobs);
        let slot = jobs
            .by_id
            .get(job_id)
            .ok_or_else(|| OrchestratorError::NotFound(job_id.clone()))?;
        let mut record = lock(&slot.record);
        Ok(mutate(&mut record))
    }

    /// Take the execution lock of a job without waiting
    pub fn try_lock_run(&self, job_id: &JobId) -> Result<RunGuard> {
        let run_lock = {
            let jobs = read(&self.inner.jobs);
            let slot = jobs
                .by_id
                .get(job_id)
                .ok_or_else(|| OrchestratorError::NotFound(job_id.clone()))?;
            Arc::clone(&slot.run_lock)
        };

        let guard = run_lock
            .try_lock_owned()
            .map_err(|_| OrchestratorError::AlreadyRunning(job_id.clone()))?;
        Ok(RunGuard {
            job_id: job_id.clone(),
            _guard: guard,
        })
    }

    /// Remove a job; its subscribers are closed
    pub fn remove(&self, job_id: &JobId) -> bool {
        let removed = write(&self.inner.jobs).remove(job_id);
        if removed {
            self.inner.broadcaster.remove(job_id);
            debug!(%job_id, "removed job");
        }
        removed
    }

    /// Whether a job is present
    pub fn contains(&self, job_id: &JobId) -> bool {
        read(&self.inner.jobs).by_id.contains_key(job_id)
    }

    /// Jobs currently held
    pub fn len(&self) -> usize {
        read(&self.inner.jobs).by_id.len()
    }

    /// True when no job is held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers of all held jobs, oldest first
    pub fn job_ids(&self) -> Vec<JobId> {
        read(&self.inner.jobs).order.iter().map(|(_, id)| id.clone()).collect()
    }

    /// Remove every job older than the TTL
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    /// Remove every job created more than one TTL before `now`
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = now.checked_sub_signed(self.inner.ttl) else {
            return 0;
        };

        let expired: Vec<JobId> = {
            let mut jobs = write(&self.inner.jobs);
            let expired: Vec<JobId> = jobs
                .by_id
                .iter()
                .filter(|(_, slot)| slot.created_at < cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                jobs.remove(id);
            }
            expired
        };

        for id in &expired {
            self.inner.broadcaster.remove(id);
        }
        if !expired.is_empty() {
            info!(swept = expired.len(), remaining = self.len(), "expired jobs swept");
        }
        expired.len()
    }

    /// Append a webhook payload to a job's bounded event log.
    ///
    /// Returns the number of events retained. The stage is never touched.
    pub fn record_webhook_event(&self, job_id: &JobId, payload: Value) -> Result<usize> {
        let cap = self.inner.webhook_cap;
        self.update(job_id, |job| {
            job.push_webhook_event(
                WebhookEvent {
                    payload,
                    received_at: Utc::now(),
                },
                cap,
            );
            job.webhook_events.len()
        })
    }

    /// Webhook events of a job, oldest first
    pub fn webhook_events(&self, job_id: &JobId) -> Result<Vec<WebhookEvent>> {
        let jobs = read(&self.inner.jobs);
        let slot = jobs
            .by_id
            .get(job_id)
            .ok_or_else(|| OrchestratorError::NotFound(job_id.clone()))?;
        let events = lock(&slot.record).webhook_events.iter().cloned().collect();
        Ok(events)
    }

    /// Spawn the periodic TTL sweep on the current tokio runtime.
    ///
    /// Does nothing outside a runtime or if the sweeper is already running.
    pub fn start_sweeper(&self) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime, TTL sweeper not started");
            return false;
        };

        let mut sweeper = lock(&self.inner.sweeper);
        if sweeper.is_some() {
            return false;
        }

        let store = Arc::downgrade(&self.inner);
        let token = self.inner.shutdown.clone();
        let period = self.inner.sweep_interval;
        *sweeper = Some(runtime.spawn(sweep_loop(store, token, period)));
        debug!(interval_secs = period.as_secs(), "TTL sweeper started");
        true
    }

    /// Stop the sweeper and wait for it to exit
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = lock(&self.inner.sweeper).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("TTL sweeper ended abnormally: {}", e);
            }
        }
        info!(jobs = self.len(), "job store shut down");
    }
}

async fn sweep_loop(store: Weak<StoreInner>, token: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = store.upgrade() else {
                    break;
                };
                JobStore { inner }.sweep_expired();
            }
        }
    }
    debug!("TTL sweeper stopped");
}
