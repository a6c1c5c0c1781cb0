//! Single-process job queue.
//!
//! Jobs live in two ordered maps behind one mutex: a waiting map keyed by
//! eligibility time and a ready map keyed by (priority, sequence). Entries
//! carry a guard (the pending sequence for one-time and delayed jobs, the
//! schedule generation for repeating jobs) so entries invalidated by
//! `remove` or a replaced schedule are skipped instead of searched out.
//! State is lost when the process exits.

use crate::cron::CronSchedule;
use crate::error::QueueError;
use crate::job::{Job, JobData, JobId, JobKind, Priority, ScheduleOptions, eligible_at};
use crate::queue::{
    ClaimedJob, JobConsumer, JobOrigin, JobOutcome, JobQueue, MaintenanceReport, ReadyJob,
    Receipt,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

enum Waiting {
    Delayed { id: JobId, data: JobData, seq: u64 },
    Repeating { id: JobId, generation: u64 },
}

struct ReadySlot {
    job: ReadyJob,
    guard: u64,
}

struct RepeatingSchedule {
    options: ScheduleOptions,
    schedule: CronSchedule,
    data: JobData,
    generation: u64,
}

#[derive(Default)]
struct State {
    seq: u64,
    ready: BTreeMap<(Priority, u64), ReadySlot>,
    waiting: BTreeMap<(DateTime<Utc>, u64), Waiting>,
    pending: HashMap<JobId, u64>,
    schedules: HashMap<JobId, RepeatingSchedule>,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn push_ready(&mut self, job: ReadyJob, guard: u64) {
        let seq = self.next_seq();
        self.ready.insert((job.priority, seq), ReadySlot { job, guard });
    }

    fn is_live(&self, job: &ReadyJob, guard: u64) -> bool {
        match job.origin {
            JobOrigin::OneTime | JobOrigin::Delayed => self.pending.get(&job.id) == Some(&guard),
            JobOrigin::Repeating => {
                self.schedules.get(&job.id).map(|s| s.generation) == Some(guard)
            }
        }
    }

    fn promote_due(&mut self, now: DateTime<Utc>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        while let Some(entry) = self.waiting.first_entry() {
            if entry.key().0 > now {
                break;
            }
            match entry.remove() {
                Waiting::Delayed { id, data, seq } => {
                    if self.pending.get(&id) != Some(&seq) {
                        continue;
                    }
                    let job = ReadyJob {
                        id,
                        data,
                        origin: JobOrigin::Delayed,
                        priority: Priority::Medium,
                    };
                    self.push_ready(job, seq);
                    report.promoted += 1;
                }
                Waiting::Repeating { id, generation } => {
                    let Some(schedule) = self
                        .schedules
                        .get(&id)
                        .filter(|s| s.generation == generation)
                    else {
                        continue;
                    };
                    let data = schedule.data.clone();
                    let next = schedule.schedule.next_after(now);

                    match next {
                        Some(at) => {
                            let seq = self.next_seq();
                            self.waiting.insert(
                                (at, seq),
                                Waiting::Repeating {
                                    id: id.clone(),
                                    generation,
                                },
                            );
                        }
                        None => warn!(job_id = %id, "repeating schedule has no further occurrences"),
                    }

                    let job = ReadyJob {
                        id,
                        data,
                        origin: JobOrigin::Repeating,
                        priority: Priority::Medium,
                    };
                    self.push_ready(job, generation);
                    report.fired += 1;
                }
            }
        }

        report
    }
}

/// In-memory [`JobQueue`] and [`JobConsumer`].
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<State>,
}

impl MemoryJobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn add_at(&self, job: Job, now: DateTime<Utc>) -> Result<(), Report<QueueError>> {
        let mut state = self.state.lock().await;
        let Job { id, kind, data } = job;

        match kind {
            JobKind::OneTime { priority } => {
                if state.pending.contains_key(&id) {
                    debug!(job_id = %id, "job already pending, ignoring");
                    return Ok(());
                }
                let seq = state.next_seq();
                state.pending.insert(id.clone(), seq);
                let job = ReadyJob {
                    id,
                    data,
                    origin: JobOrigin::OneTime,
                    priority,
                };
                state.push_ready(job, seq);
            }
            JobKind::Delayed { delay_ms } => {
                if state.pending.contains_key(&id) {
                    debug!(job_id = %id, "job already pending, ignoring");
                    return Ok(());
                }
                let at = eligible_at(now, delay_ms);
                let seq = state.next_seq();
                state.pending.insert(id.clone(), seq);
                state.waiting.insert((at, seq), Waiting::Delayed { id, data, seq });
            }
            JobKind::Repeating { schedule_options } => {
                let schedule = CronSchedule::from_options(&schedule_options)?;
                let first = schedule.require_next_after(now)?;
                let generation = state.next_seq();
                let replaced = state
                    .schedules
                    .insert(
                        id.clone(),
                        RepeatingSchedule {
                            options: schedule_options,
                            schedule,
                            data,
                            generation,
                        },
                    )
                    .is_some();
                debug!(job_id = %id, replaced, next = %first, "repeating job scheduled");
                state
                    .waiting
                    .insert((first, generation), Waiting::Repeating { id, generation });
            }
        }

        Ok(())
    }

    pub(crate) async fn claim_at(&self, now: DateTime<Utc>) -> Option<ClaimedJob> {
        let mut state = self.state.lock().await;
        state.promote_due(now);

        while let Some((_, slot)) = state.ready.pop_first() {
            if !state.is_live(&slot.job, slot.guard) {
                continue;
            }
            if slot.job.origin != JobOrigin::Repeating {
                state.pending.remove(&slot.job.id);
            }
            return Some(ClaimedJob::new(
                slot.job,
                Receipt::Memory { guard: slot.guard },
            ));
        }
        None
    }

    pub(crate) async fn maintain_at(&self, now: DateTime<Utc>) -> MaintenanceReport {
        self.state.lock().await.promote_due(now)
    }

    /// Number of live repeating schedules.
    pub async fn repeating_count(&self) -> usize {
        self.state.lock().await.schedules.len()
    }

    /// Earliest time a waiting entry becomes due.
    pub(crate) async fn next_ready_at(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .waiting
            .first_key_value()
            .map(|((at, _), _)| *at)
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn add(&self, job: Job) -> Result<(), Report<QueueError>> {
        self.add_at(job, Utc::now()).await
    }

    async fn remove(&self, id: &JobId) -> Result<bool, Report<QueueError>> {
        let mut state = self.state.lock().await;
        let pending = state.pending.remove(id).is_some();
        let scheduled = state.schedules.remove(id).is_some();
        Ok(pending || scheduled)
    }

    async fn schedule_options(
        &self,
        id: &JobId,
    ) -> Result<Option<ScheduleOptions>, Report<QueueError>> {
        let state = self.state.lock().await;
        Ok(state.schedules.get(id).map(|s| s.options.clone()))
    }
}

#[async_trait]
impl JobConsumer for MemoryJobQueue {
    async fn next_ready(&self) -> Result<Option<ClaimedJob>, Report<QueueError>> {
        Ok(self.claim_at(Utc::now()).await)
    }

    async fn complete(
        &self,
        claim: ClaimedJob,
        outcome: JobOutcome,
    ) -> Result<(), Report<QueueError>> {
        let Receipt::Memory { guard } = claim.receipt else {
            return Err(QueueError::ConsumeFailed {
                reason: format!("job {} was not claimed from the in-memory queue", claim.job().id),
            }
            .into());
        };

        let job = claim.job();
        if job.origin != JobOrigin::Repeating {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        if let Some(schedule) = state
            .schedules
            .get_mut(&job.id)
            .filter(|s| s.generation == guard)
        {
            match outcome {
                JobOutcome::Succeeded => schedule.options.failure_count = 0,
                JobOutcome::Failed => {
                    schedule.options.failure_count = schedule.options.failure_count.saturating_add(1);
                }
            }
            debug!(
                job_id = %job.id,
                failure_count = schedule.options.failure_count,
                "repeating job completed"
            );
        }
        Ok(())
    }

    async fn maintain(&self) -> Result<MaintenanceReport, Report<QueueError>> {
        Ok(self.maintain_at(Utc::now()).await)
    }
}
