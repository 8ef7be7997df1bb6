// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job registry: the single owner of job records.
//!
//! Each record sits behind its own mutex. The id map is behind a read-write
//! lock that is only held long enough to find or insert a record, so work on
//! one job never blocks another.

use crate::error::EngineError;
use outpost_core::{Clock, Job, JobFilter, JobId, JobState, TransitionDetails};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

type Record = Arc<Mutex<Job>>;

pub struct JobRegistry<C: Clock> {
    jobs: RwLock<HashMap<JobId, Record>>,
    clock: C,
}

impl<C: Clock> JobRegistry<C> {
    pub fn new(clock: C) -> Self {
        Self { jobs: RwLock::new(HashMap::new()), clock }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn record(&self, id: &JobId) -> Result<Record, EngineError> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))
    }

    pub fn create(&self, job: Job) -> Result<JobId, EngineError> {
        let id = job.id.clone();
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&id) {
            return Err(EngineError::DuplicateId(id));
        }
        jobs.insert(id.clone(), Arc::new(Mutex::new(job)));
        Ok(id)
    }

    pub fn get(&self, id: &JobId) -> Result<Job, EngineError> {
        Ok(self.record(id)?.lock().clone())
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.read().contains_key(id)
    }

    /// Compare-and-transition: move `id` from `expected` to `next`.
    pub fn transition(
        &self,
        id: &JobId,
        expected: JobState,
        next: JobState,
        details: TransitionDetails,
    ) -> Result<Job, EngineError> {
        let record = self.record(id)?;
        let mut job = record.lock();
        check_expected(&job, expected)?;
        job.apply_transition(next, details, self.clock.epoch_ms())?;
        tracing::debug!(job_id = %id, from = %expected, to = %next, "job transition");
        Ok(job.clone())
    }

    /// Mutate non-lifecycle fields under the same expected-state guard.
    pub fn update(
        &self,
        id: &JobId,
        expected: JobState,
        f: impl FnOnce(&mut Job),
    ) -> Result<Job, EngineError> {
        let record = self.record(id)?;
        let mut job = record.lock();
        check_expected(&job, expected)?;
        let state = job.state;
        f(&mut job);
        // Lifecycle changes go through `transition` only
        job.state = state;
        Ok(job.clone())
    }

    /// Jobs matching `filter`, oldest first, as of the moment of the call.
    pub fn list(&self, filter: &JobFilter) -> impl Iterator<Item = Job> + Send + 'static {
        let records: Vec<Record> = self.jobs.read().values().cloned().collect();
        let mut jobs: Vec<Job> = records
            .iter()
            .filter_map(|r| {
                let job = r.lock();
                filter.matches(&job).then(|| job.clone())
            })
            .collect();
        jobs.sort_by(|a, b| (a.created_at_ms, &a.id).cmp(&(b.created_at_ms, &b.id)));
        jobs.into_iter()
    }

    pub fn count(&self, filter: &JobFilter) -> usize {
        let records: Vec<Record> = self.jobs.read().values().cloned().collect();
        records.iter().filter(|r| filter.matches(&r.lock())).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, id: &JobId) -> Option<Job> {
        let record = self.jobs.write().remove(id)?;
        let job = record.lock().clone();
        Some(job)
    }

    /// Mark a job whose cleanup gave up; it stays in the registry.
    pub fn flag_for_intervention(&self, id: &JobId, reason: impl Into<String>) -> Result<(), EngineError> {
        let record = self.record(id)?;
        record.lock().needs_intervention = Some(reason.into());
        Ok(())
    }
}

fn check_expected(job: &Job, expected: JobState) -> Result<(), EngineError> {
    if job.state == expected {
        return Ok(());
    }
    if job.state.is_terminal() {
        return Err(EngineError::AlreadyTerminal { id: job.id.clone(), state: job.state });
    }
    Err(EngineError::StaleState { id: job.id.clone(), expected, actual: job.state })
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
