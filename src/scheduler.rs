use crate::people::{Attribute, People};
use anyhow::{Result, bail};
use std::collections::BTreeMap;

/// Attribute overrides for a set of agents, applied on a future day.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    inds: Vec<usize>,
    updates: Vec<(Attribute, Vec<f64>)>,
}

impl ScheduledJob {
    pub fn new(inds: Vec<usize>) -> Self {
        Self {
            inds,
            updates: Vec::new(),
        }
    }

    /// Overwrite `attr` with `vals`, one value per agent in the same order as the indices.
    pub fn with(mut self, attr: Attribute, vals: Vec<f64>) -> Result<Self> {
        if vals.len() != self.inds.len() {
            bail!(
                "job has {} agents but {} values for {attr:?}",
                self.inds.len(),
                vals.len()
            );
        }
        self.updates.push((attr, vals));
        Ok(self)
    }

    fn apply(&self, people: &mut People) {
        for (attr, vals) in &self.updates {
            for (&i_agt, &val) in self.inds.iter().zip(vals) {
                people.set_attribute(*attr, i_agt, val);
            }
        }
    }
}

/// Day-indexed queue of pending dose effects.
///
/// Each job is applied once, on the first tick at or after its target day, and then dropped.
#[derive(Debug, Default)]
pub struct DoseScheduler {
    jobs: BTreeMap<usize, Vec<ScheduledJob>>,
}

impl DoseScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, day: usize, job: ScheduledJob) {
        self.jobs.entry(day).or_default().push(job);
    }

    /// Apply every job due on or before day `t` and return how many were applied.
    ///
    /// Jobs run in target-day order, then in the order they were scheduled.
    pub fn apply(&mut self, t: usize, people: &mut People) -> usize {
        let later = self.jobs.split_off(&(t + 1));
        let due = std::mem::replace(&mut self.jobs, later);

        let mut n_jobs = 0;
        for job in due.into_values().flatten() {
            job.apply(people);
            n_jobs += 1;
        }
        if n_jobs > 0 {
            log::debug!("day {t}: applied {n_jobs} scheduled dose effects");
        }
        n_jobs
    }

    /// Number of jobs not yet applied.
    pub fn n_pending(&self) -> usize {
        self.jobs.values().map(Vec::len).sum()
    }
}
