//! End-of-run recorders rebuilding per-day dose statistics from dose histories.

use crate::people::DoseHistory;
use crate::sim::{Analyzer, Sim};
use anyhow::{Result, bail};

/// Number of agents at each dose level on each day (`[day][level]`).
///
/// Every agent starts at level 0 on day 0 and moves up one level on each dose day.
/// Agents with more doses than `n_levels - 1` stay in the top level.
/// Each row sums to the number of agents.
pub fn dose_flows(doses: &[DoseHistory], n_days: usize, n_levels: usize) -> Vec<Vec<usize>> {
    let npts = n_days + 1;
    let mut deltas = vec![vec![0i64; n_levels]; npts];
    deltas[0][0] = doses.len() as i64;

    for agent_doses in doses {
        for (level, &day) in agent_doses.dates().iter().enumerate() {
            if level + 1 >= n_levels || day > n_days {
                break;
            }
            deltas[day][level] -= 1;
            deltas[day][level + 1] += 1;
        }
    }

    let mut counts = vec![0i64; n_levels];
    deltas
        .into_iter()
        .map(|row| {
            for (count, delta) in counts.iter_mut().zip(row) {
                *count += delta;
            }
            counts.iter().map(|&count| count as usize).collect()
        })
        .collect()
}

/// Number of doses given on each day.
pub fn doses_per_day(doses: &[DoseHistory], n_days: usize) -> Vec<usize> {
    let mut n_doses = vec![0; n_days + 1];
    for &day in doses.iter().flat_map(DoseHistory::dates) {
        if day <= n_days {
            n_doses[day] += 1;
        }
    }
    n_doses
}

/// Fills [`Results::dose_levels`](crate::sim::Results) on the last day.
pub struct DoseFlows {
    n_levels: usize,
}

impl DoseFlows {
    pub fn new(n_levels: usize) -> Self {
        Self { n_levels }
    }
}

impl Analyzer for DoseFlows {
    fn label(&self) -> &str {
        "dose flows"
    }

    fn initialize(&mut self, sim: &mut Sim) -> Result<()> {
        if self.n_levels < 2 {
            let n_levels = self.n_levels;
            bail!("at least 2 dose levels are needed, but got {n_levels}");
        }
        sim.results.dose_levels = vec![vec![0; self.n_levels]; sim.n_days() + 1];
        Ok(())
    }

    fn apply(&mut self, sim: &mut Sim) -> Result<()> {
        if sim.t == sim.n_days() {
            sim.results.dose_levels = dose_flows(sim.people.doses(), sim.n_days(), self.n_levels);
        }
        Ok(())
    }
}

/// Fills [`Results::recorded_doses`](crate::sim::Results) on the last day.
pub struct DoseCounts;

impl Analyzer for DoseCounts {
    fn label(&self) -> &str {
        "dose counts"
    }

    fn initialize(&mut self, _sim: &mut Sim) -> Result<()> {
        Ok(())
    }

    fn apply(&mut self, sim: &mut Sim) -> Result<()> {
        if sim.t == sim.n_days() {
            sim.results.recorded_doses = doses_per_day(sim.people.doses(), sim.n_days());
        }
        Ok(())
    }
}
