use crate::people::People;
use crate::scheduler::DoseScheduler;
use anyhow::Result;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

/// Per-day results of a single run. Every series has `n_days + 1` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Results {
    /// Doses administered each day, counted as they are given.
    pub new_doses: Vec<usize>,
    /// Doses administered each day, rebuilt from dose histories at the end of the run.
    pub recorded_doses: Vec<usize>,
    /// Number of agents at each dose level, per day (`[day][level]`).
    pub dose_levels: Vec<Vec<usize>>,
    pub n_alive: Vec<usize>,
    pub mean_rel_trans: Vec<f64>,
    pub mean_symp_prob: Vec<f64>,
}

impl Results {
    pub fn new(n_days: usize) -> Self {
        let npts = n_days + 1;
        Self {
            new_doses: vec![0; npts],
            recorded_doses: vec![0; npts],
            dose_levels: Vec::new(),
            n_alive: vec![0; npts],
            mean_rel_trans: vec![0.0; npts],
            mean_symp_prob: vec![0.0; npts],
        }
    }
}

/// Simulation context handed to every plugin.
///
/// Owns the population, the dose scheduler, the results and the random number generator.
pub struct Sim {
    /// Current day.
    pub t: usize,
    n_days: usize,
    pop_scale: f64,
    rescale_vec: Vec<f64>,

    pub people: People,
    pub scheduler: DoseScheduler,
    pub results: Results,
    pub rng: ChaCha12Rng,
}

impl Sim {
    pub fn new(people: People, n_days: usize, pop_scale: f64, rng: ChaCha12Rng) -> Self {
        Self {
            t: 0,
            n_days,
            pop_scale,
            rescale_vec: vec![pop_scale; n_days + 1],
            people,
            scheduler: DoseScheduler::new(),
            results: Results::new(n_days),
            rng,
        }
    }

    /// Replace the per-day rescale factors.
    pub fn with_rescale_vec(mut self, rescale_vec: Vec<f64>) -> Self {
        self.rescale_vec = rescale_vec;
        self
    }

    pub fn n_days(&self) -> usize {
        self.n_days
    }

    pub fn pop_scale(&self) -> f64 {
        self.pop_scale
    }

    /// Rescale factor of the current day.
    pub fn rescale_factor(&self) -> f64 {
        self.rescale_vec
            .get(self.t)
            .copied()
            .unwrap_or(self.pop_scale)
    }

    /// Store the population summary of the current day.
    pub fn record_summary(&mut self) {
        let t = self.t;
        let people = &self.people;
        let n_alive = people.n_alive();
        self.results.n_alive[t] = n_alive;
        if n_alive == 0 {
            return;
        }

        let mut rel_trans_sum = 0.0;
        let mut symp_prob_sum = 0.0;
        for i_agt in 0..people.len() {
            if people.alive()[i_agt] {
                rel_trans_sum += people.rel_trans()[i_agt];
                symp_prob_sum += people.symp_prob()[i_agt];
            }
        }
        self.results.mean_rel_trans[t] = rel_trans_sum / n_alive as f64;
        self.results.mean_symp_prob[t] = symp_prob_sum / n_alive as f64;
    }
}

/// Plugin that acts on the population once per day.
pub trait Intervention {
    fn label(&self) -> &str;

    /// Called once, before day 0.
    fn initialize(&mut self, sim: &mut Sim) -> Result<()>;

    /// Called once per day, in registration order.
    fn apply(&mut self, sim: &mut Sim) -> Result<()>;
}

/// Plugin that observes the simulation after all interventions and scheduled effects of a day.
pub trait Analyzer {
    fn label(&self) -> &str;

    fn initialize(&mut self, sim: &mut Sim) -> Result<()>;

    fn apply(&mut self, sim: &mut Sim) -> Result<()>;
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use rand::SeedableRng;

    /// Population with ages spread evenly over `[0, 90)`, unit transmissibility and
    /// symptomatic probability 0.5.
    pub fn uniform_sim(n_agents: usize, n_days: usize, seed: u64) -> Sim {
        let age = (0..n_agents)
            .map(|i_agt| i_agt as f64 * 90.0 / n_agents as f64)
            .collect();
        let people = People::new(age, vec![1.0; n_agents], vec![0.5; n_agents]).unwrap();
        Sim::new(people, n_days, 1.0, ChaCha12Rng::seed_from_u64(seed))
    }

    /// Advance day by day from the current day through `last_day`, applying the
    /// intervention and then the scheduler, as the engine does.
    pub fn run_through<I: Intervention>(sim: &mut Sim, intv: &mut I, last_day: usize) {
        let first_day = sim.t;
        for t in first_day..=last_day {
            step(sim, intv, t).unwrap();
        }
        sim.t = last_day + 1;
    }

    pub fn step<I: Intervention>(sim: &mut Sim, intv: &mut I, t: usize) -> Result<()> {
        sim.t = t;
        intv.apply(sim)?;
        sim.scheduler.apply(t, &mut sim.people);
        Ok(())
    }
}
