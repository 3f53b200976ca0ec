//! Per-agent state of the simulated population.

use crate::config::PopulationConfig;
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_distr::{LogNormal, Uniform};
use serde::{Deserialize, Serialize};

/// Maximum number of doses a dose history can hold.
pub const MAX_DOSES: usize = 3;

/// Days on which an agent received each of its doses.
///
/// Fixed capacity, so the number of doses is always the length of the recorded dates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseHistory {
    n_doses: u8,
    dates: [usize; MAX_DOSES],
}

impl DoseHistory {
    /// Number of doses received so far.
    pub fn count(&self) -> usize {
        self.n_doses as usize
    }

    /// Dose days in the order they were given.
    pub fn dates(&self) -> &[usize] {
        &self.dates[..self.count()]
    }

    /// Day of the first dose, if any.
    pub fn first(&self) -> Option<usize> {
        self.dates().first().copied()
    }

    /// Record a dose given on `day`.
    ///
    /// # Errors
    /// Returns an error if the history is full or if `day` is not after the last dose.
    pub fn push(&mut self, day: usize) -> Result<()> {
        let count = self.count();
        if count == MAX_DOSES {
            bail!("dose history already holds {MAX_DOSES} doses");
        }
        if let Some(&last) = self.dates().last() {
            if day <= last {
                bail!("dose day {day} is not after the previous dose day {last}");
            }
        }
        self.dates[count] = day;
        self.n_doses += 1;
        Ok(())
    }
}

/// Agent attributes that scheduled dose effects can overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    RelTrans,
    SympProb,
}

/// Columnar store of all agents, indexed by agent id.
#[derive(Debug, Clone)]
pub struct People {
    age: Vec<f64>,
    alive: Vec<bool>,
    rel_trans: Vec<f64>,
    symp_prob: Vec<f64>,
    doses: Vec<DoseHistory>,
    vaccine_took: Vec<bool>,
}

impl People {
    /// Create a population of living, unvaccinated agents.
    pub fn new(age: Vec<f64>, rel_trans: Vec<f64>, symp_prob: Vec<f64>) -> Result<Self> {
        let n_agents = age.len();
        if rel_trans.len() != n_agents || symp_prob.len() != n_agents {
            bail!(
                "attribute lengths differ: {} ages, {} rel_trans, {} symp_prob",
                n_agents,
                rel_trans.len(),
                symp_prob.len()
            );
        }
        Ok(Self {
            age,
            alive: vec![true; n_agents],
            rel_trans,
            symp_prob,
            doses: vec![DoseHistory::default(); n_agents],
            vaccine_took: vec![false; n_agents],
        })
    }

    /// Draw a random population from its configuration.
    pub fn generate<R: Rng + ?Sized>(cfg: &PopulationConfig, rng: &mut R) -> Result<Self> {
        let age_dist = Uniform::new(0.0, cfg.max_age)?;
        let rel_trans_dist = LogNormal::new(0.0, cfg.rel_trans_std_dev)?;
        let last_decade = cfg
            .symp_prob_by_decade
            .len()
            .checked_sub(1)
            .context("symptomatic probability table is empty")?;

        let mut age = Vec::with_capacity(cfg.n_agents);
        let mut rel_trans = Vec::with_capacity(cfg.n_agents);
        let mut symp_prob = Vec::with_capacity(cfg.n_agents);
        for _ in 0..cfg.n_agents {
            let agent_age: f64 = age_dist.sample(rng);
            let decade = ((agent_age / 10.0) as usize).min(last_decade);
            age.push(agent_age);
            rel_trans.push(rel_trans_dist.sample(rng));
            symp_prob.push(cfg.symp_prob_by_decade[decade]);
        }

        Self::new(age, rel_trans, symp_prob)
    }

    pub fn len(&self) -> usize {
        self.age.len()
    }

    pub fn age(&self) -> &[f64] {
        &self.age
    }

    pub fn alive(&self) -> &[bool] {
        &self.alive
    }

    pub fn n_alive(&self) -> usize {
        self.alive.iter().filter(|&&alive| alive).count()
    }

    pub fn kill(&mut self, i_agt: usize) {
        self.alive[i_agt] = false;
    }

    pub fn rel_trans(&self) -> &[f64] {
        &self.rel_trans
    }

    pub fn symp_prob(&self) -> &[f64] {
        &self.symp_prob
    }

    pub fn doses(&self) -> &[DoseHistory] {
        &self.doses
    }

    /// Record a dose given to agent `i_agt` on `day`.
    pub fn record_dose(&mut self, i_agt: usize, day: usize) -> Result<()> {
        self.doses[i_agt]
            .push(day)
            .with_context(|| format!("failed to record dose of agent {i_agt}"))
    }

    /// Whether the first dose of each agent took, whichever campaign gave it.
    pub fn vaccine_took(&self) -> &[bool] {
        &self.vaccine_took
    }

    pub fn mark_vaccine_took(&mut self, i_agt: usize) {
        self.vaccine_took[i_agt] = true;
    }

    pub fn set_attribute(&mut self, attr: Attribute, i_agt: usize, val: f64) {
        match attr {
            Attribute::RelTrans => self.rel_trans[i_agt] = val,
            Attribute::SympProb => self.symp_prob[i_agt] = val,
        }
    }
}
