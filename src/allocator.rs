use crate::config::AllocatorConfig;
use crate::people::Attribute;
use crate::scheduler::ScheduledJob;
use crate::sim::{Intervention, Sim};
use anyhow::{Context, Result, bail};
use rand::seq::index;
use rand_distr::{Bernoulli, Distribution};

/// Two-dose vaccine with a daily dose supply, priority weighted selection,
/// a minimum interval between doses, and a delayed effect.
///
/// Whether the vaccine takes is decided once, at the first dose; the second
/// dose takes if and only if the first did, whichever campaign gave it.
pub struct TwoDoseAllocator {
    cfg: AllocatorConfig,
    cumulative: Vec<f64>,
    take_dist: Bernoulli,

    daily_doses: Vec<f64>,
    end_day: usize,

    orig_rel_trans: Vec<f64>,
    orig_symp_prob: Vec<f64>,
}

impl TwoDoseAllocator {
    pub fn new(cfg: AllocatorConfig) -> Result<Self> {
        cfg.validate().context("invalid allocator config")?;
        let cumulative = cfg.cumulative.table();
        let take_dist = Bernoulli::new(cfg.uptake_prob)?;
        Ok(Self {
            cfg,
            cumulative,
            take_dist,
            daily_doses: Vec::new(),
            end_day: 0,
            orig_rel_trans: Vec::new(),
            orig_symp_prob: Vec::new(),
        })
    }

    /// Number of doses to give today, or zero if there is nothing to do.
    fn n_doses_today(&self, sim: &Sim) -> Result<usize> {
        let rel_t = sim.t - self.cfg.start_day;
        let Some(&nominal) = self.daily_doses.get(rel_t) else {
            return Ok(0);
        };

        let rescale = sim.rescale_factor();
        let n_doses = (nominal / rescale).round();
        if !n_doses.is_finite() || n_doses <= 0.0 {
            return Ok(0);
        }
        if rescale != sim.pop_scale() {
            bail!(
                "rescale factor {rescale} on day {} differs from population scale {}",
                sim.t,
                sim.pop_scale()
            );
        }

        Ok(n_doses as usize)
    }

    fn selection_weights(&self, sim: &Sim) -> Vec<f64> {
        let t = sim.t;
        let people = &sim.people;
        let first_weight = self.cfg.dose_priority[0];
        let second_weight = self.cfg.dose_priority[1];

        people
            .age()
            .iter()
            .zip(people.alive())
            .zip(people.doses())
            .map(|((&age, &alive), doses)| {
                if !alive || age < self.cfg.min_age || doses.count() > 1 {
                    return 0.0;
                }
                let weight = if age >= self.cfg.priority_age {
                    self.cfg.priority_boost
                } else {
                    1.0
                };
                match doses.first() {
                    None => weight * first_weight,
                    Some(day) if t < day + self.cfg.inter_dose_delay => 0.0,
                    Some(_) => weight * second_weight,
                }
            })
            .collect()
    }

    /// Transmissibility and symptomatic probability factors of a dose given
    /// after `n_prior` doses.
    fn effect(&self, n_prior: usize) -> (f64, f64) {
        let eff = self.cumulative[n_prior.min(self.cumulative.len() - 1)];
        let rel_trans_eff = (1.0 - eff) + eff * self.cfg.rel_trans;
        let rel_symp_eff = (1.0 - eff) + eff * self.cfg.rel_symp;
        (rel_trans_eff, rel_symp_eff)
    }
}

impl Intervention for TwoDoseAllocator {
    fn label(&self) -> &str {
        "two-dose allocator"
    }

    fn initialize(&mut self, sim: &mut Sim) -> Result<()> {
        let n_days = sim.n_days();
        self.daily_doses = self.cfg.daily_doses.expand(n_days, self.cfg.start_day);
        self.end_day = self.cfg.end_day.unwrap_or(n_days);

        // Effects are always derived from these, never from the current values.
        self.orig_rel_trans = sim.people.rel_trans().to_vec();
        self.orig_symp_prob = sim.people.symp_prob().to_vec();

        log::info!(
            "{}: days {}..={}, {} supply entries, {} total nominal doses",
            self.label(),
            self.cfg.start_day,
            self.end_day,
            self.daily_doses.len(),
            self.daily_doses.iter().sum::<f64>()
        );
        Ok(())
    }

    fn apply(&mut self, sim: &mut Sim) -> Result<()> {
        let t = sim.t;
        if t < self.cfg.start_day || t > self.end_day {
            return Ok(());
        }

        let n_doses = self.n_doses_today(sim)?;
        if n_doses == 0 {
            return Ok(());
        }

        let weights = self.selection_weights(sim);
        let n_eligible = weights.iter().filter(|&&weight| weight > 0.0).count();
        let n_doses = n_doses.min(n_eligible);
        if n_doses == 0 {
            log::debug!("day {t}: no agents eligible for a dose");
            return Ok(());
        }

        let weight_of = |i_agt: usize| weights[i_agt];
        let chosen = index::sample_weighted(&mut sim.rng, weights.len(), weight_of, n_doses)
            .context("failed to sample dose recipients")?;
        let mut chosen = chosen.into_vec();
        chosen.sort_unstable();
        sim.results.new_doses[t] += chosen.len();

        let mut take_inds = Vec::with_capacity(chosen.len());
        let mut rel_trans_vals = Vec::with_capacity(chosen.len());
        let mut symp_prob_vals = Vec::with_capacity(chosen.len());
        for &i_agt in &chosen {
            let n_prior = sim.people.doses()[i_agt].count();
            let takes = match n_prior {
                0 => self.take_dist.sample(&mut sim.rng),
                1 => sim.people.vaccine_took()[i_agt],
                _ => bail!("agent {i_agt} selected for a dose after {n_prior} doses"),
            };
            if !takes {
                continue;
            }
            sim.people.mark_vaccine_took(i_agt);

            let (rel_trans_eff, rel_symp_eff) = self.effect(n_prior);
            take_inds.push(i_agt);
            rel_trans_vals.push(self.orig_rel_trans[i_agt] * rel_trans_eff);
            symp_prob_vals.push(self.orig_symp_prob[i_agt] * rel_symp_eff);
        }

        let n_take = take_inds.len();
        if n_take > 0 {
            let job = ScheduledJob::new(take_inds)
                .with(Attribute::RelTrans, rel_trans_vals)?
                .with(Attribute::SympProb, symp_prob_vals)?;
            sim.scheduler.schedule(t + self.cfg.effect_onset_delay, job);
        }

        for &i_agt in &chosen {
            sim.people.record_dose(i_agt, t)?;
        }

        log::debug!("day {t}: gave {} doses, {n_take} took", chosen.len());
        Ok(())
    }
}
