use crate::config::{AgeBand, RolloutConfig};
use crate::people::Attribute;
use crate::scheduler::ScheduledJob;
use crate::sim::{Intervention, Sim};
use anyhow::{Context, Result};
use rand_distr::{Bernoulli, Distribution};

impl AgeBand {
    pub fn contains(&self, age: f64) -> bool {
        (self.start_age..self.end_age).contains(&age)
    }

    pub fn is_open(&self, t: usize, duration: usize) -> bool {
        (self.start_day..self.start_day + duration).contains(&t)
    }
}

/// Single-dose campaign opening one age band after another.
///
/// While a band is open, each accepting agent of the band without a dose is
/// vaccinated with probability `1 / duration` per day.
pub struct AgeBandRollout {
    cfg: RolloutConfig,
    daily_dist: Bernoulli,

    /// Accepting agents of each band, drawn when the band first opens.
    accepting: Vec<Option<Vec<usize>>>,

    orig_rel_trans: Vec<f64>,
    orig_symp_prob: Vec<f64>,
}

impl AgeBandRollout {
    pub fn new(cfg: RolloutConfig) -> Result<Self> {
        cfg.validate().context("invalid rollout config")?;
        let daily_dist = Bernoulli::new(1.0 / cfg.duration as f64)?;
        let accepting = vec![None; cfg.bands.len()];
        Ok(Self {
            cfg,
            daily_dist,
            accepting,
            orig_rel_trans: Vec::new(),
            orig_symp_prob: Vec::new(),
        })
    }

    fn draw_accepting(band: &AgeBand, sim: &mut Sim) -> Result<Vec<usize>> {
        let uptake_dist = Bernoulli::new(band.uptake)?;
        let people = &sim.people;
        let mut accepting = Vec::new();
        for (i_agt, &age) in people.age().iter().enumerate() {
            if band.contains(age) && uptake_dist.sample(&mut sim.rng) {
                accepting.push(i_agt);
            }
        }
        Ok(accepting)
    }
}

impl Intervention for AgeBandRollout {
    fn label(&self) -> &str {
        "age-band rollout"
    }

    fn initialize(&mut self, sim: &mut Sim) -> Result<()> {
        self.orig_rel_trans = sim.people.rel_trans().to_vec();
        self.orig_symp_prob = sim.people.symp_prob().to_vec();
        log::info!(
            "{}: {} bands open for {} days each",
            self.label(),
            self.cfg.bands.len(),
            self.cfg.duration
        );
        Ok(())
    }

    fn apply(&mut self, sim: &mut Sim) -> Result<()> {
        let t = sim.t;
        let mut vacc_inds = Vec::new();

        for (i_band, band) in self.cfg.bands.iter().enumerate() {
            if !band.is_open(t, self.cfg.duration) {
                continue;
            }
            if self.accepting[i_band].is_none() {
                let accepting = Self::draw_accepting(band, sim)
                    .with_context(|| format!("failed to draw acceptance for band {i_band}"))?;
                let n_accepting = accepting.len();
                log::debug!("day {t}: band {i_band} opens with {n_accepting} accepting");
                self.accepting[i_band] = Some(accepting);
            }
            let Some(accepting) = &self.accepting[i_band] else {
                continue;
            };

            for &i_agt in accepting {
                let people = &sim.people;
                if !people.alive()[i_agt] || people.doses()[i_agt].count() > 0 {
                    continue;
                }
                if self.daily_dist.sample(&mut sim.rng) {
                    vacc_inds.push(i_agt);
                }
            }
        }

        if vacc_inds.is_empty() {
            return Ok(());
        }
        vacc_inds.sort_unstable();
        vacc_inds.dedup();

        let rel_trans_vals = vacc_inds
            .iter()
            .map(|&i_agt| self.orig_rel_trans[i_agt] * self.cfg.rel_trans)
            .collect();
        let symp_prob_vals = vacc_inds
            .iter()
            .map(|&i_agt| self.orig_symp_prob[i_agt] * self.cfg.rel_symp)
            .collect();
        for &i_agt in &vacc_inds {
            sim.people.record_dose(i_agt, t)?;
            sim.people.mark_vaccine_took(i_agt);
        }
        sim.results.new_doses[t] += vacc_inds.len();
        log::debug!("day {t}: rollout gave {} doses", vacc_inds.len());

        let job = ScheduledJob::new(vacc_inds)
            .with(Attribute::RelTrans, rel_trans_vals)?
            .with(Attribute::SympProb, symp_prob_vals)?;
        sim.scheduler.schedule(t + self.cfg.effect_onset_delay, job);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::testing::{run_through, uniform_sim};

    fn band(start_age: f64, end_age: f64, start_day: usize, uptake: f64) -> AgeBand {
        AgeBand {
            start_age,
            end_age,
            start_day,
            uptake,
        }
    }

    fn rollout_cfg(duration: usize, bands: Vec<AgeBand>) -> RolloutConfig {
        RolloutConfig {
            duration,
            rel_trans: 0.5,
            rel_symp: 0.1,
            effect_onset_delay: 3,
            bands,
        }
    }

    #[test]
    fn band_predicate_is_half_open() {
        let band = band(60.0, 75.0, 10, 1.0);
        assert!(band.contains(60.0));
        assert!(band.contains(74.9));
        assert!(!band.contains(75.0));
        assert!(!band.contains(59.9));

        assert!(!band.is_open(9, 5));
        assert!(band.is_open(10, 5));
        assert!(band.is_open(14, 5));
        assert!(!band.is_open(15, 5));
    }

    #[test]
    fn one_day_bands_vaccinate_everyone_on_their_start_day() {
        let n_days = 20;
        let mut sim = uniform_sim(900, n_days, 21);
        let cfg = rollout_cfg(1, vec![band(75.0, 90.0, 2, 1.0), band(60.0, 75.0, 6, 1.0)]);
        let mut rollout = AgeBandRollout::new(cfg).unwrap();
        rollout.initialize(&mut sim).unwrap();

        run_through(&mut sim, &mut rollout, n_days);

        for (i_agt, doses) in sim.people.doses().iter().enumerate() {
            let age = sim.people.age()[i_agt];
            let exp_dates: &[usize] = match age {
                a if a >= 75.0 => &[2],
                a if a >= 60.0 => &[6],
                _ => &[],
            };
            assert_eq!(doses.dates(), exp_dates, "agent {i_agt} aged {age}");
            if exp_dates.is_empty() {
                assert_eq!(sim.people.rel_trans()[i_agt], 1.0);
            } else {
                assert_eq!(sim.people.rel_trans()[i_agt], 0.5);
                assert!((sim.people.symp_prob()[i_agt] - 0.05).abs() < 1e-12);
            }
        }
        assert_eq!(sim.results.new_doses[2], 150);
        assert_eq!(sim.results.new_doses[6], 150);
    }

    #[test]
    fn doses_stay_within_band_window() {
        let n_days = 40;
        let mut sim = uniform_sim(600, n_days, 22);
        for i_agt in (0..600).step_by(5) {
            sim.people.kill(i_agt);
        }
        let cfg = rollout_cfg(10, vec![band(30.0, 60.0, 5, 0.8)]);
        let mut rollout = AgeBandRollout::new(cfg).unwrap();
        rollout.initialize(&mut sim).unwrap();

        run_through(&mut sim, &mut rollout, n_days);

        let mut n_dosed = 0;
        for (i_agt, doses) in sim.people.doses().iter().enumerate() {
            assert!(doses.count() <= 1);
            if let Some(day) = doses.first() {
                assert!((5..15).contains(&day));
                assert!((30.0..60.0).contains(&sim.people.age()[i_agt]));
                assert!(sim.people.alive()[i_agt]);
                n_dosed += 1;
            }
        }
        assert!(n_dosed > 0);
        assert_eq!(sim.results.new_doses.iter().sum::<usize>(), n_dosed);
    }

    #[test]
    fn zero_uptake_gives_no_doses() {
        let n_days = 10;
        let mut sim = uniform_sim(100, n_days, 23);
        let cfg = rollout_cfg(2, vec![band(0.0, 90.0, 0, 0.0)]);
        let mut rollout = AgeBandRollout::new(cfg).unwrap();
        rollout.initialize(&mut sim).unwrap();

        run_through(&mut sim, &mut rollout, n_days);

        assert!(sim.people.doses().iter().all(|doses| doses.count() == 0));
        assert_eq!(sim.scheduler.n_pending(), 0);
    }
}
