use crate::allocator::TwoDoseAllocator;
use crate::config::Config;
use crate::people::People;
use crate::recorder::{DoseCounts, DoseFlows};
use crate::rollout::AgeBandRollout;
use crate::sim::{Analyzer, Intervention, Results, Sim};
use anyhow::{Context, Result};
use rand_chacha::ChaCha12Rng;
use rand_distr::{Bernoulli, Distribution};

/// Simulation engine.
///
/// Holds the simulation context and its plugins, and advances the
/// simulation one day at a time.
pub struct Engine {
    sim: Sim,
    interventions: Vec<Box<dyn Intervention>>,
    analyzers: Vec<Box<dyn Analyzer>>,
    prob_death: f64,
    death_dist: Bernoulli,
}

impl Engine {
    /// Create a new `Engine` with a random population and initialize every plugin.
    pub fn new(cfg: &Config, mut rng: ChaCha12Rng) -> Result<Self> {
        let people =
            People::generate(&cfg.population, &mut rng).context("failed to generate population")?;
        let mut sim = Sim::new(people, cfg.n_days, cfg.population.pop_scale, rng);
        if let Some(rescale_vec) = &cfg.population.rescale_vec {
            sim = sim.with_rescale_vec(rescale_vec.clone());
        }

        let mut interventions: Vec<Box<dyn Intervention>> = Vec::new();
        if let Some(alloc_cfg) = &cfg.allocator {
            interventions.push(Box::new(TwoDoseAllocator::new(alloc_cfg.clone())?));
        }
        if let Some(rollout_cfg) = &cfg.rollout {
            interventions.push(Box::new(AgeBandRollout::new(rollout_cfg.clone())?));
        }

        let analyzers: Vec<Box<dyn Analyzer>> = vec![
            Box::new(DoseFlows::new(cfg.output.n_dose_levels)),
            Box::new(DoseCounts),
        ];

        let prob_death = cfg.population.prob_death;
        let death_dist = Bernoulli::new(prob_death)?;

        let mut engine = Self {
            sim,
            interventions,
            analyzers,
            prob_death,
            death_dist,
        };
        engine.initialize().context("failed to initialize plugins")?;
        Ok(engine)
    }

    fn initialize(&mut self) -> Result<()> {
        for intv in &mut self.interventions {
            intv.initialize(&mut self.sim)
                .with_context(|| format!("failed to initialize {}", intv.label()))?;
        }
        for analyzer in &mut self.analyzers {
            analyzer
                .initialize(&mut self.sim)
                .with_context(|| format!("failed to initialize {}", analyzer.label()))?;
        }
        Ok(())
    }

    /// Run every day of the simulation and return its results.
    pub fn run(mut self) -> Result<Results> {
        let npts = self.sim.n_days() + 1;
        let log_every = (npts / 10).max(1);

        for t in 0..npts {
            self.perform_step(t)
                .with_context(|| format!("failed to perform step {t}"))?;

            if (t + 1) % log_every == 0 || t + 1 == npts {
                let progress = 100.0 * (t + 1) as f64 / npts as f64;
                log::info!("completed {progress:06.2}%");
            }
        }

        let n_pending = self.sim.scheduler.n_pending();
        if n_pending > 0 {
            log::info!("{n_pending} dose effects fall after the last day");
        }

        Ok(self.sim.results)
    }

    fn perform_step(&mut self, t: usize) -> Result<()> {
        self.sim.t = t;

        // Remove agents dying of other causes.
        self.remove_deceased();

        for intv in &mut self.interventions {
            intv.apply(&mut self.sim)
                .with_context(|| format!("failed to apply {}", intv.label()))?;
        }

        // Scheduled effects come after every intervention, so a zero delay lands today.
        self.sim.scheduler.apply(t, &mut self.sim.people);

        for analyzer in &mut self.analyzers {
            analyzer
                .apply(&mut self.sim)
                .with_context(|| format!("failed to apply {}", analyzer.label()))?;
        }

        self.sim.record_summary();

        Ok(())
    }

    fn remove_deceased(&mut self) {
        if self.prob_death == 0.0 {
            return;
        }
        for i_agt in 0..self.sim.people.len() {
            if self.sim.people.alive()[i_agt] && self.death_dist.sample(&mut self.sim.rng) {
                self.sim.people.kill(i_agt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const CONFIG: &str = r#"
n_days = 100

[population]
n_agents = 2000
prob_death = 0.001

[allocator]
daily_doses = 60
inter_dose_delay = 21
effect_onset_delay = 7
rel_trans = 0.5
rel_symp = 0.2
"#;

    fn run(text: &str, seed: u64) -> Results {
        let cfg = Config::parse(text).unwrap();
        let engine = Engine::new(&cfg, ChaCha12Rng::seed_from_u64(seed)).unwrap();
        engine.run().unwrap()
    }

    #[test]
    fn results_cover_every_day() {
        let results = run(CONFIG, 1);
        assert_eq!(results.new_doses.len(), 101);
        assert_eq!(results.recorded_doses.len(), 101);
        assert_eq!(results.dose_levels.len(), 101);
        assert_eq!(results.n_alive.len(), 101);
    }

    #[test]
    fn dose_levels_conserve_population() {
        let results = run(CONFIG, 2);
        for counts in &results.dose_levels {
            assert_eq!(counts.len(), 3);
            assert_eq!(counts.iter().sum::<usize>(), 2000);
        }
        assert!(results.dose_levels[100][2] > 0);
    }

    #[test]
    fn recorded_doses_match_live_counts() {
        let results = run(CONFIG, 3);
        assert_eq!(results.recorded_doses, results.new_doses);
        assert!(results.new_doses.iter().all(|&n| n <= 60));
        assert!(results.new_doses.iter().sum::<usize>() > 0);
    }

    #[test]
    fn vaccination_lowers_mean_transmissibility() {
        let results = run(CONFIG, 4);
        assert!(results.mean_rel_trans[0] > results.mean_rel_trans[100]);
        assert!(results.mean_symp_prob[0] > results.mean_symp_prob[100]);
        for pair in results.n_alive.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
    }

    #[test]
    fn same_seed_gives_same_results() {
        assert_eq!(run(CONFIG, 5), run(CONFIG, 5));
    }

    #[test]
    fn rollout_and_allocator_share_results() {
        let text = format!(
            "{CONFIG}\n[rollout]\nduration = 5\nbands = [{{ start_age = 70.0, end_age = 90.0, start_day = 0, uptake = 0.9 }}]\n"
        );
        let results = run(&text, 6);
        assert_eq!(results.recorded_doses, results.new_doses);
        for counts in &results.dose_levels {
            assert_eq!(counts.iter().sum::<usize>(), 2000);
        }
    }

    #[test]
    fn allocator_completes_rollout_first_doses() {
        let text = r#"
n_days = 100

[population]
n_agents = 1000

[allocator]
daily_doses = 50
start_day = 20
rel_trans = 0.5

[rollout]
duration = 1
bands = [{ start_age = 18.0, end_age = 90.0, start_day = 0, uptake = 1.0 }]
"#;
        let results = run(text, 8);

        // Rollout doses leave transmissibility alone, so only second doses can lower it.
        assert_eq!(results.mean_rel_trans[40], 1.0);
        assert!(results.mean_rel_trans[100] < 0.7);
        assert!(results.dose_levels[100][2] > 0);
        assert_eq!(results.recorded_doses, results.new_doses);
    }

    #[test]
    fn rescale_mismatch_aborts_run() {
        let mut rescale_vec = vec!["10.0"; 101];
        rescale_vec[50] = "1.0";
        let rescale_vec = rescale_vec.join(", ");
        let text = CONFIG.replace(
            "prob_death = 0.001",
            &format!("pop_scale = 10.0\nrescale_vec = [{rescale_vec}]"),
        );
        let cfg = Config::parse(&text).unwrap();
        let engine = Engine::new(&cfg, ChaCha12Rng::seed_from_u64(7)).unwrap();
        let err = engine.run().expect_err("mismatch should abort the run");
        assert!(format!("{err:#}").contains("step 50"));
    }
}
