use crate::config::Config;
use crate::sim::Results;
use crate::stats::Accumulator;
use anyhow::{Context, Result, bail};
use rmp_serde::decode;
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

/// Observable averaged over independent runs.
pub trait Obs {
    fn update(&mut self, results: &Results) -> Result<()>;
    fn report(&self) -> serde_json::Value;
}

/// Number of agents at each dose level, per day.
pub struct DoseLevels {
    acc_mat: Vec<Vec<Accumulator>>,
}

impl DoseLevels {
    pub fn new(npts: usize, n_levels: usize) -> Self {
        Self {
            acc_mat: vec![vec![Accumulator::new(); n_levels]; npts],
        }
    }
}

impl Obs for DoseLevels {
    fn update(&mut self, results: &Results) -> Result<()> {
        let levels = &results.dose_levels;
        if levels.len() != self.acc_mat.len() {
            bail!(
                "expected {} days of dose levels, but got {}",
                self.acc_mat.len(),
                levels.len()
            );
        }
        for (acc_vec, counts) in self.acc_mat.iter_mut().zip(levels) {
            if counts.len() != acc_vec.len() {
                bail!(
                    "expected {} dose levels, but got {}",
                    acc_vec.len(),
                    counts.len()
                );
            }
            for (acc, &count) in acc_vec.iter_mut().zip(counts) {
                acc.add(count as f64);
            }
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let reports: Vec<Vec<_>> = self
            .acc_mat
            .iter()
            .map(|acc_vec| acc_vec.iter().map(Accumulator::report).collect())
            .collect();
        serde_json::json!({ "dose_levels": reports })
    }
}

/// Doses given per day.
pub struct NewDoses {
    acc_vec: Vec<Accumulator>,
}

impl NewDoses {
    pub fn new(npts: usize) -> Self {
        Self {
            acc_vec: vec![Accumulator::new(); npts],
        }
    }
}

impl Obs for NewDoses {
    fn update(&mut self, results: &Results) -> Result<()> {
        if results.new_doses.len() != self.acc_vec.len() {
            bail!(
                "expected {} days of new doses, but got {}",
                self.acc_vec.len(),
                results.new_doses.len()
            );
        }
        for (acc, &n_doses) in self.acc_vec.iter_mut().zip(&results.new_doses) {
            acc.add(n_doses as f64);
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let reports: Vec<_> = self.acc_vec.iter().map(Accumulator::report).collect();
        serde_json::json!({ "new_doses": reports })
    }
}

/// Fraction of the population with at least `k` doses on the last day, for `k >= 1`.
pub struct FinalCoverage {
    acc_vec: Vec<Accumulator>,
}

impl FinalCoverage {
    pub fn new(n_levels: usize) -> Self {
        Self {
            acc_vec: vec![Accumulator::new(); n_levels - 1],
        }
    }
}

impl Obs for FinalCoverage {
    fn update(&mut self, results: &Results) -> Result<()> {
        let counts = results
            .dose_levels
            .last()
            .context("results have no dose levels")?;
        let n_agents: usize = counts.iter().sum();
        if n_agents == 0 {
            bail!("dose levels count no agents");
        }
        for (i_acc, acc) in self.acc_vec.iter_mut().enumerate() {
            let n_covered: usize = counts.iter().skip(i_acc + 1).sum();
            acc.add(n_covered as f64 / n_agents as f64);
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let reports: Vec<_> = self.acc_vec.iter().map(Accumulator::report).collect();
        serde_json::json!({ "final_coverage": reports })
    }
}

/// Aggregates the results of every run of a simulation.
pub struct Analysis {
    n_runs: usize,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analysis {
    pub fn new(cfg: &Config) -> Self {
        let npts = cfg.n_days + 1;
        let n_levels = cfg.output.n_dose_levels;
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(DoseLevels::new(npts, n_levels)),
            Box::new(NewDoses::new(npts)),
            Box::new(FinalCoverage::new(n_levels)),
        ];
        Self {
            n_runs: 0,
            obs_ptr_vec,
        }
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        let results: Results =
            decode::from_read(&mut reader).context("failed to deserialize results")?;
        self.add_results(&results)
    }

    pub fn add_results(&mut self, results: &Results) -> Result<()> {
        for obs in &mut self.obs_ptr_vec {
            obs.update(results).context("failed to update observable")?;
        }
        self.n_runs += 1;
        Ok(())
    }

    pub fn report(&self) -> Vec<serde_json::Value> {
        let mut reports = vec![serde_json::json!({ "n_runs": self.n_runs })];
        reports.extend(self.obs_ptr_vec.iter().map(|obs| obs.report()));
        reports
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, &self.report())
            .context("failed to serialize analysis")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(levels: Vec<Vec<usize>>, new_doses: Vec<usize>) -> Results {
        let mut results = Results::new(levels.len() - 1);
        results.dose_levels = levels;
        results.new_doses = new_doses;
        results
    }

    fn config() -> Config {
        Config::parse("n_days = 2\n[population]\nn_agents = 4\n").unwrap()
    }

    #[test]
    fn runs_are_averaged_per_day_and_level() {
        let mut analysis = Analysis::new(&config());
        analysis
            .add_results(&results(
                vec![vec![4, 0, 0], vec![2, 2, 0], vec![0, 2, 2]],
                vec![0, 2, 4],
            ))
            .unwrap();
        analysis
            .add_results(&results(
                vec![vec![4, 0, 0], vec![4, 0, 0], vec![2, 2, 0]],
                vec![0, 0, 2],
            ))
            .unwrap();

        let reports = analysis.report();
        assert_eq!(reports[0]["n_runs"], 2);
        assert_eq!(reports[1]["dose_levels"][1][0]["mean"], 3.0);
        assert_eq!(reports[1]["dose_levels"][2][2]["mean"], 1.0);
        assert_eq!(reports[2]["new_doses"][2]["mean"], 3.0);
        assert_eq!(reports[3]["final_coverage"][0]["mean"], 0.75);
        assert_eq!(reports[3]["final_coverage"][1]["mean"], 0.25);
    }

    #[test]
    fn mismatched_runs_are_rejected() {
        let mut analysis = Analysis::new(&config());
        let short = results(vec![vec![4, 0, 0], vec![4, 0, 0]], vec![0, 0]);
        assert!(analysis.add_results(&short).is_err());

        let narrow = results(vec![vec![4, 0]; 3], vec![0; 3]);
        assert!(analysis.add_results(&narrow).is_err());
    }
}
