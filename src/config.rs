use crate::people::MAX_DOSES;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of simulated days. Day indices run from 0 to `n_days` inclusive.
    pub n_days: usize,
    /// Base seed. Run `i` is seeded with `seed + i`; OS entropy is used when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    pub population: PopulationConfig,

    /// Two-dose daily allocator, if any.
    #[serde(default)]
    pub allocator: Option<AllocatorConfig>,
    /// Single-dose age-band campaign, if any.
    #[serde(default)]
    pub rollout: Option<RolloutConfig>,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PopulationConfig {
    /// Number of simulated agents.
    pub n_agents: usize,
    /// Ages are drawn uniformly from `[0, max_age)`.
    #[serde(default = "default_max_age")]
    pub max_age: f64,
    /// Number of real people each agent stands for.
    #[serde(default = "default_pop_scale")]
    pub pop_scale: f64,
    /// Rescale factor for each day (`n_days + 1` entries). Defaults to `pop_scale` on every day.
    #[serde(default)]
    pub rescale_vec: Option<Vec<f64>>,
    /// Daily probability of death from causes outside the model.
    #[serde(default)]
    pub prob_death: f64,
    /// Standard deviation of the log-normal individual transmissibility (unit median).
    #[serde(default)]
    pub rel_trans_std_dev: f64,
    /// Probability of becoming symptomatic, per decade of age (last entry covers older ages).
    #[serde(default = "default_symp_prob_by_decade")]
    pub symp_prob_by_decade: Vec<f64>,
}

/// Daily dose supply: a constant number of doses or one entry per day from `start_day`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DoseSupply {
    Constant(f64),
    Daily(Vec<f64>),
}

impl DoseSupply {
    /// Expand into one entry per day, starting at `start_day`.
    pub fn expand(&self, n_days: usize, start_day: usize) -> Vec<f64> {
        match self {
            Self::Constant(n_doses) => vec![*n_doses; (n_days + 1).saturating_sub(start_day)],
            Self::Daily(n_doses) => n_doses.clone(),
        }
    }

    fn entries(&self) -> &[f64] {
        match self {
            Self::Constant(n_doses) => std::slice::from_ref(n_doses),
            Self::Daily(n_doses) => n_doses,
        }
    }
}

/// Effect of each dose, indexed by the number of doses received before it.
///
/// `true` means every dose has full effect, `false` means only the first one has.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cumulative {
    Flag(bool),
    Table(Vec<f64>),
}

impl Cumulative {
    pub fn table(&self) -> Vec<f64> {
        match self {
            Self::Flag(true) => vec![1.0],
            Self::Flag(false) => vec![1.0, 0.0],
            Self::Table(table) => table.clone(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocatorConfig {
    /// Doses available each day, before rescaling.
    pub daily_doses: DoseSupply,
    /// Probability that a first dose takes.
    #[serde(default = "default_one")]
    pub uptake_prob: f64,
    /// Relative symptomatic risk once fully immunized.
    #[serde(default)]
    pub rel_symp: f64,
    /// Relative transmissibility once fully immunized.
    #[serde(default = "default_one")]
    pub rel_trans: f64,
    /// Days after the first dose before the second dose can be given.
    #[serde(default = "default_inter_dose_delay")]
    pub inter_dose_delay: usize,
    /// Days after a dose before its effect starts.
    #[serde(default = "default_effect_onset_delay")]
    pub effect_onset_delay: usize,
    #[serde(default = "default_min_age")]
    pub min_age: f64,
    #[serde(default = "default_priority_age")]
    pub priority_age: f64,
    #[serde(default = "default_priority_boost")]
    pub priority_boost: f64,
    /// Selection weights of the first-dose and second-dose pools.
    #[serde(default = "default_dose_priority")]
    pub dose_priority: Vec<f64>,
    #[serde(default = "default_cumulative")]
    pub cumulative: Cumulative,
    #[serde(default)]
    pub start_day: usize,
    /// Last active day (inclusive). Runs until the end of the simulation when absent.
    #[serde(default)]
    pub end_day: Option<usize>,
}

impl AllocatorConfig {
    pub fn validate(&self) -> Result<()> {
        for (i_day, &n_doses) in self.daily_doses.entries().iter().enumerate() {
            check_num(n_doses, 0.0..f64::INFINITY)
                .with_context(|| format!("invalid number of daily doses at entry {i_day}"))?;
        }
        check_num(self.uptake_prob, 0.0..=1.0).context("invalid uptake probability")?;
        check_num(self.rel_symp, 0.0..=1.0).context("invalid relative symptomatic risk")?;
        check_num(self.rel_trans, 0.0..=1.0).context("invalid relative transmissibility")?;
        check_num(self.min_age, 0.0..=150.0).context("invalid minimum age")?;
        check_num(self.priority_age, 0.0..=150.0).context("invalid priority age")?;
        check_num(self.priority_boost, 0.0..1e6).context("invalid priority boost")?;
        if self.dose_priority.len() != 2 {
            bail!(
                "dose priority must hold 2 weights, but holds {}",
                self.dose_priority.len()
            );
        }
        for &weight in &self.dose_priority {
            check_num(weight, 0.0..1e6).context("invalid dose priority")?;
        }
        check_probs(&self.cumulative.table()).context("invalid cumulative effect table")?;
        if let Some(end_day) = self.end_day {
            if end_day < self.start_day {
                bail!("end day {end_day} is before start day {}", self.start_day);
            }
        }
        Ok(())
    }
}

/// Age band of a single-dose rollout.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgeBand {
    pub start_age: f64,
    pub end_age: f64,
    pub start_day: usize,
    /// Probability that an agent of the band accepts the vaccine.
    pub uptake: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RolloutConfig {
    /// Number of days each band stays open.
    #[serde(default = "default_duration")]
    pub duration: usize,
    #[serde(default = "default_one")]
    pub rel_trans: f64,
    #[serde(default)]
    pub rel_symp: f64,
    #[serde(default = "default_effect_onset_delay")]
    pub effect_onset_delay: usize,
    pub bands: Vec<AgeBand>,
}

impl RolloutConfig {
    pub fn validate(&self) -> Result<()> {
        check_num(self.duration, 1..10_000).context("invalid rollout duration")?;
        check_num(self.rel_trans, 0.0..=1.0).context("invalid relative transmissibility")?;
        check_num(self.rel_symp, 0.0..=1.0).context("invalid relative symptomatic risk")?;
        for (i_band, band) in self.bands.iter().enumerate() {
            check_band(band).with_context(|| format!("invalid band {i_band}"))?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Number of dose levels tracked by the dose flow census (0 doses up to `n_dose_levels - 1`).
    #[serde(default = "default_n_dose_levels")]
    pub n_dose_levels: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            n_dose_levels: default_n_dose_levels(),
        }
    }
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let text = fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::parse(&text)
    }

    /// Deserialize and validate a [`Config`] from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        check_num(self.n_days, 1..100_000).context("invalid number of days")?;

        let pop = &self.population;
        check_num(pop.n_agents, 1..10_000_000).context("invalid number of agents")?;
        check_num(pop.max_age, 1.0..=150.0).context("invalid maximum age")?;
        check_num(pop.pop_scale, 1.0..1e9).context("invalid population scale")?;
        if let Some(rescale_vec) = &pop.rescale_vec {
            check_rescale_vec(rescale_vec, self.n_days + 1, pop.pop_scale)
                .context("invalid rescale vector")?;
        }
        check_num(pop.prob_death, 0.0..=1.0).context("invalid death probability")?;
        check_num(pop.rel_trans_std_dev, 0.0..10.0)
            .context("invalid transmissibility standard deviation")?;
        check_probs(&pop.symp_prob_by_decade).context("invalid symptomatic probabilities")?;

        if let Some(allocator) = &self.allocator {
            allocator.validate().context("invalid allocator")?;
        }
        if let Some(rollout) = &self.rollout {
            rollout.validate().context("invalid rollout")?;
        }

        check_num(self.output.n_dose_levels, 2..=MAX_DOSES + 1)
            .context("invalid number of dose levels")?;

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_probs(vec: &[f64]) -> Result<()> {
    if vec.is_empty() {
        bail!("vector must not be empty");
    }
    for (i_ele, &ele) in vec.iter().enumerate() {
        check_num(ele, 0.0..=1.0).with_context(|| format!("invalid element {i_ele}"))?;
    }
    Ok(())
}

fn check_rescale_vec(vec: &[f64], exp_len: usize, pop_scale: f64) -> Result<()> {
    let len = vec.len();
    if len != exp_len {
        bail!("vector length must be {exp_len}, but is {len}");
    }
    for (i_day, &ele) in vec.iter().enumerate() {
        check_num(ele, 1.0..=pop_scale).with_context(|| format!("invalid element {i_day}"))?;
    }
    Ok(())
}

fn check_band(band: &AgeBand) -> Result<()> {
    check_num(band.start_age, 0.0..=150.0).context("invalid start age")?;
    check_num(band.end_age, 0.0..=150.0).context("invalid end age")?;
    if band.end_age <= band.start_age {
        bail!(
            "end age {} must be greater than start age {}",
            band.end_age,
            band.start_age
        );
    }
    check_num(band.uptake, 0.0..=1.0).context("invalid uptake")?;
    Ok(())
}

fn default_one() -> f64 {
    1.0
}

fn default_max_age() -> f64 {
    90.0
}

fn default_pop_scale() -> f64 {
    1.0
}

fn default_symp_prob_by_decade() -> Vec<f64> {
    vec![0.50, 0.55, 0.60, 0.65, 0.70, 0.75, 0.80, 0.85, 0.90]
}

fn default_inter_dose_delay() -> usize {
    7 * 7
}

fn default_effect_onset_delay() -> usize {
    14
}

fn default_min_age() -> f64 {
    18.0
}

fn default_priority_age() -> f64 {
    75.0
}

fn default_priority_boost() -> f64 {
    10.0
}

fn default_dose_priority() -> Vec<f64> {
    vec![1.0, 5.0]
}

fn default_cumulative() -> Cumulative {
    Cumulative::Table(vec![0.5, 1.0])
}

fn default_duration() -> usize {
    14
}

fn default_n_dose_levels() -> usize {
    3
}
