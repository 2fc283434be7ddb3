/*!
Sequencing of the composer steps: SEM estimation followed by Gibbs sampling in learning,
Gibbs sampling alone in prediction.

# Examples

```rust
use mixtcomp::composer::MixtureComposer;
use mixtcomp::io::{MemoryDataHandler, MemoryExtractor};
use mixtcomp::mixture::RunMode;
use mixtcomp::rng::RngContext;
use mixtcomp::strategy::{self, StrategyParam};

let cells: Vec<String> = (0..40)
    .map(|i| if i < 20 { format!("{}", i % 5) } else { format!("{}", 50 + i % 5) })
    .collect();
let mut handler = MemoryDataHandler::new(40);
handler.add_variable("x", "Gaussian_sjk", &cells);

let mut ctx = RngContext::deterministic(3);
let mut composer = MixtureComposer::new(2, 0.95, &mut ctx).unwrap();
composer.register_from_handler(&handler, &mut ctx).unwrap();
composer.set_data_param(RunMode::Learning, &handler, None).unwrap();

let param = StrategyParam {
    nb_burn_in_iter: 10,
    nb_iter: 10,
    nb_gibbs_burn_in_iter: 5,
    nb_gibbs_iter: 5,
    ..StrategyParam::default()
};
strategy::run(&mut composer, &param).unwrap();

let mut out = MemoryExtractor::new();
let mut params = MemoryExtractor::new();
composer.export_mixture(&mut out, &mut params);
assert!(params.scalars["BIC"].is_finite());
```
*/

use crate::composer::{MixtureComposer, SemPhase};
use crate::error::MixtError;
use crate::mixture::RunMode;
use crate::timer::Timer;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};

/// Iteration counts, retry budgets and reporting options of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyParam {
    pub nb_burn_in_iter: usize,
    pub nb_iter: usize,
    pub nb_gibbs_burn_in_iter: usize,
    pub nb_gibbs_iter: usize,
    /// Complete SEM restarts before giving up.
    pub nb_trials: usize,
    /// S-step draws tried before a partition is declared unusable.
    pub nb_sampling_attempts: usize,
    pub min_ind_per_class: usize,
    /// Individuals per class used to seed the parameters of a SEM trial.
    pub nb_init_per_class: usize,
    /// Consecutive stable iterations that end a SEM phase, `0` disables the early stop.
    pub n_stable_criterion: usize,
    /// Share of unchanged labels for an iteration to count as stable.
    pub ratio_stable_criterion: f64,
    /// Draws progress bars on the terminal.
    pub progress: bool,
}

impl Default for StrategyParam {
    fn default() -> Self {
        Self {
            nb_burn_in_iter: 100,
            nb_iter: 100,
            nb_gibbs_burn_in_iter: 100,
            nb_gibbs_iter: 100,
            nb_trials: 5,
            nb_sampling_attempts: 100,
            min_ind_per_class: 1,
            nb_init_per_class: 50,
            n_stable_criterion: 0,
            ratio_stable_criterion: 0.99,
            progress: false,
        }
    }
}

impl StrategyParam {
    pub fn validate(&self) -> Result<(), MixtError> {
        let mut problems = Vec::new();
        if self.nb_iter == 0 {
            problems.push("nb_iter must be positive");
        }
        if self.nb_trials == 0 {
            problems.push("nb_trials must be positive");
        }
        if self.nb_sampling_attempts == 0 {
            problems.push("nb_sampling_attempts must be positive");
        }
        if self.nb_init_per_class == 0 {
            problems.push("nb_init_per_class must be positive");
        }
        if !(0.0..=1.0).contains(&self.ratio_stable_criterion) {
            problems.push("ratio_stable_criterion must lie in [0, 1]");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(MixtError::InvalidConfig(problems.join(", ")))
        }
    }
}

fn progress_bar(len: usize, prefix: &'static str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("{prefix:14} {bar:40.white} ETA {eta:3} | {msg}") {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_prefix(prefix);
    pb
}

/**
Draws a partition from the current `tik` until it is usable.

An attempt fails when the least populated class has fewer than `min_ind_per_class`
individuals, or when a model rejects the partition. With `sample_missing`, the missing values
are resampled given each new partition before the models check it. The error of the last
attempt is returned once the budget is spent.
*/
pub fn sample_partition(
    composer: &mut MixtureComposer,
    param: &StrategyParam,
    sample_missing: bool,
) -> Result<(), MixtError> {
    let attempts = param.nb_sampling_attempts;
    for attempt in 0..attempts {
        let last = attempt == attempts - 1;

        let lowest = match composer.s_step() {
            Ok(lowest) => lowest,
            Err(log) if last => return Err(MixtError::SampleCondition { attempts, log }),
            Err(_) => continue,
        };
        if lowest < param.min_ind_per_class {
            if last {
                return Err(MixtError::NotEnoughIndividuals {
                    lowest,
                    required: param.min_ind_per_class,
                    attempts,
                });
            }
            debug!("attempt {attempt}: lowest class has {lowest} individuals");
            continue;
        }

        if sample_missing {
            composer.sampling_step_all().map_err(MixtError::Degeneracy)?;
        }
        match composer.check_sample_condition() {
            Ok(()) => return Ok(()),
            Err(log) if last => return Err(MixtError::SampleCondition { attempts, log }),
            Err(log) => debug!("attempt {attempt}: {}", log.trim_end()),
        }
    }
    Err(MixtError::InvalidConfig(
        "nb_sampling_attempts must be positive".to_string(),
    ))
}

/**
Initializes the latent state from the current parameters, see
[`MixtureComposer::initialize_latent`].

With `check`, a partition rejected by the sample condition is drawn again, up to
`nb_sampling_attempts` times. Unrepresentable individuals are reported at once.
*/
pub fn initialize_latent(
    composer: &mut MixtureComposer,
    param: &StrategyParam,
    check: bool,
) -> Result<(), MixtError> {
    let attempts = if check { param.nb_sampling_attempts } else { 1 };
    for attempt in 0..attempts {
        match composer.initialize_latent(check) {
            Ok(()) => return Ok(()),
            Err(MixtError::SampleCondition { log, .. }) if attempt == attempts - 1 => {
                return Err(MixtError::SampleCondition { attempts, log })
            }
            Err(MixtError::SampleCondition { log, .. }) => {
                debug!("latent initialization, attempt {attempt}: {}", log.trim_end())
            }
            Err(e) => return Err(e),
        }
    }
    Err(MixtError::InvalidConfig(
        "nb_sampling_attempts must be positive".to_string(),
    ))
}

/// Stochastic EM: a burn-in phase, then a run phase whose parameter medians are kept.
#[derive(Debug, Clone)]
pub struct SemStrategy {
    param: StrategyParam,
}

impl SemStrategy {
    pub fn new(param: StrategyParam) -> Self {
        Self { param }
    }

    /// Runs up to `nb_trials` complete SEM estimations and stops at the first success.
    pub fn run(&self, composer: &mut MixtureComposer) -> Result<(), MixtError> {
        self.param.validate()?;
        let mut last_failure = None;
        for trial in 0..self.param.nb_trials {
            match self.trial(composer) {
                Ok(()) => {
                    info!("SEM succeeded at trial {trial}");
                    return Ok(());
                }
                Err(e) => {
                    warn!("SEM trial {trial} failed: {e}");
                    last_failure = Some(e);
                }
            }
        }
        match last_failure {
            Some(e) => Err(MixtError::NoSuccessfulTrial(Box::new(e))),
            None => Err(MixtError::InvalidConfig("nb_trials must be positive".to_string())),
        }
    }

    fn trial(&self, composer: &mut MixtureComposer) -> Result<(), MixtError> {
        composer.init_data().map_err(MixtError::Degeneracy)?;
        sample_partition(composer, &self.param, false)?;
        composer.init_param();
        composer
            .init_param_sub_partition(self.param.nb_init_per_class)
            .map_err(MixtError::Degeneracy)?;
        initialize_latent(composer, &self.param, true)?;

        self.run_phase(composer, SemPhase::BurnIn, self.param.nb_burn_in_iter)?;
        self.run_phase(composer, SemPhase::Run, self.param.nb_iter)
    }

    fn run_phase(
        &self,
        composer: &mut MixtureComposer,
        phase: SemPhase,
        nb_iter: usize,
    ) -> Result<(), MixtError> {
        if nb_iter == 0 {
            return Ok(());
        }
        let name = match phase {
            SemPhase::BurnIn => "SEM: burn-in",
            SemPhase::Run => "SEM: run",
        };
        let mut timer = Timer::new(name);
        let pb = progress_bar(nb_iter, name, self.param.progress);
        composer.stability_reset();

        for iteration in 0..nb_iter {
            timer.iteration(iteration, nb_iter - 1);

            composer.e_step();
            sample_partition(composer, &self.param, true)?;
            composer.m_step().map_err(MixtError::Degeneracy)?;

            let stable = self.param.n_stable_criterion > 0
                && composer.is_partition_stable(
                    self.param.ratio_stable_criterion,
                    self.param.n_stable_criterion,
                );
            if stable {
                debug!(
                    "{name}: partition stable for {} iterations, stopping at {iteration}",
                    self.param.n_stable_criterion
                );
                composer.store_sem_run(iteration, iteration, phase);
                break;
            }
            composer.store_sem_run(iteration, nb_iter - 1, phase);
            pb.inc(1);
        }

        pb.finish_with_message("Done!");
        timer.finish();
        Ok(())
    }
}

/// Gibbs sampling with frozen parameters, a burn-in then a run that feeds the statistics.
#[derive(Debug, Clone)]
pub struct GibbsStrategy {
    param: StrategyParam,
}

impl GibbsStrategy {
    pub fn new(param: StrategyParam) -> Self {
        Self { param }
    }

    /**
    The latent state is first initialized from the known parameters, estimated by the SEM
    or imported: responsibilities from the observed probabilities, a partition drawn from
    them, then missing values drawn given the partition. In prediction the data are loaded
    beforehand. The partition check is only applied in learning, since imported parameters
    are never re-estimated.
    */
    pub fn run(&self, composer: &mut MixtureComposer) -> Result<(), MixtError> {
        self.param.validate()?;
        let check = composer.mode() == RunMode::Learning;
        if !check {
            composer.init_data().map_err(MixtError::Degeneracy)?;
        }
        initialize_latent(composer, &self.param, check)?;

        let phases = [
            ("Gibbs: burn-in", self.param.nb_gibbs_burn_in_iter, false),
            ("Gibbs: run", self.param.nb_gibbs_iter, true),
        ];
        for (name, nb_iter, store) in phases {
            let timer = Timer::new(name);
            let pb = progress_bar(composer.nb_ind(), name, self.param.progress);
            composer
                .gibbs_sampling(nb_iter, &pb, store, check)
                .map_err(MixtError::Degeneracy)?;
            pb.finish_with_message("Done!");
            timer.finish();
        }
        Ok(())
    }
}

/// SEM then Gibbs in learning, Gibbs alone in prediction.
pub fn run(composer: &mut MixtureComposer, param: &StrategyParam) -> Result<(), MixtError> {
    if composer.mode() == RunMode::Learning {
        SemStrategy::new(param.clone()).run(composer)?;
    }
    GibbsStrategy::new(param.clone()).run(composer)?;
    info!(
        "run complete, lnObservedLikelihood: {}",
        composer.ln_observed_likelihood()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::tests::{composer_with, FixedMixture};
    use ndarray::Array2;

    fn small_param() -> StrategyParam {
        StrategyParam {
            nb_burn_in_iter: 5,
            nb_iter: 5,
            nb_gibbs_burn_in_iter: 2,
            nb_gibbs_iter: 3,
            ..StrategyParam::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        let param = StrategyParam::default();
        assert_eq!(param.nb_burn_in_iter, 100);
        assert_eq!(param.nb_gibbs_iter, 100);
        assert!(param.validate().is_ok());

        let bad = StrategyParam {
            nb_iter: 0,
            nb_sampling_attempts: 0,
            nb_init_per_class: 0,
            ..param
        };
        match bad.validate() {
            Err(MixtError::InvalidConfig(msg)) => {
                assert!(msg.contains("nb_iter"));
                assert!(msg.contains("nb_sampling_attempts"));
                assert!(msg.contains("nb_init_per_class"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn occupancy_shortfall_on_last_attempt() {
        let ln = Array2::from_shape_fn((3, 2), |(_, k)| if k == 0 { 0.0 } else { -1000.0 });
        let mut composer = composer_with(vec![FixedMixture::new("x", ln)], 2, 0);
        composer.e_step();
        let param = StrategyParam {
            nb_sampling_attempts: 1,
            min_ind_per_class: 1,
            ..StrategyParam::default()
        };
        let err = sample_partition(&mut composer, &param, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "lowest class has 0 individuals, minimum required is 1, after 1 attempts"
        );
    }

    #[test]
    fn model_rejection_is_retried_then_reported() {
        let mut fixed = FixedMixture::new("x", Array2::zeros((4, 2)));
        fixed.min_per_class = 3;
        let mut composer = composer_with(vec![fixed], 2, 0);
        let param = StrategyParam {
            nb_sampling_attempts: 3,
            min_ind_per_class: 0,
            ..StrategyParam::default()
        };
        match sample_partition(&mut composer, &param, true) {
            Err(MixtError::SampleCondition { attempts, log }) => {
                assert_eq!(attempts, 3);
                assert!(log.contains("too small") || log.contains("empty"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sem_then_gibbs_with_fixed_model() {
        let ln = Array2::from_shape_fn((10, 2), |(i, k)| if i % 2 == k { 0.0 } else { -3.0 });
        let mut composer = composer_with(vec![FixedMixture::new("x", ln)], 2, 7);
        run(&mut composer, &small_param()).unwrap();
        assert_eq!(composer.completed_probability_log_burn_in().len(), 5);
        assert_eq!(composer.completed_probability_log_run().len(), 5);
        assert!((composer.prop().sum() - 1.0).abs() < 1e-12);
        assert!(composer.zi().data.iter().all(|&k| k < 2));
    }

    #[test]
    fn stable_partition_stops_early() {
        let ln = Array2::from_shape_fn((10, 2), |(i, k)| if i % 2 == k { 0.0 } else { -1000.0 });
        let mut composer = composer_with(vec![FixedMixture::new("x", ln)], 2, 7);
        let param = StrategyParam {
            nb_iter: 50,
            n_stable_criterion: 2,
            ratio_stable_criterion: 1.0,
            ..small_param()
        };
        SemStrategy::new(param).run(&mut composer).unwrap();
        assert_eq!(composer.completed_probability_log_run().len(), 3);
    }

    #[test]
    fn learning_gibbs_reports_unrepresentable_individuals() {
        let ln = Array2::from_shape_fn((4, 2), |(i, _)| if i == 2 { f64::NEG_INFINITY } else { 0.0 });
        let mut fixed = FixedMixture::new("color", ln);
        fixed.nullable = true;
        let mut composer = composer_with(vec![fixed], 2, 0);
        match GibbsStrategy::new(small_param()).run(&mut composer) {
            Err(MixtError::Unrepresentable(list)) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].individual, 2);
                assert_eq!(list[0].couples.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn latent_initialization_retries_rejected_partitions() {
        let mut fixed = FixedMixture::new("x", Array2::zeros((4, 2)));
        fixed.min_per_class = 3;
        let mut composer = composer_with(vec![fixed], 2, 0);
        let param = StrategyParam {
            nb_sampling_attempts: 4,
            ..StrategyParam::default()
        };
        match initialize_latent(&mut composer, &param, true) {
            Err(MixtError::SampleCondition { attempts, log }) => {
                assert_eq!(attempts, 4);
                assert!(log.contains("too small") || log.contains("empty"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(initialize_latent(&mut composer, &param, false).is_ok());
    }

    #[test]
    fn failing_trials_are_reported() {
        let ln = Array2::from_shape_fn((3, 2), |(_, k)| if k == 0 { 0.0 } else { -1000.0 });
        let mut fixed = FixedMixture::new("x", ln);
        fixed.min_per_class = 2;
        let mut composer = composer_with(vec![fixed], 2, 0);
        let param = StrategyParam {
            nb_trials: 2,
            nb_sampling_attempts: 2,
            ..small_param()
        };
        let err = SemStrategy::new(param).run(&mut composer).unwrap_err();
        assert!(matches!(err, MixtError::NoSuccessfulTrial(_)));
    }
}
