//! End-to-end tests of the SEM/Gibbs engine on a two-class data set.
//!
//! 1. `test_learning_recovers_classes`: learning separates two well separated classes.
//! 2. `test_prediction_reuses_parameters`: a prediction run on new individuals with the
//!    learned parameters puts them in the matching classes.
//! 3. `test_same_seed_same_run`: two runs with the same seed are identical.
//! 4. `test_invalid_data_blocks_the_run`: validation errors are reported before any step.

use mixtcomp::composer::MixtureComposer;
use mixtcomp::error::MixtError;
use mixtcomp::io::{MemoryDataHandler, MemoryExtractor};
use mixtcomp::mixture::RunMode;
use mixtcomp::rng::RngContext;
use mixtcomp::strategy::{self, StrategyParam};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const N_CLASS: usize = 2;

    /// Even individuals come from the first class, odd ones from the second. A few values
    /// are hidden behind missing descriptors.
    fn two_class_data(n: usize) -> MemoryDataHandler {
        let mut x = Vec::with_capacity(n);
        let mut color = Vec::with_capacity(n);
        for i in 0..n {
            let k = i % 2;
            let center = if k == 0 { 0.0 } else { 10.0 };
            let value = center + ((i * 7) % 11) as f64 * 0.3 - 1.5;
            x.push(match i % 13 {
                5 => "?".to_string(),
                9 if k == 1 => "[8:+inf]".to_string(),
                _ => format!("{value}"),
            });

            let pattern = if k == 0 { [1, 1, 1, 2, 2, 3] } else { [3, 3, 3, 2, 2, 1] };
            let modality = pattern[(i / 2) % 6];
            color.push(if i % 17 == 3 {
                "{1,2}".to_string()
            } else {
                modality.to_string()
            });
        }
        let mut handler = MemoryDataHandler::new(n);
        handler
            .add_variable("x", "Gaussian_sjk", &x)
            .add_variable("color", "Categorical_pjk", &color);
        handler
    }

    fn param() -> StrategyParam {
        StrategyParam {
            nb_burn_in_iter: 20,
            nb_iter: 20,
            nb_gibbs_burn_in_iter: 10,
            nb_gibbs_iter: 10,
            ..StrategyParam::default()
        }
    }

    fn learn(seed: u64) -> (MixtureComposer, MemoryExtractor, MemoryExtractor) {
        let handler = two_class_data(60);
        let mut ctx = RngContext::deterministic(seed);
        let mut composer = MixtureComposer::new(N_CLASS, 0.95, &mut ctx).unwrap();
        composer.register_from_handler(&handler, &mut ctx).unwrap();
        composer
            .set_data_param(RunMode::Learning, &handler, None)
            .unwrap();
        strategy::run(&mut composer, &param()).unwrap();

        let mut data_out = MemoryExtractor::new();
        let mut param_out = MemoryExtractor::new();
        composer.export_mixture(&mut data_out, &mut param_out);
        (composer, data_out, param_out)
    }

    /// Share of individuals whose label matches `i % 2` once the first label is mapped.
    fn agreement(zi: &[usize], first_class_label: usize) -> f64 {
        let agree = zi
            .iter()
            .enumerate()
            .filter(|&(i, &k)| (k == first_class_label) == (i % 2 == 0))
            .count();
        agree as f64 / zi.len() as f64
    }

    #[test]
    fn test_learning_recovers_classes() {
        let (composer, data_out, param_out) = learn(42);

        let zi = &composer.zi().data;
        assert!(agreement(zi, zi[0]) >= 0.85);
        assert_abs_diff_eq!(composer.prop().sum(), 1.0, epsilon = 1e-9);
        for row in composer.tik().rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-9);
        }

        let gaussian = param_out.param("x", "param").unwrap();
        assert_eq!(gaussian.stat.dim(), (4, 3));
        assert_eq!(gaussian.log.dim(), (4, 20));
        let first = zi[0];
        let mean_first = gaussian.stat[[2 * first, 0]];
        let mean_second = gaussian.stat[[2 * (1 - first), 0]];
        assert!(mean_first.abs() < 1.5);
        assert!((mean_second - 10.0).abs() < 1.5);
        for p in 0..4 {
            assert!(gaussian.stat[[p, 1]] <= gaussian.stat[[p, 0]]);
            assert!(gaussian.stat[[p, 0]] <= gaussian.stat[[p, 2]]);
        }

        let x = &data_out.vals["x"];
        assert_eq!(x.completed.len(), 60);
        assert!(!x.stats.is_empty());
        let right_censored = x.stats.iter().find(|s| s.individual == 9).unwrap();
        assert!(right_censored.lower >= 8.0);

        let color = &data_out.vals["color"];
        assert!(color.completed.iter().all(|&c| (1.0..=3.0).contains(&c)));

        assert_eq!(param_out.scalars["nbFreeParameters"], 1.0 + 4.0 + 4.0);
        assert!(param_out.scalars["BIC"] < param_out.scalars["lnObservedLikelihood"]);
        assert_eq!(data_out.matrices["IDClass"].dim(), (N_CLASS, 2));
        let delta = &data_out.matrices["Delta"];
        assert_eq!(delta.dim(), (2, 2));
        assert_eq!(delta[[0, 0]], 0.0);
        assert_eq!(delta[[0, 1]], delta[[1, 0]]);
        assert!(delta[[0, 1]] > 0.0);
        assert_eq!(data_out.matrices["lnProbaGivenClass"].dim(), (60, N_CLASS));
    }

    #[test]
    fn test_prediction_reuses_parameters() {
        let (learned, _, param_out) = learn(7);
        let first_class_label = learned.zi().data[0];
        let setter = param_out.to_param_setter();

        let handler = two_class_data(20);
        let mut ctx = RngContext::deterministic(8);
        let mut composer = MixtureComposer::new(N_CLASS, 0.95, &mut ctx).unwrap();
        composer.register_from_handler(&handler, &mut ctx).unwrap();
        composer
            .set_data_param(RunMode::Prediction, &handler, Some(&setter))
            .unwrap();
        strategy::run(&mut composer, &param()).unwrap();

        assert!(agreement(&composer.zi().data, first_class_label) >= 0.85);
        assert_eq!(composer.prop(), learned.prop());

        let mut data_out = MemoryExtractor::new();
        let mut predicted = MemoryExtractor::new();
        composer.export_mixture(&mut data_out, &mut predicted);
        assert_eq!(predicted.param("z_class", "pi").unwrap().stat.ncols(), 1);
        assert_eq!(
            predicted.param("x", "param").unwrap().stat.column(0),
            param_out.param("x", "param").unwrap().stat.column(0)
        );
    }

    #[test]
    fn test_same_seed_same_run() {
        let (a, _, pa) = learn(3);
        let (b, _, pb) = learn(3);
        assert_eq!(a.zi().data, b.zi().data);
        assert_eq!(a.tik(), b.tik());
        assert_eq!(pa.param("x", "param"), pb.param("x", "param"));
        assert_eq!(pa.param("color", "param"), pb.param("color", "param"));
    }

    #[test]
    fn test_invalid_data_blocks_the_run() {
        let mut handler = MemoryDataHandler::new(3);
        handler
            .add_variable("x", "Gaussian_sjk", &["1.0", "{1,2}", "2.0"])
            .add_variable("color", "Categorical_pjk", &["1", "[1:2]", "2"]);
        let mut ctx = RngContext::deterministic(0);
        let mut composer = MixtureComposer::new(N_CLASS, 0.95, &mut ctx).unwrap();
        composer.register_from_handler(&handler, &mut ctx).unwrap();
        match composer.set_data_param(RunMode::Learning, &handler, None) {
            Err(MixtError::DataValidation(log)) => {
                assert!(log.contains("Variable x"));
                assert!(log.contains("Variable color"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_model_is_reported() {
        let mut handler = MemoryDataHandler::new(2);
        handler.add_variable("w", "Weibull", &["1.0", "2.0"]);
        let mut ctx = RngContext::deterministic(0);
        let mut composer = MixtureComposer::new(N_CLASS, 0.95, &mut ctx).unwrap();
        let err = composer
            .register_from_handler(&handler, &mut ctx)
            .unwrap_err();
        assert!(err.contains("Weibull"));
    }
}
