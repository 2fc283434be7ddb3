//! Export of a complete learning run to CSV files. Requires the `csv` feature.
#![cfg(feature = "csv")]

use mixtcomp::composer::MixtureComposer;
use mixtcomp::io::csv::CsvExtractor;
use mixtcomp::io::MemoryDataHandler;
use mixtcomp::mixture::RunMode;
use mixtcomp::rng::RngContext;
use mixtcomp::strategy::{self, StrategyParam};

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_learning_run_to_csv() {
        let counts: Vec<String> = (0..30)
            .map(|i| match (i % 2, i % 7) {
                (_, 3) => "?".to_string(),
                (0, _) => (1 + i % 3).to_string(),
                _ => (12 + i % 4).to_string(),
            })
            .collect();
        let mut handler = MemoryDataHandler::new(30);
        handler.add_variable("counts", "Poisson_k", &counts);

        let mut ctx = RngContext::deterministic(11);
        let mut composer = MixtureComposer::new(2, 0.9, &mut ctx).unwrap();
        composer.register_from_handler(&handler, &mut ctx).unwrap();
        composer
            .set_data_param(RunMode::Learning, &handler, None)
            .unwrap();
        let param = StrategyParam {
            nb_burn_in_iter: 10,
            nb_iter: 10,
            nb_gibbs_burn_in_iter: 5,
            nb_gibbs_iter: 5,
            ..StrategyParam::default()
        };
        strategy::run(&mut composer, &param).unwrap();

        let dir = tempdir().unwrap();
        let mut data_out = CsvExtractor::new(dir.path()).unwrap();
        let mut param_out = CsvExtractor::new(dir.path()).unwrap();
        composer.export_mixture(&mut data_out, &mut param_out);
        assert!(data_out.errors().is_empty());
        assert!(param_out.errors().is_empty());

        for file in [
            "counts_data.csv",
            "counts_param.csv",
            "z_class_data.csv",
            "z_class_param.csv",
            "tik.csv",
            "IDClass.csv",
            "Delta.csv",
            "scalars.csv",
        ] {
            assert!(dir.path().join(file).exists(), "{file} is missing");
        }

        let counts_data = fs::read_to_string(dir.path().join("counts_data.csv")).unwrap();
        assert_eq!(counts_data.lines().count(), 31);
        let scalars = fs::read_to_string(dir.path().join("scalars.csv")).unwrap();
        assert!(scalars.contains("BIC,"));
        assert!(scalars.contains("nbFreeParameters,3"));
    }
}
