//! A small MixtComp demo: learns a two-class mixture of a Gaussian, a Poisson and a
//! categorical variable with missing values, then predicts the classes of new individuals.

use mixtcomp::composer::MixtureComposer;
use mixtcomp::io::{MemoryDataHandler, MemoryExtractor};
use mixtcomp::mixture::RunMode;
use mixtcomp::rng::RngContext;
use mixtcomp::strategy::{self, StrategyParam};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson};
use std::error::Error;

/// Draws `n` individuals from two well separated classes, hiding some values.
fn simulate(n: usize, rng: &mut SmallRng) -> Result<MemoryDataHandler, Box<dyn Error>> {
    let normals = [Normal::new(0.0, 1.0)?, Normal::new(6.0, 1.5)?];
    let poissons = [Poisson::new(2.0)?, Poisson::new(9.0)?];
    let categories = [[0.7, 0.2, 0.1], [0.1, 0.2, 0.7]];

    let mut x = Vec::with_capacity(n);
    let mut counts = Vec::with_capacity(n);
    let mut colors = Vec::with_capacity(n);
    for i in 0..n {
        let k = i % 2;
        let value = normals[k].sample(rng);
        x.push(match rng.gen_range(0..10) {
            0 => "?".to_string(),
            1 => format!("[{:.1}:+inf]", value - 1.0),
            _ => format!("{value:.3}"),
        });

        let count: f64 = poissons[k].sample(rng);
        counts.push(if rng.gen_bool(0.1) {
            format!("[{}:{}]", (count as i64 - 2).max(0), count as i64 + 2)
        } else {
            format!("{}", count as i64)
        });

        let u: f64 = rng.gen();
        let modality = if u < categories[k][0] {
            1
        } else if u < categories[k][0] + categories[k][1] {
            2
        } else {
            3
        };
        colors.push(match rng.gen_range(0..10) {
            0 => "?".to_string(),
            1 => format!("{{{modality},{}}}", modality % 3 + 1),
            _ => modality.to_string(),
        });
    }

    let mut handler = MemoryDataHandler::new(n);
    handler
        .add_variable("x", "Gaussian_sjk", &x)
        .add_variable("counts", "Poisson_k", &counts)
        .add_variable("color", "Categorical_pjk", &colors);
    Ok(handler)
}

fn main() -> Result<(), Box<dyn Error>> {
    const N_LEARN: usize = 200;
    const N_PREDICT: usize = 50;
    const N_CLASS: usize = 2;
    const SEED: u64 = 42;

    let mut sim_rng = SmallRng::seed_from_u64(SEED);
    let param = StrategyParam {
        progress: true,
        ..StrategyParam::default()
    };

    // Learning
    let learn = simulate(N_LEARN, &mut sim_rng)?;
    let mut ctx = RngContext::deterministic(SEED);
    let mut composer = MixtureComposer::new(N_CLASS, 0.95, &mut ctx)?;
    composer.register_from_handler(&learn, &mut ctx)?;
    composer.set_data_param(RunMode::Learning, &learn, None)?;
    strategy::run(&mut composer, &param)?;

    let mut data_out = MemoryExtractor::new();
    let mut param_out = MemoryExtractor::new();
    composer.export_mixture(&mut data_out, &mut param_out);
    println!("{}", composer.write_parameters());
    for name in ["lnObservedLikelihood", "BIC", "ICL"] {
        println!("{name}: {:.3}", param_out.scalars[name]);
    }

    // Prediction with the learned parameters
    let predict = simulate(N_PREDICT, &mut sim_rng)?;
    let setter = param_out.to_param_setter();
    let mut predictor = MixtureComposer::new(N_CLASS, 0.95, &mut ctx)?;
    predictor.register_from_handler(&predict, &mut ctx)?;
    predictor.set_data_param(RunMode::Prediction, &predict, Some(&setter))?;
    strategy::run(&mut predictor, &param)?;

    // Simulated classes alternate, so a good partition agrees with `i % 2` up to a relabeling.
    let zi = &predictor.zi().data;
    let agree = zi.iter().enumerate().filter(|&(i, &k)| k == i % 2).count();
    let accuracy = agree.max(N_PREDICT - agree) as f64 / N_PREDICT as f64;
    println!("Prediction agreement with the simulated classes: {accuracy:.2}");

    Ok(())
}
