//! Terminal failures of a run.
//!
//! Recoverable diagnostics travel as `Result<(), String>` warning logs through the
//! per-step API. They become a [`MixtError`] only once a retry budget is exhausted
//! or a hard gate (data loading) refuses to let the algorithm start.

use thiserror::Error;

/// An individual that no class can explain, together with the variables that
/// ruled it out in each class.
#[derive(Debug, Clone, PartialEq)]
pub struct UnrepresentableIndividual {
    pub individual: usize,
    /// `(class, variable id)` couples with a null observed probability.
    pub couples: Vec<(usize, String)>,
}

impl std::fmt::Display for UnrepresentableIndividual {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "individual {}:", self.individual)?;
        for (k, id) in &self.couples {
            write!(f, " (class {k}, variable {id})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum MixtError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("data validation failed:\n{0}")]
    DataValidation(String),

    #[error(
        "lowest class has {lowest} individuals, minimum required is {required}, after {attempts} attempts"
    )]
    NotEnoughIndividuals {
        lowest: usize,
        required: usize,
        attempts: usize,
    },

    #[error("partition rejected by the sample condition after {attempts} attempts:\n{log}")]
    SampleCondition { attempts: usize, log: String },

    #[error("degenerate parameter estimation:\n{0}")]
    Degeneracy(String),

    #[error("{} individual(s) have a null observed probability in every class: {}", .0.len(), format_individuals(.0))]
    Unrepresentable(Vec<UnrepresentableIndividual>),

    #[error("no SEM trial succeeded, last failure: {0}")]
    NoSuccessfulTrial(Box<MixtError>),
}

fn format_individuals(list: &[UnrepresentableIndividual]) -> String {
    list.iter()
        .map(|ind| ind.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
