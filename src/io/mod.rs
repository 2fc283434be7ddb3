/*!
Collaborators at the boundary of the engine.

Data comes in through a [`DataHandler`] (raw textual cells per variable) and, in prediction,
frozen parameters through a [`ParamSetter`]. Results leave through a [`DataExtractor`] and a
[`ParamExtractor`], which are pure sinks. In-memory implementations of all four are provided;
CSV sinks are available with the `csv` feature.

# Examples

```rust
use mixtcomp::data::{AugmentedData, MisVal};
use mixtcomp::io::{get_data, MemoryDataHandler};

let mut handler = MemoryDataHandler::new(3);
handler.add_variable("x", "Gaussian_sjk", &["1.5", "?", "[0:2]"]);
let mut aug = AugmentedData::<f64>::new();
get_data(&handler, "x", &mut aug, 0.0).unwrap();
assert_eq!(aug.data[0], 1.5);
assert_eq!(aug.mis_data[1], MisVal::Missing);
assert_eq!(aug.mis_data[2], MisVal::Interval(0.0, 2.0));
```
*/

mod memory;
pub mod parser;

#[cfg(feature = "csv")]
pub mod csv;

pub use memory::{MemoryDataHandler, MemoryExtractor, MemoryParamSetter, ParamExport, VarExport};
pub use parser::{parse_cell, ParsedValue};

use crate::data::{AugmentedData, DataValue, MisVal};
use crate::stats::DataStat;
use ndarray::ArrayView2;
use std::cmp::Ordering;

/// Source of the raw data of every variable.
pub trait DataHandler {
    fn nb_sample(&self) -> usize;

    /// `(variable id, model name)` couples in declaration order.
    fn variables(&self) -> Vec<(String, String)>;

    /// Raw cells and parameter string of a variable.
    fn raw_data(&self, id: &str) -> Option<(&[String], &str)>;
}

/// Source of parameters learned in a previous run.
pub trait ParamSetter {
    fn get_param(&self, id: &str, param_name: &str) -> Result<Vec<f64>, String>;
}

pub trait DataExtractor {
    /// Completed values of a variable and the statistics of its missing values.
    fn export_vals(&mut self, id: &str, completed: &[f64], stats: &[DataStat<f64>]);

    /// Named individual × class (or class × variable) matrices, such as `tik`.
    fn export_matrix(&mut self, name: &str, matrix: ArrayView2<f64>);
}

pub trait ParamExtractor {
    fn export_param(
        &mut self,
        id: &str,
        param_name: &str,
        stat_storage: ArrayView2<f64>,
        log_storage: ArrayView2<f64>,
        param_names: &[String],
        confidence_level: f64,
    );

    /// Run-level scalars: likelihoods, criteria, free parameter count.
    fn export_scalar(&mut self, name: &str, value: f64);
}

/// Fills `aug` with the parsed cells of variable `id`, shifting every value by `-offset`
/// (the first modality of categorical data is 1 on the wire, 0 in memory).
///
/// Returns the variable's parameter string. All malformed cells are reported together.
pub fn get_data<T: DataValue>(
    handler: &dyn DataHandler,
    id: &str,
    aug: &mut AugmentedData<T>,
    offset: f64,
) -> Result<String, String> {
    let (cells, param_str) = handler
        .raw_data(id)
        .ok_or_else(|| format!("variable {id} is not provided by the data handler.\n"))?;

    let convert = |i: usize, x: f64| -> Result<T, String> {
        T::from_real(x - offset).ok_or_else(|| {
            format!(
                "individual {i}: value {x} is not a valid {} value (offset {offset}).\n",
                T::TYPE_NAME
            )
        })
    };

    let mut warn_log = String::new();
    aug.resize_arrays(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        let parsed = parse_cell(cell).and_then(|parsed| match parsed {
            ParsedValue::Present(x) => convert(i, x).map(|v| (Some(v), MisVal::Present)),
            ParsedValue::Missing(mis_val) => {
                let mis_val = match mis_val {
                    MisVal::Present | MisVal::Missing => MisVal::Missing,
                    MisVal::FiniteValues(values) => {
                        let mut values = values
                            .into_iter()
                            .map(|x| convert(i, x))
                            .collect::<Result<Vec<_>, _>>()?;
                        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                        values.dedup();
                        MisVal::FiniteValues(values)
                    }
                    MisVal::Interval(lo, hi) => MisVal::Interval(convert(i, lo)?, convert(i, hi)?),
                    MisVal::LeftUnbounded(hi) => MisVal::LeftUnbounded(convert(i, hi)?),
                    MisVal::RightUnbounded(lo) => MisVal::RightUnbounded(convert(i, lo)?),
                };
                Ok((None, mis_val))
            }
        });
        match parsed {
            Ok((Some(value), _)) => aug.set_present(i, value),
            Ok((None, mis_val)) => aug.set_missing(i, mis_val),
            Err(e) => {
                warn_log += &format!("variable {id}, {e}");
                aug.set_missing(i, MisVal::Missing);
            }
        }
    }

    if warn_log.is_empty() {
        Ok(param_str.to_string())
    } else {
        Err(warn_log)
    }
}
