use super::{DataExtractor, DataHandler, ParamExtractor, ParamSetter};
use crate::stats::DataStat;
use ndarray::{Array2, ArrayView2};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Variable {
    id: String,
    model: String,
    param_str: String,
    cells: Vec<String>,
}

/// Raw data held in memory, one column of textual cells per variable.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataHandler {
    nb_sample: usize,
    variables: Vec<Variable>,
}

impl MemoryDataHandler {
    pub fn new(nb_sample: usize) -> Self {
        Self {
            nb_sample,
            variables: Vec::new(),
        }
    }

    pub fn add_variable<S: AsRef<str>>(&mut self, id: &str, model: &str, cells: &[S]) -> &mut Self {
        self.add_variable_with_param(id, model, "", cells)
    }

    pub fn add_variable_with_param<S: AsRef<str>>(
        &mut self,
        id: &str,
        model: &str,
        param_str: &str,
        cells: &[S],
    ) -> &mut Self {
        self.variables.push(Variable {
            id: id.to_string(),
            model: model.to_string(),
            param_str: param_str.to_string(),
            cells: cells.iter().map(|c| c.as_ref().to_string()).collect(),
        });
        self
    }
}

impl DataHandler for MemoryDataHandler {
    fn nb_sample(&self) -> usize {
        self.nb_sample
    }

    fn variables(&self) -> Vec<(String, String)> {
        self.variables
            .iter()
            .map(|v| (v.id.clone(), v.model.clone()))
            .collect()
    }

    fn raw_data(&self, id: &str) -> Option<(&[String], &str)> {
        self.variables
            .iter()
            .find(|v| v.id == id)
            .map(|v| (v.cells.as_slice(), v.param_str.as_str()))
    }
}

/// Parameters keyed by `(variable id, parameter name)`.
#[derive(Debug, Clone, Default)]
pub struct MemoryParamSetter {
    params: BTreeMap<(String, String), Vec<f64>>,
}

impl MemoryParamSetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_param(&mut self, id: &str, param_name: &str, values: Vec<f64>) -> &mut Self {
        self.params
            .insert((id.to_string(), param_name.to_string()), values);
        self
    }
}

impl ParamSetter for MemoryParamSetter {
    fn get_param(&self, id: &str, param_name: &str) -> Result<Vec<f64>, String> {
        self.params
            .get(&(id.to_string(), param_name.to_string()))
            .cloned()
            .ok_or_else(|| format!("parameter {param_name} of variable {id} is not available.\n"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarExport {
    pub completed: Vec<f64>,
    pub stats: Vec<DataStat<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamExport {
    pub stat: Array2<f64>,
    pub log: Array2<f64>,
    pub names: Vec<String>,
    pub confidence_level: f64,
}

/// Collects every export of a run.
#[derive(Debug, Clone, Default)]
pub struct MemoryExtractor {
    pub vals: BTreeMap<String, VarExport>,
    pub params: BTreeMap<(String, String), ParamExport>,
    pub matrices: BTreeMap<String, Array2<f64>>,
    pub scalars: BTreeMap<String, f64>,
}

impl MemoryExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(&self, id: &str, param_name: &str) -> Option<&ParamExport> {
        self.params.get(&(id.to_string(), param_name.to_string()))
    }

    /// Point estimates of every exported parameter, ready for a prediction run.
    pub fn to_param_setter(&self) -> MemoryParamSetter {
        let mut setter = MemoryParamSetter::new();
        for ((id, name), export) in &self.params {
            setter.set_param(id, name, export.stat.column(0).to_vec());
        }
        setter
    }
}

impl DataExtractor for MemoryExtractor {
    fn export_vals(&mut self, id: &str, completed: &[f64], stats: &[DataStat<f64>]) {
        self.vals.insert(
            id.to_string(),
            VarExport {
                completed: completed.to_vec(),
                stats: stats.to_vec(),
            },
        );
    }

    fn export_matrix(&mut self, name: &str, matrix: ArrayView2<f64>) {
        self.matrices.insert(name.to_string(), matrix.to_owned());
    }
}

impl ParamExtractor for MemoryExtractor {
    fn export_param(
        &mut self,
        id: &str,
        param_name: &str,
        stat_storage: ArrayView2<f64>,
        log_storage: ArrayView2<f64>,
        param_names: &[String],
        confidence_level: f64,
    ) {
        self.params.insert(
            (id.to_string(), param_name.to_string()),
            ParamExport {
                stat: stat_storage.to_owned(),
                log: log_storage.to_owned(),
                names: param_names.to_vec(),
                confidence_level,
            },
        );
    }

    fn export_scalar(&mut self, name: &str, value: f64) {
        self.scalars.insert(name.to_string(), value);
    }
}
