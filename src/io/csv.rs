/*!
# CSV sinks for the results of a run

Enable via the `csv` feature. Every export becomes one file in the output directory:

- `<variable>_data.csv`: individual, completed value, and the estimate and bounds of the
  missing values,
- `<variable>_param.csv`: parameter name, estimate, lower and upper bound,
- `<matrix>.csv` for the named matrices (`tik`, `IDClass`, ...),
- `scalars.csv` for the likelihoods and criteria.

The extractor traits have no return value, so write failures are collected and can be
inspected with [`CsvExtractor::errors`].
*/

use super::{DataExtractor, ParamExtractor};
use crate::stats::DataStat;
use csv::Writer;
use ndarray::ArrayView2;
use std::collections::BTreeMap;
use std::error::Error;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Writes a header and rows to `path`.
fn save_rows(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_writer(File::create(path)?);
    wtr.write_record(header)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/**
Writes every export of a run as CSV files in one directory.

# Examples

```rust
use mixtcomp::io::csv::CsvExtractor;
use mixtcomp::io::DataExtractor;

let dir = std::env::temp_dir().join("mixtcomp_doc_csv");
let mut ex = CsvExtractor::new(&dir)?;
ex.export_vals("x", &[1.0, 2.5], &[]);
assert!(ex.errors().is_empty());
assert!(dir.join("x_data.csv").exists());
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
#[derive(Debug)]
pub struct CsvExtractor {
    dir: PathBuf,
    scalars: BTreeMap<String, f64>,
    errors: Vec<String>,
}

impl CsvExtractor {
    /// Creates the output directory if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, Box<dyn Error>> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            scalars: BTreeMap::new(),
            errors: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write failures, one message per file.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    fn save(&mut self, file_name: &str, header: &[String], rows: &[Vec<String>]) {
        let path = self.dir.join(file_name);
        if let Err(e) = save_rows(&path, header, rows) {
            self.errors.push(format!("{}: {e}", path.display()));
        }
    }
}

fn header(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl DataExtractor for CsvExtractor {
    fn export_vals(&mut self, id: &str, completed: &[f64], stats: &[DataStat<f64>]) {
        let by_ind: BTreeMap<usize, &DataStat<f64>> = stats.iter().map(|s| (s.individual, s)).collect();
        let rows: Vec<Vec<String>> = completed
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let mut row = vec![i.to_string(), value.to_string()];
                match by_ind.get(&i) {
                    Some(s) => row.extend([s.estimate, s.lower, s.upper].map(|v| v.to_string())),
                    None => row.extend(std::iter::repeat(String::new()).take(3)),
                }
                row
            })
            .collect();
        self.save(
            &format!("{id}_data.csv"),
            &header(&["individual", "value", "estimate", "lower", "upper"]),
            &rows,
        );
    }

    fn export_matrix(&mut self, name: &str, matrix: ArrayView2<f64>) {
        let header: Vec<String> = (0..matrix.ncols()).map(|j| format!("col_{j}")).collect();
        let rows: Vec<Vec<String>> = matrix
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect();
        self.save(&format!("{name}.csv"), &header, &rows);
    }
}

impl ParamExtractor for CsvExtractor {
    fn export_param(
        &mut self,
        id: &str,
        _param_name: &str,
        stat_storage: ArrayView2<f64>,
        _log_storage: ArrayView2<f64>,
        param_names: &[String],
        _confidence_level: f64,
    ) {
        let rows: Vec<Vec<String>> = stat_storage
            .rows()
            .into_iter()
            .enumerate()
            .map(|(p, stat)| {
                let name = param_names.get(p).cloned().unwrap_or_else(|| p.to_string());
                let mut row = vec![name];
                row.extend((0..3).map(|c| stat.get(c).map(|v| v.to_string()).unwrap_or_default()));
                row
            })
            .collect();
        self.save(
            &format!("{id}_param.csv"),
            &header(&["parameter", "estimate", "lower", "upper"]),
            &rows,
        );
    }

    fn export_scalar(&mut self, name: &str, value: f64) {
        self.scalars.insert(name.to_string(), value);
        let rows: Vec<Vec<String>> = self
            .scalars
            .iter()
            .map(|(name, value)| vec![name.clone(), value.to_string()])
            .collect();
        self.save("scalars.csv", &header(&["name", "value"]), &rows);
    }
}
