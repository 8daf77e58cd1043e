// src/tables.rs
//
// Flat result tables written as tab-separated text.

use crate::error::{FaciesError, FaciesResult};
use crate::validation::ValidationStatistics;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One named clustering, one label per observation.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelColumn {
    pub name: String,
    pub labels: Vec<usize>,
}

/// Per-observation table: the depth key followed by one label column per clustering,
/// rows in original (downcore) order.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultsTable {
    depth: Vec<f64>,
    columns: Vec<LabelColumn>,
}

impl ResultsTable {
    pub fn new(depth: Vec<f64>) -> Self {
        ResultsTable { depth, columns: Vec::new() }
    }

    pub fn n_rows(&self) -> usize {
        self.depth.len()
    }

    pub fn depth(&self) -> &[f64] {
        &self.depth
    }

    pub fn columns(&self) -> &[LabelColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&LabelColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn add_column(&mut self, name: &str, labels: Vec<usize>) -> FaciesResult<()> {
        if labels.len() != self.depth.len() {
            return Err(FaciesError::InvalidInput(format!(
                "Column '{}' has {} labels for {} rows.",
                name,
                labels.len(),
                self.depth.len()
            )));
        }
        if self.column(name).is_some() {
            return Err(FaciesError::InvalidInput(format!("Duplicate column '{}'.", name)));
        }
        self.columns.push(LabelColumn { name: name.to_string(), labels });
        Ok(())
    }

    pub fn write_tsv<W: Write>(&self, writer: &mut W) -> FaciesResult<()> {
        let mut header = String::from("depth");
        for column in &self.columns {
            header.push('\t');
            header.push_str(&column.name);
        }
        writeln!(writer, "{}", header).map_err(io_error)?;
        for (row, depth) in self.depth.iter().enumerate() {
            let mut line = depth.to_string();
            for column in &self.columns {
                line.push('\t');
                line.push_str(&column.labels[row].to_string());
            }
            writeln!(writer, "{}", line).map_err(io_error)?;
        }
        Ok(())
    }

    pub fn save_tsv<P: AsRef<Path>>(&self, path: P) -> FaciesResult<()> {
        save_with(path.as_ref(), |w| self.write_tsv(w))
    }
}

/// One row of validation statistics per clustering column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatisticsTable {
    rows: Vec<(String, ValidationStatistics)>,
}

impl StatisticsTable {
    pub fn rows(&self) -> &[(String, ValidationStatistics)] {
        &self.rows
    }

    pub fn get(&self, clustering: &str) -> Option<&ValidationStatistics> {
        self.rows.iter().find(|(name, _)| name == clustering).map(|(_, s)| s)
    }

    pub fn write_tsv<W: Write>(&self, writer: &mut W) -> FaciesResult<()> {
        writeln!(writer, "clustering\tchi_square\tdf\tp_value\tcramers_v").map_err(io_error)?;
        for (name, stats) in &self.rows {
            writeln!(
                writer,
                "{}\t{}\t{}\t{:e}\t{}",
                name, stats.chi_square, stats.degrees_of_freedom, stats.p_value, stats.cramers_v
            )
            .map_err(io_error)?;
        }
        Ok(())
    }

    pub fn save_tsv<P: AsRef<Path>>(&self, path: P) -> FaciesResult<()> {
        save_with(path.as_ref(), |w| self.write_tsv(w))
    }
}

impl FromIterator<(String, ValidationStatistics)> for StatisticsTable {
    fn from_iter<I: IntoIterator<Item = (String, ValidationStatistics)>>(iter: I) -> Self {
        StatisticsTable { rows: iter.into_iter().collect() }
    }
}

fn io_error(e: std::io::Error) -> FaciesError {
    FaciesError::Artifact(format!("Failed to write table: {}", e))
}

fn save_with<F>(path: &Path, write: F) -> FaciesResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> FaciesResult<()>,
{
    let file = File::create(path)
        .map_err(|e| FaciesError::Artifact(format!("Failed to create file at {:?}: {}", path, e)))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer.flush().map_err(io_error)
}
