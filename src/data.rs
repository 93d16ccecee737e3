use crate::utils::argsort_by_name;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;

/// Subset of genes given either by identifier or by 1-based position in the
/// expression matrix.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum GeneSelection {
    Indices(Vec<usize>),
    Names(Vec<String>),
}

impl GeneSelection {
    pub fn len(&self) -> usize {
        match self {
            GeneSelection::Indices(v) => v.len(),
            GeneSelection::Names(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First entry appearing twice, formatted for error messages
    pub fn first_duplicate(&self) -> Option<String> {
        match self {
            GeneSelection::Indices(v) => {
                let mut seen = HashSet::new();
                v.iter().find(|i| !seen.insert(**i)).map(|i| i.to_string())
            }
            GeneSelection::Names(v) => {
                let mut seen = HashSet::new();
                v.iter().find(|n| !seen.insert(n.as_str())).cloned()
            }
        }
    }
}

/// Expression matrix, genes x samples.
/// Values are stored gene by gene so that a gene profile (one column of the
/// samples x genes design matrix) is a contiguous slice.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpressionData {
    pub genes: Vec<String>,
    pub samples: Vec<String>,
    pub profiles: Vec<Vec<f64>>,
    pub gene_len: usize,
    pub sample_len: usize,
}

impl ExpressionData {
    /// Create a new `ExpressionData` instance with default values
    pub fn new() -> ExpressionData {
        ExpressionData {
            genes: Vec::new(),
            samples: Vec::new(),
            profiles: Vec::new(),
            gene_len: 0,
            sample_len: 0,
        }
    }

    /// Build from one profile per gene and check identifiers and shape
    pub fn from_profiles(genes: Vec<String>, samples: Vec<String>, profiles: Vec<Vec<f64>>) -> Result<ExpressionData, String> {
        let data = ExpressionData {
            gene_len: genes.len(),
            sample_len: samples.len(),
            genes,
            samples,
            profiles,
        };
        data.validate()?;
        Ok(data)
    }

    /// Load an expression TSV: first line holds sample identifiers, first column gene identifiers.
    /// With `genes_in_rows = false` the file is read as samples x genes and transposed.
    pub fn load_data(&mut self, X_path: &str, genes_in_rows: bool) -> Result<(), Box<dyn Error>> {
        info!("Loading expression file {}...", X_path);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_path(X_path)?;

        let mut records = reader.records();
        let header = match records.next() {
            Some(record) => record?,
            None => return Err(format!("{} is empty", X_path).into()),
        };
        let columns: Vec<String> = header.iter().skip(1).map(|s| s.trim().to_string()).collect();

        let mut rows: Vec<String> = Vec::new();
        let mut values: Vec<Vec<f64>> = Vec::new();
        for (line, record) in records.enumerate() {
            let record = record?;
            if record.len() == 1 && record[0].trim().is_empty() {
                continue;
            }
            if record.len() != columns.len() + 1 {
                return Err(format!(
                    "{}: line {} has {} fields, {} expected",
                    X_path,
                    line + 2,
                    record.len(),
                    columns.len() + 1
                )
                .into());
            }
            rows.push(record[0].trim().to_string());
            let mut row = Vec::with_capacity(columns.len());
            for (j, field) in record.iter().skip(1).enumerate() {
                let value: f64 = field.trim().parse().map_err(|_| {
                    format!("{}: non numeric value {:?} at line {}, column {}", X_path, field, line + 2, j + 2)
                })?;
                row.push(value);
            }
            values.push(row);
        }

        let loaded = if genes_in_rows {
            ExpressionData::from_profiles(rows, columns, values)?
        } else {
            DenseMatrix {
                row_names: rows,
                col_names: columns,
                values: values.into_iter().flatten().collect(),
                genes_in_rows: false,
            }
            .to_expression()?
        };
        *self = loaded;

        info!("{} genes x {} samples loaded", self.gene_len, self.sample_len);
        Ok(())
    }

    /// Reject empty or duplicated identifiers, ragged profiles and non-finite values
    pub fn validate(&self) -> Result<(), String> {
        if self.gene_len != self.genes.len() || self.sample_len != self.samples.len() {
            return Err("Inconsistent gene_len/sample_len with identifiers".to_string());
        }
        if self.gene_len == 0 || self.sample_len == 0 {
            return Err(format!(
                "Expression matrix is empty ({} genes x {} samples)",
                self.gene_len, self.sample_len
            ));
        }
        if self.profiles.len() != self.gene_len {
            return Err(format!(
                "Expression matrix has {} profiles for {} genes",
                self.profiles.len(),
                self.gene_len
            ));
        }
        check_identifiers(&self.genes, "gene")?;
        check_identifiers(&self.samples, "sample")?;
        for (gene, profile) in self.genes.iter().zip(self.profiles.iter()) {
            if profile.len() != self.sample_len {
                return Err(format!(
                    "Gene {} has {} values for {} samples",
                    gene,
                    profile.len(),
                    self.sample_len
                ));
            }
            if let Some(i) = profile.iter().position(|v| !v.is_finite()) {
                return Err(format!("Gene {} has a non-finite value for sample {}", gene, self.samples[i]));
            }
        }
        Ok(())
    }

    /// Expression profile of gene `j` across all samples
    pub fn profile(&self, j: usize) -> &[f64] {
        &self.profiles[j]
    }

    pub fn gene_index(&self, name: &str) -> Option<usize> {
        self.genes.iter().position(|g| g == name)
    }

    /// Resolve an optional selection into gene indices sorted by identifier.
    /// `None` means every gene. Names missing from the matrix are dropped with a
    /// warning, unless none is present.
    pub fn resolve_selection(&self, selection: Option<&GeneSelection>, what: &str, min_len: usize) -> Result<Vec<usize>, String> {
        let indices: Vec<usize> = match selection {
            None => (0..self.gene_len).collect(),
            Some(selection) => {
                if selection.len() < min_len {
                    return Err(format!(
                        "Invalid {}: {} entries given, at least {} required.",
                        what,
                        selection.len(),
                        min_len
                    ));
                }
                if let Some(dup) = selection.first_duplicate() {
                    return Err(format!("Invalid {}: duplicated entry {}.", what, dup));
                }
                match selection {
                    GeneSelection::Indices(positions) => {
                        if let Some(bad) = positions.iter().find(|&&p| p == 0 || p > self.gene_len) {
                            return Err(format!(
                                "Invalid {}: index {} out of range 1..={}.",
                                what, bad, self.gene_len
                            ));
                        }
                        positions.iter().map(|p| p - 1).collect()
                    }
                    GeneSelection::Names(names) => {
                        let lookup: HashMap<&str, usize> =
                            self.genes.iter().enumerate().map(|(j, g)| (g.as_str(), j)).collect();
                        let found: Vec<usize> = names.iter().filter_map(|n| lookup.get(n.as_str()).copied()).collect();
                        if found.is_empty() {
                            return Err(format!("Invalid {}: none of the {} given genes is in the expression matrix.", what, names.len()));
                        }
                        if found.len() < names.len() {
                            let missing: Vec<&String> = names.iter().filter(|n| !lookup.contains_key(n.as_str())).collect();
                            warn!(
                                "{} of {} {} are not in the expression matrix and are ignored: {:?}",
                                missing.len(),
                                names.len(),
                                what,
                                missing
                            );
                        }
                        found
                    }
                }
            }
        };

        if indices.len() < min_len {
            return Err(format!(
                "Invalid {}: {} genes remain after matching the expression matrix, at least {} required.",
                what,
                indices.len(),
                min_len
            ));
        }

        let names: Vec<String> = indices.iter().map(|&j| self.genes[j].clone()).collect();
        Ok(argsort_by_name(&names).into_iter().map(|k| indices[k]).collect())
    }
}

fn check_identifiers(ids: &[String], what: &str) -> Result<(), String> {
    let mut seen = HashSet::new();
    for (i, id) in ids.iter().enumerate() {
        if id.is_empty() {
            return Err(format!("Missing {} identifier at position {}", what, i + 1));
        }
        if !seen.insert(id.as_str()) {
            return Err(format!("Duplicated {} identifier {}", what, id));
        }
    }
    Ok(())
}

/// Anything that can be turned into a labelled genes x samples matrix.
pub trait ExpressionSource {
    fn to_expression(&self) -> Result<ExpressionData, String>;
}

impl ExpressionSource for ExpressionData {
    fn to_expression(&self) -> Result<ExpressionData, String> {
        self.validate()?;
        Ok(self.clone())
    }
}

/// Dense row-major table with row and column labels.
/// Rows are genes when `genes_in_rows`, samples otherwise.
#[derive(Clone, Debug)]
pub struct DenseMatrix {
    pub row_names: Vec<String>,
    pub col_names: Vec<String>,
    pub values: Vec<f64>,
    pub genes_in_rows: bool,
}

impl ExpressionSource for DenseMatrix {
    fn to_expression(&self) -> Result<ExpressionData, String> {
        let (n_rows, n_cols) = (self.row_names.len(), self.col_names.len());
        if self.values.len() != n_rows * n_cols {
            return Err(format!(
                "Dense matrix holds {} values for {} x {} labels",
                self.values.len(),
                n_rows,
                n_cols
            ));
        }
        let rows: Vec<&[f64]> = if n_cols == 0 { Vec::new() } else { self.values.chunks(n_cols).collect() };
        if self.genes_in_rows {
            ExpressionData::from_profiles(
                self.row_names.clone(),
                self.col_names.clone(),
                rows.iter().map(|r| r.to_vec()).collect(),
            )
        } else {
            let profiles: Vec<Vec<f64>> = (0..n_cols).map(|j| rows.iter().map(|r| r[j]).collect()).collect();
            ExpressionData::from_profiles(self.col_names.clone(), self.row_names.clone(), profiles)
        }
    }
}

/// Sparse table keyed by (sample, gene), absent entries read as 0.
#[derive(Clone, Debug)]
#[allow(non_snake_case)]
pub struct SparseMatrix {
    pub X: HashMap<(usize, usize), f64>,
    pub genes: Vec<String>,
    pub samples: Vec<String>,
}

impl ExpressionSource for SparseMatrix {
    fn to_expression(&self) -> Result<ExpressionData, String> {
        if let Some(&(i, j)) = self.X.keys().find(|(i, j)| *i >= self.samples.len() || *j >= self.genes.len()) {
            return Err(format!("Sparse entry ({}, {}) is outside the {} x {} labels", i, j, self.samples.len(), self.genes.len()));
        }
        let profiles: Vec<Vec<f64>> = (0..self.genes.len())
            .map(|j| (0..self.samples.len()).map(|i| self.X.get(&(i, j)).copied().unwrap_or(0.0)).collect())
            .collect();
        ExpressionData::from_profiles(self.genes.clone(), self.samples.clone(), profiles)
    }
}

impl fmt::Display for ExpressionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Genes: {}   Samples: {}", self.gene_len, self.sample_len)?;

        let samples_string = self.samples.join("\t");
        let truncated_samples = truncate_for_display(samples_string, 100);

        writeln!(f, "X:                  {}", truncated_samples)?;
        // Limit to the first 20 rows
        for (gene, profile) in self.genes.iter().zip(self.profiles.iter()).take(20) {
            let row_display: String = profile.iter().map(|v| format!("{:.2}", v)).collect::<Vec<_>>().join("\t");

            let truncated_row = truncate_for_display(row_display, 80);

            writeln!(f, "{:<20} {}", gene, truncated_row)?;
        }

        Ok(())
    }
}

/// Cut to at most `max_chars` characters, ending with "..." when cut
fn truncate_for_display(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

impl fmt::Debug for ExpressionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the Display formatter
        write!(f, "{}", self)
    }
}
