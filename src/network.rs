use crate::forest::MtryPolicy;
use crate::utils::strip_ansi_if_needed;
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fmt;
use std::path::Path;

/// Value left in self-pair entries, which are never computed
pub const SELF_PAIR_VALUE: f64 = 0.0;

/// Which of the two matrices to export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    PValues,
    Fdr,
}

/// A target whose column could not be computed
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TargetFailure {
    pub target: String,
    pub reason: String,
}

/// One regulator -> target entry
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub regulator: String,
    pub target: String,
    pub pvalue: f64,
    pub fdr: f64,
}

/// Regulator x target p-value and FDR matrices with their run metadata.
///
/// `pvalues[r][t]` is the p-value of regulator `regulators[r]` for target
/// `targets[t]`. Self-pairs hold [`SELF_PAIR_VALUE`]; columns of failed targets
/// hold NaN elsewhere.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Network {
    /// Timestamp and run parameters
    pub id: String,
    pub timestamp: String,
    /// Crate version and git hash used
    pub version: String,
    /// Execution time in seconds
    pub execution_time: f64,

    pub regulators: Vec<String>,
    pub targets: Vec<String>,
    #[serde(with = "nan_matrix")]
    pub pvalues: Vec<Vec<f64>>,
    #[serde(with = "nan_matrix")]
    pub fdr: Vec<Vec<f64>>,
    pub failed_targets: Vec<TargetFailure>,

    pub n_trees: usize,
    pub n_permutations: usize,
    /// Split-candidate policy as configured ("sqrt", "all" or a count)
    pub mtry: String,
    pub seed: u64,
}

impl Network {
    pub fn new(
        regulators: Vec<String>,
        targets: Vec<String>,
        n_trees: usize,
        n_permutations: usize,
        mtry: MtryPolicy,
        seed: u64,
    ) -> Network {
        let matrix = vec![vec![SELF_PAIR_VALUE; targets.len()]; regulators.len()];
        Network {
            id: String::new(),
            timestamp: String::new(),
            version: String::new(),
            execution_time: 0.0,
            pvalues: matrix.clone(),
            fdr: matrix,
            regulators,
            targets,
            failed_targets: Vec::new(),
            n_trees,
            n_permutations,
            mtry: mtry.to_string(),
            seed,
        }
    }

    pub fn row_index(&self, regulator: &str) -> Option<usize> {
        self.regulators.iter().position(|r| r == regulator)
    }

    pub fn col_index(&self, target: &str) -> Option<usize> {
        self.targets.iter().position(|t| t == target)
    }

    pub fn is_self_pair(&self, row: usize, col: usize) -> bool {
        self.regulators[row] == self.targets[col]
    }

    pub fn is_failed(&self, target: &str) -> bool {
        self.failed_targets.iter().any(|f| f.target == target)
    }

    /// Scatter one target's p-values and q-values, keyed by row index
    pub fn set_column(&mut self, col: usize, pvalues: &[(usize, f64)], fdr: &[(usize, f64)]) {
        for &(row, p) in pvalues {
            self.pvalues[row][col] = p;
        }
        for &(row, q) in fdr {
            self.fdr[row][col] = q;
        }
    }

    /// Mark a target as failed: NaN everywhere in its column but the self-pair
    pub fn fail_column(&mut self, col: usize, reason: String) {
        for row in 0..self.regulators.len() {
            if !self.is_self_pair(row, col) {
                self.pvalues[row][col] = f64::NAN;
                self.fdr[row][col] = f64::NAN;
            }
        }
        self.failed_targets.push(TargetFailure {
            target: self.targets[col].clone(),
            reason,
        });
    }

    pub fn pvalue(&self, regulator: &str, target: &str) -> Option<f64> {
        Some(self.pvalues[self.row_index(regulator)?][self.col_index(target)?])
    }

    pub fn fdr(&self, regulator: &str, target: &str) -> Option<f64> {
        Some(self.fdr[self.row_index(regulator)?][self.col_index(target)?])
    }

    /// Computed links of one target, self-pair excluded
    pub fn column(&self, target: &str) -> Option<Vec<Link>> {
        let col = self.col_index(target)?;
        Some(
            (0..self.regulators.len())
                .filter(|&row| !self.is_self_pair(row, col))
                .map(|row| self.link(row, col))
                .collect(),
        )
    }

    /// Every computed link, self-pairs and failed targets excluded
    pub fn links(&self) -> Vec<Link> {
        let mut links = Vec::new();
        for col in 0..self.targets.len() {
            if self.is_failed(&self.targets[col]) {
                continue;
            }
            for row in 0..self.regulators.len() {
                if !self.is_self_pair(row, col) {
                    links.push(self.link(row, col));
                }
            }
        }
        links
    }

    fn link(&self, row: usize, col: usize) -> Link {
        Link {
            regulator: self.regulators[row].clone(),
            target: self.targets[col].clone(),
            pvalue: self.pvalues[row][col],
            fdr: self.fdr[row][col],
        }
    }

    /// Most significant links first: lowest q-value, then p-value, then names
    pub fn top_links(&self, n: usize) -> Vec<Link> {
        let mut links = self.links();
        links.sort_by(|a, b| {
            a.fdr
                .total_cmp(&b.fdr)
                .then(a.pvalue.total_cmp(&b.pvalue))
                .then_with(|| a.regulator.cmp(&b.regulator))
                .then_with(|| a.target.cmp(&b.target))
        });
        links.truncate(n);
        links
    }

    pub fn display(&self, n_links: usize, colorful: bool) -> String {
        let mut text = String::new();
        text.push_str(&format!("\n=============== Network {} ===============\n\n", self.id));
        text.push_str(&format!("grnperm version: v{}\n", self.version));
        text.push_str(&format!("Timestamp: {}\n", self.timestamp));
        text.push_str(&format!("Execution time: {:.2}s\n", self.execution_time));
        text.push_str(&format!(
            "{} regulators x {} targets | {} trees | mtry={} | {} permutations | seed {}\n",
            self.regulators.len(),
            self.targets.len(),
            self.n_trees,
            self.mtry,
            self.n_permutations,
            self.seed
        ));

        if !self.failed_targets.is_empty() {
            text.push_str(&format!("\x1b[1;91m{} failed target(s):\x1b[0m\n", self.failed_targets.len()));
            for failure in &self.failed_targets {
                text.push_str(&format!("  {}: {}\n", failure.target, failure.reason));
            }
        }

        let top = self.top_links(n_links);
        text.push_str(&format!("\n\x1b[1;93mTop {} links\x1b[0m\n", top.len()));
        text.push_str(&format!("{:<20} {:<20} {:>10} {:>10}\n", "regulator", "target", "p-value", "FDR"));
        for link in &top {
            let line = format!(
                "{:<20} {:<20} {:>10.4} {:>10.4}",
                link.regulator, link.target, link.pvalue, link.fdr
            );
            if link.fdr < 0.05 {
                text.push_str(&format!("\x1b[1;92m{}\x1b[0m\n", line));
            } else {
                text.push_str(&format!("{}\n", line));
            }
        }

        strip_ansi_if_needed(&text, colorful)
    }

    /// Write one matrix as a tab separated table: header of target ids, one
    /// row per regulator. Failed entries are written as NA.
    pub fn write_tsv<P: AsRef<Path>>(&self, path: P, table: Table) -> Result<(), Box<dyn Error>> {
        let matrix = match table {
            Table::PValues => &self.pvalues,
            Table::Fdr => &self.fdr,
        };
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;

        let mut header = vec![String::new()];
        header.extend(self.targets.iter().cloned());
        writer.write_record(&header)?;

        for (regulator, row) in self.regulators.iter().zip(matrix) {
            let mut record = vec![regulator.clone()];
            record.extend(row.iter().map(|v| if v.is_nan() { "NA".to_string() } else { v.to_string() }));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// SHA-256 over labels and matrix bits, identical for bit-identical runs
    pub fn fingerprint(&self) -> Result<String, Box<dyn Error>> {
        let to_bits = |m: &Vec<Vec<f64>>| -> Vec<Vec<u64>> { m.iter().map(|r| r.iter().map(|v| v.to_bits()).collect()).collect() };
        let encoded = bincode::serialize(&(&self.regulators, &self.targets, to_bits(&self.pvalues), to_bits(&self.fdr)))?;
        let mut hasher = Sha256::new();
        hasher.update(encoded);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Saves the network in a format chosen from the file extension
    pub fn save_auto<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();

        match ext.as_str() {
            "json" => self.save_json(path),
            "bin" | "bincode" => self.save_bincode(path),
            _ => {
                warn!("Unknown format. Saving network in json.");
                self.save_json(path.with_extension("json"))
            }
        }
    }

    fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let encoded = bincode::serialize(self)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    /// Loads a network, detecting the format from the file extension
    pub fn load_auto<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();

        match ext.as_str() {
            "json" => Self::load_json(path),
            "bin" | "bincode" => Self::load_bincode(path),
            _ => Self::load_with_fallback(path),
        }
    }

    fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let content = std::fs::read_to_string(path)?;
        let network: Network = serde_json::from_str(&content)?;
        Ok(network)
    }

    fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let bytes = std::fs::read(path)?;
        let network: Network = bincode::deserialize(&bytes)?;
        Ok(network)
    }

    fn load_with_fallback<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let path = path.as_ref();

        if let Ok(network) = Self::load_bincode(path) {
            return Ok(network);
        }

        if let Ok(network) = Self::load_json(path) {
            return Ok(network);
        }

        Err("Unable to load the network".into())
    }

    /// Same labels and bit-identical matrices
    pub fn same_matrices(&self, other: &Network) -> bool {
        let same = |a: &Vec<Vec<f64>>, b: &Vec<Vec<f64>>| {
            a.len() == b.len()
                && a.iter().zip(b).all(|(ra, rb)| {
                    ra.len() == rb.len() && ra.iter().zip(rb).all(|(x, y)| x.to_bits() == y.to_bits())
                })
        };
        self.regulators == other.regulators
            && self.targets == other.targets
            && same(&self.pvalues, &other.pvalues)
            && same(&self.fdr, &other.fdr)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display(20, false))
    }
}

/// JSON has no NaN: matrices go through `Option<f64>`, `None` standing for NaN.
mod nan_matrix {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(matrix: &[Vec<f64>], serializer: S) -> Result<S::Ok, S::Error> {
        let wrapped: Vec<Vec<Option<f64>>> = matrix
            .iter()
            .map(|row| row.iter().map(|v| if v.is_nan() { None } else { Some(*v) }).collect())
            .collect();
        wrapped.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<f64>>, D::Error> {
        let wrapped: Vec<Vec<Option<f64>>> = Vec::deserialize(deserializer)?;
        Ok(wrapped
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            .collect())
    }
}
