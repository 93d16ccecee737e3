use crate::data::GeneSelection;
use crate::forest::MtryPolicy;
use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::BufReader;

// Field definitions and associated default values

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Param {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub forest: Forest,
    #[serde(default)]
    pub permutation: Permutation,
    #[serde(default)]
    pub output: Output,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct General {
    #[serde(default = "seed_default")]
    pub seed: u64,
    #[serde(default = "one_default")]
    pub thread_number: usize,
    #[serde(default = "false_default")]
    pub verbose: bool,
    #[serde(default = "log_base_default")]
    pub log_base: String,
    #[serde(default = "log_suffix_default")]
    pub log_suffix: String,
    #[serde(default = "log_level_default")]
    pub log_level: String,
    #[serde(default = "true_default")]
    pub display_colorful: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct Data {
    #[serde(default = "empty_string")]
    pub X: String,
    #[serde(default = "true_default")]
    pub genes_in_rows: bool,
    #[serde(default)]
    pub regulators: Option<GeneSelection>,
    #[serde(default)]
    pub targets: Option<GeneSelection>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Forest {
    #[serde(default = "n_trees_default")]
    pub n_trees: usize,
    #[serde(default = "mtry_default")]
    pub mtry: MtryPolicy,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Permutation {
    #[serde(default = "n_permutations_default")]
    pub n_permutations: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Output {
    #[serde(default = "empty_string")]
    pub pvalues: String,
    #[serde(default = "empty_string")]
    pub fdr: String,
    #[serde(default = "empty_string")]
    pub save_exp: String,
    #[serde(default = "n_links_to_display_default")]
    pub n_links_to_display: usize,
}

// Default section definitions

impl Default for General {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Data {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Forest {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Permutation {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Output {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Param {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Param {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Read a YAML parameter file without validating it
pub fn load(param_file: &str) -> Result<Param, Box<dyn Error>> {
    let param_file_reader = File::open(param_file)?;
    let param_reader = BufReader::new(param_file_reader);

    let config: Param = serde_yaml::from_reader(param_reader)?;

    Ok(config)
}

pub fn get(param_file: &str) -> Result<Param, Box<dyn Error>> {
    let mut config = load(param_file)?;

    validate(&mut config)?;

    Ok(config)
}

/// Checks every numeric knob before any computation happens.
/// Errors name the offending parameter.
pub fn validate(param: &mut Param) -> Result<(), String> {
    if param.general.log_base.len() > 0 {
        param.general.display_colorful = false;
    }

    if param.forest.n_trees == 0 {
        return Err(format!(
            "Invalid n_trees={}. Must be a positive integer.",
            param.forest.n_trees
        ));
    }

    if param.permutation.n_permutations == 0 {
        return Err(format!(
            "Invalid n_permutations={}. Must be a positive integer.",
            param.permutation.n_permutations
        ));
    }

    if param.general.thread_number == 0 {
        return Err(format!(
            "Invalid thread_number={}. Must be a positive integer.",
            param.general.thread_number
        ));
    }

    if let MtryPolicy::Fixed(0) = param.forest.mtry {
        return Err("Invalid mtry=0. Must be \"sqrt\", \"all\" or a positive integer.".to_string());
    }

    validate_selection(&param.data.regulators, "regulators", 2)?;
    validate_selection(&param.data.targets, "targets", 1)?;

    const R_MIN: usize = 100;
    if param.permutation.n_permutations < R_MIN {
        warn!(
            "n_permutations={} < {}: the smallest reachable p-value is {:.4}, \
            which leaves little room for the FDR correction.",
            param.permutation.n_permutations,
            R_MIN,
            1.0 / (param.permutation.n_permutations as f64 + 1.0)
        );
    }

    Ok(())
}

fn validate_selection(selection: &Option<GeneSelection>, name: &str, min_len: usize) -> Result<(), String> {
    if let Some(selection) = selection {
        if selection.len() < min_len {
            return Err(format!(
                "Invalid {}: {} entries given, at least {} required.",
                name,
                selection.len(),
                min_len
            ));
        }
        if let Some(dup) = selection.first_duplicate() {
            return Err(format!("Invalid {}: duplicated entry {}.", name, dup));
        }
        if let GeneSelection::Indices(indices) = selection {
            if indices.contains(&0) {
                return Err(format!("Invalid {}: indices are 1-based, 0 is not allowed.", name));
            }
        }
    }
    Ok(())
}

// Default value definitions

fn seed_default() -> u64 {
    4815162342
}
fn empty_string() -> String {
    "".to_string()
}
fn log_base_default() -> String {
    "".to_string()
}
fn log_suffix_default() -> String {
    "log".to_string()
}
fn log_level_default() -> String {
    "info".to_string()
}
fn n_trees_default() -> usize {
    1000
}
fn mtry_default() -> MtryPolicy {
    MtryPolicy::Sqrt
}
fn n_permutations_default() -> usize {
    1000
}
fn n_links_to_display_default() -> usize {
    20
}
fn false_default() -> bool {
    false
}
fn true_default() -> bool {
    true
}
fn one_default() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_param_matches_documented_defaults() {
        let param = Param::default();
        assert_eq!(param.forest.n_trees, 1000);
        assert_eq!(param.forest.mtry, MtryPolicy::Sqrt);
        assert_eq!(param.permutation.n_permutations, 1000);
        assert_eq!(param.general.thread_number, 1);
        assert!(!param.general.verbose);
        assert!(param.data.regulators.is_none());
        assert!(param.data.targets.is_none());
    }

    #[test]
    fn test_yaml_parsing_with_all_sections() {
        let yaml = "
general:
  seed: 7
  thread_number: 4
  verbose: true
data:
  X: expr.tsv
  regulators: [tf1, tf2, tf3]
  targets: [1, 2]
forest:
  n_trees: 250
  mtry: all
permutation:
  n_permutations: 99
";
        let param: Param = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(param.general.seed, 7);
        assert_eq!(param.general.thread_number, 4);
        assert!(param.general.verbose);
        assert_eq!(param.data.X, "expr.tsv");
        assert_eq!(
            param.data.regulators,
            Some(GeneSelection::Names(vec!["tf1".to_string(), "tf2".to_string(), "tf3".to_string()]))
        );
        assert_eq!(param.data.targets, Some(GeneSelection::Indices(vec![1, 2])));
        assert_eq!(param.forest.n_trees, 250);
        assert_eq!(param.forest.mtry, MtryPolicy::All);
        assert_eq!(param.permutation.n_permutations, 99);
    }

    #[test]
    fn test_yaml_integer_mtry() {
        let param: Param = serde_yaml::from_str("forest:\n  mtry: 3\n").unwrap();
        assert_eq!(param.forest.mtry, MtryPolicy::Fixed(3));
    }

    #[test]
    fn test_yaml_rejects_unknown_mtry() {
        let err = serde_yaml::from_str::<Param>("forest:\n  mtry: log2\n").unwrap_err();
        assert!(err.to_string().contains("mtry"), "unexpected message: {}", err);
    }

    #[test]
    fn test_yaml_rejects_zero_mtry() {
        assert!(serde_yaml::from_str::<Param>("forest:\n  mtry: 0\n").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_trees() {
        let mut param = Param::default();
        param.forest.n_trees = 0;
        let err = validate(&mut param).unwrap_err();
        assert!(err.contains("n_trees"));
    }

    #[test]
    fn test_validate_rejects_zero_permutations() {
        let mut param = Param::default();
        param.permutation.n_permutations = 0;
        let err = validate(&mut param).unwrap_err();
        assert!(err.contains("n_permutations"));
    }

    #[test]
    fn test_validate_rejects_zero_threads() {
        let mut param = Param::default();
        param.general.thread_number = 0;
        let err = validate(&mut param).unwrap_err();
        assert!(err.contains("thread_number"));
    }

    #[test]
    fn test_validate_rejects_single_regulator() {
        let mut param = Param::default();
        param.data.regulators = Some(GeneSelection::Names(vec!["tf1".to_string()]));
        let err = validate(&mut param).unwrap_err();
        assert!(err.contains("regulators"));
    }

    #[test]
    fn test_validate_rejects_duplicated_regulators() {
        let mut param = Param::default();
        param.data.regulators = Some(GeneSelection::Indices(vec![1, 2, 2]));
        let err = validate(&mut param).unwrap_err();
        assert!(err.contains("duplicated"));
    }

    #[test]
    fn test_validate_rejects_zero_index() {
        let mut param = Param::default();
        param.data.targets = Some(GeneSelection::Indices(vec![0, 1]));
        let err = validate(&mut param).unwrap_err();
        assert!(err.contains("1-based"));
    }

    #[test]
    fn test_validate_disables_colors_when_logging_to_file() {
        let mut param = Param::default();
        param.general.log_base = "run".to_string();
        validate(&mut param).unwrap();
        assert!(!param.general.display_colorful);
    }
}
