//! Random forest regression and the split-candidate (mtry) policy.

use crate::tree::RegressionTree;
use crate::utils::round_half_up;
use log::warn;
use rand::seq::index::sample;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of predictors offered as split candidates at each node.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "MtryRepr", into = "MtryRepr")]
pub enum MtryPolicy {
    /// round(sqrt(n)), halves rounded up
    Sqrt,
    /// every usable predictor
    All,
    /// a fixed count, clamped to the usable predictors
    Fixed(usize),
}

/// Serialized form of [`MtryPolicy`]: a name or a count
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
pub enum MtryRepr {
    Count(i64),
    Name(String),
}

impl TryFrom<MtryRepr> for MtryPolicy {
    type Error = String;

    fn try_from(repr: MtryRepr) -> Result<Self, Self::Error> {
        match repr {
            MtryRepr::Count(k) if k >= 1 => Ok(MtryPolicy::Fixed(k as usize)),
            MtryRepr::Count(k) => Err(format!("invalid mtry {}: must be \"sqrt\", \"all\" or a positive integer", k)),
            MtryRepr::Name(name) => match name.as_str() {
                "sqrt" => Ok(MtryPolicy::Sqrt),
                "all" => Ok(MtryPolicy::All),
                other => match other.parse::<i64>() {
                    Ok(k) => MtryPolicy::try_from(MtryRepr::Count(k)),
                    Err(_) => Err(format!("invalid mtry {:?}: must be \"sqrt\", \"all\" or a positive integer", other)),
                },
            },
        }
    }
}

impl From<MtryPolicy> for MtryRepr {
    fn from(policy: MtryPolicy) -> Self {
        match policy {
            MtryPolicy::Sqrt => MtryRepr::Name("sqrt".to_string()),
            MtryPolicy::All => MtryRepr::Name("all".to_string()),
            MtryPolicy::Fixed(k) => MtryRepr::Count(k as i64),
        }
    }
}

impl MtryPolicy {
    /// Resolve the candidate count for `n_predictors` usable predictors
    pub fn resolve(&self, n_predictors: usize) -> usize {
        match self {
            MtryPolicy::Sqrt => round_half_up((n_predictors as f64).sqrt()).max(1),
            MtryPolicy::All => n_predictors,
            MtryPolicy::Fixed(k) => (*k).min(n_predictors),
        }
    }
}

impl fmt::Display for MtryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MtryPolicy::Sqrt => write!(f, "sqrt"),
            MtryPolicy::All => write!(f, "all"),
            MtryPolicy::Fixed(k) => write!(f, "{}", k),
        }
    }
}

/// Anything able to fit a tree ensemble and report one importance per predictor.
///
/// `x` is column-wise: `x[p]` holds predictor `p` for every sample and has the
/// same length as `y`. All randomness must come from `rng`.
pub trait EnsembleRegressor: Send + Sync {
    fn importance(&self, x: &[&[f64]], y: &[f64], mtry: usize, rng: &mut ChaCha8Rng) -> Result<Vec<f64>, String>;
}

/// Fraction of samples each tree is grown on, drawn without replacement
pub const SAMPLE_FRACTION: f64 = 0.632;

/// Forest of regression trees grown to full depth
#[derive(Debug, Clone, PartialEq)]
pub struct RandomForest {
    pub n_trees: usize,
    pub node_size: usize,
}

/// Fitted forest, kept for prediction and inspection
#[derive(Debug, Clone)]
pub struct FittedForest {
    pub trees: Vec<RegressionTree>,
    /// Mean increase in node purity per predictor
    pub importance: Vec<f64>,
}

impl RandomForest {
    pub fn new(n_trees: usize) -> RandomForest {
        RandomForest { n_trees, node_size: 1 }
    }

    /// Number of samples drawn for each tree
    pub fn sample_size(n_samples: usize) -> usize {
        ((n_samples as f64 * SAMPLE_FRACTION).ceil() as usize).clamp(1, n_samples.max(1))
    }

    pub fn fit(&self, x: &[&[f64]], y: &[f64], mtry: usize, rng: &mut ChaCha8Rng) -> Result<FittedForest, String> {
        if self.n_trees == 0 {
            return Err("n_trees must be > 0".to_string());
        }
        if x.is_empty() {
            return Err("no predictor to fit on".to_string());
        }
        if y.is_empty() {
            return Err("empty response".to_string());
        }
        if let Some(p) = x.iter().position(|column| column.len() != y.len()) {
            return Err(format!(
                "predictor {} has {} values for a response of length {}",
                p,
                x[p].len(),
                y.len()
            ));
        }
        if mtry == 0 {
            return Err("mtry must be > 0".to_string());
        }
        let mtry = if mtry > x.len() {
            warn!("mtry={} exceeds the {} available predictors, clamping", mtry, x.len());
            x.len()
        } else {
            mtry
        };

        let n_samples = y.len();
        let sample_size = Self::sample_size(n_samples);
        let mut importance = vec![0.0; x.len()];
        let mut trees = Vec::with_capacity(self.n_trees);

        for _ in 0..self.n_trees {
            let in_bag = sample(rng, n_samples, sample_size).into_vec();
            trees.push(RegressionTree::fit(x, y, &in_bag, mtry, self.node_size, rng, &mut importance));
        }

        for value in importance.iter_mut() {
            *value /= self.n_trees as f64;
        }

        Ok(FittedForest { trees, importance })
    }
}

impl EnsembleRegressor for RandomForest {
    fn importance(&self, x: &[&[f64]], y: &[f64], mtry: usize, rng: &mut ChaCha8Rng) -> Result<Vec<f64>, String> {
        Ok(self.fit(x, y, mtry, rng)?.importance)
    }
}

impl FittedForest {
    /// Average of the tree predictions for one row
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }
}
