use crate::forest::EnsembleRegressor;
use crate::utils::derive_seeds;
use rand::seq::SliceRandom;
use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Observed importances and their permutation null distribution for one response
#[derive(Debug, Clone, PartialEq)]
pub struct NullEstimate {
    /// Importance of each predictor on the unpermuted response
    pub observed: Vec<f64>,
    /// `null_distribution[p][r]`: importance of predictor `p` in permutation `r`
    pub null_distribution: Vec<Vec<f64>>,
    /// Number of permutations where the importance reached the observed one
    pub exceed_counts: Vec<usize>,
    pub pvalues: Vec<f64>,
    pub n_permutations: usize,
}

/// Add-one empirical p-value: (count + 1) / (permutations + 1)
pub fn empirical_pvalue(exceed_count: usize, n_permutations: usize) -> f64 {
    (exceed_count as f64 + 1.0) / (n_permutations as f64 + 1.0)
}

/// Fit the regressor once on `y` and `n_permutations` times on shuffled copies
/// of `y`, then turn the observed importances into empirical p-values.
///
/// Each fit gets its own generator seeded from `rng` before any fit starts, so
/// the result does not depend on how rayon schedules the fits. Ties with the
/// observed importance count as exceedances.
pub fn permutation_pvalues<R: EnsembleRegressor + ?Sized>(
    regressor: &R,
    x: &[&[f64]],
    y: &[f64],
    mtry: usize,
    n_permutations: usize,
    rng: &mut ChaCha8Rng,
) -> Result<NullEstimate, String> {
    if n_permutations == 0 {
        return Err("To compute permutation p-values, permutations are needed (and currently set to 0)!".to_string());
    }

    let reference_seed = rng.next_u64();
    let permutation_seeds = derive_seeds(rng, n_permutations);

    let (observed, permuted) = rayon::join(
        || {
            let mut reference_rng = ChaCha8Rng::seed_from_u64(reference_seed);
            regressor.importance(x, y, mtry, &mut reference_rng)
        },
        || {
            permutation_seeds
                .par_iter()
                .map(|&seed| {
                    let mut permutation_rng = ChaCha8Rng::seed_from_u64(seed);
                    let mut y_permuted = y.to_vec();
                    y_permuted.shuffle(&mut permutation_rng);
                    regressor.importance(x, &y_permuted, mtry, &mut permutation_rng)
                })
                .collect::<Result<Vec<Vec<f64>>, String>>()
        },
    );
    let observed = observed?;
    let permuted = permuted?;

    if observed.len() != x.len() || permuted.iter().any(|imp| imp.len() != x.len()) {
        return Err(format!("regressor returned importances that do not match the {} predictors", x.len()));
    }

    let mut null_distribution = vec![Vec::with_capacity(n_permutations); x.len()];
    let mut exceed_counts = vec![0usize; x.len()];
    for importance in &permuted {
        for (p, &value) in importance.iter().enumerate() {
            null_distribution[p].push(value);
            if value >= observed[p] {
                exceed_counts[p] += 1;
            }
        }
    }

    let pvalues = exceed_counts.iter().map(|&c| empirical_pvalue(c, n_permutations)).collect();

    Ok(NullEstimate {
        observed,
        null_distribution,
        exceed_counts,
        pvalues,
        n_permutations,
    })
}
