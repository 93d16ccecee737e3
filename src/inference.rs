//! Per-target regulator p-values and their assembly into a network.

use crate::correction::fdr_adjust;
use crate::data::ExpressionData;
use crate::forest::{EnsembleRegressor, MtryPolicy};
use crate::network::Network;
use crate::param::Param;
use crate::permutation::permutation_pvalues;
use crate::utils::{derive_seeds, sample_sd};
use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// P-values and q-values of one target, keyed by gene index in the expression matrix
#[derive(Debug, Clone, PartialEq)]
pub struct TargetResult {
    pub target: usize,
    pub pvalues: Vec<(usize, f64)>,
    pub fdr: Vec<(usize, f64)>,
    pub mtry: usize,
}

/// Regulators usable for `target`: every regulator but the target itself
pub fn usable_regulators(regulators: &[usize], target: usize) -> Vec<usize> {
    regulators.iter().copied().filter(|&r| r != target).collect()
}

/// Target profile scaled to unit sample standard deviation
pub fn scaled_response(profile: &[f64]) -> Result<Vec<f64>, String> {
    let sd = sample_sd(profile);
    if !sd.is_finite() || sd <= 0.0 {
        return Err(format!("zero-variance response (sd={}), cannot scale to unit variance", sd));
    }
    Ok(profile.iter().map(|v| v / sd).collect())
}

/// Fit the regulators of one target against its scaled profile, estimate the
/// permutation p-values and adjust them for this target's column.
pub fn infer_target<R: EnsembleRegressor + ?Sized>(
    data: &ExpressionData,
    regulators: &[usize],
    target: usize,
    regressor: &R,
    mtry_policy: MtryPolicy,
    n_permutations: usize,
    seed: u64,
) -> Result<TargetResult, String> {
    let usable = usable_regulators(regulators, target);
    if usable.is_empty() {
        return Err(format!("no usable regulator left for target {}", data.genes[target]));
    }

    let mtry = mtry_policy.resolve(usable.len());
    let x: Vec<&[f64]> = usable.iter().map(|&r| data.profile(r)).collect();
    let y = scaled_response(data.profile(target))?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let estimate = permutation_pvalues(regressor, &x, &y, mtry, n_permutations, &mut rng)?;

    let pvalues: Vec<(usize, f64)> = usable.into_iter().zip(estimate.pvalues).collect();
    let fdr = fdr_adjust(&pvalues)?;

    Ok(TargetResult {
        target,
        pvalues,
        fdr,
        mtry,
    })
}

/// Infer the regulator x target network.
///
/// `regulators` and `targets` are gene indices already sorted by identifier.
/// Configuration problems abort before any fit; a target that fails at runtime
/// gets a NaN column and is listed in `failed_targets`.
pub fn infer_network<R: EnsembleRegressor + ?Sized>(
    data: &ExpressionData,
    regulators: &[usize],
    targets: &[usize],
    regressor: &R,
    param: &Param,
) -> Result<Network, String> {
    if regulators.len() < 2 {
        return Err(format!(
            "Invalid regulators: {} given, at least 2 required.",
            regulators.len()
        ));
    }
    if targets.is_empty() {
        return Err("Invalid targets: at least 1 required.".to_string());
    }
    if let Some(&t) = targets.iter().find(|&&t| usable_regulators(regulators, t).is_empty()) {
        return Err(format!("Invalid regulators: target {} has no regulator other than itself.", data.genes[t]));
    }
    if let MtryPolicy::Fixed(k) = param.forest.mtry {
        if k > regulators.len() {
            return Err(format!(
                "Invalid mtry: {} exceeds the {} regulators.",
                k,
                regulators.len()
            ));
        }
    }

    let mut master_rng = ChaCha8Rng::seed_from_u64(param.general.seed);
    let target_seeds = derive_seeds(&mut master_rng, targets.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(param.general.thread_number)
        .build()
        .map_err(|e| format!("Failed to build thread pool: {}", e))?;

    info!(
        "Inferring {} targets from {} regulators ({} permutations, mtry={}, {} threads)",
        targets.len(),
        regulators.len(),
        param.permutation.n_permutations,
        param.forest.mtry,
        param.general.thread_number
    );

    let done = AtomicUsize::new(0);
    let results: Vec<Result<TargetResult, String>> = pool.install(|| {
        targets
            .par_iter()
            .zip(target_seeds.par_iter())
            .map(|(&target, &seed)| {
                let result = infer_target(
                    data,
                    regulators,
                    target,
                    regressor,
                    param.forest.mtry,
                    param.permutation.n_permutations,
                    seed,
                );
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                if param.general.verbose {
                    info!("[{}/{}] target {} done", n, targets.len(), data.genes[target]);
                } else {
                    debug!("[{}/{}] target {} done", n, targets.len(), data.genes[target]);
                }
                result
            })
            .collect()
    });

    let mut network = Network::new(
        regulators.iter().map(|&r| data.genes[r].clone()).collect(),
        targets.iter().map(|&t| data.genes[t].clone()).collect(),
        param.forest.n_trees,
        param.permutation.n_permutations,
        param.forest.mtry,
        param.general.seed,
    );

    let row_of: HashMap<usize, usize> = regulators.iter().enumerate().map(|(row, &gene)| (gene, row)).collect();
    for (col, (result, &target)) in results.into_iter().zip(targets).enumerate() {
        match result {
            Ok(target_result) => {
                let to_rows = |entries: &[(usize, f64)]| -> Vec<(usize, f64)> {
                    entries.iter().filter_map(|&(gene, v)| row_of.get(&gene).map(|&row| (row, v))).collect()
                };
                network.set_column(col, &to_rows(&target_result.pvalues), &to_rows(&target_result.fdr));
            }
            Err(reason) => {
                warn!("Target {} failed: {}", data.genes[target], reason);
                network.fail_column(col, reason);
            }
        }
    }

    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::RandomForest;
    use crate::string_vec;
    use rand::Rng;
    use std::sync::Mutex;

    /// Records the mtry and predictor count it is called with
    struct RecordingRegressor {
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl EnsembleRegressor for RecordingRegressor {
        fn importance(&self, x: &[&[f64]], _y: &[f64], mtry: usize, _rng: &mut ChaCha8Rng) -> Result<Vec<f64>, String> {
            self.calls.lock().unwrap().push((x.len(), mtry));
            Ok(vec![1.0; x.len()])
        }
    }

    fn random_data(n_genes: usize, n_samples: usize) -> ExpressionData {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let genes: Vec<String> = (0..n_genes).map(|j| format!("g{:02}", j)).collect();
        let samples: Vec<String> = (0..n_samples).map(|i| format!("s{}", i)).collect();
        let profiles: Vec<Vec<f64>> = (0..n_genes)
            .map(|_| (0..n_samples).map(|_| rng.gen_range(0.0..10.0)).collect())
            .collect();
        ExpressionData::from_profiles(genes, samples, profiles).unwrap()
    }

    fn small_param(thread_number: usize) -> Param {
        let mut param = Param::default();
        param.general.seed = 42;
        param.general.thread_number = thread_number;
        param.forest.n_trees = 10;
        param.permutation.n_permutations = 9;
        param
    }

    #[test]
    fn test_usable_regulators_excludes_target() {
        assert_eq!(usable_regulators(&[0, 3, 5], 3), vec![0, 5]);
        assert_eq!(usable_regulators(&[0, 3, 5], 4), vec![0, 3, 5]);
        assert!(usable_regulators(&[2], 2).is_empty());
    }

    #[test]
    fn test_scaled_response_has_unit_sd() {
        let y = scaled_response(&[1.0, 4.0, 2.0, 8.0]).unwrap();
        assert!((sample_sd(&y) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_scaled_response_rejects_constant_profile() {
        let err = scaled_response(&[2.0, 2.0, 2.0]).unwrap_err();
        assert!(err.contains("zero-variance"));
        assert!(scaled_response(&[2.0]).is_err());
    }

    #[test]
    fn test_sqrt_mtry_with_nine_usable_regulators() {
        let data = random_data(10, 8);
        let regulators: Vec<usize> = (0..10).collect();
        let regressor = RecordingRegressor { calls: Mutex::new(Vec::new()) };

        let result = infer_target(&data, &regulators, 4, &regressor, MtryPolicy::Sqrt, 3, 7).unwrap();

        assert_eq!(result.mtry, 3);
        let calls = regressor.calls.lock().unwrap();
        assert_eq!(calls.len(), 4, "one reference fit and three permutations");
        assert!(calls.iter().all(|&(n, mtry)| n == 9 && mtry == 3));
    }

    #[test]
    fn test_infer_target_never_reports_the_target() {
        let data = random_data(5, 8);
        let regulators: Vec<usize> = (0..5).collect();
        let result = infer_target(&data, &regulators, 2, &RandomForest::new(5), MtryPolicy::All, 4, 1).unwrap();

        let rows: Vec<usize> = result.pvalues.iter().map(|(r, _)| *r).collect();
        assert_eq!(rows, vec![0, 1, 3, 4]);
        for ((_, p), (_, q)) in result.pvalues.iter().zip(result.fdr.iter()) {
            assert!(*p >= 0.2 && *p <= 1.0);
            assert!(q >= p);
        }
    }

    #[test]
    fn test_infer_target_fails_on_constant_target() {
        let data = ExpressionData::from_profiles(
            string_vec!["a", "b", "c"],
            string_vec!["s1", "s2", "s3"],
            vec![vec![1.0, 2.0, 3.0], vec![3.0, 1.0, 2.0], vec![5.0, 5.0, 5.0]],
        )
        .unwrap();
        let err = infer_target(&data, &[0, 1], 2, &RandomForest::new(5), MtryPolicy::Sqrt, 3, 1).unwrap_err();
        assert!(err.contains("zero-variance"));
    }

    #[test]
    fn test_infer_network_partial_failure() {
        let mut data = random_data(4, 8);
        data.profiles[3] = vec![1.0; 8];
        let param = small_param(1);
        let all: Vec<usize> = (0..4).collect();

        let network = infer_network(&data, &all, &all, &RandomForest::new(10), &param).unwrap();

        assert_eq!(network.failed_targets.len(), 1);
        assert_eq!(network.failed_targets[0].target, "g03");
        for row in 0..3 {
            assert!(network.pvalues[row][3].is_nan());
            assert!(network.pvalues[row][0].is_finite());
        }
        assert_eq!(network.pvalues[3][3], 0.0);
    }

    #[test]
    fn test_infer_network_rejects_single_regulator() {
        let data = random_data(4, 8);
        let err = infer_network(&data, &[1], &[0, 2], &RandomForest::new(5), &small_param(1)).unwrap_err();
        assert!(err.contains("regulators"));
    }

    #[test]
    fn test_infer_network_rejects_oversized_fixed_mtry() {
        let data = random_data(4, 8);
        let mut param = small_param(1);
        param.forest.mtry = MtryPolicy::Fixed(5);
        let err = infer_network(&data, &[0, 1, 2], &[3], &RandomForest::new(5), &param).unwrap_err();
        assert!(err.contains("mtry"));
    }

    #[test]
    fn test_infer_network_is_independent_of_thread_count() {
        let data = random_data(6, 10);
        let all: Vec<usize> = (0..6).collect();
        let forest = RandomForest::new(10);

        let single = infer_network(&data, &all, &all, &forest, &small_param(1)).unwrap();
        let multi = infer_network(&data, &all, &all, &forest, &small_param(3)).unwrap();

        assert!(single.same_matrices(&multi));
    }

    #[test]
    fn test_infer_network_scatters_rows_of_non_contiguous_regulators() {
        let data = random_data(6, 10);
        let regulators = vec![1, 3, 4];
        let targets = vec![0, 3];
        let param = small_param(2);
        let forest = RandomForest::new(10);

        let network = infer_network(&data, &regulators, &targets, &forest, &param).unwrap();

        let mut master_rng = ChaCha8Rng::seed_from_u64(param.general.seed);
        let seeds = derive_seeds(&mut master_rng, targets.len());
        for (col, (&target, &seed)) in targets.iter().zip(seeds.iter()).enumerate() {
            let expected = infer_target(&data, &regulators, target, &forest, param.forest.mtry, 9, seed).unwrap();
            for ((gene, p), (_, q)) in expected.pvalues.iter().zip(expected.fdr.iter()) {
                let row = regulators.iter().position(|r| r == gene).unwrap();
                assert_eq!(network.pvalues[row][col].to_bits(), p.to_bits());
                assert_eq!(network.fdr[row][col].to_bits(), q.to_bits());
            }
        }
        // g03 is both regulator (row 1) and target (column 1)
        assert_eq!(network.pvalues[1][1], 0.0);
    }
}
