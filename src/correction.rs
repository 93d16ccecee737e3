//! False discovery rate control.

/// Benjamini-Hochberg step-up adjustment.
///
/// Sorts p-values, adjusts as `p * n / rank`, takes the running minimum from
/// the largest rank down and clamps to 1. Output keeps the input order.
pub fn benjamini_hochberg(p_values: &[f64]) -> Result<Vec<f64>, String> {
    validate_p_values(p_values)?;
    let n = p_values.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let n_f = n as f64;
    let mut adjusted = vec![0.0; n];
    let mut running_min = f64::INFINITY;
    for rank in (1..=n).rev() {
        let idx = order[rank - 1];
        let q = (p_values[idx] * n_f / rank as f64).min(1.0).min(running_min);
        adjusted[idx] = q;
        running_min = q;
    }

    Ok(adjusted)
}

/// Benjamini-Hochberg on a keyed column: same keys, same order, q-values in place
/// of p-values. `n` is the number of entries supplied.
pub fn fdr_adjust<K: Clone>(entries: &[(K, f64)]) -> Result<Vec<(K, f64)>, String> {
    let p_values: Vec<f64> = entries.iter().map(|(_, p)| *p).collect();
    let q_values = benjamini_hochberg(&p_values)?;
    Ok(entries.iter().zip(q_values).map(|((key, _), q)| (key.clone(), q)).collect())
}

fn validate_p_values(p_values: &[f64]) -> Result<(), String> {
    for (i, &p) in p_values.iter().enumerate() {
        if !(0.0..=1.0).contains(&p) {
            return Err(format!("p-value at index {} is out of range [0, 1]: {}", i, p));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-10;

    #[test]
    fn test_bh_known_values() {
        let p = [0.01, 0.04, 0.03, 0.005];
        let q = benjamini_hochberg(&p).unwrap();
        // sorted 0.005, 0.01, 0.03, 0.04 -> raw 0.02, 0.02, 0.04, 0.04
        assert!((q[3] - 0.02).abs() < TOL);
        assert!((q[0] - 0.02).abs() < TOL);
        assert!((q[2] - 0.04).abs() < TOL);
        assert!((q[1] - 0.04).abs() < TOL);
    }

    #[test]
    fn test_bh_running_minimum() {
        // raw: 0.02*3/1=0.06, 0.025*3/2=0.0375, 0.03*3/3=0.03
        let q = benjamini_hochberg(&[0.02, 0.025, 0.03]).unwrap();
        assert!(q.iter().all(|v| (v - 0.03).abs() < TOL), "{:?}", q);
    }

    #[test]
    fn test_bh_never_below_raw_pvalue() {
        let p = [0.1, 0.001, 0.05, 0.01, 0.5, 0.5, 1.0];
        let q = benjamini_hochberg(&p).unwrap();
        for (raw, adj) in p.iter().zip(q.iter()) {
            assert!(adj >= raw, "{} < {}", adj, raw);
            assert!(*adj <= 1.0);
        }
    }

    #[test]
    fn test_bh_monotone_in_raw_order() {
        let p = [0.1, 0.001, 0.05, 0.01, 0.5];
        let q = benjamini_hochberg(&p).unwrap();
        let mut pairs: Vec<(f64, f64)> = p.iter().copied().zip(q.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        for w in pairs.windows(2) {
            assert!(w[1].1 >= w[0].1 - TOL, "monotonicity violated: {:?}", w);
        }
    }

    #[test]
    fn test_bh_empty_and_single() {
        assert_eq!(benjamini_hochberg(&[]).unwrap(), Vec::<f64>::new());
        assert_eq!(benjamini_hochberg(&[0.2]).unwrap(), vec![0.2]);
    }

    #[test]
    fn test_bh_rejects_out_of_range() {
        assert!(benjamini_hochberg(&[0.5, 1.5]).is_err());
        assert!(benjamini_hochberg(&[-0.1]).is_err());
        assert!(benjamini_hochberg(&[f64::NAN]).is_err());
    }

    #[test]
    fn test_fdr_adjust_keeps_keys_and_order() {
        let entries = vec![("tf_b", 0.04), ("tf_a", 0.01), ("tf_c", 0.03), ("tf_d", 0.005)];
        let adjusted = fdr_adjust(&entries).unwrap();
        let keys: Vec<&str> = adjusted.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["tf_b", "tf_a", "tf_c", "tf_d"]);
        assert!((adjusted[0].1 - 0.04).abs() < TOL);
        assert!((adjusted[1].1 - 0.02).abs() < TOL);
        assert!((adjusted[3].1 - 0.02).abs() < TOL);
    }

    #[test]
    fn test_fdr_adjust_uses_supplied_count() {
        // n = 2, not the size of any larger regulator set
        let adjusted = fdr_adjust(&[(0usize, 0.01), (5usize, 0.02)]).unwrap();
        assert!((adjusted[0].1 - 0.02).abs() < TOL);
        assert!((adjusted[1].1 - 0.02).abs() < TOL);
    }
}
