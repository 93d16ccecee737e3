use rand::RngCore;
use rand_chacha::ChaCha8Rng;
use statrs::statistics::Statistics;

/// a macro to declare simple Vec<String>
#[macro_export]
macro_rules! string_vec {
    ($($x:expr),*) => {
        vec![$($x.into()),*]
    };
}

/// Sample standard deviation (n-1 denominator). NaN when fewer than 2 values.
pub fn sample_sd(values: &[f64]) -> f64 {
    values.iter().std_dev()
}

/// Round to the nearest integer, halves going up (2.5 -> 3).
pub fn round_half_up(x: f64) -> usize {
    if x <= 0.0 {
        return 0;
    }
    (x + 0.5).floor() as usize
}

/// Draw `n` seeds from a parent generator so that each child task gets its own
/// independent stream, whatever order the tasks are later scheduled in.
pub fn derive_seeds(rng: &mut ChaCha8Rng, n: usize) -> Vec<u64> {
    (0..n).map(|_| rng.next_u64()).collect()
}

/// Indices of `items` sorted by their value, ties kept in input order
pub fn argsort_by_name(items: &[String]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| items[a].cmp(&items[b]));
    order
}

/// Remove ANSI escape sequences unless colors are wanted
pub fn strip_ansi_if_needed(text: &str, colorful: bool) -> String {
    if colorful {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
