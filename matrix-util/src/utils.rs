const DEFAULT_BLOCK_SIZE: usize = 1000;

/// Split `0..ntot` into contiguous blocks for parallel jobs
/// * `ntot` - number of total items
/// * `block_size` - items per job (0 falls back to a default)
pub fn create_jobs(ntot: usize, block_size: usize) -> Vec<(usize, usize)> {
    let block_size = if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    };
    let nblock = ntot.div_ceil(block_size);
    (0..nblock)
        .map(|block| {
            let lb = block * block_size;
            let ub = ((block + 1) * block_size).min(ntot);
            (lb, ub)
        })
        .collect()
}

/// Median of a slice of floats (NaN-free input assumed)
pub fn median_f32(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_jobs() {
        let jobs = create_jobs(10, 3);
        assert_eq!(jobs, vec![(0, 3), (3, 6), (6, 9), (9, 10)]);

        let jobs = create_jobs(6, 3);
        assert_eq!(jobs, vec![(0, 3), (3, 6)]);

        let jobs = create_jobs(1, 100);
        assert_eq!(jobs, vec![(0, 1)]);

        // block_size=0 should fall back to DEFAULT_BLOCK_SIZE
        let jobs = create_jobs(5, 0);
        assert_eq!(jobs, vec![(0, 5)]);
    }

    #[test]
    fn test_median_f32() {
        assert_eq!(median_f32(&[1.0, 3.0, 2.0]), 2.0);
        assert_eq!(median_f32(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(median_f32(&[5.0]), 5.0);
        assert_eq!(median_f32(&[]), 0.0);
    }
}
