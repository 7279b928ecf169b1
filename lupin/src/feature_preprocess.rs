use crate::lupin_common::*;
use data_beans::sparse_util::{csr_column_mean_var, csr_to_dense};
use matrix_util::dmatrix_pca::pca_scores;

use nalgebra_sparse::CscMatrix;
use rayon::prelude::*;
use std::cmp::Ordering;

const TARGET_SUM: f32 = 1e4;
const LOESS_SPAN: f64 = 0.3;
const DISPERSION_BINS: usize = 20;

/// How raw expression turns into features
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionPolicy {
    /// raw counts: Seurat v3 genes, depth normalization, `log1p`,
    /// per-gene scaling
    Counts,
    /// already transformed values: dispersion-ranked genes, used as is
    Generic,
}

impl ExpressionPolicy {
    pub fn from_data_type(data_type: Option<&str>) -> Self {
        match data_type {
            Some("count") | Some("counts") => ExpressionPolicy::Counts,
            _ => ExpressionPolicy::Generic,
        }
    }
}

/// Expression of every gene after preprocessing, plus the selected
/// highly variable genes
pub struct PreprocessedExpression {
    pub policy: ExpressionPolicy,
    /// selected genes, in gene order
    pub hvg: Vec<usize>,
    /// variability score of each gene (NaN if it could not be scored)
    pub scores: Vec<f32>,
    /// cells x genes
    pub expr_nd: Mat,
}

/// Select highly variable genes and transform the expression
///
/// * `data` - dataset
/// * `data_type` - layer to read; `count(s)` selects [`ExpressionPolicy::Counts`]
/// * `feat_cell` - number of genes to keep (at most all of them)
pub fn preprocess_expression(
    data: &SpatialData,
    data_type: Option<&str>,
    feat_cell: usize,
) -> anyhow::Result<PreprocessedExpression> {
    let policy = ExpressionPolicy::from_data_type(data_type);

    let (x, found) = data.expression(data_type);
    if let (Some(layer), false) = (data_type, found) {
        warn!("layer {} not found; using X", layer);
    }

    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(LupinError::data(format!(
            "empty expression matrix: {} x {}",
            x.nrows(),
            x.ncols()
        )));
    }
    if x.values().iter().any(|v| !v.is_finite()) {
        return Err(LupinError::data("expression has non-finite values"));
    }

    let n_top = feat_cell.min(x.ncols());

    let (scores, expr_nd) = match policy {
        ExpressionPolicy::Counts => {
            if x.values().iter().any(|&v| v < 0.0) {
                return Err(LupinError::data("count data has negative values"));
            }
            (seurat_v3_scores(x), normalize_log1p_scale(x))
        }
        ExpressionPolicy::Generic => (dispersion_scores(x), csr_to_dense(x)),
    };

    let hvg = top_genes(&scores, n_top);

    info!(
        "{:?} policy: {} of {} genes selected",
        policy,
        hvg.len(),
        scores.len()
    );

    Ok(PreprocessedExpression {
        policy,
        hvg,
        scores,
        expr_nd,
    })
}

impl PreprocessedExpression {
    /// Selected genes, optionally reduced to `n_comps` principal
    /// components
    pub fn feature_matrix(&self, input_pca: bool, n_comps: usize, seed: u64) -> anyhow::Result<Mat> {
        let hvg_nd = self.expr_nd.select_columns(self.hvg.iter());
        let ret = if input_pca {
            pca_scores(&hvg_nd, n_comps, seed)?
        } else {
            hvg_nd
        };
        if ret.has_non_finite() {
            return Err(LupinError::data("feature matrix has non-finite values"));
        }
        Ok(ret)
    }

    /// Principal component scores over every gene
    pub fn pca(&self, n_comps: usize, seed: u64) -> anyhow::Result<Mat> {
        pca_scores(&self.expr_nd, n_comps, seed)
    }
}

/// Indices of the `n_top` largest scores, returned in gene order;
/// ties go to the smaller index and NaN ranks last
pub fn top_genes(scores: &[f32], n_top: usize) -> Vec<usize> {
    let key = |x: f32| if x.is_nan() { f32::NEG_INFINITY } else { x };
    let mut order = (0..scores.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| {
        key(scores[b])
            .partial_cmp(&key(scores[a]))
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    let mut ret = order.into_iter().take(n_top).collect::<Vec<_>>();
    ret.sort_unstable();
    ret
}

/// Seurat v3 variance: standardized variance of counts after clipping
/// at `sqrt(n)` regularized standard deviations, where the expected
/// variance comes from a running-lines fit of `log10(var)` on
/// `log10(mean)`
fn seurat_v3_scores(x: &CsrMat) -> Vec<f32> {
    let nn = x.nrows() as f64;
    let dd = x.ncols();
    if x.nrows() < 2 {
        return vec![0.0; dd];
    }

    let csc = CscMatrix::from(x);

    let (mean, var): (Vec<f64>, Vec<f64>) = (0..dd)
        .into_par_iter()
        .map(|g| {
            let col = csc.col(g);
            let (s1, s2) = col.values().iter().fold((0f64, 0f64), |(s1, s2), &v| {
                let v = v as f64;
                (s1 + v, s2 + v * v)
            });
            let mu = s1 / nn;
            let var = ((s2 - nn * mu * mu) / (nn - 1.0)).max(0.0);
            (mu, var)
        })
        .unzip();

    let varying = (0..dd).filter(|&g| var[g] > 0.0).collect::<Vec<_>>();
    let log_mean = varying.iter().map(|&g| mean[g].log10()).collect::<Vec<_>>();
    let log_var = varying.iter().map(|&g| var[g].log10()).collect::<Vec<_>>();
    let fitted = running_lines(&log_mean, &log_var, LOESS_SPAN);

    let mut reg_std = vec![1f64; dd];
    for (&g, &f) in varying.iter().zip(fitted.iter()) {
        reg_std[g] = 10f64.powf(f).sqrt();
    }

    (0..dd)
        .into_par_iter()
        .map(|g| {
            let mu = mean[g];
            let sd = reg_std[g];
            let clip = sd * nn.sqrt() + mu;
            let (s1, s2) = csc.col(g).values().iter().fold((0f64, 0f64), |(s1, s2), &v| {
                let v = (v as f64).min(clip);
                (s1 + v, s2 + v * v)
            });
            let num = nn * mu * mu + s2 - 2.0 * s1 * mu;
            (num / ((nn - 1.0) * sd * sd)) as f32
        })
        .collect()
}

/// Local linear fit of `y` on `x` using the `span` fraction of points
/// nearest in `x` rank; returns the fitted value at every point
fn running_lines(x: &[f64], y: &[f64], span: f64) -> Vec<f64> {
    let m = x.len();
    if m == 0 {
        return vec![];
    }

    let mut order = (0..m).collect::<Vec<_>>();
    order.sort_by(|&a, &b| x[a].partial_cmp(&x[b]).unwrap_or(Ordering::Equal).then(a.cmp(&b)));

    let xs = order.iter().map(|&i| x[i]).collect::<Vec<_>>();
    let ys = order.iter().map(|&i| y[i]).collect::<Vec<_>>();

    // prefix sums of 1, x, y, xx, xy
    let mut cum = vec![[0f64; 4]; m + 1];
    for r in 0..m {
        let (a, b) = (xs[r], ys[r]);
        let prev = cum[r];
        cum[r + 1] = [prev[0] + a, prev[1] + b, prev[2] + a * a, prev[3] + a * b];
    }

    let width = ((span * m as f64).ceil() as usize).clamp(3.min(m), m);

    let mut ret = vec![0f64; m];
    for r in 0..m {
        let lb = r.saturating_sub(width / 2).min(m - width);
        let ub = lb + width;
        let w = width as f64;
        let sx = cum[ub][0] - cum[lb][0];
        let sy = cum[ub][1] - cum[lb][1];
        let sxx = cum[ub][2] - cum[lb][2];
        let sxy = cum[ub][3] - cum[lb][3];

        let (mx, my) = (sx / w, sy / w);
        let vxx = sxx / w - mx * mx;
        let cxy = sxy / w - mx * my;

        ret[order[r]] = if vxx > 1e-12 {
            my + cxy / vxx * (xs[r] - mx)
        } else {
            my
        };
    }
    ret
}

/// Seurat dispersion: `log(var / mean)` of `expm1(x)`, z-scored among
/// genes of similar mean (equal-width bins of `log1p(mean)`)
fn dispersion_scores(x: &CsrMat) -> Vec<f32> {
    let nn = x.nrows() as f32;
    let (mean, var) = csr_column_mean_var(x, f32::exp_m1);
    let ddof = if x.nrows() > 1 { nn / (nn - 1.0) } else { 1.0 };

    let (log_mean, disp): (Vec<f32>, Vec<f32>) = mean
        .iter()
        .zip(var.iter())
        .map(|(&mu, &v)| {
            let mu = if mu == 0.0 { 1e-12 } else { mu };
            let d = v * ddof / mu;
            let d = if d == 0.0 { f32::NAN } else { d.ln() };
            (mu.ln_1p(), d)
        })
        .unzip();

    let lo = log_mean.iter().cloned().fold(f32::INFINITY, f32::min);
    let hi = log_mean.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let bin_width = (hi - lo) / DISPERSION_BINS as f32;

    let bin_of = |m: f32| -> usize {
        if bin_width > 0.0 {
            (((m - lo) / bin_width) as usize).min(DISPERSION_BINS - 1)
        } else {
            0
        }
    };

    let mut stat = vec![(0usize, 0f64, 0f64); DISPERSION_BINS];
    for (&m, &d) in log_mean.iter().zip(disp.iter()) {
        if d.is_finite() {
            let s = &mut stat[bin_of(m)];
            s.0 += 1;
            s.1 += d as f64;
            s.2 += (d as f64) * (d as f64);
        }
    }

    let bin_mean_sd = stat
        .iter()
        .map(|&(n, s1, s2)| {
            if n == 0 {
                (f64::NAN, f64::NAN)
            } else if n == 1 {
                // a lone gene is its own scale
                (0.0, s1)
            } else {
                let mu = s1 / n as f64;
                let var = ((s2 - n as f64 * mu * mu) / (n as f64 - 1.0)).max(0.0);
                (mu, var.sqrt())
            }
        })
        .collect::<Vec<_>>();

    log_mean
        .iter()
        .zip(disp.iter())
        .map(|(&m, &d)| {
            let (mu, sd) = bin_mean_sd[bin_of(m)];
            let z = (d as f64 - mu) / sd;
            if z.is_finite() {
                z as f32
            } else {
                f32::NAN
            }
        })
        .collect()
}

/// Scale each cell to [`TARGET_SUM`], `log1p`, then standardize each
/// gene (genes without variance become zero)
fn normalize_log1p_scale(x: &CsrMat) -> Mat {
    let mut ret = Mat::zeros(x.nrows(), x.ncols());
    for (i, row) in x.row_iter().enumerate() {
        let total: f32 = row.values().iter().sum();
        if total <= 0.0 {
            continue;
        }
        let s = TARGET_SUM / total;
        for (&j, &v) in row.col_indices().iter().zip(row.values()) {
            ret[(i, j)] = (v * s).ln_1p();
        }
    }
    ret.scale_columns_inplace();
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use data_beans::simulate::*;
    use data_beans::sparse_util::csr_from_dense;

    fn simulated() -> SpatialData {
        generate_spatial_data(&SimSpatialArgs::default()).unwrap().data
    }

    #[test]
    fn width_and_finiteness_for_both_policies() -> anyhow::Result<()> {
        let data = simulated();
        for data_type in [Some("counts"), None] {
            let prep = preprocess_expression(&data, data_type, 20)?;
            let feat = prep.feature_matrix(false, 10, 1)?;
            assert_eq!(feat.shape(), (100, 20));
            assert!(!feat.has_non_finite());

            let feat = prep.feature_matrix(true, 10, 1)?;
            assert_eq!(feat.shape(), (100, 10));
            assert!(!feat.has_non_finite());

            let pcs = prep.pca(10, 1)?;
            assert_eq!(pcs.shape(), (100, 10));
        }
        Ok(())
    }

    #[test]
    fn feature_count_is_capped_by_genes() -> anyhow::Result<()> {
        let data = simulated();
        let prep = preprocess_expression(&data, Some("counts"), 3000)?;
        assert_eq!(prep.hvg.len(), 50);
        assert_eq!(prep.feature_matrix(false, 10, 1)?.ncols(), 50);
        Ok(())
    }

    #[test]
    fn counts_policy_finds_marker_genes() -> anyhow::Result<()> {
        let data = simulated();
        let prep = preprocess_expression(&data, Some("counts"), 15)?;
        assert_eq!(prep.policy, ExpressionPolicy::Counts);
        // markers are genes 0..15 in the simulation
        let hits = prep.hvg.iter().filter(|&&g| g < 15).count();
        assert!(hits >= 10, "only {} markers among {:?}", hits, prep.hvg);
        Ok(())
    }

    #[test]
    fn scaled_genes_are_standardized() -> anyhow::Result<()> {
        let data = simulated();
        let prep = preprocess_expression(&data, Some("counts"), 10)?;
        for x_j in prep.expr_nd.column_iter() {
            let mu = x_j.mean();
            assert_abs_diff_eq!(mu, 0.0, epsilon = 1e-4);
        }
        Ok(())
    }

    #[test]
    fn selection_is_reproducible() -> anyhow::Result<()> {
        let data = simulated();
        let a = preprocess_expression(&data, None, 12)?;
        let b = preprocess_expression(&data, None, 12)?;
        assert_eq!(a.hvg, b.hvg);
        Ok(())
    }

    #[test]
    fn missing_layer_falls_back_to_x() -> anyhow::Result<()> {
        let mut data = simulated();
        data.layers.clear();
        let prep = preprocess_expression(&data, Some("counts"), 5)?;
        assert_eq!(prep.hvg.len(), 5);
        Ok(())
    }

    #[test]
    fn ties_prefer_smaller_index() {
        let scores = [1.0, 3.0, f32::NAN, 3.0, 2.0, 3.0];
        assert_eq!(top_genes(&scores, 2), vec![1, 3]);
        assert_eq!(top_genes(&scores, 5), vec![0, 1, 3, 4, 5]);
    }

    #[test]
    fn running_lines_recovers_a_line() {
        let x = (0..30).map(|i| (i * 7 % 30) as f64).collect::<Vec<_>>();
        let y = x.iter().map(|&v| 2.0 * v - 1.0).collect::<Vec<_>>();
        let fit = running_lines(&x, &y, 0.3);
        for (f, t) in fit.iter().zip(y.iter()) {
            assert_abs_diff_eq!(*f, *t, epsilon = 1e-9);
        }
    }

    #[test]
    fn constant_genes_do_not_break_scores() {
        let x = csr_from_dense(&Mat::from_row_slice(
            4,
            3,
            &[1., 0., 2., 1., 5., 0., 1., 0., 7., 1., 1., 1.],
        ));
        let v3 = seurat_v3_scores(&x);
        assert!(v3.iter().all(|s| s.is_finite()));
        let disp = dispersion_scores(&x);
        assert!(disp[0].is_nan());
        assert_eq!(top_genes(&disp, 3).len(), 3);
    }
}
