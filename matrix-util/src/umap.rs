use crate::dmatrix_pca::pca_scores;
use crate::knn_graph::{KnnGraph, KnnGraphArgs};
use crate::traits::SampleOps;
use crate::Mat;

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Above this many points the neighbour graph is built by HNSW
const EXACT_KNN_MAX: usize = 5000;
const INIT_EXTENT: f32 = 10.0;
const GRAD_CLIP: f32 = 4.0;

#[derive(Debug, Clone)]
pub struct UmapArgs {
    pub n_neighbors: usize,
    pub n_components: usize,
    pub min_dist: f32,
    pub spread: f32,
    /// `None`: 500 for up to 10,000 points, 200 beyond
    pub n_epochs: Option<usize>,
    pub negative_sample_rate: usize,
    pub learning_rate: f32,
    pub seed: u64,
    pub block_size: usize,
}

impl Default for UmapArgs {
    fn default() -> Self {
        Self {
            n_neighbors: 10,
            n_components: 2,
            min_dist: 0.5,
            spread: 1.0,
            n_epochs: None,
            negative_sample_rate: 5,
            learning_rate: 1.0,
            seed: 42,
            block_size: 1000,
        }
    }
}

/// Two-dimensional (or `n_components`) UMAP layout of the rows of
/// `x_nd`.
///
/// The fuzzy neighbour graph comes from [`KnnGraph::fuzzy_kernel_weights`];
/// the layout starts from PCA scores scaled into `[-10, 10]` and is
/// optimized by single-threaded SGD so that a fixed seed gives the
/// same coordinates.
pub fn umap_layout(x_nd: &Mat, args: &UmapArgs) -> anyhow::Result<Mat> {
    let nn = x_nd.nrows();
    let dim = args.n_components;

    if dim == 0 {
        anyhow::bail!("n_components must be >= 1");
    }

    if nn < 3 {
        return Ok(Mat::zeros(nn, dim));
    }

    let knn = args.n_neighbors.clamp(1, nn - 1);
    let knn_args = KnnGraphArgs {
        knn,
        block_size: args.block_size,
    };

    let graph = if nn <= EXACT_KNN_MAX {
        KnnGraph::from_rows(x_nd, knn_args)?
    } else {
        KnnGraph::from_rows_approx(x_nd, knn_args, args.seed)?
    };

    let (edges, weights) = graph.fuzzy_kernel_weights();

    let n_epochs = args
        .n_epochs
        .unwrap_or(if nn <= 10_000 { 500 } else { 200 })
        .max(1);

    let (a, b) = find_ab_params(args.spread, args.min_dist);
    info!(
        "UMAP: {} points, {} edges, {} epochs, a = {:.4}, b = {:.4}",
        nn,
        edges.len(),
        n_epochs,
        a,
        b
    );

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut emb = initial_layout(x_nd, dim, args.seed, &mut rng)?;

    optimize_layout(
        &mut emb,
        &edges,
        &weights,
        n_epochs,
        (a, b),
        args,
        &mut rng,
    );

    Ok(emb.transpose())
}

/// PCA scores scaled so that the largest absolute value is 10.
/// Returns `dim x n` so that each point is a contiguous column.
fn initial_layout(x_nd: &Mat, dim: usize, seed: u64, rng: &mut StdRng) -> anyhow::Result<Mat> {
    let nn = x_nd.nrows();
    let z_nk = pca_scores(x_nd, dim, seed)?;
    let max_abs = z_nk.amax();

    let mut init = if max_abs > 0.0 && max_abs.is_finite() {
        z_nk * (INIT_EXTENT / max_abs)
    } else {
        (Mat::runif(nn, dim, rng) * 2.0).add_scalar(-1.0) * INIT_EXTENT
    };

    // break exact ties so that no two points start at the same spot
    for x in init.iter_mut() {
        *x += 1e-4 * (rng.random::<f32>() - 0.5);
    }

    Ok(init.transpose())
}

fn optimize_layout(
    emb: &mut Mat,
    edges: &[(usize, usize)],
    weights: &[f32],
    n_epochs: usize,
    (a, b): (f32, f32),
    args: &UmapArgs,
    rng: &mut StdRng,
) {
    let nn = emb.ncols();
    let dim = emb.nrows();

    let max_w = weights.iter().cloned().fold(0.0f32, f32::max);
    if max_w <= 0.0 {
        return;
    }

    // both directions of every undirected edge
    let mut heads = Vec::with_capacity(2 * edges.len());
    let mut tails = Vec::with_capacity(2 * edges.len());
    let mut eps = Vec::with_capacity(2 * edges.len());

    for (&(i, j), &w) in edges.iter().zip(weights) {
        // edges too weak to be sampled even once are dropped
        if w < max_w / n_epochs as f32 {
            continue;
        }
        let e = max_w / w;
        heads.extend([i, j]);
        tails.extend([j, i]);
        eps.extend([e, e]);
    }

    let neg_rate = args.negative_sample_rate.max(1) as f32;
    let eps_neg = eps.iter().map(|e| e / neg_rate).collect::<Vec<_>>();
    let mut next_sample = eps.clone();
    let mut next_neg_sample = eps_neg.clone();

    let mut current = vec![0f32; dim];
    let mut other = vec![0f32; dim];

    for epoch in 0..n_epochs {
        let alpha = args.learning_rate * (1.0 - epoch as f32 / n_epochs as f32);
        let now = epoch as f32;

        for e in 0..heads.len() {
            if next_sample[e] > now {
                continue;
            }

            let i = heads[e];
            let j = tails[e];

            current.copy_from_slice(emb.column(i).as_slice());
            other.copy_from_slice(emb.column(j).as_slice());

            let d2 = squared_dist(&current, &other);
            if d2 > 0.0 {
                let coeff = -2.0 * a * b * d2.powf(b - 1.0) / (a * d2.powf(b) + 1.0);
                for k in 0..dim {
                    let g = (coeff * (current[k] - other[k])).clamp(-GRAD_CLIP, GRAD_CLIP);
                    current[k] += g * alpha;
                    other[k] -= g * alpha;
                }
            }
            emb.column_mut(j).copy_from_slice(&other);

            next_sample[e] += eps[e];

            let n_neg = ((now - next_neg_sample[e]) / eps_neg[e]).floor().max(0.0) as usize;

            for _ in 0..n_neg {
                let r = rng.random_range(0..nn);
                if r == i {
                    continue;
                }
                let neg = emb.column(r);
                let d2 = current
                    .iter()
                    .zip(neg.iter())
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f32>();

                let coeff = if d2 > 0.0 {
                    2.0 * b / ((0.001 + d2) * (a * d2.powf(b) + 1.0))
                } else {
                    0.0
                };

                for k in 0..dim {
                    let g = if coeff > 0.0 {
                        (coeff * (current[k] - neg[k])).clamp(-GRAD_CLIP, GRAD_CLIP)
                    } else {
                        GRAD_CLIP
                    };
                    current[k] += g * alpha;
                }
            }

            emb.column_mut(i).copy_from_slice(&current);
            next_neg_sample[e] += n_neg as f32 * eps_neg[e];
        }
    }
}

fn squared_dist(x: &[f32], y: &[f32]) -> f32 {
    x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum()
}

/// Fit `1 / (1 + a x^(2b))` to the offset exponential decay defined
/// by `spread` and `min_dist` by least squares over a refining grid
pub fn find_ab_params(spread: f32, min_dist: f32) -> (f32, f32) {
    const NPTS: usize = 300;

    let xs = (0..NPTS)
        .map(|i| 3.0 * spread * i as f32 / (NPTS - 1) as f32)
        .collect::<Vec<_>>();
    let ys = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect::<Vec<_>>();

    let sse = |a: f32, b: f32| -> f32 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let f = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (f - y) * (f - y)
            })
            .sum()
    };

    // search log(a) and b on a grid, then zoom in around the best
    let (mut la, mut b) = (0.0f32, 1.0f32);
    let (mut la_span, mut b_span) = (4.0f32, 1.5f32);
    let steps = 40;

    for _ in 0..6 {
        let mut best = (f32::INFINITY, la, b);
        for ia in 0..=steps {
            let la_try = la - la_span + 2.0 * la_span * ia as f32 / steps as f32;
            for ib in 0..=steps {
                let b_try = (b - b_span + 2.0 * b_span * ib as f32 / steps as f32).max(0.05);
                let loss = sse(la_try.exp(), b_try);
                if loss < best.0 {
                    best = (loss, la_try, b_try);
                }
            }
        }
        la = best.1;
        b = best.2;
        la_span /= 8.0;
        b_span /= 8.0;
    }

    (la.exp(), b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs(rng: &mut StdRng) -> Mat {
        let mut xx = Mat::rnorm(60, 5, rng) * 0.3;
        for i in 30..60 {
            for j in 0..5 {
                xx[(i, j)] += 8.0;
            }
        }
        xx
    }

    #[test]
    fn ab_params_for_default_curve() {
        let (a, b) = find_ab_params(1.0, 0.5);
        assert!((a - 0.58).abs() < 0.05, "a = {}", a);
        assert!((b - 1.33).abs() < 0.05, "b = {}", b);
    }

    #[test]
    fn layout_shape_and_separation() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(0);
        let xx = blobs(&mut rng);
        let args = UmapArgs {
            n_epochs: Some(100),
            ..Default::default()
        };
        let emb = umap_layout(&xx, &args)?;
        assert_eq!(emb.shape(), (60, 2));
        assert!(emb.iter().all(|x| x.is_finite()));

        let c0 = emb.rows(0, 30).row_mean();
        let c1 = emb.rows(30, 30).row_mean();
        let between = (&c0 - &c1).norm();
        let within = (0..30)
            .map(|i| (emb.row(i) - &c0).norm())
            .fold(0.0f32, f32::max);
        assert!(between > within, "between {} within {}", between, within);
        Ok(())
    }

    #[test]
    fn layout_is_reproducible() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let xx = blobs(&mut rng);
        let args = UmapArgs {
            n_epochs: Some(30),
            seed: 7,
            ..Default::default()
        };
        assert_eq!(umap_layout(&xx, &args)?, umap_layout(&xx, &args)?);
        Ok(())
    }

    #[test]
    fn tiny_inputs() -> anyhow::Result<()> {
        let xx = Mat::zeros(2, 4);
        assert_eq!(umap_layout(&xx, &UmapArgs::default())?.shape(), (2, 2));
        Ok(())
    }
}
