use crate::knn_match::ColumnDict;
use crate::utils::{create_jobs, median_f32};
use crate::Mat;

use fnv::FnvHashMap;
use indicatif::ParallelProgressIterator;
use log::info;
use rayon::prelude::*;

/// Directed k-nearest-neighbour graph over the rows of a matrix
pub struct KnnGraph {
    /// Out-neighbours of each node, nearest first
    pub neighbours: Vec<Vec<usize>>,
    /// Euclidean distances, parallel to `neighbours`
    pub distances: Vec<Vec<f32>>,
    /// Number of nodes
    pub n_nodes: usize,
    /// Requested out-degree
    pub knn: usize,
}

pub struct KnnGraphArgs {
    pub knn: usize,
    pub block_size: usize,
}

impl KnnGraph {
    /// Build an exact kNN graph from row vectors (points × features).
    ///
    /// Every node gets exactly `knn` out-edges and never itself. Ties
    /// in distance are broken by the smaller node index, so the graph
    /// is a deterministic function of `data`.
    ///
    /// * `data` - matrix (n x d), where each row is a point
    /// * `args` - KNN graph construction parameters
    pub fn from_rows(data: &Mat, args: KnnGraphArgs) -> anyhow::Result<KnnGraph> {
        let nn = data.nrows();
        check_knn_input(data, args.knn)?;

        let points = data.transpose();
        let kk = args.knn;

        let jobs = create_jobs(nn, args.block_size);
        let njobs = jobs.len() as u64;

        let mut blocks = jobs
            .into_par_iter()
            .progress_count(njobs)
            .map(|(lb, ub)| {
                let rows = (lb..ub)
                    .map(|i| {
                        let x_i = points.column(i);
                        let mut cand: Vec<(f32, usize)> = (0..nn)
                            .filter(|&j| j != i)
                            .map(|j| ((points.column(j) - x_i).norm(), j))
                            .collect();
                        let order = |a: &(f32, usize), b: &(f32, usize)| {
                            a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
                        };
                        if kk < cand.len() {
                            cand.select_nth_unstable_by(kk, order);
                            cand.truncate(kk);
                        }
                        cand.sort_by(order);
                        cand.into_iter().map(|(d, j)| (j, d)).unzip()
                    })
                    .collect::<Vec<(Vec<usize>, Vec<f32>)>>();
                (lb, rows)
            })
            .collect::<Vec<_>>();

        blocks.sort_by_key(|&(lb, _)| lb);

        let (neighbours, distances): (Vec<_>, Vec<_>) = blocks
            .into_iter()
            .flat_map(|(_, rows)| rows)
            .unzip();

        info!("{} directed edges by exact kNN (k = {})", nn * kk, kk);

        Ok(KnnGraph {
            neighbours,
            distances,
            n_nodes: nn,
            knn: kk,
        })
    }

    /// Build an approximate kNN graph by HNSW search. Some nodes may
    /// end up with fewer than `knn` neighbours.
    ///
    /// * `data` - matrix (n x d), where each row is a point
    /// * `args` - KNN graph construction parameters
    /// * `seed` - seed for the HNSW index
    pub fn from_rows_approx(data: &Mat, args: KnnGraphArgs, seed: u64) -> anyhow::Result<KnnGraph> {
        let nn = data.nrows();
        check_knn_input(data, args.knn)?;

        let dict = ColumnDict::from_rows(data, seed);

        let jobs = create_jobs(nn, args.block_size);
        let njobs = jobs.len() as u64;

        let mut blocks = jobs
            .into_par_iter()
            .progress_count(njobs)
            .map(|(lb, ub)| -> anyhow::Result<_> {
                let rows = (lb..ub)
                    .map(|i| dict.search_others(i, args.knn))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Ok((lb, rows))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        blocks.sort_by_key(|&(lb, _)| lb);

        let (neighbours, distances): (Vec<_>, Vec<_>) = blocks
            .into_iter()
            .flat_map(|(_, rows)| rows)
            .unzip();

        let graph = KnnGraph {
            neighbours,
            distances,
            n_nodes: nn,
            knn: args.knn,
        };

        info!("{} directed edges by HNSW matching", graph.num_edges());
        Ok(graph)
    }

    /// Out-neighbours of a node, nearest first
    pub fn neighbors(&self, node: usize) -> &[usize] {
        &self.neighbours[node]
    }

    /// Number of directed edges
    pub fn num_edges(&self) -> usize {
        self.neighbours.iter().map(|v| v.len()).sum()
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Directed edge list `(i, j)` in row-major order of the
    /// neighbour lists
    pub fn directed_edges(&self) -> Vec<(usize, usize)> {
        self.neighbours
            .iter()
            .enumerate()
            .flat_map(|(i, nbr)| nbr.iter().map(move |&j| (i, j)))
            .collect()
    }

    /// Gaussian kernel weights `w = exp(-d² / (2σ²))` with a global
    /// bandwidth σ = median edge distance (1 if the median is zero).
    ///
    /// Returns weights parallel to `self.neighbours`, all in (0, 1].
    pub fn gaussian_kernel_weights(&self) -> Vec<Vec<f32>> {
        let all_dists = self.distances.iter().flatten().cloned().collect::<Vec<_>>();
        let sigma = median_f32(&all_dists);
        let sigma = if sigma > 0.0 && sigma.is_finite() {
            sigma
        } else {
            1.0
        };
        info!("gaussian_kernel_weights: σ (median distance) = {:.4}", sigma);
        let denom = 2.0 * sigma * sigma;
        self.distances
            .iter()
            .map(|dd| dd.iter().map(|&d| (-(d * d) / denom).exp()).collect())
            .collect()
    }

    /// Adaptive-bandwidth kernel weights with local connectivity,
    /// symmetrized by fuzzy union.
    ///
    /// 1. rho_i = distance to nearest neighbour
    /// 2. sigma_i via binary search: sum_j exp(-(d_ij - rho_i)/sigma_i) = log2(k)
    /// 3. w(i→j) = exp(-(d_ij - rho_i) / sigma_i)
    /// 4. w_sym = w(i→j) + w(j→i) - w(i→j) * w(j→i)
    ///
    /// Returns undirected edges `(i, j)` with `i < j`, sorted, and
    /// their weights in (0, 1].
    pub fn fuzzy_kernel_weights(&self) -> (Vec<(usize, usize)>, Vec<f32>) {
        let mut directed: FnvHashMap<(usize, usize), f32> = FnvHashMap::default();

        for i in 0..self.n_nodes {
            let dists = &self.distances[i];
            if dists.is_empty() {
                continue;
            }
            let rho = dists.iter().cloned().fold(f32::INFINITY, f32::min);
            let target = (dists.len() as f32).log2();
            let sigma = smooth_knn_sigma(dists, rho, target);

            for (&j, &d) in self.neighbours[i].iter().zip(dists) {
                directed.insert((i, j), directed_umap_weight(d, rho, sigma));
            }
        }

        let mut edges: Vec<((usize, usize), f32)> = directed
            .iter()
            .filter_map(|(&(i, j), &w_ij)| {
                let w_ji = directed.get(&(j, i)).cloned();
                if i < j {
                    let w_ji = w_ji.unwrap_or(0.0);
                    Some(((i, j), w_ij + w_ji - w_ij * w_ji))
                } else if w_ji.is_none() {
                    Some(((j, i), w_ij))
                } else {
                    None
                }
            })
            .collect();

        edges.sort_by_key(|&(ij, _)| ij);

        info!("{} undirected edges after fuzzy union", edges.len());

        edges.into_iter().unzip()
    }
}

fn check_knn_input(data: &Mat, knn: usize) -> anyhow::Result<()> {
    let nn = data.nrows();
    if knn == 0 {
        anyhow::bail!("knn must be >= 1");
    }
    if knn >= nn {
        anyhow::bail!("knn ({}) must be smaller than the number of points ({})", knn, nn);
    }
    if data.iter().any(|x| !x.is_finite()) {
        anyhow::bail!("non-finite coordinates");
    }
    Ok(())
}

/// Binary search for per-point sigma (UMAP's smooth_knn_dist).
///
/// Finds sigma such that: sum_j exp(-max(0, d_j - rho) / sigma) = target
fn smooth_knn_sigma(dists: &[f32], rho: f32, target: f32) -> f32 {
    const TOLERANCE: f32 = 1e-5;
    const MAX_ITER: usize = 64;

    let mean_dist: f32 = dists.iter().sum::<f32>() / dists.len().max(1) as f32;
    let min_sigma = (1e-3 * mean_dist).max(f32::MIN_POSITIVE);

    let mut lo = 0.0f32;
    let mut hi = f32::INFINITY;
    let mut mid = 1.0f32;

    for _ in 0..MAX_ITER {
        let psum: f32 = dists
            .iter()
            .map(|&d| {
                let gap = d - rho;
                if gap > 0.0 {
                    (-gap / mid).exp()
                } else {
                    1.0
                }
            })
            .sum();

        if (psum - target).abs() < TOLERANCE {
            break;
        }

        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            if hi.is_infinite() {
                mid *= 2.0;
            } else {
                mid = (lo + hi) / 2.0;
            }
        }
    }

    mid.max(min_sigma)
}

fn directed_umap_weight(d: f32, rho: f32, sigma: f32) -> f32 {
    if !d.is_finite() || sigma <= 0.0 {
        return 0.0;
    }
    let gap = d - rho;
    if gap <= 0.0 {
        1.0
    } else {
        (-gap / sigma).exp()
    }
}
