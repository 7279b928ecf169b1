use crate::sparse_util::csr_from_dense;
use crate::spatial_data::{ObsColumn, SpatialData, SPATIAL_KEY};
use matrix_util::Mat;

use indicatif::ParallelProgressIterator;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Gamma, LogNormal, Poisson};
use rayon::prelude::*;

/// Name of the simulated annotation column
pub const SIM_ANNOTATION: &str = "cell_type";
/// Name of the raw count layer
pub const SIM_COUNT_LAYER: &str = "counts";

#[derive(Debug, Clone)]
pub struct SimSpatialArgs {
    /// grid rows
    pub grid_rows: usize,
    /// grid columns
    pub grid_cols: usize,
    pub n_genes: usize,
    /// number of cell types, laid out as vertical stripes
    pub n_types: usize,
    /// marker genes per cell type
    pub markers: usize,
    /// marker fold change
    pub fold: f32,
    /// expected total count per cell
    pub depth: f32,
    pub seed: u64,
}

impl Default for SimSpatialArgs {
    fn default() -> Self {
        Self {
            grid_rows: 10,
            grid_cols: 10,
            n_genes: 50,
            n_types: 3,
            markers: 5,
            fold: 5.0,
            depth: 500.0,
            seed: 42,
        }
    }
}

pub struct SimSpatialOut {
    pub data: SpatialData,
    /// true cell type of each cell
    pub cell_types: Vec<usize>,
    /// gene x type expression profiles (columns sum to one)
    pub mu_dk: Mat,
}

/// Cell type of each grid column; the first `cols % types` stripes
/// are one column wider
fn stripe_types(grid_cols: usize, n_types: usize) -> Vec<usize> {
    let base = grid_cols / n_types;
    let extra = grid_cols % n_types;
    let mut ret = Vec::with_capacity(grid_cols);
    for t in 0..n_types {
        let width = base + usize::from(t < extra);
        ret.extend(std::iter::repeat_n(t, width));
    }
    ret
}

/// Simulate a spatial dataset on a regular grid
///
/// ```text
/// Y(i,g) ~ Poisson( s(i) * depth * mu(g, T(i)) )
/// ```
///
/// where `T(i)` is the stripe of the cell's grid column and `s(i)` a
/// log-normal size factor. `X` holds `log1p` of counts scaled to 1e4
/// per cell; the raw counts go to the `counts` layer.
pub fn generate_spatial_data(args: &SimSpatialArgs) -> anyhow::Result<SimSpatialOut> {
    let (nr, nc) = (args.grid_rows, args.grid_cols);
    let nn = nr * nc;
    let dd = args.n_genes;
    let kk = args.n_types;

    if nn == 0 || dd == 0 {
        anyhow::bail!("empty grid or no genes");
    }
    if kk == 0 || kk > nc {
        anyhow::bail!("need between 1 and {} cell types, got {}", nc, kk);
    }

    let mut rng = StdRng::seed_from_u64(args.seed);

    // 1. type-specific profiles: shared baseline + marker blocks
    let gamma = Gamma::new(2.0f32, 0.5f32)?;
    let baseline = (0..dd).map(|_| gamma.sample(&mut rng)).collect::<Vec<_>>();
    let mut mu_dk = Mat::from_fn(dd, kk, |g, _| baseline[g]);
    for k in 0..kk {
        for m in 0..args.markers {
            let g = (k * args.markers + m) % dd;
            mu_dk[(g, k)] *= args.fold;
        }
        let denom = mu_dk.column(k).sum();
        mu_dk.column_mut(k).unscale_mut(denom);
    }

    // 2. spatial layout
    let stripes = stripe_types(nc, kk);
    let cell_types = (0..nn).map(|i| stripes[i % nc]).collect::<Vec<_>>();
    let coords = Mat::from_fn(nn, 2, |i, c| match c {
        0 => (i % nc) as f32,
        _ => (i / nc) as f32,
    });

    // 3. counts, one seeded stream per cell
    let size_factor = LogNormal::new(0.0f32, 0.2f32)?;
    let rows = (0..nn)
        .into_par_iter()
        .progress_count(nn as u64)
        .map(|i| -> anyhow::Result<Vec<f32>> {
            let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(1 + i as u64));
            let s = size_factor.sample(&mut rng) * args.depth;
            let k = cell_types[i];
            (0..dd)
                .map(|g| {
                    let rate = (s * mu_dk[(g, k)]).max(1e-8);
                    Ok(Poisson::new(rate)?.sample(&mut rng))
                })
                .collect()
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let counts_nd = Mat::from_fn(nn, dd, |i, g| rows[i][g]);

    let mut lognorm_nd = counts_nd.clone();
    for mut row in lognorm_nd.row_iter_mut() {
        let total = row.sum().max(1.0);
        row.apply(|x| *x = (*x / total * 1e4).ln_1p());
    }

    let obs_names = (0..nn)
        .map(|i| format!("cell_{}", i).into_boxed_str())
        .collect();
    let var_names = (0..dd)
        .map(|g| format!("gene_{}", g).into_boxed_str())
        .collect();

    let mut data = SpatialData::new(csr_from_dense(&lognorm_nd), obs_names, var_names)?;
    data.layers
        .insert(SIM_COUNT_LAYER.to_string(), csr_from_dense(&counts_nd));
    data.set_obs_column(
        SIM_ANNOTATION,
        ObsColumn::Categorical {
            codes: cell_types.iter().map(|&k| k as i32).collect(),
            categories: (0..kk)
                .map(|k| format!("type_{}", k).into_boxed_str())
                .collect(),
        },
    )?;
    data.insert_obsm(SPATIAL_KEY, coords)?;

    info!(
        "simulated {} cells x {} genes, {} stripes on a {} x {} grid",
        nn, dd, kk, nr, nc
    );

    Ok(SimSpatialOut {
        data,
        cell_types,
        mu_dk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripes_cover_the_grid() {
        assert_eq!(stripe_types(10, 3), vec![0, 0, 0, 0, 1, 1, 1, 2, 2, 2]);
        assert_eq!(stripe_types(4, 4), vec![0, 1, 2, 3]);
    }

    #[test]
    fn group_sizes_and_layers() -> anyhow::Result<()> {
        let out = generate_spatial_data(&SimSpatialArgs::default())?;
        let data = &out.data;
        assert_eq!(data.num_obs(), 100);
        assert_eq!(data.num_vars(), 50);
        assert!(data.layers.contains_key(SIM_COUNT_LAYER));
        assert_eq!(data.coordinates()?.shape(), (100, 2));

        let mut sizes = vec![0; 3];
        out.cell_types.iter().for_each(|&k| sizes[k] += 1);
        assert_eq!(sizes, vec![40, 30, 30]);

        let counts = &data.layers[SIM_COUNT_LAYER];
        assert!(counts.values().iter().all(|&x| x >= 0.0 && x.fract() == 0.0));
        Ok(())
    }

    #[test]
    fn same_seed_same_data() -> anyhow::Result<()> {
        let a = generate_spatial_data(&SimSpatialArgs::default())?;
        let b = generate_spatial_data(&SimSpatialArgs::default())?;
        assert_eq!(a.data.x.values(), b.data.x.values());
        Ok(())
    }
}
