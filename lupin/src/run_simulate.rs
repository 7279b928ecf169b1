use crate::lupin_common::*;
use clap::Args;
use data_beans::simulate::{generate_spatial_data, SimSpatialArgs};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Output h5ad file
    #[arg(long, short, required = true)]
    out: String,

    /// Grid rows
    #[arg(long, default_value_t = 10)]
    grid_rows: usize,

    /// Grid columns
    #[arg(long, default_value_t = 10)]
    grid_cols: usize,

    /// Number of genes
    #[arg(long, default_value_t = 50)]
    n_genes: usize,

    /// Number of cell types (vertical stripes)
    #[arg(long, default_value_t = 3)]
    n_types: usize,

    /// Marker genes per cell type
    #[arg(long, default_value_t = 5)]
    markers: usize,

    /// Marker fold change
    #[arg(long, default_value_t = 5.0)]
    fold: f32,

    /// Expected counts per cell
    #[arg(long, default_value_t = 500.0)]
    depth: f32,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// verbosity
    #[arg(long, short)]
    pub verbose: bool,
}

pub fn run_simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    let sim = generate_spatial_data(&SimSpatialArgs {
        grid_rows: args.grid_rows,
        grid_cols: args.grid_cols,
        n_genes: args.n_genes,
        n_types: args.n_types,
        markers: args.markers,
        fold: args.fold,
        depth: args.depth,
        seed: args.seed,
    })?;

    write_h5ad(&sim.data, &args.out)
        .map_err(|e| LupinError::io(format!("cannot write {}: {:#}", args.out, e)))?;
    info!("wrote simulated data to {}", args.out);
    Ok(())
}
