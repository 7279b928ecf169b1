use clap::{Parser, Subcommand};
use log::info;

use lupin::run_latent::run_latent;
use lupin::run_simulate::{run_simulate, SimulateArgs};
use lupin::LatentConfig;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LUPIN",
    long_about = "Latent representations of spatial transcriptomics data\n\
		  by a graph-attention variational autoencoder and PCA.\n\
		  Input and output are `.h5ad` files."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Find latent representations",
        long_about = "Find latent representations in three steps:\n\
		      (1) Select variable genes and build a spatial kNN graph\n\
		      (2) Train a GNN-VAE on the graph and compute PCA\n\
		      (3) Project both by UMAP, optionally per annotation group.\n"
    )]
    Latent(LatentConfig),

    /// simulate a spatial dataset on a grid
    Simulate(SimulateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let verbose = match &cli.commands {
        Commands::Latent(args) => args.verbose,
        Commands::Simulate(args) => args.verbose,
    };

    if verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.commands {
        Commands::Latent(args) => {
            run_latent(args)?;
        }
        Commands::Simulate(args) => {
            run_simulate(args)?;
        }
    }

    info!("Done");
    Ok(())
}
