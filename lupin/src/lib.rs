pub mod annotation; // clean an annotation column into labels
pub mod errors; // failure taxonomy
pub mod feature_preprocess; // highly variable genes and transformations
pub mod hierarchical; // latent states within annotation groups
pub mod latent_args; // command line configuration
pub mod latent_finder; // GNN-VAE and PCA latent states
pub mod lupin_common;
pub mod run_latent; // the whole pipeline
pub mod run_simulate; // synthetic input
pub mod spatial_adjacency; // spatial kNN graph

pub use errors::LupinError;
pub use latent_args::{LatentConfig, ModelDims};
