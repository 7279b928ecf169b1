pub use log::{info, warn};

pub use data_beans::h5ad_io::{read_h5ad, write_h5ad};
pub use data_beans::{ObsColumn, SpatialData, SPATIAL_KEY};
pub use matrix_util::traits::*;
pub use matrix_util::{CsrMat, Mat};

pub use crate::errors::LupinError;
pub use crate::latent_args::{LatentConfig, ModelDims};

pub const LATENT_GVAE: &str = "latent_GVAE";
pub const LATENT_PCA: &str = "latent_PCA";
pub const LATENT_GVAE_HIERARCHY: &str = "latent_GVAE_hierarchy";
pub const LATENT_PCA_HIERARCHY: &str = "latent_PCA_hierarchy";
pub const UMAP_PREFIX: &str = "X_umap_";
