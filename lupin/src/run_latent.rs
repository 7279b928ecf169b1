use crate::annotation::clean_annotation;
use crate::hierarchical::{find_hierarchical_latent, SmallGroupPolicy};
use crate::latent_finder::LatentRepresentationFinder;
use crate::lupin_common::*;

use matrix_util::umap::{umap_layout, UmapArgs};

/// Encoded annotation, stored next to the annotation itself
pub const LABEL_COLUMN: &str = "categorical_label";

/// Read the input, attach every latent representation and write the
/// output
pub fn run_latent(config: &LatentConfig) -> anyhow::Result<()> {
    config.validate()?;
    info!("configuration:\n{}", config.to_json()?);

    let data = read_h5ad(&config.input_hdf5_path).map_err(|e| {
        LupinError::io(format!("cannot read {}: {:#}", config.input_hdf5_path, e))
    })?;

    let data = find_latent_representations(data, config)?;

    write_h5ad(&data, &config.output_hdf5_path).map_err(|e| {
        LupinError::io(format!("cannot write {}: {:#}", config.output_hdf5_path, e))
    })?;

    info!(
        "{}: latent representations written to {}",
        config.sample_name, config.output_hdf5_path
    );
    Ok(())
}

/// The in-memory pipeline
///
/// 1. make gene names unique
/// 2. with an annotation, keep annotated cells of large enough groups
///    and use the groups as labels
/// 3. GNN-VAE and PCA latent states, each followed by UMAP
/// 4. optionally, the same within each annotation group
pub fn find_latent_representations(
    mut data: SpatialData,
    config: &LatentConfig,
) -> anyhow::Result<SpatialData> {
    data.var_names_make_unique();
    info!(
        "{}: {} cells, {} genes",
        config.sample_name,
        data.num_obs(),
        data.num_vars()
    );

    let labels = match config.annotation.as_deref() {
        Some(column) => {
            let cells = clean_annotation(&data, column, config.min_group_size)?;
            if cells.rows.len() < data.num_obs() {
                data = data.subset_rows(&cells.rows)?;
            }
            data.set_obs_column(
                LABEL_COLUMN,
                ObsColumn::Numeric(cells.labels.iter().map(|&k| k as f64).collect()),
            )?;
            Some(cells.labels)
        }
        None => None,
    };

    let (gvae, pca) = {
        let finder = LatentRepresentationFinder::new(&data, config)?;
        let gvae = finder.run_gnn_vae(labels.as_deref(), "whole ST data");
        // PCA is computed even if the GNN-VAE failed
        let pca = finder.run_pca()?;
        (gvae?, pca)
    };

    data.insert_obsm(LATENT_GVAE, gvae)?;
    data.insert_obsm(LATENT_PCA, pca)?;

    let umap_args = UmapArgs {
        n_neighbors: config.umap_neighbors,
        seed: config.seed,
        ..Default::default()
    };

    for name in [LATENT_GVAE, LATENT_PCA] {
        info!("UMAP of {}", name);
        let layout = umap_layout(&data.obsm[name], &umap_args)?;
        data.insert_obsm(&format!("{}{}", UMAP_PREFIX, name), layout)?;
    }

    if let (Some(column), true) = (config.annotation.as_deref(), config.hierarchically) {
        let latent =
            find_hierarchical_latent(&data, column, config, SmallGroupPolicy::PcaSubstitution)?;
        let n_substituted = latent.groups.iter().filter(|g| g.substituted).count();
        info!(
            "{} groups, {} of them with PCA in place of GNN-VAE",
            latent.groups.len(),
            n_substituted
        );
        data.insert_obsm(LATENT_GVAE_HIERARCHY, latent.gvae)?;
        data.insert_obsm(LATENT_PCA_HIERARCHY, latent.pca)?;
    }

    Ok(data)
}
