use data_beans::h5_tree::{H5Attrs, H5Node, H5Values};
use data_beans::h5ad_io::{read_h5ad, write_h5ad};
use data_beans::simulate::*;
use lupin::hierarchical::{find_hierarchical_latent, SmallGroupPolicy};
use lupin::latent_finder::LatentRepresentationFinder;
use lupin::lupin_common::*;
use lupin::run_latent::{find_latent_representations, run_latent, LABEL_COLUMN};

fn quick_config(dir: &std::path::Path) -> LatentConfig {
    LatentConfig {
        input_hdf5_path: dir.join("sim.h5ad").to_string_lossy().into_owned(),
        output_hdf5_path: dir
            .join("out")
            .join("nested")
            .join("latent.h5ad")
            .to_string_lossy()
            .into_owned(),
        sample_name: "sim".into(),
        annotation: Some(SIM_ANNOTATION.into()),
        data_type: Some("counts".into()),
        epochs: 5,
        feat_hidden1: 32,
        feat_hidden2: 16,
        gcn_hidden1: 8,
        gcn_hidden2: 10,
        nheads: 2,
        n_comps: 10,
        ..Default::default()
    }
}

#[test]
fn latent_pipeline_end_to_end() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let sim = generate_spatial_data(&SimSpatialArgs::default())?;
    let config = LatentConfig {
        hierarchically: true,
        ..quick_config(dir.path())
    };

    let mut input = sim.data.clone();
    let gene_ids = ObsColumn::Text(
        (0..input.num_vars())
            .map(|g| format!("id{}", g).into())
            .collect(),
    );
    input.set_var_column("gene_ids", gene_ids.clone())?;
    let library = H5Node::Dataset {
        attrs: H5Attrs::new(),
        values: H5Values::scalar_text("slice1"),
    };
    input.uns.insert("library_id".into(), library.clone());
    write_h5ad(&input, &config.input_hdf5_path)?;

    run_latent(&config)?;

    let out = read_h5ad(&config.output_hdf5_path)?;
    assert_eq!(out.num_obs(), 100);
    assert_eq!(out.num_vars(), 50);

    for name in [
        LATENT_GVAE,
        LATENT_PCA,
        LATENT_GVAE_HIERARCHY,
        LATENT_PCA_HIERARCHY,
    ] {
        let m = &out.obsm[name];
        assert_eq!(m.shape(), (100, 10), "{}", name);
        assert!(!m.has_non_finite(), "{}", name);
    }
    for name in [LATENT_GVAE, LATENT_PCA] {
        let m = &out.obsm[&format!("{}{}", UMAP_PREFIX, name)];
        assert_eq!(m.shape(), (100, 2));
        assert!(!m.has_non_finite());
    }

    // encoded labels follow the sorted type names
    let labels = out.obs_column(LABEL_COLUMN).unwrap();
    for i in 0..out.num_obs() {
        let code = labels.value(i).unwrap();
        assert_eq!(&*code, sim.cell_types[i].to_string().as_str());
    }

    assert_eq!(out.obsm[SPATIAL_KEY], sim.data.obsm[SPATIAL_KEY]);

    // untouched parts of the input are carried over
    assert_eq!(out.var_column("gene_ids"), Some(&gene_ids));
    assert_eq!(out.uns.get("library_id"), Some(&library));
    assert_eq!(out.layers.keys().collect::<Vec<_>>(), vec![SIM_COUNT_LAYER]);
    Ok(())
}

#[test]
fn groups_no_larger_than_n_comps_reuse_pca() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let sim = generate_spatial_data(&SimSpatialArgs::default())?;
    // 300 components: every stripe (40, 30, 30 cells) is too small
    let config = LatentConfig {
        n_comps: 300,
        epochs: 2,
        hierarchically: true,
        ..quick_config(dir.path())
    };

    let out = find_latent_representations(sim.data, &config)?;
    let gvae = &out.obsm[LATENT_GVAE_HIERARCHY];
    let pca = &out.obsm[LATENT_PCA_HIERARCHY];
    assert_eq!(gvae.shape(), (100, 300));
    assert_eq!(gvae, pca);
    Ok(())
}

#[test]
fn hierarchical_rows_match_each_group_alone() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let sim = generate_spatial_data(&SimSpatialArgs::default())?;
    let config = LatentConfig {
        epochs: 2,
        ..quick_config(dir.path())
    };

    let latent = find_hierarchical_latent(
        &sim.data,
        SIM_ANNOTATION,
        &config,
        SmallGroupPolicy::PcaSubstitution,
    )?;

    // stripes appear in order of type
    let names = latent
        .groups
        .iter()
        .map(|g| g.name.to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["type_0", "type_1", "type_2"]);
    assert!(latent.groups.iter().all(|g| !g.substituted));

    for k in 0..3 {
        let rows = (0..100)
            .filter(|&i| sim.cell_types[i] == k)
            .collect::<Vec<_>>();
        let group = sim.data.subset_rows(&rows)?;
        let group_config = config.for_group(&format!("type_{}", k));
        let pca = LatentRepresentationFinder::new(&group, &group_config)?.run_pca()?;
        for (r, &i) in rows.iter().enumerate() {
            for j in 0..pca.ncols() {
                approx::assert_abs_diff_eq!(latent.pca[(i, j)], pca[(r, j)], epsilon = 1e-5);
            }
        }
    }
    Ok(())
}

#[test]
fn missing_annotation_column_is_a_configuration_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let sim = generate_spatial_data(&SimSpatialArgs::default())?;
    let config = LatentConfig {
        annotation: Some("no_such_column".into()),
        ..quick_config(dir.path())
    };
    write_h5ad(&sim.data, &config.input_hdf5_path)?;

    let err = run_latent(&config).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LupinError>(),
        Some(LupinError::Configuration(_))
    ));
    assert!(!std::path::Path::new(&config.output_hdf5_path).exists());
    Ok(())
}

#[test]
fn missing_input_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = quick_config(dir.path());
    let err = run_latent(&config).unwrap_err();
    assert!(matches!(err.downcast_ref::<LupinError>(), Some(LupinError::Io(_))));
}

#[test]
fn small_groups_are_dropped_before_training() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let sim = generate_spatial_data(&SimSpatialArgs::default())?;
    // only the 40-cell stripe survives
    let config = LatentConfig {
        min_group_size: 35,
        epochs: 2,
        ..quick_config(dir.path())
    };

    let out = find_latent_representations(sim.data, &config)?;
    assert_eq!(out.num_obs(), 40);
    assert_eq!(out.obsm[LATENT_GVAE].shape(), (40, 10));
    assert_eq!(out.obsm[LATENT_PCA].shape(), (40, 10));
    assert!(!out.obsm.contains_key(LATENT_GVAE_HIERARCHY));
    Ok(())
}
