use data_beans::h5_tree::*;
use data_beans::h5ad_io::*;
use data_beans::simulate::*;
use data_beans::sparse_util::{csr_from_dense, csr_to_dense};
use data_beans::{ObsColumn, SPATIAL_KEY};
use matrix_util::Mat;
use std::collections::BTreeMap;

use approx::assert_abs_diff_eq;

fn small_args() -> SimSpatialArgs {
    SimSpatialArgs {
        grid_rows: 4,
        grid_cols: 6,
        n_genes: 12,
        n_types: 2,
        markers: 3,
        ..Default::default()
    }
}

#[test]
fn write_and_read_back() -> anyhow::Result<()> {
    let mut data = generate_spatial_data(&small_args())?.data;
    data.set_obs_column(
        "depth",
        ObsColumn::Numeric((0..data.num_obs()).map(|i| i as f64).collect()),
    )?;
    data.set_obs_column(
        "region",
        ObsColumn::Text(
            (0..data.num_obs())
                .map(|i| if i < 12 { "top".into() } else { "bottom".into() })
                .collect(),
        ),
    )?;
    let mut latent = Mat::from_fn(data.num_obs(), 3, |i, j| (i * 3 + j) as f32);
    latent[(0, 0)] = f32::NAN;
    data.insert_obsm("latent_PCA", latent.clone())?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("out.h5ad");
    write_h5ad(&data, &path)?;
    assert!(path.exists());

    let back = read_h5ad(&path)?;
    assert_eq!(back.obs_names, data.obs_names);
    assert_eq!(back.var_names, data.var_names);
    assert_eq!(csr_to_dense(&back.x), csr_to_dense(&data.x));
    assert_eq!(
        csr_to_dense(&back.layers[SIM_COUNT_LAYER]),
        csr_to_dense(&data.layers[SIM_COUNT_LAYER])
    );
    assert_eq!(back.obs, data.obs);
    assert_eq!(back.coordinates()?, data.coordinates()?);

    let z = &back.obsm["latent_PCA"];
    assert!(z[(0, 0)].is_nan());
    assert_abs_diff_eq!(z[(5, 2)], latent[(5, 2)]);

    let members = list_members(&path, "obsm")?;
    assert_eq!(members[SPATIAL_KEY], vec![24, 2]);
    Ok(())
}

#[test]
fn no_partial_file_left_behind() -> anyhow::Result<()> {
    let data = generate_spatial_data(&small_args())?.data;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.h5ad");
    write_h5ad(&data, &path)?;

    // only the renamed output remains
    let names = std::fs::read_dir(dir.path())?
        .map(|e| Ok(e?.file_name().to_string_lossy().to_string()))
        .collect::<anyhow::Result<Vec<_>>>()?;
    assert_eq!(names, vec!["out.h5ad".to_string()]);
    Ok(())
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(read_h5ad(dir.path().join("nothing.h5ad")).is_err());
}

#[test]
fn categorical_missing_codes_survive() -> anyhow::Result<()> {
    let mut data = generate_spatial_data(&small_args())?.data;
    let mut codes = vec![0; data.num_obs()];
    codes[3] = -1;
    data.set_obs_column(
        "label",
        ObsColumn::Categorical {
            codes,
            categories: vec!["A".into()],
        },
    )?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("cat.h5ad");
    write_h5ad(&data, &path)?;
    let back = read_h5ad(&path)?;
    let col = back.obs_column("label").unwrap();
    assert_eq!(col.value(3), None);
    assert_eq!(col.value(0), Some("A".into()));
    Ok(())
}

#[test]
fn gene_metadata_pairwise_and_uns_survive() -> anyhow::Result<()> {
    let mut data = generate_spatial_data(&small_args())?.data;
    let (nn, dd) = (data.num_obs(), data.num_vars());

    data.set_var_column(
        "gene_ids",
        ObsColumn::Text((0..dd).map(|g| format!("ENSG{:05}", g).into()).collect()),
    )?;
    data.set_var_column(
        "highly_variable",
        ObsColumn::Numeric((0..dd).map(|g| (g % 2) as f64).collect()),
    )?;
    data.varm.insert("PCs".into(), Mat::from_fn(dd, 2, |i, j| (i + j) as f32));
    data.obsp.insert(
        "connectivities".into(),
        csr_from_dense(&Mat::from_fn(nn, nn, |i, j| if i + 1 == j { 1.0 } else { 0.0 })),
    );
    data.obsm_frames.insert(
        "proportions".into(),
        vec![("A".into(), ObsColumn::Numeric(vec![0.25; nn]))],
    );

    let spatial = H5Node::Group {
        attrs: BTreeMap::from([("encoding-type".to_string(), H5Values::scalar_text("dict"))]),
        members: BTreeMap::from([
            (
                "library_id".to_string(),
                H5Node::Dataset {
                    attrs: H5Attrs::new(),
                    values: H5Values::scalar_text("slice1"),
                },
            ),
            (
                "scalefactors".to_string(),
                H5Node::Dataset {
                    attrs: H5Attrs::new(),
                    values: H5Values {
                        shape: vec![2, 2],
                        data: H5Array::Float(vec![0.5, 1.5, 2.5, 3.5]),
                    },
                },
            ),
        ]),
    };
    data.uns.insert("spatial".into(), spatial);

    let dir = tempfile::tempdir()?;
    let first = dir.path().join("first.h5ad");
    write_h5ad(&data, &first)?;

    // an entry written by another tool
    {
        let file = hdf5::File::open_rw(&first)?;
        file.group("uns")?
            .new_dataset::<i32>()
            .shape(())
            .create("n_neighbors")?
            .write_scalar(&15)?;
    }

    let back = read_h5ad(&first)?;
    assert_eq!(back.var, data.var);
    assert_eq!(back.varm, data.varm);
    assert_eq!(
        csr_to_dense(&back.obsp["connectivities"]),
        csr_to_dense(&data.obsp["connectivities"])
    );
    assert_eq!(back.obsm_frames, data.obsm_frames);
    assert_eq!(back.uns["spatial"], data.uns["spatial"]);
    let n_neighbors = match &back.uns["n_neighbors"] {
        H5Node::Dataset { values, .. } => values.clone(),
        H5Node::Group { .. } => panic!("n_neighbors should be a dataset"),
    };
    assert_eq!(n_neighbors.data, H5Array::Int(vec![15]));

    // and once more through the writer
    let second = dir.path().join("second.h5ad");
    write_h5ad(&back, &second)?;
    let again = read_h5ad(&second)?;
    assert_eq!(again.uns, back.uns);
    assert_eq!(again.var, back.var);
    Ok(())
}
