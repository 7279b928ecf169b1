use crate::h5_tree::*;
use crate::sparse_util::*;
use crate::spatial_data::{ObsColumn, SpatialData};
use matrix_util::{CsrMat, Mat};

use hdf5::types::{FixedAscii, FixedUnicode, TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{Dataset, Group, H5Type, Location};
use log::{info, warn};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Read an h5ad file
///
/// * `X`, `layers/*`, `obsp/*` and `varp/*` may be dense 2D datasets or
///   `csr_matrix` / `csc_matrix` groups
/// * `obs` and `var` columns may be categorical groups, nullable
///   groups, string or numeric datasets
/// * `obsm/*` and `varm/*` may be dense or sparse matrices; `obsm/*`
///   may also be dataframes
/// * `uns` is kept as a tree of groups and arrays
pub fn read_h5ad<P: AsRef<Path>>(path: P) -> anyhow::Result<SpatialData> {
    let path = path.as_ref();
    let file = hdf5::File::open(path)?;
    info!("reading {}", path.display());

    let x = read_matrix(&file, "X")?;

    let obs = file.group("obs")?;
    let var = file.group("var")?;

    let obs_names = read_dataframe_index(&obs)?;
    let var_names = read_dataframe_index(&var)?;

    let mut data = SpatialData::new(x, obs_names, var_names)?;

    if let Ok(layers) = file.group("layers") {
        for name in layers.member_names()? {
            let m = read_matrix(&layers, &name)?;
            data.layers.insert(name, m);
        }
    }

    for (name, col) in read_dataframe_columns(&obs)? {
        data.set_obs_column(&name, col)?;
    }
    for (name, col) in read_dataframe_columns(&var)? {
        data.set_var_column(&name, col)?;
    }

    if let Ok(obsm) = file.group("obsm") {
        for name in obsm.member_names()? {
            if is_dataframe(&obsm, &name) {
                let frame = read_dataframe_columns(&obsm.group(&name)?)?;
                data.obsm_frames.insert(name, frame);
                continue;
            }
            match read_dense(&obsm, &name) {
                Ok(m) => data.insert_obsm(&name, m)?,
                Err(e) => warn!("skipping obsm {}: {}", name, e),
            }
        }
    }

    if let Ok(varm) = file.group("varm") {
        for name in varm.member_names()? {
            match read_dense(&varm, &name) {
                Ok(m) => {
                    data.varm.insert(name, m);
                }
                Err(e) => warn!("skipping varm {}: {}", name, e),
            }
        }
    }

    for (key, target) in [("obsp", &mut data.obsp), ("varp", &mut data.varp)] {
        if let Ok(group) = file.group(key) {
            for name in group.member_names()? {
                match read_matrix(&group, &name) {
                    Ok(m) => {
                        target.insert(name, m);
                    }
                    Err(e) => warn!("skipping {} {}: {}", key, name, e),
                }
            }
        }
    }

    if let Ok(uns) = file.group("uns") {
        data.uns = read_members(&uns)?;
    }

    data.validate()?;
    info!(
        "{} cells x {} genes, {} layer(s), {} obs column(s), {} var column(s), obsm: {:?}",
        data.num_obs(),
        data.num_vars(),
        data.layers.len(),
        data.obs.len(),
        data.var.len(),
        data.obsm.keys().collect::<Vec<_>>()
    );
    Ok(data)
}

/// Write `data` as an h5ad file
///
/// The file is first written to a temporary file next to `path`, then
/// renamed, so a failure leaves no partial output. Missing parent
/// directories are created.
pub fn write_h5ad<P: AsRef<Path>>(data: &SpatialData, path: P) -> anyhow::Result<()> {
    data.validate()?;

    let path = path.as_ref();
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let temp_path = tempfile::Builder::new()
        .prefix(".h5ad-")
        .suffix(".tmp")
        .tempfile_in(&dir)?
        .into_temp_path();

    {
        let file = hdf5::File::create(&temp_path)?;
        write_contents(&file, data)?;
        file.close()?;
    }

    temp_path.persist(path)?;
    info!("wrote {}", path.display());
    Ok(())
}

fn write_contents(file: &hdf5::File, data: &SpatialData) -> anyhow::Result<()> {
    set_encoding(file, "anndata", "0.1.0")?;

    write_csr(file, "X", &data.x)?;

    let layers = file.create_group("layers")?;
    set_encoding(&layers, "dict", "0.1.0")?;
    for (name, m) in data.layers.iter() {
        write_csr(&layers, name, m)?;
    }

    write_dataframe(file, "obs", &data.obs_names, &data.obs)?;
    write_dataframe(file, "var", &data.var_names, &data.var)?;

    let obsm = file.create_group("obsm")?;
    set_encoding(&obsm, "dict", "0.1.0")?;
    for (name, m) in data.obsm.iter() {
        write_dense(&obsm, name, m)?;
    }
    for (name, frame) in data.obsm_frames.iter() {
        write_dataframe(&obsm, name, &data.obs_names, frame)?;
    }

    let varm = file.create_group("varm")?;
    set_encoding(&varm, "dict", "0.1.0")?;
    for (name, m) in data.varm.iter() {
        write_dense(&varm, name, m)?;
    }

    for (key, mats) in [("obsp", &data.obsp), ("varp", &data.varp)] {
        let g = file.create_group(key)?;
        set_encoding(&g, "dict", "0.1.0")?;
        for (name, m) in mats.iter() {
            write_csr(&g, name, m)?;
        }
    }

    let uns = file.create_group("uns")?;
    set_encoding(&uns, "dict", "0.1.0")?;
    write_members(&uns, &data.uns)?;

    file.flush()?;
    Ok(())
}

/////////////
// reading //
/////////////

fn read_matrix(parent: &Group, name: &str) -> anyhow::Result<CsrMat> {
    if let Ok(group) = parent.group(name) {
        let encoding = read_str_attr(&group, "encoding-type")?;
        let pointer_type = if encoding.contains("csr") {
            IndexPointerType::Row
        } else if encoding.contains("csc") {
            IndexPointerType::Column
        } else {
            anyhow::bail!("{}: unsupported encoding {}", name, encoding);
        };

        let shape = group.attr("shape")?.read_1d::<u64>()?.to_vec();
        if shape.len() != 2 {
            anyhow::bail!("{}: shape should have two elements", name);
        }

        let values = group.dataset("data")?.read_1d::<f32>()?.to_vec();
        let indices = group.dataset("indices")?.read_1d::<u64>()?.to_vec();
        let indptr = group.dataset("indptr")?.read_1d::<u64>()?.to_vec();

        ValuesIndicesPointers {
            values: &values,
            indices: &indices,
            indptr: &indptr,
        }
        .to_csr(shape[0] as usize, shape[1] as usize, pointer_type)
    } else {
        let arr = parent.dataset(name)?.read_2d::<f32>()?;
        let (nrow, ncol) = arr.dim();
        let dense = Mat::from_row_iterator(nrow, ncol, arr.iter().cloned());
        Ok(csr_from_dense(&dense))
    }
}

fn read_dataframe_index(group: &Group) -> anyhow::Result<Vec<Box<str>>> {
    let key = read_str_attr(group, "_index").unwrap_or_else(|_| "_index".to_string());
    read_hdf5_strings(&group.dataset(&key)?)
}

fn is_dataframe(parent: &Group, name: &str) -> bool {
    match parent.group(name) {
        Ok(g) => read_str_attr(&g, "encoding-type").is_ok_and(|enc| enc == "dataframe"),
        Err(_) => false,
    }
}

/// Dense matrix from a 2D dataset or a sparse group
fn read_dense(parent: &Group, name: &str) -> anyhow::Result<Mat> {
    match parent.dataset(name) {
        Ok(ds) if ds.ndim() == 2 => {
            let arr = ds.read_2d::<f32>()?;
            let (nrow, ncol) = arr.dim();
            Ok(Mat::from_row_iterator(nrow, ncol, arr.iter().cloned()))
        }
        Ok(ds) => anyhow::bail!("{} has {} dimension(s)", name, ds.ndim()),
        Err(_) => Ok(csr_to_dense(&read_matrix(parent, name)?)),
    }
}

/// Column names in `column-order`, or every member but the index
fn dataframe_columns(group: &Group) -> anyhow::Result<Vec<String>> {
    let index_key = read_str_attr(group, "_index").unwrap_or_else(|_| "_index".to_string());

    if let Ok(attr) = group.attr("column-order") {
        // an empty column order is stored as an empty float array
        if attr.size() == 0 {
            return Ok(vec![]);
        }
        if let Ok(names) = read_hdf5_strings(&attr) {
            return Ok(names.into_iter().map(|x| x.to_string()).collect());
        }
    }

    Ok(group
        .member_names()?
        .into_iter()
        .filter(|x| *x != index_key && x != "__categories")
        .collect())
}

/// Columns of a dataframe group in order; unsupported ones are skipped
fn read_dataframe_columns(group: &Group) -> anyhow::Result<Vec<(String, ObsColumn)>> {
    let mut ret = vec![];
    for name in dataframe_columns(group)? {
        match read_frame_column(group, &name)? {
            Some(col) => ret.push((name, col)),
            None => warn!("skipping column {}/{}", group.name(), name),
        }
    }
    Ok(ret)
}

fn read_frame_column(frame: &Group, name: &str) -> anyhow::Result<Option<ObsColumn>> {
    if let Ok(group) = frame.group(name) {
        if group.link_exists("codes") && group.link_exists("categories") {
            let codes = group.dataset("codes")?.read_1d::<i32>()?.to_vec();
            let categories = read_as_strings(&group.dataset("categories")?)?;
            return Ok(Some(ObsColumn::Categorical { codes, categories }));
        }
        if group.link_exists("values") && group.link_exists("mask") {
            let values = read_numeric(&group.dataset("values")?)?;
            let mask = group.dataset("mask")?.read_1d::<bool>()?;
            let values = values
                .into_iter()
                .zip(mask.iter())
                .map(|(v, &missing)| if missing { f64::NAN } else { v })
                .collect();
            return Ok(Some(ObsColumn::Numeric(values)));
        }
        return Ok(None);
    }

    let ds = frame.dataset(name)?;
    if ds.ndim() != 1 {
        return Ok(None);
    }
    if is_string_type(&ds)? {
        Ok(Some(ObsColumn::Text(read_hdf5_strings(&ds)?)))
    } else {
        match read_numeric(&ds) {
            Ok(v) => Ok(Some(ObsColumn::Numeric(v))),
            Err(_) => Ok(None),
        }
    }
}

fn is_string_type(ds: &Dataset) -> anyhow::Result<bool> {
    Ok(matches!(
        ds.dtype()?.to_descriptor()?,
        TypeDescriptor::VarLenUnicode
            | TypeDescriptor::VarLenAscii
            | TypeDescriptor::FixedAscii(_)
            | TypeDescriptor::FixedUnicode(_)
    ))
}

fn read_numeric(ds: &Dataset) -> anyhow::Result<Vec<f64>> {
    match ds.dtype()?.to_descriptor()? {
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) | TypeDescriptor::Float(_) => {
            Ok(ds.read_1d::<f64>()?.to_vec())
        }
        TypeDescriptor::Boolean => Ok(ds
            .read_1d::<bool>()?
            .iter()
            .map(|&b| if b { 1.0 } else { 0.0 })
            .collect()),
        _ => Err(anyhow::anyhow!("not a numeric dataset")),
    }
}

/// Categories may be numbers too
fn read_as_strings(ds: &Dataset) -> anyhow::Result<Vec<Box<str>>> {
    if is_string_type(ds)? {
        read_hdf5_strings(ds)
    } else {
        Ok(read_numeric(ds)?
            .into_iter()
            .map(|x| x.to_string().into_boxed_str())
            .collect())
    }
}

/// Read strings from an `HDF5` dataset or attribute
pub fn read_hdf5_strings(data: &hdf5::Container) -> anyhow::Result<Vec<Box<str>>> {
    match read_values(data)? {
        Some(H5Values {
            data: H5Array::Text(v),
            ..
        }) => Ok(v),
        _ => Err(anyhow::anyhow!("unsupported string")),
    }
}

fn read_str_attr(loc: &Location, name: &str) -> anyhow::Result<String> {
    let attr = loc.attr(name)?;
    let ret = match attr.dtype()?.to_descriptor()? {
        TypeDescriptor::VarLenUnicode => attr.read_scalar::<VarLenUnicode>()?.to_string(),
        TypeDescriptor::VarLenAscii => attr.read_scalar::<VarLenAscii>()?.to_string(),
        TypeDescriptor::FixedAscii(_) => attr.read_scalar::<FixedAscii<1024>>()?.to_string(),
        TypeDescriptor::FixedUnicode(_) => attr.read_scalar::<FixedUnicode<1024>>()?.to_string(),
        _ => anyhow::bail!("attribute {} is not a string", name),
    };
    Ok(ret)
}

/////////////
// writing //
/////////////

fn set_str_attr(loc: &Location, name: &str, value: &str) -> anyhow::Result<()> {
    let value = value
        .parse::<VarLenUnicode>()
        .map_err(|e| anyhow::anyhow!("invalid attribute {}: {}", value, e))?;
    loc.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_encoding(loc: &Location, encoding_type: &str, version: &str) -> anyhow::Result<()> {
    set_str_attr(loc, "encoding-type", encoding_type)?;
    set_str_attr(loc, "encoding-version", version)
}

fn write_str_array_attr(loc: &Location, name: &str, values: &[&str]) -> anyhow::Result<()> {
    let values = to_varlen(values)?;
    let attr = loc
        .new_attr::<VarLenUnicode>()
        .shape(values.len())
        .create(name)?;
    if !values.is_empty() {
        attr.write(&values)?;
    }
    Ok(())
}

/// A 1D dataset; empty ones are created but not written
fn write_1d<T: H5Type>(group: &Group, name: &str, values: &[T]) -> anyhow::Result<Dataset> {
    let ds = group.new_dataset::<T>().shape(values.len()).create(name)?;
    if !values.is_empty() {
        ds.write(values)?;
    }
    Ok(ds)
}

fn write_strings(group: &Group, name: &str, values: &[Box<str>]) -> anyhow::Result<()> {
    let ds = write_1d(group, name, &to_varlen(values)?)?;
    set_encoding(&ds, "string-array", "0.2.0")
}

/// A dataframe group: `_index` plus the columns in order
fn write_dataframe(
    parent: &Group,
    name: &str,
    index: &[Box<str>],
    columns: &[(String, ObsColumn)],
) -> anyhow::Result<()> {
    let g = parent.create_group(name)?;
    set_encoding(&g, "dataframe", "0.2.0")?;
    set_str_attr(&g, "_index", "_index")?;
    write_strings(&g, "_index", index)?;

    let column_order = columns.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>();
    write_str_array_attr(&g, "column-order", &column_order)?;
    for (name, col) in columns.iter() {
        write_frame_column(&g, name, col)?;
    }
    Ok(())
}

fn write_frame_column(frame: &Group, name: &str, col: &ObsColumn) -> anyhow::Result<()> {
    match col {
        ObsColumn::Categorical { codes, categories } => {
            let g = frame.create_group(name)?;
            set_encoding(&g, "categorical", "0.2.0")?;
            g.new_attr::<bool>().create("ordered")?.write_scalar(&false)?;
            let ds = write_1d(&g, "codes", codes)?;
            set_encoding(&ds, "array", "0.2.0")?;
            write_strings(&g, "categories", categories)?;
        }
        ObsColumn::Text(values) => write_strings(frame, name, values)?,
        ObsColumn::Numeric(values) => {
            let ds = write_1d(frame, name, values)?;
            set_encoding(&ds, "array", "0.2.0")?;
        }
    }
    Ok(())
}

fn write_csr(parent: &Group, name: &str, x: &CsrMat) -> anyhow::Result<()> {
    let g = parent.create_group(name)?;
    set_encoding(&g, "csr_matrix", "0.1.0")?;

    let shape = vec![x.nrows() as i64, x.ncols() as i64];
    g.new_attr::<i64>().shape(2).create("shape")?.write(&shape)?;

    let indptr = x.row_offsets().iter().map(|&p| p as i64).collect::<Vec<_>>();
    let indices = x.col_indices().iter().map(|&j| j as i64).collect::<Vec<_>>();

    write_1d(&g, "data", x.values())?;
    write_1d(&g, "indices", &indices)?;
    write_1d(&g, "indptr", &indptr)?;
    Ok(())
}

fn write_dense(parent: &Group, name: &str, m: &Mat) -> anyhow::Result<()> {
    let (nrow, ncol) = (m.nrows(), m.ncols());
    // column-major storage of the transpose is row-major storage of `m`
    let row_major = m.transpose().as_slice().to_vec();
    let arr = Array2::from_shape_vec((nrow, ncol), row_major)?;

    let ds = parent.new_dataset::<f32>().shape((nrow, ncol)).create(name)?;
    if nrow * ncol > 0 {
        ds.write(&arr)?;
    }
    set_encoding(&ds, "array", "0.2.0")
}

/// Names of the datasets under a group, for quick inspection
pub fn list_members<P: AsRef<Path>>(path: P, group: &str) -> anyhow::Result<BTreeMap<String, Vec<usize>>> {
    let file = hdf5::File::open(path)?;
    let group = file.group(group)?;
    let mut ret = BTreeMap::new();
    for name in group.member_names()? {
        if let Ok(ds) = group.dataset(&name) {
            ret.insert(name, ds.shape());
        }
    }
    Ok(ret)
}
