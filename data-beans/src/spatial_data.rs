use crate::h5_tree::H5Node;
use crate::sparse_util::{csr_select_rows, csr_select_rows_columns};
use matrix_util::traits::RowColumnOps;
use matrix_util::{CsrMat, Mat};

use log::{info, warn};
use std::collections::{BTreeMap, HashMap};

/// Key of the spatial coordinates in `obsm`
pub const SPATIAL_KEY: &str = "spatial";

/// A dataframe column (`obs`, `var` or a dataframe in `obsm`)
#[derive(Debug, Clone, PartialEq)]
pub enum ObsColumn {
    /// `codes[i]` indexes `categories`; -1 is missing
    Categorical {
        codes: Vec<i32>,
        categories: Vec<Box<str>>,
    },
    Text(Vec<Box<str>>),
    /// NaN is missing
    Numeric(Vec<f64>),
}

impl ObsColumn {
    pub fn len(&self) -> usize {
        match self {
            ObsColumn::Categorical { codes, .. } => codes.len(),
            ObsColumn::Text(v) => v.len(),
            ObsColumn::Numeric(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of row `i` as text, `None` if missing
    pub fn value(&self, i: usize) -> Option<Box<str>> {
        match self {
            ObsColumn::Categorical { codes, categories } => {
                let c = *codes.get(i)?;
                if c < 0 {
                    None
                } else {
                    categories.get(c as usize).cloned()
                }
            }
            ObsColumn::Text(v) => v.get(i).cloned(),
            ObsColumn::Numeric(v) => {
                let x = *v.get(i)?;
                if x.is_nan() {
                    None
                } else {
                    Some(x.to_string().into_boxed_str())
                }
            }
        }
    }

    /// Values of every row, `None` where missing
    pub fn values(&self) -> Vec<Option<Box<str>>> {
        (0..self.len()).map(|i| self.value(i)).collect()
    }

    pub fn subset_rows(&self, rows: &[usize]) -> ObsColumn {
        match self {
            ObsColumn::Categorical { codes, categories } => ObsColumn::Categorical {
                codes: rows.iter().map(|&i| codes[i]).collect(),
                categories: categories.clone(),
            },
            ObsColumn::Text(v) => ObsColumn::Text(rows.iter().map(|&i| v[i].clone()).collect()),
            ObsColumn::Numeric(v) => ObsColumn::Numeric(rows.iter().map(|&i| v[i]).collect()),
        }
    }
}

/// Annotated cell x gene expression data with spatial coordinates
///
/// * `x` - expression (cells x genes)
/// * `layers` - alternative expression matrices of the same shape
/// * `obs` - per-cell columns, in order
/// * `var` - per-gene columns, in order
/// * `obsm` - per-cell matrices (`spatial` holds the coordinates)
/// * `obsm_frames` - per-cell dataframes stored in `obsm`
/// * `varm` - per-gene matrices
/// * `obsp`, `varp` - cell x cell and gene x gene matrices
/// * `uns` - everything else, kept as read
#[derive(Debug, Clone)]
pub struct SpatialData {
    pub x: CsrMat,
    pub layers: BTreeMap<String, CsrMat>,
    pub obs_names: Vec<Box<str>>,
    pub var_names: Vec<Box<str>>,
    pub obs: Vec<(String, ObsColumn)>,
    pub var: Vec<(String, ObsColumn)>,
    pub obsm: BTreeMap<String, Mat>,
    pub obsm_frames: BTreeMap<String, Vec<(String, ObsColumn)>>,
    pub varm: BTreeMap<String, Mat>,
    pub obsp: BTreeMap<String, CsrMat>,
    pub varp: BTreeMap<String, CsrMat>,
    pub uns: BTreeMap<String, H5Node>,
}

impl SpatialData {
    pub fn new(x: CsrMat, obs_names: Vec<Box<str>>, var_names: Vec<Box<str>>) -> anyhow::Result<Self> {
        let ret = Self {
            x,
            layers: BTreeMap::new(),
            obs_names,
            var_names,
            obs: vec![],
            var: vec![],
            obsm: BTreeMap::new(),
            obsm_frames: BTreeMap::new(),
            varm: BTreeMap::new(),
            obsp: BTreeMap::new(),
            varp: BTreeMap::new(),
            uns: BTreeMap::new(),
        };
        ret.validate()?;
        Ok(ret)
    }

    pub fn num_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn num_vars(&self) -> usize {
        self.x.ncols()
    }

    /// Check that every component agrees on the number of cells and
    /// genes
    pub fn validate(&self) -> anyhow::Result<()> {
        let (nn, dd) = (self.num_obs(), self.num_vars());
        if self.obs_names.len() != nn {
            anyhow::bail!("{} cell names for {} cells", self.obs_names.len(), nn);
        }
        if self.var_names.len() != dd {
            anyhow::bail!("{} gene names for {} genes", self.var_names.len(), dd);
        }
        for (name, layer) in self.layers.iter() {
            if layer.nrows() != nn || layer.ncols() != dd {
                anyhow::bail!(
                    "layer {} is {} x {}, expected {} x {}",
                    name,
                    layer.nrows(),
                    layer.ncols(),
                    nn,
                    dd
                );
            }
        }
        for (name, col) in self.obs.iter() {
            if col.len() != nn {
                anyhow::bail!("obs column {} has {} rows, expected {}", name, col.len(), nn);
            }
        }
        for (name, col) in self.var.iter() {
            if col.len() != dd {
                anyhow::bail!("var column {} has {} rows, expected {}", name, col.len(), dd);
            }
        }
        for (name, mat) in self.obsm.iter() {
            if mat.nrows() != nn {
                anyhow::bail!("obsm {} has {} rows, expected {}", name, mat.nrows(), nn);
            }
        }
        for (name, frame) in self.obsm_frames.iter() {
            if frame.iter().any(|(_, col)| col.len() != nn) {
                anyhow::bail!("obsm dataframe {} does not have {} rows", name, nn);
            }
        }
        for (name, mat) in self.varm.iter() {
            if mat.nrows() != dd {
                anyhow::bail!("varm {} has {} rows, expected {}", name, mat.nrows(), dd);
            }
        }
        for (name, mat) in self.obsp.iter() {
            if mat.nrows() != nn || mat.ncols() != nn {
                anyhow::bail!("obsp {} is not {} x {}", name, nn, nn);
            }
        }
        for (name, mat) in self.varp.iter() {
            if mat.nrows() != dd || mat.ncols() != dd {
                anyhow::bail!("varp {} is not {} x {}", name, dd, dd);
            }
        }
        Ok(())
    }

    /// Expression matrix of `layer`, or `X` when `layer` is `None` or
    /// absent
    ///
    /// # Returns `(matrix, whether the layer was found)`
    pub fn expression(&self, layer: Option<&str>) -> (&CsrMat, bool) {
        match layer {
            Some(name) => match self.layers.get(name) {
                Some(m) => (m, true),
                None => (&self.x, false),
            },
            None => (&self.x, false),
        }
    }

    /// Spatial coordinates (`obsm["spatial"]`)
    pub fn coordinates(&self) -> anyhow::Result<&Mat> {
        self.obsm
            .get(SPATIAL_KEY)
            .ok_or_else(|| anyhow::anyhow!("no spatial coordinates in obsm[\"{}\"]", SPATIAL_KEY))
    }

    pub fn obs_column(&self, name: &str) -> Option<&ObsColumn> {
        self.obs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Add or replace an obs column
    pub fn set_obs_column(&mut self, name: &str, column: ObsColumn) -> anyhow::Result<()> {
        if column.len() != self.num_obs() {
            anyhow::bail!("obs column {} has {} rows, expected {}", name, column.len(), self.num_obs());
        }
        match self.obs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = column,
            None => self.obs.push((name.to_string(), column)),
        }
        Ok(())
    }

    pub fn var_column(&self, name: &str) -> Option<&ObsColumn> {
        self.var.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Add or replace a var column
    pub fn set_var_column(&mut self, name: &str, column: ObsColumn) -> anyhow::Result<()> {
        if column.len() != self.num_vars() {
            anyhow::bail!("var column {} has {} rows, expected {}", name, column.len(), self.num_vars());
        }
        match self.var.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = column,
            None => self.var.push((name.to_string(), column)),
        }
        Ok(())
    }

    /// Add or replace an obsm matrix
    pub fn insert_obsm(&mut self, name: &str, mat: Mat) -> anyhow::Result<()> {
        if mat.nrows() != self.num_obs() {
            anyhow::bail!("obsm {} has {} rows, expected {}", name, mat.nrows(), self.num_obs());
        }
        self.obsm.insert(name.to_string(), mat);
        Ok(())
    }

    /// A new dataset of the given rows, in the given order; `obsp`
    /// matrices lose the other cells' columns too
    pub fn subset_rows(&self, rows: &[usize]) -> anyhow::Result<SpatialData> {
        if let Some(&bad) = rows.iter().find(|&&i| i >= self.num_obs()) {
            anyhow::bail!("row {} out of range ({} cells)", bad, self.num_obs());
        }

        let layers = self
            .layers
            .iter()
            .map(|(k, m)| Ok((k.clone(), csr_select_rows(m, rows)?)))
            .collect::<anyhow::Result<BTreeMap<_, _>>>()?;

        let obsp = self
            .obsp
            .iter()
            .map(|(k, m)| Ok((k.clone(), csr_select_rows_columns(m, rows, rows)?)))
            .collect::<anyhow::Result<BTreeMap<_, _>>>()?;

        let subset_frame = |frame: &Vec<(String, ObsColumn)>| {
            frame
                .iter()
                .map(|(k, c)| (k.clone(), c.subset_rows(rows)))
                .collect::<Vec<_>>()
        };

        Ok(SpatialData {
            x: csr_select_rows(&self.x, rows)?,
            layers,
            obs_names: rows.iter().map(|&i| self.obs_names[i].clone()).collect(),
            var_names: self.var_names.clone(),
            obs: subset_frame(&self.obs),
            var: self.var.clone(),
            obsm: self
                .obsm
                .iter()
                .map(|(k, m)| (k.clone(), m.select_rows_by(rows)))
                .collect(),
            obsm_frames: self
                .obsm_frames
                .iter()
                .map(|(k, f)| (k.clone(), subset_frame(f)))
                .collect(),
            varm: self.varm.clone(),
            obsp,
            varp: self.varp.clone(),
            uns: self.uns.clone(),
        })
    }

    /// Make gene names unique by appending `-1`, `-2`, ... to repeats
    pub fn var_names_make_unique(&mut self) {
        make_unique(&mut self.var_names);
    }
}

fn make_unique(names: &mut [Box<str>]) {
    let mut seen: HashMap<Box<str>, usize> = HashMap::new();
    for x in names.iter() {
        *seen.entry(x.clone()).or_default() += 1;
    }
    if seen.values().all(|&c| c == 1) {
        return;
    }

    let mut taken: std::collections::HashSet<Box<str>> = names.iter().cloned().collect();
    let mut counter: HashMap<Box<str>, usize> = HashMap::new();
    let mut first: std::collections::HashSet<Box<str>> = std::collections::HashSet::new();
    let mut renamed = 0;

    for x in names.iter_mut() {
        if seen[&*x] == 1 || first.insert(x.clone()) {
            continue;
        }
        let c = counter.entry(x.clone()).or_insert(0);
        let new_name = loop {
            *c += 1;
            let candidate: Box<str> = format!("{}-{}", x, c).into_boxed_str();
            if !taken.contains(&candidate) {
                break candidate;
            }
        };
        taken.insert(new_name.clone());
        *x = new_name;
        renamed += 1;
    }

    if renamed > 0 {
        warn!("renamed {} duplicated names", renamed);
    }
    info!("{} unique names", names.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse_util::*;

    fn boxed(v: &[&str]) -> Vec<Box<str>> {
        v.iter().map(|&s| s.into()).collect()
    }

    fn tiny() -> SpatialData {
        let x = csr_from_dense(&Mat::from_row_slice(3, 2, &[1., 0., 0., 2., 3., 4.]));
        let mut data = SpatialData::new(x, boxed(&["c0", "c1", "c2"]), boxed(&["g", "h"])).unwrap();
        data.set_obs_column(
            "cell_type",
            ObsColumn::Categorical {
                codes: vec![1, -1, 0],
                categories: boxed(&["A", "B"]),
            },
        )
        .unwrap();
        data.insert_obsm(SPATIAL_KEY, Mat::from_row_slice(3, 2, &[0., 0., 1., 0., 2., 0.]))
            .unwrap();
        data
    }

    #[test]
    fn categorical_missing_values() {
        let data = tiny();
        let col = data.obs_column("cell_type").unwrap();
        assert_eq!(col.values(), vec![Some("B".into()), None, Some("A".into())]);
    }

    #[test]
    fn subset_keeps_everything_aligned() -> anyhow::Result<()> {
        let data = tiny();
        let sub = data.subset_rows(&[2, 0])?;
        assert_eq!(sub.obs_names, boxed(&["c2", "c0"]));
        assert_eq!(csr_to_dense(&sub.x), Mat::from_row_slice(2, 2, &[3., 4., 1., 0.]));
        assert_eq!(sub.coordinates()?.column(0).iter().cloned().collect::<Vec<_>>(), vec![2., 0.]);
        assert_eq!(sub.obs_column("cell_type").unwrap().value(0), Some("A".into()));
        sub.validate()?;
        assert!(data.subset_rows(&[3]).is_err());
        Ok(())
    }

    #[test]
    fn subset_carries_pairwise_and_gene_entries() -> anyhow::Result<()> {
        let mut data = tiny();
        // cell i to cell j has weight 10 i + j
        let dist = Mat::from_fn(3, 3, |i, j| (10 * i + j) as f32);
        data.obsp.insert("distances".into(), csr_from_dense(&dist));
        data.set_var_column("highly_variable", ObsColumn::Numeric(vec![1., 0.]))?;
        data.varm.insert("loadings".into(), Mat::from_element(2, 3, 0.5));
        data.obsm_frames.insert(
            "scores".into(),
            vec![("s".into(), ObsColumn::Numeric(vec![0.1, 0.2, 0.3]))],
        );
        data.validate()?;

        let sub = data.subset_rows(&[2, 0])?;
        sub.validate()?;
        assert_eq!(
            csr_to_dense(&sub.obsp["distances"]),
            Mat::from_row_slice(2, 2, &[22., 20., 2., 0.])
        );
        assert_eq!(sub.var, data.var);
        assert_eq!(sub.varm, data.varm);
        assert_eq!(
            sub.obsm_frames["scores"][0].1,
            ObsColumn::Numeric(vec![0.3, 0.1])
        );
        assert!(data.set_var_column("bad", ObsColumn::Numeric(vec![1.])).is_err());
        Ok(())
    }

    #[test]
    fn make_unique_appends_suffix() {
        let mut names = boxed(&["a", "b", "a", "a-1", "a"]);
        make_unique(&mut names);
        assert_eq!(names, boxed(&["a", "b", "a-2", "a-1", "a-3"]));
    }

    #[test]
    fn rejects_misaligned_obsm() {
        let mut data = tiny();
        assert!(data.insert_obsm("bad", Mat::zeros(2, 2)).is_err());
    }
}
