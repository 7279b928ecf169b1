use crate::annotation::group_rows;
use crate::latent_finder::LatentRepresentationFinder;
use crate::lupin_common::*;

use indicatif::{ProgressBar, ProgressDrawTarget};

/// What to do with annotation groups too small for a GNN-VAE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmallGroupPolicy {
    /// A group with no more cells than principal components takes its
    /// PCA embedding as its GNN-VAE embedding; the network is not
    /// trained.
    #[default]
    PcaSubstitution,
}

impl SmallGroupPolicy {
    pub fn skips_gvae(&self, n_cells: usize, n_comps: usize) -> bool {
        match self {
            SmallGroupPolicy::PcaSubstitution => n_cells <= n_comps,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub name: Box<str>,
    pub n_cells: usize,
    pub substituted: bool,
}

/// Per-group embeddings placed back at the rows of the whole dataset;
/// cells outside every group stay NaN
pub struct HierarchicalLatent {
    pub gvae: Mat,
    pub pca: Mat,
    pub groups: Vec<GroupSummary>,
}

/// Run the latent pipeline separately within each group of
/// `annotation`, groups taken in order of first appearance
///
/// * `data` - dataset
/// * `annotation` - obs column defining the groups
/// * `config` - template configuration; each group gets its own copy
/// * `policy` - small group handling
pub fn find_hierarchical_latent(
    data: &SpatialData,
    annotation: &str,
    config: &LatentConfig,
    policy: SmallGroupPolicy,
) -> anyhow::Result<HierarchicalLatent> {
    let column = data.obs_column(annotation).ok_or_else(|| {
        LupinError::configuration(format!("annotation column {} is not in obs", annotation))
    })?;

    let groups = group_rows(column);
    info!("hierarchical latent states for {} groups", groups.len());

    let pb = ProgressBar::new(groups.len() as u64);
    if config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut gvae_parts = Vec::with_capacity(groups.len());
    let mut pca_parts = Vec::with_capacity(groups.len());
    let mut summary = Vec::with_capacity(groups.len());

    for (name, rows) in groups {
        let group_data = data.subset_rows(&rows)?;
        let group_config = config.for_group(&name);
        let finder = LatentRepresentationFinder::new(&group_data, &group_config)?;

        let pca = finder.run_pca()?;
        let substituted = policy.skips_gvae(rows.len(), group_config.n_comps);
        let gvae = if substituted {
            info!(
                "group {}: {} cells <= {} components, PCA in place of GNN-VAE",
                name,
                rows.len(),
                group_config.n_comps
            );
            pca.clone()
        } else {
            finder.run_gnn_vae(None, &name)?
        };

        summary.push(GroupSummary {
            name,
            n_cells: rows.len(),
            substituted,
        });
        gvae_parts.push((rows.clone(), gvae));
        pca_parts.push((rows, pca));
        pb.inc(1);
    }
    pb.finish_and_clear();

    let nn = data.num_obs();
    Ok(HierarchicalLatent {
        gvae: reassemble(nn, &gvae_parts)?,
        pca: reassemble(nn, &pca_parts)?,
        groups: summary,
    })
}

/// Stack group matrices into `n_rows` rows at their original indices,
/// as wide as the widest group; everything else is NaN
pub fn reassemble(n_rows: usize, parts: &[(Vec<usize>, Mat)]) -> anyhow::Result<Mat> {
    let width = parts.iter().map(|(_, m)| m.ncols()).max().unwrap_or(0);
    let mut ret = Mat::from_element(n_rows, width, f32::NAN);

    for (rows, m) in parts {
        if rows.len() != m.nrows() {
            anyhow::bail!("{} rows for a {} x {} matrix", rows.len(), m.nrows(), m.ncols());
        }
        for (r, &i) in rows.iter().enumerate() {
            if i >= n_rows {
                anyhow::bail!("row {} out of range ({} rows)", i, n_rows);
            }
            for j in 0..m.ncols() {
                ret[(i, j)] = m[(r, j)];
            }
        }
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembly_restores_row_order() -> anyhow::Result<()> {
        let a = Mat::from_row_slice(2, 2, &[1., 2., 3., 4.]);
        let b = Mat::from_row_slice(2, 1, &[5., 6.]);
        let parts = vec![(vec![3, 0], a), (vec![1, 4], b)];
        let m = reassemble(5, &parts)?;

        assert_eq!(m.shape(), (5, 2));
        assert_eq!(m[(0, 0)], 3.);
        assert_eq!(m[(0, 1)], 4.);
        assert_eq!(m[(3, 0)], 1.);
        assert_eq!(m[(1, 0)], 5.);
        assert!(m[(1, 1)].is_nan());
        assert_eq!(m[(4, 0)], 6.);
        // row 2 belongs to no group
        assert!(m.row(2).iter().all(|x| x.is_nan()));
        Ok(())
    }

    #[test]
    fn mismatched_parts_are_rejected() {
        let parts = vec![(vec![0, 1, 2], Mat::zeros(2, 2))];
        assert!(reassemble(3, &parts).is_err());
        let parts = vec![(vec![7], Mat::zeros(1, 2))];
        assert!(reassemble(3, &parts).is_err());
    }

    #[test]
    fn small_group_rule() {
        let policy = SmallGroupPolicy::default();
        assert!(policy.skips_gvae(10, 10));
        assert!(policy.skips_gvae(3, 10));
        assert!(!policy.skips_gvae(11, 10));
    }
}
