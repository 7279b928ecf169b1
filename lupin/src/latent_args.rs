use clap::{ArgAction, Args};
use serde::Serialize;

/// Options of `lupin latent`
///
/// Built once from the command line and never modified afterwards;
/// sizes discovered while preprocessing travel in [`ModelDims`].
#[derive(Args, Debug, Clone, Serialize)]
pub struct LatentConfig {
    /// Input h5ad file (cells x genes with `obsm["spatial"]`)
    #[arg(long, required = true)]
    pub input_hdf5_path: String,

    /// Output h5ad file; parent directories are created
    #[arg(long, required = true)]
    pub output_hdf5_path: String,

    /// Sample name for logging
    #[arg(long, required = true)]
    pub sample_name: String,

    /// Annotation column in `obs`: cells without a value and groups
    /// with too few cells are removed, the rest become class labels
    #[arg(long)]
    pub annotation: Option<String>,

    /// Expression layer to use; `count` or `counts` also selects the
    /// count preprocessing
    #[arg(long = "type")]
    #[serde(rename = "type")]
    pub data_type: Option<String>,

    /// Number of training epochs
    #[arg(long, default_value_t = 300)]
    pub epochs: usize,

    /// First hidden layer of the feature encoder
    #[arg(long, default_value_t = 256)]
    pub feat_hidden1: usize,

    /// Second hidden layer of the feature encoder
    #[arg(long, default_value_t = 128)]
    pub feat_hidden2: usize,

    /// Number of highly variable genes
    #[arg(long, default_value_t = 3000)]
    pub feat_cell: usize,

    /// Width of each attention head in the first graph layer
    #[arg(long, default_value_t = 64)]
    pub gcn_hidden1: usize,

    /// Latent dimension
    #[arg(long, default_value_t = 30)]
    pub gcn_hidden2: usize,

    /// Dropout rate
    #[arg(long, default_value_t = 0.1)]
    pub p_drop: f32,

    /// Learning rate
    #[arg(long, default_value_t = 1e-3)]
    pub gcn_lr: f32,

    /// Weight decay
    #[arg(long, default_value_t = 1e-2)]
    pub gcn_decay: f32,

    /// Spatial neighbours per cell
    #[arg(long, default_value_t = 11)]
    pub n_neighbors: usize,

    /// Weight of the label loss
    #[arg(long, default_value_t = 1.0)]
    pub label_w: f32,

    /// Weight of the reconstruction loss
    #[arg(long, default_value_t = 1.0)]
    pub rec_w: f32,

    /// Weight of the edge reconstruction loss (0: off)
    #[arg(long, default_value_t = 0.0)]
    pub adj_w: f32,

    /// Reduce the selected genes by PCA before training
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub input_pca: bool,

    /// Number of principal components
    #[arg(long, default_value_t = 300)]
    pub n_comps: usize,

    /// Weight spatial edges by a Gaussian kernel of distance
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub weighted_adj: bool,

    /// Attention heads
    #[arg(long, default_value_t = 3)]
    pub nheads: usize,

    /// Stop once the relative change of the loss falls below this
    #[arg(long, default_value_t = 1e-4)]
    pub convergence_threshold: f32,

    /// Also compute latent states within each annotation group
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub hierarchically: bool,

    /// Random seed
    #[arg(long, default_value_t = 20230609)]
    pub seed: u64,

    /// Annotation groups with fewer cells are removed
    #[arg(long, default_value_t = 30)]
    pub min_group_size: usize,

    /// Neighbours of the UMAP graph
    #[arg(long, default_value_t = 10)]
    pub umap_neighbors: usize,

    /// verbosity
    #[arg(long, short)]
    pub verbose: bool,
}

impl Default for LatentConfig {
    fn default() -> Self {
        Self {
            input_hdf5_path: String::new(),
            output_hdf5_path: String::new(),
            sample_name: String::new(),
            annotation: None,
            data_type: None,
            epochs: 300,
            feat_hidden1: 256,
            feat_hidden2: 128,
            feat_cell: 3000,
            gcn_hidden1: 64,
            gcn_hidden2: 30,
            p_drop: 0.1,
            gcn_lr: 1e-3,
            gcn_decay: 1e-2,
            n_neighbors: 11,
            label_w: 1.0,
            rec_w: 1.0,
            adj_w: 0.0,
            input_pca: true,
            n_comps: 300,
            weighted_adj: false,
            nheads: 3,
            convergence_threshold: 1e-4,
            hierarchically: false,
            seed: 20230609,
            min_group_size: 30,
            umap_neighbors: 10,
            verbose: false,
        }
    }
}

impl LatentConfig {
    /// Reject settings no dataset could satisfy
    pub fn validate(&self) -> anyhow::Result<()> {
        use crate::errors::LupinError;

        let positive = [
            ("epochs", self.epochs),
            ("feat-hidden1", self.feat_hidden1),
            ("feat-hidden2", self.feat_hidden2),
            ("feat-cell", self.feat_cell),
            ("gcn-hidden1", self.gcn_hidden1),
            ("gcn-hidden2", self.gcn_hidden2),
            ("n-neighbors", self.n_neighbors),
            ("n-comps", self.n_comps),
            ("nheads", self.nheads),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(LupinError::configuration(format!("{} must be >= 1", name)));
            }
        }
        if !(0.0..1.0).contains(&self.p_drop) {
            return Err(LupinError::configuration(format!(
                "p-drop must be in [0, 1), got {}",
                self.p_drop
            )));
        }
        if self.gcn_lr <= 0.0 || !self.gcn_lr.is_finite() {
            return Err(LupinError::configuration("gcn-lr must be positive"));
        }
        let weights = [
            ("label-w", self.label_w),
            ("rec-w", self.rec_w),
            ("adj-w", self.adj_w),
            ("gcn-decay", self.gcn_decay),
            ("convergence-threshold", self.convergence_threshold),
        ];
        for (name, value) in weights {
            if value < 0.0 || !value.is_finite() {
                return Err(LupinError::configuration(format!(
                    "{} must be non-negative, got {}",
                    name, value
                )));
            }
        }
        if self.hierarchically && self.annotation.is_none() {
            log::warn!("--hierarchically has no effect without --annotation");
        }
        Ok(())
    }

    /// The configuration used inside one annotation group: the frozen
    /// template with the group's name as the sample name
    pub fn for_group(&self, group: &str) -> LatentConfig {
        LatentConfig {
            sample_name: format!("{}/{}", self.sample_name, group),
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Sizes discovered from the data of one training run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelDims {
    pub n_nodes: usize,
    pub n_features: usize,
    /// 0 without labels
    pub n_classes: usize,
}
