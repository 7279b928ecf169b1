use crate::errors::training_error;
use crate::feature_preprocess::*;
use crate::lupin_common::*;
use crate::spatial_adjacency::SpatialGraph;

use candle_util::candle_core::{Device, Tensor};
use candle_util::candle_gvae_model::LossWeights;
use candle_util::candle_inference::TrainConfig;
use candle_util::candle_nn::VarMap;
use candle_util::{GvaeModel, GvaeModelConfig, GvaeTrainer, TrainState};

/// Outcome of one GNN-VAE training run
pub struct GvaeRun {
    /// cells x `gcn_hidden2` latent means
    pub latent: Mat,
    pub state: TrainState,
    pub loss_trace: Vec<f32>,
    pub dims: ModelDims,
}

/// Latent representations of one dataset (or one annotation group)
///
/// Preprocessing happens once in [`LatentRepresentationFinder::new`];
/// the GNN-VAE and PCA paths then run independently of each other.
pub struct LatentRepresentationFinder<'a> {
    data: &'a SpatialData,
    config: &'a LatentConfig,
    prep: PreprocessedExpression,
}

impl<'a> LatentRepresentationFinder<'a> {
    pub fn new(data: &'a SpatialData, config: &'a LatentConfig) -> anyhow::Result<Self> {
        let prep = preprocess_expression(data, config.data_type.as_deref(), config.feat_cell)?;
        Ok(Self { data, config, prep })
    }

    /// GNN-VAE latent means (cells x `gcn_hidden2`)
    ///
    /// * `labels` - optional class code of every cell
    /// * `tag` - what is being embedded, for logging
    pub fn run_gnn_vae(&self, labels: Option<&[u32]>, tag: &str) -> anyhow::Result<Mat> {
        Ok(self.train_gnn_vae(labels, tag)?.latent)
    }

    pub fn train_gnn_vae(&self, labels: Option<&[u32]>, tag: &str) -> anyhow::Result<GvaeRun> {
        let config = self.config;
        info!("finding latent representations for {}", tag);

        let coords = self
            .data
            .coordinates()
            .map_err(|e| LupinError::data(e.to_string()))?;

        let graph = SpatialGraph::build(coords, config.n_neighbors, config.weighted_adj)?;

        let features_nd = self
            .prep
            .feature_matrix(config.input_pca, config.n_comps, config.seed)?;

        let n_nodes = features_nd.nrows();
        let n_classes = match labels {
            Some(labels) => {
                if labels.len() != n_nodes {
                    return Err(LupinError::configuration(format!(
                        "{} labels for {} cells",
                        labels.len(),
                        n_nodes
                    )));
                }
                labels.iter().max().map(|&k| k as usize + 1).unwrap_or(0)
            }
            None => 0,
        };

        let dims = ModelDims {
            n_nodes,
            n_features: features_nd.ncols(),
            n_classes,
        };
        info!("feature matrix: {} x {}", dims.n_nodes, dims.n_features);

        let dev = Device::Cpu;
        let x_nd = features_nd.to_tensor(&dev)?;
        let graph_t = graph.to_tensors(&dev)?;
        let labels_n = match labels {
            Some(labels) => Some(Tensor::from_slice(labels, labels.len(), &dev)?),
            None => None,
        };

        let model_config = GvaeModelConfig {
            n_features: dims.n_features,
            feat_hidden1: config.feat_hidden1,
            feat_hidden2: config.feat_hidden2,
            gcn_hidden1: config.gcn_hidden1,
            gcn_hidden2: config.gcn_hidden2,
            n_heads: config.nheads,
            p_drop: config.p_drop,
            n_classes: dims.n_classes,
            seed: config.seed,
        };

        let varmap = VarMap::new();
        let model = GvaeModel::new(&model_config, &varmap, &dev)?;

        let weights = LossWeights {
            rec_w: config.rec_w,
            label_w: config.label_w,
            adj_w: config.adj_w,
        };

        let train_config = TrainConfig {
            learning_rate: config.gcn_lr,
            weight_decay: config.gcn_decay,
            num_epochs: config.epochs,
            convergence_threshold: config.convergence_threshold,
            device: dev.clone(),
            verbose: config.verbose,
            show_progress: true,
        };

        let mut trainer = GvaeTrainer::new(&model, &varmap);
        let state = trainer
            .train(&x_nd, &graph_t, labels_n.as_ref(), &weights, &train_config)
            .map_err(training_error)?;

        let z_nk = trainer.get_latent(&x_nd, &graph_t).map_err(training_error)?;
        let latent = Mat::from_tensor(&z_nk)?;

        info!(
            "{}: {:?}, latent {} x {}",
            tag,
            state,
            latent.nrows(),
            latent.ncols()
        );

        Ok(GvaeRun {
            latent,
            state,
            loss_trace: trainer.loss_trace().to_vec(),
            dims,
        })
    }

    /// PCA scores of the preprocessed expression of every gene,
    /// `n_comps` columns (zero beyond the attainable rank)
    pub fn run_pca(&self) -> anyhow::Result<Mat> {
        self.prep.pca(self.config.n_comps, self.config.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_beans::simulate::*;

    fn small_config() -> LatentConfig {
        LatentConfig {
            epochs: 3,
            feat_hidden1: 16,
            feat_hidden2: 8,
            feat_cell: 20,
            gcn_hidden1: 4,
            gcn_hidden2: 5,
            n_neighbors: 4,
            n_comps: 6,
            nheads: 2,
            data_type: Some("counts".into()),
            ..Default::default()
        }
    }

    #[test]
    fn gvae_and_pca_shapes() -> anyhow::Result<()> {
        let sim = generate_spatial_data(&SimSpatialArgs::default())?;
        let config = small_config();
        let finder = LatentRepresentationFinder::new(&sim.data, &config)?;

        let labels = sim.cell_types.iter().map(|&k| k as u32).collect::<Vec<_>>();
        let run = finder.train_gnn_vae(Some(labels.as_slice()), "test")?;
        assert_eq!(run.latent.shape(), (100, 5));
        assert_eq!(
            run.dims,
            ModelDims {
                n_nodes: 100,
                n_features: 6,
                n_classes: 3
            }
        );
        assert!(run.state.is_finished());
        assert!(!run.latent.has_non_finite());

        let pca = finder.run_pca()?;
        assert_eq!(pca.shape(), (100, 6));
        Ok(())
    }

    #[test]
    fn label_length_mismatch_is_rejected() -> anyhow::Result<()> {
        let sim = generate_spatial_data(&SimSpatialArgs::default())?;
        let config = small_config();
        let finder = LatentRepresentationFinder::new(&sim.data, &config)?;
        let short: Vec<u32> = vec![0, 1];
        let err = finder.run_gnn_vae(Some(short.as_slice()), "test").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LupinError>(),
            Some(LupinError::Configuration(_))
        ));
        Ok(())
    }

    #[test]
    fn missing_coordinates_is_a_data_error() -> anyhow::Result<()> {
        let mut data = generate_spatial_data(&SimSpatialArgs::default())?.data;
        data.obsm.clear();
        let config = small_config();
        let finder = LatentRepresentationFinder::new(&data, &config)?;
        // PCA does not need coordinates
        assert_eq!(finder.run_pca()?.ncols(), 6);
        let err = finder.run_gnn_vae(None, "test").unwrap_err();
        assert!(matches!(err.downcast_ref::<LupinError>(), Some(LupinError::Data(_))));
        Ok(())
    }
}
