use crate::candle_gvae_model::{GvaeModel, LossWeights};
use crate::candle_inference::TrainConfig;
use crate::candle_model_traits::NeighbourTensors;

use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

/// Latent columns with less variance than this across nodes count
/// as collapsed
const COLLAPSE_VARIANCE: f32 = 1e-12;

/// Losses shown when training stops early
const RECENT_LOSSES: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("non-finite loss {value} at epoch {epoch}")]
    NonFiniteLoss { epoch: usize, value: f32 },
    #[error("latent representation collapsed to a constant")]
    CollapsedLatent,
    #[error("latent requested before training")]
    NotTrained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainState {
    Initialized,
    Training { epoch: usize },
    Converged { epoch: usize },
    MaxEpochsReached { epoch: usize },
}

impl TrainState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TrainState::Converged { .. } | TrainState::MaxEpochsReached { .. }
        )
    }
}

/// Relative-change stopping rule:
/// `|L(t) - L(t-1)| < threshold * |L(t-1)|`
///
/// Only consecutive losses are compared. Dropout and sampling noise
/// make the training loss non-monotone, so one close pair stops
/// training even if the loss went up or is still falling overall; the
/// trainer logs the last losses when this happens.
pub struct ConvergenceMonitor {
    threshold: f32,
    prev: Option<f32>,
}

impl ConvergenceMonitor {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            prev: None,
        }
    }

    /// Record a loss; true once the change from the previous one is
    /// small enough
    pub fn update(&mut self, loss: f32) -> bool {
        let converged = match self.prev {
            Some(prev) => (loss - prev).abs() < self.threshold * prev.abs(),
            None => false,
        };
        self.prev = Some(loss);
        converged
    }
}

/// Full-graph trainer of a `GvaeModel`
pub struct GvaeTrainer<'a> {
    pub model: &'a GvaeModel,
    pub variable_map: &'a VarMap,
    state: TrainState,
    loss_trace: Vec<f32>,
}

impl<'a> GvaeTrainer<'a> {
    pub fn new(model: &'a GvaeModel, variable_map: &'a VarMap) -> Self {
        Self {
            model,
            variable_map,
            state: TrainState::Initialized,
            loss_trace: vec![],
        }
    }

    pub fn state(&self) -> TrainState {
        self.state
    }

    pub fn loss_trace(&self) -> &[f32] {
        &self.loss_trace
    }

    /// Train on the whole graph, one optimizer step per epoch, until
    /// the loss converges or `num_epochs` is reached
    ///
    /// * `x_nd` - node features
    /// * `graph` - neighbourhoods
    /// * `labels_n` - optional class codes (`u32`)
    /// * `weights` - loss term weights
    /// * `train_config` - training configuration
    pub fn train(
        &mut self,
        x_nd: &Tensor,
        graph: &NeighbourTensors,
        labels_n: Option<&Tensor>,
        weights: &LossWeights,
        train_config: &TrainConfig,
    ) -> anyhow::Result<TrainState> {
        let adam_params = ParamsAdamW {
            lr: train_config.learning_rate as f64,
            weight_decay: train_config.weight_decay as f64,
            ..Default::default()
        };
        let mut adam = AdamW::new(self.variable_map.all_vars(), adam_params)?;

        let pb = ProgressBar::new(train_config.num_epochs as u64);

        if !train_config.show_progress || train_config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut monitor = ConvergenceMonitor::new(train_config.convergence_threshold);
        self.loss_trace.clear();
        self.state = TrainState::Initialized;

        for epoch in 0..train_config.num_epochs {
            self.state = TrainState::Training { epoch };

            let out = self.model.forward_t(x_nd, graph, true)?;
            let loss = self.model.loss(&out, x_nd, graph, labels_n, weights)?;
            let loss_val = loss.total.to_scalar::<f32>()?;

            if !loss_val.is_finite() {
                return Err(TrainError::NonFiniteLoss {
                    epoch,
                    value: loss_val,
                }
                .into());
            }

            adam.backward_step(&loss.total)?;
            self.loss_trace.push(loss_val);
            pb.inc(1);

            if train_config.verbose {
                info!(
                    "[{}] loss: {:.5} (recon {:.5}, kl {:.5}, label {:.5}, adj {:.5})",
                    epoch + 1,
                    loss_val,
                    loss.recon,
                    loss.kl,
                    loss.label,
                    loss.adj
                );
            }

            if monitor.update(loss_val) {
                self.state = TrainState::Converged { epoch };
                let recent = &self.loss_trace[self.loss_trace.len().saturating_sub(RECENT_LOSSES)..];
                info!(
                    "relative change below {} at epoch {}, last losses: {:?}",
                    train_config.convergence_threshold,
                    epoch + 1,
                    recent
                );
                break;
            }
        }

        if !self.state.is_finished() {
            self.state = TrainState::MaxEpochsReached {
                epoch: train_config.num_epochs,
            };
        }

        pb.finish_and_clear();

        match self.state {
            TrainState::Converged { epoch } => info!("converged at epoch {}", epoch + 1),
            _ => info!("reached {} epochs", train_config.num_epochs),
        }

        let z_nk = self.get_latent(x_nd, graph)?;
        if is_collapsed(&z_nk)? {
            return Err(TrainError::CollapsedLatent.into());
        }

        Ok(self.state)
    }

    /// Deterministic latent means (n x k) in evaluation mode
    pub fn get_latent(&self, x_nd: &Tensor, graph: &NeighbourTensors) -> anyhow::Result<Tensor> {
        if !self.state.is_finished() {
            return Err(TrainError::NotTrained.into());
        }
        Ok(self.model.latent_mean(x_nd, graph)?)
    }
}

fn is_collapsed(z_nk: &Tensor) -> anyhow::Result<bool> {
    let nn = z_nk.dim(0)?;
    if nn < 2 {
        return Ok(false);
    }
    let var_k = z_nk
        .broadcast_sub(&z_nk.mean_keepdim(0)?)?
        .sqr()?
        .mean(0)?
        .to_vec1::<f32>()?;
    Ok(var_k.iter().all(|&v| v < COLLAPSE_VARIANCE))
}
