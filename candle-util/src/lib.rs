pub mod candle_aux_layers;
pub mod candle_graph_attention;
pub mod candle_gvae_decoder;
pub mod candle_gvae_encoder;
pub mod candle_gvae_inference;
pub mod candle_gvae_model;
pub mod candle_inference;
pub mod candle_loss_functions;
pub mod candle_model_traits;
pub mod candle_noise;

pub use candle_core;
pub use candle_nn;

pub use candle_gvae_inference::{ConvergenceMonitor, GvaeTrainer, TrainError, TrainState};
pub use candle_gvae_model::{GvaeModel, GvaeModelConfig};
pub use candle_model_traits::NeighbourTensors;
