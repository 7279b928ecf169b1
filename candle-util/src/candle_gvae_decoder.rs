use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use crate::candle_noise::NoiseSource;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// Feature decoder: full blocks back up the encoder widths, then a
/// linear map to the observed features
pub struct GraphVaeDecoder {
    n_features: usize,
    n_latent: usize,
    fc: StackLayers<FullBlock>,
    out: Linear,
}

impl GraphDecoderModuleT for GraphVaeDecoder {
    fn forward_t(&self, z_nk: &Tensor, train: bool, noise: &NoiseSource) -> Result<Tensor> {
        let h = self.fc.forward_t(z_nk, train, noise)?;
        self.out.forward(&h)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl GraphVaeDecoder {
    /// * `n_latent` - latent dim
    /// * `hidden` - full block widths, latent side first
    /// * `n_features` - output dim
    pub fn new(
        n_latent: usize,
        hidden: &[usize],
        n_features: usize,
        p_drop: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let fc = full_block_stack(n_latent, hidden, p_drop, vb.pp("fc"))?;
        let fc_out = hidden.last().cloned().unwrap_or(n_latent);
        let out = candle_nn::linear(fc_out, n_features, vb.pp("out"))?;
        Ok(Self {
            n_features,
            n_latent,
            fc,
            out,
        })
    }
}

/// Classifier on the latent states: a full block and linear logits
pub struct LabelHead {
    fc: FullBlock,
    logits: Linear,
}

impl NoisyModuleT for LabelHead {
    fn forward_t(&self, z_nk: &Tensor, train: bool, noise: &NoiseSource) -> Result<Tensor> {
        let h = self.fc.forward_t(z_nk, train, noise)?;
        self.logits.forward(&h)
    }
}

impl LabelHead {
    pub fn new(
        n_latent: usize,
        hidden: usize,
        n_classes: usize,
        p_drop: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            fc: full_block(n_latent, hidden, p_drop, vb.pp("fc"))?,
            logits: candle_nn::linear(hidden, n_classes, vb.pp("logits"))?,
        })
    }
}
