use crate::candle_gvae_decoder::{GraphVaeDecoder, LabelHead};
use crate::candle_gvae_encoder::GraphVaeEncoder;
use crate::candle_loss_functions::*;
use crate::candle_model_traits::*;
use crate::candle_noise::{reseed_parameters, NoiseSource};
use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use log::info;

#[derive(Debug, Clone)]
pub struct GvaeModelConfig {
    pub n_features: usize,
    pub feat_hidden1: usize,
    pub feat_hidden2: usize,
    pub gcn_hidden1: usize,
    pub gcn_hidden2: usize,
    pub n_heads: usize,
    pub p_drop: f32,
    /// 0 means no label head
    pub n_classes: usize,
    pub seed: u64,
}

/// Relative weights of the loss terms
#[derive(Debug, Clone, Copy)]
pub struct LossWeights {
    pub rec_w: f32,
    pub label_w: f32,
    pub adj_w: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            rec_w: 1.0,
            label_w: 1.0,
            adj_w: 0.0,
        }
    }
}

pub struct GvaeOutput {
    pub latent: GraphLatent,
    pub recon_nd: Tensor,
    pub logits_nc: Option<Tensor>,
}

/// Scalar loss and its parts for logging
pub struct GvaeLoss {
    pub total: Tensor,
    pub recon: f32,
    pub kl: f32,
    pub label: f32,
    pub adj: f32,
}

/// Graph-attention variational autoencoder with an optional label
/// classifier on the latent states
pub struct GvaeModel {
    pub encoder: GraphVaeEncoder,
    pub decoder: GraphVaeDecoder,
    pub label_head: Option<LabelHead>,
    pub noise: NoiseSource,
    pub config: GvaeModelConfig,
}

impl GvaeModel {
    /// Build every module in `varmap`, then draw the initial values
    /// from `config.seed`
    pub fn new(config: &GvaeModelConfig, varmap: &VarMap, device: &Device) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);

        let encoder = GraphVaeEncoder::new(
            config.n_features,
            &[config.feat_hidden1, config.feat_hidden2],
            config.gcn_hidden1,
            config.gcn_hidden2,
            config.n_heads,
            config.p_drop,
            vb.pp("enc"),
        )?;

        let decoder = GraphVaeDecoder::new(
            config.gcn_hidden2,
            &[config.feat_hidden2, config.feat_hidden1],
            config.n_features,
            config.p_drop,
            vb.pp("dec"),
        )?;

        let label_head = if config.n_classes > 0 {
            Some(LabelHead::new(
                config.gcn_hidden2,
                config.feat_hidden2,
                config.n_classes,
                config.p_drop,
                vb.pp("label"),
            )?)
        } else {
            None
        };

        reseed_parameters(varmap, config.seed)?;

        info!(
            "GVAE: {} -> [{}, {}] -> GAT {}x{} -> {} latent{}",
            config.n_features,
            config.feat_hidden1,
            config.feat_hidden2,
            config.n_heads,
            config.gcn_hidden1,
            config.gcn_hidden2,
            if config.n_classes > 0 {
                format!(", {} classes", config.n_classes)
            } else {
                String::new()
            }
        );

        Ok(Self {
            encoder,
            decoder,
            label_head,
            noise: NoiseSource::new(config.seed.wrapping_add(1)),
            config: config.clone(),
        })
    }

    pub fn forward_t(&self, x_nd: &Tensor, graph: &NeighbourTensors, train: bool) -> Result<GvaeOutput> {
        let latent = self.encoder.forward_t(x_nd, graph, train, &self.noise)?;
        let recon_nd = self.decoder.forward_t(&latent.z_nk, train, &self.noise)?;
        let logits_nc = match self.label_head.as_ref() {
            Some(head) => Some(head.forward_t(&latent.z_nk, train, &self.noise)?),
            None => None,
        };
        Ok(GvaeOutput {
            latent,
            recon_nd,
            logits_nc,
        })
    }

    /// Latent means in evaluation mode (no dropout, running batch
    /// statistics)
    pub fn latent_mean(&self, x_nd: &Tensor, graph: &NeighbourTensors) -> Result<Tensor> {
        Ok(self
            .encoder
            .forward_t(x_nd, graph, false, &self.noise)?
            .z_mean_nk)
    }

    /// rec_w * MSE + KL / n + label_w * CE + adj_w * BCE(edges)
    ///
    /// * `labels_n` - class codes (`u32`), used only with a label head
    pub fn loss(
        &self,
        out: &GvaeOutput,
        x_nd: &Tensor,
        graph: &NeighbourTensors,
        labels_n: Option<&Tensor>,
        weights: &LossWeights,
    ) -> Result<GvaeLoss> {
        let nn = x_nd.dim(0)?;

        let recon = mse_loss(x_nd, &out.recon_nd)?;
        let kl = (gaussian_kl_loss(&out.latent.z_mean_nk, &out.latent.z_lnvar_nk)?.mean_all()?
            / nn as f64)?;

        let mut total = ((&recon * weights.rec_w as f64)? + &kl)?;

        let mut label_val = 0.0;
        if let (Some(logits), Some(labels)) = (out.logits_nc.as_ref(), labels_n) {
            let ce = label_cross_entropy(logits, labels)?;
            label_val = ce.to_scalar::<f32>()?;
            total = (total + (ce * weights.label_w as f64)?)?;
        }

        let mut adj_val = 0.0;
        if weights.adj_w > 0.0 && graph.num_edges() > 0 {
            let bce = self.edge_loss(&out.latent.z_nk, graph)?;
            adj_val = bce.to_scalar::<f32>()?;
            total = (total + (bce * weights.adj_w as f64)?)?;
        }

        Ok(GvaeLoss {
            total,
            recon: recon.to_scalar::<f32>()?,
            kl: kl.to_scalar::<f32>()?,
            label: label_val,
            adj: adj_val,
        })
    }

    /// Edge reconstruction against as many uniformly drawn pairs
    fn edge_loss(&self, z_nk: &Tensor, graph: &NeighbourTensors) -> Result<Tensor> {
        let dev = z_nk.device();
        let ne = graph.num_edges();
        let src = Tensor::from_slice(&graph.edge_src, ne, dev)?;
        let dst = Tensor::from_slice(&graph.edge_dst, ne, dev)?;
        let neg_src = Tensor::from_vec(self.noise.randint(ne, graph.n_nodes)?, ne, dev)?;
        let neg_dst = Tensor::from_vec(self.noise.randint(ne, graph.n_nodes)?, ne, dev)?;
        edge_bce_loss(z_nk, (&src, &dst), (&neg_src, &neg_dst))
    }

    pub fn dim_latent(&self) -> usize {
        self.config.gcn_hidden2
    }
}
