use crate::candle_aux_layers::*;
use crate::candle_graph_attention::GraphAttention;
use crate::candle_model_traits::*;
use crate::candle_noise::NoiseSource;
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

pub struct GraphVaeEncoder {
    n_features: usize,
    n_latent: usize,
    fc: StackLayers<FullBlock>,
    gat_hidden: GraphAttention,
    gat_mean: GraphAttention,
    gat_lnvar: GraphAttention,
}

impl GraphEncoderModuleT for GraphVaeEncoder {
    fn forward_t(
        &self,
        x_nd: &Tensor,
        graph: &NeighbourTensors,
        train: bool,
        noise: &NoiseSource,
    ) -> Result<GraphLatent> {
        let (z_mean_nk, z_lnvar_nk) = self.latent_gaussian_params(x_nd, graph, train, noise)?;
        let z_nk = self.reparameterize(&z_mean_nk, &z_lnvar_nk, train, noise)?;
        Ok(GraphLatent {
            z_nk,
            z_mean_nk,
            z_lnvar_nk,
        })
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl GraphVaeEncoder {
    ///
    /// Evaluate latent Gaussian parameters: mu and log_var
    /// z ~ (mu(x, G), log_var(x, G))
    fn latent_gaussian_params(
        &self,
        x_nd: &Tensor,
        graph: &NeighbourTensors,
        train: bool,
        noise: &NoiseSource,
    ) -> Result<(Tensor, Tensor)> {
        let min_lv = -8.;
        let max_lv = 8.;

        let h_nl = self.fc.forward_t(x_nd, train, noise)?;
        let g_nh = self
            .gat_hidden
            .forward_t(&h_nl, graph, train, noise)?
            .relu()?;
        let z_mean_nk = self.gat_mean.forward_t(&g_nh, graph, train, noise)?;
        let z_lnvar_nk = self
            .gat_lnvar
            .forward_t(&g_nh, graph, train, noise)?
            .clamp(min_lv, max_lv)?;
        Ok((z_mean_nk, z_lnvar_nk))
    }

    ///
    /// z = mu + sigma * eps
    /// where eps ~ N(0, 1)
    fn reparameterize(
        &self,
        z_mean: &Tensor,
        z_lnvar: &Tensor,
        train: bool,
        noise: &NoiseSource,
    ) -> Result<Tensor> {
        if train {
            let eps = noise.randn_like(z_mean)?;
            z_mean + (z_lnvar * 0.5)?.exp()?.mul(&eps)?
        } else {
            Ok(z_mean.clone())
        }
    }

    /// Will create a new graph encoder with these variables:
    ///
    /// * `{vb}.fc.{j}.*` full blocks `n_features -> hidden[0] -> hidden[1]`
    /// * `{vb}.gat.hidden.*` multi-head attention, heads concatenated
    /// * `{vb}.gat.mean.*`, `{vb}.gat.lnvar.*` single-head attention
    ///
    /// # Arguments
    /// * `n_features` - input feature dim
    /// * `feat_hidden` - full block widths
    /// * `gcn_hidden` - attention width per head
    /// * `n_latent` - latent dim
    /// * `n_heads` - heads of the first attention layer
    /// * `p_drop` - dropout rate
    /// * `vb` - variable builder
    pub fn new(
        n_features: usize,
        feat_hidden: &[usize],
        gcn_hidden: usize,
        n_latent: usize,
        n_heads: usize,
        p_drop: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let fc = full_block_stack(n_features, feat_hidden, p_drop, vb.pp("fc"))?;
        let fc_out = feat_hidden.last().cloned().unwrap_or(n_features);

        let gat_hidden = GraphAttention::new(
            fc_out,
            gcn_hidden,
            n_heads,
            true,
            p_drop,
            vb.pp("gat.hidden"),
        )?;
        let hidden_out = gat_hidden.dim_out();

        let gat_mean = GraphAttention::new(hidden_out, n_latent, 1, false, p_drop, vb.pp("gat.mean"))?;
        let gat_lnvar =
            GraphAttention::new(hidden_out, n_latent, 1, false, p_drop, vb.pp("gat.lnvar"))?;

        Ok(Self {
            n_features,
            n_latent,
            fc,
            gat_hidden,
            gat_mean,
            gat_lnvar,
        })
    }
}
