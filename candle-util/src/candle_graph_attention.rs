use crate::candle_model_traits::NeighbourTensors;
use crate::candle_noise::NoiseSource;
use candle_core::{Result, Tensor};
use candle_nn::{ops, Linear, Module, VarBuilder};

/// Graph attention layer (Veličković et al. 2018) over fixed-degree
/// neighbourhoods.
///
/// For node `i` and each position `j` of its neighbourhood (itself
/// included), head `h` scores
///
/// e(i,j) = LeakyReLU( a_src[h]·W x_j + a_dst[h]·W x_i )
///
/// and aggregates `sum_j softmax_j(e) W x_j`. Weighted graphs scale the
/// normalized coefficients by edge weights and normalize again.
pub struct GraphAttention {
    lin: Linear,
    att_src_hf: Tensor,
    att_dst_hf: Tensor,
    bias: Tensor,
    n_heads: usize,
    out_dim: usize,
    concat: bool,
    p_drop: f32,
}

const NEGATIVE_SLOPE: f64 = 0.2;

impl GraphAttention {
    /// Will create a new attention layer with these variables:
    ///
    /// * `{vb}.lin.weight` (heads * out x in)
    /// * `{vb}.att_src`, `{vb}.att_dst` (heads x out)
    /// * `{vb}.bias` (heads * out if concatenated, else out)
    ///
    /// # Arguments
    /// * `in_dim` - input feature dim
    /// * `out_dim` - output dim per head
    /// * `n_heads` - the number of attention heads
    /// * `concat` - concatenate heads (else average them)
    /// * `p_drop` - dropout on attention coefficients in training
    /// * `vb` - variable builder
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        n_heads: usize,
        concat: bool,
        p_drop: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let n_heads = n_heads.max(1);
        let init_ws = candle_nn::init::DEFAULT_KAIMING_NORMAL;

        let lin = candle_nn::linear_no_bias(in_dim, n_heads * out_dim, vb.pp("lin"))?;
        let att_src_hf = vb.get_with_hints((n_heads, out_dim), "att_src", init_ws)?;
        let att_dst_hf = vb.get_with_hints((n_heads, out_dim), "att_dst", init_ws)?;

        let bias_dim = if concat { n_heads * out_dim } else { out_dim };
        let bias = vb.get_with_hints(bias_dim, "bias", candle_nn::init::ZERO)?;

        Ok(Self {
            lin,
            att_src_hf,
            att_dst_hf,
            bias,
            n_heads,
            out_dim,
            concat,
            p_drop,
        })
    }

    pub fn dim_out(&self) -> usize {
        if self.concat {
            self.n_heads * self.out_dim
        } else {
            self.out_dim
        }
    }

    /// Attention coefficients (n x (k + 1) x heads), each
    /// neighbourhood summing to one per head
    pub fn attention(&self, x_nd: &Tensor, graph: &NeighbourTensors) -> Result<Tensor> {
        let (_, alpha_nmh) = self.project_and_attend(x_nd, graph)?;
        Ok(alpha_nmh)
    }

    fn project_and_attend(&self, x_nd: &Tensor, graph: &NeighbourTensors) -> Result<(Tensor, Tensor)> {
        let nn = x_nd.dim(0)?;
        let (hh, ff) = (self.n_heads, self.out_dim);

        let h_nhf = self.lin.forward(x_nd)?.reshape((nn, hh, ff))?;

        let a_src_nh = h_nhf.broadcast_mul(&self.att_src_hf.unsqueeze(0)?)?.sum(2)?;
        let a_dst_nh = h_nhf.broadcast_mul(&self.att_dst_hf.unsqueeze(0)?)?.sum(2)?;

        // score of every neighbourhood position
        let e_nmh = graph
            .gather(&a_src_nh)?
            .broadcast_add(&a_dst_nh.unsqueeze(1)?)?;
        let e_nmh = e_nmh.maximum(&(&e_nmh * NEGATIVE_SLOPE)?)?;

        let mut alpha_nmh = ops::softmax(&e_nmh, 1)?;

        if let Some(w_nm) = graph.weights.as_ref() {
            let weighted = alpha_nmh.broadcast_mul(&w_nm.unsqueeze(2)?)?;
            let denom = (weighted.sum_keepdim(1)? + 1e-12)?;
            alpha_nmh = weighted.broadcast_div(&denom)?;
        }

        Ok((h_nhf, alpha_nmh))
    }

    pub fn forward_t(
        &self,
        x_nd: &Tensor,
        graph: &NeighbourTensors,
        train: bool,
        noise: &NoiseSource,
    ) -> Result<Tensor> {
        let nn = x_nd.dim(0)?;
        let (hh, ff) = (self.n_heads, self.out_dim);

        let (h_nhf, alpha_nmh) = self.project_and_attend(x_nd, graph)?;

        let alpha_nmh = if train {
            noise.dropout(&alpha_nmh, self.p_drop)?
        } else {
            alpha_nmh
        };

        let msg_nmhf = graph
            .gather(&h_nhf.reshape((nn, hh * ff))?)?
            .reshape((nn, graph.degree, hh, ff))?;

        let out_nhf = msg_nmhf.broadcast_mul(&alpha_nmh.unsqueeze(3)?)?.sum(1)?;

        let out = if self.concat {
            out_nhf.reshape((nn, hh * ff))?
        } else {
            out_nhf.mean(1)?
        };

        out.broadcast_add(&self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn ring(n: usize) -> Vec<Vec<usize>> {
        (0..n).map(|i| vec![(i + 1) % n, (i + n - 1) % n]).collect()
    }

    #[test]
    fn output_dims_follow_heads() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let graph = NeighbourTensors::new(&ring(6), None, &dev)?;
        let x = Tensor::randn(0f32, 1., (6, 5), &dev)?;
        let noise = NoiseSource::new(0);

        let cat = GraphAttention::new(5, 4, 3, true, 0.0, vb.pp("cat"))?;
        assert_eq!(cat.forward_t(&x, &graph, false, &noise)?.dims(), &[6, 12]);
        assert_eq!(cat.dim_out(), 12);

        let avg = GraphAttention::new(5, 4, 3, false, 0.0, vb.pp("avg"))?;
        assert_eq!(avg.forward_t(&x, &graph, true, &noise)?.dims(), &[6, 4]);
        Ok(())
    }

    #[test]
    fn coefficients_are_normalized() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let x = Tensor::randn(0f32, 1., (5, 3), &dev)?;

        let weights = vec![vec![0.5f32, 0.1]; 5];
        let graph = NeighbourTensors::new(&ring(5), Some(&weights), &dev)?;
        let gat = GraphAttention::new(3, 2, 2, true, 0.0, vb)?;

        let alpha = gat.attention(&x, &graph)?;
        assert_eq!(alpha.dims(), &[5, 3, 2]);
        let sums = alpha.sum(1)?.flatten_all()?.to_vec1::<f32>()?;
        for s in sums {
            assert_abs_diff_eq!(s, 1.0, epsilon = 1e-5);
        }
        Ok(())
    }
}
