use crate::candle_model_traits::NoisyModuleT;
use crate::candle_noise::NoiseSource;
use candle_core::{Result, Tensor};
use candle_nn::{BatchNorm, BatchNormConfig, Linear, Module, ModuleT, VarBuilder};

/// build a stack of layers applied one after another
pub struct StackLayers<M>
where
    M: NoisyModuleT,
{
    layers: Vec<M>,
}

impl<M> NoisyModuleT for StackLayers<M>
where
    M: NoisyModuleT,
{
    fn forward_t(&self, input: &Tensor, train: bool, noise: &NoiseSource) -> Result<Tensor> {
        let mut x = input.clone();
        for layer in self.layers.iter() {
            x = layer.forward_t(&x, train, noise)?;
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: NoisyModuleT,
{
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Appends a layer after all the current layers.
    pub fn push(&mut self, layer: M) {
        self.layers.push(layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: NoisyModuleT,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Linear -> BatchNorm -> ELU -> Dropout
pub struct FullBlock {
    linear: Linear,
    bn: BatchNorm,
    p_drop: f32,
}

impl NoisyModuleT for FullBlock {
    fn forward_t(&self, x: &Tensor, train: bool, noise: &NoiseSource) -> Result<Tensor> {
        let h = self.linear.forward(x)?;
        let h = self.bn.forward_t(&h, train)?.elu(1.0)?;
        if train {
            noise.dropout(&h, self.p_drop)
        } else {
            Ok(h)
        }
    }
}

/// A fully connected block with these variables:
///
/// * `{vb}.fc.weight`, `{vb}.fc.bias`
/// * `{vb}.bn.weight`, `{vb}.bn.bias` and running statistics
pub fn full_block(in_dim: usize, out_dim: usize, p_drop: f32, vb: VarBuilder) -> Result<FullBlock> {
    let bn_config = BatchNormConfig {
        eps: 1e-3,
        remove_mean: true,
        affine: true,
        momentum: 0.01,
    };

    Ok(FullBlock {
        linear: candle_nn::linear(in_dim, out_dim, vb.pp("fc"))?,
        bn: candle_nn::batch_norm(out_dim, bn_config, vb.pp("bn"))?,
        p_drop,
    })
}

/// Stack of full blocks through `in_dim -> dims[0] -> dims[1] -> ...`
/// named `{vb}.{j}.*`
pub fn full_block_stack(
    in_dim: usize,
    dims: &[usize],
    p_drop: f32,
    vb: VarBuilder,
) -> Result<StackLayers<FullBlock>> {
    let mut stack = StackLayers::new();
    let mut prev_dim = in_dim;
    for (j, &next_dim) in dims.iter().enumerate() {
        stack.push(full_block(prev_dim, next_dim, p_drop, vb.pp(j.to_string()))?);
        prev_dim = next_dim;
    }
    Ok(stack)
}
