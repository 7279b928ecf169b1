use candle_core::{Error, Result, Tensor, Var};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::sync::{Mutex, MutexGuard};

/// Seeded source of every random draw a model makes while training:
/// reparameterization noise, dropout masks and negative edges.
///
/// Candle's CPU backend has no seedable generator, so draws are made
/// here and copied into tensors.
pub struct NoiseSource {
    rng: Mutex<StdRng>,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StdRng>> {
        self.rng
            .lock()
            .map_err(|_| Error::Msg("noise generator lock poisoned".to_string()))
    }

    /// `N(0,1)` noise with the shape and device of `like`
    pub fn randn_like(&self, like: &Tensor) -> Result<Tensor> {
        let ntot = like.elem_count();
        let mut rng = self.lock()?;
        let values = (0..ntot)
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect::<Vec<_>>();
        Tensor::from_vec(values, like.shape(), like.device())?.to_dtype(like.dtype())
    }

    /// Inverted dropout: zero each entry with probability `p` and
    /// scale the survivors by `1 / (1 - p)`
    pub fn dropout(&self, x: &Tensor, p: f32) -> Result<Tensor> {
        if p <= 0.0 {
            return Ok(x.clone());
        }
        if p >= 1.0 {
            return x.zeros_like();
        }
        let scale = 1.0 / (1.0 - p);
        let ntot = x.elem_count();
        let mut rng = self.lock()?;
        let mask = (0..ntot)
            .map(|_| {
                if rng.random::<f32>() < p {
                    0.0
                } else {
                    scale
                }
            })
            .collect::<Vec<_>>();
        let mask = Tensor::from_vec(mask, x.shape(), x.device())?.to_dtype(x.dtype())?;
        x.mul(&mask)
    }

    /// `len` indices drawn uniformly from `0..upper`
    pub fn randint(&self, len: usize, upper: usize) -> Result<Vec<u32>> {
        if upper == 0 {
            return Err(Error::Msg("empty range for random indices".to_string()));
        }
        let mut rng = self.lock()?;
        Ok((0..len)
            .map(|_| rng.random_range(0..upper) as u32)
            .collect())
    }
}

/// Overwrite the initial values of a freshly built variable map from
/// a seeded generator.
///
/// * matrices and higher-rank tensors: Glorot uniform,
///   `U(-a, a)` with `a = sqrt(6 / (fan_in + fan_out))`
/// * vectors named `*bias`: zeros
/// * other vectors (batch-norm scale and running statistics) keep
///   their constant initial values
///
/// Variables are visited in name order so that the result depends
/// only on `seed`.
pub fn reseed_parameters(varmap: &VarMap, seed: u64) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Msg("variable map lock poisoned".to_string()))?;

    let mut named: Vec<(&String, &Var)> = data.iter().collect();
    named.sort_by(|a, b| a.0.cmp(b.0));

    let mut rng = StdRng::seed_from_u64(seed);

    for (name, var) in named {
        let dims = var.dims().to_vec();
        if dims.len() >= 2 {
            let fan_out = dims[0];
            let fan_in: usize = dims[1..].iter().product();
            let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
            let values = (0..var.elem_count())
                .map(|_| rng.random_range(-limit..=limit))
                .collect::<Vec<_>>();
            let init = Tensor::from_vec(values, var.shape(), var.device())?.to_dtype(var.dtype())?;
            var.set(&init)?;
        } else if name.ends_with("bias") {
            var.set(&var.zeros_like()?)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;

    #[test]
    fn same_seed_same_noise() -> Result<()> {
        let like = Tensor::zeros((4, 3), DType::F32, &Device::Cpu)?;
        let a = NoiseSource::new(5).randn_like(&like)?.to_vec2::<f32>()?;
        let b = NoiseSource::new(5).randn_like(&like)?.to_vec2::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn dropout_keeps_or_scales() -> Result<()> {
        let x = Tensor::ones((10, 10), DType::F32, &Device::Cpu)?;
        let noise = NoiseSource::new(1);
        let y = noise.dropout(&x, 0.5)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(y.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        assert!(y.iter().any(|&v| v == 0.0));

        let same = noise.dropout(&x, 0.0)?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(same, 100.0);
        Ok(())
    }

    #[test]
    fn reseeding_is_reproducible() -> Result<()> {
        let build = |seed: u64| -> Result<Vec<Vec<f32>>> {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            let lin = candle_nn::linear(3, 4, vb.pp("lin"))?;
            reseed_parameters(&varmap, seed)?;
            let bias = lin.bias().map(|b| b.to_vec1::<f32>()).transpose()?;
            assert!(bias.unwrap_or_default().iter().all(|&b| b == 0.0));
            lin.weight().to_vec2::<f32>()
        };
        assert_eq!(build(3)?, build(3)?);
        assert_ne!(build(3)?, build(4)?);
        Ok(())
    }
}
