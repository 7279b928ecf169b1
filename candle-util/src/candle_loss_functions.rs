use candle_core::{Result, Tensor};

/// KL divergence loss between two Gaussian distributions
///
/// -0.5 * (1 + log(sigma^2) - mu^2 - sigma^2)
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// Mean squared reconstruction error over all entries
///
/// * `x_nd` - data tensor (observed data)
/// * `hat_nd` - reconstruction
///
pub fn mse_loss(x_nd: &Tensor, hat_nd: &Tensor) -> Result<Tensor> {
    candle_nn::loss::mse(hat_nd, x_nd)
}

/// Mean cross entropy of class logits against integer labels
///
/// * `logits_nc` - unnormalized class scores (n x c)
/// * `labels_n` - class codes (`u32`)
///
pub fn label_cross_entropy(logits_nc: &Tensor, labels_n: &Tensor) -> Result<Tensor> {
    candle_nn::loss::cross_entropy(logits_nc, labels_n)
}

/// Binary cross entropy of an inner-product edge decoder
///
/// loss = -mean log σ(z_i·z_j) over edges
///        -mean log (1 - σ(z_u·z_v)) over negative pairs
///
/// * `z_nk` - latent states
/// * `pos` - edge endpoints `(src, dst)` as `u32` tensors
/// * `neg` - negative pairs `(src, dst)` as `u32` tensors
///
pub fn edge_bce_loss(z_nk: &Tensor, pos: (&Tensor, &Tensor), neg: (&Tensor, &Tensor)) -> Result<Tensor> {
    let eps = 1e-7;

    let score = |(src, dst): (&Tensor, &Tensor)| -> Result<Tensor> {
        let z_src = z_nk.index_select(src, 0)?;
        let z_dst = z_nk.index_select(dst, 0)?;
        candle_nn::ops::sigmoid(&(z_src * z_dst)?.sum(1)?)
    };

    let p_pos = score(pos)?.clamp(eps, 1.0 - eps)?;
    let p_neg = score(neg)?.clamp(eps, 1.0 - eps)?;

    let pos_loss = p_pos.log()?.mean_all()?.neg()?;
    let neg_loss = p_neg.affine(-1.0, 1.0)?.log()?.mean_all()?.neg()?;
    pos_loss + neg_loss
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    #[test]
    fn kl_of_standard_normal_is_zero() -> Result<()> {
        let mu = Tensor::zeros((3, 2), candle_core::DType::F32, &Device::Cpu)?;
        let kl = gaussian_kl_loss(&mu, &mu)?.to_vec1::<f32>()?;
        assert_eq!(kl, vec![0.0; 3]);

        let mu = Tensor::new(&[[1f32, 0.]], &Device::Cpu)?;
        let lv = Tensor::new(&[[0f32, 0.]], &Device::Cpu)?;
        let kl = gaussian_kl_loss(&mu, &lv)?.to_vec1::<f32>()?;
        assert_abs_diff_eq!(kl[0], 0.5, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn edge_loss_prefers_aligned_edges() -> Result<()> {
        let dev = Device::Cpu;
        let z = Tensor::new(&[[3f32, 0.], [3., 0.], [-3., 0.]], &dev)?;
        let src = Tensor::new(&[0u32], &dev)?;
        let good = Tensor::new(&[1u32], &dev)?;
        let bad = Tensor::new(&[2u32], &dev)?;

        let low = edge_bce_loss(&z, (&src, &good), (&src, &bad))?.to_scalar::<f32>()?;
        let high = edge_bce_loss(&z, (&src, &bad), (&src, &good))?.to_scalar::<f32>()?;
        assert!(low < high);
        assert!(low >= 0.0);
        Ok(())
    }
}
