use crate::dmatrix_rsvd::RSVD;
use crate::traits::*;
use crate::Mat;
use log::info;

/// Principal component scores of the rows of `x_nd`
///
/// Columns are centred, then the top `n_comps` components are taken
/// by randomized SVD. Scores are `U * diag(D)` with the sign of each
/// component fixed so that its largest absolute loading is positive.
/// Components beyond the attainable rank are zero, so the output is
/// always `n x n_comps`.
///
/// * `x_nd` - sample x feature matrix
/// * `n_comps` - number of components
/// * `seed` - random seed for the randomized SVD
pub fn pca_scores(x_nd: &Mat, n_comps: usize, seed: u64) -> anyhow::Result<Mat> {
    if n_comps == 0 {
        anyhow::bail!("n_comps must be >= 1");
    }

    let nn = x_nd.nrows();
    let xc_nd = x_nd.centre_columns();

    // rank of a centred matrix is at most n - 1
    let rank = n_comps.min(nn.saturating_sub(1)).min(x_nd.ncols());

    if rank == 0 {
        return Ok(Mat::zeros(nn, n_comps));
    }

    let (u_nk, d_k, v_dk) = xc_nd.rsvd(rank, seed)?;

    let mut z_nk = u_nk * Mat::from_diagonal(&d_k);

    for k in 0..z_nk.ncols() {
        let v_k = v_dk.column(k);
        let imax = v_k.iamax();
        if v_k[imax] < 0. {
            z_nk.column_mut(k).neg_mut();
        }
    }

    info!(
        "PCA: [{} x {}] -> {} components",
        x_nd.nrows(),
        x_nd.ncols(),
        z_nk.ncols()
    );

    Ok(z_nk.fit_columns(n_comps, 0.0))
}
