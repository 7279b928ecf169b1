use crate::traits::SampleOps;
use crate::{DVec, Mat};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub trait RSVD {
    /// `(U, D, V)` of rank at most `rank`, reproducible for `seed`
    fn rsvd(&self, rank: usize, seed: u64) -> anyhow::Result<(Mat, DVec, Mat)>;
}

impl RSVD for Mat {
    fn rsvd(&self, rank: usize, seed: u64) -> anyhow::Result<(Mat, DVec, Mat)> {
        let default_iter = 5;
        let mut rsvd = RandomizedSVD::new(rank, default_iter, seed);
        rsvd.compute(self)?;
        Ok((
            rsvd.matrix_u().clone(),
            rsvd.singular_values().clone(),
            rsvd.matrix_v().clone(),
        ))
    }
}

/// Randomized SVD
///
/// Implement Alg 4.4 of Halko et al. (2009), re-orthonormalizing by
/// QR after every half step of the power iteration.
///
pub struct RandomizedSVD {
    max_rank: usize,
    iter: usize,
    seed: u64,
    u_vectors: Mat,
    singular_values: DVec,
    v_vectors: Mat,
    qq: Mat,
}

impl RandomizedSVD {
    pub fn new(max_rank: usize, iter: usize, seed: u64) -> Self {
        Self {
            max_rank,
            iter,
            seed,
            u_vectors: Mat::zeros(0, 0),
            singular_values: DVec::zeros(0),
            v_vectors: Mat::zeros(0, 0),
            qq: Mat::zeros(0, 0),
        }
    }

    pub fn matrix_u(&self) -> &Mat {
        &self.u_vectors
    }

    pub fn matrix_v(&self) -> &Mat {
        &self.v_vectors
    }

    pub fn singular_values(&self) -> &DVec {
        &self.singular_values
    }

    pub fn compute(&mut self, xx: &Mat) -> anyhow::Result<()> {
        let nr = xx.nrows();
        let nc = xx.ncols();

        let mut rank = nr.min(nc);
        let mut oversample = 0;

        if rank == 0 {
            anyhow::bail!("empty matrix [{} x {}]", nr, nc);
        }

        if self.max_rank > 0 && rank > self.max_rank {
            rank = self.max_rank;
            oversample = 5.min(nr.min(nc) - rank);
        }

        self.rand_subspace_iteration(xx, rank + oversample);

        let rank = rank.min(self.qq.ncols());

        let bb = self.qq.transpose() * xx;

        let svd = bb.svd(true, true);

        if let (Some(svd_u), Some(svd_vt)) = (svd.u, svd.v_t) {
            // nalgebra does not sort singular values
            let mut order = (0..svd.singular_values.len()).collect::<Vec<_>>();
            order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));
            let order = &order[..rank];

            let u_sorted = Mat::from_fn(svd_u.nrows(), rank, |i, k| svd_u[(i, order[k])]);
            let v_sorted = Mat::from_fn(svd_vt.ncols(), rank, |j, k| svd_vt[(order[k], j)]);

            self.u_vectors = &self.qq * u_sorted;
            self.v_vectors = v_sorted;
            self.singular_values = DVec::from_fn(rank, |k, _| svd.singular_values[order[k]]);
        } else {
            anyhow::bail!("SVD failed");
        }

        Ok(())
    }

    // Find an orthonormal matrix qq whose range approximates the range of xx
    fn rand_subspace_iteration(&mut self, xx: &Mat, rank_and_oversample: usize) {
        let nc = xx.ncols();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let omega = Mat::rnorm(nc, rank_and_oversample, &mut rng);
        let mut qq = (xx * omega).qr().q();

        for _ in 0..self.iter {
            let zz = (xx.transpose() * &qq).qr().q();
            qq = (xx * zz).qr().q();
        }

        let kk = rank_and_oversample.min(qq.ncols());
        self.qq = qq.columns(0, kk).into_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn recovers_low_rank_matrix() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(3);
        let aa = Mat::rnorm(40, 3, &mut rng);
        let bb = Mat::rnorm(3, 25, &mut rng);
        let xx = &aa * &bb;

        let (u, d, v) = xx.rsvd(3, 42)?;
        let recon = &u * Mat::from_diagonal(&d) * v.transpose();

        assert_abs_diff_eq!((recon - &xx).norm() / xx.norm(), 0.0, epsilon = 1e-3);
        assert!(d[0] >= d[1] && d[1] >= d[2]);

        let utu = u.transpose() * &u;
        assert_abs_diff_eq!((utu - Mat::identity(3, 3)).norm(), 0.0, epsilon = 1e-3);
        Ok(())
    }
}
