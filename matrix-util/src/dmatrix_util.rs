use crate::traits::*;
use crate::Mat;

use candle_util::candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

impl SampleOps for Mat {
    type Mat = Self;
    type Scalar = f32;

    /// Sample d,n matrix from U(0,1)
    fn runif(dd: usize, nn: usize, rng: &mut StdRng) -> Self::Mat {
        let rvec = (0..(dd * nn)).map(|_| rng.random::<f32>()).collect::<Vec<_>>();
        Mat::from_vec(dd, nn, rvec)
    }

    /// Sample d,n matrix from N(0,1)
    fn rnorm(dd: usize, nn: usize, rng: &mut StdRng) -> Self::Mat {
        let rvec = (0..(dd * nn))
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect::<Vec<_>>();
        Mat::from_vec(dd, nn, rvec)
    }
}

impl MatOps for Mat {
    type Mat = Self;
    type Scalar = f32;

    /// Y[,j] = (X[,j] - mean(X[,j])) / sd(X[,j]); a column with zero
    /// variance is only centred (and so becomes all zeros)
    fn scale_columns_inplace(&mut self) {
        let nn = self.nrows().max(1) as f32;
        for mut x_j in self.column_iter_mut() {
            let mu = x_j.sum() / nn;
            x_j.add_scalar_mut(-mu);
            let sig = (x_j.norm_squared() / nn).sqrt();
            if sig > 0. && sig.is_finite() {
                x_j /= sig;
            }
        }
    }

    fn scale_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.scale_columns_inplace();
        ret
    }

    fn centre_columns_inplace(&mut self) {
        let nn = self.nrows().max(1) as f32;
        for mut x_j in self.column_iter_mut() {
            let mu = x_j.sum() / nn;
            x_j.add_scalar_mut(-mu);
        }
    }

    fn centre_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.centre_columns_inplace();
        ret
    }
}

impl ConvertMatOps for Mat {
    type Mat = Self;
    type Scalar = f32;

    fn from_tensor(data: &Tensor) -> anyhow::Result<Self::Mat> {
        let (nrows, ncols) = data.dims2()?;
        let values = data
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        Ok(Mat::from_row_slice(nrows, ncols, &values))
    }

    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor> {
        // nalgebra is column-major; the transpose's storage is row-major
        let values = self.transpose().as_slice().to_vec();
        Ok(Tensor::from_vec(values, (self.nrows(), self.ncols()), dev)?)
    }
}

impl RowColumnOps for Mat {
    type Mat = Self;

    fn select_rows_by(&self, rows: &[usize]) -> Self::Mat {
        Mat::from_fn(rows.len(), self.ncols(), |i, j| self[(rows[i], j)])
    }

    fn fit_columns(&self, ncol: usize, fill: f32) -> Self::Mat {
        Mat::from_fn(self.nrows(), ncol, |i, j| {
            if j < self.ncols() {
                self[(i, j)]
            } else {
                fill
            }
        })
    }

    fn has_non_finite(&self) -> bool {
        self.iter().any(|x| !x.is_finite())
    }
}
