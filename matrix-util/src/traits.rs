use candle_util::candle_core::{Device, Tensor};
use rand::rngs::StdRng;

/// Convert to and from `Tensor`
pub trait ConvertMatOps {
    type Mat;
    type Scalar;

    fn from_tensor(_: &Tensor) -> anyhow::Result<Self::Mat>;
    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor>;
}

/// Scale or centre columns (each column = one feature)
pub trait MatOps {
    type Mat;
    type Scalar;

    fn scale_columns_inplace(&mut self);
    fn scale_columns(&self) -> Self::Mat;
    fn centre_columns_inplace(&mut self);
    fn centre_columns(&self) -> Self::Mat;
}

/// Operations to sample random matrices from a seeded generator so
/// that every draw can be reproduced from a single seed
pub trait SampleOps {
    type Mat;
    type Scalar;

    /// Sample a matrix from a uniform distribution `U(0,1)`
    fn runif(dd: usize, nn: usize, rng: &mut StdRng) -> Self::Mat;

    /// Sample a matrix from a normal distribution `N(0,1)`
    fn rnorm(dd: usize, nn: usize, rng: &mut StdRng) -> Self::Mat;
}

/// Row selection and column padding used when embeddings move
/// between a dataset and its subsets
pub trait RowColumnOps {
    type Mat;

    /// Take rows in the given order
    fn select_rows_by(&self, rows: &[usize]) -> Self::Mat;

    /// Keep the first `ncol` columns, padding with `fill` if there
    /// are not enough
    fn fit_columns(&self, ncol: usize, fill: f32) -> Self::Mat;

    /// Whether any entry is NaN or infinite
    fn has_non_finite(&self) -> bool;
}
