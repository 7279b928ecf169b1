use matrix_util::{CsrMat, Mat};
use nalgebra_sparse::{CooMatrix, CscMatrix, CsrMatrix};
use rayon::prelude::*;

/// Compressed sparse arrays as stored on disk
pub struct ValuesIndicesPointers<'a> {
    pub values: &'a [f32],
    pub indices: &'a [u64],
    pub indptr: &'a [u64],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IndexPointerType {
    /// `indptr` runs over columns (CSC)
    Column,
    /// `indptr` runs over rows (CSR)
    Row,
}

impl ValuesIndicesPointers<'_> {
    /// Assemble a CSR matrix of shape `nrows x ncols`
    pub fn to_csr(
        &self,
        nrows: usize,
        ncols: usize,
        pointer_type: IndexPointerType,
    ) -> anyhow::Result<CsrMat> {
        if self.values.len() != self.indices.len() {
            anyhow::bail!("`values` and `indices` have different sizes");
        }

        let offsets = self.indptr.iter().map(|&p| p as usize).collect::<Vec<_>>();
        let indices = self.indices.iter().map(|&i| i as usize).collect::<Vec<_>>();
        let values = self.values.to_vec();

        match pointer_type {
            IndexPointerType::Row => {
                CsrMatrix::try_from_unsorted_csr_data(nrows, ncols, offsets, indices, values)
                    .map_err(|e| anyhow::anyhow!("invalid csr data: {}", e))
            }
            IndexPointerType::Column => {
                let csc =
                    CscMatrix::try_from_unsorted_csc_data(nrows, ncols, offsets, indices, values)
                        .map_err(|e| anyhow::anyhow!("invalid csc data: {}", e))?;
                Ok(CsrMatrix::from(&csc))
            }
        }
    }
}

/// CSR matrix keeping every entry of a dense one, zeros excluded
pub fn csr_from_dense(x_nd: &Mat) -> CsrMat {
    let mut coo = CooMatrix::new(x_nd.nrows(), x_nd.ncols());
    for j in 0..x_nd.ncols() {
        for i in 0..x_nd.nrows() {
            let x = x_nd[(i, j)];
            if x != 0.0 {
                coo.push(i, j, x);
            }
        }
    }
    CsrMatrix::from(&coo)
}

pub fn csr_to_dense(x: &CsrMat) -> Mat {
    let mut ret = Mat::zeros(x.nrows(), x.ncols());
    for (i, j, &v) in x.triplet_iter() {
        ret[(i, j)] = v;
    }
    ret
}

/// Rows of a CSR matrix in the given order
pub fn csr_select_rows(x: &CsrMat, rows: &[usize]) -> anyhow::Result<CsrMat> {
    let mut offsets = Vec::with_capacity(rows.len() + 1);
    let mut indices = vec![];
    let mut values = vec![];
    offsets.push(0);
    for &i in rows {
        let row = x.row(i);
        indices.extend_from_slice(row.col_indices());
        values.extend_from_slice(row.values());
        offsets.push(indices.len());
    }
    CsrMatrix::try_from_csr_data(rows.len(), x.ncols(), offsets, indices, values)
        .map_err(|e| anyhow::anyhow!("row subset: {}", e))
}

/// Submatrix of the given rows and columns, both in the given order
pub fn csr_select_rows_columns(x: &CsrMat, rows: &[usize], cols: &[usize]) -> anyhow::Result<CsrMat> {
    if let Some(&bad) = cols.iter().find(|&&j| j >= x.ncols()) {
        anyhow::bail!("column {} out of range ({} columns)", bad, x.ncols());
    }
    let sub_t = csr_select_rows(x, rows)?.transpose();
    Ok(csr_select_rows(&sub_t, cols)?.transpose())
}

/// Per-column mean and (population) variance of `f(x)`, counting the
/// implicit zeros; `f(0)` must be 0
pub fn csr_column_mean_var<F>(x: &CsrMat, f: F) -> (Vec<f32>, Vec<f32>)
where
    F: Fn(f32) -> f32 + Sync,
{
    let nn = x.nrows().max(1) as f64;
    let csc = CscMatrix::from(x);

    (0..csc.ncols())
        .into_par_iter()
        .map(|j| {
            let col = csc.col(j);
            let (s1, s2) = col.values().iter().fold((0f64, 0f64), |(s1, s2), &v| {
                let y = f(v) as f64;
                (s1 + y, s2 + y * y)
            });
            let mu = s1 / nn;
            let var = (s2 / nn - mu * mu).max(0.0);
            (mu as f32, var as f32)
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn example() -> Mat {
        Mat::from_row_slice(3, 4, &[1., 0., 2., 0., 0., 0., 3., 4., 5., 0., 0., 6.])
    }

    #[test]
    fn csc_and_csr_agree() -> anyhow::Result<()> {
        // column-compressed version of `example()`
        let values = [1., 5., 2., 3., 4., 6.];
        let indices = [0, 2, 0, 1, 1, 2];
        let indptr = [0, 2, 2, 4, 6];
        let csr = ValuesIndicesPointers {
            values: &values,
            indices: &indices,
            indptr: &indptr,
        }
        .to_csr(3, 4, IndexPointerType::Column)?;
        assert_eq!(csr_to_dense(&csr), example());
        Ok(())
    }

    #[test]
    fn select_rows_and_columns() -> anyhow::Result<()> {
        let csr = csr_from_dense(&example());
        let sub = csr_select_rows(&csr, &[2, 0])?;
        assert_eq!(csr_to_dense(&sub), Mat::from_row_slice(2, 4, &[5., 0., 0., 6., 1., 0., 2., 0.]));

        let sub = csr_select_rows_columns(&csr, &[1, 2], &[3, 0])?;
        assert_eq!(csr_to_dense(&sub), Mat::from_row_slice(2, 2, &[4., 0., 6., 5.]));
        assert!(csr_select_rows_columns(&csr, &[0], &[4]).is_err());
        Ok(())
    }

    #[test]
    fn column_moments_count_zeros() {
        let csr = csr_from_dense(&example());
        let (mu, var) = csr_column_mean_var(&csr, |v| v);
        assert_abs_diff_eq!(mu[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(var[0], (1.0 + 25.0) / 3.0 - 4.0, epsilon = 1e-5);
        assert_eq!(mu[1], 0.0);
        assert_eq!(var[1], 0.0);
    }
}
