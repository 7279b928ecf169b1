pub mod dmatrix_pca;
pub mod dmatrix_rsvd;
pub mod dmatrix_util;
pub mod knn_graph;
pub mod knn_match;
pub mod traits;
pub mod umap;
pub mod utils;

pub type Mat = nalgebra::DMatrix<f32>;
pub type DVec = nalgebra::DVector<f32>;
pub type CsrMat = nalgebra_sparse::CsrMatrix<f32>;
