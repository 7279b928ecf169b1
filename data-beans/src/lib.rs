pub mod h5_tree; // HDF5 subtrees held in memory
pub mod h5ad_io; // read and write the h5ad subset we use
pub mod simulate; // synthetic spatial data
pub mod sparse_util; // compressed sparse matrix helpers
pub mod spatial_data; // annotated cells x genes with coordinates

pub use spatial_data::{ObsColumn, SpatialData, SPATIAL_KEY};
