use crate::lupin_common::*;
use candle_util::candle_core::Device;
use candle_util::NeighbourTensors;
use matrix_util::knn_graph::{KnnGraph, KnnGraphArgs};

const KNN_BLOCK_SIZE: usize = 1000;

/// Spatial k-nearest-neighbour graph over cells
///
/// Every cell points to exactly `knn` other cells, nearest first;
/// ties in distance go to the smaller cell index.
pub struct SpatialGraph {
    pub neighbours: Vec<Vec<usize>>,
    /// Gaussian kernel `exp(-d^2 / 2 sigma^2)` of the distance, with
    /// `sigma` the median neighbour distance; `None` for a binary graph
    pub weights: Option<Vec<Vec<f32>>>,
    pub knn: usize,
}

impl SpatialGraph {
    /// * `coords` - cells x spatial dimensions
    /// * `knn` - neighbours per cell, `1 <= knn < n`
    /// * `weighted` - attach Gaussian kernel weights
    pub fn build(coords: &Mat, knn: usize, weighted: bool) -> anyhow::Result<Self> {
        let nn = coords.nrows();

        if knn == 0 || knn >= nn {
            return Err(LupinError::configuration(format!(
                "{} neighbours requested for {} cells",
                knn, nn
            )));
        }
        if coords.has_non_finite() {
            return Err(LupinError::configuration(
                "spatial coordinates have non-finite values",
            ));
        }

        let graph = KnnGraph::from_rows(
            coords,
            KnnGraphArgs {
                knn,
                block_size: KNN_BLOCK_SIZE,
            },
        )?;

        let weights = weighted.then(|| graph.gaussian_kernel_weights());

        info!(
            "spatial graph: {} cells, {} neighbours each{}",
            nn,
            knn,
            if weighted { ", weighted" } else { "" }
        );

        Ok(Self {
            neighbours: graph.neighbours,
            weights,
            knn,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.neighbours.len()
    }

    pub fn num_edges(&self) -> usize {
        self.neighbours.iter().map(|v| v.len()).sum()
    }

    pub fn to_tensors(&self, device: &Device) -> anyhow::Result<NeighbourTensors> {
        Ok(NeighbourTensors::new(
            &self.neighbours,
            self.weights.as_deref(),
            device,
        )?)
    }
}
