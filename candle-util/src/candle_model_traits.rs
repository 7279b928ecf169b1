use crate::candle_noise::NoiseSource;
use candle_core::{Device, Error, Result, Tensor};

/// Fixed-degree neighbourhoods of a graph as tensors.
///
/// Row `i` lists node `i` itself followed by its `k` out-neighbours,
/// so every node attends over `k + 1` positions.
pub struct NeighbourTensors {
    /// flattened neighbour index (n * (k + 1)), `u32`
    pub index: Tensor,
    /// optional edge weights (n x (k + 1)); self loops weigh 1
    pub weights: Option<Tensor>,
    /// edge sources, excluding self loops
    pub edge_src: Vec<u32>,
    /// edge targets, excluding self loops
    pub edge_dst: Vec<u32>,
    pub n_nodes: usize,
    pub degree: usize,
}

impl NeighbourTensors {
    /// * `neighbours` - out-neighbours of each node, all of equal length
    /// * `weights` - optional weights parallel to `neighbours`
    /// * `device` - where the tensors live
    pub fn new(
        neighbours: &[Vec<usize>],
        weights: Option<&[Vec<f32>]>,
        device: &Device,
    ) -> Result<Self> {
        let n_nodes = neighbours.len();
        let kk = neighbours.first().map(|v| v.len()).unwrap_or(0);

        if neighbours.iter().any(|v| v.len() != kk) {
            return Err(Error::Msg("neighbour lists differ in length".to_string()));
        }
        if neighbours.iter().flatten().any(|&j| j >= n_nodes) {
            return Err(Error::Msg("neighbour index out of range".to_string()));
        }

        let degree = kk + 1;
        let mut index = Vec::with_capacity(n_nodes * degree);
        let mut edge_src = Vec::with_capacity(n_nodes * kk);
        let mut edge_dst = Vec::with_capacity(n_nodes * kk);

        for (i, nbr) in neighbours.iter().enumerate() {
            index.push(i as u32);
            for &j in nbr {
                index.push(j as u32);
                edge_src.push(i as u32);
                edge_dst.push(j as u32);
            }
        }

        let weights = match weights {
            Some(ww) => {
                if ww.len() != n_nodes || ww.iter().any(|w| w.len() != kk) {
                    return Err(Error::Msg("weights do not match neighbours".to_string()));
                }
                let flat = ww
                    .iter()
                    .flat_map(|w| std::iter::once(1.0).chain(w.iter().cloned()))
                    .collect::<Vec<f32>>();
                Some(Tensor::from_vec(flat, (n_nodes, degree), device)?)
            }
            None => None,
        };

        Ok(Self {
            index: Tensor::from_vec(index, n_nodes * degree, device)?,
            weights,
            edge_src,
            edge_dst,
            n_nodes,
            degree,
        })
    }

    /// Gather the rows of `h_nd` for every neighbourhood position
    ///
    /// # Returns `n x (k + 1) x d`
    pub fn gather(&self, h_nd: &Tensor) -> Result<Tensor> {
        let d = h_nd.dim(1)?;
        h_nd.index_select(&self.index, 0)?
            .reshape((self.n_nodes, self.degree, d))
    }

    pub fn num_edges(&self) -> usize {
        self.edge_src.len()
    }
}

/// Latent variables of a graph encoder
pub struct GraphLatent {
    /// sampled in training, the mean otherwise
    pub z_nk: Tensor,
    pub z_mean_nk: Tensor,
    pub z_lnvar_nk: Tensor,
}

pub trait GraphEncoderModuleT {
    /// Encode node features over the graph
    ///
    /// # Arguments
    /// * `x_nd` - node features (n x d)
    /// * `graph` - neighbourhoods
    /// * `train` - whether to use dropout/batchnorm statistics
    /// * `noise` - source of random draws
    fn forward_t(
        &self,
        x_nd: &Tensor,
        graph: &NeighbourTensors,
        train: bool,
        noise: &NoiseSource,
    ) -> Result<GraphLatent>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait GraphDecoderModuleT {
    /// Reconstruct node features from latent states
    fn forward_t(&self, z_nk: &Tensor, train: bool, noise: &NoiseSource) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

/// A layer whose training-time behaviour draws from a `NoiseSource`
pub trait NoisyModuleT {
    fn forward_t(&self, x: &Tensor, train: bool, noise: &NoiseSource) -> Result<Tensor>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbourhoods_start_with_self() -> Result<()> {
        let nbr = vec![vec![1, 2], vec![0, 2], vec![1, 0]];
        let graph = NeighbourTensors::new(&nbr, None, &Device::Cpu)?;
        assert_eq!(graph.degree, 3);
        assert_eq!(graph.num_edges(), 6);
        assert_eq!(
            graph.index.to_vec1::<u32>()?,
            vec![0, 1, 2, 1, 0, 2, 2, 1, 0]
        );

        let h = Tensor::new(&[[0f32, 0.], [1., 1.], [2., 2.]], &Device::Cpu)?;
        let g = graph.gather(&h)?;
        assert_eq!(g.dims(), &[3, 3, 2]);
        assert_eq!(g.get(2)?.to_vec2::<f32>()?, vec![vec![2., 2.], vec![1., 1.], vec![0., 0.]]);
        Ok(())
    }

    #[test]
    fn rejects_ragged_lists() {
        let nbr = vec![vec![1], vec![0, 2], vec![1]];
        assert!(NeighbourTensors::new(&nbr, None, &Device::Cpu).is_err());
    }
}
