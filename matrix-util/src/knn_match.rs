use crate::Mat;
use indicatif::ParallelProgressIterator;
use instant_distance::{Builder, HnswMap, Search};
use rayon::prelude::*;

/// A dictionary (HnswMap wrapper) for fast look-up of the rows of a
/// matrix by approximate nearest-neighbour search
///
pub struct ColumnDict {
    pub dict: HnswMap<VecPoint, usize>,
    pub data_vec: Vec<VecPoint>,
}

impl ColumnDict {
    /// Index each row of `data` (n x d) under its row number
    ///
    /// * `data` - one point per row
    /// * `seed` - seed of the HNSW layer assignment
    pub fn from_rows(data: &Mat, seed: u64) -> Self {
        let nn = data.nrows();

        let data_vec = (0..nn)
            .into_par_iter()
            .progress_count(nn as u64)
            .map(|i| data.row(i).to_vp())
            .collect::<Vec<_>>();

        let names = (0..nn).collect::<Vec<_>>();
        let dict = Builder::default()
            .seed(seed)
            .build(data_vec.clone(), names);

        ColumnDict { dict, data_vec }
    }

    pub fn len(&self) -> usize {
        self.data_vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_vec.is_empty()
    }

    /// Search `knn` nearest neighbours of an indexed point, excluding
    /// the point itself.
    ///
    /// * `query` - row index of the query point
    /// * `knn` - the number of neighbours
    ///
    /// # Returns `(indices, distances)`, nearest first
    pub fn search_others(&self, query: usize, knn: usize) -> anyhow::Result<(Vec<usize>, Vec<f32>)> {
        let point = self
            .data_vec
            .get(query)
            .ok_or_else(|| anyhow::anyhow!("query {} out of range", query))?;

        let mut search = Search::default();
        let (indices, distances): (Vec<usize>, Vec<f32>) = self
            .dict
            .search(point, &mut search)
            .filter(|item| *item.value != query)
            .take(knn)
            .map(|item| (*item.value, item.distance))
            .unzip();

        Ok((indices, distances))
    }
}

#[derive(Clone, Debug)]
/// a wrapper for Vec<f32>
pub struct VecPoint {
    pub data: Vec<f32>,
}

pub trait MakeVecPoint {
    fn to_vp(&self) -> VecPoint;
}

impl MakeVecPoint for Vec<f32> {
    fn to_vp(&self) -> VecPoint {
        VecPoint { data: self.clone() }
    }
}

impl<S> MakeVecPoint for nalgebra::Matrix<f32, nalgebra::U1, nalgebra::Dyn, S>
where
    S: nalgebra::RawStorage<f32, nalgebra::U1, nalgebra::Dyn>,
{
    fn to_vp(&self) -> VecPoint {
        VecPoint {
            data: self.iter().cloned().collect(),
        }
    }
}

impl instant_distance::Point for VecPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_excludes_self() -> anyhow::Result<()> {
        let data = Mat::from_row_slice(
            6,
            2,
            &[0.0, 0.0, 0.1, 0.0, 0.0, 0.1, 5.0, 5.0, 5.1, 5.0, 5.0, 5.1],
        );
        let dict = ColumnDict::from_rows(&data, 0);
        assert_eq!(dict.len(), 6);

        let (idx, dist) = dict.search_others(0, 2)?;
        assert_eq!(idx.len(), 2);
        assert!(!idx.contains(&0));
        assert!(idx.iter().all(|&j| j < 3));
        assert!(dist[0] <= dist[1]);
        Ok(())
    }
}
