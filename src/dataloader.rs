//! Data loader

use rand::seq::SliceRandom;
use thiserror::Error;

use crate::datasets::{Cifar10, Image};

/// Errors for the dataloader
#[derive(Debug, Error)]
pub enum DataLoaderError {
    #[error("Batch size must be non-zero")]
    ZeroBatchSize,
    #[error("Dataset is empty")]
    EmptyDataset,
}

/// Returns batches of transformed images and labels, optionally shuffled.
/// Takes inspiration from the PyTorch DataLoader
/// <https://pytorch.org/docs/stable/data.html#torch.utils.data.DataLoader>
pub struct DataLoader<'a> {
    dataset: &'a Cifar10,
    batch_size: usize,
    shuffle: bool,
}

impl<'a> DataLoader<'a> {
    pub fn new(
        dataset: &'a Cifar10,
        batch_size: usize,
        shuffle: bool,
    ) -> Result<Self, DataLoaderError> {
        if batch_size == 0 {
            return Err(DataLoaderError::ZeroBatchSize);
        }
        if dataset.is_empty() {
            return Err(DataLoaderError::EmptyDataset);
        }
        Ok(Self {
            dataset,
            batch_size,
            shuffle,
        })
    }

    #[cfg(test)]
    fn seeded_iter(&self, seed: u64) -> DataLoaderIterator<'_> {
        use rand::SeedableRng;
        use rand_pcg::Pcg64Mcg;

        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let mut indices = (0..self.dataset.len()).collect::<Vec<_>>();
        indices.shuffle(&mut rng);
        DataLoaderIterator {
            dataset: self.dataset,
            batch_size: self.batch_size,
            indices,
            curr_iter: 0,
        }
    }

    pub fn iter(&self) -> DataLoaderIterator<'_> {
        let mut indices = (0..self.dataset.len()).collect::<Vec<_>>();
        if self.shuffle {
            indices.shuffle(&mut rand::rng());
        }
        DataLoaderIterator {
            dataset: self.dataset,
            batch_size: self.batch_size,
            indices,
            curr_iter: 0,
        }
    }
}

/// An iterator which returns mini batches of transformed images and labels
/// until the end of the dataset. The final batch may be short.
pub struct DataLoaderIterator<'a> {
    dataset: &'a Cifar10,
    batch_size: usize,
    // optionally shuffled indices
    indices: Vec<usize>,
    curr_iter: usize,
}

impl Iterator for DataLoaderIterator<'_> {
    type Item = (Vec<Image>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.curr_iter >= self.indices.len() {
            return None;
        }
        let end = (self.curr_iter + self.batch_size).min(self.indices.len());
        let mut images = Vec::with_capacity(end - self.curr_iter);
        let mut labels = Vec::with_capacity(end - self.curr_iter);
        for &index in &self.indices[self.curr_iter..end] {
            let (image, label) = self.dataset.get(index);
            images.push(image);
            labels.push(label);
        }
        self.curr_iter = end;
        Some((images, labels))
    }
}
