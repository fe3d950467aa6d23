//! CIFAR-10 dataset provider
//!
//! Reads the binary-format distribution (`data_batch_1..5.bin`, `test_batch.bin`)
//! from a local cache directory and hands out transformed copies of each sample.

use std::{
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::transforms::Compose;

pub const NUM_CLASSES: usize = 10;
pub const IMAGE_CHANNELS: usize = 3;
pub const IMAGE_SIZE: usize = 32;

/// Per-channel pixel means of the training split, on the [0, 1] scale
pub const CIFAR10_MEAN: [f32; 3] = [125.3 / 255.0, 123.0 / 255.0, 113.9 / 255.0];
/// Per-channel pixel standard deviations of the training split
pub const CIFAR10_STD: [f32; 3] = [63.0 / 255.0, 62.1 / 255.0, 66.7 / 255.0];

/// One label byte followed by a 32x32x3 image, channel planes first
const RECORD_LEN: usize = 1 + IMAGE_CHANNELS * IMAGE_SIZE * IMAGE_SIZE;

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILE: &str = "test_batch.bin";

/// Errors for the dataset provider
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error(
        "dataset file '{}' not found; download \
         https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz and extract it \
         into the dataset root",
        .path.display()
    )]
    Missing { path: PathBuf },
    #[error("failed to read dataset file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "dataset file '{}' has size {len}, not a multiple of the {record_len}-byte record",
        .path.display()
    )]
    Malformed {
        path: PathBuf,
        len: usize,
        record_len: usize,
    },
    #[error("label {label} out of range for {NUM_CLASSES} classes")]
    InvalidLabel { label: u8 },
    #[error("Labels must have the same length as the data")]
    LabelLengthMismatch { label_len: usize, data_len: usize },
}

/// Which half of the dataset to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

/// A single image in channels-height-width layout, row major within each channel
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl Image {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), channels * height * width);
        Self {
            channels,
            height,
            width,
            data,
        }
    }

    pub fn zeros(channels: usize, height: usize, width: usize) -> Self {
        Self::new(channels, height, width, vec![0.0; channels * height * width])
    }

    /// Every pixel set to `value`, handy for building test fixtures
    pub fn filled(channels: usize, height: usize, width: usize, value: f32) -> Self {
        Self::new(channels, height, width, vec![value; channels * height * width])
    }

    pub fn get(&self, channel: usize, y: usize, x: usize) -> f32 {
        self.data[(channel * self.height + y) * self.width + x]
    }

    pub fn set(&mut self, channel: usize, y: usize, x: usize, value: f32) {
        self.data[(channel * self.height + y) * self.width + x] = value;
    }
}

/// Labeled images plus the transform pipeline applied on every access.
/// The stored images are immutable once loaded; `get` hands out a freshly
/// transformed copy each time.
pub struct Cifar10 {
    images: Vec<Image>,
    labels: Vec<u8>,
    transform: Compose,
}

impl Cifar10 {
    /// Loads one split of the binary-format distribution from `root`.
    /// Fails if any expected file is absent or malformed.
    pub fn load(root: &Path, split: Split, transform: Compose) -> Result<Self, DatasetError> {
        let files: &[&str] = match split {
            Split::Train => &TRAIN_FILES,
            Split::Test => &[TEST_FILE],
        };
        let mut images = Vec::new();
        let mut labels = Vec::new();
        for file in files {
            let path = root.join(file);
            if !path.exists() {
                return Err(DatasetError::Missing { path });
            }
            let bytes = fs::read(&path).map_err(|source| DatasetError::Io {
                path: path.clone(),
                source,
            })?;
            if bytes.len() % RECORD_LEN != 0 {
                return Err(DatasetError::Malformed {
                    path,
                    len: bytes.len(),
                    record_len: RECORD_LEN,
                });
            }
            for record in bytes.chunks_exact(RECORD_LEN) {
                let label = record[0];
                if label as usize >= NUM_CLASSES {
                    return Err(DatasetError::InvalidLabel { label });
                }
                let data = record[1..].iter().map(|b| *b as f32 / 255.0).collect();
                images.push(Image::new(IMAGE_CHANNELS, IMAGE_SIZE, IMAGE_SIZE, data));
                labels.push(label);
            }
        }
        log::info!("loaded {} {:?} images from '{}'", images.len(), split, root.display());
        Ok(Self {
            images,
            labels,
            transform,
        })
    }

    /// Builds a dataset from decoded samples, e.g. synthetic fixtures in tests
    pub fn from_samples(
        images: Vec<Image>,
        labels: Vec<u8>,
        transform: Compose,
    ) -> Result<Self, DatasetError> {
        if images.len() != labels.len() {
            return Err(DatasetError::LabelLengthMismatch {
                label_len: labels.len(),
                data_len: images.len(),
            });
        }
        Ok(Self {
            images,
            labels,
            transform,
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Returns a transformed copy of the sample at `index` and its label
    pub fn get(&self, index: usize) -> (Image, u8) {
        let image = self.transform.apply(self.images[index].clone());
        (image, self.labels[index])
    }
}
