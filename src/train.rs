//! Training and evaluation loop
//!
//! One unshuffled pass over the training set per epoch, followed by a full
//! evaluation pass; accuracies are recorded per epoch and the best final-epoch
//! model is checkpointed.

use std::path::Path;

use thiserror::Error;

use crate::checkpoint::{self, CheckpointError};
use crate::dataloader::{DataLoader, DataLoaderError};
use crate::datasets::{Cifar10, Image, NUM_CLASSES};
use crate::loss::CrossEntropyLoss;
use crate::mixup;
use crate::nn::{FeatureMap, Module, NNError, argmax};
use crate::optim::{MultiStepLR, Optim, SGD};
use crate::resnet::{Depth, ResNet};
use crate::values::Value;

pub const TRAIN_BATCH_SIZE: usize = 128;
pub const TEST_BATCH_SIZE: usize = 100;

const MOMENTUM: f32 = 0.9;
const WEIGHT_DECAY: f32 = 5e-4;
/// Epochs after which the learning rate is multiplied by [`LR_GAMMA`]
const LR_MILESTONES: [usize; 3] = [30, 60, 80];
const LR_GAMMA: f32 = 0.2;

/// Hyperparameters for a single training run
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub depth: Depth,
    pub epochs: usize,
    pub lr: f32,
    pub mixup: bool,
    pub alpha: f32,
    pub base_width: usize,
}

/// Per-epoch accuracy curves for one run
#[derive(Debug, Clone, Default)]
pub struct AccuracyHistory {
    pub train: Vec<f32>,
    pub test: Vec<f32>,
}

/// Errors for the training loop
#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Nn(#[from] NNError),
    #[error(transparent)]
    DataLoader(#[from] DataLoaderError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Runs the full training and evaluation loop, returning the accuracy curves.
///
/// The checkpoint at `checkpoint_path` is overwritten whenever the final-epoch
/// test accuracy beats the best seen so far; `acc` stays at zero before the
/// final epoch, so the comparison never fires earlier in the run.
pub fn train(
    train_set: &Cifar10,
    test_set: &Cifar10,
    cfg: &TrainConfig,
    checkpoint_path: &Path,
) -> Result<AccuracyHistory, TrainError> {
    let network = ResNet::with_base_width(cfg.depth, NUM_CLASSES, cfg.base_width);
    let mut optimizer = SGD::new(network.parameters(), cfg.lr, MOMENTUM, true, WEIGHT_DECAY);
    let mut scheduler = MultiStepLR::new(LR_MILESTONES.to_vec(), LR_GAMMA);
    let train_loader = DataLoader::new(train_set, TRAIN_BATCH_SIZE, false)?;
    let test_loader = DataLoader::new(test_set, TEST_BATCH_SIZE, false)?;

    let mut history = AccuracyHistory::default();
    let mut acc = 0.0f32;
    let mut best_acc = 0.0f32;

    for epoch in 0..cfg.epochs {
        let mut total_correct = 0.0f32;
        for (images, labels) in train_loader.iter() {
            let (loss, correct) = if cfg.mixup {
                let mixed = mixup::mixup_batch(&images, &labels, cfg.alpha, &mut rand::rng());
                let preds = forward_batch(&network, &mixed.images)?;
                let loss = mixup::mixup_loss(&preds, &mixed.targets_a, &mixed.targets_b, mixed.lam);
                let correct =
                    mixup::mixup_correct(&preds, &mixed.targets_a, &mixed.targets_b, mixed.lam);
                (loss, correct)
            } else {
                let preds = forward_batch(&network, &images)?;
                let correct = get_num_correct(&preds, &labels) as f32;
                let loss = CrossEntropyLoss::batch(&preds, &labels);
                (loss, correct)
            };
            optimizer.zero_grad();
            loss.backward();
            optimizer.step();
            total_correct += correct;
        }
        let train_acc = total_correct / train_set.len() as f32;
        println!("epoch: {epoch} total_correct: {total_correct}");
        println!("training accuracy: {train_acc}");
        history.train.push(train_acc);
        log::debug!(
            "dead neurons after epoch {}: {}",
            epoch,
            network.n_dead_neurons()
        );

        // evaluation pass; no backward calls, so no gradients accumulate
        let mut correct_test = 0usize;
        for (images, labels) in test_loader.iter() {
            let preds = forward_batch(&network, &images)?;
            correct_test += get_num_correct(&preds, &labels);
        }
        let test_acc = correct_test as f32 / test_set.len() as f32;
        println!("testing accuracy: {test_acc}");
        if epoch == cfg.epochs - 1 {
            acc = test_acc;
        }
        history.test.push(test_acc);
        scheduler.step(&mut optimizer);
        if best_acc < acc {
            best_acc = acc;
            checkpoint::save(&network, checkpoint_path)?;
            log::info!("checkpoint saved to '{}'", checkpoint_path.display());
        }
    }

    Ok(history)
}

fn forward_batch(network: &ResNet, images: &[Image]) -> Result<Vec<Vec<Value>>, NNError> {
    images
        .iter()
        .map(|image| network.forward(&FeatureMap::from_image(image)))
        .collect()
}

/// Number of predictions whose argmax matches the label
pub fn get_num_correct(preds: &[Vec<Value>], labels: &[u8]) -> usize {
    preds
        .iter()
        .zip(labels.iter())
        .filter(|(pred, label)| argmax(pred) == **label as usize)
        .count()
}
