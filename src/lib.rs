//! Building blocks for running CIFAR-10 image classification experiments:
//! a minimal scalar autograd engine, convolutional ResNet models, a
//! data-augmentation pipeline (crop / flip / normalize / cutout), mixup,
//! and a training loop with per-epoch accuracy tracking.

pub mod backprop_fns;
pub mod checkpoint;
pub mod dataloader;
pub mod datasets;
pub mod experiment;
pub mod loss;
pub mod mixup;
pub mod nn;
pub mod optim;
pub mod resnet;
pub mod train;
pub mod transforms;
pub mod values;
