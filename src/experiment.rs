//! Experiment driver: sweeps network depth against augmentation modes
//!
//! Each sweep trains every depth with one augmentation configuration
//! (baseline, cutout, or mixup), stacks the per-run accuracy curves into a
//! table of `2 * depths` rows by `epochs` columns, and writes it as CSV.

use std::{
    error::Error,
    fmt::{self, Display},
    path::{Path, PathBuf},
};

use plotters::{
    chart::ChartBuilder,
    prelude::{BitMapBackend, IntoDrawingArea, LineSeries},
    style::{Color, Palette, Palette99, WHITE},
};
use thiserror::Error as ThisError;

use crate::datasets::{CIFAR10_MEAN, CIFAR10_STD, Cifar10, DatasetError, IMAGE_SIZE, Split};
use crate::resnet::{DEFAULT_BASE_WIDTH, Depth};
use crate::train::{self, AccuracyHistory, TrainConfig, TrainError};
use crate::transforms::{Compose, Cutout, Normalize, RandomCrop, RandomHorizontalFlip};

/// The three augmentation modes swept by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    Base,
    Cutout,
    Mixup,
}

impl SweepMode {
    pub fn table_file(&self) -> &'static str {
        match self {
            SweepMode::Base => "acc_base.csv",
            SweepMode::Cutout => "acc_cutout.csv",
            SweepMode::Mixup => "acc_mixup.csv",
        }
    }

    pub fn plot_file(&self) -> &'static str {
        match self {
            SweepMode::Base => "acc_base.png",
            SweepMode::Cutout => "acc_cutout.png",
            SweepMode::Mixup => "acc_mixup.png",
        }
    }

    fn cutout(&self) -> bool {
        matches!(self, SweepMode::Cutout)
    }

    fn mixup(&self) -> bool {
        matches!(self, SweepMode::Mixup)
    }
}

impl Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepMode::Base => write!(f, "base"),
            SweepMode::Cutout => write!(f, "cutout"),
            SweepMode::Mixup => write!(f, "mixup"),
        }
    }
}

/// One training run's full configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub augment: bool,
    pub cutout: bool,
    pub n_holes: usize,
    pub cutout_length: usize,
    pub depth: Depth,
    pub epochs: usize,
    pub lr: f32,
    pub mixup: bool,
    pub alpha: f32,
    pub base_width: usize,
}

impl RunConfig {
    /// Checkpoint file name, encoding depth and augmentation flags
    pub fn checkpoint_name(&self) -> String {
        let mut name = format!("resnet{}", self.depth);
        if self.augment {
            name.push('+');
        }
        if self.cutout {
            name.push_str("cutout");
        }
        name.push_str(".pt");
        name
    }

    /// Geometric transforms first, then normalization, occlusion last
    fn train_transform(&self) -> Compose {
        let mut transform = Compose::new(vec![]);
        if self.augment {
            transform.push(Box::new(RandomCrop::new(IMAGE_SIZE, 4)));
            transform.push(Box::new(RandomHorizontalFlip::new()));
        }
        transform.push(Box::new(Normalize::new(
            CIFAR10_MEAN.to_vec(),
            CIFAR10_STD.to_vec(),
        )));
        if self.cutout {
            transform.push(Box::new(Cutout::new(self.n_holes, self.cutout_length)));
        }
        transform
    }

    fn test_transform(&self) -> Compose {
        Compose::new(vec![Box::new(Normalize::new(
            CIFAR10_MEAN.to_vec(),
            CIFAR10_STD.to_vec(),
        ))])
    }
}

/// Errors for the experiment driver
#[derive(Debug, ThisError)]
pub enum ExperimentError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error("failed to write accuracy table")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Sweep-level configuration: which depths to run, where data and outputs live
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub mode: SweepMode,
    pub depths: Vec<Depth>,
    pub epochs: usize,
    pub lr: f32,
    pub base_width: usize,
    pub data_root: PathBuf,
    pub output_dir: PathBuf,
}

impl SweepConfig {
    /// The standard sweep the binary runs: depths 18/34/50, 100 epochs, lr 0.02
    pub fn standard(mode: SweepMode) -> Self {
        Self {
            mode,
            depths: vec![Depth::D18, Depth::D34, Depth::D50],
            epochs: 100,
            lr: 0.02,
            base_width: DEFAULT_BASE_WIDTH,
            data_root: PathBuf::from("data/cifar10"),
            output_dir: PathBuf::from("."),
        }
    }

    fn config_for(&self, depth: Depth) -> RunConfig {
        RunConfig {
            augment: true,
            cutout: self.mode.cutout(),
            n_holes: 1,
            cutout_length: 16,
            depth,
            epochs: self.epochs,
            lr: self.lr,
            mixup: self.mode.mixup(),
            alpha: 0.1,
            base_width: self.base_width,
        }
    }
}

/// Runs one full training and evaluation cycle for a configuration
pub fn run_config(
    cfg: &RunConfig,
    data_root: &Path,
    output_dir: &Path,
) -> Result<AccuracyHistory, ExperimentError> {
    let train_set = Cifar10::load(data_root, Split::Train, cfg.train_transform())?;
    let test_set = Cifar10::load(data_root, Split::Test, cfg.test_transform())?;
    let checkpoint_path = output_dir.join(cfg.checkpoint_name());
    let train_cfg = TrainConfig {
        depth: cfg.depth,
        epochs: cfg.epochs,
        lr: cfg.lr,
        mixup: cfg.mixup,
        alpha: cfg.alpha,
        base_width: cfg.base_width,
    };
    Ok(train::train(&train_set, &test_set, &train_cfg, &checkpoint_path)?)
}

/// Runs every depth in the sweep and writes the aggregated accuracy table.
/// Rows alternate training and testing accuracy per depth; columns are epochs.
pub fn run_sweep(cfg: &SweepConfig) -> Result<Vec<Vec<f32>>, ExperimentError> {
    let mut rows = Vec::with_capacity(2 * cfg.depths.len());
    for &depth in &cfg.depths {
        log::info!("sweep {}: training resnet{}", cfg.mode, depth);
        let history = run_config(&cfg.config_for(depth), &cfg.data_root, &cfg.output_dir)?;
        rows.push(history.train);
        rows.push(history.test);
    }
    let table_path = cfg.output_dir.join(cfg.mode.table_file());
    write_table(&table_path, &rows)?;
    log::info!("accuracy table written to '{}'", table_path.display());
    Ok(rows)
}

/// Writes the accuracy table as CSV with column indices as the header
pub fn write_table(path: &Path, rows: &[Vec<f32>]) -> Result<(), ExperimentError> {
    let mut writer = csv::Writer::from_path(path)?;
    let n_cols = rows.first().map_or(0, |row| row.len());
    writer.write_record((0..n_cols).map(|i| i.to_string()))?;
    for row in rows {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Plots the accuracy curves of a sweep, one train/test pair of series per depth
pub fn plot_curves(
    path: &Path,
    depths: &[Depth],
    rows: &[Vec<f32>],
) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(path, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let epochs = rows.first().map_or(0, |row| row.len());
    let mut chart = ChartBuilder::on(&root_area)
        .caption("Accuracy per epoch", ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_cartesian_2d(0f32..epochs.max(1) as f32, 0f32..1f32)?;

    chart.configure_mesh().draw()?;

    for (i, _depth) in depths.iter().enumerate() {
        let color = Palette99::pick(i);
        // training curve drawn heavier than its testing counterpart
        chart.draw_series(LineSeries::new(
            rows[2 * i]
                .iter()
                .enumerate()
                .map(|(e, acc)| (e as f32, *acc)),
            color.stroke_width(2),
        ))?;
        chart.draw_series(LineSeries::new(
            rows[2 * i + 1]
                .iter()
                .enumerate()
                .map(|(e, acc)| (e as f32, *acc)),
            color.stroke_width(1),
        ))?;
    }

    root_area.present()?;
    log::info!("Accuracy plot has been saved to '{}'.", path.display());
    Ok(())
}
