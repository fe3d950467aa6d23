//! Runs the full set of CIFAR-10 classification experiments: three
//! augmentation sweeps (baseline, cutout, mixup), each across three network
//! depths, writing per-epoch accuracy tables, curve plots, and best
//! checkpoints into the working directory.
//!
//! The binary takes no arguments; the dataset is read from `data/cifar10`
//! (see the dataset module for the expected files). Logging is controlled via
//! `RUST_LOG`.

use augsweep_rs::experiment::{self, SweepConfig, SweepMode};

fn main() {
    env_logger::init();

    for mode in [SweepMode::Base, SweepMode::Cutout, SweepMode::Mixup] {
        let cfg = SweepConfig::standard(mode);
        let rows = match experiment::run_sweep(&cfg) {
            Ok(rows) => rows,
            Err(err) => {
                log::error!("sweep {mode} failed: {err}");
                std::process::exit(1);
            }
        };
        let plot_path = cfg.output_dir.join(mode.plot_file());
        if let Err(err) = experiment::plot_curves(&plot_path, &cfg.depths, &rows) {
            log::error!("sweep {mode}: plotting failed: {err}");
            std::process::exit(1);
        }
    }
}
