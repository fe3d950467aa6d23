//! End-to-end sweep over a small fixture dataset in the binary CIFAR-10 format

use std::fs;
use std::path::Path;

use augsweep_rs::experiment::{SweepConfig, SweepMode, run_sweep};
use augsweep_rs::resnet::Depth;

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const PIXELS_PER_IMAGE: usize = 3 * 32 * 32;

/// Two training records per batch file plus ten test records. All test images
/// are identical with one label per class, so the deterministic prediction
/// matches exactly one of them.
fn write_fixture(root: &Path) {
    for (i, file) in TRAIN_FILES.iter().enumerate() {
        let mut bytes = Vec::new();
        for record in 0..2 {
            bytes.push(((i * 2 + record) % 10) as u8);
            bytes.extend((0..PIXELS_PER_IMAGE).map(|p| ((p + 7 * record + 13 * i) % 251) as u8));
        }
        fs::write(root.join(file), &bytes).unwrap();
    }

    let mut bytes = Vec::new();
    for label in 0..10u8 {
        bytes.push(label);
        bytes.extend(std::iter::repeat_n(128u8, PIXELS_PER_IMAGE));
    }
    fs::write(root.join("test_batch.bin"), &bytes).unwrap();
}

#[test]
fn base_sweep_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let data_root = dir.path().join("cifar10");
    let output_dir = dir.path().join("out");
    fs::create_dir_all(&data_root).unwrap();
    fs::create_dir_all(&output_dir).unwrap();
    write_fixture(&data_root);

    let cfg = SweepConfig {
        mode: SweepMode::Base,
        depths: vec![Depth::D18],
        epochs: 1,
        lr: 0.01,
        base_width: 1,
        data_root: data_root.clone(),
        output_dir: output_dir.clone(),
    };
    let rows = run_sweep(&cfg).unwrap();

    // one train row and one test row per depth, one column per epoch
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.len(), 1);
        assert!(row[0] >= 0.0 && row[0] <= 1.0);
    }
    // ten identical test images with distinct labels yield exactly one hit
    assert!((rows[1][0] - 0.1).abs() < 1e-6);

    // exactly one checkpoint, named for the depth and augmentation flags
    assert!(output_dir.join("resnet18+.pt").exists());
    let checkpoints = fs::read_dir(&output_dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "pt"))
        .count();
    assert_eq!(checkpoints, 1);

    let mut reader = csv::Reader::from_path(output_dir.join("acc_base.csv")).unwrap();
    assert_eq!(reader.headers().unwrap().len(), 1);
    let records = reader.records().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(records.len(), 2);
}

#[test]
fn missing_dataset_fails_the_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SweepConfig {
        mode: SweepMode::Base,
        depths: vec![Depth::D18],
        epochs: 1,
        lr: 0.01,
        base_width: 1,
        data_root: dir.path().join("nowhere"),
        output_dir: dir.path().to_path_buf(),
    };
    assert!(run_sweep(&cfg).is_err());
}
