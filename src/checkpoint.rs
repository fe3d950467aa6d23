//! Persists model parameters to flat files
//!
//! A checkpoint is the full parameter vector of a module, serialized as JSON
//! and overwritten in place; only the latest snapshot is kept.

use std::{
    fs,
    io::{self, BufReader, BufWriter},
    path::Path,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::nn::Module;

/// Errors for checkpoint persistence
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed")]
    Io(#[from] io::Error),
    #[error("checkpoint serialization failed")]
    Serde(#[from] serde_json::Error),
    #[error("checkpoint holds {got} parameters, model expects {expected}")]
    ParameterCountMismatch { expected: usize, got: usize },
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    params: Vec<f32>,
}

/// Writes the full parameter vector of a module, replacing any previous file
pub fn save(model: &dyn Module, path: &Path) -> Result<(), CheckpointError> {
    let snapshot = Snapshot {
        params: model.parameters().iter().map(|p| p.data()).collect(),
    };
    let file = fs::File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), &snapshot)?;
    log::debug!(
        "saved {} parameters to '{}'",
        snapshot.params.len(),
        path.display()
    );
    Ok(())
}

/// Restores parameters saved by [`save`] into an architecture-matched module
pub fn load_into(model: &dyn Module, path: &Path) -> Result<(), CheckpointError> {
    let file = fs::File::open(path)?;
    let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))?;
    let mut params = model.parameters();
    if snapshot.params.len() != params.len() {
        return Err(CheckpointError::ParameterCountMismatch {
            expected: params.len(),
            got: snapshot.params.len(),
        });
    }
    for (param, value) in params.iter_mut().zip(snapshot.params) {
        param.set_data(value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Linear;
    use crate::values::Value;

    struct Probe {
        layer: Linear,
    }

    impl Probe {
        fn new(n_inputs: usize, n_outputs: usize) -> Self {
            Self {
                layer: Linear::new(n_inputs, n_outputs),
            }
        }
    }

    impl Module for Probe {
        fn parameters(&self) -> Vec<Value> {
            self.layer.parameters()
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.pt");

        let model = Probe::new(3, 2);
        let original: Vec<f32> = model.parameters().iter().map(|p| p.data()).collect();
        save(&model, &path).unwrap();

        // scramble in place, then restore
        for p in model.parameters().iter_mut() {
            p.set_data(0.0);
        }
        load_into(&model, &path).unwrap();
        let restored: Vec<f32> = model.parameters().iter().map(|p| p.data()).collect();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.pt");

        save(&Probe::new(3, 2), &path).unwrap();
        let smaller = Probe::new(2, 2);
        assert!(matches!(
            load_into(&smaller, &path),
            Err(CheckpointError::ParameterCountMismatch { .. })
        ));
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.pt");

        let first = Probe::new(2, 1);
        save(&first, &path).unwrap();
        let second = Probe::new(2, 1);
        save(&second, &path).unwrap();

        let target = Probe::new(2, 1);
        load_into(&target, &path).unwrap();
        let expected: Vec<f32> = second.parameters().iter().map(|p| p.data()).collect();
        let loaded: Vec<f32> = target.parameters().iter().map(|p| p.data()).collect();
        assert_eq!(expected, loaded);
    }
}
