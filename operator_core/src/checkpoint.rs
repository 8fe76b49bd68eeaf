//! Checkpoint trait and error handling for deterministic model persistence.
//!
//! [`Checkpointable`] fixes a deterministic, versioned serialization contract:
//! implementations store a version header alongside the payload so that
//! incompatible files are rejected during load. [`ModelCheckpoint`] applies it
//! to a Fourier Neural Operator's configuration and parameters.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::config::FnoConfig;
use crate::error::OperatorError;
use crate::model::{FnoParams, FourierNeuralOperator};
use crate::scalar::Real;

/// Schema version written by [`ModelCheckpoint::save_checkpoint`].
pub const MODEL_CHECKPOINT_VERSION: u32 = 1;

/// Errors that can occur while saving or loading checkpoints.
#[derive(Debug)]
pub enum CheckpointError {
    /// Underlying I/O failure while reading or writing checkpoint files.
    Io(std::io::Error),
    /// Serialization or deserialization error from the binary codec.
    Serialization(bincode::Error),
    /// The checkpoint file was well formed but produced an incompatible schema version.
    VersionMismatch { expected: u32, found: u32 },
    /// The checkpoint file did not match the expected structure.
    InvalidFormat(String),
    /// The stored configuration no longer builds a model.
    Operator(OperatorError),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Io(err) => write!(f, "I/O error while accessing checkpoint: {err}"),
            CheckpointError::Serialization(err) => {
                write!(f, "Failed to (de)serialize checkpoint payload: {err}")
            }
            CheckpointError::VersionMismatch { expected, found } => write!(
                f,
                "Checkpoint version mismatch: expected {expected}, found {found}",
            ),
            CheckpointError::InvalidFormat(msg) => {
                write!(f, "Checkpoint file has invalid structure: {msg}")
            }
            CheckpointError::Operator(err) => write!(f, "Failed to rebuild model: {err}"),
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        CheckpointError::Io(err)
    }
}

impl From<bincode::Error> for CheckpointError {
    fn from(err: bincode::Error) -> Self {
        CheckpointError::Serialization(err)
    }
}

impl From<OperatorError> for CheckpointError {
    fn from(err: OperatorError) -> Self {
        CheckpointError::Operator(err)
    }
}

/// Deterministic binary codec options shared by all checkpoint implementations.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_little_endian()
}

/// Components that support deterministic persistence implement this trait.
pub trait Checkpointable: Sized {
    /// Save the current state to `path` using the deterministic codec.
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError>;

    /// Load a state from `path`.
    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError>;

    /// Utility for writing a serializable snapshot with the shared codec.
    fn write_snapshot<P, S>(snapshot: &S, path: P) -> Result<(), CheckpointError>
    where
        P: AsRef<Path>,
        S: Serialize,
    {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        codec().serialize_into(&mut writer, snapshot)?;
        writer.flush()?;
        Ok(())
    }

    /// Utility for reading a serializable snapshot with the shared codec.
    fn read_snapshot<P, S>(path: P) -> Result<S, CheckpointError>
    where
        P: AsRef<Path>,
        S: serde::de::DeserializeOwned,
    {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Ok(codec().deserialize_from(&mut reader)?)
    }
}

/// A model's configuration together with its trained parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCheckpoint<T> {
    pub config: FnoConfig,
    pub params: FnoParams<T>,
}

/// Leading fields of every [`ModelSnapshot`], readable without knowing `T`.
#[derive(Deserialize)]
struct SnapshotHeader {
    version: u32,
    precision: String,
}

#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: serde::de::DeserializeOwned"))]
struct ModelSnapshot<T> {
    version: u32,
    precision: String,
    config: FnoConfig,
    params: FnoParams<T>,
}

impl<T: Real> ModelCheckpoint<T> {
    pub fn new(config: FnoConfig, params: FnoParams<T>) -> Self {
        Self { config, params }
    }

    /// Rebuilds the model described by the stored configuration.
    pub fn model(&self) -> Result<FourierNeuralOperator<T>, CheckpointError> {
        Ok(self.config.build()?)
    }

    /// Rejects parameters whose shapes do not fit the stored configuration.
    fn validate(&self) -> Result<(), CheckpointError> {
        let model = self.model()?;
        model
            .check_params(&self.params)
            .map_err(|err| CheckpointError::InvalidFormat(format!("Parameter shape mismatch: {err}")))
    }
}

impl<T: Real> Checkpointable for ModelCheckpoint<T> {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        self.validate()?;
        let snapshot = ModelSnapshot {
            version: MODEL_CHECKPOINT_VERSION,
            precision: T::precision_tag().to_string(),
            config: self.config.clone(),
            params: self.params.clone(),
        };

        Self::write_snapshot(&snapshot, path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        // The header decides whether the payload can be decoded as `T` at all.
        let header: SnapshotHeader = Self::read_snapshot(path.as_ref())?;
        if header.version != MODEL_CHECKPOINT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: MODEL_CHECKPOINT_VERSION,
                found: header.version,
            });
        }
        if header.precision != T::precision_tag() {
            return Err(CheckpointError::InvalidFormat(format!(
                "Precision mismatch: expected {}, found {}",
                T::precision_tag(),
                header.precision
            )));
        }

        let snapshot: ModelSnapshot<T> = Self::read_snapshot(path)?;
        let checkpoint = Self {
            config: snapshot.config,
            params: snapshot.params,
        };
        checkpoint.validate()?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Layer;

    fn tiny_config() -> FnoConfig {
        FnoConfig {
            in_channels: 1,
            out_channels: 1,
            hidden_channels: 3,
            projection_channels: 4,
            modes: vec![2],
            num_layers: 1,
            ..FnoConfig::default()
        }
    }

    fn checkpoint() -> ModelCheckpoint<f32> {
        let config = tiny_config();
        let model = config.build::<f32>().unwrap();
        let params = model.init_params(&mut config.rng());
        ModelCheckpoint::new(config, params)
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.ckpt");
        let original = checkpoint();
        original.save_checkpoint(&path).unwrap();
        let loaded = ModelCheckpoint::<f32>::load_checkpoint(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ckpt");
        let original = checkpoint();
        let snapshot = ModelSnapshot {
            version: MODEL_CHECKPOINT_VERSION + 1,
            precision: "ComplexF32".to_string(),
            config: original.config.clone(),
            params: original.params.clone(),
        };
        ModelCheckpoint::<f32>::write_snapshot(&snapshot, &path).unwrap();
        match ModelCheckpoint::<f32>::load_checkpoint(&path) {
            Err(CheckpointError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, MODEL_CHECKPOINT_VERSION);
                assert_eq!(found, MODEL_CHECKPOINT_VERSION + 1);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ckpt");
        let original = checkpoint();
        let snapshot = ModelSnapshot {
            version: MODEL_CHECKPOINT_VERSION,
            precision: "ComplexF32".to_string(),
            config: FnoConfig {
                hidden_channels: 5,
                ..original.config.clone()
            },
            params: original.params.clone(),
        };
        ModelCheckpoint::<f32>::write_snapshot(&snapshot, &path).unwrap();
        assert!(matches!(
            ModelCheckpoint::<f32>::load_checkpoint(&path),
            Err(CheckpointError::InvalidFormat(_))
        ));
        // Saving refuses the same inconsistency up front.
        let broken = ModelCheckpoint::new(snapshot.config, snapshot.params);
        assert!(broken.save_checkpoint(dir.path().join("other.ckpt")).is_err());
    }

    #[test]
    fn test_precision_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ckpt");
        checkpoint().save_checkpoint(&path).unwrap();
        assert!(matches!(
            ModelCheckpoint::<f64>::load_checkpoint(&path),
            Err(CheckpointError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ModelCheckpoint::<f32>::load_checkpoint(dir.path().join("absent.ckpt")),
            Err(CheckpointError::Io(_))
        ));
    }

    #[test]
    fn test_display() {
        let err = CheckpointError::VersionMismatch {
            expected: 1,
            found: 2,
        };
        assert_eq!(err.to_string(), "Checkpoint version mismatch: expected 1, found 2");
    }
}
