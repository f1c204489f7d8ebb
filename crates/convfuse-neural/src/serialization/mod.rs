//! Parameter persistence.
//!
//! State files are JSON documents listing every tensor by name, shape and
//! flattened `f32` data, plus a small metadata map:
//!
//! ```json
//! {
//!   "tensors": [{ "name": "model_p1.0.weight", "shape": [3, 1, 3, 3], "data": [...] }],
//!   "metadata": { "format_version": "1", "tensor_type": "f32", "num_tensors": "1" }
//! }
//! ```

pub mod state_dict;
pub mod weight_loader;

pub use state_dict::StateDict;
pub use weight_loader::{parameter_name, LoadConfig, LoadSummary};

#[cfg(feature = "serialize")]
use convfuse_core::{Result, Tensor, TensorError};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serialize")]
use std::collections::HashMap;
#[cfg(feature = "serialize")]
use std::path::Path;

/// Version written to and accepted from state files.
pub const FORMAT_VERSION: &str = "1";

/// One named tensor of a state file.
#[cfg(feature = "serialize")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Serializable representation of a state dict.
#[cfg(feature = "serialize")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    /// Tensors in network order
    pub tensors: Vec<TensorRecord>,
    /// File metadata
    pub metadata: HashMap<String, String>,
}

#[cfg(feature = "serialize")]
impl StateFile {
    /// Build the file representation of `dict`.
    ///
    /// JSON has no encoding for infinities or NaN, so a tensor holding one
    /// is rejected here rather than written as a file that cannot be read
    /// back.
    pub fn from_state_dict(dict: &StateDict<f32>) -> Result<Self> {
        let mut tensors = Vec::with_capacity(dict.len());
        for (name, tensor) in dict.iter() {
            let data = tensor.to_vec();
            if let Some(position) = data.iter().position(|v| !v.is_finite()) {
                return Err(TensorError::serialization_error(
                    "StateFile::from_state_dict",
                    &format!(
                        "tensor '{name}' holds non-finite value {} at element {position}",
                        data[position]
                    ),
                ));
            }
            tensors.push(TensorRecord {
                name: name.to_string(),
                shape: tensor.shape().dims().to_vec(),
                data,
            });
        }

        let mut metadata = HashMap::new();
        metadata.insert("format_version".to_string(), FORMAT_VERSION.to_string());
        metadata.insert("tensor_type".to_string(), "f32".to_string());
        metadata.insert("num_tensors".to_string(), tensors.len().to_string());

        Ok(Self { tensors, metadata })
    }

    /// Validate the metadata and rebuild the state dict.
    pub fn into_state_dict(self) -> Result<StateDict<f32>> {
        const OP: &str = "StateFile::into_state_dict";
        if let Some(version) = self.metadata.get("format_version") {
            if version != FORMAT_VERSION {
                return Err(TensorError::serialization_error(
                    OP,
                    &format!("unsupported format version {version}"),
                ));
            }
        }
        if let Some(tensor_type) = self.metadata.get("tensor_type") {
            if tensor_type != "f32" {
                return Err(TensorError::serialization_error(
                    OP,
                    &format!("unsupported tensor type {tensor_type}"),
                ));
            }
        }
        if let Some(count) = self.metadata.get("num_tensors") {
            if count.parse::<usize>().ok() != Some(self.tensors.len()) {
                return Err(TensorError::serialization_error(
                    OP,
                    &format!(
                        "metadata announces {count} tensors, file holds {}",
                        self.tensors.len()
                    ),
                ));
            }
        }

        let mut dict = StateDict::new();
        for record in self.tensors {
            let tensor = Tensor::from_vec(record.data, &record.shape).map_err(|e| {
                TensorError::serialization_error(OP, &format!("tensor '{}': {e}", record.name))
            })?;
            if dict.insert(record.name.clone(), tensor).is_some() {
                return Err(TensorError::serialization_error(
                    OP,
                    &format!("duplicate tensor '{}'", record.name),
                ));
            }
        }
        Ok(dict)
    }
}

/// Encode a state dict as a JSON document.
#[cfg(feature = "serialize")]
pub fn to_json(dict: &StateDict<f32>) -> Result<String> {
    serde_json::to_string_pretty(&StateFile::from_state_dict(dict)?).map_err(|e| {
        TensorError::serialization_error("to_json", &format!("Serialization failed: {e}"))
    })
}

/// Decode a state dict from a JSON document.
#[cfg(feature = "serialize")]
pub fn from_json(json: &str) -> Result<StateDict<f32>> {
    let file: StateFile = serde_json::from_str(json).map_err(|e| {
        TensorError::serialization_error("from_json", &format!("Deserialization failed: {e}"))
    })?;
    file.into_state_dict()
}

/// Write a state dict to `path`. Nothing is written when encoding fails.
#[cfg(feature = "serialize")]
pub fn save_state_dict<P: AsRef<Path>>(path: P, dict: &StateDict<f32>) -> Result<()> {
    let path = path.as_ref();
    let serialized = to_json(dict)?;
    std::fs::write(path, serialized).map_err(|e| {
        TensorError::io_error(
            "save_state_dict",
            &format!("Failed to write file: {e}"),
            Some(path),
        )
    })?;
    log::debug!("saved {} tensors to {}", dict.len(), path.display());
    Ok(())
}

/// Read a state dict from `path`.
#[cfg(feature = "serialize")]
pub fn load_state_dict<P: AsRef<Path>>(path: P) -> Result<StateDict<f32>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        TensorError::io_error(
            "load_state_dict",
            &format!("Failed to read file: {e}"),
            Some(path),
        )
    })?;
    let dict = from_json(&content)?;
    log::debug!("loaded {} tensors from {}", dict.len(), path.display());
    Ok(dict)
}

#[cfg(all(test, feature = "serialize"))]
mod tests {
    use super::*;

    fn sample() -> StateDict<f32> {
        let mut dict = StateDict::new();
        dict.insert(
            "m.0.weight",
            Tensor::from_vec(vec![0.1, -2.5, 3.25, 1e-7], &[2, 2, 1, 1]).unwrap(),
        );
        dict.insert("m.0.bias", Tensor::from_vec(vec![0.5, -0.5], &[2]).unwrap());
        dict
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state_dict(&path, &sample()).unwrap();
        assert_eq!(load_state_dict(&path).unwrap(), sample());
    }

    #[test]
    fn test_metadata_written() {
        let file = StateFile::from_state_dict(&sample()).unwrap();
        assert_eq!(file.metadata["format_version"], FORMAT_VERSION);
        assert_eq!(file.metadata["tensor_type"], "f32");
        assert_eq!(file.metadata["num_tensors"], "2");
        assert_eq!(file.tensors[0].name, "m.0.weight");
        assert_eq!(file.tensors[0].shape, vec![2, 2, 1, 1]);
    }

    #[test]
    fn test_rejects_inconsistent_files() {
        let mut file = StateFile::from_state_dict(&sample()).unwrap();
        file.tensors[1].shape = vec![3];
        assert!(matches!(
            file.into_state_dict().unwrap_err(),
            TensorError::SerializationError { .. }
        ));

        let mut file = StateFile::from_state_dict(&sample()).unwrap();
        file.metadata.insert("num_tensors".to_string(), "5".to_string());
        assert!(file.into_state_dict().is_err());

        let mut file = StateFile::from_state_dict(&sample()).unwrap();
        file.tensors[1].name = "m.0.weight".to_string();
        file.tensors[1].shape = vec![2, 2, 1, 1];
        file.tensors[1].data = vec![0.0; 4];
        assert!(file.into_state_dict().is_err());

        assert!(from_json("{not json").is_err());
    }

    #[test]
    fn test_non_finite_values_are_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        for bad in [f32::INFINITY, f32::NEG_INFINITY, f32::NAN] {
            let path = dir.path().join("state.json");
            let mut dict = sample();
            dict.insert("m.1.weight", Tensor::from_vec(vec![bad, 1.0], &[2]).unwrap());

            match save_state_dict(&path, &dict).unwrap_err() {
                TensorError::SerializationError { details, .. } => {
                    assert!(details.contains("m.1.weight"), "{details}");
                }
                other => panic!("unexpected error: {other:?}"),
            }
            assert!(!path.exists());
            assert!(to_json(&dict).is_err());
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_state_dict(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, TensorError::IoError { path: Some(_), .. }));
    }
}
