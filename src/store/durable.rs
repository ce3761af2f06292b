//! Durable store collaborators
//!
//! A durable store is a tree of named groups and numeric datasets, each
//! carrying a JSON metadata map. Names are `/`-separated paths; deleting a
//! group removes everything beneath it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Persistence boundary used by the response store and calibration runs
pub trait DurableStore: Send {
    fn init_group(&mut self, name: &str) -> Result<(), StoreError>;

    /// Create (or reset) a dataset with the given logical shape
    fn init_dataset(&mut self, name: &str, shape: &[usize]) -> Result<(), StoreError>;

    /// Append samples to a dataset
    fn append(&mut self, name: &str, buffer: &[f64]) -> Result<(), StoreError>;

    /// Merge `metadata` into the metadata of a group or dataset
    fn set_metadata(&mut self, name: &str, metadata: Map<String, Value>) -> Result<(), StoreError>;

    fn get(&self, name: &str) -> Result<Vec<f64>, StoreError>;

    fn metadata(&self, name: &str) -> Result<Map<String, Value>, StoreError>;

    fn shape(&self, name: &str) -> Result<Vec<usize>, StoreError>;

    fn delete_group(&mut self, name: &str) -> Result<(), StoreError>;

    /// Every group and dataset name
    fn keys(&self) -> BTreeSet<String>;

    /// Make previous writes durable
    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Next free `{prefix}_{n}` name: one past the highest existing suffix
pub fn unique_name(store: &dyn DurableStore, prefix: &str) -> String {
    let next = store
        .keys()
        .iter()
        .filter_map(|key| {
            key.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('_'))
                .and_then(|n| n.parse::<usize>().ok())
        })
        .max()
        .map(|n| n + 1)
        .unwrap_or(0);
    format!("{}_{}", prefix, next)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Group {
        metadata: Map<String, Value>,
    },
    Dataset {
        shape: Vec<usize>,
        data: Vec<f64>,
        metadata: Map<String, Value>,
    },
}

impl Node {
    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        match self {
            Node::Group { metadata } => metadata,
            Node::Dataset { metadata, .. } => metadata,
        }
    }
}

/// In-memory durable store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStore {
    nodes: BTreeMap<String, Node>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn unknown(name: &str) -> StoreError {
        StoreError::UnknownDataset {
            key: name.to_string(),
        }
    }

    fn ensure_parents(&mut self, name: &str) {
        let mut prefix = String::new();
        let parts: Vec<&str> = name.split('/').collect();
        for part in &parts[..parts.len().saturating_sub(1)] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            self.nodes.entry(prefix.clone()).or_insert(Node::Group {
                metadata: Map::new(),
            });
        }
    }

    fn dataset(&self, name: &str) -> Result<(&Vec<usize>, &Vec<f64>), StoreError> {
        match self.nodes.get(name) {
            Some(Node::Dataset { shape, data, .. }) => Ok((shape, data)),
            _ => Err(Self::unknown(name)),
        }
    }
}

impl DurableStore for MemoryStore {
    fn init_group(&mut self, name: &str) -> Result<(), StoreError> {
        self.ensure_parents(name);
        self.nodes.entry(name.to_string()).or_insert(Node::Group {
            metadata: Map::new(),
        });
        Ok(())
    }

    fn init_dataset(&mut self, name: &str, shape: &[usize]) -> Result<(), StoreError> {
        self.ensure_parents(name);
        self.nodes.insert(
            name.to_string(),
            Node::Dataset {
                shape: shape.to_vec(),
                data: Vec::with_capacity(shape.iter().product()),
                metadata: Map::new(),
            },
        );
        Ok(())
    }

    fn append(&mut self, name: &str, buffer: &[f64]) -> Result<(), StoreError> {
        match self.nodes.get_mut(name) {
            Some(Node::Dataset { data, .. }) => {
                data.extend_from_slice(buffer);
                Ok(())
            }
            _ => Err(Self::unknown(name)),
        }
    }

    fn set_metadata(&mut self, name: &str, metadata: Map<String, Value>) -> Result<(), StoreError> {
        let node = self.nodes.get_mut(name).ok_or_else(|| Self::unknown(name))?;
        node.metadata_mut().extend(metadata);
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<f64>, StoreError> {
        self.dataset(name).map(|(_, data)| data.clone())
    }

    fn metadata(&self, name: &str) -> Result<Map<String, Value>, StoreError> {
        match self.nodes.get(name) {
            Some(Node::Group { metadata }) | Some(Node::Dataset { metadata, .. }) => {
                Ok(metadata.clone())
            }
            None => Err(Self::unknown(name)),
        }
    }

    fn shape(&self, name: &str) -> Result<Vec<usize>, StoreError> {
        self.dataset(name).map(|(shape, _)| shape.clone())
    }

    fn delete_group(&mut self, name: &str) -> Result<(), StoreError> {
        if self.nodes.remove(name).is_none() {
            return Err(Self::unknown(name));
        }
        let child_prefix = format!("{}/", name);
        self.nodes.retain(|key, _| !key.starts_with(&child_prefix));
        Ok(())
    }

    fn keys(&self) -> BTreeSet<String> {
        self.nodes.keys().cloned().collect()
    }
}

/// Durable store persisted as a single JSON document
///
/// Mutations happen in memory; [`DurableStore::flush`] rewrites the file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Open an existing file, or start empty if it does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let inner = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            MemoryStore::new()
        };
        Ok(Self { path, inner })
    }

    /// Start an empty store that will replace any existing file on flush
    pub fn create<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            inner: MemoryStore::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DurableStore for JsonFileStore {
    fn init_group(&mut self, name: &str) -> Result<(), StoreError> {
        self.inner.init_group(name)
    }

    fn init_dataset(&mut self, name: &str, shape: &[usize]) -> Result<(), StoreError> {
        self.inner.init_dataset(name, shape)
    }

    fn append(&mut self, name: &str, buffer: &[f64]) -> Result<(), StoreError> {
        self.inner.append(name, buffer)
    }

    fn set_metadata(&mut self, name: &str, metadata: Map<String, Value>) -> Result<(), StoreError> {
        self.inner.set_metadata(name, metadata)
    }

    fn get(&self, name: &str) -> Result<Vec<f64>, StoreError> {
        self.inner.get(name)
    }

    fn metadata(&self, name: &str) -> Result<Map<String, Value>, StoreError> {
        self.inner.metadata(name)
    }

    fn shape(&self, name: &str) -> Result<Vec<usize>, StoreError> {
        self.inner.shape(name)
    }

    fn delete_group(&mut self, name: &str) -> Result<(), StoreError> {
        self.inner.delete_group(name)
    }

    fn keys(&self) -> BTreeSet<String> {
        self.inner.keys()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string(&self.inner)?;
        fs::write(&self.path, contents)?;
        tracing::debug!("[DurableStore] Flushed {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dataset_lifecycle() {
        let mut store = MemoryStore::new();
        store.init_dataset("cal/intensities", &[4]).unwrap();
        store.append("cal/intensities", &[1.0, 2.0]).unwrap();
        store.append("cal/intensities", &[3.0, 4.0]).unwrap();

        assert_eq!(store.get("cal/intensities").unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(store.shape("cal/intensities").unwrap(), vec![4]);
        assert!(store.keys().contains("cal"), "parent group created implicitly");
    }

    #[test]
    fn test_metadata_merges() {
        let mut store = MemoryStore::new();
        store.init_group("run").unwrap();

        let mut first = Map::new();
        first.insert("calibration_dB".to_string(), json!(100.0));
        store.set_metadata("run", first).unwrap();

        let mut second = Map::new();
        second.insert("calibration_frequency".to_string(), json!(20000.0));
        store.set_metadata("run", second).unwrap();

        let metadata = store.metadata("run").unwrap();
        assert_eq!(metadata["calibration_dB"], 100.0);
        assert_eq!(metadata["calibration_frequency"], 20000.0);
    }

    #[test]
    fn test_delete_group_removes_children() {
        let mut store = MemoryStore::new();
        store.init_group("calibration_0").unwrap();
        store.init_dataset("calibration_0/signal", &[2]).unwrap();
        store.init_group("calibration_01").unwrap();

        store.delete_group("calibration_0").unwrap();
        let keys = store.keys();
        assert!(!keys.contains("calibration_0"));
        assert!(!keys.contains("calibration_0/signal"));
        assert!(keys.contains("calibration_01"));

        assert!(store.delete_group("calibration_0").is_err());
    }

    #[test]
    fn test_unknown_dataset() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            store.append("missing", &[1.0]),
            Err(StoreError::UnknownDataset { .. })
        ));
        assert!(store.get("missing").is_err());
    }

    #[test]
    fn test_unique_name() {
        let mut store = MemoryStore::new();
        assert_eq!(unique_name(&store, "calibration"), "calibration_0");

        store.init_group("calibration_0").unwrap();
        store.init_group("calibration_3").unwrap();
        store.init_group("tone_curve_7").unwrap();
        assert_eq!(unique_name(&store, "calibration"), "calibration_4");
    }

    #[test]
    fn test_json_file_store_roundtrip() {
        let path = std::env::temp_dir().join("auditory_acquisition_durable_test.json");
        let mut store = JsonFileStore::create(&path);
        store.init_dataset("run/trace", &[3]).unwrap();
        store.append("run/trace", &[0.5, 0.25, 0.125]).unwrap();
        store.flush().unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("run/trace").unwrap(), vec![0.5, 0.25, 0.125]);

        let _ = fs::remove_file(&path);
    }
}
