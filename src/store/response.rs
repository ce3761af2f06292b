//! Indexed response store
//!
//! Accumulates responses on a (frequency, intensity, repetition[, sample])
//! grid. The frequency and intensity axes are declared up front and values
//! are located by exact match; a value that is not on an axis is a usage
//! error and is reported, never retried.
//!
//! All datasets of a store share one coarse lock. `put`, `get` and `export`
//! take it for their whole duration, so an export is a consistent snapshot
//! across datasets.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{log_store_error, StoreError};

use super::durable::{DurableStore, JsonFileStore};

/// Declared axes of every dataset in a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreAxes {
    pub frequencies: Vec<f64>,
    pub intensities: Vec<f64>,
    pub repetitions: usize,
    /// Stimulus duration in seconds
    pub duration: f64,
    /// Acquisition sample rate in Hz
    pub sample_rate: f64,
}

impl StoreAxes {
    fn frequency_index(&self, value: f64) -> Result<usize, StoreError> {
        self.frequencies
            .iter()
            .position(|&f| f == value)
            .ok_or(StoreError::IndexNotFound {
                axis: "frequency",
                value,
            })
    }

    fn intensity_index(&self, value: f64) -> Result<usize, StoreError> {
        self.intensities
            .iter()
            .position(|&i| i == value)
            .ok_or(StoreError::IndexNotFound {
                axis: "intensity",
                value,
            })
    }

    /// Trace length used by rank 4 datasets created without an explicit one
    pub fn default_trace_len(&self) -> usize {
        (self.duration * self.sample_rate / 2.0) as usize
    }
}

/// Layout of one dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum DatasetShape {
    /// (frequency, intensity): running mean over repetitions
    Averaged,
    /// (frequency, intensity, repetition): one scalar per presentation
    PerRepetition,
    /// (frequency, intensity, repetition, sample): one trace per presentation
    Traces { samples: usize },
}

impl DatasetShape {
    /// Shape for a rank, with `extra_dim` overriding the trace length
    pub fn from_rank(
        rank: usize,
        extra_dim: Option<usize>,
        axes: &StoreAxes,
    ) -> Result<Self, StoreError> {
        match rank {
            2 => Ok(DatasetShape::Averaged),
            3 => Ok(DatasetShape::PerRepetition),
            4 => Ok(DatasetShape::Traces {
                samples: extra_dim.unwrap_or_else(|| axes.default_trace_len()),
            }),
            rank => Err(StoreError::UnsupportedShape { rank }),
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            DatasetShape::Averaged => 2,
            DatasetShape::PerRepetition => 3,
            DatasetShape::Traces { .. } => 4,
        }
    }

    /// Full dimensions for the given axes
    pub fn dims(&self, axes: &StoreAxes) -> Vec<usize> {
        let nf = axes.frequencies.len();
        let ni = axes.intensities.len();
        match self {
            DatasetShape::Averaged => vec![nf, ni],
            DatasetShape::PerRepetition => vec![nf, ni, axes.repetitions],
            DatasetShape::Traces { samples } => vec![nf, ni, axes.repetitions, *samples],
        }
    }

    /// Values written per presentation
    fn cell_len(&self) -> usize {
        match self {
            DatasetShape::Traces { samples } => *samples,
            _ => 1,
        }
    }
}

/// Address of one presentation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellIndex {
    pub frequency: f64,
    pub intensity: f64,
    pub repetition: usize,
}

impl CellIndex {
    pub fn new(frequency: f64, intensity: f64, repetition: usize) -> Self {
        Self {
            frequency,
            intensity,
            repetition,
        }
    }
}

/// Repetition values of one averaged cell, pre-sized to the repetition count
#[derive(Debug, Clone)]
struct CellAccumulator {
    values: Vec<f64>,
}

impl CellAccumulator {
    fn with_capacity(repetitions: usize) -> Self {
        Self {
            values: Vec::with_capacity(repetitions),
        }
    }

    fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    /// Mean of the folded values; empties the accumulator
    fn take_mean(&mut self) -> f64 {
        let mean = if self.values.is_empty() {
            0.0
        } else {
            self.values.iter().sum::<f64>() / self.values.len() as f64
        };
        self.values.clear();
        mean
    }

    fn pending(&self) -> usize {
        self.values.len()
    }
}

#[derive(Debug, Clone)]
struct Dataset {
    shape: DatasetShape,
    data: Vec<f64>,
    accumulators: Vec<CellAccumulator>,
    trace_info: Vec<Value>,
}

impl Dataset {
    fn new(shape: DatasetShape, axes: &StoreAxes) -> Self {
        let dims = shape.dims(axes);
        let accumulators = match shape {
            DatasetShape::Averaged => (0..dims[0] * dims[1])
                .map(|_| CellAccumulator::with_capacity(axes.repetitions))
                .collect(),
            _ => Vec::new(),
        };
        Self {
            shape,
            data: vec![0.0; dims.iter().product()],
            accumulators,
            trace_info: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct StoreInner {
    axes: StoreAxes,
    attributes: Map<String, Value>,
    datasets: BTreeMap<String, Dataset>,
}

impl StoreInner {
    fn dataset(&self, key: &str) -> Result<&Dataset, StoreError> {
        self.datasets
            .get(key)
            .ok_or_else(|| StoreError::UnknownDataset {
                key: key.to_string(),
            })
    }
}

/// Snapshot formats accepted by [`ResponseStore::export`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
}

impl FromStr for ExportFormat {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            other => Err(StoreError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }
}

/// Thread-safe multi-dimensional response accumulator
#[derive(Debug)]
pub struct ResponseStore {
    name: String,
    inner: Mutex<StoreInner>,
}

impl ResponseStore {
    /// Create an empty store; `name` becomes the export group
    pub fn new(name: &str, axes: StoreAxes) -> Self {
        let mut attributes = Map::new();
        if let Ok(elapsed) = SystemTime::now().duration_since(UNIX_EPOCH) {
            attributes.insert("date".to_string(), json!(elapsed.as_secs()));
        }
        Self {
            name: name.to_string(),
            inner: Mutex::new(StoreInner {
                axes,
                attributes,
                datasets: BTreeMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, StoreError> {
        self.inner.lock().map_err(|_| {
            let err = StoreError::LockPoisoned;
            log_store_error(&err, "lock");
            err
        })
    }

    pub fn axes(&self) -> Result<StoreAxes, StoreError> {
        Ok(self.lock()?.axes.clone())
    }

    /// Set a store-level attribute (calibration reference, rise/fall time, ...)
    pub fn set_attribute(&self, name: &str, value: Value) -> Result<(), StoreError> {
        self.lock()?.attributes.insert(name.to_string(), value);
        Ok(())
    }

    pub fn attribute(&self, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock()?.attributes.get(name).cloned())
    }

    /// Allocate a zeroed dataset of the given rank under `key`
    ///
    /// Rank 4 datasets hold `extra_dim` samples per trace, or half the
    /// stimulus sample count when `extra_dim` is `None`. Re-initializing an
    /// existing key discards its contents.
    pub fn init_data(
        &self,
        key: &str,
        rank: usize,
        extra_dim: Option<usize>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let shape = DatasetShape::from_rank(rank, extra_dim, &inner.axes).inspect_err(|err| {
            log_store_error(err, "init_data");
        })?;
        let dataset = Dataset::new(shape, &inner.axes);
        tracing::debug!(
            "[ResponseStore] Initialized '{}' with dims {:?}",
            key,
            shape.dims(&inner.axes)
        );
        inner.datasets.insert(key.to_string(), dataset);
        Ok(())
    }

    /// Write one presentation's data
    ///
    /// Rank 4 stores `data` as the trace, rank 3 stores its single value.
    /// Rank 2 folds the single value into the cell accumulator and, on the
    /// final repetition, replaces the cell with the mean of everything
    /// folded since the last reduction.
    pub fn put(&self, key: &str, index: CellIndex, data: &[f64]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let result = Self::put_locked(&mut inner, key, index, data);
        if let Err(err) = &result {
            log_store_error(err, "put");
        }
        result
    }

    fn put_locked(
        inner: &mut StoreInner,
        key: &str,
        index: CellIndex,
        data: &[f64],
    ) -> Result<(), StoreError> {
        let fi = inner.axes.frequency_index(index.frequency)?;
        let ii = inner.axes.intensity_index(index.intensity)?;
        let repetitions = inner.axes.repetitions;
        if index.repetition >= repetitions {
            return Err(StoreError::RepetitionOutOfRange {
                rep: index.repetition,
                repetitions,
            });
        }
        let ni = inner.axes.intensities.len();

        let dataset = inner
            .datasets
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownDataset {
                key: key.to_string(),
            })?;

        let cell_len = dataset.shape.cell_len();
        if data.len() != cell_len {
            return Err(StoreError::ShapeMismatch {
                expected: cell_len,
                found: data.len(),
            });
        }

        match dataset.shape {
            DatasetShape::Averaged => {
                let cell = fi * ni + ii;
                let accumulator = &mut dataset.accumulators[cell];
                accumulator.push(data[0]);
                if index.repetition == repetitions - 1 {
                    dataset.data[cell] = accumulator.take_mean();
                }
            }
            DatasetShape::PerRepetition => {
                let offset = (fi * ni + ii) * repetitions + index.repetition;
                dataset.data[offset] = data[0];
            }
            DatasetShape::Traces { samples } => {
                let offset = ((fi * ni + ii) * repetitions + index.repetition) * samples;
                dataset.data[offset..offset + samples].copy_from_slice(data);
            }
        }
        Ok(())
    }

    /// Read stored values
    ///
    /// Without a repetition the whole (frequency, intensity) slab is
    /// returned: one value for rank 2, every repetition for rank 3, every
    /// trace concatenated for rank 4. With a repetition, ranks 3 and 4 return
    /// that presentation only; rank 2 has no repetition axis and ignores it.
    ///
    /// An averaged cell read before its final repetition holds the previous
    /// reduction (or zero), not a partial mean.
    pub fn get(
        &self,
        key: &str,
        frequency: f64,
        intensity: f64,
        repetition: Option<usize>,
    ) -> Result<Vec<f64>, StoreError> {
        let inner = self.lock()?;
        let fi = inner.axes.frequency_index(frequency)?;
        let ii = inner.axes.intensity_index(intensity)?;
        let ni = inner.axes.intensities.len();
        let repetitions = inner.axes.repetitions;
        let dataset = inner.dataset(key)?;

        let cell = fi * ni + ii;
        let values = match (dataset.shape, repetition) {
            (DatasetShape::Averaged, _) => vec![dataset.data[cell]],
            (shape, None) => {
                let slab = repetitions * shape.cell_len();
                dataset.data[cell * slab..(cell + 1) * slab].to_vec()
            }
            (shape, Some(rep)) => {
                if rep >= repetitions {
                    return Err(StoreError::RepetitionOutOfRange { rep, repetitions });
                }
                let len = shape.cell_len();
                let offset = (cell * repetitions + rep) * len;
                dataset.data[offset..offset + len].to_vec()
            }
        };
        Ok(values)
    }

    /// Repetitions folded into an averaged cell since its last reduction
    pub fn pending_repetitions(
        &self,
        key: &str,
        frequency: f64,
        intensity: f64,
    ) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        let fi = inner.axes.frequency_index(frequency)?;
        let ii = inner.axes.intensity_index(intensity)?;
        let ni = inner.axes.intensities.len();
        let dataset = inner.dataset(key)?;
        Ok(dataset
            .accumulators
            .get(fi * ni + ii)
            .map(CellAccumulator::pending)
            .unwrap_or(0))
    }

    /// Dimensions of a dataset
    pub fn shape(&self, key: &str) -> Result<Vec<usize>, StoreError> {
        let inner = self.lock()?;
        let dataset = inner.dataset(key)?;
        Ok(dataset.shape.dims(&inner.axes))
    }

    /// Attach a per-trace metadata document (the stimulus state of a presentation)
    pub fn push_trace_info(&self, key: &str, info: Value) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let dataset = inner
            .datasets
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownDataset {
                key: key.to_string(),
            })?;
        dataset.trace_info.push(info);
        Ok(())
    }

    pub fn trace_info(&self, key: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self.lock()?.dataset(key)?.trace_info.clone())
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.datasets.keys().cloned().collect())
    }

    /// Snapshot every dataset into `path`
    pub fn export<P: AsRef<Path>>(&self, path: P, format: ExportFormat) -> Result<(), StoreError> {
        match format {
            ExportFormat::Json => {
                let mut durable = JsonFileStore::create(path.as_ref());
                let inner = self.lock()?;
                Self::export_locked(&self.name, &inner, &mut durable)?;
                durable.flush().inspect_err(|err| log_store_error(err, "export"))?;
                tracing::info!(
                    "[ResponseStore] Exported {} datasets to {:?}",
                    inner.datasets.len(),
                    path.as_ref()
                );
                Ok(())
            }
        }
    }

    /// Snapshot every dataset into a durable store under this store's group
    pub fn export_to(&self, durable: &mut dyn DurableStore) -> Result<(), StoreError> {
        let inner = self.lock()?;
        Self::export_locked(&self.name, &inner, durable)
    }

    fn export_locked(
        group: &str,
        inner: &StoreInner,
        durable: &mut dyn DurableStore,
    ) -> Result<(), StoreError> {
        durable.init_group(group)?;

        let mut group_meta = inner.attributes.clone();
        group_meta.insert("axes".to_string(), serde_json::to_value(&inner.axes)?);
        durable.set_metadata(group, group_meta)?;

        for (key, dataset) in &inner.datasets {
            let name = format!("{}/{}", group, key);
            durable.init_dataset(&name, &dataset.shape.dims(&inner.axes))?;
            durable.append(&name, &dataset.data)?;

            let mut meta = Map::new();
            meta.insert("shape".to_string(), serde_json::to_value(dataset.shape)?);
            meta.insert("trace_info".to_string(), Value::Array(dataset.trace_info.clone()));
            durable.set_metadata(&name, meta)?;
        }
        Ok(())
    }

    /// Rebuild a store from an exported JSON snapshot
    ///
    /// Pending averaging state is not exported; averaged cells come back with
    /// their last reduced value.
    pub fn load_from_file<P: AsRef<Path>>(path: P, name: &str) -> Result<Self, StoreError> {
        let durable = JsonFileStore::open(path)?;
        Self::load_from(&durable, name)
    }

    /// Rebuild a store from the `name` group of a durable store
    pub fn load_from(durable: &dyn DurableStore, name: &str) -> Result<Self, StoreError> {
        let mut group_meta = durable.metadata(name)?;
        let axes_value = group_meta
            .remove("axes")
            .ok_or_else(|| StoreError::ExportFailed {
                details: format!("group '{}' has no axes", name),
            })?;
        let axes: StoreAxes = serde_json::from_value(axes_value)?;

        let prefix = format!("{}/", name);
        let mut datasets = BTreeMap::new();
        for full in durable.keys() {
            let Some(key) = full.strip_prefix(&prefix) else {
                continue;
            };
            let mut meta = durable.metadata(&full)?;
            let shape: DatasetShape = match meta.remove("shape") {
                Some(value) => serde_json::from_value(value)?,
                None => continue,
            };
            let mut dataset = Dataset::new(shape, &axes);
            let data = durable.get(&full)?;
            if data.len() != dataset.data.len() {
                return Err(StoreError::ShapeMismatch {
                    expected: dataset.data.len(),
                    found: data.len(),
                });
            }
            dataset.data = data;
            if let Some(Value::Array(info)) = meta.remove("trace_info") {
                dataset.trace_info = info;
            }
            datasets.insert(key.to_string(), dataset);
        }

        Ok(Self {
            name: name.to_string(),
            inner: Mutex::new(StoreInner {
                axes,
                attributes: group_meta,
                datasets,
            }),
        })
    }
}
