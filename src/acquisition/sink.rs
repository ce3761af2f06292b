//! Destinations of collected responses.
//!
//! The run thread hands every successful presentation to one
//! [`ResponseSink`]. Protocol runs write into a [`ResponseStore`], broadband
//! calibration runs fill a [`CalibrationDataset`], tone-curve runs reduce
//! each response as it arrives and publish the intermediate results.

use std::sync::Arc;

use serde_json::json;

use crate::analysis::SpectrumAnalyzer;
use crate::calibration::{CalibrationDataset, ToneCurveDataset};
use crate::error::AcquisitionError;
use crate::managers::{AcquisitionEvent, NotificationHub};
use crate::store::{CellIndex, ResponseStore};

use super::{Presentation, RunReport};

/// Consumer of collected responses, owned by the run thread
pub trait ResponseSink: Send + 'static {
    /// Take one presentation's response
    ///
    /// An error aborts the run and is returned from `RunHandle::join`.
    fn accept(
        &mut self,
        presentation: &Presentation,
        stimulus: &Arc<Vec<f64>>,
        response: &[f64],
        hub: &NotificationHub,
    ) -> Result<(), AcquisitionError>;

    /// Called once after the last presentation of a run that was not aborted
    fn finish(&mut self, _report: &RunReport) -> Result<(), AcquisitionError> {
        Ok(())
    }
}

/// Writes traces into a rank 4 dataset of a response store
pub struct ProtocolSink {
    store: Arc<ResponseStore>,
    key: String,
}

impl ProtocolSink {
    pub fn new(store: Arc<ResponseStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
        }
    }

    pub fn store(&self) -> &Arc<ResponseStore> {
        &self.store
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl ResponseSink for ProtocolSink {
    fn accept(
        &mut self,
        presentation: &Presentation,
        _stimulus: &Arc<Vec<f64>>,
        response: &[f64],
        _hub: &NotificationHub,
    ) -> Result<(), AcquisitionError> {
        let index = CellIndex::new(
            presentation.frequency(),
            presentation.intensity(),
            presentation.repetition,
        );
        self.store.put(&self.key, index, response)?;

        let mut info = presentation.component.state_dict()?;
        if let Some(doc) = info.as_object_mut() {
            doc.insert("repetition".to_string(), json!(presentation.repetition));
        }
        self.store.push_trace_info(&self.key, info)?;
        Ok(())
    }

    fn finish(&mut self, report: &RunReport) -> Result<(), AcquisitionError> {
        self.store
            .set_attribute("completed_presentations", json!(report.completed))?;
        Ok(())
    }
}

/// Collects raw responses of a broadband calibration run
pub struct BroadbandSink {
    dataset: CalibrationDataset,
    stimulus: Option<Arc<Vec<f64>>>,
}

impl BroadbandSink {
    pub fn new(dataset: CalibrationDataset) -> Self {
        Self {
            dataset,
            stimulus: None,
        }
    }

    pub fn dataset(&self) -> &CalibrationDataset {
        &self.dataset
    }

    /// Last buffer played, needed as the reference spectrum
    pub fn stimulus(&self) -> Option<&[f64]> {
        self.stimulus.as_ref().map(|s| s.as_slice())
    }

    pub fn into_parts(self) -> (CalibrationDataset, Option<Arc<Vec<f64>>>) {
        (self.dataset, self.stimulus)
    }
}

impl ResponseSink for BroadbandSink {
    fn accept(
        &mut self,
        _presentation: &Presentation,
        stimulus: &Arc<Vec<f64>>,
        response: &[f64],
        _hub: &NotificationHub,
    ) -> Result<(), AcquisitionError> {
        self.stimulus = Some(Arc::clone(stimulus));
        self.dataset.push(response.to_vec());
        Ok(())
    }
}

/// Reduces tone-curve responses as they arrive
pub struct ToneCurveSink {
    dataset: ToneCurveDataset,
    analyzer: SpectrumAnalyzer,
    response_rate: f64,
}

impl ToneCurveSink {
    pub fn new(dataset: ToneCurveDataset, response_rate: f64) -> Self {
        Self {
            dataset,
            analyzer: SpectrumAnalyzer::new(),
            response_rate,
        }
    }

    pub fn dataset(&self) -> &ToneCurveDataset {
        &self.dataset
    }

    pub fn into_dataset(self) -> ToneCurveDataset {
        self.dataset
    }
}

impl ResponseSink for ToneCurveSink {
    fn accept(
        &mut self,
        presentation: &Presentation,
        _stimulus: &Arc<Vec<f64>>,
        response: &[f64],
        hub: &NotificationHub,
    ) -> Result<(), AcquisitionError> {
        let (measurement, averaged) = self.dataset.record(
            &self.analyzer,
            presentation.frequency(),
            presentation.intensity(),
            presentation.repetition,
            response,
            self.response_rate,
        );

        hub.publish(AcquisitionEvent::CalibrationResponseCollected {
            spectrum: Arc::new(measurement.spectrum),
            frequency: measurement.frequency,
            vamp: measurement.vamp,
        });
        if let Some(point) = averaged {
            hub.publish(AcquisitionEvent::AverageResponse {
                frequency: point.frequency,
                intensity: point.intensity,
                result_db: point.result_db,
            });
        }
        Ok(())
    }
}
