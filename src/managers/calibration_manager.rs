// CalibrationManager: holds the calibration applied to generated stimuli
//
// Single Responsibility: stashed/active calibration records and the epoch token

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::calibration::CalibrationRecord;
use crate::error::{log_calibration_error, CalibrationError};
use crate::stimulus::{CalibrationEpoch, SynthesisContext};

#[derive(Debug, Default)]
struct CalibrationSlot {
    stashed: Option<CalibrationRecord>,
    active: Option<CalibrationRecord>,
    epoch: CalibrationEpoch,
}

/// Manages the calibration used when synthesizing stimuli
///
/// A freshly computed record is first stashed. Applying it makes it the
/// active calibration; every change of the active record bumps the
/// calibration epoch so cached stimulus buffers are regenerated.
///
/// # Example
/// ```ignore
/// let manager = CalibrationManager::new();
/// manager.stash(record)?;
/// manager.apply(true)?;
/// let ctx = manager.synthesis_context(500_000.0, 0.0, 100.0, 0.1)?;
/// ```
#[derive(Debug, Default)]
pub struct CalibrationManager {
    slot: Arc<RwLock<CalibrationSlot>>,
}

impl CalibrationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `record` for a later `apply(true)`
    pub fn stash(&self, record: CalibrationRecord) -> Result<(), CalibrationError> {
        let mut slot = self.write_slot().inspect_err(|err| {
            log_calibration_error(err, "stash_calibration");
        })?;
        slot.stashed = Some(record);
        Ok(())
    }

    pub fn stashed(&self) -> Result<Option<CalibrationRecord>, CalibrationError> {
        Ok(self.read_slot()?.stashed.clone())
    }

    /// Switch the stashed calibration on or off
    ///
    /// # Errors
    /// - `InsufficientData` when enabling with nothing stashed
    /// - `Mismatch` when calf lies outside the stashed record's range
    /// - Lock poisoning on calibration state
    pub fn apply(&self, enabled: bool) -> Result<CalibrationEpoch, CalibrationError> {
        let mut slot = self.write_slot()?;

        if enabled {
            let record = slot
                .stashed
                .clone()
                .ok_or_else(|| CalibrationError::InsufficientData {
                    reason: "no calibration has been stashed".to_string(),
                })
                .and_then(|record| record.check_applicable().map(|()| record))
                .inspect_err(|err| log_calibration_error(err, "apply_calibration"))?;
            slot.active = Some(record);
        } else {
            slot.active = None;
        }

        slot.epoch = slot.epoch.next();
        tracing::info!(
            "[CalibrationManager] Calibration {} (epoch {})",
            if enabled { "applied" } else { "disabled" },
            slot.epoch.value()
        );
        Ok(slot.epoch)
    }

    /// Drop both stashed and active records
    pub fn clear(&self) -> Result<CalibrationEpoch, CalibrationError> {
        let mut slot = self.write_slot()?;
        slot.stashed = None;
        if slot.active.take().is_some() {
            slot.epoch = slot.epoch.next();
        }
        Ok(slot.epoch)
    }

    /// Clone of the active record
    pub fn active(&self) -> Result<Option<CalibrationRecord>, CalibrationError> {
        Ok(self.read_slot()?.active.clone())
    }

    pub fn epoch(&self) -> Result<CalibrationEpoch, CalibrationError> {
        Ok(self.read_slot()?.epoch)
    }

    /// Synthesis context tagged with the current epoch
    pub fn synthesis_context(
        &self,
        sample_rate: f64,
        attenuation: f64,
        caldb: f64,
        calv: f64,
    ) -> Result<SynthesisContext, CalibrationError> {
        Ok(SynthesisContext::new(sample_rate)
            .with_reference(caldb, calv)
            .with_attenuation(attenuation)
            .with_epoch(self.epoch()?))
    }

    // ========================================================================
    // HELPER METHODS - Lock management
    // ========================================================================

    fn read_slot(&self) -> Result<RwLockReadGuard<'_, CalibrationSlot>, CalibrationError> {
        self.slot.read().map_err(|_| CalibrationError::StatePoisoned)
    }

    fn write_slot(&self) -> Result<RwLockWriteGuard<'_, CalibrationSlot>, CalibrationError> {
        self.slot.write().map_err(|_| CalibrationError::StatePoisoned)
    }
}
