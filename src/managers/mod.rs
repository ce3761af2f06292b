// Managers Module
//
// Focused managers shared by acquisition runs and their callers.
//
// Each manager handles one specific concern:
// - NotificationHub: named event channels and listener threads
// - CalibrationManager: stashed/active calibration and the epoch token

pub mod broadcast_manager;
pub mod calibration_manager;

pub use broadcast_manager::{AcquisitionEvent, ChannelName, EventReceiver, NotificationHub};
pub use calibration_manager::CalibrationManager;
