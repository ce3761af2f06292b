// Analysis module - spectral measurement of played and recorded signals

pub mod spectrum;

pub use spectrum::{
    calc_db, peak, remove_dc, rms, signal_amplitude, smooth, Spectrum, SpectrumAnalyzer,
    MAGNITUDE_FLOOR,
};
