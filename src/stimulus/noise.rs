//! Shared Gaussian noise sequence
//!
//! Every white-noise stimulus is a prefix of this one sequence, so repeated
//! presentations of the same noise are sample-identical. The generator is
//! seeded, which keeps the sequence identical across process restarts too.

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::StimulusError;

/// Length of the pre-drawn noise sequence in samples
pub const NOISE_SEQUENCE_LEN: usize = 1_500_000;

const NOISE_SEED: u64 = 42;

static NOISE: Lazy<Vec<f64>> = Lazy::new(|| {
    let mut rng = StdRng::seed_from_u64(NOISE_SEED);
    (0..NOISE_SEQUENCE_LEN)
        .map(|_| StandardNormal.sample(&mut rng))
        .collect()
});

/// First `npts` samples of the shared N(0, 1) sequence
pub fn noise_prefix(npts: usize) -> Result<&'static [f64], StimulusError> {
    if npts > NOISE_SEQUENCE_LEN {
        return Err(StimulusError::DurationTooLong {
            requested: npts,
            available: NOISE_SEQUENCE_LEN,
        });
    }
    Ok(&NOISE[..npts])
}
