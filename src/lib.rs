//! Charge deconvolution of top-down mass spectra.
//!
//! Centroided spectra go in; neutral-mass peak groups and chromatographic
//! mass features come out. The search runs in binned natural-log m/z space,
//! where every charge state of a mass lands at a fixed offset, scores
//! candidates against an averagine isotope model, and optionally estimates
//! false discovery rates with engine-generated decoys.
//!
//! ```no_run
//! use ripple::{
//!     AveragineType, DeconvConfigBuilder, IsotopeGenerator, PrecalculatedAveragine,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeconvConfigBuilder::default().build()?;
//! let generator = IsotopeGenerator::new(config.max_mass);
//! let averagine = PrecalculatedAveragine::build(
//!     config.min_mass,
//!     config.max_mass,
//!     20.0,
//!     &generator,
//!     AveragineType::Peptide,
//! )?;
//! let spectra = Vec::new();
//! let groups = ripple::deconvolve_run(&spectra, &averagine, &config);
//! # let _ = groups;
//! # Ok(())
//! # }
//! ```

pub mod averagine;
pub mod config;
pub mod engine;
pub mod fdr;
pub mod mass;
pub mod peak_group;
pub mod scoring;
pub mod spectrum;
pub mod trace;

pub use averagine::{AveragineError, AveragineType, IsotopeGenerator, PrecalculatedAveragine};
pub use config::{ConfigError, DeconvConfig, DeconvConfigBuilder, TraceConfig};
pub use engine::{deconvolve_spectrum, DeconvMode, EngineState, MassExclusion};
pub use fdr::{assign_qvalues, estimate_fdr, generate_decoys};
pub use mass::{Tolerance, ISOTOPE_DA, PROTON};
pub use peak_group::PeakGroup;
pub use scoring::QScoreWeights;
pub use spectrum::{LogMzPeak, Precursor, Spectrum};
pub use trace::{trace_features, Feature};

use fnv::FnvHashMap;

/// How many preceding spectra of one MS level share mass-bin evidence.
/// Derived from the RT carry-over window and the observed scan spacing at
/// that level, with a floor of one scan
fn overlapped_scans(spectra: &[Spectrum], ms_level: u8, rt_window: f64) -> usize {
    if rt_window <= 0.0 {
        return 1;
    }
    let rts: Vec<f64> = spectra
        .iter()
        .filter(|s| s.ms_level == ms_level)
        .map(|s| s.rt)
        .collect();
    if rts.len() < 2 {
        return 1;
    }
    let span = rts[rts.len() - 1] - rts[0];
    if span <= 0.0 {
        return 1;
    }
    let rt_delta = span / (rts.len() - 1) as f64;
    ((rt_window / rt_delta).round() as usize).max(1)
}

/// Deconvolve an ordered run of spectra, threading one [`EngineState`] per
/// MS level so overlapping scans reinforce each other. Spectra must be in
/// acquisition (RT) order
pub fn deconvolve_run(
    spectra: &[Spectrum],
    avg: &PrecalculatedAveragine,
    config: &DeconvConfig,
) -> Vec<PeakGroup> {
    let mut states: FnvHashMap<u8, EngineState> = FnvHashMap::default();
    let mut groups = Vec::new();
    for spectrum in spectra {
        let state = states.entry(spectrum.ms_level).or_insert_with(|| {
            let n = config.num_overlapped_scans.unwrap_or_else(|| {
                overlapped_scans(spectra, spectrum.ms_level, config.rt_window_seconds)
            });
            log::debug!(
                "MS{}: carrying mass bins across {} overlapped scans",
                spectrum.ms_level,
                n
            );
            EngineState::new(spectrum.ms_level, n)
        });
        groups.extend(engine::deconvolve_spectrum(spectrum, state, avg, config));
    }
    log::info!(
        "deconvolved {} spectra into {} peak groups",
        spectra.len(),
        groups.len()
    );
    groups
}
