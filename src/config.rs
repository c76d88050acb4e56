//! Deconvolution and feature-tracing parameters.
//!
//! Invalid ranges are rejected at construction time - the engine itself never
//! validates, it trusts a [`DeconvConfig`] that has been through `build()`.

use crate::mass::Tolerance;
use crate::scoring::QScoreWeights;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// `max_charge < min_charge`, or a non-positive charge bound
    ChargeRange { min: i32, max: i32 },
    /// `max_mass <= min_mass`, or a non-positive mass bound
    MassRange { min: f64, max: f64 },
    /// A per-MS-level list was empty
    EmptyPerLevel(&'static str),
    /// A tolerance, cosine or rate parameter outside its valid interval
    OutOfRange {
        param: &'static str,
        value: f64,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ChargeRange { min, max } => {
                write!(f, "invalid charge range: min {} max {}", min, max)
            }
            ConfigError::MassRange { min, max } => {
                write!(f, "invalid mass range: min {} max {}", min, max)
            }
            ConfigError::EmptyPerLevel(param) => {
                write!(f, "per-MS-level parameter `{}` must not be empty", param)
            }
            ConfigError::OutOfRange { param, value } => {
                write!(f, "parameter `{}` out of range: {}", param, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Builder for [`DeconvConfig`]. `None` fields fall back to defaults
/// matching a typical intact-protein MS1/MS2 run.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct DeconvConfigBuilder {
    pub min_charge: Option<i32>,
    pub max_charge: Option<i32>,
    pub min_mass: Option<f64>,
    pub max_mass: Option<f64>,
    /// ppm tolerance per MS level (index 0 = MS1)
    pub ppm_tolerance: Option<Vec<f64>>,
    /// minimum isotope cosine per MS level
    pub min_isotope_cosine: Option<Vec<f64>>,
    /// minimum charge-intensity cosine (applies to MS1 only)
    pub min_charge_cosine: Option<f64>,
    /// minimum number of peaks of continuous charges, per MS level
    pub min_continuous_charge_peak_count: Option<Vec<usize>>,
    pub intensity_threshold: Option<f32>,
    /// keep only the top N masses per spectrum, if set
    pub max_mass_count: Option<usize>,
    /// RT window (seconds) over which mass-bin evidence is carried across scans
    pub rt_window_seconds: Option<f64>,
    /// fixed carry-over depth; overrides the RT-window derivation when set
    pub num_overlapped_scans: Option<usize>,
    pub positive_mode: Option<bool>,
}

impl DeconvConfigBuilder {
    pub fn build(self) -> Result<DeconvConfig, ConfigError> {
        let min_charge = self.min_charge.unwrap_or(1);
        let max_charge = self.max_charge.unwrap_or(100);
        if min_charge < 1 || max_charge < min_charge {
            return Err(ConfigError::ChargeRange {
                min: min_charge,
                max: max_charge,
            });
        }

        let min_mass = self.min_mass.unwrap_or(50.0);
        let max_mass = self.max_mass.unwrap_or(100_000.0);
        if min_mass <= 0.0 || max_mass <= min_mass {
            return Err(ConfigError::MassRange {
                min: min_mass,
                max: max_mass,
            });
        }

        let ppm_tolerance = self.ppm_tolerance.unwrap_or_else(|| vec![10.0, 5.0]);
        if ppm_tolerance.is_empty() {
            return Err(ConfigError::EmptyPerLevel("ppm_tolerance"));
        }
        for &tol in &ppm_tolerance {
            if tol <= 0.0 {
                return Err(ConfigError::OutOfRange {
                    param: "ppm_tolerance",
                    value: tol,
                });
            }
        }

        let min_isotope_cosine = self.min_isotope_cosine.unwrap_or_else(|| vec![0.75, 0.8]);
        if min_isotope_cosine.is_empty() {
            return Err(ConfigError::EmptyPerLevel("min_isotope_cosine"));
        }
        for &cos in &min_isotope_cosine {
            if !(0.0..=1.0).contains(&cos) {
                return Err(ConfigError::OutOfRange {
                    param: "min_isotope_cosine",
                    value: cos,
                });
            }
        }

        let min_charge_cosine = self.min_charge_cosine.unwrap_or(0.5);
        if !(0.0..=1.0).contains(&min_charge_cosine) {
            return Err(ConfigError::OutOfRange {
                param: "min_charge_cosine",
                value: min_charge_cosine,
            });
        }

        let min_continuous_charge_peak_count = self
            .min_continuous_charge_peak_count
            .unwrap_or_else(|| vec![3, 2]);
        if min_continuous_charge_peak_count.is_empty() {
            return Err(ConfigError::EmptyPerLevel("min_continuous_charge_peak_count"));
        }

        let rt_window_seconds = self.rt_window_seconds.unwrap_or(0.0);
        if rt_window_seconds < 0.0 {
            return Err(ConfigError::OutOfRange {
                param: "rt_window_seconds",
                value: rt_window_seconds,
            });
        }

        Ok(DeconvConfig {
            min_charge,
            max_charge,
            min_mass,
            max_mass,
            ppm_tolerance,
            min_isotope_cosine,
            min_charge_cosine,
            min_continuous_charge_peak_count,
            intensity_threshold: self.intensity_threshold.unwrap_or(0.0),
            max_mass_count: self.max_mass_count,
            rt_window_seconds,
            num_overlapped_scans: self.num_overlapped_scans,
            positive_mode: self.positive_mode.unwrap_or(true),
            qscore_weights: QScoreWeights::default(),
        })
    }
}

/// Validated deconvolution parameters. Construct through
/// [`DeconvConfigBuilder::build`]
#[derive(Serialize, Clone, Debug)]
pub struct DeconvConfig {
    pub min_charge: i32,
    pub max_charge: i32,
    pub min_mass: f64,
    pub max_mass: f64,
    pub ppm_tolerance: Vec<f64>,
    pub min_isotope_cosine: Vec<f64>,
    pub min_charge_cosine: f64,
    pub min_continuous_charge_peak_count: Vec<usize>,
    pub intensity_threshold: f32,
    pub max_mass_count: Option<usize>,
    pub rt_window_seconds: f64,
    pub num_overlapped_scans: Option<usize>,
    pub positive_mode: bool,
    pub qscore_weights: QScoreWeights,
}

impl DeconvConfig {
    /// Number of candidate charge states
    pub fn charge_range(&self) -> usize {
        (self.max_charge - self.min_charge + 1) as usize
    }

    /// Per-MS-level lists are indexed by `level - 1`, clamped to the last
    /// entry so MS3+ reuses the MS2 settings
    fn per_level<T: Copy>(list: &[T], ms_level: u8) -> T {
        let idx = (ms_level.max(1) as usize - 1).min(list.len() - 1);
        list[idx]
    }

    /// Tolerance for the given MS level as a mass fraction (10 ppm -> 1e-5)
    pub fn tolerance(&self, ms_level: u8) -> f64 {
        Self::per_level(&self.ppm_tolerance, ms_level) * 1e-6
    }

    /// Log-space bin width for the given MS level: two bins per tolerance
    /// window
    pub fn bin_width(&self, ms_level: u8) -> f64 {
        0.5 / self.tolerance(ms_level)
    }

    /// Peak-matching window for candidate reconstruction. Twice the ppm
    /// tolerance: a candidate mass read off a bin center can sit anywhere
    /// within its log bin
    pub fn match_tolerance(&self, ms_level: u8) -> Tolerance {
        let ppm = Self::per_level(&self.ppm_tolerance, ms_level);
        Tolerance::Ppm(-2.0 * ppm, 2.0 * ppm)
    }

    pub fn min_isotope_cosine(&self, ms_level: u8) -> f64 {
        Self::per_level(&self.min_isotope_cosine, ms_level)
    }

    pub fn min_continuous_charge_peaks(&self, ms_level: u8) -> usize {
        Self::per_level(&self.min_continuous_charge_peak_count, ms_level)
    }
}

/// Parameters for chromatographic mass-trace detection
#[derive(Deserialize, Serialize, Copy, Clone, Debug)]
pub struct TraceConfig {
    /// Mass tolerance for linking peak groups across scans, in ppm.
    /// Conventionally twice the spectral deconvolution tolerance
    pub mass_error_ppm: f64,
    /// Minimum fraction of scans within a trace's span that must contribute
    pub min_sample_rate: f64,
    /// Minimum RT span (seconds) of an accepted trace
    pub min_trace_length_seconds: f64,
    /// Number of consecutive missing scans tolerated before a trace terminates
    pub trace_termination_outliers: usize,
    pub min_isotope_cosine: f64,
    pub min_charge_cosine: f64,
}

impl TraceConfig {
    pub fn new(
        mass_error_ppm: f64,
        min_sample_rate: f64,
        min_trace_length_seconds: f64,
        trace_termination_outliers: usize,
        min_isotope_cosine: f64,
        min_charge_cosine: f64,
    ) -> Result<Self, ConfigError> {
        if mass_error_ppm <= 0.0 {
            return Err(ConfigError::OutOfRange {
                param: "mass_error_ppm",
                value: mass_error_ppm,
            });
        }
        if !(0.0..=1.0).contains(&min_sample_rate) {
            return Err(ConfigError::OutOfRange {
                param: "min_sample_rate",
                value: min_sample_rate,
            });
        }
        if min_trace_length_seconds < 0.0 {
            return Err(ConfigError::OutOfRange {
                param: "min_trace_length_seconds",
                value: min_trace_length_seconds,
            });
        }
        for (param, cos) in [
            ("min_isotope_cosine", min_isotope_cosine),
            ("min_charge_cosine", min_charge_cosine),
        ] {
            if !(0.0..=1.0).contains(&cos) {
                return Err(ConfigError::OutOfRange { param, value: cos });
            }
        }
        Ok(Self {
            mass_error_ppm,
            min_sample_rate,
            min_trace_length_seconds,
            trace_termination_outliers,
            min_isotope_cosine,
            min_charge_cosine,
        })
    }
}
