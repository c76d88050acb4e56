//! The spectrum abstraction consumed by the core, and the log-m/z peak
//! representation the binned search runs on.

use crate::mass::{charge_carrier_mass, log_mz};
use serde::Serialize;

#[derive(Default, Debug, Copy, Clone, Serialize)]
pub struct Precursor {
    pub mz: f64,
    pub intensity: Option<f32>,
    pub charge: Option<i32>,
}

/// A centroided spectrum. Immutable once handed to the core
#[derive(Clone, Debug, Serialize)]
pub struct Spectrum {
    pub scan_number: usize,
    /// Retention time in seconds
    pub rt: f64,
    /// MSn level (1 = precursor scan)
    pub ms_level: u8,
    /// m/z values, ascending
    pub mz: Vec<f64>,
    pub intensity: Vec<f32>,
    /// Selected ion, for `ms_level > 1`
    pub precursor: Option<Precursor>,
}

impl Spectrum {
    /// Peaks are sorted by m/z on construction so the engine can rely on
    /// ordered binary search
    pub fn new(
        scan_number: usize,
        rt: f64,
        ms_level: u8,
        mut mz: Vec<f64>,
        mut intensity: Vec<f32>,
        precursor: Option<Precursor>,
    ) -> Self {
        assert_eq!(mz.len(), intensity.len(), "mz/intensity length mismatch");
        let mut idx = (0..mz.len()).collect::<Vec<_>>();
        idx.sort_unstable_by(|&a, &b| mz[a].total_cmp(&mz[b]));
        if idx.windows(2).any(|w| w[0] > w[1]) {
            mz = idx.iter().map(|&i| mz[i]).collect();
            intensity = idx.iter().map(|&i| intensity[i]).collect();
        }
        Self {
            scan_number,
            rt,
            ms_level,
            mz,
            intensity,
            precursor,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }
}

/// A raw peak lifted into log-m/z space, tagged during deconvolution with
/// its assigned charge and isotope index
#[derive(Debug, Copy, Clone, Serialize)]
pub struct LogMzPeak {
    pub mz: f64,
    pub intensity: f32,
    pub log_mz: f64,
    /// Assigned absolute charge, 0 while unassigned
    pub abs_charge: i32,
    /// Position within the isotope envelope, relative to monoisotopic
    pub isotope_index: i32,
}

impl LogMzPeak {
    pub fn new(mz: f64, intensity: f32, positive: bool) -> Self {
        Self {
            mz,
            intensity,
            log_mz: log_mz(mz, positive),
            abs_charge: 0,
            isotope_index: 0,
        }
    }

    /// Neutral mass implied by the assigned charge, 0 if unassigned
    pub fn uncharged_mass(&self, positive: bool) -> f64 {
        if self.abs_charge == 0 {
            return 0.0;
        }
        (self.mz - charge_carrier_mass(positive)) * self.abs_charge as f64
    }
}

/// Ordering: primarily by log m/z, ties broken by intensity
pub fn cmp_log_mz(a: &LogMzPeak, b: &LogMzPeak) -> std::cmp::Ordering {
    a.log_mz
        .total_cmp(&b.log_mz)
        .then(a.intensity.total_cmp(&b.intensity))
}

/// Transform a spectrum into a sorted log-m/z peak list. Peaks that cannot
/// be log-transformed (at or below the charge-carrier mass) or carry no
/// intensity are dropped
pub fn log_mz_peaks(spectrum: &Spectrum, positive: bool) -> Vec<LogMzPeak> {
    let carrier = charge_carrier_mass(positive);
    let mut peaks = spectrum
        .mz
        .iter()
        .zip(spectrum.intensity.iter())
        .filter(|&(mz, int)| *mz > carrier && *int > 0.0)
        .map(|(&mz, &int)| LogMzPeak::new(mz, int, positive))
        .collect::<Vec<_>>();
    peaks.sort_unstable_by(cmp_log_mz);
    peaks
}

/// Binary search, locating the region of a sorted slice where
/// `key(item)` falls within `[low, high]`. Returns `(left, right)` such that
/// all matching items are inside `slice[left..right]`
pub fn binary_search_slice<T, F>(slice: &[T], key: F, low: f64, high: f64) -> (usize, usize)
where
    F: Fn(&T) -> f64,
{
    let left = slice.partition_point(|item| key(item) < low);
    let right = left + slice[left..].partition_point(|item| key(item) <= high);
    (left, right)
}
