//! A deconvolved mass hypothesis: the set of raw peaks explained by one
//! neutral mass across several charge states.

use crate::mass::ISOTOPE_DA;
use crate::spectrum::{cmp_log_mz, LogMzPeak};
use serde::Serialize;

/// One candidate deconvolved mass, owning its constituent peaks (each tagged
/// with charge and isotope index) and the scores derived from them
#[derive(Clone, Debug, Serialize)]
pub struct PeakGroup {
    pub peaks: Vec<LogMzPeak>,
    /// Scan the group was detected in (back-reference, not ownership)
    pub scan_number: usize,
    pub rt: f64,
    pub ms_level: u8,
    pub monoisotopic_mass: f64,
    pub average_mass: f64,
    /// Summed intensity of all member peaks
    pub intensity: f32,
    pub min_abs_charge: i32,
    pub max_abs_charge: i32,
    /// Charge with the greatest summed intensity
    pub representative_charge: i32,
    /// Cosine between observed and averagine isotope envelopes
    pub isotope_cosine: f64,
    /// Cosine between the per-charge intensity profile and a fitted
    /// unimodal reference
    pub charge_cosine: f64,
    pub qscore: f64,
    /// Target-decoy q-value, set by FDR estimation when requested
    pub qvalue: Option<f64>,
    /// True for decoy hypotheses generated during FDR estimation
    pub decoy: bool,
    pub avg_ppm_error: f64,

    // Accumulators sized from the config charge range / averagine isotope
    // count, filled during candidate construction and consumed by scoring
    // and tracing
    #[serde(skip)]
    pub(crate) min_charge: i32,
    #[serde(skip)]
    pub(crate) per_charge_intensity: Vec<f32>,
    #[serde(skip)]
    pub(crate) per_isotope_intensity: Vec<f32>,
    #[serde(skip)]
    pub(crate) per_charge_signal_power: Vec<f64>,
    #[serde(skip)]
    pub(crate) per_charge_noise_power: Vec<f64>,
}

impl PeakGroup {
    pub(crate) fn new(
        scan_number: usize,
        rt: f64,
        ms_level: u8,
        min_charge: i32,
        charge_range: usize,
        isotope_range: usize,
    ) -> Self {
        Self {
            peaks: Vec::new(),
            scan_number,
            rt,
            ms_level,
            monoisotopic_mass: 0.0,
            average_mass: 0.0,
            intensity: 0.0,
            min_abs_charge: 0,
            max_abs_charge: 0,
            representative_charge: 0,
            isotope_cosine: 0.0,
            charge_cosine: 0.0,
            qscore: 0.0,
            qvalue: None,
            decoy: false,
            avg_ppm_error: 0.0,
            min_charge,
            per_charge_intensity: vec![0.0; charge_range],
            per_isotope_intensity: vec![0.0; isotope_range],
            per_charge_signal_power: vec![0.0; charge_range],
            per_charge_noise_power: vec![0.0; charge_range],
        }
    }

    pub(crate) fn add_peak(&mut self, peak: LogMzPeak) {
        let c = (peak.abs_charge - self.min_charge) as usize;
        self.per_charge_intensity[c] += peak.intensity;
        self.per_charge_signal_power[c] += (peak.intensity as f64).powi(2);
        if (peak.isotope_index as usize) < self.per_isotope_intensity.len() {
            self.per_isotope_intensity[peak.isotope_index as usize] += peak.intensity;
        }
        self.peaks.push(peak);
    }

    pub(crate) fn add_noise(&mut self, abs_charge: i32, intensity: f32) {
        let c = (abs_charge - self.min_charge) as usize;
        self.per_charge_noise_power[c] += (intensity as f64).powi(2);
    }

    /// Derive the scalar fields from the accumulated peaks. The monoisotopic
    /// mass is the intensity-weighted mean of each peak's implied
    /// monoisotopic mass
    pub(crate) fn finalize(&mut self, positive: bool) {
        self.peaks.sort_unstable_by(cmp_log_mz);
        let mut weighted = 0.0;
        let mut total = 0.0f64;
        let mut min_c = i32::MAX;
        let mut max_c = i32::MIN;
        for p in &self.peaks {
            let mono = p.uncharged_mass(positive) - p.isotope_index as f64 * ISOTOPE_DA;
            weighted += mono * p.intensity as f64;
            total += p.intensity as f64;
            min_c = min_c.min(p.abs_charge);
            max_c = max_c.max(p.abs_charge);
        }
        if total > 0.0 {
            self.monoisotopic_mass = weighted / total;
        }
        self.intensity = total as f32;
        self.min_abs_charge = min_c;
        self.max_abs_charge = max_c;
        let rep = self
            .per_charge_intensity
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i as i32 + self.min_charge)
            .unwrap_or(0);
        self.representative_charge = rep;
    }

    /// Shift the monoisotopic assignment by `offset` isotopes, reindexing
    /// member peaks; applied when the isotope-cosine offset search finds a
    /// better apex alignment
    pub(crate) fn apply_isotope_offset(&mut self, offset: i32) {
        if offset == 0 {
            return;
        }
        self.monoisotopic_mass += offset as f64 * ISOTOPE_DA;
        for p in self.peaks.iter_mut() {
            p.isotope_index -= offset;
        }
        let len = self.per_isotope_intensity.len();
        let mut shifted = vec![0.0; len];
        for (k, &v) in self.per_isotope_intensity.iter().enumerate() {
            let j = k as i32 - offset;
            if (0..len as i32).contains(&j) {
                shifted[j as usize] = v;
            }
        }
        self.per_isotope_intensity = shifted;
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn per_charge_intensity(&self) -> &[f32] {
        &self.per_charge_intensity
    }

    pub fn per_isotope_intensity(&self) -> &[f32] {
        &self.per_isotope_intensity
    }

    /// Signal-to-noise for one charge: matched signal power over unmatched
    /// power in the same m/z windows
    pub fn charge_snr(&self, abs_charge: i32) -> f64 {
        let c = (abs_charge - self.min_charge) as usize;
        if c >= self.per_charge_signal_power.len() {
            return 0.0;
        }
        let signal = self.per_charge_signal_power[c];
        let noise = self.per_charge_noise_power[c];
        if noise <= 0.0 {
            if signal > 0.0 {
                signal
            } else {
                0.0
            }
        } else {
            signal / noise
        }
    }

    /// Overall signal-to-noise across all charges
    pub fn snr(&self) -> f64 {
        let signal: f64 = self.per_charge_signal_power.iter().sum();
        let noise: f64 = self.per_charge_noise_power.iter().sum();
        if noise <= 0.0 {
            if signal > 0.0 {
                signal
            } else {
                0.0
            }
        } else {
            signal / noise
        }
    }

    /// Per-isotope intensities restricted to one charge state
    pub fn charge_isotope_intensity(&self, abs_charge: i32) -> Vec<f32> {
        let mut out = vec![0.0; self.per_isotope_intensity.len()];
        for p in &self.peaks {
            if p.abs_charge == abs_charge && (p.isotope_index as usize) < out.len() {
                out[p.isotope_index as usize] += p.intensity;
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mass::PROTON;

    fn peak(mz: f64, intensity: f32, charge: i32, iso: i32) -> LogMzPeak {
        let mut p = LogMzPeak::new(mz, intensity, true);
        p.abs_charge = charge;
        p.isotope_index = iso;
        p
    }

    #[test]
    fn finalize_weighted_mono() {
        let mass = 5000.0;
        let mut pg = PeakGroup::new(1, 10.0, 1, 1, 10, 8);
        for (c, iso) in [(5, 0), (5, 1), (6, 0)] {
            let mz = (mass + iso as f64 * ISOTOPE_DA) / c as f64 + PROTON;
            pg.add_peak(peak(mz, 10.0, c, iso));
        }
        pg.finalize(true);
        assert!((pg.monoisotopic_mass - mass).abs() < 1e-6);
        assert_eq!(pg.min_abs_charge, 5);
        assert_eq!(pg.max_abs_charge, 6);
        assert_eq!(pg.representative_charge, 5);
        assert!((pg.intensity - 30.0).abs() < 1e-6);
    }

    #[test]
    fn isotope_offset_shifts_mass_and_indices() {
        let mass = 5000.0;
        let mut pg = PeakGroup::new(1, 10.0, 1, 1, 10, 8);
        let mz = (mass + 2.0 * ISOTOPE_DA) / 5.0 + PROTON;
        pg.add_peak(peak(mz, 10.0, 5, 2));
        pg.finalize(true);
        let before = pg.monoisotopic_mass;
        pg.apply_isotope_offset(1);
        assert!((pg.monoisotopic_mass - before - ISOTOPE_DA).abs() < 1e-9);
        assert_eq!(pg.peaks[0].isotope_index, 1);
        assert!(pg.per_isotope_intensity[1] > 0.0);
        assert_eq!(pg.per_isotope_intensity[2], 0.0);
    }

    #[test]
    fn snr_guards() {
        let mut pg = PeakGroup::new(1, 0.0, 1, 1, 4, 4);
        assert_eq!(pg.snr(), 0.0);
        pg.add_peak(peak(500.0, 2.0, 2, 0));
        assert!(pg.snr() > 0.0);
        pg.add_noise(2, 1.0);
        assert!((pg.charge_snr(2) - 4.0).abs() < 1e-9);
    }
}
