//! Quality scoring for deconvolved peak groups.
//!
//! Each candidate is compared against the averagine envelope for its mass
//! (isotope cosine, with a monoisotopic offset search) and against a fitted
//! unimodal charge-intensity profile (charge cosine). Survivors get a QScore,
//! a logistic combination of the fit features trained offline.

use crate::averagine::PrecalculatedAveragine;
use crate::config::DeconvConfig;
use crate::peak_group::PeakGroup;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Logistic-regression weights behind the QScore. The defaults are the
/// published coefficients; override only to apply a retrained model
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct QScoreWeights {
    pub charge_cos: f64,
    pub charge_snr: f64,
    pub cos: f64,
    pub snr: f64,
    pub charge_score: f64,
    pub avg_ppm_error: f64,
    pub intercept: f64,
}

impl Default for QScoreWeights {
    fn default() -> Self {
        Self {
            charge_cos: -1.4105,
            charge_snr: -1.514,
            cos: -2.2335,
            snr: -1.4643,
            charge_score: 0.1329,
            avg_ppm_error: 0.262,
            intercept: 4.3052,
        }
    }
}

impl QScoreWeights {
    /// QScore in (0, 1); higher is better. SNR-type features saturate so a
    /// single huge peak cannot dominate
    pub fn qscore(
        &self,
        charge_cos: f64,
        charge_snr: f64,
        cos: f64,
        snr: f64,
        charge_score: f64,
        avg_ppm_error: f64,
    ) -> f64 {
        let score = self.charge_cos * (charge_cos + 1.0).log2()
            + self.charge_snr * (1.0 + charge_snr / (1.0 + charge_snr)).log2()
            + self.cos * (cos + 1.0).log2()
            + self.snr * (1.0 + snr / (1.0 + snr)).log2()
            + self.charge_score * (charge_score + 1.0).log2()
            + self.avg_ppm_error * avg_ppm_error
            + self.intercept;
        1.0 / (1.0 + score.exp())
    }
}

/// Plain cosine between two non-negative vectors; 0 when either has no norm
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for i in 0..n {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    norm_a += a[n..].iter().map(|x| x * x).sum::<f64>();
    norm_b += b[n..].iter().map(|x| x * x).sum::<f64>();
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b).sqrt()
}

/// Cosine between an observed isotope distribution and the theoretical
/// envelope, allowing the monoisotopic assignment to slide by up to
/// `max_offset` isotopes in either direction. Returns the best cosine and
/// the offset achieving it; positive offset means the true monoisotopic
/// peak sits above the current assignment
pub fn isotope_cosine_with_offset(
    observed: &[f32],
    theoretical: &[f64],
    max_offset: i32,
) -> (f64, i32) {
    let obs: Vec<f64> = observed.iter().map(|&x| x as f64).collect();
    let mut best = (0.0f64, 0i32);
    for offset in -max_offset..=max_offset {
        let mut dot = 0.0;
        let mut norm_o = 0.0;
        for (k, &o) in obs.iter().enumerate() {
            norm_o += o * o;
            let j = k as i32 - offset;
            if j >= 0 && (j as usize) < theoretical.len() {
                dot += o * theoretical[j as usize];
            }
        }
        let norm_t: f64 = theoretical.iter().map(|x| x * x).sum();
        if norm_o <= 0.0 || norm_t <= 0.0 {
            continue;
        }
        let cos = dot / (norm_o * norm_t).sqrt();
        if cos > best.0 {
            best = (cos, offset);
        }
    }
    best
}

/// How well the per-charge intensity profile matches a unimodal (gaussian)
/// shape. A profile concentrated in one smooth hump scores near 1; comb-like
/// or flat profiles score low
pub fn charge_fit_score(per_charge: &[f32]) -> f64 {
    let profile: Vec<f64> = per_charge.iter().map(|&x| x as f64).collect();
    let total: f64 = profile.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let nonzero = profile.iter().filter(|&&x| x > 0.0).count();
    if nonzero == 1 {
        return 1.0;
    }
    // moment-matched gaussian centered on the intensity centroid
    let mean: f64 = profile
        .iter()
        .enumerate()
        .map(|(i, &x)| i as f64 * x)
        .sum::<f64>()
        / total;
    let var: f64 = profile
        .iter()
        .enumerate()
        .map(|(i, &x)| (i as f64 - mean).powi(2) * x)
        .sum::<f64>()
        / total;
    let sigma = var.sqrt().max(1e-3);
    let fitted: Vec<f64> = (0..profile.len())
        .map(|i| (-((i as f64 - mean).powi(2)) / (2.0 * sigma * sigma)).exp())
        .collect();
    cosine(&profile, &fitted)
}

/// Score candidates against the averagine model and the config thresholds.
/// Candidates below the isotope-cosine or charge-cosine minima are dropped;
/// survivors come back with corrected monoisotopic masses, cosines, average
/// mass and QScore filled in
pub fn score_peak_groups(
    candidates: Vec<PeakGroup>,
    avg: &PrecalculatedAveragine,
    config: &DeconvConfig,
) -> Vec<PeakGroup> {
    candidates
        .into_par_iter()
        .filter_map(|mut pg| {
            let level = pg.ms_level;
            let pattern = avg.pattern(pg.monoisotopic_mass);
            let max_offset = avg.left_count(pg.monoisotopic_mass).max(2) as i32;
            let (cos, offset) =
                isotope_cosine_with_offset(pg.per_isotope_intensity(), pattern, max_offset);
            if cos < config.min_isotope_cosine(level) {
                return None;
            }
            pg.apply_isotope_offset(offset);
            pg.isotope_cosine = cos;
            pg.average_mass = pg.monoisotopic_mass + avg.average_mass_delta(pg.monoisotopic_mass);

            pg.charge_cosine = charge_fit_score(pg.per_charge_intensity());
            // single-charge MS2 groups carry no charge profile to judge
            if level == 1 && pg.charge_cosine < config.min_charge_cosine {
                return None;
            }

            let rep = pg.representative_charge;
            let rep_isotopes = pg.charge_isotope_intensity(rep);
            let (charge_cos, _) = isotope_cosine_with_offset(&rep_isotopes, pattern, 0);
            pg.qscore = config.qscore_weights.qscore(
                charge_cos,
                pg.charge_snr(rep),
                pg.isotope_cosine,
                pg.snr(),
                pg.charge_cosine,
                pg.avg_ppm_error,
            );
            Some(pg)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cosine_basics() {
        assert!((cosine(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-12);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[], &[]), 0.0);
        // length mismatch penalizes through the longer vector's norm
        let c = cosine(&[1.0], &[1.0, 1.0]);
        assert!(c > 0.0 && c < 1.0);
    }

    #[test]
    fn offset_search_finds_shift() {
        let theo = [0.2, 1.0, 0.7, 0.3, 0.1];
        // observation missing the monoisotopic peak, shifted down one slot
        let obs: Vec<f32> = [1.0, 0.7, 0.3, 0.1, 0.0]
            .iter()
            .map(|&x| x as f32)
            .collect();
        let (cos, offset) = isotope_cosine_with_offset(&obs, &theo, 2);
        assert_eq!(offset, -1);
        assert!(cos > 0.99);
    }

    #[test]
    fn cosine_is_pure() {
        let theo = [0.2, 1.0, 0.7, 0.3];
        let obs: Vec<f32> = [0.1, 0.9, 0.8, 0.2].to_vec();
        let first = isotope_cosine_with_offset(&obs, &theo, 2);
        let second = isotope_cosine_with_offset(&obs, &theo, 2);
        assert_eq!(first, second);
    }

    #[test]
    fn offset_zero_for_aligned() {
        let theo = [0.2, 1.0, 0.7, 0.3];
        let obs: Vec<f32> = theo.iter().map(|&x| x as f32).collect();
        let (cos, offset) = isotope_cosine_with_offset(&obs, &theo, 2);
        assert_eq!(offset, 0);
        assert!((cos - 1.0).abs() < 1e-9);
    }

    #[test]
    fn charge_fit_prefers_unimodal() {
        let smooth = [0.1f32, 0.5, 1.0, 0.5, 0.1];
        let comb = [1.0f32, 0.0, 1.0, 0.0, 1.0];
        assert!(charge_fit_score(&smooth) > charge_fit_score(&comb));
        assert_eq!(charge_fit_score(&[0.0f32; 4]), 0.0);
        assert_eq!(charge_fit_score(&[0.0f32, 3.0, 0.0]), 1.0);
    }

    #[test]
    fn qscore_monotonic_in_cosine() {
        let w = QScoreWeights::default();
        let good = w.qscore(0.99, 10.0, 0.99, 10.0, 0.9, 2.0);
        let bad = w.qscore(0.2, 0.5, 0.2, 0.5, 0.1, 8.0);
        assert!(good > bad);
        assert!((0.0..=1.0).contains(&good));
        assert!((0.0..=1.0).contains(&bad));
    }
}
