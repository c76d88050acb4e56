//! The binned deconvolution search.
//!
//! Peaks are lifted into log-m/z space and binned at a resolution set by the
//! ppm tolerance. A mass at charge `c` appears at a constant log offset
//! `ln(c)` below its log mass, so projecting every occupied m/z bin through
//! the per-charge offset table (the "universal pattern") votes directly into
//! mass-bin space. Mass bins with enough consecutive-charge support survive
//! harmonic elimination and are reconstructed into peak groups from the raw
//! spectrum.

use crate::averagine::PrecalculatedAveragine;
use crate::config::DeconvConfig;
use crate::mass::{charge_carrier_mass, Tolerance, ISOTOPE_DA};
use crate::peak_group::PeakGroup;
use crate::scoring;
use crate::spectrum::{binary_search_slice, log_mz_peaks, LogMzPeak, Spectrum};
use fnv::{FnvHashMap, FnvHashSet};
use rayon::prelude::*;
use std::collections::VecDeque;

/// Harmonic multiples checked during mass-bin elimination
const HARMONICS: [usize; 2] = [2, 3];

/// Log-space jitter applied to the universal pattern in noise-decoy mode.
/// Irrational in units of ln(charge) so it can never coincide with a true
/// charge or harmonic projection
const NOISE_JITTER: f64 = std::f64::consts::LN_2 / 7.0;

/// Which hypothesis set a deconvolution pass generates. Decoy modes reuse
/// the identical search path with a perturbed universal pattern
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeconvMode {
    Real,
    /// Universal pattern shifted by one charge: peaks assigned charge `c`
    /// are projected as if they carried `c + 1`
    ChargeShiftDecoy,
    /// Universal pattern jittered off every legitimate charge projection
    NoiseDecoy,
}

/// Masses already claimed by accepted real peak groups; decoy passes must
/// not rediscover them
pub struct MassExclusion {
    masses: Vec<f64>,
    tolerance: Tolerance,
}

impl MassExclusion {
    pub fn new(mut masses: Vec<f64>, tolerance: Tolerance) -> Self {
        masses.sort_unstable_by(|a, b| a.total_cmp(b));
        Self { masses, tolerance }
    }

    pub fn contains(&self, mass: f64) -> bool {
        let (low, high) = self.tolerance.bounds(mass);
        let (lo, hi) = binary_search_slice(&self.masses, |m| *m, low, high);
        hi > lo
    }
}

/// Mass bins selected from one spectrum, kept so the next few spectra of the
/// same MS level can union them in before filtering
struct PrevBins {
    bins: Vec<usize>,
    mass_bin_min: f64,
}

/// Cross-spectrum carry-over, threaded explicitly between successive
/// `deconvolve_spectrum` calls for one MS level
pub struct EngineState {
    ms_level: u8,
    capacity: usize,
    prev: VecDeque<PrevBins>,
}

impl EngineState {
    /// `num_overlapped_scans` bounds how many preceding spectra contribute
    /// carried mass bins
    pub fn new(ms_level: u8, num_overlapped_scans: usize) -> Self {
        Self {
            ms_level,
            capacity: num_overlapped_scans,
            prev: VecDeque::with_capacity(num_overlapped_scans + 1),
        }
    }

    pub fn ms_level(&self) -> u8 {
        self.ms_level
    }

    fn push(&mut self, bins: Vec<usize>, mass_bin_min: f64) {
        self.prev.push_back(PrevBins { bins, mass_bin_min });
        while self.prev.len() > self.capacity {
            self.prev.pop_front();
        }
    }
}

/// Deconvolve one spectrum, producing scored peak groups and updating the
/// carried mass-bin state.
///
/// Empty spectra yield an empty list, not an error. Feeding a state built
/// for a different MS level is a contract violation and panics.
pub fn deconvolve_spectrum(
    spectrum: &Spectrum,
    state: &mut EngineState,
    avg: &PrecalculatedAveragine,
    config: &DeconvConfig,
) -> Vec<PeakGroup> {
    deconvolve_with_mode(spectrum, state, avg, config, DeconvMode::Real, None)
}

pub fn deconvolve_with_mode(
    spectrum: &Spectrum,
    state: &mut EngineState,
    avg: &PrecalculatedAveragine,
    config: &DeconvConfig,
    mode: DeconvMode,
    exclusion: Option<&MassExclusion>,
) -> Vec<PeakGroup> {
    assert_eq!(
        state.ms_level, spectrum.ms_level,
        "engine state for MS{} fed a MS{} spectrum",
        state.ms_level, spectrum.ms_level
    );

    let level = spectrum.ms_level;
    let positive = config.positive_mode;
    let peaks = log_mz_peaks(spectrum, positive);
    let bin_width = config.bin_width(level);
    let mass_bin_min = config.min_mass.ln();

    if peaks.is_empty() {
        // age out old carry-over even when nothing was detected
        state.push(Vec::new(), mass_bin_min);
        return Vec::new();
    }

    let mz_bin_min = peaks[0].log_mz;
    let mz_bin_count =
        ((peaks[peaks.len() - 1].log_mz - mz_bin_min) * bin_width).ceil() as usize + 1;
    let mass_bin_count = ((config.max_mass.ln() - mass_bin_min) * bin_width).ceil() as usize + 1;

    // occupied m/z bins with accumulated intensity
    let mut mz_occupied = vec![false; mz_bin_count];
    let mut mz_intensity = vec![0.0f32; mz_bin_count];
    for p in &peaks {
        let bin = (((p.log_mz - mz_bin_min) * bin_width) as usize).min(mz_bin_count - 1);
        mz_occupied[bin] = true;
        mz_intensity[bin] += p.intensity;
    }
    let occupied: Vec<(usize, f32)> = mz_occupied
        .iter()
        .enumerate()
        .filter(|(_, &o)| o)
        .map(|(i, _)| (i, mz_intensity[i]))
        .collect();

    // universal pattern: per-charge bin offset from m/z bin to mass bin
    let charge_range = config.charge_range();
    let offsets: Vec<i64> = (0..charge_range)
        .map(|j| {
            let c = (config.min_charge + j as i32) as f64;
            let log_c = match mode {
                DeconvMode::Real => c.ln(),
                DeconvMode::ChargeShiftDecoy => (c + 1.0).ln(),
                DeconvMode::NoiseDecoy => c.ln() + NOISE_JITTER,
            };
            ((log_c + mz_bin_min - mass_bin_min) * bin_width).round() as i64
        })
        .collect();

    // support pass: project every occupied m/z bin through every charge,
    // recording which charges touched each mass bin as a bitmask
    let words = (charge_range + 63) / 64;
    let mut support = vec![0.0f32; mass_bin_count];
    let mut presence = vec![0u64; mass_bin_count * words];
    for (j, &offset) in offsets.iter().enumerate() {
        let bit = 1u64 << (j % 64);
        let word = j / 64;
        for &(i, intensity) in &occupied {
            let b = i as i64 + offset;
            if b < 0 || b >= mass_bin_count as i64 {
                continue;
            }
            let b = b as usize;
            support[b] += intensity;
            presence[b * words + word] |= bit;
        }
    }

    // Rounding can scatter one mass's charge projections across two adjacent
    // bins, so each bin's run is judged on its own presence OR-ed with its
    // right neighbor's. Duplicate detections collapse in the nominal-mass
    // dedup after reconstruction
    let charge_set = |b: usize, j: usize| -> bool {
        let bit = 1u64 << (j % 64);
        presence[b * words + j / 64] & bit != 0
            || (b + 1 < mass_bin_count && presence[(b + 1) * words + j / 64] & bit != 0)
    };
    let mut max_run = vec![0u16; mass_bin_count];
    let mut min_c = vec![i32::MAX; mass_bin_count];
    let mut max_c = vec![i32::MIN; mass_bin_count];
    for b in 0..mass_bin_count {
        if presence[b * words..(b + 1) * words].iter().all(|&w| w == 0)
            && (b + 1 >= mass_bin_count
                || presence[(b + 1) * words..(b + 2) * words].iter().all(|&w| w == 0))
        {
            continue;
        }
        let mut run = 0u16;
        for j in 0..charge_range {
            if charge_set(b, j) {
                run += 1;
                max_run[b] = max_run[b].max(run);
                let c = config.min_charge + j as i32;
                min_c[b] = min_c[b].min(c);
                max_c[b] = max_c[b].max(c);
            } else {
                run = 0;
            }
        }
    }

    // bins with enough consecutive-charge evidence in this spectrum
    let min_run = config.min_continuous_charge_peaks(level) as u16;
    let mut selected = vec![false; mass_bin_count];
    let mut this_spectrum_bins = Vec::new();
    for b in 0..mass_bin_count {
        if max_run[b] >= min_run {
            selected[b] = true;
            this_spectrum_bins.push(b);
        }
    }

    // union in evidence carried from preceding overlapped spectra
    for prev in &state.prev {
        let delta = ((prev.mass_bin_min - mass_bin_min) * bin_width).round() as i64;
        for &pb in &prev.bins {
            let b = pb as i64 + delta;
            if b >= 0 && (b as usize) < mass_bin_count {
                selected[b as usize] = true;
            }
        }
    }

    // decoy passes never revisit masses the real pass accepted
    if let Some(excl) = exclusion {
        for b in 0..mass_bin_count {
            if selected[b] {
                let mass = (mass_bin_min + b as f64 / bin_width).exp();
                if excl.contains(mass) {
                    selected[b] = false;
                }
            }
        }
    }

    eliminate_harmonics(&mut selected, &support, &max_run, bin_width);

    let candidate_bins: Vec<usize> = (0..mass_bin_count).filter(|&b| selected[b]).collect();
    log::trace!(
        "scan {}: {} occupied mz bins, {} candidate mass bins",
        spectrum.scan_number,
        occupied.len(),
        candidate_bins.len()
    );

    // reconstruction from the raw spectrum is independent per mass bin
    let window = config.match_tolerance(level);
    let candidates: Vec<PeakGroup> = candidate_bins
        .par_iter()
        .filter_map(|&b| {
            let mass = (mass_bin_min + b as f64 / bin_width).exp();
            if mass < config.min_mass || mass > config.max_mass {
                return None;
            }
            let (lo, hi) = if min_c[b] == i32::MAX {
                // carried bin with no support this scan: search the full range
                (config.min_charge, config.max_charge)
            } else {
                // widened one charge either side; bin rounding can clip the
                // observed range
                (
                    (min_c[b] - 1).max(config.min_charge),
                    (max_c[b] + 1).min(config.max_charge),
                )
            };
            build_candidate(
                spectrum, mass, lo, hi, window, avg, config, mode, exclusion,
            )
        })
        .collect();

    let mut groups = scoring::score_peak_groups(candidates, avg, config);
    dedup_by_nominal_mass(&mut groups);
    if let Some(cap) = config.max_mass_count {
        if groups.len() > cap {
            groups.sort_unstable_by(|a, b| b.intensity.total_cmp(&a.intensity));
            groups.truncate(cap);
        }
    }
    groups.sort_unstable_by(|a, b| a.monoisotopic_mass.total_cmp(&b.monoisotopic_mass));

    // decoy passes read the carried state but must not pollute it
    if mode == DeconvMode::Real {
        state.push(this_spectrum_bins, mass_bin_min);
    }
    groups
}

/// Discount mass bins whose energy is equally well explained at an integer
/// multiple of the charge: a bin and its `ln(h)`-shifted partner share the
/// same supporting m/z bins, so the one with lower projected intensity is
/// eliminated. Ties fall to the shorter charge run, then the higher bin.
fn eliminate_harmonics(selected: &mut [bool], support: &[f32], max_run: &[u16], bin_width: f64) {
    let shifts: Vec<usize> = HARMONICS
        .iter()
        .map(|&h| ((h as f64).ln() * bin_width).round() as usize)
        .collect();
    for b in 0..selected.len() {
        if !selected[b] {
            continue;
        }
        for &shift in &shifts {
            let b2 = b + shift;
            if b2 >= selected.len() || !selected[b2] {
                continue;
            }
            let keep_low = match support[b].total_cmp(&support[b2]) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => max_run[b] >= max_run[b2],
            };
            if keep_low {
                selected[b2] = false;
            } else {
                selected[b] = false;
                break;
            }
        }
    }
}

/// Re-examine the raw spectrum around one candidate mass: collect the
/// closest raw peak for every (charge, isotope) slot within tolerance, and
/// tally unmatched intensity in the searched windows as noise
#[allow(clippy::too_many_arguments)]
fn build_candidate(
    spectrum: &Spectrum,
    mass: f64,
    charge_lo: i32,
    charge_hi: i32,
    window: Tolerance,
    avg: &PrecalculatedAveragine,
    config: &DeconvConfig,
    mode: DeconvMode,
    exclusion: Option<&MassExclusion>,
) -> Option<PeakGroup> {
    let positive = config.positive_mode;
    let carrier = charge_carrier_mass(positive);
    let last_iso = avg.last_index(mass);
    let iso_len = last_iso + 1;

    let mut pg = PeakGroup::new(
        spectrum.scan_number,
        spectrum.rt,
        spectrum.ms_level,
        config.min_charge,
        config.charge_range(),
        iso_len,
    );
    pg.decoy = mode != DeconvMode::Real;

    let mut matched: FnvHashSet<usize> = FnvHashSet::default();
    let mut charge_hit = vec![false; config.charge_range()];
    let mut ppm_weighted = 0.0f64;
    let mut ppm_weight = 0.0f64;

    // In decoy modes the match window follows the perturbed filter: peaks
    // are located where the shifted charge would put them but keep the
    // unshifted label, so the reconstructed mass lands off every real mass
    let effective = |c: f64| -> f64 {
        match mode {
            DeconvMode::Real => c,
            DeconvMode::ChargeShiftDecoy => c + 1.0,
            DeconvMode::NoiseDecoy => c * NOISE_JITTER.exp(),
        }
    };

    for c in charge_lo..=charge_hi {
        let cf = effective(c as f64);
        let mut hit_any = false;
        for iso in 0..=last_iso {
            let theo_mz = (mass + iso as f64 * ISOTOPE_DA) / cf + carrier;
            let (low, high) = window.bounds(theo_mz);
            let (lo, hi) = binary_search_slice(&spectrum.mz, |m| *m, low, high);
            let mut best: Option<(usize, f64)> = None;
            for idx in lo..hi {
                let eps = (spectrum.mz[idx] - theo_mz).abs();
                if best.map_or(true, |(_, b)| eps <= b) {
                    best = Some((idx, eps));
                }
            }
            if let Some((idx, _)) = best {
                if matched.insert(idx) {
                    let mut peak =
                        LogMzPeak::new(spectrum.mz[idx], spectrum.intensity[idx], positive);
                    peak.abs_charge = c;
                    peak.isotope_index = iso as i32;
                    let ppm = (spectrum.mz[idx] - theo_mz).abs() / theo_mz * 1e6;
                    ppm_weighted += ppm * spectrum.intensity[idx] as f64;
                    ppm_weight += spectrum.intensity[idx] as f64;
                    pg.add_peak(peak);
                    hit_any = true;
                }
            }
        }
        if hit_any {
            charge_hit[(c - config.min_charge) as usize] = true;
        }
    }

    // noise counting waits until every charge has claimed its peaks, so a
    // peak matched at a later charge is never mistaken for noise
    for c in charge_lo..=charge_hi {
        let cf = effective(c as f64);
        let (span_lo, _) = window.bounds(mass / cf + carrier);
        let (_, span_hi) = window.bounds((mass + last_iso as f64 * ISOTOPE_DA) / cf + carrier);
        let (lo, hi) = binary_search_slice(&spectrum.mz, |m| *m, span_lo, span_hi);
        for idx in lo..hi {
            if !matched.contains(&idx) {
                pg.add_noise(c, spectrum.intensity[idx]);
            }
        }
    }

    // enforce a minimum run of consecutive charge states with evidence
    let min_run = config.min_continuous_charge_peaks(spectrum.ms_level);
    let mut run = 0usize;
    let mut longest = 0usize;
    for hit in charge_hit {
        run = if hit { run + 1 } else { 0 };
        longest = longest.max(run);
    }
    if longest < min_run {
        return None;
    }

    pg.finalize(positive);
    if pg.is_empty()
        || pg.intensity < config.intensity_threshold
        || pg.monoisotopic_mass < config.min_mass
        || pg.monoisotopic_mass > config.max_mass
    {
        return None;
    }
    if let Some(excl) = exclusion {
        if excl.contains(pg.monoisotopic_mass) {
            return None;
        }
    }
    pg.avg_ppm_error = if ppm_weight > 0.0 {
        ppm_weighted / ppm_weight
    } else {
        0.0
    };
    Some(pg)
}

/// Within one spectrum, two peak groups rounding to the same nominal mass
/// are duplicates; the more intense one wins
fn dedup_by_nominal_mass(groups: &mut Vec<PeakGroup>) {
    let mut best: FnvHashMap<i64, usize> = FnvHashMap::default();
    for (i, pg) in groups.iter().enumerate() {
        let key = pg.monoisotopic_mass.round() as i64;
        match best.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut e) => {
                if groups[*e.get()].intensity < pg.intensity {
                    e.insert(i);
                }
            }
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(i);
            }
        }
    }
    let keep: FnvHashSet<usize> = best.into_values().collect();
    let mut i = 0;
    groups.retain(|_| {
        let k = keep.contains(&i);
        i += 1;
        k
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::averagine::{AveragineType, IsotopeGenerator, PrecalculatedAveragine};
    use crate::config::DeconvConfigBuilder;
    use crate::mass::PROTON;

    fn table() -> PrecalculatedAveragine {
        let gen = IsotopeGenerator::new(50_000.0);
        PrecalculatedAveragine::build(50.0, 50_000.0, 20.0, &gen, AveragineType::Peptide).unwrap()
    }

    fn config() -> DeconvConfig {
        DeconvConfigBuilder {
            min_charge: Some(1),
            max_charge: Some(30),
            min_mass: Some(50.0),
            max_mass: Some(50_000.0),
            ppm_tolerance: Some(vec![10.0]),
            min_isotope_cosine: Some(vec![0.6]),
            min_charge_cosine: Some(0.3),
            min_continuous_charge_peak_count: Some(vec![2]),
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    /// A clean isotope envelope for `mass` across the given charges, with
    /// averagine-shaped intensities
    pub(crate) fn synthetic_spectrum(
        mass: f64,
        charges: &[i32],
        n_isotopes: usize,
        avg: &PrecalculatedAveragine,
        scan: usize,
        rt: f64,
    ) -> Spectrum {
        let pattern = avg.pattern(mass);
        let mut mz = Vec::new();
        let mut intensity = Vec::new();
        for &c in charges {
            for iso in 0..n_isotopes {
                let theo = pattern.get(iso).copied().unwrap_or(0.0);
                if theo <= 0.0 {
                    continue;
                }
                mz.push((mass + iso as f64 * ISOTOPE_DA) / c as f64 + PROTON);
                intensity.push((theo * 1000.0) as f32);
            }
        }
        Spectrum::new(scan, rt, 1, mz, intensity, None)
    }

    #[test]
    fn empty_spectrum_yields_no_groups() {
        let avg = table();
        let config = config();
        let mut state = EngineState::new(1, 2);
        let spec = Spectrum::new(1, 0.0, 1, vec![], vec![], None);
        let groups = deconvolve_spectrum(&spec, &mut state, &avg, &config);
        assert!(groups.is_empty());
    }

    #[test]
    fn recovers_known_mass() {
        let avg = table();
        let config = config();
        let mut state = EngineState::new(1, 2);
        let mass = 12_000.0;
        let spec = synthetic_spectrum(mass, &[9, 10, 11], 10, &avg, 1, 100.0);
        let groups = deconvolve_spectrum(&spec, &mut state, &avg, &config);
        assert!(!groups.is_empty());
        let best = groups
            .iter()
            .max_by(|a, b| a.intensity.total_cmp(&b.intensity))
            .unwrap();
        let tol = mass * config.tolerance(1) * 2.0;
        assert!(
            (best.monoisotopic_mass - mass).abs() <= tol,
            "mono {} expected {}",
            best.monoisotopic_mass,
            mass
        );
        assert!(best.min_abs_charge >= 9 && best.max_abs_charge <= 11);
    }

    #[test]
    fn charges_outside_range_never_reported() {
        let avg = table();
        // envelope lives at charges 9-11, but the search stops at 5
        let config = DeconvConfigBuilder {
            min_charge: Some(1),
            max_charge: Some(5),
            min_mass: Some(50.0),
            max_mass: Some(50_000.0),
            ppm_tolerance: Some(vec![10.0]),
            min_isotope_cosine: Some(vec![0.6]),
            min_continuous_charge_peak_count: Some(vec![2]),
            ..Default::default()
        }
        .build()
        .unwrap();
        let mut state = EngineState::new(1, 2);
        let mass = 12_000.0;
        let spec = synthetic_spectrum(mass, &[9, 10, 11], 10, &avg, 1, 100.0);
        let groups = deconvolve_spectrum(&spec, &mut state, &avg, &config);
        for pg in &groups {
            assert!(pg.min_abs_charge >= 1 && pg.max_abs_charge <= 5);
            // the true 12 kDa mass cannot be explained inside this range
            assert!((pg.monoisotopic_mass - mass).abs() > 1.0);
        }
    }

    #[test]
    fn carried_bins_stabilize_detection() {
        let avg = table();
        let config = config();
        let mut state = EngineState::new(1, 3);
        let mass = 12_000.0;
        let spec = synthetic_spectrum(mass, &[9, 10, 11], 10, &avg, 1, 100.0);
        let _ = deconvolve_spectrum(&spec, &mut state, &avg, &config);
        assert_eq!(state.prev.len(), 1);
        let spec2 = synthetic_spectrum(mass, &[9, 10, 11], 10, &avg, 2, 101.0);
        let _ = deconvolve_spectrum(&spec2, &mut state, &avg, &config);
        assert_eq!(state.prev.len(), 2);
        // capacity bounds the carry-over window
        for scan in 3..8 {
            let s = synthetic_spectrum(mass, &[9, 10, 11], 10, &avg, scan, 100.0 + scan as f64);
            let _ = deconvolve_spectrum(&s, &mut state, &avg, &config);
        }
        assert_eq!(state.prev.len(), 3);
    }

    #[test]
    #[should_panic(expected = "engine state for MS1")]
    fn wrong_ms_level_state_panics() {
        let avg = table();
        let config = config();
        let mut state = EngineState::new(1, 2);
        let spec = Spectrum::new(1, 0.0, 2, vec![500.0], vec![1.0], None);
        let _ = deconvolve_spectrum(&spec, &mut state, &avg, &config);
    }

    #[test]
    fn exclusion_blocks_mass() {
        let excl = MassExclusion::new(vec![12_000.0], Tolerance::Ppm(-10.0, 10.0));
        assert!(excl.contains(12_000.05));
        assert!(!excl.contains(12_010.0));
    }
}
