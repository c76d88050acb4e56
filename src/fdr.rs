//! Target-decoy false discovery rate estimation.
//!
//! Decoy peak groups come from re-running the deconvolution engine with a
//! perturbed universal pattern (charge-shift and noise modes) on the same
//! spectrum, excluding every mass the real pass accepted. Competing real and
//! decoy QScores then yield per-group q-values.

use crate::averagine::PrecalculatedAveragine;
use crate::config::DeconvConfig;
use crate::engine::{deconvolve_with_mode, DeconvMode, EngineState, MassExclusion};
use crate::peak_group::PeakGroup;
use crate::spectrum::Spectrum;

/// Run both decoy modes against one spectrum. Masses in `real` are excluded
/// so no decoy duplicates an accepted target hypothesis
pub fn generate_decoys(
    spectrum: &Spectrum,
    real: &[PeakGroup],
    avg: &PrecalculatedAveragine,
    config: &DeconvConfig,
) -> Vec<PeakGroup> {
    let exclusion = MassExclusion::new(
        real.iter().map(|pg| pg.monoisotopic_mass).collect(),
        config.match_tolerance(spectrum.ms_level),
    );
    let mut decoys = Vec::new();
    for mode in [DeconvMode::ChargeShiftDecoy, DeconvMode::NoiseDecoy] {
        // decoy passes never share carried state with the real search
        let mut state = EngineState::new(spectrum.ms_level, 0);
        decoys.extend(deconvolve_with_mode(
            spectrum,
            &mut state,
            avg,
            config,
            mode,
            Some(&exclusion),
        ));
    }
    decoys
}

/// Assign q-values to the real peak groups by competition with the decoy
/// population: at score `s`, q = decoys at or above `s` over all hypotheses
/// at or above `s`, made monotonic by a cumulative-minimum pass from the
/// worst score upward
pub fn assign_qvalues(real: &mut [PeakGroup], decoys: &[PeakGroup]) {
    // (qscore, is_decoy, index into `real` for targets)
    let mut scored: Vec<(f64, bool, usize)> = real
        .iter()
        .enumerate()
        .map(|(i, pg)| (pg.qscore, false, i))
        .chain(decoys.iter().map(|pg| (pg.qscore, true, usize::MAX)))
        .collect();
    scored.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));

    let mut decoy_count = 0usize;
    let mut qvalues = vec![0.0f64; scored.len()];
    for (rank, &(_, is_decoy, _)) in scored.iter().enumerate() {
        if is_decoy {
            decoy_count += 1;
        }
        qvalues[rank] = decoy_count as f64 / (rank + 1) as f64;
    }
    // monotonic from worst to best
    let mut running_min = 1.0f64;
    for rank in (0..qvalues.len()).rev() {
        running_min = running_min.min(qvalues[rank]);
        qvalues[rank] = running_min;
    }

    for (rank, &(_, is_decoy, idx)) in scored.iter().enumerate() {
        if !is_decoy {
            real[idx].qvalue = Some(qvalues[rank]);
        }
    }
}

/// Convenience for whole-run FDR: regenerate decoys per spectrum, then
/// assign q-values over the pooled target and decoy populations
pub fn estimate_fdr(
    real: &mut [PeakGroup],
    spectra: &[Spectrum],
    avg: &PrecalculatedAveragine,
    config: &DeconvConfig,
) -> usize {
    let mut decoys = Vec::new();
    for spectrum in spectra {
        let targets: Vec<PeakGroup> = real
            .iter()
            .filter(|pg| pg.scan_number == spectrum.scan_number)
            .cloned()
            .collect();
        decoys.extend(generate_decoys(spectrum, &targets, avg, config));
    }
    log::debug!(
        "fdr: {} targets competing with {} decoys",
        real.len(),
        decoys.len()
    );
    assign_qvalues(real, &decoys);
    decoys.len()
}
