//! Chromatographic mass feature tracing.
//!
//! Peak groups from successive spectra of the same MS level are linked into
//! features when their monoisotopic masses agree within tolerance. Detection
//! is apex-seeded: the most intense unclaimed peak group anchors a trace that
//! extends outward scan by scan until too many consecutive scans fail to
//! contribute. Each peak group joins at most one feature.

use crate::averagine::PrecalculatedAveragine;
use crate::config::TraceConfig;
use crate::mass::Tolerance;
use crate::peak_group::PeakGroup;
use crate::scoring::{charge_fit_score, isotope_cosine_with_offset};
use crate::spectrum::binary_search_slice;
use dashmap::DashMap;
use rayon::prelude::*;
use serde::Serialize;

/// A mass eluting over a retention-time window
#[derive(Clone, Debug, Serialize)]
pub struct Feature {
    /// Sequential id, assigned in emission order
    pub id: usize,
    /// Intensity-weighted monoisotopic mass over the trace
    pub monoisotopic_mass: f64,
    pub average_mass: f64,
    pub ms_level: u8,
    pub rt_start: f64,
    pub rt_end: f64,
    pub rt_apex: f64,
    /// Summed intensity over all member peak groups
    pub intensity: f32,
    pub apex_intensity: f32,
    pub min_abs_charge: i32,
    pub max_abs_charge: i32,
    pub representative_charge: i32,
    /// Number of distinct charge states observed across the trace
    pub charge_count: usize,
    /// Number of scans contributing a peak group
    pub point_count: usize,
    pub isotope_cosine: f64,
    pub charge_cosine: f64,
    /// Best QScore among member peak groups
    pub qscore: f64,
}

/// One scan's worth of peak groups, mass-sorted for window lookups
struct ScanColumn {
    rt: f64,
    /// (monoisotopic mass, index into the flat group slice), ascending mass
    entries: Vec<(f64, usize)>,
}

/// Link peak groups across scans into features. Input order does not matter;
/// groups are partitioned by MS level and traced independently
pub fn trace_features(
    groups: &[PeakGroup],
    avg: &PrecalculatedAveragine,
    config: &TraceConfig,
) -> Vec<Feature> {
    let mut levels: Vec<u8> = groups.iter().map(|pg| pg.ms_level).collect();
    levels.sort_unstable();
    levels.dedup();

    let mut features = Vec::new();
    for level in levels {
        features.extend(trace_level(groups, level, avg, config));
    }
    features.sort_unstable_by(|a, b| {
        a.rt_apex
            .total_cmp(&b.rt_apex)
            .then(a.monoisotopic_mass.total_cmp(&b.monoisotopic_mass))
    });
    for (id, feature) in features.iter_mut().enumerate() {
        feature.id = id;
    }
    features
}

fn trace_level(
    groups: &[PeakGroup],
    level: u8,
    avg: &PrecalculatedAveragine,
    config: &TraceConfig,
) -> Vec<Feature> {
    // group by scan; scans are independent so the partition parallelizes
    let by_scan: DashMap<usize, Vec<usize>> = DashMap::default();
    groups
        .par_iter()
        .enumerate()
        .filter(|(_, pg)| pg.ms_level == level)
        .for_each(|(i, pg)| {
            by_scan.entry(pg.scan_number).or_default().push(i);
        });
    if by_scan.is_empty() {
        return Vec::new();
    }

    let mut columns: Vec<ScanColumn> = by_scan
        .into_iter()
        .map(|(_, indices)| {
            let rt = groups[indices[0]].rt;
            let mut entries: Vec<(f64, usize)> = indices
                .into_iter()
                .map(|i| (groups[i].monoisotopic_mass, i))
                .collect();
            entries.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));
            ScanColumn { rt, entries }
        })
        .collect();
    columns.sort_unstable_by(|a, b| a.rt.total_cmp(&b.rt));

    // apex-seeded greedy assembly, most intense groups first
    let mut seeds: Vec<usize> = (0..groups.len())
        .filter(|&i| groups[i].ms_level == level)
        .collect();
    seeds.sort_unstable_by(|&a, &b| groups[b].intensity.total_cmp(&groups[a].intensity));

    let mut claimed = vec![false; groups.len()];
    let mut features = Vec::new();
    for seed in seeds {
        if claimed[seed] {
            continue;
        }
        let members = extend_trace(groups, &columns, &claimed, seed, config);
        // a trace must sample its RT span densely enough
        let rts: Vec<f64> = members.iter().map(|&i| groups[i].rt).collect();
        let rt_start = rts.iter().cloned().fold(f64::INFINITY, f64::min);
        let rt_end = rts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if rt_end - rt_start < config.min_trace_length_seconds {
            continue;
        }
        let span_scans = columns
            .iter()
            .filter(|c| c.rt >= rt_start && c.rt <= rt_end)
            .count();
        if span_scans > 0 && (members.len() as f64) < config.min_sample_rate * span_scans as f64 {
            continue;
        }
        if let Some(feature) = aggregate(groups, &members, avg, config) {
            for &i in &members {
                claimed[i] = true;
            }
            features.push(feature);
        }
    }
    features
}

/// Walk outward from the seed's scan in both RT directions, picking the
/// closest-mass unclaimed group per scan. The trace tolerates up to
/// `trace_termination_outliers` consecutive empty scans before stopping
fn extend_trace(
    groups: &[PeakGroup],
    columns: &[ScanColumn],
    claimed: &[bool],
    seed: usize,
    config: &TraceConfig,
) -> Vec<usize> {
    let seed_mass = groups[seed].monoisotopic_mass;
    let delta = Tolerance::ppm_to_delta_mass(seed_mass, config.mass_error_ppm);
    let seed_col = columns
        .iter()
        .position(|c| c.entries.iter().any(|&(_, i)| i == seed))
        .unwrap_or(0);

    let pick = |col: &ScanColumn| -> Option<usize> {
        let (lo, hi) = binary_search_slice(
            &col.entries,
            |&(m, _)| m,
            seed_mass - delta,
            seed_mass + delta,
        );
        col.entries[lo..hi]
            .iter()
            .filter(|&&(_, i)| !claimed[i])
            .min_by(|a, b| {
                (a.0 - seed_mass)
                    .abs()
                    .total_cmp(&(b.0 - seed_mass).abs())
            })
            .map(|&(_, i)| i)
    };

    let mut members = vec![seed];
    for direction in [1i64, -1i64] {
        let mut misses = 0usize;
        let mut step = 1i64;
        loop {
            let idx = seed_col as i64 + direction * step;
            if idx < 0 || idx as usize >= columns.len() {
                break;
            }
            match pick(&columns[idx as usize]) {
                Some(i) if i != seed => {
                    members.push(i);
                    misses = 0;
                }
                _ => {
                    misses += 1;
                    if misses > config.trace_termination_outliers {
                        break;
                    }
                }
            }
            step += 1;
        }
    }
    members.sort_unstable();
    members.dedup();
    members
}

/// Re-score the assembled trace: envelope and charge profiles are summed over
/// members before the cosine checks, so a trace can pass on aggregate even if
/// single scans were marginal
fn aggregate(
    groups: &[PeakGroup],
    members: &[usize],
    avg: &PrecalculatedAveragine,
    config: &TraceConfig,
) -> Option<Feature> {
    let mut weighted_mass = 0.0f64;
    let mut intensity = 0.0f64;
    let mut apex: (f64, f32) = (0.0, 0.0);
    let mut rt_start = f64::INFINITY;
    let mut rt_end = f64::NEG_INFINITY;
    let mut min_c = i32::MAX;
    let mut max_c = i32::MIN;
    let mut qscore = 0.0f64;

    let charge_len = members
        .iter()
        .map(|&i| groups[i].per_charge_intensity().len())
        .max()?;
    let iso_len = members
        .iter()
        .map(|&i| groups[i].per_isotope_intensity().len())
        .max()?;
    let mut per_charge = vec![0.0f32; charge_len];
    let mut per_isotope = vec![0.0f32; iso_len];
    let mut min_charge = i32::MAX;

    for &i in members {
        let pg = &groups[i];
        weighted_mass += pg.monoisotopic_mass * pg.intensity as f64;
        intensity += pg.intensity as f64;
        if pg.intensity > apex.1 {
            apex = (pg.rt, pg.intensity);
        }
        rt_start = rt_start.min(pg.rt);
        rt_end = rt_end.max(pg.rt);
        min_c = min_c.min(pg.min_abs_charge);
        max_c = max_c.max(pg.max_abs_charge);
        qscore = qscore.max(pg.qscore);
        min_charge = min_charge.min(pg.min_charge);
        for (k, &v) in pg.per_charge_intensity().iter().enumerate() {
            per_charge[k] += v;
        }
        for (k, &v) in pg.per_isotope_intensity().iter().enumerate() {
            per_isotope[k] += v;
        }
    }
    if intensity <= 0.0 {
        return None;
    }
    let mass = weighted_mass / intensity;

    let (isotope_cosine, _) = isotope_cosine_with_offset(&per_isotope, avg.pattern(mass), 0);
    if isotope_cosine < config.min_isotope_cosine {
        return None;
    }
    let charge_cosine = charge_fit_score(&per_charge);
    if charge_cosine < config.min_charge_cosine {
        return None;
    }

    let representative_charge = per_charge
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(k, _)| k as i32 + min_charge)
        .unwrap_or(0);
    let charge_count = per_charge.iter().filter(|&&x| x > 0.0).count();

    Some(Feature {
        id: 0,
        monoisotopic_mass: mass,
        average_mass: mass + avg.average_mass_delta(mass),
        ms_level: groups[members[0]].ms_level,
        rt_start,
        rt_end,
        rt_apex: apex.0,
        intensity: intensity as f32,
        apex_intensity: apex.1,
        min_abs_charge: min_c,
        max_abs_charge: max_c,
        representative_charge,
        charge_count,
        point_count: members.len(),
        isotope_cosine,
        charge_cosine,
        qscore,
    })
}
