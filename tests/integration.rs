use ripple::{
    deconvolve_run, estimate_fdr, generate_decoys, trace_features, AveragineType,
    DeconvConfigBuilder, IsotopeGenerator, PrecalculatedAveragine, Spectrum, TraceConfig,
    ISOTOPE_DA, PROTON,
};

fn averagine() -> PrecalculatedAveragine {
    let gen = IsotopeGenerator::new(50_000.0);
    PrecalculatedAveragine::build(50.0, 50_000.0, 20.0, &gen, AveragineType::Peptide).unwrap()
}

fn config() -> ripple::DeconvConfig {
    DeconvConfigBuilder {
        min_charge: Some(1),
        max_charge: Some(30),
        min_mass: Some(50.0),
        max_mass: Some(50_000.0),
        ppm_tolerance: Some(vec![10.0]),
        min_isotope_cosine: Some(vec![0.6]),
        min_charge_cosine: Some(0.3),
        min_continuous_charge_peak_count: Some(vec![2]),
        rt_window_seconds: Some(10.0),
        ..Default::default()
    }
    .build()
    .unwrap()
}

/// Averagine-shaped envelopes for each (mass, charges) pair in one spectrum
fn synthesize(
    species: &[(f64, &[i32])],
    avg: &PrecalculatedAveragine,
    scan: usize,
    rt: f64,
) -> Spectrum {
    let mut mz = Vec::new();
    let mut intensity = Vec::new();
    for &(mass, charges) in species {
        let pattern = avg.pattern(mass);
        for &c in charges {
            for (iso, &theo) in pattern.iter().enumerate().take(12) {
                if theo <= 0.0 {
                    continue;
                }
                mz.push((mass + iso as f64 * ISOTOPE_DA) / c as f64 + PROTON);
                intensity.push((theo * 1000.0) as f32);
            }
        }
    }
    Spectrum::new(scan, rt, 1, mz, intensity, None)
}

#[test]
fn end_to_end_two_species() {
    let avg = averagine();
    let config = config();
    let masses = [16_950.0, 8_400.0];
    let species: Vec<(f64, &[i32])> = vec![(masses[0], &[17, 18, 19]), (masses[1], &[10, 11, 12])];

    let spectra: Vec<Spectrum> = (0..3)
        .map(|i| synthesize(&species, &avg, i + 1, 50.0 + i as f64 * 5.0))
        .collect();
    let groups = deconvolve_run(&spectra, &avg, &config);
    assert!(!groups.is_empty());

    for &mass in &masses {
        let tol = mass * config.tolerance(1) * 2.0;
        let hits = groups
            .iter()
            .filter(|pg| (pg.monoisotopic_mass - mass).abs() <= tol)
            .count();
        assert_eq!(hits, 3, "expected one hit per scan for mass {}", mass);
    }
    for pg in &groups {
        assert!(pg.isotope_cosine >= 0.6);
        assert!((0.0..=1.0).contains(&pg.qscore));
        assert!(!pg.decoy);
    }
}

#[test]
fn envelope_split_across_two_charges() {
    let avg = averagine();
    let config = config();
    let mass = 16_950.0;
    // lower isotopes observed at charge 17, upper isotopes at charge 18
    let pattern = avg.pattern(mass).to_vec();
    let mut mz = Vec::new();
    let mut intensity = Vec::new();
    for (iso, &theo) in pattern.iter().enumerate().take(12) {
        if theo <= 0.0 {
            continue;
        }
        let c = if iso < 6 { 17.0 } else { 18.0 };
        mz.push((mass + iso as f64 * ISOTOPE_DA) / c + PROTON);
        intensity.push((theo * 1000.0) as f32);
    }
    let spectrum = Spectrum::new(1, 50.0, 1, mz, intensity, None);

    let mut state = ripple::EngineState::new(1, 1);
    let groups = ripple::deconvolve_spectrum(&spectrum, &mut state, &avg, &config);
    let tol = mass * config.tolerance(1) * 2.0;
    let hit = groups
        .iter()
        .find(|pg| (pg.monoisotopic_mass - mass).abs() <= tol)
        .expect("known mass not recovered");
    assert!(hit.isotope_cosine >= config.min_isotope_cosine(1));
    assert!(hit.charge_cosine >= config.min_charge_cosine);
    assert_eq!(hit.min_abs_charge, 17);
    assert_eq!(hit.max_abs_charge, 18);
}

#[test]
fn features_span_the_elution_window() {
    let avg = averagine();
    let config = config();
    let mass = 16_950.0;
    let species: Vec<(f64, &[i32])> = vec![(mass, &[17, 18, 19])];

    let spectra: Vec<Spectrum> = [(1, 50.0), (2, 55.0), (3, 61.0)]
        .iter()
        .map(|&(scan, rt)| synthesize(&species, &avg, scan, rt))
        .collect();
    let groups = deconvolve_run(&spectra, &avg, &config);

    let trace_config = TraceConfig::new(20.0, 0.1, 5.0, 2, 0.6, 0.3).unwrap();
    let features = trace_features(&groups, &avg, &trace_config);
    let matching: Vec<_> = features
        .iter()
        .filter(|f| (f.monoisotopic_mass - mass).abs() < 1.0)
        .collect();
    assert_eq!(matching.len(), 1);
    let f = matching[0];
    assert_eq!(f.point_count, 3);
    assert!((f.rt_start - 50.0).abs() < 1e-9);
    assert!((f.rt_end - 61.0).abs() < 1e-9);
    assert!(f.min_abs_charge >= 17 && f.max_abs_charge <= 19);
    assert!(f.charge_count >= 2);
}

#[test]
fn decoys_never_overlap_targets() {
    let avg = averagine();
    let config = config();
    let species: Vec<(f64, &[i32])> = vec![(16_950.0, &[17, 18, 19])];
    let spectrum = synthesize(&species, &avg, 1, 50.0);

    let mut state = ripple::EngineState::new(1, 1);
    let real = ripple::deconvolve_spectrum(&spectrum, &mut state, &avg, &config);
    assert!(!real.is_empty());

    let decoys = generate_decoys(&spectrum, &real, &avg, &config);
    let tol = config.tolerance(1) * 2.0;
    for d in &decoys {
        assert!(d.decoy);
        for t in &real {
            assert!(
                (d.monoisotopic_mass - t.monoisotopic_mass).abs()
                    > t.monoisotopic_mass * tol,
                "decoy {} collides with target {}",
                d.monoisotopic_mass,
                t.monoisotopic_mass
            );
        }
    }
}

#[test]
fn fdr_assigns_qvalues_to_every_target() {
    let avg = averagine();
    let config = config();
    let species: Vec<(f64, &[i32])> = vec![(16_950.0, &[17, 18, 19]), (8_400.0, &[10, 11, 12])];
    let spectra: Vec<Spectrum> = (0..2)
        .map(|i| synthesize(&species, &avg, i + 1, 50.0 + i as f64 * 5.0))
        .collect();

    let mut groups = deconvolve_run(&spectra, &avg, &config);
    assert!(!groups.is_empty());
    estimate_fdr(&mut groups, &spectra, &avg, &config);
    for pg in &groups {
        let q = pg.qvalue.unwrap();
        assert!((0.0..=1.0).contains(&q));
    }
}

#[test]
fn empty_run_is_not_an_error() {
    let avg = averagine();
    let config = config();
    let spectra = vec![Spectrum::new(1, 0.0, 1, vec![], vec![], None)];
    let groups = deconvolve_run(&spectra, &avg, &config);
    assert!(groups.is_empty());
    let trace_config = TraceConfig::new(20.0, 0.1, 5.0, 2, 0.6, 0.3).unwrap();
    assert!(trace_features(&groups, &avg, &trace_config).is_empty());
}
