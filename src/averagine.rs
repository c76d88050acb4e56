//! Precomputed averagine isotope envelopes.
//!
//! For every candidate neutral mass on a coarse grid, the expected isotope
//! intensity distribution is generated once up front, trimmed to the bins
//! that carry essentially all of its power, and power-normalized. Lookups
//! afterwards are a rounded index into the table - no mutable state.

use crate::mass::ISOTOPE_DA;

/// Which statistical monomer model predicts envelope shape
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AveragineType {
    Peptide,
    Rna,
}

/// Average elemental composition per dalton of neutral mass
struct CompositionRates {
    carbon: f64,
    hydrogen: f64,
    nitrogen: f64,
    oxygen: f64,
    sulfur: f64,
}

impl AveragineType {
    fn rates(&self) -> CompositionRates {
        match self {
            // averagine residue C4.9384 H7.7583 N1.3577 O1.4773 S0.0417,
            // monoisotopic mass 111.1254 Da
            AveragineType::Peptide => CompositionRates {
                carbon: 4.9384 / 111.1254,
                hydrogen: 7.7583 / 111.1254,
                nitrogen: 1.3577 / 111.1254,
                oxygen: 1.4773 / 111.1254,
                sulfur: 0.0417 / 111.1254,
            },
            // average ribonucleotide C9.5 H11.75 N3.75 O7 P1, ~321.2 Da
            AveragineType::Rna => CompositionRates {
                carbon: 9.5 / 321.2,
                hydrogen: 11.75 / 321.2,
                nitrogen: 3.75 / 321.2,
                oxygen: 7.0 / 321.2,
                sulfur: 0.0,
            },
        }
    }
}

// Natural heavy-isotope abundances per atom
const P_C13: f64 = 0.0107;
const P_H2: f64 = 0.000115;
const P_N15: f64 = 0.00364;
const P_O18: f64 = 0.00205;
const P_S33: f64 = 0.0076;
const P_S34: f64 = 0.0443;

/// Generates theoretical isotope intensity distributions from a Poisson
/// convolution over the averagine composition. Caller-owned; passed into
/// [`PrecalculatedAveragine::build`] rather than living in a global.
pub struct IsotopeGenerator {
    max_isotope_count: usize,
}

impl IsotopeGenerator {
    /// `max_mass` bounds the envelope length that will ever be requested
    pub fn new(max_mass: f64) -> Self {
        // +1 shifts dominate envelope width; six sigma past the mean covers
        // the tail at any mass in range
        let lambda = max_mass * AveragineType::Peptide.rates().carbon * P_C13;
        let max_isotope_count = (lambda + 6.0 * lambda.sqrt()).ceil() as usize + 4;
        Self { max_isotope_count }
    }

    pub fn max_isotope_count(&self) -> usize {
        self.max_isotope_count
    }

    /// Unnormalized isotope intensity distribution for a neutral mass;
    /// index 0 is the monoisotopic peak
    pub fn envelope(&self, mass: f64, kind: AveragineType) -> Vec<f64> {
        let rates = kind.rates();
        // +1 Da isotope substitutions, pooled into one Poisson rate
        let lambda1 = mass
            * (rates.carbon * P_C13 + rates.hydrogen * P_H2 + rates.nitrogen * P_N15
                + rates.sulfur * P_S33);
        // +2 Da substitutions (O18, S34)
        let lambda2 = mass * (rates.oxygen * P_O18 + rates.sulfur * P_S34);

        let p1 = poisson(lambda1, self.max_isotope_count);
        let p2 = poisson(lambda2, self.max_isotope_count / 2 + 1);

        let mut out = vec![0.0; self.max_isotope_count];
        for (j, &b) in p2.iter().enumerate() {
            if b <= 0.0 {
                continue;
            }
            for (i, &a) in p1.iter().enumerate() {
                let k = i + 2 * j;
                if k >= out.len() {
                    break;
                }
                out[k] += a * b;
            }
        }
        out
    }
}

fn poisson(lambda: f64, len: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(len);
    // iterative p(k) = p(k-1) * lambda / k avoids factorial overflow
    let mut p = (-lambda).exp();
    for k in 0..len {
        out.push(p);
        p *= lambda / (k + 1) as f64;
    }
    out
}

#[derive(Debug, PartialEq)]
pub enum AveragineError {
    /// The isotope generator produced an all-zero distribution for a bucket
    /// mass, which indicates invalid generator input
    DegeneratePower { mass: f64 },
}

impl std::fmt::Display for AveragineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AveragineError::DegeneratePower { mass } => {
                write!(f, "degenerate isotope distribution at mass {}", mass)
            }
        }
    }
}

impl std::error::Error for AveragineError {}

struct Bucket {
    /// Power-normalized isotope intensities; index = isotope index, trimmed
    /// entries zeroed, trailing zeros dropped
    pattern: Vec<f64>,
    apex_index: usize,
    left_count: usize,
    right_count: usize,
    /// average mass - monoisotopic mass
    average_mono_delta: f64,
    /// most abundant isotope mass - monoisotopic mass
    abundant_mono_delta: f64,
}

/// Dense isotope-pattern table over a neutral-mass grid
pub struct PrecalculatedAveragine {
    min_mass: f64,
    bucket_width: f64,
    buckets: Vec<Bucket>,
    max_isotope_count: usize,
}

const MIN_POWER_FRACTION: f64 = 0.9999;
const MIN_ISO_LENGTH: usize = 2;
const MIN_LEFT_RIGHT_COUNT: usize = 2;

impl PrecalculatedAveragine {
    pub fn build(
        min_mass: f64,
        max_mass: f64,
        bucket_width: f64,
        generator: &IsotopeGenerator,
        kind: AveragineType,
    ) -> Result<Self, AveragineError> {
        let n = ((max_mass - min_mass) / bucket_width).floor() as usize;
        let mut buckets = Vec::with_capacity(n + 1);
        for i in 0..=n {
            let mass = min_mass + i as f64 * bucket_width;
            buckets.push(Self::build_bucket(mass, generator, kind)?);
        }
        log::debug!(
            "averagine table: {} buckets, {:.0}-{:.0} Da, width {} Da",
            buckets.len(),
            min_mass,
            max_mass,
            bucket_width
        );
        Ok(Self {
            min_mass,
            bucket_width,
            buckets,
            max_isotope_count: generator.max_isotope_count(),
        })
    }

    fn build_bucket(
        mass: f64,
        generator: &IsotopeGenerator,
        kind: AveragineType,
    ) -> Result<Bucket, AveragineError> {
        let mut iso = generator.envelope(mass, kind);

        let mut total_power = 0.0;
        let mut apex_index = 0;
        let mut apex_intensity = 0.0;
        for (k, &v) in iso.iter().enumerate() {
            total_power += v * v;
            if v > apex_intensity {
                apex_intensity = v;
                apex_index = k;
            }
        }
        if total_power <= f64::EPSILON {
            return Err(AveragineError::DegeneratePower { mass });
        }

        // average/most-abundant deltas come from the untrimmed distribution
        let total_intensity: f64 = iso.iter().sum();
        let average_mono_delta = iso
            .iter()
            .enumerate()
            .map(|(k, &v)| k as f64 * ISOTOPE_DA * v)
            .sum::<f64>()
            / total_intensity;
        let abundant_mono_delta = apex_index as f64 * ISOTOPE_DA;

        // Trim both tails symmetrically around the apex until removing the
        // next smallest end would drop retained power below the floor
        let pretrim_power = total_power;
        let mut retained_power = total_power;
        let mut left = 0;
        let mut right = iso.len() - 1;
        let mut trimmed = 0;
        while iso.len() - trimmed > MIN_ISO_LENGTH && left < right {
            let (power, trim_left) = {
                let l = iso[left];
                let r = iso[right];
                if l < r {
                    (l * l, true)
                } else {
                    (r * r, false)
                }
            };
            if retained_power - power < pretrim_power * MIN_POWER_FRACTION {
                break;
            }
            retained_power -= power;
            trimmed += 1;
            if trim_left {
                iso[left] = 0.0;
                left += 1;
            } else {
                iso[right] = 0.0;
                right -= 1;
            }
        }

        let left_count = (apex_index - left).max(MIN_LEFT_RIGHT_COUNT);
        let right_count = (right - apex_index).max(MIN_LEFT_RIGHT_COUNT);

        iso.truncate(right + 1);
        let norm = retained_power.sqrt();
        for v in iso.iter_mut() {
            *v /= norm;
        }

        Ok(Bucket {
            pattern: iso,
            apex_index,
            left_count,
            right_count,
            average_mono_delta,
            abundant_mono_delta,
        })
    }

    /// Out-of-range masses clamp silently to the boundary bucket; this is
    /// accepted behavior, not an error
    fn index(&self, mass: f64) -> usize {
        let i = ((mass - self.min_mass).max(0.0) / self.bucket_width).round() as usize;
        i.min(self.buckets.len() - 1)
    }

    pub fn pattern(&self, mass: f64) -> &[f64] {
        &self.buckets[self.index(mass)].pattern
    }

    pub fn apex_index(&self, mass: f64) -> usize {
        self.buckets[self.index(mass)].apex_index
    }

    pub fn left_count(&self, mass: f64) -> usize {
        self.buckets[self.index(mass)].left_count
    }

    pub fn right_count(&self, mass: f64) -> usize {
        self.buckets[self.index(mass)].right_count
    }

    /// Highest isotope index worth searching for a mass
    pub fn last_index(&self, mass: f64) -> usize {
        let b = &self.buckets[self.index(mass)];
        b.apex_index + b.right_count
    }

    pub fn average_mass_delta(&self, mass: f64) -> f64 {
        self.buckets[self.index(mass)].average_mono_delta
    }

    pub fn abundant_mass_delta(&self, mass: f64) -> f64 {
        self.buckets[self.index(mass)].abundant_mono_delta
    }

    pub fn max_isotope_count(&self) -> usize {
        self.max_isotope_count
    }
}
