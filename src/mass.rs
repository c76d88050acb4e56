use serde::{Deserialize, Serialize};

/// Mass of a proton in Da
pub const PROTON: f64 = 1.007276466879;
/// C13 - C12 mass difference, the spacing between adjacent isotope peaks
pub const ISOTOPE_DA: f64 = 1.0033548378;

/// Mass carried by the charge agent: a proton in positive mode, the loss of
/// one in negative mode
pub fn charge_carrier_mass(positive: bool) -> f64 {
    if positive {
        PROTON
    } else {
        -PROTON
    }
}

/// Natural log of the charge-stripped m/z. Deconvolution operates in this
/// space because a mass `M` observed at charge `c` satisfies
/// `ln(mz - carrier) = ln(M) - ln(c)`, turning the charge search into a
/// constant-offset lookup
pub fn log_mz(mz: f64, positive: bool) -> f64 {
    (mz - charge_carrier_mass(positive)).ln()
}

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum Tolerance {
    Ppm(f64, f64),
    Da(f64, f64),
}

impl Tolerance {
    /// Compute the (`lower`, `upper`) window (in Da or Th) for a center value
    /// and a given tolerance
    pub fn bounds(&self, center: f64) -> (f64, f64) {
        match self {
            Tolerance::Ppm(lo, hi) => {
                let delta_lo = center * lo / 1_000_000.0;
                let delta_hi = center * hi / 1_000_000.0;
                (center + delta_lo, center + delta_hi)
            }
            Tolerance::Da(lo, hi) => (center + lo, center + hi),
        }
    }

    pub fn contains(&self, center: f64, rhs: f64) -> bool {
        let (lo, hi) = self.bounds(center);
        rhs >= lo && rhs <= hi
    }

    pub fn ppm_to_delta_mass(center: f64, ppm: f64) -> f64 {
        ppm * center / 1_000_000.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tolerances() {
        let (lo, hi) = Tolerance::Ppm(-10.0, 10.0).bounds(1000.0);
        assert!((lo - 999.99).abs() < 1e-9);
        assert!((hi - 1000.01).abs() < 1e-9);
        assert!(Tolerance::Da(-0.5, 0.5).contains(100.0, 100.3));
        assert!(!Tolerance::Da(-0.5, 0.5).contains(100.0, 100.6));
    }

    #[test]
    fn log_mz_modes() {
        let mz = 500.0;
        assert!(log_mz(mz, true) < log_mz(mz, false));
        assert!((log_mz(mz, true) - (mz - PROTON).ln()).abs() < 1e-12);
    }
}
