use crate::error::{Error, Result};

/// Number of photometric bands (SDSS ugriz).
pub const NUM_BANDS: usize = 5;

/// Fixed flux unit conversion: `10^((48.6 - 2.5*17 + 22.5) / 2.5)`, taking
/// the sensitivity-weighted per-frequency flux into nanomaggies.
pub const FLUX_CONSTANT: f64 = 275_422_870_333.817_443_847_656_25;

/// Speed of light in Angstrom/s, for the per-wavelength to per-frequency
/// flux density conversion `f_nu = f_lambda * lam^2 / c`.
const SPEED_OF_LIGHT_AA: f64 = 2.99792e18;

/// Maps a spectrum sampled on an observed wavelength grid to expected fluxes
/// in the five photometric bands.
///
/// This is the seam between the inference core and the instrument model: the
/// forward model treats it as a pure function. Implementations must be
/// deterministic and side-effect free.
pub trait BandProjector: Send + Sync {
    fn project(&self, spectrum: &[f64], lam_obs: &[f64]) -> [f64; NUM_BANDS];
}

/// One band's sensitivity curve, tabulated over wavelength (Angstrom).
#[derive(Debug, Clone)]
pub struct BandCurve {
    wavelength: Vec<f64>,
    sensitivity: Vec<f64>,
}

impl BandCurve {
    pub fn new(wavelength: Vec<f64>, sensitivity: Vec<f64>) -> Result<Self> {
        if wavelength.len() != sensitivity.len() {
            return Err(Error::DimensionMismatch {
                what: "band curve sensitivity",
                expected: wavelength.len(),
                found: sensitivity.len(),
            });
        }
        if wavelength.len() < 2 {
            return Err(Error::InvalidBandCurve(
                "curve needs at least two samples".into(),
            ));
        }
        if !wavelength.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidBandCurve(
                "wavelengths must be strictly increasing".into(),
            ));
        }
        if sensitivity.iter().any(|&s| !s.is_finite() || s < 0.0) {
            return Err(Error::InvalidBandCurve(
                "sensitivities must be finite and non-negative".into(),
            ));
        }
        Ok(Self { wavelength, sensitivity })
    }

    /// Linear interpolation at `lam`. Outside the tabulated range the band
    /// simply does not respond: zero, never extrapolated.
    pub fn interpolate_at(&self, lam: f64) -> f64 {
        let w = &self.wavelength;
        if !lam.is_finite() || lam < w[0] || lam > w[w.len() - 1] {
            return 0.0;
        }
        // partition_point: first index with w[i] > lam; lam >= w[0] here,
        // so hi is at least 1.
        let hi = w.partition_point(|&x| x <= lam);
        if hi == w.len() {
            return self.sensitivity[w.len() - 1];
        }
        let lo = hi - 1;
        let t = (lam - w[lo]) / (w[hi] - w[lo]);
        self.sensitivity[lo] * (1.0 - t) + self.sensitivity[hi] * t
    }
}

/// Default `BandProjector`: five tabulated sensitivity curves.
///
/// For each band, the curve is interpolated onto the observed grid, the
/// spectrum is converted from per-wavelength to per-frequency flux density,
/// the sensitivity-weighted sum is normalized by the curve's own integral
/// over the grid, and the fixed unit constant is applied.
#[derive(Debug, Clone)]
pub struct BandSystem {
    curves: [BandCurve; NUM_BANDS],
}

impl BandSystem {
    pub fn new(curves: [BandCurve; NUM_BANDS]) -> Self {
        Self { curves }
    }

    pub fn curve(&self, band: usize) -> &BandCurve {
        &self.curves[band]
    }
}

impl BandProjector for BandSystem {
    fn project(&self, spectrum: &[f64], lam_obs: &[f64]) -> [f64; NUM_BANDS] {
        debug_assert_eq!(spectrum.len(), lam_obs.len());
        let mut fluxes = [0.0; NUM_BANDS];

        for (band, curve) in self.curves.iter().enumerate() {
            let mut norm = 0.0;
            let mut fthru = 0.0;
            for (&lam, &spec) in lam_obs.iter().zip(spectrum.iter()) {
                let sens = curve.interpolate_at(lam);
                norm += sens;
                fthru += sens * spec * (lam * lam / SPEED_OF_LIGHT_AA);
            }
            // A band whose curve misses the grid entirely contributes no flux.
            fluxes[band] = if norm > 0.0 {
                fthru / norm * FLUX_CONSTANT
            } else {
                0.0
            };
        }

        fluxes
    }
}
