use std::sync::Arc;

use crate::basis::QuasarBasis;
use crate::error::{Error, Result};
use crate::photometry::{BandProjector, NUM_BANDS};

/// Redshift prior: Normal(2.5, 1.0), matching the DR10 quasar population.
pub const PRIOR_Z_MEAN: f64 = 2.5;
pub const PRIOR_Z_STDEV: f64 = 1.0;

/// Magnitude prior: Normal(0, 20) on `ln m` (a very wide log-normal).
pub const PRIOR_LOG_M_STDEV: f64 = 20.0;

/// One quasar's five-band photometric measurement.
#[derive(Debug, Clone)]
pub struct Observation {
    pub fluxes: [f64; NUM_BANDS],
    pub fluxes_ivar: [f64; NUM_BANDS],
    /// Spectroscopic redshift, when available, for validating the chain.
    pub z_true: Option<f64>,
}

impl Observation {
    pub fn new(fluxes: [f64; NUM_BANDS], fluxes_ivar: [f64; NUM_BANDS]) -> Result<Self> {
        if fluxes.iter().any(|f| !f.is_finite()) {
            return Err(Error::InvalidObservation("fluxes must be finite".into()));
        }
        if fluxes_ivar.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(Error::InvalidObservation(
                "inverse variances must be finite and non-negative".into(),
            ));
        }
        Ok(Self { fluxes, fluxes_ivar, z_true: None })
    }

    pub fn with_z_true(mut self, z: f64) -> Self {
        self.z_true = Some(z);
        self
    }
}

/// Typed view of the flat latent vector `q = [z, gamma[0..K], m]`.
#[derive(Debug, Clone)]
pub struct LatentState {
    pub z: f64,
    pub gamma: Vec<f64>,
    pub m: f64,
}

impl LatentState {
    pub fn from_flat(q: &[f64]) -> Self {
        let k = q.len() - 2;
        Self {
            z: q[0],
            gamma: q[1..=k].to_vec(),
            m: q[k + 1],
        }
    }

    pub fn to_flat(&self) -> Vec<f64> {
        let mut q = Vec::with_capacity(self.gamma.len() + 2);
        q.push(self.z);
        q.extend_from_slice(&self.gamma);
        q.push(self.m);
        q
    }

    /// Mixture weights implied by the current logits.
    pub fn weights(&self) -> Vec<f64> {
        softmax(&self.gamma)
    }
}

/// Numerically stable softmax: non-negative, sums to 1 for any real input.
pub fn softmax(gamma: &[f64]) -> Vec<f64> {
    let max = gamma.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut w: Vec<f64> = gamma.iter().map(|&g| (g - max).exp()).collect();
    let sum: f64 = w.iter().sum();
    for wi in &mut w {
        *wi /= sum;
    }
    w
}

fn normal_logpdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let d = (x - mu) / sigma;
    -0.5 * d * d - sigma.ln() - 0.5 * std::f64::consts::TAU.ln()
}

/// Log-density of the redshift prior. Decays smoothly; the hard screen at
/// `z <= -1` lives in the posterior, not here.
pub fn log_prior_z(z: f64) -> f64 {
    normal_logpdf(z, PRIOR_Z_MEAN, PRIOR_Z_STDEV)
}

/// Log-density of the weight-logit prior: standard multivariate normal.
pub fn log_prior_gamma(gamma: &[f64]) -> f64 {
    gamma.iter().map(|&g| normal_logpdf(g, 0.0, 1.0)).sum()
}

/// Log-density of the magnitude prior: Normal(0, 20) on `ln m`.
/// Non-positive magnitudes have zero prior mass.
pub fn log_prior_m(m: f64) -> f64 {
    if m <= 0.0 {
        return f64::NEG_INFINITY;
    }
    normal_logpdf(m.ln(), 0.0, PRIOR_LOG_M_STDEV)
}

/// Immutable inference context for one quasar: the trained basis, the band
/// projector, and the fixed observation. Built once, shared read-only across
/// chains. All posterior evaluations go through here.
pub struct InferenceContext {
    basis: Arc<QuasarBasis>,
    projector: Arc<dyn BandProjector>,
    obs: Observation,
}

impl InferenceContext {
    pub fn new(
        basis: Arc<QuasarBasis>,
        projector: Arc<dyn BandProjector>,
        obs: Observation,
    ) -> Self {
        Self { basis, projector, obs }
    }

    pub fn basis(&self) -> &QuasarBasis {
        &self.basis
    }

    pub fn observation(&self) -> &Observation {
        &self.obs
    }

    /// Number of basis components K.
    pub fn k(&self) -> usize {
        self.basis.k()
    }

    /// Latent dimensionality: K + 2 (redshift, K logits, magnitude).
    pub fn dim(&self) -> usize {
        self.basis.k() + 2
    }

    /// A neutral starting state: prior-mean redshift, uniform weights,
    /// unit magnitude.
    pub fn default_init(&self) -> Vec<f64> {
        let mut q = vec![0.0; self.dim()];
        q[0] = PRIOR_Z_MEAN;
        q[self.dim() - 1] = 1.0;
        q
    }

    /// Warm start from the training artifact: prior-mean redshift, logits
    /// that reproduce the training mixture weights under softmax, and the
    /// weight-averaged training magnitude.
    pub fn warm_init(&self) -> Vec<f64> {
        let mut q = Vec::with_capacity(self.dim());
        q.push(PRIOR_Z_MEAN);
        let logits: Vec<f64> = self.basis.train_weights.iter().map(|w| w.ln()).collect();
        let center = logits.iter().sum::<f64>() / logits.len() as f64;
        q.extend(logits.iter().map(|g| g - center));
        let m: f64 = self
            .basis
            .train_weights
            .iter()
            .zip(self.basis.train_mags.iter())
            .map(|(w, mag)| w * mag)
            .sum();
        q.push(m);
        q
    }

    /// Expected five-band flux for redshift `z`, mixture weights `weights`
    /// (non-negative, summing to 1), and flux normalization `m`.
    ///
    /// The rest-frame grid is redshifted by `(1 + z)`, the rest-frame
    /// spectrum synthesized from the basis, projected onto the bands, and
    /// scaled linearly by `m`.
    pub fn expected_flux(&self, z: f64, weights: &[f64], m: f64) -> [f64; NUM_BANDS] {
        assert_eq!(weights.len(), self.basis.k(), "weights length must equal K");

        let lam_obs: Vec<f64> = self.basis.lam0().iter().map(|&l| l * (1.0 + z)).collect();
        let spec = self.basis.synthesize(weights);
        let mut mu = self.projector.project(&spec, &lam_obs);
        for f in &mut mu {
            *f *= m;
        }
        mu
    }

    /// Log-posterior of the flat latent vector `q = [z, gamma.., m]`:
    /// Gaussian flux likelihood plus the three log-priors.
    ///
    /// Total function over all of R^(K+2): prior-violating states (`z <= -1`,
    /// `m <= 0`, non-finite coordinates) return `-inf` rather than panicking,
    /// so the Metropolis step can reject them.
    pub fn log_posterior(&self, q: &[f64]) -> f64 {
        assert_eq!(q.len(), self.dim(), "latent vector length must equal K + 2");

        if q.iter().any(|x| !x.is_finite()) {
            return f64::NEG_INFINITY;
        }
        let k = self.basis.k();
        let z = q[0];
        let gamma = &q[1..=k];
        let m = q[k + 1];

        // z <= -1 collapses the redshift factor; keep it off the projector.
        if z <= -1.0 || m <= 0.0 {
            return f64::NEG_INFINITY;
        }

        let weights = softmax(gamma);
        let mu = self.expected_flux(z, &weights, m);

        let mut ll = 0.0;
        for band in 0..NUM_BANDS {
            let r = self.obs.fluxes[band] - mu[band];
            ll -= 0.5 * self.obs.fluxes_ivar[band] * r * r;
        }

        let lp = ll + log_prior_z(z) + log_prior_gamma(gamma) + log_prior_m(m);
        if lp.is_nan() {
            f64::NEG_INFINITY
        } else {
            lp
        }
    }

    /// Posterior energy: negative log-posterior. `+inf` on the excluded
    /// domain, so such states always lose the accept/reject step.
    pub fn energy(&self, q: &[f64]) -> f64 {
        -self.log_posterior(q)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::basis::QuasarBasis;
    use crate::photometry::test_support::synthetic_band_system;

    /// 2-component basis over a dense rest-frame grid: a steep and a
    /// shallow continuum, both carrying the same broad emission bump at
    /// 1600 A. The bump slides through the bands as the grid redshifts, so
    /// the band fluxes identify z; the weights only trade off continuum
    /// slope and bump strength.
    pub fn synthetic_basis() -> Arc<QuasarBasis> {
        let p = 64;
        let lam0: Vec<f64> = (0..p).map(|i| 800.0 + 80.0 * i as f64).collect();
        let delta = vec![80.0; p];

        let bump = |lam: f64| (-0.5 * ((lam - 1600.0) / 250.0).powi(2)).exp();
        let mut rows = Vec::with_capacity(2 * p);
        for &lam in &lam0 {
            rows.push((-(lam - 800.0) / 700.0).exp() + bump(lam));
        }
        for &lam in &lam0 {
            rows.push((-(lam - 800.0) / 1800.0).exp() + 0.4 * bump(lam));
        }
        Arc::new(QuasarBasis::from_components(rows, 2, lam0, delta).unwrap())
    }

    /// Context whose observation is generated by the forward model itself at
    /// `(z, weights, m)` with the given relative noise level (as ivar).
    pub fn synthetic_context(z: f64, weights: &[f64], m: f64, rel_sigma: f64) -> InferenceContext {
        let basis = synthetic_basis();
        let projector = Arc::new(synthetic_band_system());
        // Build a throwaway context to evaluate the forward model.
        let probe = InferenceContext::new(
            basis.clone(),
            projector.clone(),
            Observation::new([0.0; NUM_BANDS], [0.0; NUM_BANDS]).unwrap(),
        );
        let fluxes = probe.expected_flux(z, weights, m);
        let ivar = fluxes.map(|f| {
            let sigma = rel_sigma * f.abs().max(1e-12);
            1.0 / (sigma * sigma)
        });
        let obs = Observation::new(fluxes, ivar).unwrap().with_z_true(z);
        InferenceContext::new(basis, projector, obs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_softmax_sums_to_one_and_positive() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..20 {
            let gamma: Vec<f64> = (0..6).map(|_| rng.gen_range(-30.0..30.0)).collect();
            let w = softmax(&gamma);
            let sum: f64 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "sum = {sum}");
            assert!(w.iter().all(|&wi| wi > 0.0));
        }
    }

    #[test]
    fn test_forward_model_linear_in_magnitude() {
        let ctx = test_support::synthetic_context(2.0, &[0.7, 0.3], 1000.0, 0.1);
        let f1 = ctx.expected_flux(2.0, &[0.7, 0.3], 1000.0);
        let f2 = ctx.expected_flux(2.0, &[0.7, 0.3], 2000.0);
        for band in 0..NUM_BANDS {
            assert_eq!(f2[band], 2.0 * f1[band]);
        }
    }

    #[test]
    fn test_log_posterior_rejects_invalid_domain() {
        let ctx = test_support::synthetic_context(2.0, &[0.7, 0.3], 1000.0, 0.1);
        // z = -2: redshift factor collapsed
        assert_eq!(ctx.log_posterior(&[-2.0, 0.0, 0.0, 1000.0]), f64::NEG_INFINITY);
        // m = -5: zero prior mass
        assert_eq!(ctx.log_posterior(&[2.0, 0.0, 0.0, -5.0]), f64::NEG_INFINITY);
        // non-finite coordinate
        assert_eq!(
            ctx.log_posterior(&[2.0, f64::NAN, 0.0, 1000.0]),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn test_log_posterior_peaks_at_generating_state() {
        let ctx = test_support::synthetic_context(2.0, &[0.5, 0.5], 1000.0, 0.05);
        let at_truth = ctx.log_posterior(&[2.0, 0.0, 0.0, 1000.0]);
        let off_z = ctx.log_posterior(&[2.6, 0.0, 0.0, 1000.0]);
        let off_m = ctx.log_posterior(&[2.0, 0.0, 0.0, 1600.0]);
        assert!(at_truth.is_finite());
        assert!(at_truth > off_z, "{at_truth} vs {off_z}");
        assert!(at_truth > off_m, "{at_truth} vs {off_m}");
    }

    #[test]
    fn test_warm_init_recovers_training_weights() {
        let ctx = test_support::synthetic_context(2.0, &[0.7, 0.3], 1000.0, 0.1);
        let q = ctx.warm_init();
        assert_eq!(q.len(), ctx.dim());

        let state = LatentState::from_flat(&q);
        for (wi, ti) in state.weights().iter().zip(ctx.basis().train_weights.iter()) {
            assert!((wi - ti).abs() < 1e-12, "{wi} vs {ti}");
        }
        assert!(ctx.log_posterior(&q).is_finite());
    }

    #[test]
    fn test_prior_m_zero_mass_below_zero() {
        assert_eq!(log_prior_m(0.0), f64::NEG_INFINITY);
        assert_eq!(log_prior_m(-3.0), f64::NEG_INFINITY);
        assert!(log_prior_m(1000.0).is_finite());
    }

    #[test]
    fn test_latent_state_round_trip_layout() {
        let q = vec![1.5, 0.2, -0.4, 0.9, 250.0];
        let state = LatentState::from_flat(&q);
        assert_eq!(state.z, 1.5);
        assert_eq!(state.gamma, vec![0.2, -0.4, 0.9]);
        assert_eq!(state.m, 250.0);
        assert_eq!(state.to_flat(), q);
    }
}
