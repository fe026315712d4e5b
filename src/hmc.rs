use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{Error, Result};
use crate::gradient::{grad_log_posterior, FdSteps};
use crate::model::InferenceContext;

/// Fixed diagonal inverse mass matrix for the leapfrog dynamics.
///
/// The latent coordinates live at wildly different scales (redshift O(1),
/// magnitude O(10^3..10^4)), so a per-coordinate mass is how the step size
/// is matched to each coordinate. Supplied as configuration; never adapted.
#[derive(Debug, Clone)]
pub struct DiagMass {
    inv_mass: Vec<f64>,
}

impl DiagMass {
    pub fn identity(dim: usize) -> Self {
        Self { inv_mass: vec![1.0; dim] }
    }

    pub fn new(inv_mass: Vec<f64>) -> Result<Self> {
        if inv_mass.iter().any(|&v| !v.is_finite() || v <= 0.0) {
            return Err(Error::InvalidConfig(
                "inverse mass entries must be positive and finite".into(),
            ));
        }
        Ok(Self { inv_mass })
    }

    pub fn dim(&self) -> usize {
        self.inv_mass.len()
    }

    /// Draw momentum `p ~ N(0, M)`: per-coordinate sigma `1 / sqrt(inv_m)`.
    fn sample_momentum(&self, rng: &mut ChaCha8Rng) -> Vec<f64> {
        self.inv_mass
            .iter()
            .map(|&inv_m| {
                let z: f64 = StandardNormal.sample(rng);
                z / inv_m.sqrt()
            })
            .collect()
    }

    /// Kinetic energy `0.5 * p^T M^{-1} p`.
    fn kinetic(&self, p: &[f64]) -> f64 {
        0.5 * self
            .inv_mass
            .iter()
            .zip(p.iter())
            .map(|(&inv_m, &pi)| inv_m * pi * pi)
            .sum::<f64>()
    }

    /// Velocity `dq/dt = M^{-1} p`.
    fn velocity(&self, i: usize, p: f64) -> f64 {
        self.inv_mass[i] * p
    }
}

/// Configuration for a single HMC chain. All tuning is fixed up front:
/// there is deliberately no step-size or mass-matrix adaptation.
#[derive(Debug, Clone)]
pub struct HmcConfig {
    /// Leapfrog step size epsilon.
    pub step_size: f64,
    /// Leapfrog steps per proposed transition.
    pub num_leapfrog_steps: usize,
    /// Number of chain entries to emit.
    pub num_draws: usize,
    /// Finite-difference steps for the gradient estimator.
    pub fd_steps: FdSteps,
    /// Diagonal inverse mass; `None` means identity.
    pub inv_mass: Option<Vec<f64>>,
    /// Abort the chain after this many consecutive non-finite proposal
    /// energies.
    pub max_nonfinite_streak: usize,
}

impl Default for HmcConfig {
    fn default() -> Self {
        Self {
            // Conservative defaults; callers are expected to retune per
            // problem, typically with a non-identity mass.
            step_size: 1e-5,
            num_leapfrog_steps: 10,
            num_draws: 1000,
            fd_steps: FdSteps::default(),
            inv_mass: None,
            max_nonfinite_streak: 100,
        }
    }
}

/// One chain's output. The chain has exactly one entry per requested draw
/// (rejections repeat the previous state) unless it was cancelled early.
#[derive(Debug, Clone)]
pub struct ChainResult {
    /// samples[draw][coord], coord layout `[z, gamma.., m]`.
    pub samples: Vec<Vec<f64>>,
    /// Log-posterior of each emitted sample.
    pub log_probs: Vec<f64>,
    pub accept_rate: f64,
    pub cancelled: bool,
}

/// Metropolis acceptance probability `min(1, exp(log_accept))`, always in
/// [0, 1]. A NaN ratio (broken trajectory, e.g. inf - inf in the
/// Hamiltonian difference) is treated as a certain rejection.
#[inline]
pub fn accept_probability(log_accept: f64) -> f64 {
    if log_accept.is_nan() {
        return 0.0;
    }
    log_accept.min(0.0).exp()
}

/// Run one HMC chain over the posterior defined by `ctx`.
///
/// The context is read-only during sampling; each chain owns its RNG and
/// its position/momentum buffers. `cancel`, when set, is checked between
/// samples (never mid-trajectory) and stops the chain cooperatively.
pub fn run_chain(
    ctx: &InferenceContext,
    config: &HmcConfig,
    rng: &mut ChaCha8Rng,
    init: Option<Vec<f64>>,
    cancel: Option<&AtomicBool>,
) -> Result<ChainResult> {
    let dim = ctx.dim();
    let q0 = init.unwrap_or_else(|| ctx.default_init());
    if q0.len() != dim {
        return Err(Error::DimensionMismatch {
            what: "initial latent vector",
            expected: dim,
            found: q0.len(),
        });
    }
    let mass = match &config.inv_mass {
        Some(v) => {
            let mass = DiagMass::new(v.clone())?;
            if mass.dim() != dim {
                return Err(Error::DimensionMismatch {
                    what: "inverse mass",
                    expected: dim,
                    found: mass.dim(),
                });
            }
            mass
        }
        None => DiagMass::identity(dim),
    };
    if !config.step_size.is_finite() || config.step_size <= 0.0 {
        return Err(Error::InvalidConfig(format!(
            "step size must be positive, got {}",
            config.step_size
        )));
    }

    let eps = config.step_size;
    let mut q = q0;
    let mut samples = Vec::with_capacity(config.num_draws);
    let mut log_probs = Vec::with_capacity(config.num_draws);
    let mut accepted = 0u64;
    let mut total = 0u64;
    let mut nonfinite_streak = 0usize;
    let mut cancelled = false;

    let mut logp_current = ctx.log_posterior(&q);

    for _ in 0..config.num_draws {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
        }

        // Fresh momentum for every transition; discarded afterwards.
        let p = mass.sample_momentum(rng);

        let mut q_prop = q.clone();
        let mut p_prop = p.clone();
        let mut grad = grad_log_posterior(ctx, &q_prop, &config.fd_steps);

        // Half step for momentum
        for i in 0..dim {
            p_prop[i] += 0.5 * eps * grad[i];
        }

        for step in 0..config.num_leapfrog_steps {
            // Full step for position
            for i in 0..dim {
                q_prop[i] += eps * mass.velocity(i, p_prop[i]);
            }

            grad = grad_log_posterior(ctx, &q_prop, &config.fd_steps);

            // Full step for momentum (except at trajectory end)
            if step < config.num_leapfrog_steps - 1 {
                for i in 0..dim {
                    p_prop[i] += eps * grad[i];
                }
            }
        }

        // Closing half step for momentum
        for i in 0..dim {
            p_prop[i] += 0.5 * eps * grad[i];
        }

        // Momentum negation for reversibility; kinetic energy is symmetric
        // so the acceptance ratio is unchanged.
        for pi in &mut p_prop {
            *pi = -*pi;
        }

        let logp_prop = ctx.log_posterior(&q_prop);
        if logp_prop.is_finite() {
            nonfinite_streak = 0;
        } else {
            nonfinite_streak += 1;
            if nonfinite_streak >= config.max_nonfinite_streak {
                return Err(Error::NonFiniteEnergy { consecutive: nonfinite_streak });
            }
        }

        let h_current = -logp_current + mass.kinetic(&p);
        let h_prop = -logp_prop + mass.kinetic(&p_prop);
        let accept_prob = accept_probability(h_current - h_prop);

        total += 1;
        if rng.gen::<f64>() < accept_prob {
            q = q_prop;
            logp_current = logp_prop;
            accepted += 1;
        }

        samples.push(q.clone());
        log_probs.push(logp_current);
    }

    Ok(ChainResult {
        samples,
        log_probs,
        accept_rate: if total > 0 { accepted as f64 / total as f64 } else { 0.0 },
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::synthetic_context;
    use rand::SeedableRng;
    use std::sync::atomic::AtomicBool;

    fn test_config() -> HmcConfig {
        HmcConfig {
            step_size: 0.01,
            num_leapfrog_steps: 5,
            num_draws: 50,
            fd_steps: FdSteps::default(),
            inv_mass: Some(vec![1.0, 1.0, 1.0, 1.0e6]),
            max_nonfinite_streak: 100,
        }
    }

    #[test]
    fn test_chain_has_exactly_requested_length() {
        let ctx = synthetic_context(2.0, &[0.7, 0.3], 1000.0, 0.1);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let init = vec![2.0, 0.0, 0.0, 1000.0];
        let result = run_chain(&ctx, &test_config(), &mut rng, Some(init), None).unwrap();
        assert_eq!(result.samples.len(), 50);
        assert_eq!(result.log_probs.len(), 50);
        assert!(!result.cancelled);
    }

    #[test]
    fn test_accept_probability_bounds() {
        assert_eq!(accept_probability(0.0), 1.0);
        assert_eq!(accept_probability(5.0), 1.0);
        assert!(accept_probability(-1.0) > 0.0 && accept_probability(-1.0) < 1.0);
        assert_eq!(accept_probability(f64::NEG_INFINITY), 0.0);
        assert_eq!(accept_probability(f64::NAN), 0.0);
        for la in [-3.0, -0.5, 0.0, 0.5, 3.0, f64::INFINITY] {
            let a = accept_probability(la);
            assert!((0.0..=1.0).contains(&a), "p = {a} at log_accept = {la}");
        }
    }

    #[test]
    fn test_chain_is_deterministic_per_seed() {
        let ctx = synthetic_context(2.0, &[0.7, 0.3], 1000.0, 0.1);
        let init = vec![2.2, 0.1, -0.1, 900.0];

        let mut rng1 = ChaCha8Rng::seed_from_u64(99);
        let r1 = run_chain(&ctx, &test_config(), &mut rng1, Some(init.clone()), None).unwrap();
        let mut rng2 = ChaCha8Rng::seed_from_u64(99);
        let r2 = run_chain(&ctx, &test_config(), &mut rng2, Some(init), None).unwrap();

        assert_eq!(r1.samples, r2.samples);
        assert_eq!(r1.accept_rate, r2.accept_rate);
    }

    #[test]
    fn test_rejections_repeat_previous_state() {
        let ctx = synthetic_context(2.0, &[0.7, 0.3], 1000.0, 0.1);
        // Absurd step size: essentially every proposal diverges and rejects.
        let config = HmcConfig {
            step_size: 100.0,
            num_leapfrog_steps: 5,
            num_draws: 10,
            inv_mass: Some(vec![1.0, 1.0, 1.0, 1.0e6]),
            ..HmcConfig::default()
        };
        let init = vec![2.0, 0.0, 0.0, 1000.0];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let result = run_chain(&ctx, &config, &mut rng, Some(init.clone()), None).unwrap();
        assert_eq!(result.samples.len(), 10);
        for s in &result.samples {
            assert_eq!(s, &init, "rejected draws must carry the state forward");
        }
        assert_eq!(result.accept_rate, 0.0);
    }

    #[test]
    fn test_wrong_init_dimension_fails_fast() {
        let ctx = synthetic_context(2.0, &[0.7, 0.3], 1000.0, 0.1);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = run_chain(&ctx, &test_config(), &mut rng, Some(vec![2.0, 0.0]), None);
        assert!(matches!(err, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_cancellation_between_samples() {
        let ctx = synthetic_context(2.0, &[0.7, 0.3], 1000.0, 0.1);
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let flag = AtomicBool::new(true);
        let result = run_chain(&ctx, &test_config(), &mut rng, None, Some(&flag)).unwrap();
        assert!(result.cancelled);
        assert!(result.samples.is_empty());
    }
}
