use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::model::InferenceContext;

/// Per-coordinate-class finite-difference step sizes.
///
/// Redshift and logits live at O(1) while the magnitude lives at O(10^3) or
/// more, so a single step size cannot serve all coordinates: too large
/// biases the quotient, too small loses the difference to cancellation.
#[derive(Debug, Clone)]
pub struct FdSteps {
    pub delta_z: f64,
    pub delta_gamma: f64,
    pub delta_m: f64,
}

impl Default for FdSteps {
    fn default() -> Self {
        Self {
            delta_z: 0.01,
            delta_gamma: 0.01,
            delta_m: 1.0,
        }
    }
}

impl FdSteps {
    /// Step size for coordinate `i` of a K+2 latent vector.
    pub fn for_coord(&self, i: usize, k: usize) -> f64 {
        if i == 0 {
            self.delta_z
        } else if i <= k {
            self.delta_gamma
        } else {
            self.delta_m
        }
    }
}

/// Gradient of the log-posterior by symmetric finite differences, one
/// centered quotient per coordinate. Output ordering matches `q`:
/// redshift first, then the K weight logits, then the magnitude.
///
/// If a probe lands in the zero-prior region its log-posterior is `-inf` and
/// the quotient goes non-finite; the sampler's accept test rejects whatever
/// trajectory that produces, so no screening happens here.
pub fn grad_log_posterior(ctx: &InferenceContext, q: &[f64], steps: &FdSteps) -> Vec<f64> {
    let k = ctx.k();
    let mut grad = vec![0.0; q.len()];
    let mut probe = q.to_vec();

    for i in 0..q.len() {
        let h = steps.for_coord(i, k);
        probe[i] = q[i] + h;
        let upper = ctx.log_posterior(&probe);
        probe[i] = q[i] - h;
        let lower = ctx.log_posterior(&probe);
        probe[i] = q[i];
        grad[i] = (upper - lower) / (2.0 * h);
    }

    grad
}

/// Check the finite-difference gradient against a directional derivative
/// along a random unit direction, probed at `±1e-4`. Returns the relative
/// difference `(nd - ad) / |nd|`.
pub fn directional_check(
    ctx: &InferenceContext,
    q: &[f64],
    steps: &FdSteps,
    rng: &mut impl Rng,
) -> f64 {
    let mut dir: Vec<f64> = (0..q.len()).map(|_| StandardNormal.sample(rng)).collect();
    let norm: f64 = dir.iter().map(|d| d * d).sum::<f64>().sqrt();
    for d in &mut dir {
        *d /= norm;
    }

    let probe = |t: f64| {
        let shifted: Vec<f64> = q.iter().zip(dir.iter()).map(|(&qi, &di)| qi + t * di).collect();
        ctx.log_posterior(&shifted)
    };
    let nd = (probe(1e-4) - probe(-1e-4)) / 2e-4;

    let grad = grad_log_posterior(ctx, q, steps);
    let ad: f64 = grad.iter().zip(dir.iter()).map(|(&g, &d)| g * d).sum();

    (nd - ad) / nd.abs()
}
