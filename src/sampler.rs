use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::error::Result;
use crate::gradient::FdSteps;
use crate::hmc::{self, ChainResult, HmcConfig};
use crate::model::InferenceContext;

/// Configuration for the multi-chain sampler.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub num_chains: usize,
    pub num_draws: usize,
    pub step_size: f64,
    pub num_leapfrog_steps: usize,
    pub fd_steps: FdSteps,
    /// Diagonal inverse mass, length K+2; `None` means identity.
    pub inv_mass: Option<Vec<f64>>,
    pub seed: u64,
    pub max_nonfinite_streak: usize,
    /// Number of threads. 0 means use Rayon's default (all cores).
    pub num_threads: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            num_chains: 4,
            num_draws: 1000,
            step_size: 1e-5,
            num_leapfrog_steps: 10,
            fd_steps: FdSteps::default(),
            inv_mass: None,
            seed: 42,
            max_nonfinite_streak: 100,
            num_threads: 0,
        }
    }
}

/// Posterior samples across all chains.
#[derive(Debug, Clone)]
pub struct SampleResult {
    /// samples[chain][draw][coord]
    pub samples: Vec<Vec<Vec<f64>>>,
    /// log_probs[chain][draw]
    pub log_probs: Vec<Vec<f64>>,
    pub accept_rates: Vec<f64>,
    pub param_names: Vec<String>,
}

impl SampleResult {
    /// Posterior mean per coordinate, pooled over chains.
    pub fn mean(&self) -> Vec<f64> {
        let n_params = self.param_names.len();
        let mut sums = vec![0.0; n_params];
        let mut count = 0usize;

        for chain in &self.samples {
            for draw in chain {
                for (s, &v) in sums.iter_mut().zip(draw.iter()) {
                    *s += v;
                }
                count += 1;
            }
        }

        sums.iter().map(|s| s / count as f64).collect()
    }

    /// Posterior standard deviation per coordinate, pooled over chains.
    pub fn std(&self) -> Vec<f64> {
        let means = self.mean();
        let n_params = self.param_names.len();
        let mut sum_sq = vec![0.0; n_params];
        let mut count = 0usize;

        for chain in &self.samples {
            for draw in chain {
                for (i, &v) in draw.iter().enumerate() {
                    let d = v - means[i];
                    sum_sq[i] += d * d;
                }
                count += 1;
            }
        }

        sum_sq.iter().map(|s| (s / count as f64).sqrt()).collect()
    }
}

/// Coordinate names for a K-component latent vector.
pub fn param_names(k: usize) -> Vec<String> {
    let mut names = Vec::with_capacity(k + 2);
    names.push("z".to_string());
    for i in 0..k {
        names.push(format!("gamma[{i}]"));
    }
    names.push("m".to_string());
    names
}

/// Run independent HMC chains over one quasar's posterior.
///
/// Chains only share the read-only context behind an `Arc`; each gets its
/// own position/momentum buffers and a deterministic RNG seeded
/// `config.seed + chain_index`, so results are reproducible regardless of
/// thread scheduling. The optional `cancel` flag stops every chain at its
/// next sample boundary.
pub fn sample(
    ctx: Arc<InferenceContext>,
    config: &SamplerConfig,
    init: Option<Vec<f64>>,
    cancel: Option<&AtomicBool>,
) -> Result<SampleResult> {
    if config.num_threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build_global()
            .ok();
    }

    let hmc_config = HmcConfig {
        step_size: config.step_size,
        num_leapfrog_steps: config.num_leapfrog_steps,
        num_draws: config.num_draws,
        fd_steps: config.fd_steps.clone(),
        inv_mass: config.inv_mass.clone(),
        max_nonfinite_streak: config.max_nonfinite_streak,
    };

    let chain_indices: Vec<usize> = (0..config.num_chains).collect();

    let results: Result<Vec<ChainResult>> = chain_indices
        .par_iter()
        .map(|&chain_idx| {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed + chain_idx as u64);
            hmc::run_chain(&ctx, &hmc_config, &mut rng, init.clone(), cancel)
        })
        .collect();
    let results = results?;

    Ok(SampleResult {
        samples: results.iter().map(|r| r.samples.clone()).collect(),
        log_probs: results.iter().map(|r| r.log_probs.clone()).collect(),
        accept_rates: results.iter().map(|r| r.accept_rate).collect(),
        param_names: param_names(ctx.k()),
    })
}
