//! Convergence diagnostics for multi-chain runs: split R-hat and effective
//! sample size, plus a rendered summary table.
//!
//! Definitions follow Vehtari et al. (2021), "Rank-normalization, folding,
//! and localization: An improved R-hat for assessing convergence of MCMC"
//! (without the rank-normalization refinement).

use crate::sampler::SampleResult;

/// Per-coordinate diagnostic summary.
#[derive(Debug, Clone)]
pub struct ParamDiagnostics {
    pub name: String,
    pub mean: f64,
    pub std: f64,
    pub r_hat: f64,
    pub ess: f64,
}

/// Diagnostics for a full sampling run.
#[derive(Debug, Clone)]
pub struct DiagnosticsReport {
    pub params: Vec<ParamDiagnostics>,
    pub num_chains: usize,
    pub num_draws: usize,
    pub accept_rates: Vec<f64>,
}

impl DiagnosticsReport {
    pub fn from_result(result: &SampleResult) -> Self {
        let num_chains = result.samples.len();
        let num_draws = result.samples.first().map_or(0, |c| c.len());
        let n_params = result.param_names.len();

        let mut params = Vec::with_capacity(n_params);
        for pidx in 0..n_params {
            let chains: Vec<Vec<f64>> = result
                .samples
                .iter()
                .map(|chain| chain.iter().map(|draw| draw[pidx]).collect())
                .collect();

            let pooled: Vec<f64> = chains.iter().flatten().copied().collect();
            let mean = mean(&pooled);
            let std = {
                let ss: f64 = pooled.iter().map(|&v| (v - mean) * (v - mean)).sum();
                (ss / (pooled.len().saturating_sub(1)).max(1) as f64).sqrt()
            };

            params.push(ParamDiagnostics {
                name: result.param_names[pidx].clone(),
                mean,
                std,
                r_hat: split_r_hat(&chains),
                ess: effective_sample_size(&chains),
            });
        }

        Self {
            params,
            num_chains,
            num_draws,
            accept_rates: result.accept_rates.clone(),
        }
    }

    /// Render the diagnostics as a formatted table string.
    pub fn to_table(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "{} chains x {} draws per chain",
            self.num_chains, self.num_draws
        ));
        lines.push(format!(
            "{:<10} {:>12} {:>12} {:>8} {:>8}",
            "Parameter", "mean", "std", "r_hat", "ess"
        ));
        lines.push("-".repeat(54));
        for p in &self.params {
            let ess = if p.ess.is_finite() {
                format!("{:.0}", p.ess)
            } else {
                "NaN".to_string()
            };
            lines.push(format!(
                "{:<10} {:>12.4} {:>12.4} {:>8.4} {:>8}",
                p.name, p.mean, p.std, p.r_hat, ess
            ));
        }
        lines.push("-".repeat(54));

        let avg_accept = mean(&self.accept_rates);
        lines.push(format!("Mean accept rate: {avg_accept:.2}"));

        if self.params.iter().any(|p| p.r_hat > 1.05 || !p.r_hat.is_finite()) {
            lines.push("warning: R-hat > 1.05 for some parameters; chains may not have converged".into());
        }
        if self.params.iter().any(|p| p.ess < 100.0) {
            lines.push("warning: ESS < 100 for some parameters; consider more draws or retuning".into());
        }

        lines.join("\n")
    }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn variance(xs: &[f64], m: f64) -> f64 {
    if xs.len() < 2 {
        return f64::NAN;
    }
    xs.iter().map(|&x| (x - m) * (x - m)).sum::<f64>() / (xs.len() - 1) as f64
}

/// Halve every chain so within-chain trends show up as between-chain spread.
fn split(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut halves = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        let mid = chain.len() / 2;
        halves.push(chain[..mid].to_vec());
        halves.push(chain[mid..].to_vec());
    }
    halves
}

/// Split R-hat: a value near 1 is necessary (not sufficient) for convergence.
/// Chains too short to split into halves of at least two draws (below four
/// draws, including empty chains from a cancelled run) yield NaN.
pub fn split_r_hat(chains: &[Vec<f64>]) -> f64 {
    if chains.is_empty() || chains.iter().any(|c| c.len() < 4) {
        return f64::NAN;
    }
    let halves = split(chains);
    let m = halves.len() as f64;
    let n = halves[0].len() as f64;

    let half_means: Vec<f64> = halves.iter().map(|h| mean(h)).collect();
    let grand = mean(&half_means);

    let between = n / (m - 1.0)
        * half_means.iter().map(|&hm| (hm - grand) * (hm - grand)).sum::<f64>();
    let within = halves
        .iter()
        .zip(half_means.iter())
        .map(|(h, &hm)| variance(h, hm))
        .sum::<f64>()
        / m;

    if within < 1e-30 {
        return f64::NAN;
    }
    (((n - 1.0) / n * within + between / n) / within).sqrt()
}

/// Effective sample size via Geyer's initial positive sequence of
/// autocorrelation pair sums, over split chains. NaN for chains too short
/// to split, matching `split_r_hat`.
pub fn effective_sample_size(chains: &[Vec<f64>]) -> f64 {
    if chains.is_empty() || chains.iter().any(|c| c.len() < 4) {
        return f64::NAN;
    }
    let halves = split(chains);
    let m = halves.len() as f64;
    // Chains stopped by cancellation can differ in length; index by the
    // shortest half.
    let n = halves.iter().map(|h| h.len()).min().unwrap_or(0);
    let n_f = n as f64;

    let half_means: Vec<f64> = halves.iter().map(|h| mean(h)).collect();
    let within = halves
        .iter()
        .zip(half_means.iter())
        .map(|(h, &hm)| variance(h, hm))
        .sum::<f64>()
        / m;
    if within < 1e-30 {
        return f64::NAN;
    }

    let rho = |lag: usize| -> f64 {
        let mut acc = 0.0;
        for (half, &hm) in halves.iter().zip(half_means.iter()) {
            for t in 0..n - lag {
                acc += (half[t] - hm) * (half[t + lag] - hm);
            }
        }
        1.0 - (within - acc / (m * (n_f - 1.0))) / within
    };

    let mut tau = -1.0f64;
    let mut lag = 1;
    while lag + 1 < n {
        let pair = rho(lag) + rho(lag + 1);
        if pair < 0.0 {
            break;
        }
        tau += pair;
        lag += 2;
    }
    tau = tau.max(1.0 / (m * n_f));

    m * n_f / (1.0 + 2.0 * tau)
}
