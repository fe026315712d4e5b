use std::ops::Range;

use crate::error::{Error, Result};

/// Named slices into the flat parameter vector of a basis-fit artifact.
///
/// The upstream fitting code stores per-component magnitude offsets (`mus`),
/// basis logits (`betas`, K×P row-major) and weight logits (`omegas`) in one
/// long vector. The layout is resolved once here, at load time, instead of
/// by name lookup on every access.
#[derive(Debug, Clone)]
pub struct ParamLayout {
    pub mus: Range<usize>,
    pub betas: Range<usize>,
    pub omegas: Range<usize>,
    /// Number of basis components.
    pub k: usize,
    /// Number of rest-frame wavelength samples.
    pub p: usize,
}

impl ParamLayout {
    /// Contiguous layout `[mus | betas | omegas]` for K components over P
    /// wavelength samples.
    pub fn contiguous(k: usize, p: usize) -> Self {
        let mus = 0..k;
        let betas = k..k + k * p;
        let omegas = k + k * p..k + k * p + k;
        Self { mus, betas, omegas, k, p }
    }

    fn check(&self, params_len: usize) -> Result<()> {
        if self.mus.len() != self.k {
            return Err(Error::DimensionMismatch {
                what: "layout.mus",
                expected: self.k,
                found: self.mus.len(),
            });
        }
        if self.betas.len() != self.k * self.p {
            return Err(Error::DimensionMismatch {
                what: "layout.betas",
                expected: self.k * self.p,
                found: self.betas.len(),
            });
        }
        if self.omegas.len() != self.k {
            return Err(Error::DimensionMismatch {
                what: "layout.omegas",
                expected: self.k,
                found: self.omegas.len(),
            });
        }
        let end = self
            .mus
            .end
            .max(self.betas.end)
            .max(self.omegas.end);
        if end > params_len {
            return Err(Error::DimensionMismatch {
                what: "layout over parameter vector",
                expected: end,
                found: params_len,
            });
        }
        Ok(())
    }
}

/// Raw basis-fit artifact as produced by the upstream training run: a flat
/// parameter vector, the rest-frame wavelength grid, and the layout mapping
/// names to slices. Loading this from disk is out of scope; callers hand the
/// already-deserialized arrays over.
#[derive(Debug, Clone)]
pub struct BasisFit {
    pub params: Vec<f64>,
    pub lam0: Vec<f64>,
    pub lam0_delta: Vec<f64>,
    pub layout: ParamLayout,
}

/// Pre-trained low-rank quasar spectrum basis.
///
/// `b` holds K non-negative rest-frame components (row-major K×P), each row
/// normalized so that `Σ_p b[k][p] * lam0_delta[p] == 1`.
#[derive(Debug, Clone)]
pub struct QuasarBasis {
    b: Vec<f64>,
    k: usize,
    p: usize,
    lam0: Vec<f64>,
    lam0_delta: Vec<f64>,
    /// Training-time mixture weights (softmax of omegas). Consumed by the
    /// warm-start initializer; not used by the energy itself.
    pub train_weights: Vec<f64>,
    /// Training-time per-component magnitudes (exp of mus).
    pub train_mags: Vec<f64>,
}

impl QuasarBasis {
    /// Derive the normalized basis from a fit artifact.
    ///
    /// `B = exp(betas)` row-normalized against the grid spacings,
    /// `W = exp(omegas)` normalized to sum to 1, `M = exp(mus)`.
    pub fn from_fit(fit: &BasisFit) -> Result<Self> {
        let layout = &fit.layout;
        layout.check(fit.params.len())?;
        check_grid(&fit.lam0, &fit.lam0_delta, layout.p)?;

        let betas = &fit.params[layout.betas.clone()];
        let raw: Vec<f64> = betas.iter().map(|&x| x.exp()).collect();

        let omegas = &fit.params[layout.omegas.clone()];
        let mut train_weights: Vec<f64> = omegas.iter().map(|&x| x.exp()).collect();
        let wsum: f64 = train_weights.iter().sum();
        for w in &mut train_weights {
            *w /= wsum;
        }

        let train_mags: Vec<f64> = fit.params[layout.mus.clone()]
            .iter()
            .map(|&x| x.exp())
            .collect();

        let mut basis = Self {
            b: raw,
            k: layout.k,
            p: layout.p,
            lam0: fit.lam0.clone(),
            lam0_delta: fit.lam0_delta.clone(),
            train_weights,
            train_mags,
        };
        basis.normalize_rows()?;
        Ok(basis)
    }

    /// Build a basis directly from K non-negative component rows (row-major
    /// K×P). Rows are normalized to integrate to 1 over the grid.
    pub fn from_components(
        rows: Vec<f64>,
        k: usize,
        lam0: Vec<f64>,
        lam0_delta: Vec<f64>,
    ) -> Result<Self> {
        if k == 0 || rows.len() % k != 0 {
            return Err(Error::DimensionMismatch {
                what: "basis rows",
                expected: k.max(1),
                found: rows.len(),
            });
        }
        let p = rows.len() / k;
        check_grid(&lam0, &lam0_delta, p)?;
        if rows.iter().any(|&x| !x.is_finite() || x < 0.0) {
            return Err(Error::InvalidBasis(
                "component values must be finite and non-negative".into(),
            ));
        }

        let mut basis = Self {
            b: rows,
            k,
            p,
            lam0,
            lam0_delta,
            train_weights: vec![1.0 / k as f64; k],
            train_mags: vec![1.0; k],
        };
        basis.normalize_rows()?;
        Ok(basis)
    }

    fn normalize_rows(&mut self) -> Result<()> {
        for row in 0..self.k {
            let start = row * self.p;
            let norm: f64 = self.b[start..start + self.p]
                .iter()
                .zip(self.lam0_delta.iter())
                .map(|(&b, &d)| b * d)
                .sum();
            if !norm.is_finite() || norm <= 0.0 {
                return Err(Error::InvalidBasis(format!(
                    "component {row} has non-positive integral {norm}"
                )));
            }
            for b in &mut self.b[start..start + self.p] {
                *b /= norm;
            }
        }
        Ok(())
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn p(&self) -> usize {
        self.p
    }

    pub fn lam0(&self) -> &[f64] {
        &self.lam0
    }

    pub fn lam0_delta(&self) -> &[f64] {
        &self.lam0_delta
    }

    pub fn component(&self, row: usize) -> &[f64] {
        &self.b[row * self.p..(row + 1) * self.p]
    }

    /// Rest-frame spectrum for the given mixture weights: `spec = w · B`.
    pub fn synthesize(&self, weights: &[f64]) -> Vec<f64> {
        debug_assert_eq!(weights.len(), self.k);
        let mut spec = vec![0.0; self.p];
        for (row, &w) in weights.iter().enumerate() {
            let comp = self.component(row);
            for (s, &b) in spec.iter_mut().zip(comp.iter()) {
                *s += w * b;
            }
        }
        spec
    }
}

fn check_grid(lam0: &[f64], lam0_delta: &[f64], p: usize) -> Result<()> {
    if lam0.len() != p {
        return Err(Error::DimensionMismatch {
            what: "lam0",
            expected: p,
            found: lam0.len(),
        });
    }
    if lam0_delta.len() != p {
        return Err(Error::DimensionMismatch {
            what: "lam0_delta",
            expected: p,
            found: lam0_delta.len(),
        });
    }
    if !lam0.windows(2).all(|w| w[0] < w[1]) {
        return Err(Error::InvalidBasis(
            "lam0 must be strictly increasing".into(),
        ));
    }
    if lam0_delta.iter().any(|&d| !d.is_finite() || d <= 0.0) {
        return Err(Error::InvalidBasis(
            "lam0_delta must be positive and finite".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid5() -> (Vec<f64>, Vec<f64>) {
        (
            vec![1000.0, 2000.0, 3000.0, 4000.0, 5000.0],
            vec![1000.0; 5],
        )
    }

    #[test]
    fn test_rows_normalize_to_unit_integral() {
        let (lam0, delta) = grid5();
        let rows = vec![5.0, 4.0, 3.0, 2.0, 1.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let basis = QuasarBasis::from_components(rows, 2, lam0, delta.clone()).unwrap();

        for row in 0..2 {
            let integral: f64 = basis
                .component(row)
                .iter()
                .zip(delta.iter())
                .map(|(&b, &d)| b * d)
                .sum();
            assert!((integral - 1.0).abs() < 1e-12, "row {row}: {integral}");
        }
    }

    #[test]
    fn test_from_fit_resolves_layout_once() {
        let (lam0, delta) = grid5();
        let layout = ParamLayout::contiguous(2, 5);
        let mut params = vec![0.0; 2 + 10 + 2];
        // betas chosen so exp() gives distinguishable rows
        for (i, v) in params[layout.betas.clone()].iter_mut().enumerate() {
            *v = (i as f64) * 0.1;
        }
        let fit = BasisFit { params, lam0, lam0_delta: delta, layout };

        let basis = QuasarBasis::from_fit(&fit).unwrap();
        assert_eq!(basis.k(), 2);
        assert_eq!(basis.p(), 5);
        let wsum: f64 = basis.train_weights.iter().sum();
        assert!((wsum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_dimension_mismatch_fails_fast() {
        let (lam0, delta) = grid5();
        let err = QuasarBasis::from_components(vec![1.0; 9], 2, lam0, delta);
        assert!(matches!(err, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_unsorted_grid_rejected() {
        let lam0 = vec![1000.0, 3000.0, 2000.0, 4000.0, 5000.0];
        let delta = vec![1000.0; 5];
        let err = QuasarBasis::from_components(vec![1.0; 10], 2, lam0, delta);
        assert!(matches!(err, Err(Error::InvalidBasis(_))));
    }

    #[test]
    fn test_synthesize_is_convex_mix_of_rows() {
        let (lam0, delta) = grid5();
        let rows = vec![5.0, 4.0, 3.0, 2.0, 1.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let basis = QuasarBasis::from_components(rows, 2, lam0, delta).unwrap();

        let spec = basis.synthesize(&[0.25, 0.75]);
        for i in 0..5 {
            let expect = 0.25 * basis.component(0)[i] + 0.75 * basis.component(1)[i];
            assert!((spec[i] - expect).abs() < 1e-14);
        }
    }
}
