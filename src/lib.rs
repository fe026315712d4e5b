//! Posterior inference of quasar redshift, rest-frame spectral composition,
//! and flux normalization from five-band photometry.
//!
//! A pre-trained low-rank basis of rest-frame quasar spectra (K components
//! over P wavelengths) defines a generative forward model: redshift the
//! grid, mix the basis with softmax weights, project through the band
//! sensitivity curves, scale by a magnitude. A fixed-tuning Hamiltonian
//! Monte Carlo sampler draws from the resulting posterior over
//! `(z, gamma, m)` given one quasar's observed fluxes.
//!
//! Typical use: build a [`basis::QuasarBasis`] from the fit artifact, wrap
//! it with a projector and an observation in a [`model::InferenceContext`],
//! then call [`sampler::sample`] and summarize with
//! [`diagnostics::DiagnosticsReport`].

pub mod basis;
pub mod diagnostics;
pub mod error;
pub mod gradient;
pub mod hmc;
pub mod model;
pub mod photometry;
pub mod sampler;

pub use error::{Error, Result};
