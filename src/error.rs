use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by context construction and the samplers.
///
/// Domain violations inside the posterior (negative redshift, negative
/// magnitude, non-finite coordinates) are deliberately *not* errors: the
/// energy function maps them to `-inf` log-probability so the Metropolis
/// step rejects them. Only structurally broken inputs and persistently
/// broken energies land here.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A vector or matrix has the wrong length for the model it is used with.
    #[error("{what}: expected length {expected}, got {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// The basis artifact or wavelength grid is malformed.
    #[error("invalid basis: {0}")]
    InvalidBasis(String),

    /// A band sensitivity curve is malformed.
    #[error("invalid band curve: {0}")]
    InvalidBandCurve(String),

    /// Observed fluxes or inverse variances are unusable.
    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    /// A tuning parameter is outside its valid range.
    #[error("invalid sampler configuration: {0}")]
    InvalidConfig(String),

    /// The chain saw non-finite proposal energies for this many transitions
    /// in a row. A single rejected proposal is normal; a long streak almost
    /// always means the energy or gradient is broken for the supplied inputs.
    #[error("posterior energy non-finite for {consecutive} consecutive proposals")]
    NonFiniteEnergy { consecutive: usize },
}
