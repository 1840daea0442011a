//! Band-wise distances between hyperplane sets and entity embeddings.
//!
//! A band is a set of hyperplanes. An entity lies inside the band when its
//! dot product with every hyperplane normal is positive, so a distance maps
//! the `(batch, bands, hyperplanes)` dot products to `(batch, bands)`, zero
//! (or lower) for entities on the positive side of all hyperplanes.

use std::fmt;

use candle_core::{Tensor, D};

use crate::config::{BandDistanceKind, LossConfig};
use crate::error::{Error, Result};

/// Distance from dot products to a per-band score.
pub trait BandDistance {
    /// `(batch, bands, hyperplanes)` -> `(batch, bands)`.
    fn distance(&self, dot: &Tensor) -> Result<Tensor>;
}

/// `1 - mean_h sigmoid(dot_h)`, bounded in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SigmoidDistance;

impl BandDistance for SigmoidDistance {
    fn distance(&self, dot: &Tensor) -> Result<Tensor> {
        let activated = candle_nn::ops::sigmoid(dot)?;
        Ok(activated.mean(D::Minus1)?.affine(-1.0, 1.0)?)
    }
}

impl fmt::Display for SigmoidDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigmoidDistance")
    }
}

/// Sum of a mirrored leaky ReLU over a band's hyperplanes.
///
/// ```text
/// a(x) = -min(x, 0) - slope · max(x, 0)
/// ```
///
/// Negative dot products are penalised linearly; positive ones earn a small
/// unbounded reward. Summing (not averaging) makes the distance scale with
/// the number of hyperplanes per band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvLeakyReluDistance {
    slope: f64,
}

impl InvLeakyReluDistance {
    /// Default positive slope.
    pub const DEFAULT_SLOPE: f64 = 1e-3;

    /// Create with the given positive-side slope.
    pub fn new(slope: f64) -> Result<Self> {
        if !slope.is_finite() || slope < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "inv_leaky_relu slope must be finite and non-negative, got {slope}"
            )));
        }
        Ok(Self { slope })
    }

    /// Positive-side slope.
    pub fn slope(&self) -> f64 {
        self.slope
    }
}

impl Default for InvLeakyReluDistance {
    fn default() -> Self {
        Self {
            slope: Self::DEFAULT_SLOPE,
        }
    }
}

impl BandDistance for InvLeakyReluDistance {
    fn distance(&self, dot: &Tensor) -> Result<Tensor> {
        let below = dot.minimum(0.0)?.neg()?;
        let above = dot.relu()?.affine(self.slope, 0.0)?;
        Ok((below - above)?.sum(D::Minus1)?)
    }
}

impl fmt::Display for InvLeakyReluDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvLeakyReluDistance(slope={})", self.slope)
    }
}

/// The configured distance, one of the two implemented variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distance {
    /// See [`SigmoidDistance`].
    Sigmoid(SigmoidDistance),
    /// See [`InvLeakyReluDistance`].
    InvLeakyRelu(InvLeakyReluDistance),
}

impl Distance {
    /// Build from a loss configuration.
    pub fn from_config(config: &LossConfig) -> Result<Self> {
        Ok(match config.distance {
            BandDistanceKind::Sigmoid => Self::Sigmoid(SigmoidDistance),
            BandDistanceKind::InvLeakyRelu => {
                Self::InvLeakyRelu(InvLeakyReluDistance::new(config.inv_leaky_relu_slope)?)
            }
        })
    }

    /// Which variant this is.
    pub fn kind(&self) -> BandDistanceKind {
        match self {
            Self::Sigmoid(_) => BandDistanceKind::Sigmoid,
            Self::InvLeakyRelu(_) => BandDistanceKind::InvLeakyRelu,
        }
    }
}

impl BandDistance for Distance {
    fn distance(&self, dot: &Tensor) -> Result<Tensor> {
        match self {
            Self::Sigmoid(d) => d.distance(dot),
            Self::InvLeakyRelu(d) => d.distance(dot),
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sigmoid(d) => fmt::Display::fmt(d, f),
            Self::InvLeakyRelu(d) => fmt::Display::fmt(d, f),
        }
    }
}
