//! Answer-space loss over hyperplane bands.
//!
//! A query is embedded as `num_bands` candidate regions, each bounded by
//! `num_hyperplanes` hyperplanes. The loss pulls the positive answer into
//! *some* band and pushes the negative sample out of *every* band:
//!
//! ```text
//! d⁺_b = dist(H_b · e⁺)          d⁻_b = dist(H_b · e⁻)
//! loss = mean_batch( AGG_b(d⁺_b) - mean_b(d⁻_b) )
//! ```
//!
//! `AGG` is the soft existential over bands:
//!
//! | Aggregation | Behaviour |
//! |-------------|-----------|
//! | `min`       | only the closest band is trained (exploitation) |
//! | `mean`      | all bands trained equally (exploration) |
//! | `softmin`   | `mean_b(d_b · softmin(d)_b)`: closest bands dominate, every band keeps a gradient |
//!
//! The loss is not clamped and goes negative once negatives sit further out
//! than positives.

use std::fmt;

use candle_core::{Tensor, D};
use tracing::{debug, trace};

use crate::config::{BandAggregation, LossConfig};
use crate::distance::{BandDistance, Distance};
use crate::error::{Error, Result};

impl BandAggregation {
    /// Reduce `(batch, bands)` distances to `(batch,)`.
    pub fn aggregate(&self, distances: &Tensor) -> Result<Tensor> {
        let out = match self {
            Self::Min => distances.min(D::Minus1)?,
            Self::Mean => distances.mean(D::Minus1)?,
            Self::Softmin => {
                let weights = candle_nn::ops::softmax(&distances.neg()?, D::Minus1)?;
                (distances * weights)?.mean(D::Minus1)?
            }
        };
        Ok(out)
    }
}

/// Scalar loss plus detached batch means for monitoring.
#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Scalar loss, attached to the graph.
    pub loss: Tensor,
    /// Batch mean of the aggregated positive distance.
    pub mean_positive: f32,
    /// Batch mean of the aggregated negative distance.
    pub mean_negative: f32,
}

/// Loss between hyperplane bands and positive/negative target entities.
#[derive(Debug, Clone)]
pub struct AnswerSpaceLoss {
    distance: Distance,
    aggregation: BandAggregation,
}

impl AnswerSpaceLoss {
    /// Create from a validated configuration.
    pub fn new(config: &LossConfig) -> Result<Self> {
        config.validate()?;
        let loss = Self {
            distance: Distance::from_config(config)?,
            aggregation: config.aggregation,
        };
        debug!(loss = %loss, "created answer-space loss");
        Ok(loss)
    }

    /// Create from parts.
    pub fn with_distance(distance: Distance, aggregation: BandAggregation) -> Self {
        Self {
            distance,
            aggregation,
        }
    }

    /// Band distance in use.
    pub fn distance(&self) -> &Distance {
        &self.distance
    }

    /// Positive-side band aggregation.
    pub fn aggregation(&self) -> BandAggregation {
        self.aggregation
    }

    /// Dot product of every hyperplane with the target.
    ///
    /// `hyperplanes` is `(batch, bands, hyperplanes, D)`, `target` is
    /// `(batch, D)`; the result is `(batch, bands, hyperplanes)`.
    pub fn dot(hyperplanes: &Tensor, target: &Tensor) -> Result<Tensor> {
        let (b, _, _, d) = hyperplanes.dims4()?;
        let (tb, td) = target.dims2()?;
        if tb != b {
            return Err(Error::mismatch("target batch", b, tb));
        }
        if td != d {
            return Err(Error::mismatch("target width", d, td));
        }
        let target = target.reshape((b, 1, 1, d))?;
        Ok(hyperplanes.broadcast_mul(&target)?.sum(D::Minus1)?)
    }

    /// Band-wise distances `(batch, bands)` for one target.
    pub fn band_distances(&self, hyperplanes: &Tensor, target: &Tensor) -> Result<Tensor> {
        self.distance.distance(&Self::dot(hyperplanes, target)?)
    }

    /// Compute the loss.
    ///
    /// # Arguments
    ///
    /// - `hyperplanes`: `(batch, bands, hyperplanes, D)`
    /// - `positive`: `(batch, D)` answer embeddings
    /// - `negative`: `(batch, D)` non-answer embeddings
    pub fn forward(
        &self,
        hyperplanes: &Tensor,
        positive: &Tensor,
        negative: &Tensor,
    ) -> Result<LossOutput> {
        let d_true = self.band_distances(hyperplanes, positive)?;
        let d_false = self.band_distances(hyperplanes, negative)?;

        let p = self.aggregation.aggregate(&d_true)?;
        // negatives must leave every band, so no existential here
        let n = d_false.mean(D::Minus1)?;

        let loss = (&p - &n)?.mean_all()?;
        let mean_positive = p.detach().mean_all()?.to_scalar::<f32>()?;
        let mean_negative = n.detach().mean_all()?.to_scalar::<f32>()?;

        trace!(mean_positive, mean_negative, "answer-space loss");

        Ok(LossOutput {
            loss,
            mean_positive,
            mean_negative,
        })
    }
}

impl fmt::Display for AnswerSpaceLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AnswerSpaceLoss(dist={}, aggr={})",
            self.distance, self.aggregation
        )
    }
}
