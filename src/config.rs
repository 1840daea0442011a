//! Configuration for convolution layers, encoders and the answer-space loss.
//!
//! Every option that selects a behaviour by name (`sub`, `softmin`, ...) is a
//! closed enum. Names parse through [`FromStr`] and through serde, and an
//! unknown name is always an [`Error::InvalidConfig`]; there is no fallback.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Composition operator combining a neighbour embedding with a relation
/// embedding before projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Composition {
    /// `a - b` (TransE-style translation).
    #[default]
    Sub,
    /// `a ⊙ b` (DistMult-style scaling).
    Mult,
    /// Circular correlation `a ⋆ b` (HolE-style).
    Corr,
}

/// Distance between a band of hyperplanes and a target embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandDistanceKind {
    /// `1 - mean(sigmoid(dot))`.
    #[default]
    Sigmoid,
    /// Sum of a mirrored leaky ReLU over the dot products.
    InvLeakyRelu,
}

/// How band-wise distances of the positive target are reduced to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandAggregation {
    /// Closest band only.
    Min,
    /// Uniform average over bands.
    Mean,
    /// Softmin-weighted average over bands.
    #[default]
    Softmin,
}

macro_rules! named_enum {
    ($ty:ident, $what:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Wire name of this variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(Error::InvalidConfig(format!(
                        concat!("unknown ", $what, " '{}' (expected one of: {})"),
                        other,
                        [$($name),+].join(", ")
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

named_enum!(Composition, "composition operator", {
    Sub => "sub",
    Mult => "mult",
    Corr => "corr",
});

named_enum!(BandDistanceKind, "band distance", {
    Sigmoid => "sigmoid",
    InvLeakyRelu => "inv_leaky_relu",
});

named_enum!(BandAggregation, "band aggregation", {
    Min => "min",
    Mean => "mean",
    Softmin => "softmin",
});

/// Configuration of a single [`CompGcnConv`](crate::conv::CompGcnConv) layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvConfig {
    /// Input embedding dimension (default: 128).
    pub in_features: usize,
    /// Output embedding dimension (default: 128).
    pub out_features: usize,
    /// Composition operator (default: `sub`).
    pub composition: Composition,
    /// Add a learned bias after aggregation (default: true).
    pub use_bias: bool,
    /// Batch-normalise the aggregated output (default: true).
    pub use_feature_norm: bool,
    /// Dropout on the forward and inverse branches (default: 0.0).
    pub dropout: f32,
}

impl Default for ConvConfig {
    fn default() -> Self {
        Self {
            in_features: 128,
            out_features: 128,
            composition: Composition::Sub,
            use_bias: true,
            use_feature_norm: true,
            dropout: 0.0,
        }
    }
}

impl ConvConfig {
    /// Square layer `dim -> dim` with default options.
    pub fn new(dim: usize) -> Self {
        Self {
            in_features: dim,
            out_features: dim,
            ..Default::default()
        }
    }

    /// Set input and output dimensions.
    pub fn with_features(mut self, in_features: usize, out_features: usize) -> Self {
        self.in_features = in_features;
        self.out_features = out_features;
        self
    }

    /// Set the composition operator.
    pub fn with_composition(mut self, composition: Composition) -> Self {
        self.composition = composition;
        self
    }

    /// Enable or disable the output bias.
    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// Enable or disable batch normalisation of the output.
    pub fn with_feature_norm(mut self, use_feature_norm: bool) -> Self {
        self.use_feature_norm = use_feature_norm;
        self
    }

    /// Set the dropout rate.
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Check hyperparameters.
    pub fn validate(&self) -> Result<()> {
        if self.in_features == 0 || self.out_features == 0 {
            return Err(Error::InvalidConfig(format!(
                "feature dimensions must be positive, got {} -> {}",
                self.in_features, self.out_features
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// Configuration of a stacked [`CompGcnEncoder`](crate::encoder::CompGcnEncoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Per-layer options. The first layer maps `in -> out`, later layers `out -> out`.
    pub conv: ConvConfig,
    /// Number of message-passing layers, one per hop (default: 2).
    pub num_layers: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            conv: ConvConfig::default(),
            num_layers: 2,
        }
    }
}

impl EncoderConfig {
    /// Check hyperparameters.
    pub fn validate(&self) -> Result<()> {
        if self.num_layers == 0 {
            return Err(Error::InvalidConfig("encoder needs at least one layer".into()));
        }
        self.conv.validate()
    }
}

/// Configuration of the [`AnswerSpaceLoss`](crate::loss::AnswerSpaceLoss).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// Band distance function (default: `sigmoid`).
    pub distance: BandDistanceKind,
    /// Positive slope of the mirrored leaky ReLU (default: 1e-3).
    pub inv_leaky_relu_slope: f64,
    /// Aggregation over bands for positive targets (default: `softmin`).
    pub aggregation: BandAggregation,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            distance: BandDistanceKind::Sigmoid,
            inv_leaky_relu_slope: 1e-3,
            aggregation: BandAggregation::Softmin,
        }
    }
}

impl LossConfig {
    /// Set the band distance.
    pub fn with_distance(mut self, distance: BandDistanceKind) -> Self {
        self.distance = distance;
        self
    }

    /// Set the mirrored leaky ReLU slope.
    pub fn with_slope(mut self, slope: f64) -> Self {
        self.inv_leaky_relu_slope = slope;
        self
    }

    /// Set the band aggregation.
    pub fn with_aggregation(mut self, aggregation: BandAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Check hyperparameters.
    pub fn validate(&self) -> Result<()> {
        let slope = self.inv_leaky_relu_slope;
        if !slope.is_finite() || slope < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "inv_leaky_relu_slope must be finite and non-negative, got {slope}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_names() {
        assert_eq!("sub".parse::<Composition>().unwrap(), Composition::Sub);
        assert_eq!("mult".parse::<Composition>().unwrap(), Composition::Mult);
        assert_eq!("corr".parse::<Composition>().unwrap(), Composition::Corr);
        assert_eq!(
            "inv_leaky_relu".parse::<BandDistanceKind>().unwrap(),
            BandDistanceKind::InvLeakyRelu
        );
        assert_eq!("softmin".parse::<BandAggregation>().unwrap(), BandAggregation::Softmin);
    }

    #[test]
    fn test_unknown_name_is_config_error() {
        let err = "rotate".parse::<Composition>().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(err.to_string().contains("rotate"));

        assert!(matches!(
            "max".parse::<BandAggregation>(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            "relu".parse::<BandDistanceKind>(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_display_matches_wire_name() {
        for c in [Composition::Sub, Composition::Mult, Composition::Corr] {
            assert_eq!(c.to_string().parse::<Composition>().unwrap(), c);
        }
        assert_eq!(BandDistanceKind::InvLeakyRelu.to_string(), "inv_leaky_relu");
    }

    #[test]
    fn test_defaults() {
        let conv = ConvConfig::default();
        assert_eq!(conv.composition, Composition::Sub);
        assert!(conv.use_bias && conv.use_feature_norm);
        assert_eq!(conv.dropout, 0.0);

        let loss = LossConfig::default();
        assert_eq!(loss.aggregation, BandAggregation::Softmin);
        assert_eq!(loss.inv_leaky_relu_slope, 1e-3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ConvConfig::new(8).with_dropout(1.0).validate().is_err());
        assert!(ConvConfig::new(8).with_dropout(-0.1).validate().is_err());
        assert!(ConvConfig::new(0).validate().is_err());
        assert!(LossConfig::default().with_slope(f64::NAN).validate().is_err());
        assert!(LossConfig::default().with_slope(-1.0).validate().is_err());

        let enc = EncoderConfig {
            num_layers: 0,
            ..Default::default()
        };
        assert!(enc.validate().is_err());
    }
}
