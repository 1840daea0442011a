//! Embedding logical queries over knowledge graphs as hyperplane answer spaces.
//!
//! A conjunctive query is a small graph: anchor entities, variable nodes and
//! typed relation edges. `answerspace` encodes such query graphs with a
//! composition-based relational GCN and scores the result as sets of
//! hyperplanes ("bands") against answer and non-answer entities.
//!
//! ```text
//! query batch ──► CompGcnEncoder (one CompGcnConv per hop)
//!             ──► readout_targets ──► assemble_hyperplanes
//!             ──► AnswerSpaceLoss(hyperplanes, e⁺, e⁻)
//! ```
//!
//! # Modules
//!
//! - [`conv`]: CompGCN layer with forward, inverse and self-loop projections
//! - [`graph`]: Inverse/self-loop edge synthesis and degree normalisation
//! - [`compose`]: Entity-relation composition (`sub`, `mult`, `corr`)
//! - [`encoder`]: Layer stacking, target readout, hyperplane assembly
//! - [`distance`]: Band-wise distances (sigmoid, mirrored leaky ReLU)
//! - [`loss`]: The answer-space loss and band aggregation
//! - [`config`]: Serde-backed configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use answerspace::{AnswerSpaceLoss, CompGcnConv, ConvConfig, LossConfig};
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//!
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let conv = CompGcnConv::new(ConvConfig::new(64), vb)?;
//!
//! let out = conv.forward(&entities, &relations, &edge_index, &edge_type, Some(&anchors), true)?;
//!
//! let loss = AnswerSpaceLoss::new(&LossConfig::default())?;
//! let step = loss.forward(&hyperplanes, &positive, &negative)?;
//! step.loss.backward()?;
//! ```
//!
//! Tensors come from [candle](https://github.com/huggingface/candle);
//! parameters are registered through a `VarBuilder`, so any candle optimizer
//! can train them.

pub mod compose;
pub mod config;
pub mod conv;
pub mod distance;
pub mod encoder;
pub mod error;
pub mod graph;
pub mod loss;

pub use config::{
    BandAggregation, BandDistanceKind, Composition, ConvConfig, EncoderConfig, LossConfig,
};
pub use conv::{CompGcnConv, ConvOutput, RelationTable};
pub use distance::{BandDistance, Distance, InvLeakyReluDistance, SigmoidDistance};
pub use encoder::{assemble_hyperplanes, readout_targets, CompGcnEncoder};
pub use error::{Error, Result};
pub use graph::{compute_norm, Direction, EdgeSet, RelationalGraph};
pub use loss::{AnswerSpaceLoss, LossOutput};
