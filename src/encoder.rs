//! Stacked CompGCN encoder and query readout.
//!
//! One layer runs per hop of the query graph. Entity and relation
//! embeddings are threaded through the stack over a single shared edge
//! structure; anchors stay frozen at every layer when a mask is supplied.

use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;
use tracing::debug;

use crate::config::EncoderConfig;
use crate::conv::{CompGcnConv, ConvOutput};
use crate::error::{Error, Result};
use crate::graph::RelationalGraph;

/// A stack of [`CompGcnConv`] layers.
pub struct CompGcnEncoder {
    layers: Vec<CompGcnConv>,
}

impl CompGcnEncoder {
    /// Create `config.num_layers` layers under `vb.pp("layer_{i}")`.
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let mut conv = config.conv.clone();
            if i > 0 {
                conv.in_features = config.conv.out_features;
            }
            layers.push(CompGcnConv::new(conv, vb.pp(format!("layer_{i}")))?);
        }
        Ok(Self { layers })
    }

    /// Number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Layers in application order.
    pub fn layers(&self) -> &[CompGcnConv] {
        &self.layers
    }

    /// Run every layer.
    pub fn forward(
        &self,
        entities: &Tensor,
        relations: &Tensor,
        edge_index: &Tensor,
        edge_type: &Tensor,
        entity_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<ConvOutput> {
        self.forward_hops(
            entities,
            relations,
            edge_index,
            edge_type,
            entity_mask,
            self.layers.len(),
            train,
        )
    }

    /// Run the first `min(hops, num_layers)` layers.
    ///
    /// With `hops` set to the query diameter, message passing stops once
    /// every node has heard from every other.
    #[allow(clippy::too_many_arguments)]
    pub fn forward_hops(
        &self,
        entities: &Tensor,
        relations: &Tensor,
        edge_index: &Tensor,
        edge_type: &Tensor,
        entity_mask: Option<&Tensor>,
        hops: usize,
        train: bool,
    ) -> Result<ConvOutput> {
        let n = entities.dim(0)?;
        let rows = relations.dim(0)?;
        if rows % 2 != 0 {
            return Err(Error::mismatch("relation rows (forward ++ inverse)", rows + 1, rows));
        }
        let graph = RelationalGraph::new(edge_index, edge_type, n, rows / 2)?;

        let hops = hops.min(self.layers.len());
        debug!(hops, layers = self.layers.len(), "CompGCN encoder forward");

        let mut state = ConvOutput {
            entities: entities.clone(),
            relations: relations.clone(),
        };
        for layer in &self.layers[..hops] {
            state = layer.forward_graph(&state.entities, &state.relations, &graph, entity_mask, train)?;
        }
        Ok(state)
    }
}

/// Select the rows of `entities` flagged in `target_mask`, in node order.
///
/// `entities` is `(N, D)` and `target_mask` an `(N,)` integer tensor whose
/// non-zero entries mark the target variable of each query; the result is
/// `(B, D)` with one row per target.
pub fn readout_targets(entities: &Tensor, target_mask: &Tensor) -> Result<Tensor> {
    let n = entities.dim(0)?;
    let flags = target_mask.to_dtype(DType::U8)?.to_vec1::<u8>()?;
    if flags.len() != n {
        return Err(Error::mismatch("target_mask length", n, flags.len()));
    }
    let index: Vec<u32> = flags
        .iter()
        .enumerate()
        .filter(|(_, &f)| f != 0)
        .map(|(i, _)| i as u32)
        .collect();
    if index.is_empty() {
        return Err(Error::mismatch("target count", 1, 0));
    }
    let len = index.len();
    let index = Tensor::from_vec(index, len, entities.device())?;
    Ok(entities.index_select(&index, 0)?)
}

/// Arrange one `(B, D)` readout per hyperplane into `(B, bands, hyperplanes, D)`.
///
/// Readouts are taken band-major: the first `num_hyperplanes` belong to band 0.
pub fn assemble_hyperplanes(
    readouts: &[Tensor],
    num_bands: usize,
    num_hyperplanes: usize,
) -> Result<Tensor> {
    let expected = num_bands * num_hyperplanes;
    if readouts.len() != expected || expected == 0 {
        return Err(Error::mismatch("hyperplane readouts", expected, readouts.len()));
    }
    let (b, d) = readouts[0].dims2()?;
    for r in readouts {
        let (rb, rd) = r.dims2()?;
        if rb != b {
            return Err(Error::mismatch("readout batch", b, rb));
        }
        if rd != d {
            return Err(Error::mismatch("readout width", d, rd));
        }
    }
    Ok(Tensor::cat(readouts, 1)?.reshape((b, num_bands, num_hyperplanes, d))?)
}
