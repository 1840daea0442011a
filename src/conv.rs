//! Composition-based multi-relational graph convolution (CompGCN).
//!
//! Each layer jointly updates entity and relation embeddings:
//!
//! ```text
//! h_v' = 1/3 · drop( Σ_{(u,r,v) ∈ fwd} n_uv W_fwd φ(h_u, z_r) )
//!      + 1/3 · drop( Σ_{(u,r,v) ∈ inv} n_uv W_inv φ(h_u, z_r) )
//!      + 1/3 ·        W_loop φ(h_v, z_loop)
//! z_r' = W_rel z_r
//! ```
//!
//! `n_uv` is the symmetric degree weight from [`compute_norm`](crate::graph::compute_norm),
//! computed separately for the forward and inverse edge sets. Dropout only
//! touches the two neighbourhood branches; the self-loop branch is never
//! dropped.
//!
//! After aggregation the layer optionally adds a bias and applies batch
//! normalisation. Rows selected by an entity mask are then restored to their
//! input values, which keeps anchor entities of a query fixed.
//!
//! # Reference
//!
//! Vashishth et al., "Composition-based Multi-Relational Graph Convolutional
//! Networks", ICLR 2020.

use std::fmt;

use candle_core::{DType, Tensor};
use candle_nn::{
    batch_norm, init, linear_no_bias, BatchNorm, BatchNormConfig, Dropout, Linear, Module,
    ModuleT, VarBuilder,
};
use tracing::debug;

use crate::config::{Composition, ConvConfig};
use crate::error::{Error, Result};
use crate::graph::{Direction, EdgeSet, RelationalGraph};

/// Relational graph convolution layer with per-direction projections.
pub struct CompGcnConv {
    config: ConvConfig,
    /// Projections indexed by [`Direction`].
    weights: [Linear; 3],
    /// Relation projection.
    w_rel: Linear,
    /// Learned embedding of the synthetic self-loop relation, `(1, in)`.
    loop_rel: Tensor,
    bias: Option<Tensor>,
    norm: Option<BatchNorm>,
    drop: Dropout,
}

/// Updated embeddings produced by one convolution pass.
#[derive(Debug, Clone)]
pub struct ConvOutput {
    /// Entity embeddings `(N, out)`.
    pub entities: Tensor,
    /// Relation embeddings `(2E, out)`, self-loop row removed.
    pub relations: Tensor,
}

impl CompGcnConv {
    /// Create a new layer.
    ///
    /// Parameters are registered under `vb` as `w_in`, `w_out`, `w_loop`,
    /// `w_rel`, `loop_rel`, `bias` and `bn`.
    pub fn new(config: ConvConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let (d_in, d_out) = (config.in_features, config.out_features);

        let weights = [
            linear_no_bias(d_in, d_out, vb.pp("w_in"))?,
            linear_no_bias(d_in, d_out, vb.pp("w_out"))?,
            linear_no_bias(d_in, d_out, vb.pp("w_loop"))?,
        ];
        let w_rel = linear_no_bias(d_in, d_out, vb.pp("w_rel"))?;
        let loop_rel = vb.get_with_hints((1, d_in), "loop_rel", init::DEFAULT_KAIMING_NORMAL)?;

        let bias = if config.use_bias {
            Some(vb.get_with_hints(d_out, "bias", init::ZERO)?)
        } else {
            None
        };
        let norm = if config.use_feature_norm {
            Some(batch_norm(d_out, BatchNormConfig::default(), vb.pp("bn"))?)
        } else {
            None
        };
        let drop = Dropout::new(config.dropout);

        debug!(
            in_features = d_in,
            out_features = d_out,
            composition = %config.composition,
            use_bias = config.use_bias,
            use_feature_norm = config.use_feature_norm,
            dropout = config.dropout,
            "created CompGCN layer"
        );

        Ok(Self {
            config,
            weights,
            w_rel,
            loop_rel,
            bias,
            norm,
            drop,
        })
    }

    /// Layer configuration.
    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    /// Composition operator in use.
    pub fn composition(&self) -> Composition {
        self.config.composition
    }

    /// Projection for one message direction.
    pub fn weight(&self, direction: Direction) -> &Linear {
        &self.weights[direction.index()]
    }

    /// Relation projection.
    pub fn relation_weight(&self) -> &Linear {
        &self.w_rel
    }

    /// The learned self-loop relation embedding, `(1, in)`.
    pub fn loop_relation(&self) -> &Tensor {
        &self.loop_rel
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `entities`: Entity embeddings `(N, in)`
    /// - `relations`: Relation embeddings `(2E, in)`, forward rows followed by inverse rows
    /// - `edge_index`: `(2, M)` integer tensor, row 0 = source, row 1 = target
    /// - `edge_type`: `(M,)` relation ids in `[0, E)`
    /// - `entity_mask`: optional `(N,)` `u8` tensor; non-zero rows keep their input value
    /// - `train`: enables dropout and batch statistics
    pub fn forward(
        &self,
        entities: &Tensor,
        relations: &Tensor,
        edge_index: &Tensor,
        edge_type: &Tensor,
        entity_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<ConvOutput> {
        let (n, _) = self.check_entities(entities)?;
        let num_relations = self.check_relations(relations)?;
        let graph = RelationalGraph::new(edge_index, edge_type, n, num_relations)?;
        self.forward_graph(entities, relations, &graph, entity_mask, train)
    }

    /// Forward pass over a prebuilt [`RelationalGraph`].
    ///
    /// Lets stacked layers share one validated edge structure.
    pub fn forward_graph(
        &self,
        entities: &Tensor,
        relations: &Tensor,
        graph: &RelationalGraph,
        entity_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<ConvOutput> {
        let (n, _) = self.check_entities(entities)?;
        let num_relations = self.check_relations(relations)?;
        if graph.num_nodes() != n {
            return Err(Error::mismatch("graph nodes", n, graph.num_nodes()));
        }
        if graph.num_relations() != num_relations {
            return Err(Error::mismatch(
                "graph relations",
                num_relations,
                graph.num_relations(),
            ));
        }

        debug!(
            nodes = n,
            edges = graph.num_edges(),
            relations = num_relations,
            isolated_forward = graph.edges(Direction::Forward).isolated,
            isolated_inverse = graph.edges(Direction::Inverse).isolated,
            "CompGCN forward"
        );

        // contains forward, inverse and loop relations
        let loop_rel = self.loop_rel.to_dtype(relations.dtype())?;
        let relations = Tensor::cat(&[relations, &loop_rel], 0)?;

        let fwd = self.propagate(entities, &relations, graph, Direction::Forward)?;
        let inv = self.propagate(entities, &relations, graph, Direction::Inverse)?;
        let lp = self.propagate(entities, &relations, graph, Direction::SelfLoop)?;

        let third = 1.0 / 3.0;
        let out = ((self.drop.forward(&fwd, train)?.affine(third, 0.0)?
            + self.drop.forward(&inv, train)?.affine(third, 0.0)?)?
            + lp.affine(third, 0.0)?)?;

        let out = match &self.bias {
            Some(bias) => out.broadcast_add(bias)?,
            None => out,
        };
        let out = match &self.norm {
            Some(bn) => bn.forward_t(&out, train)?,
            None => out,
        };
        let out = match entity_mask {
            Some(mask) => self.restore_masked(&out, entities, mask)?,
            None => out,
        };

        // drop the self-loop row, always the last
        let relations = self.w_rel.forward(&relations)?.narrow(0, 0, 2 * num_relations)?;

        Ok(ConvOutput {
            entities: out,
            relations,
        })
    }

    /// Message + sum aggregation for one direction, `(N, out)`.
    fn propagate(
        &self,
        x: &Tensor,
        relations: &Tensor,
        graph: &RelationalGraph,
        direction: Direction,
    ) -> Result<Tensor> {
        let edges = graph.edges(direction);
        let d_out = self.config.out_features;
        let zeros = Tensor::zeros((graph.num_nodes(), d_out), x.dtype(), x.device())?;
        if edges.is_empty() {
            return Ok(zeros);
        }
        let msg = self.message(x, relations, edges, direction)?;
        Ok(zeros.index_add(&edges.dst, &msg, 0)?)
    }

    fn message(
        &self,
        x: &Tensor,
        relations: &Tensor,
        edges: &EdgeSet,
        direction: Direction,
    ) -> Result<Tensor> {
        let x_j = x.index_select(&edges.src, 0)?;
        let rel = relations.index_select(&edges.rel, 0)?;
        let composed = self.config.composition.apply(&x_j, &rel)?;
        let out = self.weight(direction).forward(&composed)?;
        match &edges.norm {
            Some(norm) => {
                let norm = norm.to_dtype(out.dtype())?.unsqueeze(1)?;
                Ok(out.broadcast_mul(&norm)?)
            }
            None => Ok(out),
        }
    }

    fn restore_masked(&self, out: &Tensor, input: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (n, d_out) = out.dims2()?;
        let d_in = input.dim(1)?;
        if d_in != d_out {
            return Err(Error::mismatch("masked entity width", d_out, d_in));
        }
        let len = mask.dims1()?;
        if len != n {
            return Err(Error::mismatch("entity_mask length", n, len));
        }
        let mask = mask
            .to_dtype(DType::U8)?
            .unsqueeze(1)?
            .broadcast_as((n, d_out))?;
        Ok(mask.where_cond(input, out)?)
    }

    fn check_entities(&self, entities: &Tensor) -> Result<(usize, usize)> {
        let (n, d) = entities.dims2()?;
        if d != self.config.in_features {
            return Err(Error::mismatch("entity width", self.config.in_features, d));
        }
        Ok((n, d))
    }

    /// Validates `(2E, in)` and returns E.
    fn check_relations(&self, relations: &Tensor) -> Result<usize> {
        let (rows, d) = relations.dims2()?;
        if d != self.config.in_features {
            return Err(Error::mismatch("relation width", self.config.in_features, d));
        }
        if rows % 2 != 0 {
            return Err(Error::mismatch("relation rows (forward ++ inverse)", rows + 1, rows));
        }
        Ok(rows / 2)
    }
}

impl fmt::Display for CompGcnConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CompGcnConv({}, {}, comp={})",
            self.config.in_features, self.config.out_features, self.config.composition
        )
    }
}

/// Forward/inverse relation table in the row layout [`CompGcnConv`] expects.
pub struct RelationTable;

impl RelationTable {
    /// Stack `(E, D)` forward and inverse embeddings into `(2E, D)`.
    pub fn stack(forward: &Tensor, inverse: &Tensor) -> Result<Tensor> {
        let (e, d) = forward.dims2()?;
        let (ei, di) = inverse.dims2()?;
        if e != ei {
            return Err(Error::mismatch("inverse relation rows", e, ei));
        }
        if d != di {
            return Err(Error::mismatch("inverse relation width", d, di));
        }
        Ok(Tensor::cat(&[forward, inverse], 0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn plain(dim: usize) -> ConvConfig {
        ConvConfig::new(dim).with_bias(false).with_feature_norm(false)
    }

    fn chain(device: &Device) -> (Tensor, Tensor) {
        let edge_index = Tensor::from_vec(vec![0i64, 1, 1, 2], (2, 2), device).unwrap();
        let edge_type = Tensor::from_vec(vec![0i64, 1], 2, device).unwrap();
        (edge_index, edge_type)
    }

    #[test]
    fn test_forward_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let conv = CompGcnConv::new(ConvConfig::new(16).with_features(16, 8), vb).unwrap();

        let x = Tensor::randn(0f32, 1f32, (5, 16), &device).unwrap();
        let rel = Tensor::randn(0f32, 1f32, (4, 16), &device).unwrap();
        let (edge_index, edge_type) = chain(&device);

        let out = conv.forward(&x, &rel, &edge_index, &edge_type, None, false).unwrap();
        assert_eq!(out.entities.dims(), &[5, 8]);
        assert_eq!(out.relations.dims(), &[4, 8]);
    }

    #[test]
    fn test_isolated_node_gets_only_self_loop() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = CompGcnConv::new(plain(4), vb).unwrap();

        let x = Tensor::randn(0f32, 1f32, (4, 4), &device).unwrap();
        let rel = Tensor::randn(0f32, 1f32, (4, 4), &device).unwrap();
        let (edge_index, edge_type) = chain(&device);

        let out = conv.forward(&x, &rel, &edge_index, &edge_type, None, false).unwrap();

        // node 3 has no edges: h' = W_loop (h - z_loop) / 3
        let h3 = x.narrow(0, 3, 1).unwrap();
        let composed = (h3 - conv.loop_relation()).unwrap();
        let expected = conv
            .weight(Direction::SelfLoop)
            .forward(&composed)
            .unwrap()
            .affine(1.0 / 3.0, 0.0)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        let got = out.entities.narrow(0, 3, 1).unwrap().to_vec2::<f32>().unwrap();
        for (a, b) in got[0].iter().zip(&expected[0]) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn test_mask_restores_input_rows() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = CompGcnConv::new(ConvConfig::new(6), vb).unwrap();

        let x = Tensor::randn(0f32, 1f32, (4, 6), &device).unwrap();
        let rel = Tensor::randn(0f32, 1f32, (4, 6), &device).unwrap();
        let (edge_index, edge_type) = chain(&device);
        let mask = Tensor::from_vec(vec![1u8, 0, 1, 0], 4, &device).unwrap();

        let out = conv
            .forward(&x, &rel, &edge_index, &edge_type, Some(&mask), true)
            .unwrap();

        let got = out.entities.to_vec2::<f32>().unwrap();
        let input = x.to_vec2::<f32>().unwrap();
        assert_eq!(got[0], input[0]);
        assert_eq!(got[2], input[2]);
    }

    #[test]
    fn test_mask_requires_square_layer() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = CompGcnConv::new(plain(6).with_features(6, 3), vb).unwrap();

        let x = Tensor::randn(0f32, 1f32, (3, 6), &device).unwrap();
        let rel = Tensor::randn(0f32, 1f32, (4, 6), &device).unwrap();
        let (edge_index, edge_type) = chain(&device);
        let mask = Tensor::from_vec(vec![1u8, 0, 0], 3, &device).unwrap();

        let err = conv
            .forward(&x, &rel, &edge_index, &edge_type, Some(&mask), false)
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_relation_width_mismatch() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = CompGcnConv::new(plain(4), vb).unwrap();

        let x = Tensor::randn(0f32, 1f32, (3, 4), &device).unwrap();
        let rel = Tensor::randn(0f32, 1f32, (4, 5), &device).unwrap();
        let (edge_index, edge_type) = chain(&device);

        let err = conv
            .forward(&x, &rel, &edge_index, &edge_type, None, false)
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { what: "relation width", .. }));
    }

    #[test]
    fn test_odd_relation_rows_rejected() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = CompGcnConv::new(plain(4), vb).unwrap();

        let x = Tensor::randn(0f32, 1f32, (3, 4), &device).unwrap();
        let rel = Tensor::randn(0f32, 1f32, (3, 4), &device).unwrap();
        let (edge_index, edge_type) = chain(&device);

        assert!(conv.forward(&x, &rel, &edge_index, &edge_type, None, false).is_err());
    }

    #[test]
    fn test_display() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = CompGcnConv::new(
            plain(8).with_features(8, 4).with_composition(Composition::Corr),
            vb,
        )
        .unwrap();
        assert_eq!(conv.to_string(), "CompGcnConv(8, 4, comp=corr)");
    }

    #[test]
    fn test_relation_table_stack() {
        let device = Device::Cpu;
        let fwd = Tensor::ones((2, 3), DType::F32, &device).unwrap();
        let inv = Tensor::zeros((2, 3), DType::F32, &device).unwrap();
        let table = RelationTable::stack(&fwd, &inv).unwrap();
        assert_eq!(table.dims(), &[4, 3]);
        assert_eq!(table.get(2).unwrap().to_vec1::<f32>().unwrap(), vec![0.0; 3]);

        let short = Tensor::zeros((1, 3), DType::F32, &device).unwrap();
        assert!(RelationTable::stack(&fwd, &short).is_err());
    }
}
