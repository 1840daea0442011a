//! Edge structure for relational message passing.
//!
//! Callers hand over only the forward edges. The inverse and self-loop edge
//! sets are derived here:
//!
//! | Direction | Edges          | Relation id |
//! |-----------|----------------|-------------|
//! | Forward   | (s, t)         | r           |
//! | Inverse   | (t, s)         | r + E       |
//! | Self-loop | (i, i), i ∈ V  | 2E          |
//!
//! Messages flow from the first node of each pair to the second.

use candle_core::{DType, Device, Tensor};

use crate::error::{Error, Result};

/// Message direction. Each direction owns its own projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Original edges.
    Forward,
    /// Reversed edges with shifted relation ids.
    Inverse,
    /// Reflexive edge on every node.
    SelfLoop,
}

impl Direction {
    /// All directions in aggregation order.
    pub const ALL: [Direction; 3] = [Direction::Forward, Direction::Inverse, Direction::SelfLoop];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Forward => 0,
            Self::Inverse => 1,
            Self::SelfLoop => 2,
        }
    }
}

/// One direction's edges as index tensors of equal length.
#[derive(Debug, Clone)]
pub struct EdgeSet {
    /// Message source per edge.
    pub src: Tensor,
    /// Message destination per edge.
    pub dst: Tensor,
    /// Relation row per edge.
    pub rel: Tensor,
    /// `D^{-1/2} A D^{-1/2}` weight per edge; `None` for self-loops.
    pub norm: Option<Tensor>,
    /// Nodes with no outgoing edge in this direction.
    pub isolated: usize,
}

impl EdgeSet {
    /// Number of edges.
    pub fn len(&self) -> usize {
        self.src.dims1().unwrap_or(0)
    }

    /// True if there are no edges.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validated forward, inverse and self-loop edge sets for one batch.
#[derive(Debug, Clone)]
pub struct RelationalGraph {
    num_nodes: usize,
    num_relations: usize,
    sets: [EdgeSet; 3],
}

impl RelationalGraph {
    /// Build the three edge sets from a `(2, M)` edge index and `(M,)` edge types.
    ///
    /// `num_relations` is E, the number of forward relation types. Every
    /// node id must be in `[0, num_nodes)` and every type in `[0, E)`.
    pub fn new(
        edge_index: &Tensor,
        edge_type: &Tensor,
        num_nodes: usize,
        num_relations: usize,
    ) -> Result<Self> {
        let device = edge_index.device();
        let (rows, m) = edge_index.dims2()?;
        if rows != 2 {
            return Err(Error::mismatch("edge_index rows", 2, rows));
        }
        let types = edge_type.to_dtype(DType::I64)?.to_vec1::<i64>()?;
        if types.len() != m {
            return Err(Error::mismatch("edge_type length", m, types.len()));
        }
        let pairs = edge_index.to_dtype(DType::I64)?.to_vec2::<i64>()?;
        let (src, dst) = (&pairs[0], &pairs[1]);

        check_range("edge_index", src.iter().chain(dst.iter()), num_nodes)?;
        check_range("edge_type", types.iter(), num_relations)?;

        let e = num_relations as i64;
        let loop_nodes: Vec<i64> = (0..num_nodes as i64).collect();

        let forward = edge_set(src, dst, types.clone(), num_nodes, device)?;
        let inverse = edge_set(
            dst,
            src,
            types.iter().map(|&t| t + e).collect(),
            num_nodes,
            device,
        )?;
        let self_loop = EdgeSet {
            src: index_tensor(&loop_nodes, device)?,
            dst: index_tensor(&loop_nodes, device)?,
            rel: index_tensor(&vec![2 * e; num_nodes], device)?,
            norm: None,
            isolated: 0,
        };

        Ok(Self {
            num_nodes,
            num_relations,
            sets: [forward, inverse, self_loop],
        })
    }

    /// Edges for one direction.
    pub fn edges(&self, direction: Direction) -> &EdgeSet {
        &self.sets[direction.index()]
    }

    /// Number of nodes N.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of forward relation types E.
    pub fn num_relations(&self) -> usize {
        self.num_relations
    }

    /// Number of forward edges M.
    pub fn num_edges(&self) -> usize {
        self.sets[0].len()
    }
}

/// Symmetric degree normalisation for one edge set.
///
/// ```text
/// deg[v]  = |{ e : row[e] = v }|
/// norm[e] = deg[row[e]]^{-1/2} · deg[col[e]]^{-1/2}
/// ```
///
/// Degrees count only `row` occurrences. A node of degree zero gets inverse
/// degree 0 instead of infinity, so any edge touching it has weight 0.
pub fn compute_norm(row: &Tensor, col: &Tensor, num_nodes: usize) -> Result<Tensor> {
    let device = row.device();
    let m = row.dims1()?;
    let ones = Tensor::ones(m, DType::F32, device)?;
    let deg = Tensor::zeros(num_nodes, DType::F32, device)?.index_add(row, &ones, 0)?;
    let deg_inv = deg.powf(-0.5)?;
    let deg_inv = deg
        .gt(0.0)?
        .where_cond(&deg_inv, &Tensor::zeros_like(&deg_inv)?)?;
    let norm = (deg_inv.index_select(row, 0)? * deg_inv.index_select(col, 0)?)?;
    Ok(norm)
}

fn edge_set(
    src: &[i64],
    dst: &[i64],
    rel: Vec<i64>,
    num_nodes: usize,
    device: &Device,
) -> Result<EdgeSet> {
    let mut has_out = vec![false; num_nodes];
    for &s in src {
        has_out[s as usize] = true;
    }
    let isolated = has_out.iter().filter(|&&b| !b).count();

    let norm = if src.is_empty() {
        Tensor::zeros(0, DType::F32, device)?
    } else {
        compute_norm(&index_tensor(src, device)?, &index_tensor(dst, device)?, num_nodes)?
    };
    let src = index_tensor(src, device)?;
    let dst = index_tensor(dst, device)?;
    Ok(EdgeSet {
        src,
        dst,
        rel: index_tensor(&rel, device)?,
        norm: Some(norm),
        isolated,
    })
}

fn index_tensor(ids: &[i64], device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_slice(ids, ids.len(), device)?)
}

fn check_range<'a>(
    what: &'static str,
    ids: impl Iterator<Item = &'a i64>,
    bound: usize,
) -> Result<()> {
    for &index in ids {
        if index < 0 || index as usize >= bound {
            return Err(Error::IndexOutOfRange { what, index, bound });
        }
    }
    Ok(())
}
