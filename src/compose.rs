//! Entity-relation composition operators.
//!
//! CompGCN (Vashishth et al., 2020) folds the relation into each message
//! before the linear projection:
//!
//! ```text
//! m_{j->i} = W_dir · φ(h_j, z_r)
//! ```
//!
//! | Operator | φ(a, b)                         | Origin   |
//! |----------|---------------------------------|----------|
//! | `sub`    | a - b                           | TransE   |
//! | `mult`   | a ⊙ b                           | DistMult |
//! | `corr`   | (a ⋆ b)_k = Σ_i a_i b_{(i+k) mod D} | HolE |
//!
//! Circular correlation is usually computed as
//! `irfft(conj(rfft(a)) * rfft(b))`. Candle has no FFT, so it is evaluated
//! directly as a gather over a circulant index followed by a reduction. That
//! costs O(D²) per row instead of O(D log D) but stays differentiable.

use candle_core::{Device, Tensor, D};

use crate::config::Composition;
use crate::error::{Error, Result};

impl Composition {
    /// Combine entity rows `a` and relation rows `b`, both `(M, D)`.
    pub fn apply(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let (m, d) = a.dims2()?;
        let (mb, db) = b.dims2()?;
        if d != db {
            return Err(Error::mismatch("composition width", d, db));
        }
        if m != mb {
            return Err(Error::mismatch("composition rows", m, mb));
        }
        let out = match self {
            Self::Sub => (a - b)?,
            Self::Mult => (a * b)?,
            Self::Corr => circular_correlation(a, b)?,
        };
        Ok(out)
    }
}

/// Row-wise circular correlation of two `(M, D)` tensors.
pub fn circular_correlation(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (m, d) = a.dims2()?;
    let index = circulant_index(d, a.device())?;
    // shifted[r, k, i] = b[r, (i + k) mod D]
    let shifted = b.index_select(&index, 1)?.reshape((m, d, d))?;
    let out = shifted.broadcast_mul(&a.unsqueeze(1)?)?.sum(D::Minus1)?;
    Ok(out)
}

fn circulant_index(d: usize, device: &Device) -> Result<Tensor> {
    let index: Vec<u32> = (0..d)
        .flat_map(|k| (0..d).map(move |i| ((i + k) % d) as u32))
        .collect();
    Ok(Tensor::from_vec(index, d * d, device)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[f32], m: usize, d: usize) -> Tensor {
        Tensor::from_vec(data.to_vec(), (m, d), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_sub_and_mult() {
        let a = rows(&[1.0, 2.0, 3.0, 4.0], 2, 2);
        let b = rows(&[0.5, 1.0, -1.0, 2.0], 2, 2);

        let sub = Composition::Sub.apply(&a, &b).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(sub, vec![vec![0.5, 1.0], vec![4.0, 2.0]]);

        let mult = Composition::Mult.apply(&a, &b).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(mult, vec![vec![0.5, 2.0], vec![-3.0, 8.0]]);
    }

    #[test]
    fn test_corr_by_hand() {
        // a = [1, 2, 3], b = [4, 5, 6]
        // k=0: 1*4 + 2*5 + 3*6 = 32
        // k=1: 1*5 + 2*6 + 3*4 = 29
        // k=2: 1*6 + 2*4 + 3*5 = 29
        let a = rows(&[1.0, 2.0, 3.0], 1, 3);
        let b = rows(&[4.0, 5.0, 6.0], 1, 3);
        let out = Composition::Corr.apply(&a, &b).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out, vec![vec![32.0, 29.0, 29.0]]);
    }

    #[test]
    fn test_corr_with_unit_impulse_is_identity() {
        // Correlating the impulse e_0 with b returns b itself.
        let a = rows(&[1.0, 0.0, 0.0, 0.0], 1, 4);
        let b = rows(&[0.3, -1.2, 2.0, 0.7], 1, 4);
        let out = Composition::Corr.apply(&a, &b).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out, vec![vec![0.3, -1.2, 2.0, 0.7]]);
    }

    #[test]
    fn test_width_mismatch() {
        let a = rows(&[1.0, 2.0], 1, 2);
        let b = rows(&[1.0, 2.0, 3.0], 1, 3);
        let err = Composition::Sub.apply(&a, &b).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }
}
