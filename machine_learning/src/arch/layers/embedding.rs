use ndarray::{Array2, ArrayView2};

use super::linear::check_cols;
use crate::{
    MlErr, Result,
    params::{ParamKind, ParamRole, ParamStoreBuilder, Slot},
};

/// A lookup table of `num` rows of width `dim`.
#[derive(Debug, Clone)]
pub struct Embedding {
    num: usize,
    dim: usize,
    weight: Slot,

    // Forward metadata
    ids: Vec<usize>,
}

impl Embedding {
    pub fn new(num: usize, dim: usize, weight: Slot) -> Self {
        Self {
            num,
            dim,
            weight,
            ids: Vec::new(),
        }
    }

    pub fn declare(
        builder: &mut ParamStoreBuilder,
        name: &str,
        num: usize,
        dim: usize,
    ) -> Result<Self> {
        let weight = builder.push(name, &[num, dim], ParamKind::Embedding, ParamRole::Standard)?;
        Ok(Self::new(num, dim, weight))
    }

    pub fn slot(&self) -> Slot {
        self.weight
    }

    /// Gathers one row per id.
    pub fn forward(&mut self, params: &[f32], ids: &[usize]) -> Result<Array2<f32>> {
        let table = self.weight.view2(params, (self.num, self.dim))?;
        let mut out = Array2::zeros((ids.len(), self.dim));

        for (mut row, &id) in out.outer_iter_mut().zip(ids) {
            if id >= self.num {
                return Err(MlErr::TokenOutOfRange {
                    token: id as u32,
                    vocab_size: self.num,
                });
            }
            row.assign(&table.row(id));
        }

        self.ids = ids.to_vec();
        Ok(out)
    }

    /// Scatters the incoming rows back into the rows they were read from.
    pub fn backward(&self, grad: &mut [f32], d: ArrayView2<f32>) -> Result<()> {
        check_cols("embedding delta", d.ncols(), self.dim)?;
        check_cols("embedding delta rows", d.nrows(), self.ids.len())?;

        let mut table = self.weight.view2_mut(grad, (self.num, self.dim))?;
        for (row, &id) in d.outer_iter().zip(&self.ids) {
            let mut dst = table.row_mut(id);
            dst += &row;
        }

        Ok(())
    }
}
