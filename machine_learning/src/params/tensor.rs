use std::ops::Range;

use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};

use crate::{MlErr, Result};

/// A window into the flat parameter and gradient buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    offset: usize,
    len: usize,
}

impl Slot {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    /// Borrows this slot's section of `buf`.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `buf` is too short to contain the slot.
    pub fn get<'a>(&self, buf: &'a [f32]) -> Result<&'a [f32]> {
        let end = self.offset + self.len;
        buf.get(self.range()).ok_or(MlErr::SizeMismatch {
            what: "parameter buffer",
            got: buf.len(),
            expected: end,
        })
    }

    /// Mutable counterpart of `Slot::get`.
    pub fn get_mut<'a>(&self, buf: &'a mut [f32]) -> Result<&'a mut [f32]> {
        let got = buf.len();
        let end = self.offset + self.len;
        buf.get_mut(self.range()).ok_or(MlErr::SizeMismatch {
            what: "parameter buffer",
            got,
            expected: end,
        })
    }

    pub fn view1<'a>(&self, buf: &'a [f32]) -> Result<ArrayView1<'a, f32>> {
        Ok(ArrayView1::from(self.get(buf)?))
    }

    pub fn view1_mut<'a>(&self, buf: &'a mut [f32]) -> Result<ArrayViewMut1<'a, f32>> {
        Ok(ArrayViewMut1::from(self.get_mut(buf)?))
    }

    pub fn view2<'a>(&self, buf: &'a [f32], shape: (usize, usize)) -> Result<ArrayView2<'a, f32>> {
        Ok(ArrayView2::from_shape(shape, self.get(buf)?)?)
    }

    pub fn view2_mut<'a>(
        &self,
        buf: &'a mut [f32],
        shape: (usize, usize),
    ) -> Result<ArrayViewMut2<'a, f32>> {
        Ok(ArrayViewMut2::from_shape(shape, self.get_mut(buf)?)?)
    }
}

/// How a tensor is initialized.
///
/// Output projections of the attention and MLP sublayers write straight into the
/// residual stream, their initial spread is shrunk with depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    Standard,
    ResidualProjection,
}

/// What a tensor is used for inside its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Embedding,
    Weight,
    Bias,
    NormScale,
    NormShift,
}

/// Metadata of one named tensor in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub kind: ParamKind,
    pub role: ParamRole,
    pub slot: Slot,
}

impl ParamTensor {
    pub fn numel(&self) -> usize {
        self.slot.len()
    }

    /// Matrices and embedding tables decay, vectors do not.
    pub fn decays(&self) -> bool {
        self.shape.len() >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_views_respect_offset_and_shape() {
        let buf: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let slot = Slot::new(4, 6);

        let view = slot.view2(&buf, (2, 3)).unwrap();
        assert_eq!(view[[0, 0]], 4.0);
        assert_eq!(view[[1, 2]], 9.0);

        assert!(slot.view2(&buf, (3, 3)).is_err());
        assert!(Slot::new(8, 4).get(&buf).is_err());
    }
}
