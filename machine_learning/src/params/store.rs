use std::collections::HashMap;

use super::{ParamKind, ParamRole, ParamTensor, Slot};
use crate::{MlErr, Result};

/// Lays out named tensors one after the other and records aliases.
#[derive(Debug, Default)]
pub struct ParamStoreBuilder {
    tensors: Vec<ParamTensor>,
    index: HashMap<String, usize>,
    aliases: Vec<(String, usize)>,
    len: usize,
}

impl ParamStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves storage for a new tensor.
    ///
    /// # Arguments
    /// * `name` - The logical name of the tensor, unique in the store.
    /// * `shape` - The tensor's shape, row major.
    /// * `kind` - What the tensor is used for.
    /// * `role` - Its initialization role.
    ///
    /// # Returns
    /// The slot of the tensor or a `Config` error if the name is taken.
    pub fn push(
        &mut self,
        name: impl Into<String>,
        shape: &[usize],
        kind: ParamKind,
        role: ParamRole,
    ) -> Result<Slot> {
        let name = name.into();
        self.check_free(&name)?;

        let slot = Slot::new(self.len, shape.iter().product());
        self.len += slot.len();
        self.index.insert(name.clone(), self.tensors.len());
        self.tensors.push(ParamTensor {
            name,
            shape: shape.to_vec(),
            kind,
            role,
            slot,
        });

        Ok(slot)
    }

    /// Makes `alias` a second logical name for the storage of `target`.
    ///
    /// # Returns
    /// The shared slot, an `UnknownParam` error if `target` does not exist or a
    /// `Config` error if `alias` is taken.
    pub fn alias(&mut self, alias: impl Into<String>, target: &str) -> Result<Slot> {
        let alias = alias.into();
        self.check_free(&alias)?;

        let idx = *self
            .index
            .get(target)
            .ok_or_else(|| MlErr::UnknownParam(target.to_string()))?;

        self.aliases.push((alias, idx));
        Ok(self.tensors[idx].slot)
    }

    /// Allocates zeroed parameter and gradient buffers.
    pub fn build(self) -> ParamStore {
        let Self {
            tensors,
            index,
            aliases,
            len,
        } = self;

        ParamStore {
            params: vec![0.0; len],
            grad: vec![0.0; len],
            tensors,
            index,
            aliases,
        }
    }

    fn check_free(&self, name: &str) -> Result<()> {
        let taken = self.index.contains_key(name) || self.aliases.iter().any(|(a, _)| a == name);

        if taken {
            return Err(MlErr::Config(format!("parameter {name:?} is declared twice")));
        }

        Ok(())
    }
}

/// The owner of every parameter of a model and of its gradient.
#[derive(Debug, Clone)]
pub struct ParamStore {
    params: Vec<f32>,
    grad: Vec<f32>,
    tensors: Vec<ParamTensor>,
    index: HashMap<String, usize>,
    aliases: Vec<(String, usize)>,
}

impl ParamStore {
    /// Number of scalars held, tied storage counted once.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    pub fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.grad
    }

    /// Borrows both buffers at once, parameters first.
    pub fn buffers_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.params, &mut self.grad)
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    /// The owned tensors, in storage order.
    pub fn tensors(&self) -> &[ParamTensor] {
        &self.tensors
    }

    /// `(alias, tensor it refers to)` pairs.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &ParamTensor)> {
        self.aliases
            .iter()
            .map(|(alias, idx)| (alias.as_str(), &self.tensors[*idx]))
    }

    /// Every logical name, owned tensors first and aliases after them.
    pub fn logical_names(&self) -> impl Iterator<Item = &str> {
        self.tensors
            .iter()
            .map(|t| t.name.as_str())
            .chain(self.aliases.iter().map(|(alias, _)| alias.as_str()))
    }

    /// Looks a tensor up by any of its logical names.
    pub fn tensor(&self, name: &str) -> Option<&ParamTensor> {
        let idx = match self.index.get(name) {
            Some(idx) => *idx,
            None => self.aliases.iter().find(|(a, _)| a == name)?.1,
        };

        self.tensors.get(idx)
    }

    pub fn slot(&self, name: &str) -> Result<Slot> {
        self.tensor(name)
            .map(|t| t.slot)
            .ok_or_else(|| MlErr::UnknownParam(name.to_string()))
    }

    /// The values behind a logical name.
    pub fn get(&self, name: &str) -> Result<&[f32]> {
        self.slot(name)?.get(&self.params)
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut [f32]> {
        self.slot(name)?.get_mut(&mut self.params)
    }

    /// The gradient behind a logical name.
    pub fn get_grad(&self, name: &str) -> Result<&[f32]> {
        self.slot(name)?.get(&self.grad)
    }
}
