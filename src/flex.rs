//! Deferred-shape module construction.
//!
//! Block inputs are concatenations whose width is only known once real
//! tensors arrive (`[src || dest || edge]`, `[node || aggregated]`, ...).
//! [`Flex`] stores a factory and builds the wrapped module on the first
//! `forward`, taking the input width from the last dimension of that tensor.
//!
//! Parameters are registered in the `VarMap` behind the stored `VarBuilder`
//! at that moment, so run one forward pass before collecting
//! `varmap.all_vars()` for an optimizer.

use std::fmt;
use std::sync::OnceLock;

use candle_core::{Result as TensorResult, Tensor, D};
use candle_nn::{Module, VarBuilder};
use tracing::debug;

use crate::nn::{Mlp, MlpConfig};
use crate::{Error, Result};

type Factory<M> = Box<dyn Fn(usize, VarBuilder<'static>) -> Result<M>>;

/// A module whose input width is inferred on first call.
pub struct Flex<M> {
    factory: Factory<M>,
    vb: VarBuilder<'static>,
    resolved: OnceLock<(usize, M)>,
}

impl<M: Module> Flex<M> {
    /// Wrap a factory taking the inferred input width and a `VarBuilder`.
    pub fn new<F>(vb: VarBuilder<'static>, factory: F) -> Self
    where
        F: Fn(usize, VarBuilder<'static>) -> Result<M> + 'static,
    {
        Self {
            factory: Box::new(factory),
            vb,
            resolved: OnceLock::new(),
        }
    }

    /// Input width seen on the first call, if any.
    pub fn in_dim(&self) -> Option<usize> {
        self.resolved.get().map(|(d, _)| *d)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    fn module(&self, in_dim: usize) -> Result<&M> {
        if let Some((_, m)) = self.resolved.get() {
            return Ok(m);
        }
        let m = (self.factory)(in_dim, self.vb.clone())?;
        debug!(in_dim, "materialized flex module");
        Ok(&self.resolved.get_or_init(|| (in_dim, m)).1)
    }
}

impl Flex<Mlp> {
    /// Lazily sized [`Mlp`]: `sizes` lists every width after the input.
    ///
    /// `Flex::mlp(&[16, 16], ..)` becomes `Mlp::new(&[in, 16, 16], ..)`.
    /// An empty `sizes` is rejected here rather than on the first call.
    pub fn mlp(sizes: &[usize], config: MlpConfig, vb: VarBuilder<'static>) -> Result<Self> {
        if sizes.is_empty() {
            return Err(Error::InvalidConfig(
                "flex mlp needs at least one output size".to_string(),
            ));
        }
        let sizes = sizes.to_vec();
        Ok(Self::new(vb, move |in_dim, vb| {
            let mut all = Vec::with_capacity(sizes.len() + 1);
            all.push(in_dim);
            all.extend_from_slice(&sizes);
            Mlp::new(&all, config, vb)
        }))
    }
}

impl<M: Module> Module for Flex<M> {
    fn forward(&self, xs: &Tensor) -> TensorResult<Tensor> {
        let in_dim = xs.dim(D::Minus1)?;
        let m = self.module(in_dim).map_err(|e| match e {
            Error::Tensor(inner) => inner,
            other => candle_core::Error::wrap(other),
        })?;
        m.forward(xs)
    }
}

impl<M> fmt::Debug for Flex<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flex")
            .field("in_dim", &self.resolved.get().map(|(d, _)| *d))
            .finish()
    }
}
