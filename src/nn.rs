use candle_core::{Result as TensorResult, Tensor};
use candle_nn::{layer_norm, linear, Activation, LayerNorm, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Settings shared by every layer of an [`Mlp`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    /// Nonlinearity applied after each linear layer.
    pub activation: Activation,
    /// Whether each layer ends with a `LayerNorm`.
    pub layer_norm: bool,
    /// `LayerNorm` epsilon.
    pub layer_norm_eps: f64,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            activation: Activation::Relu,
            layer_norm: true,
            layer_norm_eps: 1e-5,
        }
    }
}

impl MlpConfig {
    pub fn without_layer_norm(mut self) -> Self {
        self.layer_norm = false;
        self
    }
}

/// One perceptron layer: `Linear -> activation -> LayerNorm?`.
pub struct MlpBlock {
    linear: Linear,
    activation: Activation,
    norm: Option<LayerNorm>,
}

impl MlpBlock {
    pub fn new(
        in_features: usize,
        out_features: usize,
        config: MlpConfig,
        vb: VarBuilder,
    ) -> TensorResult<Self> {
        let linear = linear(in_features, out_features, vb.pp("linear"))?;
        let norm = if config.layer_norm {
            Some(layer_norm(
                out_features,
                config.layer_norm_eps,
                vb.pp("norm"),
            )?)
        } else {
            None
        };
        Ok(Self {
            linear,
            activation: config.activation,
            norm,
        })
    }
}

impl Module for MlpBlock {
    fn forward(&self, xs: &Tensor) -> TensorResult<Tensor> {
        let h = self.linear.forward(xs)?;
        let h = self.activation.forward(&h)?;
        match &self.norm {
            Some(norm) => norm.forward(&h),
            None => Ok(h),
        }
    }
}

/// Multilayer perceptron built from consecutive [`MlpBlock`]s.
///
/// `sizes = [in, h1, ..., out]` creates one block per adjacent pair, so
/// `Mlp::new(&[8, 16, 16], ..)` maps 8 features to 16 through two layers.
pub struct Mlp {
    blocks: Vec<MlpBlock>,
    in_features: usize,
    out_features: usize,
}

impl Mlp {
    pub fn new(sizes: &[usize], config: MlpConfig, vb: VarBuilder) -> Result<Self> {
        if sizes.len() < 2 {
            return Err(Error::InvalidConfig(format!(
                "mlp needs at least an input and an output size, got {sizes:?}"
            )));
        }
        let blocks = sizes
            .windows(2)
            .enumerate()
            .map(|(i, pair)| MlpBlock::new(pair[0], pair[1], config, vb.pp(format!("layer_{i}"))))
            .collect::<TensorResult<Vec<_>>>()?;
        Ok(Self {
            blocks,
            in_features: sizes[0],
            out_features: sizes[sizes.len() - 1],
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> TensorResult<Tensor> {
        let mut h = xs.clone();
        for block in &self.blocks {
            h = block.forward(&h)?;
        }
        Ok(h)
    }
}
