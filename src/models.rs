//! Encode-process-decode graph model.
//!
//! ```text
//! input ──► encoder ──► latent0 ─┬─────────────────────────────┐
//!                                ▼                             │
//!                   core([latent0 || latent]) ──► latent ──────┤ (x steps)
//!                                                    │         │
//!                                                    ▼         │
//!                                               decoder ──► output[step]
//! ```
//!
//! Every stage is built from lazily sized [`Flex`] transforms, so the model
//! adapts to the input feature widths on its first forward pass.

use candle_core::{Result as TensorResult, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::aggregate::{Aggregator, AggregatorConfig, Reduction};
use crate::blocks::{EdgeBlock, GlobalBlock, NodeBlock};
use crate::data::GraphBatch;
use crate::flex::Flex;
use crate::network::{GraphEncoder, GraphNetwork};
use crate::nn::{Mlp, MlpConfig};
use crate::{Error, Result};

/// Widths and layer settings for [`EncodeProcessDecode`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncodeProcessDecodeConfig {
    /// Width of every latent table (node, edge and global).
    pub latent_size: usize,
    /// Decoded node feature width.
    pub node_out: usize,
    /// Decoded edge feature width.
    pub edge_out: usize,
    /// Decoded global feature width.
    pub global_out: usize,
    /// Reduction used by the core node block.
    pub reduction: Reduction,
    /// Hidden layer settings.
    pub mlp: MlpConfig,
}

impl Default for EncodeProcessDecodeConfig {
    fn default() -> Self {
        Self {
            latent_size: 16,
            node_out: 1,
            edge_out: 1,
            global_out: 1,
            reduction: Reduction::Mean,
            mlp: MlpConfig::default(),
        }
    }
}

/// Hidden MLP followed by a plain linear projection.
///
/// The projection has no activation or norm, so decoded values are unbounded
/// logits/regression targets.
pub struct Readout {
    hidden: Mlp,
    out: Linear,
}

impl Readout {
    pub fn new(
        in_features: usize,
        hidden: usize,
        out_features: usize,
        config: MlpConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            hidden: Mlp::new(&[in_features, hidden], config, vb.pp("hidden"))?,
            out: linear(hidden, out_features, vb.pp("out"))?,
        })
    }
}

impl Module for Readout {
    fn forward(&self, xs: &Tensor) -> TensorResult<Tensor> {
        self.out.forward(&self.hidden.forward(xs)?)
    }
}

/// Encoder, recurrent core and decoder.
pub struct EncodeProcessDecode {
    encoder: GraphEncoder,
    core: GraphNetwork,
    decoder: GraphEncoder,
    config: EncodeProcessDecodeConfig,
}

impl EncodeProcessDecode {
    pub fn new(config: EncodeProcessDecodeConfig, vb: VarBuilder<'static>) -> Result<Self> {
        if config.latent_size == 0 {
            return Err(Error::InvalidConfig("latent_size must be positive".to_string()));
        }
        let l = config.latent_size;
        let mlp = config.mlp;
        let latent = move |vb: VarBuilder<'static>| Flex::mlp(&[l, l], mlp, vb);
        let readout = move |out: usize, vb: VarBuilder<'static>| {
            Flex::new(vb, move |in_dim, vb| Readout::new(in_dim, l, out, mlp, vb))
        };

        let enc = vb.pp("encoder");
        let encoder = GraphEncoder::new(
            Some(EdgeBlock::independent(latent(enc.pp("edge"))?)),
            Some(NodeBlock::independent(latent(enc.pp("node"))?)),
            Some(GlobalBlock::independent(latent(enc.pp("global"))?)),
        )?;

        let core = vb.pp("core");
        let aggregator = Aggregator::from_config(AggregatorConfig {
            reduction: config.reduction,
            dim_size: None,
        });
        let core = GraphNetwork::new(
            Some(EdgeBlock::relational(latent(core.pp("edge"))?)),
            Some(NodeBlock::aggregating(latent(core.pp("node"))?, aggregator)),
            Some(GlobalBlock::independent(latent(core.pp("global"))?)),
        );

        let dec = vb.pp("decoder");
        let decoder = GraphEncoder::new(
            Some(EdgeBlock::independent(readout(config.edge_out, dec.pp("edge")))),
            Some(NodeBlock::independent(readout(config.node_out, dec.pp("node")))),
            Some(GlobalBlock::independent(readout(config.global_out, dec.pp("global")))),
        )?;

        Ok(Self {
            encoder,
            core,
            decoder,
            config,
        })
    }

    pub fn config(&self) -> &EncodeProcessDecodeConfig {
        &self.config
    }

    /// Encode once, then run `steps` core iterations, decoding after each.
    pub fn forward(&self, input: &GraphBatch, steps: usize) -> Result<Vec<GraphBatch>> {
        let latent0 = self.encoder.forward(input)?;
        let mut latent = latent0.clone();
        let mut outputs = Vec::with_capacity(steps);
        for step in 0..steps {
            let core_input = latent0.cat_features(&latent)?;
            latent = self.core.forward(&core_input)?;
            outputs.push(self.decoder.forward(&latent)?);
            trace!(step, "encode-process-decode step");
        }
        Ok(outputs)
    }
}
