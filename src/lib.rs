//! graphnets: graph network blocks on `candle` tensors.
//!
//! Provides the edge, node and global update blocks of a graph network,
//! scatter-style aggregation, lazily sized MLPs and a flattened batched
//! graph representation.
//!
//! ```rust,ignore
//! use graphnets::{Aggregator, EdgeBlock, Flex, GraphNetwork, MlpConfig, NodeBlock};
//!
//! let core = GraphNetwork::new(
//!     Some(EdgeBlock::relational(Flex::mlp(&[16, 16], MlpConfig::default(), vb.pp("edge"))?)),
//!     Some(NodeBlock::aggregating(
//!         Flex::mlp(&[16, 16], MlpConfig::default(), vb.pp("node"))?,
//!         Aggregator::new("mean")?,
//!     )),
//!     None,
//! );
//! let out = core.forward(&batch)?;
//! ```

pub mod aggregate;
pub mod blocks;
pub mod data;
pub mod error;
pub mod flex;
pub mod models;
pub mod network;
pub mod nn;

pub use aggregate::{AggregateOptions, Aggregator, AggregatorConfig, Reduction};
pub use blocks::{EdgeBlock, EdgeUpdate, Flow, GlobalBlock, NodeBlock};
pub use data::{batches, GraphBatch, GraphData};
pub use error::{Error, Result};
pub use flex::Flex;
pub use models::{EncodeProcessDecode, EncodeProcessDecodeConfig};
pub use network::{GraphEncoder, GraphNetwork};
pub use nn::{Mlp, MlpBlock, MlpConfig};
