//! Graph network blocks: one update function per entity type.
//!
//! Each block owns a feature transform (any [`Module`], usually a
//! [`Flex`](crate::flex::Flex) MLP) and decides what gets concatenated in
//! front of it:
//!
//! | Block | Independent | Relational |
//! |-------|-------------|------------|
//! | [`EdgeBlock`] | `phi(e)` | `phi([v_src, v_dest, e])` |
//! | [`NodeBlock`] | `phi(v)` | `phi([v, AGG_e->v(e')])` |
//! | [`GlobalBlock`] | `phi(u)` | `phi([u, AGG_v->u(v'), AGG_e->u(e')])` |

use candle_core::{IndexOp, Tensor};
use candle_nn::Module;

use crate::aggregate::{AggregateOptions, Aggregator};
use crate::data::GraphBatch;
use crate::Result;

/// Inputs an edge update reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeUpdate {
    /// Edge features only.
    Independent,
    /// Sender features, receiver features and edge features.
    Relational,
}

/// Edge update block.
pub struct EdgeBlock {
    mlp: Box<dyn Module>,
    update: EdgeUpdate,
}

impl EdgeBlock {
    pub fn new(mlp: impl Module + 'static, update: EdgeUpdate) -> Self {
        Self {
            mlp: Box::new(mlp),
            update,
        }
    }

    pub fn independent(mlp: impl Module + 'static) -> Self {
        Self::new(mlp, EdgeUpdate::Independent)
    }

    pub fn relational(mlp: impl Module + 'static) -> Self {
        Self::new(mlp, EdgeUpdate::Relational)
    }

    pub fn update(&self) -> EdgeUpdate {
        self.update
    }

    pub fn is_independent(&self) -> bool {
        self.update == EdgeUpdate::Independent
    }

    /// New edge features from per-edge sender rows, receiver rows and edge rows.
    pub fn forward(&self, src: &Tensor, dest: &Tensor, edge_attr: &Tensor) -> Result<Tensor> {
        match self.update {
            EdgeUpdate::Independent => Ok(self.mlp.forward(edge_attr)?),
            EdgeUpdate::Relational => {
                let h = Tensor::cat(&[src, dest, edge_attr], 1)?;
                Ok(self.mlp.forward(&h)?)
            }
        }
    }

    /// Apply the block to a batch, gathering endpoint features by edge.
    pub fn forward_graph(&self, batch: &GraphBatch) -> Result<Tensor> {
        if self.is_independent() {
            return Ok(self.mlp.forward(batch.edge_attr())?);
        }
        let src = batch.node_attr().index_select(&batch.senders()?, 0)?;
        let dest = batch.node_attr().index_select(&batch.receivers()?, 0)?;
        self.forward(&src, &dest, batch.edge_attr())
    }
}

/// Direction messages travel when edges are aggregated onto nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Flow {
    /// Each node collects its incoming edges (grouped by receiver).
    #[default]
    SourceToTarget,
    /// Each node collects its outgoing edges (grouped by sender).
    TargetToSource,
}

/// Node update block.
///
/// Without an edge aggregator the update is `phi(v)`; with one it becomes
/// the aggregating form `phi([v, AGG(e)])`.
pub struct NodeBlock {
    mlp: Box<dyn Module>,
    edge_aggregator: Option<Aggregator>,
    flow: Flow,
}

impl NodeBlock {
    pub fn independent(mlp: impl Module + 'static) -> Self {
        Self::relational(mlp, None)
    }

    /// Aggregating node block (incoming edges by default).
    pub fn aggregating(mlp: impl Module + 'static, edge_aggregator: Aggregator) -> Self {
        Self::relational(mlp, Some(edge_aggregator))
    }

    /// Relational node block; `None` falls back to node features alone.
    pub fn relational(mlp: impl Module + 'static, edge_aggregator: Option<Aggregator>) -> Self {
        Self {
            mlp: Box::new(mlp),
            edge_aggregator,
            flow: Flow::default(),
        }
    }

    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flow = flow;
        self
    }

    pub fn flow(&self) -> Flow {
        self.flow
    }

    pub fn edge_aggregator(&self) -> Option<&Aggregator> {
        self.edge_aggregator.as_ref()
    }

    pub fn is_independent(&self) -> bool {
        self.edge_aggregator.is_none()
    }

    /// New node features.
    ///
    /// `edges` is the `(2, E)` sender/receiver table; edge rows are reduced
    /// into `node_attr.dim(0)` groups.
    pub fn forward(&self, node_attr: &Tensor, edge_attr: &Tensor, edges: &Tensor) -> Result<Tensor> {
        let Some(aggregator) = &self.edge_aggregator else {
            return Ok(self.mlp.forward(node_attr)?);
        };
        let index = match self.flow {
            Flow::SourceToTarget => edges.i(1)?,
            Flow::TargetToSource => edges.i(0)?,
        };
        let aggregated = aggregator.aggregate(
            edge_attr,
            &index,
            AggregateOptions::with_dim_size(node_attr.dim(0)?),
        )?;
        let h = Tensor::cat(&[node_attr, &aggregated], 1)?;
        Ok(self.mlp.forward(&h)?)
    }

    pub fn forward_graph(&self, batch: &GraphBatch) -> Result<Tensor> {
        self.forward(batch.node_attr(), batch.edge_attr(), batch.edges())
    }
}

/// Global (per-graph) update block.
pub struct GlobalBlock {
    mlp: Box<dyn Module>,
    independent: bool,
    node_aggregator: Option<Aggregator>,
    edge_aggregator: Option<Aggregator>,
}

impl GlobalBlock {
    pub fn independent(mlp: impl Module + 'static) -> Self {
        Self {
            mlp: Box::new(mlp),
            independent: true,
            node_aggregator: None,
            edge_aggregator: None,
        }
    }

    /// Relational global block; each present aggregator adds one reduced
    /// table after the global features.
    pub fn relational(
        mlp: impl Module + 'static,
        node_aggregator: Option<Aggregator>,
        edge_aggregator: Option<Aggregator>,
    ) -> Self {
        Self {
            mlp: Box::new(mlp),
            independent: false,
            node_aggregator,
            edge_aggregator,
        }
    }

    pub fn is_independent(&self) -> bool {
        self.independent
    }

    /// New global features.
    ///
    /// `node_idx` / `edge_idx` hold the graph id of every node / edge and
    /// each aggregation produces `num_graphs` rows. If `global_attr` has a
    /// different row count the concatenation error is returned as is.
    pub fn forward(
        &self,
        global_attr: &Tensor,
        node_attr: &Tensor,
        edge_attr: &Tensor,
        node_idx: &Tensor,
        edge_idx: &Tensor,
        num_graphs: usize,
    ) -> Result<Tensor> {
        if self.independent {
            return Ok(self.mlp.forward(global_attr)?);
        }
        let options = AggregateOptions::with_dim_size(num_graphs);
        let mut parts = vec![global_attr.clone()];
        if let Some(agg) = &self.node_aggregator {
            parts.push(agg.aggregate(node_attr, node_idx, options)?);
        }
        if let Some(agg) = &self.edge_aggregator {
            parts.push(agg.aggregate(edge_attr, edge_idx, options)?);
        }
        let h = Tensor::cat(&parts, 1)?;
        Ok(self.mlp.forward(&h)?)
    }

    pub fn forward_graph(&self, batch: &GraphBatch) -> Result<Tensor> {
        self.forward(
            batch.global_attr(),
            batch.node_attr(),
            batch.edge_attr(),
            batch.node_idx(),
            batch.edge_idx(),
            batch.num_graphs(),
        )
    }
}
