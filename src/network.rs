//! Full graph network steps built from blocks.

use tracing::trace;

use crate::blocks::{EdgeBlock, GlobalBlock, NodeBlock};
use crate::data::GraphBatch;
use crate::{Error, Result};

/// One message-passing step.
///
/// ```text
/// e' = phi_e(v, e)        edge block sees the old nodes and edges
/// v' = phi_v(v, e')       node block sees the updated edges
/// u' = phi_u(u, v', e')   global block sees the updated nodes and edges
/// ```
///
/// A missing block leaves its features unchanged.
pub struct GraphNetwork {
    edge_block: Option<EdgeBlock>,
    node_block: Option<NodeBlock>,
    global_block: Option<GlobalBlock>,
}

impl GraphNetwork {
    pub fn new(
        edge_block: Option<EdgeBlock>,
        node_block: Option<NodeBlock>,
        global_block: Option<GlobalBlock>,
    ) -> Self {
        Self {
            edge_block,
            node_block,
            global_block,
        }
    }

    pub fn edge_block(&self) -> Option<&EdgeBlock> {
        self.edge_block.as_ref()
    }

    pub fn node_block(&self) -> Option<&NodeBlock> {
        self.node_block.as_ref()
    }

    pub fn global_block(&self) -> Option<&GlobalBlock> {
        self.global_block.as_ref()
    }

    pub fn forward(&self, batch: &GraphBatch) -> Result<GraphBatch> {
        trace!(
            nodes = batch.num_nodes(),
            edges = batch.num_edges(),
            graphs = batch.num_graphs(),
            "graph network step"
        );
        let edge_attr = match &self.edge_block {
            Some(block) => block.forward_graph(batch)?,
            None => batch.edge_attr().clone(),
        };
        let batch = batch.with_attrs(
            batch.node_attr().clone(),
            edge_attr,
            batch.global_attr().clone(),
        );

        let node_attr = match &self.node_block {
            Some(block) => block.forward_graph(&batch)?,
            None => batch.node_attr().clone(),
        };
        let batch = batch.with_attrs(
            node_attr,
            batch.edge_attr().clone(),
            batch.global_attr().clone(),
        );

        let global_attr = match &self.global_block {
            Some(block) => block.forward_graph(&batch)?,
            None => batch.global_attr().clone(),
        };
        Ok(batch.with_attrs(
            batch.node_attr().clone(),
            batch.edge_attr().clone(),
            global_attr,
        ))
    }
}

/// Applies each block to its own entity's features, with no message passing.
///
/// Used for the encoder and decoder stages of an encode-process-decode model.
pub struct GraphEncoder {
    edge_block: Option<EdgeBlock>,
    node_block: Option<NodeBlock>,
    global_block: Option<GlobalBlock>,
}

impl GraphEncoder {
    /// Fails if any block reads relational inputs.
    pub fn new(
        edge_block: Option<EdgeBlock>,
        node_block: Option<NodeBlock>,
        global_block: Option<GlobalBlock>,
    ) -> Result<Self> {
        let relational = [
            ("edge", edge_block.as_ref().is_some_and(|b| !b.is_independent())),
            ("node", node_block.as_ref().is_some_and(|b| !b.is_independent())),
            ("global", global_block.as_ref().is_some_and(|b| !b.is_independent())),
        ];
        if let Some((name, _)) = relational.iter().find(|(_, r)| *r) {
            return Err(Error::InvalidConfig(format!(
                "graph encoder {name} block must be independent"
            )));
        }
        Ok(Self {
            edge_block,
            node_block,
            global_block,
        })
    }

    pub fn forward(&self, batch: &GraphBatch) -> Result<GraphBatch> {
        let edge_attr = match &self.edge_block {
            Some(block) => block.forward_graph(batch)?,
            None => batch.edge_attr().clone(),
        };
        let node_attr = match &self.node_block {
            Some(block) => block.forward_graph(batch)?,
            None => batch.node_attr().clone(),
        };
        let global_attr = match &self.global_block {
            Some(block) => block.forward_graph(batch)?,
            None => batch.global_attr().clone(),
        };
        Ok(batch.with_attrs(node_attr, edge_attr, global_attr))
    }
}
