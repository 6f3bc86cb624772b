//! Flattened graph tensors.
//!
//! A single graph is a [`GraphData`]; many graphs are stacked row-wise into
//! a [`GraphBatch`]:
//!
//! ```text
//! node_attr   (N, Fn)    one row per node, all graphs concatenated
//! edge_attr   (E, Fe)    one row per edge, aligned with `edges`
//! global_attr (G, Fg)    one row per graph
//! edges       (2, E) u32 [senders; receivers], offset into the node table
//! node_idx    (N,)   u32 graph id of each node
//! edge_idx    (E,)   u32 graph id of each edge
//! ```
//!
//! Blocks never mutate a batch; they build a new one with
//! [`GraphBatch::with_attrs`] that shares the topology tensors.

use std::ops::Range;

use candle_core::{DType, Device, IndexOp, Tensor};

use crate::{Error, Result};

/// One graph.
#[derive(Debug, Clone)]
pub struct GraphData {
    node_attr: Tensor,
    edge_attr: Tensor,
    global_attr: Tensor,
    edges: Tensor,
}

impl GraphData {
    /// Build a graph, validating the layout.
    ///
    /// - `node_attr`: `(N, Fn)`
    /// - `edge_attr`: `(E, Fe)`
    /// - `global_attr`: `(1, Fg)`
    /// - `edges`: `(2, E)` integer tensor of `[senders; receivers]`
    pub fn new(
        node_attr: Tensor,
        edge_attr: Tensor,
        global_attr: Tensor,
        edges: Tensor,
    ) -> Result<Self> {
        check_rank("node_attr", &node_attr, 2)?;
        check_rank("edge_attr", &edge_attr, 2)?;
        check_rank("global_attr", &global_attr, 2)?;
        check_rank("edges", &edges, 2)?;

        let edges = match edges.dtype() {
            DType::U32 => edges,
            _ => edges.to_dtype(DType::U32)?,
        };
        let (rows, num_edges) = edges.dims2()?;
        if rows != 2 {
            return Err(Error::InvalidGraph(format!(
                "edges must have 2 rows (senders, receivers), got {rows}"
            )));
        }
        if edge_attr.dim(0)? != num_edges {
            return Err(Error::InvalidGraph(format!(
                "edge_attr has {} rows but edges lists {num_edges} edges",
                edge_attr.dim(0)?
            )));
        }
        if global_attr.dim(0)? != 1 {
            return Err(Error::InvalidGraph(format!(
                "global_attr must have exactly one row, got {}",
                global_attr.dim(0)?
            )));
        }
        let num_nodes = node_attr.dim(0)?;
        if let Some(&bad) = edges
            .flatten_all()?
            .to_vec1::<u32>()?
            .iter()
            .find(|&&v| v as usize >= num_nodes)
        {
            return Err(Error::InvalidGraph(format!(
                "edge endpoint {bad} is not a node id (graph has {num_nodes} nodes)"
            )));
        }

        Ok(Self {
            node_attr,
            edge_attr,
            global_attr,
            edges,
        })
    }

    /// Build a graph from `(sender, receiver)` pairs.
    pub fn from_edge_list(
        node_attr: Tensor,
        edge_attr: Tensor,
        global_attr: Tensor,
        edge_list: &[(u32, u32)],
    ) -> Result<Self> {
        let device = node_attr.device().clone();
        let edges = edges_tensor(
            edge_list.iter().map(|&(s, _)| s).collect(),
            edge_list.iter().map(|&(_, r)| r).collect(),
            &device,
        )?;
        Self::new(node_attr, edge_attr, global_attr, edges)
    }

    pub fn node_attr(&self) -> &Tensor {
        &self.node_attr
    }

    pub fn edge_attr(&self) -> &Tensor {
        &self.edge_attr
    }

    pub fn global_attr(&self) -> &Tensor {
        &self.global_attr
    }

    pub fn edges(&self) -> &Tensor {
        &self.edges
    }

    pub fn num_nodes(&self) -> usize {
        self.node_attr.dims()[0]
    }

    pub fn num_edges(&self) -> usize {
        self.edge_attr.dims()[0]
    }
}

/// Many graphs flattened into shared node, edge and global tables.
#[derive(Debug, Clone)]
pub struct GraphBatch {
    node_attr: Tensor,
    edge_attr: Tensor,
    global_attr: Tensor,
    edges: Tensor,
    node_idx: Tensor,
    edge_idx: Tensor,
    num_graphs: usize,
}

impl GraphBatch {
    /// Stack graphs into one batch, offsetting edge endpoints.
    pub fn from_data_list(graphs: &[GraphData]) -> Result<Self> {
        let Some(first) = graphs.first() else {
            return Err(Error::InvalidGraph(
                "cannot batch an empty list of graphs".to_string(),
            ));
        };
        let device = first.node_attr.device().clone();

        let mut senders = Vec::new();
        let mut receivers = Vec::new();
        let mut node_idx = Vec::new();
        let mut edge_idx = Vec::new();
        let mut offset = 0u32;
        for (g, graph) in graphs.iter().enumerate() {
            let pairs = graph.edges.to_vec2::<u32>()?;
            senders.extend(pairs[0].iter().map(|s| s + offset));
            receivers.extend(pairs[1].iter().map(|r| r + offset));
            node_idx.extend(std::iter::repeat(g as u32).take(graph.num_nodes()));
            edge_idx.extend(std::iter::repeat(g as u32).take(graph.num_edges()));
            offset += graph.num_nodes() as u32;
        }

        let cat = |f: fn(&GraphData) -> &Tensor| -> Result<Tensor> {
            let parts: Vec<&Tensor> = graphs.iter().map(f).collect();
            Ok(Tensor::cat(&parts, 0)?)
        };
        let num_nodes = node_idx.len();
        let num_edges = edge_idx.len();
        Ok(Self {
            node_attr: cat(GraphData::node_attr)?,
            edge_attr: cat(GraphData::edge_attr)?,
            global_attr: cat(GraphData::global_attr)?,
            edges: edges_tensor(senders, receivers, &device)?,
            node_idx: Tensor::from_vec(node_idx, num_nodes, &device)?,
            edge_idx: Tensor::from_vec(edge_idx, num_edges, &device)?,
            num_graphs: graphs.len(),
        })
    }

    /// Split the batch back into its graphs.
    pub fn to_data_list(&self) -> Result<Vec<GraphData>> {
        let node_counts = counts(&self.node_idx, self.num_graphs())?;
        let edge_counts = counts(&self.edge_idx, self.num_graphs())?;
        let pairs = self.edges.to_vec2::<u32>()?;
        let device = self.node_attr.device();

        let mut graphs = Vec::with_capacity(self.num_graphs());
        let (mut node_start, mut edge_start) = (0usize, 0usize);
        for g in 0..self.num_graphs() {
            let (n, e) = (node_counts[g], edge_counts[g]);
            let offset = node_start as u32;
            let range = edge_start..edge_start + e;
            let edges = edges_tensor(
                pairs[0][range.clone()].iter().map(|s| s - offset).collect(),
                pairs[1][range].iter().map(|r| r - offset).collect(),
                device,
            )?;
            graphs.push(GraphData::new(
                self.node_attr.narrow(0, node_start, n)?,
                self.edge_attr.narrow(0, edge_start, e)?,
                self.global_attr.narrow(0, g, 1)?,
                edges,
            )?);
            node_start += n;
            edge_start += e;
        }
        Ok(graphs)
    }

    pub fn node_attr(&self) -> &Tensor {
        &self.node_attr
    }

    pub fn edge_attr(&self) -> &Tensor {
        &self.edge_attr
    }

    pub fn global_attr(&self) -> &Tensor {
        &self.global_attr
    }

    pub fn edges(&self) -> &Tensor {
        &self.edges
    }

    /// Graph id of every node.
    pub fn node_idx(&self) -> &Tensor {
        &self.node_idx
    }

    /// Graph id of every edge.
    pub fn edge_idx(&self) -> &Tensor {
        &self.edge_idx
    }

    /// Source node of every edge.
    pub fn senders(&self) -> Result<Tensor> {
        Ok(self.edges.i(0)?)
    }

    /// Destination node of every edge.
    pub fn receivers(&self) -> Result<Tensor> {
        Ok(self.edges.i(1)?)
    }

    pub fn num_nodes(&self) -> usize {
        self.node_idx.dims()[0]
    }

    pub fn num_edges(&self) -> usize {
        self.edge_idx.dims()[0]
    }

    /// Number of graphs, fixed when the batch is built.
    ///
    /// Global aggregations produce this many rows regardless of the current
    /// `global_attr`.
    pub fn num_graphs(&self) -> usize {
        self.num_graphs
    }

    pub fn device(&self) -> &Device {
        self.node_attr.device()
    }

    /// New batch with the same topology and replaced features.
    pub fn with_attrs(&self, node_attr: Tensor, edge_attr: Tensor, global_attr: Tensor) -> Self {
        Self {
            node_attr,
            edge_attr,
            global_attr,
            edges: self.edges.clone(),
            node_idx: self.node_idx.clone(),
            edge_idx: self.edge_idx.clone(),
            num_graphs: self.num_graphs,
        }
    }

    /// Concatenate features of two batches with the same topology, column-wise.
    ///
    /// Keeps `self`'s topology. Row mismatches fail with the tensor error
    /// raised by the concatenation.
    pub fn cat_features(&self, other: &GraphBatch) -> Result<Self> {
        Ok(self.with_attrs(
            Tensor::cat(&[&self.node_attr, &other.node_attr], 1)?,
            Tensor::cat(&[&self.edge_attr, &other.edge_attr], 1)?,
            Tensor::cat(&[&self.global_attr, &other.global_attr], 1)?,
        ))
    }

    /// Narrow feature columns; `None` keeps every column of that table.
    ///
    /// `batch.view(Some(0..3), None, None)` keeps the first three node features.
    pub fn view(
        &self,
        nodes: Option<Range<usize>>,
        edges: Option<Range<usize>>,
        globals: Option<Range<usize>>,
    ) -> Result<Self> {
        Ok(self.with_attrs(
            narrow_columns(&self.node_attr, nodes)?,
            narrow_columns(&self.edge_attr, edges)?,
            narrow_columns(&self.global_attr, globals)?,
        ))
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            node_attr: self.node_attr.to_device(device)?,
            edge_attr: self.edge_attr.to_device(device)?,
            global_attr: self.global_attr.to_device(device)?,
            edges: self.edges.to_device(device)?,
            node_idx: self.node_idx.to_device(device)?,
            edge_idx: self.edge_idx.to_device(device)?,
            num_graphs: self.num_graphs,
        })
    }
}

/// Consecutive batches of `batch_size` graphs (the last may be shorter).
pub fn batches(
    graphs: &[GraphData],
    batch_size: usize,
) -> Result<impl Iterator<Item = Result<GraphBatch>> + '_> {
    if batch_size == 0 {
        return Err(Error::InvalidConfig("batch_size must be positive".to_string()));
    }
    Ok(graphs.chunks(batch_size).map(GraphBatch::from_data_list))
}

fn check_rank(name: &str, t: &Tensor, rank: usize) -> Result<()> {
    if t.rank() != rank {
        return Err(Error::InvalidGraph(format!(
            "{name} must have rank {rank}, got shape {:?}",
            t.dims()
        )));
    }
    Ok(())
}

fn edges_tensor(senders: Vec<u32>, receivers: Vec<u32>, device: &Device) -> Result<Tensor> {
    let num_edges = senders.len();
    let mut flat = senders;
    flat.extend(receivers);
    Ok(Tensor::from_vec(flat, (2, num_edges), device)?)
}

fn counts(index: &Tensor, groups: usize) -> Result<Vec<usize>> {
    let mut out = vec![0usize; groups];
    for g in index.to_vec1::<u32>()? {
        let g = g as usize;
        if g >= groups {
            return Err(Error::IndexOutOfRange {
                index: g,
                dim_size: groups,
            });
        }
        out[g] += 1;
    }
    Ok(out)
}

fn narrow_columns(t: &Tensor, cols: Option<Range<usize>>) -> Result<Tensor> {
    match cols {
        None => Ok(t.clone()),
        Some(r) => Ok(t.narrow(1, r.start, r.end.saturating_sub(r.start))?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(num_nodes: usize, edge_list: &[(u32, u32)], fill: f32) -> GraphData {
        let device = Device::Cpu;
        GraphData::from_edge_list(
            (Tensor::ones((num_nodes, 3), DType::F32, &device).unwrap() * fill as f64).unwrap(),
            Tensor::ones((edge_list.len(), 2), DType::F32, &device).unwrap(),
            Tensor::zeros((1, 4), DType::F32, &device).unwrap(),
            edge_list,
        )
        .unwrap()
    }

    #[test]
    fn test_batch_offsets_edges_and_indexes_graphs() {
        let a = graph(3, &[(0, 1), (1, 2)], 1.0);
        let b = graph(2, &[(1, 0)], 2.0);
        let batch = GraphBatch::from_data_list(&[a, b]).unwrap();

        assert_eq!(batch.num_nodes(), 5);
        assert_eq!(batch.num_edges(), 3);
        assert_eq!(batch.num_graphs(), 2);
        assert_eq!(batch.senders().unwrap().to_vec1::<u32>().unwrap(), vec![0, 1, 4]);
        assert_eq!(batch.receivers().unwrap().to_vec1::<u32>().unwrap(), vec![1, 2, 3]);
        assert_eq!(batch.node_idx().to_vec1::<u32>().unwrap(), vec![0, 0, 0, 1, 1]);
        assert_eq!(batch.edge_idx().to_vec1::<u32>().unwrap(), vec![0, 0, 1]);
        assert_eq!(batch.global_attr().dims(), &[2, 4]);
    }

    #[test]
    fn test_to_data_list_restores_graphs() {
        let batch =
            GraphBatch::from_data_list(&[graph(3, &[(0, 1), (1, 2)], 1.0), graph(2, &[(1, 0)], 2.0)])
                .unwrap();
        let graphs = batch.to_data_list().unwrap();
        assert_eq!(graphs.len(), 2);
        assert_eq!(graphs[1].num_nodes(), 2);
        assert_eq!(graphs[1].edges().to_vec2::<u32>().unwrap(), vec![vec![1], vec![0]]);
        assert_eq!(
            graphs[1].node_attr().to_vec2::<f32>().unwrap(),
            vec![vec![2.0; 3]; 2]
        );
    }

    #[test]
    fn test_graph_without_edges() {
        let batch = GraphBatch::from_data_list(&[graph(2, &[], 1.0), graph(1, &[(0, 0)], 1.0)])
            .unwrap();
        assert_eq!(batch.num_edges(), 1);
        assert_eq!(batch.senders().unwrap().to_vec1::<u32>().unwrap(), vec![2]);
    }

    #[test]
    fn test_rejects_dangling_edge() {
        let device = Device::Cpu;
        let err = GraphData::from_edge_list(
            Tensor::ones((2, 3), DType::F32, &device).unwrap(),
            Tensor::ones((1, 2), DType::F32, &device).unwrap(),
            Tensor::zeros((1, 4), DType::F32, &device).unwrap(),
            &[(0, 5)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidGraph(_)));
    }

    #[test]
    fn test_rejects_misaligned_edge_attr() {
        let device = Device::Cpu;
        let err = GraphData::from_edge_list(
            Tensor::ones((2, 3), DType::F32, &device).unwrap(),
            Tensor::ones((3, 2), DType::F32, &device).unwrap(),
            Tensor::zeros((1, 4), DType::F32, &device).unwrap(),
            &[(0, 1)],
        )
        .unwrap_err();
        assert!(err.to_string().contains("edge_attr"));
    }

    #[test]
    fn test_empty_list_is_an_error() {
        assert!(GraphBatch::from_data_list(&[]).is_err());
    }

    #[test]
    fn test_cat_features_and_view() {
        let batch = GraphBatch::from_data_list(&[graph(3, &[(0, 1)], 1.0)]).unwrap();
        let doubled = batch.cat_features(&batch).unwrap();
        assert_eq!(doubled.node_attr().dims(), &[3, 6]);
        assert_eq!(doubled.edge_attr().dims(), &[1, 4]);
        assert_eq!(doubled.global_attr().dims(), &[1, 8]);

        let narrowed = doubled.view(Some(0..5), None, Some(2..3)).unwrap();
        assert_eq!(narrowed.node_attr().dims(), &[3, 5]);
        assert_eq!(narrowed.edge_attr().dims(), &[1, 4]);
        assert_eq!(narrowed.global_attr().dims(), &[1, 1]);
    }

    #[test]
    fn test_cat_features_row_mismatch_is_tensor_error() {
        let small = GraphBatch::from_data_list(&[graph(2, &[(0, 1)], 1.0)]).unwrap();
        let large = GraphBatch::from_data_list(&[graph(4, &[(0, 1)], 1.0)]).unwrap();
        let err = small.cat_features(&large).unwrap_err();
        assert!(matches!(err, Error::Tensor(_)));
    }

    #[test]
    fn test_batches_chunks() {
        let graphs: Vec<_> = (0..5).map(|_| graph(2, &[(0, 1)], 1.0)).collect();
        let sizes: Vec<usize> = batches(&graphs, 2)
            .unwrap()
            .map(|b| b.unwrap().num_graphs())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(batches(&graphs, 0).is_err());
    }
}
