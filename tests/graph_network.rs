//! Composition properties of graph network steps.

use candle_core::{DType, Device, Result as TensorResult, Tensor};
use candle_nn::{VarBuilder, VarMap};
use graphnets::{
    Aggregator, EdgeBlock, Error, Flex, GlobalBlock, GraphBatch, GraphData, GraphNetwork,
    MlpConfig, NodeBlock,
};

fn identity(xs: &Tensor) -> TensorResult<Tensor> {
    Ok(xs.clone())
}

fn double(xs: &Tensor) -> TensorResult<Tensor> {
    xs * 2.0
}

/// Two graphs: a 3-node path and a 2-node cycle.
fn batch(device: &Device) -> GraphBatch {
    let a = GraphData::from_edge_list(
        Tensor::new(&[[1f32, 0.0], [2.0, 1.0], [3.0, 0.5]], device).unwrap(),
        Tensor::new(&[[1f32], [2.0]], device).unwrap(),
        Tensor::new(&[[0f32]], device).unwrap(),
        &[(0, 1), (1, 2)],
    )
    .unwrap();
    let b = GraphData::from_edge_list(
        Tensor::new(&[[4f32, 4.0], [5.0, 5.0]], device).unwrap(),
        Tensor::new(&[[3f32], [4.0]], device).unwrap(),
        Tensor::new(&[[1f32]], device).unwrap(),
        &[(0, 1), (1, 0)],
    )
    .unwrap();
    GraphBatch::from_data_list(&[a, b]).unwrap()
}

fn rows(t: &Tensor) -> Vec<Vec<f32>> {
    t.to_vec2::<f32>().unwrap()
}

#[test]
fn node_block_sees_updated_edges() {
    let device = Device::Cpu;
    let net = GraphNetwork::new(
        Some(EdgeBlock::independent(double)),
        Some(NodeBlock::aggregating(identity, Aggregator::new("add").unwrap())),
        None,
    );
    let out = net.forward(&batch(&device)).unwrap();

    assert_eq!(rows(out.edge_attr()), vec![vec![2.0], vec![4.0], vec![6.0], vec![8.0]]);
    // last column is the summed incoming edges after doubling
    let aggregated: Vec<f32> = rows(out.node_attr()).iter().map(|r| r[2]).collect();
    assert_eq!(aggregated, vec![0.0, 2.0, 4.0, 8.0, 6.0]);
}

#[test]
fn global_block_sees_updated_nodes_and_edges() {
    let device = Device::Cpu;
    let net = GraphNetwork::new(
        Some(EdgeBlock::independent(double)),
        Some(NodeBlock::independent(double)),
        Some(GlobalBlock::relational(
            identity,
            Some(Aggregator::new("sum").unwrap()),
            Some(Aggregator::new("sum").unwrap()),
        )),
    );
    let out = net.forward(&batch(&device)).unwrap();
    assert_eq!(
        rows(out.global_attr()),
        vec![vec![0.0, 12.0, 3.0, 6.0], vec![1.0, 18.0, 18.0, 14.0]]
    );
}

#[test]
fn independent_edge_block_ignores_node_features() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let block = EdgeBlock::independent(Flex::mlp(&[4, 3], MlpConfig::default(), vb).unwrap());

    let original = batch(&device);
    let perturbed_nodes = (original.node_attr() * 100.0).unwrap().exp().unwrap();
    let perturbed = original.with_attrs(
        perturbed_nodes,
        original.edge_attr().clone(),
        original.global_attr().clone(),
    );

    let a = block.forward_graph(&original).unwrap();
    let b = block.forward_graph(&perturbed).unwrap();
    assert_eq!(rows(&a), rows(&b));

    let src = Tensor::randn(0f32, 1f32, (4, 7), &device).unwrap();
    let c = block.forward(&src, &src, original.edge_attr()).unwrap();
    assert_eq!(rows(&a), rows(&c));
}

#[test]
fn graph_network_is_deterministic() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = MlpConfig::default();
    let net = GraphNetwork::new(
        Some(EdgeBlock::relational(Flex::mlp(&[8, 8], config, vb.pp("edge")).unwrap())),
        Some(NodeBlock::aggregating(
            Flex::mlp(&[8, 8], config, vb.pp("node")).unwrap(),
            Aggregator::new("max").unwrap(),
        )),
        Some(GlobalBlock::relational(
            Flex::mlp(&[8, 2], config, vb.pp("global")).unwrap(),
            Some(Aggregator::new("mean").unwrap()),
            Some(Aggregator::new("min").unwrap()),
        )),
    );
    let input = batch(&device);
    let first = net.forward(&input).unwrap();
    let second = net.forward(&input).unwrap();

    assert_eq!(rows(first.node_attr()), rows(second.node_attr()));
    assert_eq!(rows(first.edge_attr()), rows(second.edge_attr()));
    assert_eq!(rows(first.global_attr()), rows(second.global_attr()));
    assert_eq!(first.global_attr().dims(), &[2, 2]);
}

#[test]
fn output_shares_input_topology() {
    let device = Device::Cpu;
    let input = batch(&device);
    let net = GraphNetwork::new(Some(EdgeBlock::relational(identity)), None, None);
    let out = net.forward(&input).unwrap();

    assert_eq!(out.edge_attr().dims(), &[4, 5]);
    assert_eq!(
        out.edges().to_vec2::<u32>().unwrap(),
        input.edges().to_vec2::<u32>().unwrap()
    );
    assert_eq!(out.num_graphs(), 2);
}

#[test]
fn global_row_mismatch_propagates_tensor_error() {
    let device = Device::Cpu;
    let input = batch(&device);
    let three_globals = Tensor::zeros((3, 1), DType::F32, &device).unwrap();
    let input = input.with_attrs(
        input.node_attr().clone(),
        input.edge_attr().clone(),
        three_globals,
    );
    let net = GraphNetwork::new(
        None,
        None,
        Some(GlobalBlock::relational(
            identity,
            Some(Aggregator::new("mean").unwrap()),
            None,
        )),
    );
    let err = net.forward(&input).unwrap_err();
    assert!(matches!(err, Error::Tensor(_)));
    assert!(err.to_string().contains("shape mismatch"), "{err}");
}

#[test]
fn global_block_reduces_viewed_node_columns() {
    let device = Device::Cpu;
    let input = batch(&device).view(Some(0..1), None, None).unwrap();
    let net = GraphNetwork::new(
        None,
        None,
        Some(GlobalBlock::relational(
            identity,
            Some(Aggregator::new("mean").unwrap()),
            Some(Aggregator::new("sum").unwrap()),
        )),
    );
    let out = net.forward(&input).unwrap();
    assert_eq!(
        rows(out.global_attr()),
        vec![vec![0.0, 2.0, 3.0], vec![1.0, 4.5, 7.0]]
    );
}
