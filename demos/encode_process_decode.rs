//! Minimal encode-process-decode smoke example (Candle backend).
//!
//! Run:
//!   RUST_LOG=graphnets=debug cargo run --example encode_process_decode

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use graphnets::{EncodeProcessDecode, EncodeProcessDecodeConfig, GraphBatch, GraphData};
use tracing_subscriber::EnvFilter;

fn ring(n: u32, dev: &Device) -> Result<GraphData> {
    let edges: Vec<(u32, u32)> = (0..n).map(|i| (i, (i + 1) % n)).collect();
    Ok(GraphData::from_edge_list(
        Tensor::randn(0f32, 1f32, (n as usize, 3), dev)?,
        Tensor::randn(0f32, 1f32, (n as usize, 1), dev)?,
        Tensor::zeros((1, 1), DType::F32, dev)?,
        &edges,
    )?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let dev = &Device::Cpu;
    let batch = GraphBatch::from_data_list(&[ring(6, dev)?, ring(4, dev)?])?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, dev);
    let model = EncodeProcessDecode::new(EncodeProcessDecodeConfig::default(), vb)?;

    // the first pass sizes every lazy layer and registers its parameters
    let outputs = model.forward(&batch, 5)?;
    println!("parameters: {}", varmap.all_vars().len());

    for (step, out) in outputs.iter().enumerate() {
        let (nn, nd) = out.node_attr().dims2()?;
        let (en, ed) = out.edge_attr().dims2()?;
        let (gn, gd) = out.global_attr().dims2()?;
        println!("step {step}: nodes [{nn}, {nd}] edges [{en}, {ed}] globals [{gn}, {gd}]");
    }

    Ok(())
}
