//! 吞吐估计
//!
//! - 流量上界：假设网络传输瞬时完成时系统能达到的最大吞吐，
//!   `Σ_i max_k(throughput_i[k] * k) / num_layers`。每个 token 需经过全部层，
//!   节点 i 每秒最多处理 `max_k(throughput_i[k] * k)` 个 token·层。
//! - 流水线吞吐：各级节点吞吐与沿途链路吞吐的最小值。

use super::solution::{LayoutSolution, Pipeline};
use crate::cluster::{ModelProfile, NodeRef, Topology};

/// 网络瞬时传输假设下的吞吐上界（tokens/s）
pub fn flow_upper_bound(topology: &Topology, model: &ModelProfile) -> f64 {
    let total: f64 = topology
        .nodes()
        .iter()
        .map(|node| node.peak_layer_throughput())
        .sum();
    total / model.num_layers as f64
}

/// 单条流水线的稳态吞吐；用到不存在的节点或链路时为 0
pub fn pipeline_throughput(topology: &Topology, pipeline: &Pipeline) -> f64 {
    let mut throughput = f64::INFINITY;
    let mut prev = NodeRef::Source;
    for stage in pipeline.stages() {
        let Some(node) = topology.node(stage.node) else {
            return 0.0;
        };
        let Some(node_tp) = node.throughput(stage.layers.len()) else {
            return 0.0;
        };
        let Some(link) = topology.link(prev, node.id()) else {
            return 0.0;
        };
        throughput = throughput.min(node_tp).min(link.throughput);
        prev = node.id();
    }
    match topology.link(prev, NodeRef::Sink) {
        Some(link) if prev != NodeRef::Source => throughput.min(link.throughput),
        _ => 0.0,
    }
}

/// 方案的估计端到端吞吐：各流水线吞吐之和
pub fn estimated_throughput(topology: &Topology, solution: &LayoutSolution) -> f64 {
    solution
        .pipelines()
        .iter()
        .map(|p| pipeline_throughput(topology, p))
        .sum()
}
