//! 可行性校验
//!
//! 独立于产生方案的方法，重新检查：每条流水线完整覆盖所有层、容量约束、
//! 节点不跨流水线复用、逐节点分配与流水线一致、流水线用到的链路都存在。

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use super::solution::{LayerRange, LayoutSolution};
use crate::cluster::{ModelProfile, NodeRef, Topology};

/// 校验失败的具体原因
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyError {
    #[error("solution has no pipelines")]
    NoPipelines,

    #[error("pipeline {pipeline} is empty")]
    EmptyPipeline { pipeline: usize },

    #[error("pipeline {pipeline} uses unknown node {node}")]
    UnknownNode { pipeline: usize, node: usize },

    #[error("node {node} appears in pipeline {first} and pipeline {second}")]
    NodeReused {
        node: usize,
        first: usize,
        second: usize,
    },

    #[error("pipeline {pipeline}: node {node} has range {range} outside [0, {num_layers})")]
    RangeOutOfBounds {
        pipeline: usize,
        node: usize,
        range: LayerRange,
        num_layers: usize,
    },

    #[error("pipeline {pipeline}: node {node} holds {layers} layers but can hold at most {max_layers}")]
    CapacityExceeded {
        pipeline: usize,
        node: usize,
        layers: usize,
        max_layers: usize,
    },

    #[error("pipeline {pipeline}: node {node} needs {bytes} bytes for parameters, more than half of {vram_bytes} bytes of vram")]
    VramExceeded {
        pipeline: usize,
        node: usize,
        bytes: f64,
        vram_bytes: f64,
    },

    #[error("pipeline {pipeline}: node {node} starts at layer {found}, expected {expected}")]
    CoverageGap {
        pipeline: usize,
        node: usize,
        expected: usize,
        found: usize,
    },

    #[error("pipeline {pipeline} ends at layer {covered}, expected {num_layers}")]
    IncompletePipeline {
        pipeline: usize,
        covered: usize,
        num_layers: usize,
    },

    #[error("pipeline {pipeline} uses missing link {from} -> {to}")]
    MissingLink {
        pipeline: usize,
        from: NodeRef,
        to: NodeRef,
    },

    #[error("pipeline {pipeline} uses pruned link {from} -> {to}")]
    PrunedLink {
        pipeline: usize,
        from: NodeRef,
        to: NodeRef,
    },

    #[error("node {node}: assignment {assigned:?} does not match pipeline stage {staged:?}")]
    AssignmentMismatch {
        node: usize,
        assigned: Option<LayerRange>,
        staged: Option<LayerRange>,
    },
}

/// 校验一个布局方案
#[tracing::instrument(skip_all, fields(pipelines = solution.pipelines().len()))]
pub fn verify(
    solution: &LayoutSolution,
    topology: &Topology,
    model: &ModelProfile,
) -> Result<(), VerifyError> {
    let num_layers = model.num_layers;
    if solution.pipelines().is_empty() {
        return Err(VerifyError::NoPipelines);
    }

    let mut owner: HashMap<usize, usize> = HashMap::new();
    let mut staged: HashMap<usize, LayerRange> = HashMap::new();

    for (p_idx, pipeline) in solution.pipelines().iter().enumerate() {
        if pipeline.is_empty() {
            return Err(VerifyError::EmptyPipeline { pipeline: p_idx });
        }

        let mut expected_start = 0;
        let mut prev = NodeRef::Source;
        for stage in pipeline.stages() {
            let Some(node) = topology.node(stage.node) else {
                return Err(VerifyError::UnknownNode {
                    pipeline: p_idx,
                    node: stage.node,
                });
            };
            if let Some(&first) = owner.get(&stage.node) {
                return Err(VerifyError::NodeReused {
                    node: stage.node,
                    first,
                    second: p_idx,
                });
            }
            owner.insert(stage.node, p_idx);
            staged.insert(stage.node, stage.layers);

            let range = stage.layers;
            if range.is_empty() || range.end > num_layers {
                return Err(VerifyError::RangeOutOfBounds {
                    pipeline: p_idx,
                    node: stage.node,
                    range,
                    num_layers,
                });
            }
            if range.len() > node.max_layers {
                return Err(VerifyError::CapacityExceeded {
                    pipeline: p_idx,
                    node: stage.node,
                    layers: range.len(),
                    max_layers: node.max_layers,
                });
            }
            let bytes = model.range_bytes(range.as_range());
            if 2.0 * bytes > node.machine.vram_size + 1.0 {
                return Err(VerifyError::VramExceeded {
                    pipeline: p_idx,
                    node: stage.node,
                    bytes,
                    vram_bytes: node.machine.vram_size,
                });
            }
            if range.start != expected_start {
                return Err(VerifyError::CoverageGap {
                    pipeline: p_idx,
                    node: stage.node,
                    expected: expected_start,
                    found: range.start,
                });
            }
            if !topology.has_link(prev, node.id()) {
                return Err(VerifyError::MissingLink {
                    pipeline: p_idx,
                    from: prev,
                    to: node.id(),
                });
            }

            expected_start = range.end;
            prev = node.id();
        }

        if expected_start != num_layers {
            return Err(VerifyError::IncompletePipeline {
                pipeline: p_idx,
                covered: expected_start,
                num_layers,
            });
        }
        if !topology.has_link(prev, NodeRef::Sink) {
            return Err(VerifyError::MissingLink {
                pipeline: p_idx,
                from: prev,
                to: NodeRef::Sink,
            });
        }
    }

    for (&node, &assigned) in solution.assignments() {
        let stage = staged.get(&node).copied();
        if stage != Some(assigned) {
            return Err(VerifyError::AssignmentMismatch {
                node,
                assigned: Some(assigned),
                staged: stage,
            });
        }
    }
    for (&node, &stage) in &staged {
        if !solution.assignments().contains_key(&node) {
            return Err(VerifyError::AssignmentMismatch {
                node,
                assigned: None,
                staged: Some(stage),
            });
        }
    }

    debug!(nodes_in_use = owner.len(), "✅ 方案校验通过");
    Ok(())
}
