//! 布局方案
//!
//! 层区间属于方案本身而不是拓扑节点：同一个拓扑可以被多次合成，
//! 每次得到独立的 `LayoutSolution`。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;

use serde::Serialize;

use super::method::MethodKind;
use crate::cluster::{ModelProfile, Topology};

/// 半开层区间 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LayerRange {
    pub start: usize,
    pub end: usize,
}

impl LayerRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl fmt::Display for LayerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// 流水线中的一级：节点及其驻留层
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub node: usize,
    pub layers: LayerRange,
}

/// 一条流水线：各级层区间首尾相接，覆盖 `[0, num_layers)`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.stages.iter().map(|s| s.node)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn first(&self) -> Option<&Stage> {
        self.stages.first()
    }

    pub fn last(&self) -> Option<&Stage> {
        self.stages.last()
    }
}

/// 一个节点的加载任务
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeLoad {
    pub node: usize,
    pub layers: LayerRange,
    pub bytes: f64,
    /// 秒
    pub load_time: f64,
}

/// 初始加载计划：仿真器在开始推理前必须推进 `max_load_time`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadingPlan {
    pub loads: Vec<NodeLoad>,
    pub max_load_time: f64,
}

impl LoadingPlan {
    /// 仿真器预热时长（整秒）：向上取整后再加一秒
    pub fn simulator_warmup_secs(&self) -> u64 {
        (self.max_load_time.ceil() as u64).saturating_add(1)
    }
}

/// 布局方案：所有流水线以及逐节点的层分配
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutSolution {
    method: Option<MethodKind>,
    pipelines: Vec<Pipeline>,
    assignments: BTreeMap<usize, LayerRange>,
}

impl LayoutSolution {
    /// 由流水线构建；逐节点分配直接取自各级
    pub fn from_pipelines(method: MethodKind, pipelines: Vec<Pipeline>) -> Self {
        let assignments = pipelines
            .iter()
            .flat_map(|p| p.stages().iter().map(|s| (s.node, s.layers)))
            .collect();
        Self {
            method: Some(method),
            pipelines,
            assignments,
        }
    }

    /// 由外部来源（方案文件）构建，流水线与分配可能不一致，需经校验
    pub(crate) fn from_parts(
        method: Option<MethodKind>,
        pipelines: Vec<Pipeline>,
        assignments: BTreeMap<usize, LayerRange>,
    ) -> Self {
        Self {
            method,
            pipelines,
            assignments,
        }
    }

    pub fn method(&self) -> Option<MethodKind> {
        self.method
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn assignments(&self) -> &BTreeMap<usize, LayerRange> {
        &self.assignments
    }

    pub fn layer_range(&self, node: usize) -> Option<LayerRange> {
        self.assignments.get(&node).copied()
    }

    /// 出现在某条流水线中的节点
    pub fn nodes_in_use(&self) -> BTreeSet<usize> {
        self.pipelines.iter().flat_map(|p| p.nodes()).collect()
    }

    /// 拓扑中未被任何流水线使用的节点
    pub fn unused_nodes(&self, topology: &Topology) -> Vec<usize> {
        let in_use = self.nodes_in_use();
        (0..topology.num_nodes())
            .filter(|idx| !in_use.contains(idx))
            .collect()
    }

    /// 每个在用节点从磁盘加载其层所需的时间
    pub fn loading_plan(&self, topology: &Topology, model: &ModelProfile) -> LoadingPlan {
        let mut plan = LoadingPlan::default();
        for pipeline in &self.pipelines {
            for stage in pipeline.stages() {
                let Some(node) = topology.node(stage.node) else {
                    continue;
                };
                let bytes = model.range_bytes(stage.layers.as_range());
                let load_time = if node.machine.disk_speed > 0.0 {
                    bytes / node.machine.disk_speed
                } else {
                    f64::INFINITY
                };
                plan.max_load_time = plan.max_load_time.max(load_time);
                plan.loads.push(NodeLoad {
                    node: stage.node,
                    layers: stage.layers,
                    bytes,
                    load_time,
                });
            }
        }
        plan.loads.sort_by_key(|l| l.node);
        plan
    }
}
