//! 计算节点

use std::collections::BTreeSet;

use super::id::NodeRef;
use super::machine::MachineProfile;

/// 拓扑中的一个计算节点。只包含与具体布局无关的信息；
/// 布局结果（层区间）保存在 `LayoutSolution` 中。
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeNode {
    pub index: usize,
    pub machine: MachineProfile,
    pub max_layers: usize,
    pub connected: BTreeSet<NodeRef>,
    /// 第 k-1 项为驻留 k 层时可达到的吞吐（已受网卡限制）
    throughput: Vec<f64>,
}

impl ComputeNode {
    pub fn new(
        index: usize,
        machine: MachineProfile,
        connected: BTreeSet<NodeRef>,
        throughput: Vec<f64>,
    ) -> Self {
        Self {
            index,
            machine,
            max_layers: throughput.len(),
            connected,
            throughput,
        }
    }

    pub fn id(&self) -> NodeRef {
        NodeRef::Compute(self.index)
    }

    pub fn type_name(&self) -> &str {
        &self.machine.type_name
    }

    /// 驻留 `layer_count` 层时的吞吐；超出 `1..=max_layers` 返回 None
    pub fn throughput(&self, layer_count: usize) -> Option<f64> {
        layer_count
            .checked_sub(1)
            .and_then(|i| self.throughput.get(i))
            .copied()
    }

    /// `(layer_count, throughput)`，按层数递增
    pub fn throughput_table(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.throughput.iter().enumerate().map(|(i, t)| (i + 1, *t))
    }

    /// 该节点对系统吞吐的最大贡献：max_k(throughput[k] * k)
    pub fn peak_layer_throughput(&self) -> f64 {
        self.throughput_table()
            .map(|(k, t)| t * k as f64)
            .fold(0.0, f64::max)
    }

    /// 满载时的装箱优先级：throughput[max] * max
    pub fn packing_priority(&self) -> f64 {
        self.throughput(self.max_layers)
            .map(|t| t * self.max_layers as f64)
            .unwrap_or(0.0)
    }
}
