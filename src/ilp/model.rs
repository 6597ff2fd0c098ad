//! 放置模型
//!
//! 决策变量：每个节点承载的连续层区间（或不承载），以及承载级间流量的链路。
//! 给定流水线上的节点顺序（链），最优的层划分可以精确求出：
//! 按瓶颈吞吐做最大-最小动态规划。求解器因此只需搜索节点如何分组与排序。

use std::collections::BTreeSet;
use std::iter;

use crate::cluster::{ComputeNode, ModelProfile, NodeRef, Topology};
use crate::layout::{
    LayerRange, LayoutSolution, MethodKind, Pipeline, Stage, VerifyError, estimated_throughput,
    flow_upper_bound, verify,
};

/// 一个待求解的放置问题
#[derive(Debug, Clone)]
pub struct PlacementModel<'a> {
    topology: &'a Topology,
    model: &'a ModelProfile,
    /// 剪枝后允许使用的链路；None 表示不剪枝
    allowed: Option<BTreeSet<(NodeRef, NodeRef)>>,
    bound: f64,
}

impl<'a> PlacementModel<'a> {
    pub fn new(
        topology: &'a Topology,
        model: &'a ModelProfile,
        allowed: Option<BTreeSet<(NodeRef, NodeRef)>>,
    ) -> Self {
        Self {
            topology,
            model,
            allowed,
            bound: flow_upper_bound(topology, model),
        }
    }

    /// 不剪枝的完整模型
    pub fn full(topology: &'a Topology, model: &'a ModelProfile) -> Self {
        Self::new(topology, model, None)
    }

    pub fn topology(&self) -> &'a Topology {
        self.topology
    }

    pub fn model_profile(&self) -> &'a ModelProfile {
        self.model
    }

    /// 目标函数的上界（流量上界）
    pub fn bound(&self) -> f64 {
        self.bound
    }

    pub fn is_pruned(&self) -> bool {
        self.allowed.is_some()
    }

    /// a 与 b 之间的链路存在且未被剪掉
    pub fn allows(&self, a: NodeRef, b: NodeRef) -> bool {
        match (self.topology.link(a, b), &self.allowed) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(link), Some(allowed)) => allowed.contains(&link.key()),
        }
    }

    pub fn objective(&self, solution: &LayoutSolution) -> f64 {
        estimated_throughput(self.topology, solution)
    }

    /// 完整约束检查：校验器的全部检查，外加流水线只使用允许的链路。
    /// 通过时返回目标值。
    pub fn check(&self, solution: &LayoutSolution) -> Result<f64, VerifyError> {
        verify(solution, self.topology, self.model)?;
        for (p_idx, pipeline) in solution.pipelines().iter().enumerate() {
            let hops = iter::once(NodeRef::Source)
                .chain(pipeline.nodes().map(NodeRef::Compute))
                .chain(iter::once(NodeRef::Sink));
            let mut prev = None;
            for hop in hops {
                if let Some(from) = prev {
                    if !self.allows(from, hop) {
                        return Err(VerifyError::PrunedLink {
                            pipeline: p_idx,
                            from,
                            to: hop,
                        });
                    }
                }
                prev = Some(hop);
            }
        }
        Ok(self.objective(solution))
    }

    /// 给定链上的节点顺序，求每个节点至少一层时吞吐最高的层划分。
    /// 链不可行（节点未知或重复、链路不允许、容量不足）时返回 None。
    pub fn split(&self, chain: &[usize]) -> Option<(Pipeline, f64)> {
        let num_layers = self.model.num_layers;
        if chain.is_empty() || chain.len() > num_layers {
            return None;
        }
        let mut seen = BTreeSet::new();
        if !chain.iter().all(|n| seen.insert(*n)) {
            return None;
        }
        let nodes: Vec<&ComputeNode> = chain
            .iter()
            .map(|&idx| self.topology.node(idx))
            .collect::<Option<_>>()?;

        let mut link_bound = f64::INFINITY;
        let mut prev = NodeRef::Source;
        for hop in nodes.iter().map(|n| n.id()).chain(iter::once(NodeRef::Sink)) {
            if !self.allows(prev, hop) {
                return None;
            }
            link_bound = link_bound.min(self.topology.link(prev, hop)?.throughput);
            prev = hop;
        }

        // best[s]：前 i 个节点恰好放下 s 层时的最大瓶颈吞吐
        let mut best: Vec<Option<f64>> = vec![None; num_layers + 1];
        best[0] = Some(f64::INFINITY);
        let mut choice = vec![vec![0usize; num_layers + 1]; nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            let mut next: Vec<Option<f64>> = vec![None; num_layers + 1];
            for (placed, before) in best.iter().enumerate() {
                let Some(before) = *before else {
                    continue;
                };
                for (k, t) in node.throughput_table() {
                    let total = placed + k;
                    if total > num_layers {
                        break;
                    }
                    let value = before.min(t);
                    if next[total].is_none_or(|v| value > v) {
                        next[total] = Some(value);
                        choice[i][total] = k;
                    }
                }
            }
            best = next;
        }
        let node_bound = best[num_layers]?;

        let mut holds = vec![0; nodes.len()];
        let mut remaining = num_layers;
        for i in (0..nodes.len()).rev() {
            holds[i] = choice[i][remaining];
            remaining -= holds[i];
        }

        let mut start = 0;
        let stages = chain
            .iter()
            .zip(holds)
            .map(|(&node, k)| {
                let stage = Stage {
                    node,
                    layers: LayerRange::new(start, start + k),
                };
                start += k;
                stage
            })
            .collect();
        Some((Pipeline::new(stages), node_bound.min(link_bound)))
    }

    /// 把若干条链组装成方案；任一条链不可行时返回 None
    pub fn solution_from_chains(&self, chains: &[Vec<usize>]) -> Option<(LayoutSolution, f64)> {
        let mut pipelines = Vec::with_capacity(chains.len());
        let mut objective = 0.0;
        for chain in chains {
            let (pipeline, throughput) = self.split(chain)?;
            pipelines.push(pipeline);
            objective += throughput;
        }
        Some((
            LayoutSolution::from_pipelines(MethodKind::Exact, pipelines),
            objective,
        ))
    }
}

/// 方案中各流水线的节点顺序
pub fn chains_of(solution: &LayoutSolution) -> Vec<Vec<usize>> {
    solution
        .pipelines()
        .iter()
        .map(|p| p.nodes().collect())
        .collect()
}
