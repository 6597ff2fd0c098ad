//! 启发式布局
//!
//! 三种启发式共享同一个核心：按性能排序的贪心装箱。
//! 机器按类型的装箱优先级（满载吞吐 × 最大层数）降序遍历，同类型内用
//! 给定随机数发生器打乱；每个节点从当前流水线长度开始尽量多放层，
//! 长度达到总层数时封闭流水线并开始新的一条。最后一条不完整的流水线被
//! 丢弃，其节点保持未使用。
//!
//! 各变体只在节点顺序和单节点可达的层边界上不同：
//! - homogeneous：核心算法本身；
//! - performance_ranked：跨类型按节点自身（含网卡限制）的优先级稳定排序；
//! - fixed_stage_count：层边界对齐到固定的级划分。

use std::collections::BTreeMap;
use std::mem;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::method::{LayoutRng, MethodKind};
use super::solution::{LayerRange, LayoutSolution, Pipeline, Stage};
use super::verify::verify;
use crate::cluster::{ComputeNode, ModelProfile, Topology};
use crate::error::{LayoutError, Result};

/// 启发式方法的公共选项
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeuristicOptions {
    /// 每种机器类型最多使用的节点数；给定时只有列出的类型参与布局
    #[serde(default)]
    pub machine_budget: Option<BTreeMap<String, usize>>,
}

impl HeuristicOptions {
    /// 解析 `A100=4,L4=8` 形式的预算
    pub fn parse_budget(raw: &str) -> Result<BTreeMap<String, usize>> {
        let mut budget = BTreeMap::new();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (name, count) = item.split_once('=').ok_or_else(|| {
                LayoutError::InvalidOptions(format!("bad machine budget entry {item:?}"))
            })?;
            let count: usize = count.trim().parse().map_err(|_| {
                LayoutError::InvalidOptions(format!("bad machine count in {item:?}"))
            })?;
            if budget.insert(name.trim().to_string(), count).is_some() {
                return Err(LayoutError::InvalidOptions(format!(
                    "machine type {name:?} budgeted twice"
                )));
            }
        }
        Ok(budget)
    }
}

/// 同构偏好布局（类似 Orca）
pub fn homogeneous(
    topology: &Topology,
    model: &ModelProfile,
    options: &HeuristicOptions,
    rng: &mut LayoutRng,
) -> Result<LayoutSolution> {
    let num_layers = model.num_layers;
    let order: Vec<usize> = typed_order(topology, options, rng)?
        .into_iter()
        .flatten()
        .collect();
    let packing = pack(topology, &order, num_layers, |node, start| {
        Some((start + node.max_layers).min(num_layers))
    });
    finish(MethodKind::HomogeneousBiased, topology, model, packing)
}

/// 按节点性能排序的布局（Petals 风格）
pub fn performance_ranked(
    topology: &Topology,
    model: &ModelProfile,
    options: &HeuristicOptions,
    rng: &mut LayoutRng,
) -> Result<LayoutSolution> {
    let num_layers = model.num_layers;
    let mut order: Vec<usize> = typed_order(topology, options, rng)?
        .into_iter()
        .flatten()
        .collect();
    // 稳定排序：优先级相同的节点保留打乱后的相对顺序
    order.sort_by(|a, b| {
        let pa = topology.nodes()[*a].packing_priority();
        let pb = topology.nodes()[*b].packing_priority();
        pb.total_cmp(&pa)
    });
    let packing = pack(topology, &order, num_layers, |node, start| {
        Some((start + node.max_layers).min(num_layers))
    });
    finish(MethodKind::PerformanceRanked, topology, model, packing)
}

/// 固定级数布局（Swarm 风格）：模型切成 `num_stages` 级，
/// 每个节点放下尽可能多的完整级
pub fn fixed_stage_count(
    topology: &Topology,
    model: &ModelProfile,
    options: &HeuristicOptions,
    num_stages: usize,
    rng: &mut LayoutRng,
) -> Result<LayoutSolution> {
    let num_layers = model.num_layers;
    if num_stages == 0 || num_stages > num_layers {
        return Err(LayoutError::InvalidOptions(format!(
            "num_stages must be in 1..={num_layers}, got {num_stages}"
        )));
    }
    let boundaries: Vec<usize> = (0..=num_stages)
        .map(|k| k * num_layers / num_stages)
        .collect();
    debug!(?boundaries, "级边界");

    let order: Vec<usize> = typed_order(topology, options, rng)?
        .into_iter()
        .flatten()
        .collect();
    let packing = pack(topology, &order, num_layers, |node, start| {
        let from = boundaries.binary_search(&start).ok()?;
        let reach = boundaries[from..]
            .iter()
            .take_while(|b| **b - start <= node.max_layers)
            .last()
            .copied()?;
        (reach > start).then_some(reach)
    });
    finish(MethodKind::FixedStageCount, topology, model, packing)
}

/// 按类型优先级分组，每组内打乱，并应用机器预算
fn typed_order(
    topology: &Topology,
    options: &HeuristicOptions,
    rng: &mut LayoutRng,
) -> Result<Vec<Vec<usize>>> {
    let stats = topology.type_stats();
    if let Some(budget) = &options.machine_budget {
        for (type_name, &count) in budget {
            let available = stats.get(type_name).map(|s| s.node_count).ok_or_else(|| {
                LayoutError::InvalidOptions(format!(
                    "machine budget names type {type_name:?} which has no nodes"
                ))
            })?;
            if count > available {
                return Err(LayoutError::InvalidOptions(format!(
                    "machine budget asks for {count} {type_name} nodes, only {available} exist"
                )));
            }
        }
    }

    let mut types: Vec<_> = stats
        .values()
        .filter(|s| match &options.machine_budget {
            Some(budget) => budget.contains_key(&s.type_name),
            None => true,
        })
        .collect();
    types.sort_by(|a, b| {
        b.packing_priority()
            .total_cmp(&a.packing_priority())
            .then_with(|| b.type_name.cmp(&a.type_name))
    });

    let mut groups = Vec::with_capacity(types.len());
    for ty in types {
        let mut members: Vec<usize> = topology
            .nodes()
            .iter()
            .filter(|n| n.type_name() == ty.type_name)
            .map(|n| n.index)
            .collect();
        members.shuffle(rng);
        if let Some(limit) = options
            .machine_budget
            .as_ref()
            .and_then(|b| b.get(&ty.type_name))
        {
            members.truncate(*limit);
        }
        debug!(
            machine_type = %ty.type_name,
            priority = ty.packing_priority(),
            nodes = ?members,
            "类型分组"
        );
        groups.push(members);
    }
    Ok(groups)
}

struct Packing {
    pipelines: Vec<Pipeline>,
    discarded: Vec<usize>,
    skipped: Vec<usize>,
    considered: usize,
}

/// 贪心装箱核心。`reach(node, start)` 给出节点从 `start` 开始能放到的
/// 结束层；返回 None 表示该节点无法推进当前流水线。
fn pack<F>(topology: &Topology, order: &[usize], num_layers: usize, mut reach: F) -> Packing
where
    F: FnMut(&ComputeNode, usize) -> Option<usize>,
{
    let mut pipelines = Vec::new();
    let mut skipped = Vec::new();
    let mut current: Vec<Stage> = Vec::new();
    let mut length = 0;

    for &idx in order {
        let node = &topology.nodes()[idx];
        let Some(end) = reach(node, length) else {
            skipped.push(idx);
            continue;
        };
        current.push(Stage {
            node: idx,
            layers: LayerRange::new(length, end),
        });
        length = end;

        if length == num_layers {
            pipelines.push(Pipeline::new(mem::take(&mut current)));
            length = 0;
        }
    }

    Packing {
        pipelines,
        discarded: current.iter().map(|s| s.node).collect(),
        skipped,
        considered: order.len(),
    }
}

fn finish(
    kind: MethodKind,
    topology: &Topology,
    model: &ModelProfile,
    packing: Packing,
) -> Result<LayoutSolution> {
    if !packing.discarded.is_empty() {
        warn!(
            method = kind.as_str(),
            nodes = ?packing.discarded,
            "⚠️  末尾流水线不完整，已丢弃"
        );
    }
    if !packing.skipped.is_empty() {
        warn!(
            method = kind.as_str(),
            nodes = ?packing.skipped,
            "⚠️  节点无法容纳下一级，已跳过"
        );
    }
    if packing.pipelines.is_empty() {
        return Err(LayoutError::NoFeasibleLayout {
            considered: packing.considered,
        });
    }
    for pipeline in &packing.pipelines {
        debug_assert_eq!(
            pipeline.last().map(|s| s.layers.end),
            Some(model.num_layers),
            "found incomplete pipeline"
        );
    }

    let solution = LayoutSolution::from_pipelines(kind, packing.pipelines);
    verify(&solution, topology, model)?;

    info!(
        method = kind.as_str(),
        pipelines = solution.pipelines().len(),
        nodes_in_use = solution.nodes_in_use().len(),
        unused_nodes = topology.num_nodes() - solution.nodes_in_use().len(),
        "🧩 启发式布局完成"
    );
    Ok(solution)
}
