//! 布局方案文件
//!
//! ```text
//! [Settings]
//! offset=2
//! method='homogeneous'
//!
//! [Solution]
//! compute_node_2=[0, 1, 2]
//! compute_node_3=[]
//!
//! [Pipelines]
//! pipeline_0=['compute_node_2', 'compute_node_5']
//! ```
//!
//! 外部生成的文件可能没有 `[Pipelines]` 节，此时沿已有链路把首尾相接的
//! 层区间串成流水线。

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use super::{DEFAULT_NODE_OFFSET, node_name, parse_node_name};
use crate::cluster::{ModelProfile, NodeRef, Topology};
use crate::error::{LayoutError, Result};
use crate::ini::{IniDocument, IniValue, format_list};
use crate::layout::{LayerRange, LayoutSolution, MethodKind, Pipeline, Stage};

fn ser_err(msg: impl Into<String>) -> LayoutError {
    LayoutError::Serialization(msg.into())
}

/// 输出方案文件内容。拓扑中每个节点都有一行，未使用的节点为 `[]`。
pub fn render_solution(solution: &LayoutSolution, topology: &Topology, offset: usize) -> String {
    let mut out = String::new();
    out.push_str("[Settings]\n");
    out.push_str(&format!("offset={offset}\n"));
    if let Some(method) = solution.method() {
        out.push_str(&format!("method='{method}'\n"));
    }
    out.push('\n');

    out.push_str("[Solution]\n");
    for idx in 0..topology.num_nodes() {
        let layers: Vec<usize> = solution
            .layer_range(idx)
            .map(|r| r.as_range().collect())
            .unwrap_or_default();
        out.push_str(&format!("{}={}\n", node_name(offset, idx), format_list(&layers)));
    }
    out.push('\n');

    out.push_str("[Pipelines]\n");
    for (p_idx, pipeline) in solution.pipelines().iter().enumerate() {
        let names: Vec<IniValue> = pipeline
            .nodes()
            .map(|n| IniValue::Str(node_name(offset, n)))
            .collect();
        out.push_str(&format!("pipeline_{p_idx}={}\n", format_list(&names)));
    }
    out
}

#[tracing::instrument(skip(solution, topology), fields(path = %path.as_ref().display()))]
pub fn save_solution(
    path: impl AsRef<Path>,
    solution: &LayoutSolution,
    topology: &Topology,
    offset: usize,
) -> Result<()> {
    fs::write(path.as_ref(), render_solution(solution, topology, offset))?;
    debug!(pipelines = solution.pipelines().len(), "💾 方案已写入");
    Ok(())
}

pub fn load_solution(
    path: impl AsRef<Path>,
    topology: &Topology,
    model: &ModelProfile,
) -> Result<LayoutSolution> {
    let doc = IniDocument::read(path)?;
    parse_solution(&doc, topology, model)
}

/// 从方案文件重建方案。只做格式层面的检查；可行性交给校验器。
pub fn parse_solution(
    doc: &IniDocument,
    topology: &Topology,
    model: &ModelProfile,
) -> Result<LayoutSolution> {
    let (offset, method) = match doc.section("Settings") {
        Some(settings) => {
            let offset = match settings.get("offset") {
                Some(_) => settings.get_usize("offset")?,
                None => DEFAULT_NODE_OFFSET,
            };
            let method = match settings.get("method") {
                Some(_) => {
                    let raw = settings.get_str("method")?;
                    Some(MethodKind::parse(&raw).map_err(ser_err)?)
                }
                None => None,
            };
            (offset, method)
        }
        None => (DEFAULT_NODE_OFFSET, None),
    };

    let resolve = |name: &str| -> Result<usize> {
        let idx = parse_node_name(offset, name)
            .ok_or_else(|| ser_err(format!("unknown node name {name:?}")))?;
        if idx >= topology.num_nodes() {
            return Err(ser_err(format!(
                "{name} is outside the cluster of {} nodes",
                topology.num_nodes()
            )));
        }
        Ok(idx)
    };

    let mut assignments = BTreeMap::new();
    let section = doc
        .section("Solution")
        .ok_or_else(|| ser_err("missing [Solution] section"))?;
    for (key, _) in section.entries() {
        let idx = resolve(key)?;
        let layers = section.get_list(key)?;
        if let Some(range) = contiguous_range(key, &layers)? {
            assignments.insert(idx, range);
        }
    }

    let pipelines: Vec<Pipeline> = match doc.section("Pipelines") {
        Some(section) => {
            let mut listed = Vec::new();
            for (key, _) in section.entries() {
                let order: usize = key
                    .strip_prefix("pipeline_")
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| ser_err(format!("bad pipeline key {key:?}")))?;
                let mut stages = Vec::new();
                for item in section.get_list(key)? {
                    let name = item.as_str().ok_or_else(|| {
                        ser_err(format!("{key}: expected node names, got {item}"))
                    })?;
                    let node = resolve(name)?;
                    let layers = assignments.get(&node).copied().ok_or_else(|| {
                        ser_err(format!("{key} lists {name} which holds no layers"))
                    })?;
                    stages.push(Stage { node, layers });
                }
                listed.push((order, Pipeline::new(stages)));
            }
            listed.sort_by_key(|(order, _)| *order);
            listed.into_iter().map(|(_, p)| p).collect()
        }
        None => chain_pipelines(&assignments, topology, model.num_layers),
    };

    info!(
        pipelines = pipelines.len(),
        assigned_nodes = assignments.len(),
        "📄 方案文件已解析"
    );
    Ok(LayoutSolution::from_parts(method, pipelines, assignments))
}

/// 层号列表必须是连续递增的；空列表表示节点未使用
fn contiguous_range(key: &str, layers: &[IniValue]) -> Result<Option<LayerRange>> {
    let mut values = Vec::with_capacity(layers.len());
    for item in layers {
        match item.as_int() {
            Some(n) if n >= 0 => values.push(n as usize),
            _ => return Err(ser_err(format!("{key}: {item} is not a layer index"))),
        }
    }
    let Some(&start) = values.first() else {
        return Ok(None);
    };
    if values.iter().enumerate().any(|(i, v)| *v != start + i) {
        return Err(ser_err(format!(
            "{key}: layers {} are not contiguous",
            format_list(&values)
        )));
    }
    Ok(Some(LayerRange::new(start, start + values.len())))
}

/// 没有流水线分组信息时，沿链路把首尾相接的区间串起来
fn chain_pipelines(
    assignments: &BTreeMap<usize, LayerRange>,
    topology: &Topology,
    num_layers: usize,
) -> Vec<Pipeline> {
    let mut used = BTreeSet::new();
    let mut pipelines = Vec::new();
    for (&head, range) in assignments {
        if range.start != 0
            || used.contains(&head)
            || !topology.has_link(NodeRef::Source, NodeRef::Compute(head))
        {
            continue;
        }
        let mut chain = vec![head];
        used.insert(head);
        if extend_chain(&mut chain, &mut used, assignments, topology, num_layers) {
            pipelines.push(Pipeline::new(
                chain
                    .iter()
                    .map(|&node| Stage {
                        node,
                        layers: assignments[&node],
                    })
                    .collect(),
            ));
        } else {
            used.remove(&head);
        }
    }

    let orphans = assignments.len() - used.len();
    if orphans > 0 {
        warn!(orphans, "⚠️  部分节点无法串成完整流水线");
    }
    pipelines
}

fn extend_chain(
    chain: &mut Vec<usize>,
    used: &mut BTreeSet<usize>,
    assignments: &BTreeMap<usize, LayerRange>,
    topology: &Topology,
    num_layers: usize,
) -> bool {
    let Some(&tail) = chain.last() else {
        return false;
    };
    let end = assignments[&tail].end;
    if end == num_layers {
        return topology.has_link(NodeRef::Compute(tail), NodeRef::Sink);
    }
    let candidates: Vec<usize> = assignments
        .iter()
        .filter(|(node, range)| {
            range.start == end
                && !used.contains(*node)
                && topology.has_link(NodeRef::Compute(tail), NodeRef::Compute(**node))
        })
        .map(|(node, _)| *node)
        .collect();
    for next in candidates {
        chain.push(next);
        used.insert(next);
        if extend_chain(chain, used, assignments, topology, num_layers) {
            return true;
        }
        chain.pop();
        used.remove(&next);
    }
    false
}
