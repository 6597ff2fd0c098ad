//! 仿真器集群文件
//!
//! 只包含流水线实际用到的节点与链路。节点的 KV cache 与 activation 备份
//! 容量按实际驻留层数重新查询。

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use super::node_name;
use crate::cluster::{
    CapacityResolver, GraphLink, ModelProfile, NodeRef, SINK_NODE_TYPE, SOURCE_NODE_TYPE,
    Topology,
};
use crate::error::{LayoutError, Result};
use crate::ini::{IniValue, format_list};
use crate::layout::LayoutSolution;
use crate::units::{MB, MBPS, MILLI_SEC};

/// 仿真器流量与查询管理所需的模型参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatorParameters {
    pub token_size: f64,
    pub activation_size: f64,
    pub total_num_layers: usize,
}

impl SimulatorParameters {
    pub fn from_model(model: &ModelProfile) -> Self {
        Self {
            token_size: model.token_size,
            activation_size: model.activation_size,
            total_num_layers: model.num_layers,
        }
    }
}

fn endpoint_name(offset: usize, node: NodeRef) -> String {
    match node {
        NodeRef::Source => "source".to_string(),
        NodeRef::Sink => "sink".to_string(),
        NodeRef::Compute(idx) => node_name(offset, idx),
    }
}

/// 流水线用到的链路，按 源→首级、末级→汇、级间 的顺序，方向沿流水线
fn used_links<'t>(
    solution: &LayoutSolution,
    topology: &'t Topology,
) -> Result<Vec<(NodeRef, NodeRef, &'t GraphLink)>> {
    let mut hops = Vec::new();
    for pipeline in solution.pipelines() {
        if let Some(first) = pipeline.first() {
            hops.push((NodeRef::Source, NodeRef::Compute(first.node)));
        }
    }
    for pipeline in solution.pipelines() {
        if let Some(last) = pipeline.last() {
            hops.push((NodeRef::Compute(last.node), NodeRef::Sink));
        }
    }
    for pipeline in solution.pipelines() {
        for pair in pipeline.stages().windows(2) {
            hops.push((NodeRef::Compute(pair[0].node), NodeRef::Compute(pair[1].node)));
        }
    }

    let mut seen = BTreeSet::new();
    let mut links = Vec::with_capacity(hops.len());
    for (from, to) in hops {
        if !seen.insert((from, to)) {
            continue;
        }
        let link = topology.link(from, to).ok_or_else(|| {
            LayoutError::Topology(format!("pipeline uses missing link {from} -> {to}"))
        })?;
        links.push((from, to, link));
    }
    Ok(links)
}

/// 生成仿真器集群文件内容
pub fn render_simulator_cluster(
    solution: &LayoutSolution,
    topology: &Topology,
    resolver: &dyn CapacityResolver,
    offset: usize,
) -> Result<String> {
    let mut out = String::new();
    out.push_str("# Simulator cluster file generated by layout-synth.\n\n");

    out.push_str("[Coordinator]\n");
    out.push_str(&format!(
        "inbound_nic_speed={}\n",
        MBPS.format(topology.sink().machine.inbound_nic_speed)
    ));
    out.push_str(&format!(
        "outbound_nic_speed={}\n\n",
        MBPS.format(topology.source().machine.outbound_nic_speed)
    ));

    let types: Vec<IniValue> = topology
        .machine_profiles()
        .keys()
        .filter(|name| *name != SOURCE_NODE_TYPE && *name != SINK_NODE_TYPE)
        .map(|name| IniValue::Str(name.clone()))
        .collect();
    out.push_str("[MachineTypes]\n");
    out.push_str(&format!("types={}\n\n", format_list(&types)));

    let in_use = solution.nodes_in_use();
    let names: Vec<IniValue> = in_use
        .iter()
        .map(|idx| IniValue::Str(node_name(offset, *idx)))
        .collect();
    out.push_str("[ComputeNodes]\n");
    out.push_str(&format!("names={}\n\n", format_list(&names)));

    for &idx in &in_use {
        let node = topology
            .node(idx)
            .ok_or_else(|| LayoutError::Topology(format!("solution uses unknown node {idx}")))?;
        let resident = solution.layer_range(idx).map(|r| r.len()).unwrap_or(0);
        let type_name = node.type_name();
        let kv_cache = resolver
            .kv_cache_capacity(type_name, resident)
            .ok_or_else(|| {
                LayoutError::Topology(format!(
                    "no kv cache profile for {type_name:?} with {resident} layers"
                ))
            })?;
        let activation_backup = resolver
            .activation_backup_capacity(type_name, resident)
            .ok_or_else(|| {
                LayoutError::Topology(format!(
                    "no activation backup profile for {type_name:?} with {resident} layers"
                ))
            })?;

        let machine = &node.machine;
        out.push_str(&format!("[{}]\n", node_name(offset, idx)));
        out.push_str(&format!("vram_size={}\n", MB.format(machine.vram_size)));
        out.push_str(&format!(
            "inbound_nic_speed={}\n",
            MBPS.format(machine.inbound_nic_speed)
        ));
        out.push_str(&format!(
            "outbound_nic_speed={}\n",
            MBPS.format(machine.outbound_nic_speed)
        ));
        out.push_str(&format!("disk_speed={}\n", MBPS.format(machine.disk_speed)));
        out.push_str(&format!("machine_type=\"{type_name}\"\n"));
        out.push_str(&format!("kv_cache_capacity={kv_cache}\n"));
        out.push_str(&format!("activation_backup_capacity={activation_backup}\n\n"));
    }

    let links = used_links(solution, topology)?;
    let link_names: Vec<String> = links
        .iter()
        .map(|(from, to, _)| {
            format!(
                "link_{}_{}",
                endpoint_name(offset, *from),
                endpoint_name(offset, *to)
            )
        })
        .collect();
    let listed: Vec<IniValue> = link_names.iter().cloned().map(IniValue::Str).collect();
    out.push_str("[Links]\n");
    out.push_str(&format!("names={}\n\n", format_list(&listed)));

    for ((from, to, link), name) in links.iter().zip(&link_names) {
        out.push_str(&format!("[{name}]\n"));
        out.push_str(&format!("in={}\n", endpoint_name(offset, *from)));
        out.push_str(&format!("out={}\n", endpoint_name(offset, *to)));
        out.push_str(&format!("latency={}\n", MILLI_SEC.format(link.latency)));
        out.push_str(&format!("bandwidth={}\n\n", MBPS.format(link.bandwidth)));
    }
    Ok(out)
}

#[tracing::instrument(skip(solution, topology, resolver), fields(path = %path.as_ref().display()))]
pub fn write_simulator_cluster(
    path: impl AsRef<Path>,
    solution: &LayoutSolution,
    topology: &Topology,
    resolver: &dyn CapacityResolver,
    offset: usize,
) -> Result<()> {
    let rendered = render_simulator_cluster(solution, topology, resolver, offset)?;
    fs::write(path.as_ref(), rendered)?;
    info!(
        nodes = solution.nodes_in_use().len(),
        "🗺️  仿真器集群文件已生成"
    );
    Ok(())
}
