//! 集群拓扑
//!
//! 从集群 INI 与机器参数 INI 加载拓扑。启发式方法要求计算节点连同源/汇
//! 构成完全图，加载时即检查；任何错误都会使整个加载失败。

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, info, warn};

use super::capacity::CapacityResolver;
use super::id::NodeRef;
use super::link::{GraphLink, link_key};
use super::machine::{MachineProfile, SINK_NODE_TYPE, SOURCE_NODE_TYPE};
use super::model::ModelProfile;
use super::node::ComputeNode;
use crate::error::{LayoutError, Result};
use crate::ini::{IniDocument, Section};

/// 源或汇
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub machine: MachineProfile,
    pub connected: BTreeSet<usize>,
}

/// 一种机器类型在整个集群中的统计
#[derive(Debug, Clone, PartialEq)]
pub struct TypeStats {
    pub type_name: String,
    pub max_layers: usize,
    /// 满载（max_layers 层）时的典型推理吞吐，不含网卡限制
    pub typical_throughput: f64,
    pub node_count: usize,
}

impl TypeStats {
    pub fn packing_priority(&self) -> f64 {
        self.typical_throughput * self.max_layers as f64
    }
}

/// 加载后的集群拓扑（不可变）
#[derive(Debug, Clone)]
pub struct Topology {
    machine_profiles: BTreeMap<String, MachineProfile>,
    source: Endpoint,
    sink: Endpoint,
    nodes: Vec<ComputeNode>,
    links: BTreeMap<(NodeRef, NodeRef), GraphLink>,
    type_stats: BTreeMap<String, TypeStats>,
    warnings: Vec<String>,
}

fn topo_err(msg: impl Into<String>) -> LayoutError {
    LayoutError::Topology(msg.into())
}

impl Topology {
    /// 从文件加载
    pub fn load(
        cluster_file: impl AsRef<Path>,
        machine_profile_file: impl AsRef<Path>,
        model: &ModelProfile,
        resolver: &dyn CapacityResolver,
    ) -> Result<Self> {
        let cluster = IniDocument::read(cluster_file)?;
        let profiles = IniDocument::read(machine_profile_file)?;
        Self::from_ini(&cluster, &profiles, model, resolver)
    }

    /// 从已解析的 INI 文档构建拓扑
    #[tracing::instrument(skip_all, fields(model = %model.name, num_layers = model.num_layers))]
    pub fn from_ini(
        cluster: &IniDocument,
        profiles: &IniDocument,
        model: &ModelProfile,
        resolver: &dyn CapacityResolver,
    ) -> Result<Self> {
        let mut machine_profiles = BTreeMap::new();
        for section in profiles.sections() {
            let profile = MachineProfile::from_section(section)?;
            machine_profiles.insert(profile.type_name.clone(), profile);
        }
        let profile_of = |type_name: &str| -> Result<MachineProfile> {
            machine_profiles
                .get(type_name)
                .cloned()
                .ok_or_else(|| topo_err(format!("no machine profile for type {type_name:?}")))
        };

        let total = cluster.require("NodeNames")?.get_usize("total_compute_nodes")?;
        if total == 0 {
            return Err(topo_err("cluster has no compute nodes"));
        }
        debug!(total_compute_nodes = total, "读取节点数");

        let source = Endpoint {
            machine: profile_of(SOURCE_NODE_TYPE)?,
            connected: read_terminal_connections(cluster.require("SourceNode")?, total)?,
        };
        let sink = Endpoint {
            machine: profile_of(SINK_NODE_TYPE)?,
            connected: read_terminal_connections(cluster.require("SinkNode")?, total)?,
        };

        let bottleneck_activation = |machine: &MachineProfile| {
            machine.bottleneck_nic_speed() / model.activation_size
        };
        let max_layer_bytes = model.max_layer_bytes();

        let mut nodes = Vec::with_capacity(total);
        for idx in 0..total {
            let section = cluster.require(&format!("ComputeNode-{idx}"))?;
            let type_name = section.get_str("type")?;
            let machine = profile_of(&type_name)?;
            if machine.is_terminal() {
                return Err(topo_err(format!(
                    "compute node {idx} uses reserved type {type_name:?}"
                )));
            }
            let connected = read_compute_connections(section, idx, total)?;

            let max_layers = resolver.max_num_layers(&type_name).ok_or_else(|| {
                topo_err(format!("no capacity profile for machine type {type_name:?}"))
            })?;
            if max_layers == 0 {
                return Err(topo_err(format!(
                    "compute node {idx} ({type_name}) cannot hold a single layer"
                )));
            }

            // 一半显存存参数，另一半留给运行时状态
            let required_bytes = 2.0 * max_layers as f64 * max_layer_bytes;
            if required_bytes > machine.vram_size + 1.0 {
                return Err(LayoutError::CapacityExceeded {
                    node: idx,
                    machine_type: type_name,
                    max_layers,
                    required_bytes,
                    vram_bytes: machine.vram_size,
                });
            }

            let nic_bound = bottleneck_activation(&machine);
            let mut throughput = Vec::with_capacity(max_layers);
            for layer_count in 1..=max_layers {
                let inference = resolver
                    .typical_token_throughput(&type_name, layer_count)
                    .ok_or_else(|| {
                        topo_err(format!(
                            "no throughput profile for {type_name:?} with {layer_count} layers"
                        ))
                    })?;
                throughput.push(inference.min(nic_bound));
            }

            nodes.push(ComputeNode::new(idx, machine, connected, throughput));
        }

        let mut warnings = Vec::new();
        let mut links: BTreeMap<(NodeRef, NodeRef), GraphLink> = BTreeMap::new();
        for section in cluster.sections() {
            let Some(rest) = section.name().strip_prefix("Link-") else {
                continue;
            };
            let (from, to) = parse_link_name(rest, total)?;
            let bandwidth = section.get_quantity("bandwidth")?;
            let latency = section.get_quantity("latency")?;
            if bandwidth <= 0.0 || latency < 0.0 {
                return Err(topo_err(format!(
                    "link {} has non-positive bandwidth or negative latency",
                    section.name()
                )));
            }
            let link = GraphLink::new(
                from,
                to,
                bandwidth,
                latency,
                model.token_size,
                model.activation_size,
            );
            if let Some(prev) = links.insert(link.key(), link) {
                let msg = format!(
                    "link {}-{} declared twice (also as {}-{}), keeping the later entry",
                    from, to, prev.from, prev.to
                );
                warn!(from = %from, to = %to, "⚠️  重复链路，后者覆盖前者");
                warnings.push(msg);
            }
        }

        // 完全图中每对相邻端点都必须有链路
        for node in &nodes {
            for &peer in &node.connected {
                if !links.contains_key(&link_key(node.id(), peer)) {
                    return Err(topo_err(format!(
                        "no link section between {} and {}",
                        node.id(),
                        peer
                    )));
                }
            }
        }

        let mut type_stats: BTreeMap<String, TypeStats> = BTreeMap::new();
        for node in &nodes {
            if let Some(stats) = type_stats.get_mut(node.type_name()) {
                stats.node_count += 1;
                continue;
            }
            let type_name = node.type_name().to_string();
            let typical_throughput = resolver
                .typical_token_throughput(&type_name, node.max_layers)
                .unwrap_or(0.0);
            type_stats.insert(
                type_name.clone(),
                TypeStats {
                    type_name,
                    max_layers: node.max_layers,
                    typical_throughput,
                    node_count: 1,
                },
            );
        }

        info!(
            nodes = nodes.len(),
            links = links.len(),
            machine_types = type_stats.len(),
            warnings = warnings.len(),
            "📥 集群拓扑加载完成"
        );

        Ok(Self {
            machine_profiles,
            source,
            sink,
            nodes,
            links,
            type_stats,
            warnings,
        })
    }

    pub fn nodes(&self) -> &[ComputeNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&ComputeNode> {
        self.nodes.get(index)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    pub fn sink(&self) -> &Endpoint {
        &self.sink
    }

    pub fn links(&self) -> impl Iterator<Item = &GraphLink> {
        self.links.values()
    }

    /// 查找 a 与 b 之间的链路（任一方向）
    pub fn link(&self, a: NodeRef, b: NodeRef) -> Option<&GraphLink> {
        self.links.get(&link_key(a, b))
    }

    pub fn has_link(&self, a: NodeRef, b: NodeRef) -> bool {
        self.link(a, b).is_some()
    }

    pub fn machine_profiles(&self) -> &BTreeMap<String, MachineProfile> {
        &self.machine_profiles
    }

    /// 计算节点可用的机器类型名（不含源/汇）
    pub fn compute_machine_types(&self) -> Vec<&str> {
        self.machine_profiles
            .values()
            .filter(|p| !p.is_terminal())
            .map(|p| p.type_name.as_str())
            .collect()
    }

    pub fn type_stats(&self) -> &BTreeMap<String, TypeStats> {
        &self.type_stats
    }

    /// 加载过程中记录的警告（例如重复链路）
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

fn read_terminal_connections(section: &Section, total: usize) -> Result<BTreeSet<usize>> {
    let mut connected = Vec::new();
    for item in section.get_list("connected_nodes")? {
        match item.as_int() {
            Some(idx) if idx >= 0 => connected.push(idx as usize),
            _ => {
                return Err(topo_err(format!(
                    "[{}] connects to non-compute node {item}",
                    section.name()
                )));
            }
        }
    }
    connected.sort_unstable();
    if connected != (0..total).collect::<Vec<_>>() {
        return Err(topo_err(format!(
            "not a complete graph: [{}] must connect to every compute node exactly once",
            section.name()
        )));
    }
    Ok(connected.into_iter().collect())
}

fn read_compute_connections(
    section: &Section,
    idx: usize,
    total: usize,
) -> Result<BTreeSet<NodeRef>> {
    let items = section.get_list("connected_nodes")?;
    let mut connected = BTreeSet::new();
    for item in &items {
        let peer = NodeRef::from_value(item)
            .map_err(|msg| topo_err(format!("[{}] {msg}", section.name())))?;
        if !connected.insert(peer) {
            return Err(topo_err(format!(
                "[{}] lists {peer} more than once",
                section.name()
            )));
        }
    }

    let expected: BTreeSet<NodeRef> = std::iter::once(NodeRef::Source)
        .chain((0..total).filter(|j| *j != idx).map(NodeRef::Compute))
        .chain(std::iter::once(NodeRef::Sink))
        .collect();
    if connected != expected {
        return Err(topo_err(format!(
            "not a complete graph: compute node {idx} must connect to source, sink and every other compute node"
        )));
    }
    Ok(connected)
}

/// 解析 `Link-<from>-<to>` 中 `Link-` 之后的部分
fn parse_link_name(rest: &str, total: usize) -> Result<(NodeRef, NodeRef)> {
    let mut parts = rest.split('-');
    let (Some(from), Some(to), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(topo_err(format!("bad link name Link-{rest}")));
    };
    let from: NodeRef = from.parse().map_err(topo_err)?;
    let to: NodeRef = to.parse().map_err(topo_err)?;

    match (from, to) {
        (NodeRef::Sink, _) | (_, NodeRef::Source) => {
            return Err(topo_err(format!(
                "link Link-{rest} must flow from source and into sink"
            )));
        }
        (NodeRef::Source, NodeRef::Sink) => {
            return Err(topo_err("source cannot connect directly to sink"));
        }
        (a, b) if a == b => {
            return Err(topo_err(format!("self loop Link-{rest}")));
        }
        _ => {}
    }
    for end in [from, to] {
        if let Some(idx) = end.compute_index() {
            if idx >= total {
                return Err(topo_err(format!(
                    "link Link-{rest} refers to unknown compute node {idx}"
                )));
            }
        }
    }
    Ok((from, to))
}
