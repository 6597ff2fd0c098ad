//! 合成结果摘要（JSON）

use std::fs;
use std::path::Path;

use serde::Serialize;

use super::node_name;
use super::sim_cluster::SimulatorParameters;
use crate::cluster::{ModelProfile, Topology};
use crate::error::{LayoutError, Result};
use crate::ilp::ExactReport;
use crate::layout::{
    LayerRange, LayoutSolution, MethodKind, estimated_throughput, flow_upper_bound,
    pipeline_throughput,
};

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub nodes: Vec<String>,
    pub ranges: Vec<LayerRange>,
    pub throughput: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisSummary {
    pub method: Option<MethodKind>,
    pub seed: u64,
    pub model: String,
    pub num_layers: usize,
    pub pipelines: Vec<PipelineSummary>,
    pub nodes_in_use: usize,
    pub unused_nodes: usize,
    pub flow_upper_bound: f64,
    pub estimated_throughput: f64,
    pub max_load_time: f64,
    pub simulator_warmup_secs: u64,
    pub simulator: SimulatorParameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solver: Option<ExactReport>,
    pub warnings: Vec<String>,
}

impl SynthesisSummary {
    pub fn build(
        solution: &LayoutSolution,
        topology: &Topology,
        model: &ModelProfile,
        seed: u64,
        offset: usize,
        solver: Option<ExactReport>,
    ) -> Self {
        let pipelines = solution
            .pipelines()
            .iter()
            .map(|p| PipelineSummary {
                nodes: p.nodes().map(|n| node_name(offset, n)).collect(),
                ranges: p.stages().iter().map(|s| s.layers).collect(),
                throughput: pipeline_throughput(topology, p),
            })
            .collect();
        let plan = solution.loading_plan(topology, model);
        let in_use = solution.nodes_in_use().len();
        Self {
            method: solution.method(),
            seed,
            model: model.name.clone(),
            num_layers: model.num_layers,
            pipelines,
            nodes_in_use: in_use,
            unused_nodes: topology.num_nodes() - in_use,
            flow_upper_bound: flow_upper_bound(topology, model),
            estimated_throughput: estimated_throughput(topology, solution),
            max_load_time: plan.max_load_time,
            simulator_warmup_secs: plan.simulator_warmup_secs(),
            simulator: SimulatorParameters::from_model(model),
            solver,
            warnings: topology.warnings().to_vec(),
        }
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| LayoutError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json)?;
        Ok(())
    }
}
