//! 持久化模块
//!
//! 此模块负责布局方案文件的读写、仿真器集群文件的生成，以及合成摘要。
//! 外部文件中计算节点的名字为 `compute_node_<offset + index>`。

// 子模块声明
mod sim_cluster;
mod solution_file;
mod summary;

// 重新导出公共接口
pub use sim_cluster::{SimulatorParameters, render_simulator_cluster, write_simulator_cluster};
pub use solution_file::{load_solution, parse_solution, render_solution, save_solution};
pub use summary::{PipelineSummary, SynthesisSummary};

/// 仿真器中编号 0 和 1 留给源和汇
pub const DEFAULT_NODE_OFFSET: usize = 2;

const NODE_NAME_PREFIX: &str = "compute_node_";

pub fn node_name(offset: usize, index: usize) -> String {
    format!("{NODE_NAME_PREFIX}{}", offset + index)
}

/// `node_name` 的逆；名字格式不对或编号小于 offset 时返回 None
pub fn parse_node_name(offset: usize, name: &str) -> Option<usize> {
    name.trim()
        .strip_prefix(NODE_NAME_PREFIX)?
        .parse::<usize>()
        .ok()?
        .checked_sub(offset)
}
