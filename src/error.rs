//! 错误类型
//!
//! 布局合成过程中所有可恢复错误的统一定义。

use std::path::PathBuf;

use thiserror::Error;

use crate::ini::IniError;
use crate::layout::VerifyError;

/// 布局合成错误
#[derive(Debug, Error)]
pub enum LayoutError {
    /// 拓扑文件格式错误或不是完全图（加载期致命错误，不会部分加载）
    #[error("topology error: {0}")]
    Topology(String),

    /// 节点需要的参数存储超过可用显存的一半
    #[error(
        "node {node} ({machine_type}): {max_layers} layers need {required_bytes} bytes, \
         more than half of {vram_bytes} bytes of vram"
    )]
    CapacityExceeded {
        node: usize,
        machine_type: String,
        max_layers: usize,
        required_bytes: f64,
        vram_bytes: f64,
    },

    /// 校验器发现的不可行解
    #[error("infeasible solution: {0}")]
    Infeasible(#[from] VerifyError),

    /// 求解器停止（超时、提前停止或被取消）时没有任何可行解
    #[error("solver stopped ({status}) after {elapsed_ms} ms without a feasible incumbent")]
    SolverTimeout { status: String, elapsed_ms: u64 },

    /// 求解器证明不存在可行解
    #[error("solver proved the model infeasible: {0}")]
    SolverInfeasible(String),

    /// 启发式方法无法组成任何完整流水线
    #[error("no feasible layout: {considered} nodes considered, none formed a complete pipeline")]
    NoFeasibleLayout { considered: usize },

    /// 布局方案文件格式错误
    #[error("malformed solution file: {0}")]
    Serialization(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("{0}")]
    Ini(#[from] IniError),

    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = LayoutError> = std::result::Result<T, E>;
