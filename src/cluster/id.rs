//! 节点标识符
//!
//! 拓扑中的端点只有三种：源、汇和编号的计算节点。

use std::fmt;
use std::str::FromStr;

use crate::ini::IniValue;

/// 拓扑端点标识。排序为 Source < Compute(_) < Sink，链路按此规范化键存储。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeRef {
    Source,
    Compute(usize),
    Sink,
}

impl NodeRef {
    pub fn compute_index(self) -> Option<usize> {
        match self {
            NodeRef::Compute(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, NodeRef::Compute(_))
    }

    /// 从配置值解析：整数为计算节点，"source"/"sink" 为源/汇
    pub fn from_value(value: &IniValue) -> Result<Self, String> {
        match value {
            IniValue::Int(n) if *n >= 0 => Ok(NodeRef::Compute(*n as usize)),
            IniValue::Str(s) => s.parse(),
            other => Err(format!("not a node reference: {other}")),
        }
    }
}

impl FromStr for NodeRef {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "source" => Ok(NodeRef::Source),
            "sink" => Ok(NodeRef::Sink),
            other => other
                .parse::<usize>()
                .map(NodeRef::Compute)
                .map_err(|_| format!("not a node reference: {raw:?}")),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Source => f.write_str("source"),
            NodeRef::Sink => f.write_str("sink"),
            NodeRef::Compute(idx) => write!(f, "{idx}"),
        }
    }
}
