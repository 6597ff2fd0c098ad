//! 容量查询
//!
//! 机器性能数据来自外部的 profiling 子系统，这里只定义查询接口，
//! 并提供一个从 JSON 表加载的实现。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, Result};

/// 按机器类型和驻留层数查询容量/吞吐的外部接口
pub trait CapacityResolver {
    /// 在一半显存内最多能放下的层数
    fn max_num_layers(&self, machine_type: &str) -> Option<usize>;
    /// 驻留 `num_layers` 层时的典型 token 吞吐（tokens/s）
    fn typical_token_throughput(&self, machine_type: &str, num_layers: usize) -> Option<f64>;
    /// 驻留 `num_layers` 层时 KV cache 可容纳的 token 数
    fn kv_cache_capacity(&self, machine_type: &str, num_layers: usize) -> Option<u64>;
    /// 驻留 `num_layers` 层时 activation 备份可容纳的 token 数
    fn activation_backup_capacity(&self, machine_type: &str, num_layers: usize) -> Option<u64>;
}

/// 一种机器的 profiling 结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineCapacity {
    pub max_num_layers: usize,
    /// 第 k-1 项为驻留 k 层时的吞吐
    pub token_throughput: Vec<f64>,
    /// KV cache 总预算（token·层），按驻留层数平分
    pub kv_cache_budget: u64,
    /// activation 备份总预算（token·层），按驻留层数平分
    pub activation_backup_budget: u64,
}

/// JSON 形式的容量表：`{ "machines": { "A100": { ... } } }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapacityTable {
    pub machines: BTreeMap<String, MachineCapacity>,
}

impl CapacityTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|source| LayoutError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn insert(&mut self, machine_type: impl Into<String>, capacity: MachineCapacity) {
        self.machines.insert(machine_type.into(), capacity);
    }

    fn lookup(&self, machine_type: &str, num_layers: usize) -> Option<&MachineCapacity> {
        self.machines
            .get(machine_type)
            .filter(|m| num_layers >= 1 && num_layers <= m.max_num_layers)
    }
}

impl CapacityResolver for CapacityTable {
    fn max_num_layers(&self, machine_type: &str) -> Option<usize> {
        self.machines.get(machine_type).map(|m| m.max_num_layers)
    }

    fn typical_token_throughput(&self, machine_type: &str, num_layers: usize) -> Option<f64> {
        self.lookup(machine_type, num_layers)
            .and_then(|m| m.token_throughput.get(num_layers - 1).copied())
    }

    fn kv_cache_capacity(&self, machine_type: &str, num_layers: usize) -> Option<u64> {
        self.lookup(machine_type, num_layers)
            .map(|m| m.kv_cache_budget / num_layers as u64)
    }

    fn activation_backup_capacity(&self, machine_type: &str, num_layers: usize) -> Option<u64> {
        self.lookup(machine_type, num_layers)
            .map(|m| m.activation_backup_budget / num_layers as u64)
    }
}
