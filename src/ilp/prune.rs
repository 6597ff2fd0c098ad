//! 链路剪枝
//!
//! 求解前缩小问题规模：对每个计算节点，只保留带宽最高的若干条
//! 计算节点间链路。与源/汇相连的链路始终保留。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::{GraphLink, NodeRef, Topology};
use crate::error::{LayoutError, Result};
use crate::units::MBPS;

/// 剪枝参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneOptions {
    /// 每个节点至少保留的链路数（即使低于带宽阈值）
    pub min_keep: usize,
    /// 每个节点最多保留的链路数
    pub max_keep: usize,
    /// 字节/秒
    pub keep_bandwidth_threshold: f64,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            min_keep: 12,
            max_keep: 12,
            keep_bandwidth_threshold: MBPS.to_base(1.0),
        }
    }
}

impl PruneOptions {
    pub fn validate(&self) -> Result<()> {
        if self.min_keep > self.max_keep {
            return Err(LayoutError::InvalidOptions(format!(
                "min_keep ({}) must not exceed max_keep ({})",
                self.min_keep, self.max_keep
            )));
        }
        if self.keep_bandwidth_threshold.is_nan() || self.keep_bandwidth_threshold < 0.0 {
            return Err(LayoutError::InvalidOptions(format!(
                "keep_bandwidth_threshold must be non-negative, got {}",
                self.keep_bandwidth_threshold
            )));
        }
        Ok(())
    }
}

/// 返回剪枝后允许使用的链路（规范化键）。一条计算节点间链路只要被
/// 任一端点选中即保留。
#[tracing::instrument(skip_all, fields(min_keep = options.min_keep, max_keep = options.max_keep))]
pub fn prune_links(
    topology: &Topology,
    options: &PruneOptions,
) -> Result<BTreeSet<(NodeRef, NodeRef)>> {
    options.validate()?;

    let mut allowed: BTreeSet<(NodeRef, NodeRef)> = topology
        .links()
        .filter(|l| l.from.is_terminal() || l.to.is_terminal())
        .map(GraphLink::key)
        .collect();
    let terminal = allowed.len();

    for node in topology.nodes() {
        let mut candidates: Vec<&GraphLink> = topology
            .links()
            .filter(|l| l.touches(node.id()) && !l.from.is_terminal() && !l.to.is_terminal())
            .collect();
        candidates.sort_by(|a, b| {
            b.bandwidth
                .total_cmp(&a.bandwidth)
                .then_with(|| a.key().cmp(&b.key()))
        });

        let mut kept = 0;
        for link in candidates {
            let above = link.bandwidth >= options.keep_bandwidth_threshold;
            if kept >= options.max_keep || (!above && kept >= options.min_keep) {
                break;
            }
            allowed.insert(link.key());
            kept += 1;
        }
        debug!(node = node.index, kept, "剪枝保留链路");
    }

    let total = topology.links().count();
    info!(
        kept = allowed.len(),
        dropped = total - allowed.len(),
        terminal,
        "✂️  链路剪枝完成"
    );
    Ok(allowed)
}
