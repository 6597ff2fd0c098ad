//! 链路类型
//!
//! 拓扑中的链路是双向的：每对端点只保存一次，方向保留配置文件中的写法。

use super::id::NodeRef;

/// 双向链路
#[derive(Debug, Clone, PartialEq)]
pub struct GraphLink {
    pub from: NodeRef,
    pub to: NodeRef,
    /// 字节/秒
    pub bandwidth: f64,
    /// 秒
    pub latency: f64,
    /// 折算为 token/s：接触源/汇的链路按 token 大小，其余按 activation 大小
    pub throughput: f64,
}

impl GraphLink {
    pub fn new(
        from: NodeRef,
        to: NodeRef,
        bandwidth: f64,
        latency: f64,
        token_size: f64,
        activation_size: f64,
    ) -> Self {
        let wire_size = if from.is_terminal() || to.is_terminal() {
            token_size
        } else {
            activation_size
        };
        Self {
            from,
            to,
            bandwidth,
            latency,
            throughput: bandwidth / wire_size,
        }
    }

    /// 规范化的无序端点键
    pub fn key(&self) -> (NodeRef, NodeRef) {
        link_key(self.from, self.to)
    }

    pub fn touches(&self, node: NodeRef) -> bool {
        self.from == node || self.to == node
    }
}

/// 无序端点对的规范化键
pub(crate) fn link_key(a: NodeRef, b: NodeRef) -> (NodeRef, NodeRef) {
    if a <= b { (a, b) } else { (b, a) }
}
