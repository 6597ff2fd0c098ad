//! 集群拓扑模块
//!
//! 此模块描述布局合成的输入：机器类型参数、模型参数、容量查询接口，
//! 以及由计算节点、源/汇节点和双向链路组成的拓扑。加载后不可变。

// 子模块声明
mod capacity;
mod id;
mod link;
mod machine;
mod model;
mod node;
mod topology;

// 重新导出公共接口
pub use capacity::{CapacityResolver, CapacityTable, MachineCapacity};
pub use id::NodeRef;
pub use link::GraphLink;
pub use machine::{MachineProfile, SINK_NODE_TYPE, SOURCE_NODE_TYPE};
pub use model::{LayerParams, ModelProfile, ModelSpec};
pub use node::ComputeNode;
pub use topology::{Endpoint, Topology, TypeStats};
