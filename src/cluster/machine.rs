//! 机器类型参数

use crate::ini::{IniError, Section};

/// 机器参数文件中描述源节点的节名
pub const SOURCE_NODE_TYPE: &str = "SourceNode";
/// 机器参数文件中描述汇节点的节名
pub const SINK_NODE_TYPE: &str = "SinkNode";

/// 一种机器的硬件参数（字节、字节/秒）
#[derive(Debug, Clone, PartialEq)]
pub struct MachineProfile {
    pub type_name: String,
    pub vram_size: f64,
    pub inbound_nic_speed: f64,
    pub outbound_nic_speed: f64,
    pub disk_speed: f64,
}

impl MachineProfile {
    /// 从 `[<type_name>]` 节读取。源/汇节点可以省略显存与磁盘速度。
    pub fn from_section(section: &Section) -> Result<Self, IniError> {
        let optional = |key: &str| -> Result<f64, IniError> {
            match section.get(key) {
                Some(_) => section.get_quantity(key),
                None => Ok(0.0),
            }
        };
        Ok(Self {
            type_name: section.name().to_string(),
            vram_size: optional("vram_size")?,
            inbound_nic_speed: section.get_quantity("inbound_nic_speed")?,
            outbound_nic_speed: section.get_quantity("outbound_nic_speed")?,
            disk_speed: optional("disk_speed")?,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.type_name == SOURCE_NODE_TYPE || self.type_name == SINK_NODE_TYPE
    }

    /// 进出网卡中较慢的一侧
    pub fn bottleneck_nic_speed(&self) -> f64 {
        self.inbound_nic_speed.min(self.outbound_nic_speed)
    }
}
