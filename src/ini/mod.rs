//! INI 配置读取
//!
//! 集群拓扑、机器参数和布局方案都使用 INI 风格的文件：`[Section]` 加
//! `key = value`。值使用一个很小的字面量语言：带引号的字符串、整数/字符串
//! 列表，以及带单位的数量表达式（见 [`crate::units`]）。

mod document;
mod value;

pub use document::{IniDocument, IniError, Section};
pub use value::{IniValue, format_list, parse_value};
