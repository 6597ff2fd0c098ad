//! 布局合成模块
//!
//! 此模块包含布局方案的数据结构、三种启发式合成方法、可行性校验器、
//! 吞吐上界估计，以及在各方法之间统一分派的 [`LayoutMethod`]。

// 子模块声明
mod bound;
mod heuristic;
mod method;
mod solution;
mod verify;

// 重新导出公共接口
pub use bound::{estimated_throughput, flow_upper_bound, pipeline_throughput};
pub use heuristic::{HeuristicOptions, fixed_stage_count, homogeneous, performance_ranked};
pub use method::{ExactConfig, LayoutMethod, LayoutRng, MethodKind, Synthesis, seeded_rng};
pub use solution::{LayerRange, LayoutSolution, LoadingPlan, NodeLoad, Pipeline, Stage};
pub use verify::{VerifyError, verify};
