//! 精确布局模块
//!
//! 此模块把布局问题表述为放置模型（每个节点的层区间与承载流量的链路），
//! 并通过 [`PlacementSolver`] 接口求解，支持剪枝、热启动、仅校验、
//! 时间预算、提前停止和协作式取消。

// 子模块声明
mod model;
mod prune;
mod solver;
mod synth;

// 重新导出公共接口
pub use model::{PlacementModel, chains_of};
pub use prune::{PruneOptions, prune_links};
pub use solver::{LocalSearchSolver, PlacementSolver, SolveControl, SolveOutcome, SolveStatus};
pub use synth::{ExactMode, ExactOptions, ExactOutcome, ExactReport, ExactSynthesizer};
