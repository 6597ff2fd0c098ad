//! 精确（近似精确）布局合成
//!
//! 三种互斥的运行方式：从头求解、热启动求解、仅校验。

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use super::model::PlacementModel;
use super::prune::{PruneOptions, prune_links};
use super::solver::{PlacementSolver, SolveControl, SolveStatus};
use crate::cluster::{ModelProfile, Topology};
use crate::error::{LayoutError, Result};
use crate::layout::LayoutSolution;

/// 精确方法的参数
#[derive(Debug, Clone)]
pub struct ExactOptions {
    /// 求解前剪枝；None 表示使用全部链路
    pub pruning: Option<PruneOptions>,
    pub max_run_time: Duration,
    pub early_stop_time: Duration,
    pub early_stop_threshold: f64,
    pub max_iterations: Option<u64>,
    /// 协作式取消标志，求解器在每步之间检查
    pub cancel: Arc<AtomicBool>,
}

impl Default for ExactOptions {
    fn default() -> Self {
        Self {
            pruning: None,
            max_run_time: Duration::from_secs(36_000),
            early_stop_time: Duration::from_secs(100),
            early_stop_threshold: 0.95,
            max_iterations: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ExactOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.early_stop_threshold > 0.0 && self.early_stop_threshold <= 1.0) {
            return Err(LayoutError::InvalidOptions(format!(
                "early_stop_threshold must be in (0, 1], got {}",
                self.early_stop_threshold
            )));
        }
        if let Some(pruning) = &self.pruning {
            pruning.validate()?;
        }
        Ok(())
    }

    fn control(&self) -> SolveControl {
        SolveControl {
            max_run_time: self.max_run_time,
            early_stop_time: self.early_stop_time,
            early_stop_threshold: self.early_stop_threshold,
            max_iterations: self.max_iterations,
            cancel: Arc::clone(&self.cancel),
        }
    }
}

/// 运行方式
#[derive(Debug, Clone, Default)]
pub enum ExactMode {
    #[default]
    Fresh,
    /// 以已有方案作为初始可行解
    WarmStart(LayoutSolution),
    /// 只检查给定方案，不求解
    VerifyOnly(LayoutSolution),
}

/// 求解器报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExactReport {
    pub status: SolveStatus,
    pub objective: f64,
    pub bound: f64,
    pub iterations: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ExactOutcome {
    pub solution: LayoutSolution,
    pub report: ExactReport,
}

pub struct ExactSynthesizer<'a> {
    topology: &'a Topology,
    model: &'a ModelProfile,
    options: ExactOptions,
}

impl<'a> ExactSynthesizer<'a> {
    pub fn new(
        topology: &'a Topology,
        model: &'a ModelProfile,
        options: ExactOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            topology,
            model,
            options,
        })
    }

    /// 取消句柄：置位后正在运行的求解会尽快返回当前最好解
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.options.cancel)
    }

    /// 构建放置模型（按需剪枝）
    pub fn build_model(&self) -> Result<PlacementModel<'a>> {
        let allowed = match &self.options.pruning {
            Some(pruning) => Some(prune_links(self.topology, pruning)?),
            None => None,
        };
        Ok(PlacementModel::new(self.topology, self.model, allowed))
    }

    #[tracing::instrument(skip_all, fields(nodes = self.topology.num_nodes()))]
    pub fn run(
        &self,
        mode: ExactMode,
        solver: &mut dyn PlacementSolver,
        on_incumbent: &mut dyn FnMut(&LayoutSolution, f64),
    ) -> Result<ExactOutcome> {
        let started = Instant::now();
        let model = self.build_model()?;

        let warm_start = match mode {
            ExactMode::VerifyOnly(solution) => {
                let objective = model.check(&solution)?;
                info!(objective, bound = model.bound(), "✅ 方案满足全部约束");
                return Ok(ExactOutcome {
                    solution,
                    report: ExactReport {
                        status: SolveStatus::Verified,
                        objective,
                        bound: model.bound(),
                        iterations: 0,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    },
                });
            }
            ExactMode::WarmStart(solution) => {
                if let Err(err) = model.check(&solution) {
                    warn!(%err, "⚠️  热启动方案不可行，只保留其中可行的流水线");
                }
                Some(solution)
            }
            ExactMode::Fresh => None,
        };

        let capacity: usize = self.topology.nodes().iter().map(|n| n.max_layers).sum();
        if capacity < self.model.num_layers {
            return Err(LayoutError::SolverInfeasible(format!(
                "cluster holds at most {capacity} layers, model has {}",
                self.model.num_layers
            )));
        }

        let outcome = solver.solve(
            &model,
            warm_start.as_ref(),
            &self.options.control(),
            on_incumbent,
        );
        let elapsed_ms = outcome.elapsed.as_millis() as u64;
        let Some((solution, objective)) = outcome.best else {
            return Err(LayoutError::SolverTimeout {
                status: outcome.status.to_string(),
                elapsed_ms,
            });
        };
        model.check(&solution)?;

        Ok(ExactOutcome {
            solution,
            report: ExactReport {
                status: outcome.status,
                objective,
                bound: outcome.bound,
                iterations: outcome.iterations,
                elapsed_ms,
            },
        })
    }
}
