//! 布局方法
//!
//! 四种方法组成一个封闭的枚举，在边界处选定一次，然后统一通过
//! [`LayoutMethod::synthesize`] 调用。

use std::fmt;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::heuristic::{self, HeuristicOptions};
use super::solution::LayoutSolution;
use crate::cluster::{ModelProfile, Topology};
use crate::error::Result;
use crate::ilp::{ExactMode, ExactOptions, ExactReport, ExactSynthesizer, LocalSearchSolver};

/// 布局合成使用的随机数发生器。每次合成独占一个实例，抽样顺序决定结果。
pub type LayoutRng = ChaCha8Rng;

pub fn seeded_rng(seed: u64) -> LayoutRng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// 方法种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodKind {
    #[serde(rename = "ilp")]
    Exact,
    #[serde(rename = "petals")]
    PerformanceRanked,
    #[serde(rename = "swarm")]
    FixedStageCount,
    #[serde(rename = "homogeneous")]
    HomogeneousBiased,
}

impl MethodKind {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let compact: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .filter(|ch| *ch != '_' && *ch != '-')
            .collect();
        match compact.as_str() {
            "ilp" | "milp" | "exact" => Ok(Self::Exact),
            "petals" | "performanceranked" => Ok(Self::PerformanceRanked),
            "swarm" | "fixedstagecount" => Ok(Self::FixedStageCount),
            "homogeneous" | "homogeneousbiased" | "orca" => Ok(Self::HomogeneousBiased),
            _ => Err(format!("unknown layout method: {raw}")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "ilp",
            Self::PerformanceRanked => "petals",
            Self::FixedStageCount => "swarm",
            Self::HomogeneousBiased => "homogeneous",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 精确方法的完整配置
#[derive(Debug, Clone, Default)]
pub struct ExactConfig {
    pub options: ExactOptions,
    pub mode: ExactMode,
}

/// 选定的布局方法及其参数
#[derive(Debug, Clone)]
pub enum LayoutMethod {
    Exact(ExactConfig),
    PerformanceRanked(HeuristicOptions),
    FixedStageCount {
        options: HeuristicOptions,
        num_stages: usize,
    },
    HomogeneousBiased(HeuristicOptions),
}

/// 一次合成的结果
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub solution: LayoutSolution,
    /// 仅精确方法有求解器报告
    pub solver: Option<ExactReport>,
}

impl LayoutMethod {
    pub fn kind(&self) -> MethodKind {
        match self {
            Self::Exact(_) => MethodKind::Exact,
            Self::PerformanceRanked(_) => MethodKind::PerformanceRanked,
            Self::FixedStageCount { .. } => MethodKind::FixedStageCount,
            Self::HomogeneousBiased(_) => MethodKind::HomogeneousBiased,
        }
    }

    pub fn synthesize(
        &self,
        topology: &Topology,
        model: &ModelProfile,
        rng: &mut LayoutRng,
    ) -> Result<LayoutSolution> {
        self.synthesize_observed(topology, model, rng, &mut |_, _| {})
            .map(|s| s.solution)
    }

    /// 合成布局；精确方法每找到更好的可行解都会调用 `on_incumbent`
    #[tracing::instrument(skip_all, fields(method = %self.kind()))]
    pub fn synthesize_observed(
        &self,
        topology: &Topology,
        model: &ModelProfile,
        rng: &mut LayoutRng,
        on_incumbent: &mut dyn FnMut(&LayoutSolution, f64),
    ) -> Result<Synthesis> {
        info!("▶️  开始布局合成");
        let solution = match self {
            Self::HomogeneousBiased(options) => {
                heuristic::homogeneous(topology, model, options, rng)?
            }
            Self::PerformanceRanked(options) => {
                heuristic::performance_ranked(topology, model, options, rng)?
            }
            Self::FixedStageCount {
                options,
                num_stages,
            } => heuristic::fixed_stage_count(topology, model, options, *num_stages, rng)?,
            Self::Exact(config) => {
                let mut solver = LocalSearchSolver::new(rng.next_u64());
                let synth = ExactSynthesizer::new(topology, model, config.options.clone())?;
                let outcome = synth.run(config.mode.clone(), &mut solver, on_incumbent)?;
                return Ok(Synthesis {
                    solution: outcome.solution,
                    solver: Some(outcome.report),
                });
            }
        };
        Ok(Synthesis {
            solution,
            solver: None,
        })
    }
}
