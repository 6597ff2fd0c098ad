//! 求解器接口与本地搜索实现
//!
//! `PlacementSolver` 把放置模型当作黑盒求解：给定时间预算、提前停止条件
//! 和取消标志，返回最好的可行解。每找到一个更好的可行解都会通过回调
//! 上报，调用方可以立即持久化。
//!
//! `LocalSearchSolver` 在节点分组与排序上做带种子的爬山搜索，层划分由
//! [`PlacementModel::split`] 精确求出。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::model::{PlacementModel, chains_of};
use crate::layout::LayoutSolution;

/// 求解控制参数
#[derive(Debug, Clone)]
pub struct SolveControl {
    pub max_run_time: Duration,
    pub early_stop_time: Duration,
    /// 最优值达到 `threshold × bound` 即停止
    pub early_stop_threshold: f64,
    pub max_iterations: Option<u64>,
    pub cancel: Arc<AtomicBool>,
}

/// 求解结束时的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// 达到提前停止阈值
    Converged,
    /// 超过提前停止时间
    EarlyStopped,
    /// 超过总时间预算
    TimedOut,
    IterationLimit,
    /// 被取消标志打断
    Interrupted,
    /// 仅校验，未求解
    Verified,
}

impl SolveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SolveStatus::Converged => "converged",
            SolveStatus::EarlyStopped => "early_stopped",
            SolveStatus::TimedOut => "timed_out",
            SolveStatus::IterationLimit => "iteration_limit",
            SolveStatus::Interrupted => "interrupted",
            SolveStatus::Verified => "verified",
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次求解的结果
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    /// 最好的可行解及其目标值
    pub best: Option<(LayoutSolution, f64)>,
    pub bound: f64,
    pub iterations: u64,
    pub elapsed: Duration,
}

/// 放置模型求解器
pub trait PlacementSolver {
    fn solve(
        &mut self,
        model: &PlacementModel<'_>,
        warm_start: Option<&LayoutSolution>,
        control: &SolveControl,
        on_incumbent: &mut dyn FnMut(&LayoutSolution, f64),
    ) -> SolveOutcome;
}

#[derive(Debug, Clone)]
struct SearchState {
    chains: Vec<Vec<usize>>,
    scores: Vec<f64>,
    pool: Vec<usize>,
}

impl SearchState {
    fn total(&self) -> f64 {
        self.scores.iter().sum()
    }

    fn compact(&mut self) {
        let mut idx = 0;
        while idx < self.chains.len() {
            if self.chains[idx].is_empty() {
                self.chains.remove(idx);
                self.scores.remove(idx);
            } else {
                idx += 1;
            }
        }
    }
}

/// 带种子的爬山搜索。接受不变差的移动，以便在等值平台上游走。
#[derive(Debug, Clone)]
pub struct LocalSearchSolver {
    rng: ChaCha8Rng,
}

impl LocalSearchSolver {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// 初始状态：可行的热启动链保留，其余节点按装箱优先级贪心成链
    fn initial_state(
        &mut self,
        model: &PlacementModel<'_>,
        warm_start: Option<&LayoutSolution>,
    ) -> SearchState {
        let num_nodes = model.topology().num_nodes();
        let mut used = vec![false; num_nodes];
        let mut state = SearchState {
            chains: Vec::new(),
            scores: Vec::new(),
            pool: Vec::new(),
        };

        if let Some(solution) = warm_start {
            for chain in chains_of(solution) {
                if chain.iter().any(|&n| n >= num_nodes || used[n]) {
                    continue;
                }
                // split 拒绝链内重复的节点
                if let Some((_, score)) = model.split(&chain) {
                    for &n in &chain {
                        used[n] = true;
                    }
                    state.chains.push(chain);
                    state.scores.push(score);
                }
            }
            debug!(kept_chains = state.chains.len(), "热启动");
        }

        let mut rest: Vec<usize> = (0..num_nodes).filter(|n| !used[*n]).collect();
        if state.chains.is_empty() {
            let nodes = model.topology().nodes();
            rest.sort_by(|a, b| {
                nodes[*b]
                    .packing_priority()
                    .total_cmp(&nodes[*a].packing_priority())
                    .then_with(|| a.cmp(b))
            });
            let num_layers = model.model_profile().num_layers;
            let mut chain = Vec::new();
            let mut capacity = 0;
            for idx in rest {
                chain.push(idx);
                capacity += nodes[idx].max_layers;
                if capacity < num_layers {
                    continue;
                }
                match model.split(&chain) {
                    Some((_, score)) => {
                        state.chains.push(std::mem::take(&mut chain));
                        state.scores.push(score);
                    }
                    None => state.pool.append(&mut chain),
                }
                capacity = 0;
            }
            state.pool.extend(chain);
        } else {
            state.pool = rest;
        }
        state
    }

    /// 随机选一个移动作用在状态副本上；移动无法进行或结果不可行时返回 None
    fn propose(&mut self, model: &PlacementModel<'_>, state: &SearchState) -> Option<SearchState> {
        let mut next = state.clone();
        let touched = match self.rng.gen_range(0..5) {
            0 => self.open_chain(model, &mut next)?,
            1 => self.insert(&mut next)?,
            2 => self.relocate(&mut next)?,
            3 => self.swap(&mut next)?,
            _ => self.drop_node(&mut next)?,
        };
        for c in touched {
            if next.chains[c].is_empty() {
                next.scores[c] = 0.0;
                continue;
            }
            let (_, score) = model.split(&next.chains[c])?;
            next.scores[c] = score;
        }
        next.compact();
        Some(next)
    }

    fn open_chain(
        &mut self,
        model: &PlacementModel<'_>,
        state: &mut SearchState,
    ) -> Option<Vec<usize>> {
        let num_layers = model.model_profile().num_layers;
        let nodes = model.topology().nodes();
        state.pool.shuffle(&mut self.rng);
        let mut capacity = 0;
        let mut take = 0;
        while capacity < num_layers {
            let idx = *state.pool.get(take)?;
            capacity += nodes[idx].max_layers;
            take += 1;
        }
        let chain: Vec<usize> = state.pool.drain(..take).collect();
        state.chains.push(chain);
        state.scores.push(0.0);
        Some(vec![state.chains.len() - 1])
    }

    fn insert(&mut self, state: &mut SearchState) -> Option<Vec<usize>> {
        if state.pool.is_empty() || state.chains.is_empty() {
            return None;
        }
        let p = self.rng.gen_range(0..state.pool.len());
        let c = self.rng.gen_range(0..state.chains.len());
        let pos = self.rng.gen_range(0..=state.chains[c].len());
        let node = state.pool.swap_remove(p);
        state.chains[c].insert(pos, node);
        Some(vec![c])
    }

    fn relocate(&mut self, state: &mut SearchState) -> Option<Vec<usize>> {
        if state.chains.is_empty() {
            return None;
        }
        let c = self.rng.gen_range(0..state.chains.len());
        let pos = self.rng.gen_range(0..state.chains[c].len());
        let node = state.chains[c].remove(pos);
        let d = self.rng.gen_range(0..state.chains.len());
        let to = self.rng.gen_range(0..=state.chains[d].len());
        state.chains[d].insert(to, node);
        Some(if c == d { vec![c] } else { vec![c, d] })
    }

    fn swap(&mut self, state: &mut SearchState) -> Option<Vec<usize>> {
        if state.chains.is_empty() {
            return None;
        }
        let c = self.rng.gen_range(0..state.chains.len());
        let pos = self.rng.gen_range(0..state.chains[c].len());
        if !state.pool.is_empty() && self.rng.gen_bool(0.5) {
            let p = self.rng.gen_range(0..state.pool.len());
            std::mem::swap(&mut state.chains[c][pos], &mut state.pool[p]);
            return Some(vec![c]);
        }
        let d = self.rng.gen_range(0..state.chains.len());
        let other = self.rng.gen_range(0..state.chains[d].len());
        if c == d {
            if pos == other {
                return None;
            }
            state.chains[c].swap(pos, other);
            return Some(vec![c]);
        }
        let node = state.chains[c][pos];
        state.chains[c][pos] = state.chains[d][other];
        state.chains[d][other] = node;
        Some(vec![c, d])
    }

    fn drop_node(&mut self, state: &mut SearchState) -> Option<Vec<usize>> {
        if state.chains.is_empty() {
            return None;
        }
        let c = self.rng.gen_range(0..state.chains.len());
        let pos = self.rng.gen_range(0..state.chains[c].len());
        let node = state.chains[c].remove(pos);
        state.pool.push(node);
        Some(vec![c])
    }
}

impl PlacementSolver for LocalSearchSolver {
    #[tracing::instrument(
        skip_all,
        fields(nodes = model.topology().num_nodes(), pruned = model.is_pruned())
    )]
    fn solve(
        &mut self,
        model: &PlacementModel<'_>,
        warm_start: Option<&LayoutSolution>,
        control: &SolveControl,
        on_incumbent: &mut dyn FnMut(&LayoutSolution, f64),
    ) -> SolveOutcome {
        let started = Instant::now();
        let bound = model.bound();
        let target = control.early_stop_threshold * bound;

        let mut state = self.initial_state(model, warm_start);
        let mut best: Option<(LayoutSolution, f64)> = None;
        let mut report = |state: &SearchState, best: &mut Option<(LayoutSolution, f64)>| {
            if state.chains.is_empty() {
                return;
            }
            let total = state.total();
            if best.as_ref().is_some_and(|(_, b)| total <= *b) {
                return;
            }
            let Some((solution, objective)) = model.solution_from_chains(&state.chains) else {
                return;
            };
            if let Err(err) = model.check(&solution) {
                warn!(%err, "⚠️  候选解未通过约束检查，不上报");
                return;
            }
            info!(
                objective,
                bound,
                pipelines = state.chains.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "⭐ 新的可行解"
            );
            on_incumbent(&solution, objective);
            *best = Some((solution, objective));
        };
        report(&state, &mut best);

        let mut iterations = 0u64;
        let status = loop {
            if control.cancel.load(Ordering::Relaxed) {
                break SolveStatus::Interrupted;
            }
            if best.as_ref().is_some_and(|(_, b)| *b >= target) {
                break SolveStatus::Converged;
            }
            let elapsed = started.elapsed();
            if elapsed >= control.max_run_time {
                break SolveStatus::TimedOut;
            }
            if elapsed >= control.early_stop_time {
                break SolveStatus::EarlyStopped;
            }
            if control.max_iterations.is_some_and(|max| iterations >= max) {
                break SolveStatus::IterationLimit;
            }

            iterations += 1;
            let Some(candidate) = self.propose(model, &state) else {
                continue;
            };
            if candidate.total() >= state.total() {
                trace!(iteration = iterations, objective = candidate.total(), "接受移动");
                state = candidate;
                report(&state, &mut best);
            }
        };

        let elapsed = started.elapsed();
        info!(
            status = status.as_str(),
            iterations,
            objective = best.as_ref().map(|(_, o)| *o),
            bound,
            elapsed_ms = elapsed.as_millis() as u64,
            "🏁 求解结束"
        );
        SolveOutcome {
            status,
            best,
            bound,
            iterations,
            elapsed,
        }
    }
}
