use clap::Parser;
use layout_synth::cluster::{CapacityTable, ModelProfile, Topology};
use layout_synth::ilp::{
    ExactMode, ExactOptions, ExactSynthesizer, LocalSearchSolver, PruneOptions,
};
use layout_synth::layout::{
    ExactConfig, HeuristicOptions, LayoutMethod, LayoutSolution, MethodKind, seeded_rng,
};
use layout_synth::persist::{
    DEFAULT_NODE_OFFSET, SynthesisSummary, load_solution, save_solution, write_simulator_cluster,
};
use layout_synth::units::eval_quantity;
use layout_synth::{LayoutError, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(
    name = "layout-synth",
    about = "Synthesize an initial model layout for a heterogeneous cluster"
)]
struct Args {
    /// Cluster topology INI
    #[arg(long)]
    cluster: PathBuf,

    /// Machine profile INI
    #[arg(long)]
    machine_profile: PathBuf,

    /// Model profile JSON; defaults to LLaMa-2 70B in fp16
    #[arg(long)]
    model: Option<PathBuf>,

    /// Capacity table JSON (per machine type profiling results)
    #[arg(long)]
    capacity: PathBuf,

    /// Layout method: ilp, petals, swarm or homogeneous
    #[arg(long, default_value = "homogeneous")]
    method: String,

    /// Seed for the layout generator
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Number of stages for the swarm method
    #[arg(long)]
    num_stages: Option<usize>,

    /// Per-type machine budget for heuristics, e.g. A100=4,L4=8,T4=12
    #[arg(long)]
    machine_budget: Option<String>,

    /// Output directory for <method>_sol.ini and simulator_cluster.ini
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Index offset for compute node names in generated files
    #[arg(long, default_value_t = DEFAULT_NODE_OFFSET)]
    node_offset: usize,

    /// Write a JSON summary of the synthesis
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Wall-clock budget of the ilp method (seconds)
    #[arg(long, default_value_t = 36_000)]
    max_run_time_secs: u64,

    /// Stop the ilp method after this many seconds (seconds)
    #[arg(long, default_value_t = 100)]
    early_stop_time_secs: u64,

    /// Stop the ilp method once objective >= threshold * flow upper bound
    #[arg(long, default_value_t = 0.95)]
    early_stop_threshold: f64,

    /// Iteration cap for the ilp method
    #[arg(long)]
    max_iterations: Option<u64>,

    /// Warm-start the ilp method from this solution file
    #[arg(long)]
    warm_start: Option<PathBuf>,

    /// Check this solution file against all constraints instead of synthesizing
    #[arg(long)]
    verify: Option<PathBuf>,

    /// Prune compute-to-compute links before the ilp method
    #[arg(long)]
    prune: bool,

    #[arg(long, default_value_t = 12)]
    min_keep: usize,

    #[arg(long, default_value_t = 12)]
    max_keep: usize,

    /// Bandwidth threshold for pruning, e.g. "1 * mbps"
    #[arg(long, default_value = "1 * mbps")]
    keep_bandwidth_threshold: String,

    /// Disable logging
    #[arg(long)]
    quiet: bool,
}

fn exact_options(args: &Args) -> Result<ExactOptions> {
    let pruning = if args.prune {
        let threshold = eval_quantity(&args.keep_bandwidth_threshold).map_err(|msg| {
            LayoutError::InvalidOptions(format!("--keep-bandwidth-threshold: {msg}"))
        })?;
        Some(PruneOptions {
            min_keep: args.min_keep,
            max_keep: args.max_keep,
            keep_bandwidth_threshold: threshold,
        })
    } else {
        None
    };
    Ok(ExactOptions {
        pruning,
        max_run_time: Duration::from_secs(args.max_run_time_secs),
        early_stop_time: Duration::from_secs(args.early_stop_time_secs),
        early_stop_threshold: args.early_stop_threshold,
        max_iterations: args.max_iterations,
        ..ExactOptions::default()
    })
}

/// 第一次 Ctrl-C 置位取消标志，求解器带着当前最好解返回；第二次直接退出
fn install_interrupt_handler(cancel: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    // 在主线程上注册，返回前信号已由 tokio 接管
    #[cfg(unix)]
    let mut interrupts = {
        let _guard = runtime.enter();
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?
    };
    thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    #[cfg(unix)]
                    let received = interrupts.recv().await.is_some();
                    #[cfg(not(unix))]
                    let received = tokio::signal::ctrl_c().await.is_ok();
                    if !received {
                        return;
                    }
                    if cancel.swap(true, Ordering::Relaxed) {
                        std::process::exit(130);
                    }
                    warn!("🛑 收到中断信号，求解器将返回当前最好解（再按一次直接退出）");
                }
            });
        })?;
    debug!("中断处理已安装");
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let model = match &args.model {
        Some(path) => ModelProfile::load(path)?,
        None => ModelProfile::llama_70b(),
    };
    let capacity = CapacityTable::load(&args.capacity)?;
    let topology = Topology::load(&args.cluster, &args.machine_profile, &model, &capacity)?;
    let offset = args.node_offset;
    let options = exact_options(&args)?;

    if let Some(path) = &args.verify {
        let solution = load_solution(path, &topology, &model)?;
        let synth = ExactSynthesizer::new(&topology, &model, options)?;
        let mut solver = LocalSearchSolver::new(args.seed);
        let outcome = synth.run(ExactMode::VerifyOnly(solution), &mut solver, &mut |_, _| {})?;
        println!(
            "verified objective={:.6} bound={:.6}",
            outcome.report.objective, outcome.report.bound
        );
        if let Some(summary_path) = &args.summary_json {
            SynthesisSummary::build(
                &outcome.solution,
                &topology,
                &model,
                args.seed,
                offset,
                Some(outcome.report),
            )
            .write_json(summary_path)?;
        }
        return Ok(());
    }

    let kind = MethodKind::parse(&args.method).map_err(LayoutError::InvalidOptions)?;
    let heuristic = HeuristicOptions {
        machine_budget: args
            .machine_budget
            .as_deref()
            .map(HeuristicOptions::parse_budget)
            .transpose()?,
    };
    let method = match kind {
        MethodKind::Exact => {
            if heuristic.machine_budget.is_some() {
                warn!("⚠️  ilp 方法忽略 --machine-budget");
            }
            let mode = match &args.warm_start {
                Some(path) => ExactMode::WarmStart(load_solution(path, &topology, &model)?),
                None => ExactMode::Fresh,
            };
            install_interrupt_handler(Arc::clone(&options.cancel))?;
            LayoutMethod::Exact(ExactConfig { options, mode })
        }
        MethodKind::PerformanceRanked => LayoutMethod::PerformanceRanked(heuristic),
        MethodKind::FixedStageCount => {
            let num_stages = args.num_stages.ok_or_else(|| {
                LayoutError::InvalidOptions("--num-stages is required for swarm".to_string())
            })?;
            LayoutMethod::FixedStageCount {
                options: heuristic,
                num_stages,
            }
        }
        MethodKind::HomogeneousBiased => LayoutMethod::HomogeneousBiased(heuristic),
    };

    fs::create_dir_all(&args.workspace)?;
    let solution_path = args.workspace.join(format!("{}_sol.ini", kind.as_str()));
    let mut on_incumbent = |solution: &LayoutSolution, objective: f64| {
        match save_solution(&solution_path, solution, &topology, offset) {
            Ok(()) => debug!(objective, "💾 已保存当前最好解"),
            Err(err) => warn!(%err, "⚠️  无法保存当前最好解"),
        }
    };
    let mut rng = seeded_rng(args.seed);
    let synthesis = method.synthesize_observed(&topology, &model, &mut rng, &mut on_incumbent)?;

    save_solution(&solution_path, &synthesis.solution, &topology, offset)?;
    write_simulator_cluster(
        args.workspace.join("simulator_cluster.ini"),
        &synthesis.solution,
        &topology,
        &capacity,
        offset,
    )?;

    let summary = SynthesisSummary::build(
        &synthesis.solution,
        &topology,
        &model,
        args.seed,
        offset,
        synthesis.solver,
    );
    for (idx, pipeline) in summary.pipelines.iter().enumerate() {
        println!(
            "pipeline idx={} nodes={} stages={} throughput={:.6}",
            idx,
            pipeline.nodes.join(","),
            pipeline.ranges.len(),
            pipeline.throughput
        );
    }
    println!(
        "layout method={} pipelines={} nodes_in_use={} unused_nodes={} estimated_throughput={:.6} flow_upper_bound={:.6} warmup_secs={}",
        kind,
        summary.pipelines.len(),
        summary.nodes_in_use,
        summary.unused_nodes,
        summary.estimated_throughput,
        summary.flow_upper_bound,
        summary.simulator_warmup_secs
    );
    if let Some(path) = &args.summary_json {
        summary.write_json(path)?;
        eprintln!("wrote summary to {}", path.display());
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(if args.quiet {
            tracing_subscriber::EnvFilter::new("off")
        } else {
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        })
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    if let Err(err) = run(args) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
