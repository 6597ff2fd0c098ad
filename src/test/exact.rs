use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use super::fixtures::{ClusterFixture, T4, half_half_cluster, mixed_cluster};
use crate::cluster::NodeRef;
use crate::error::LayoutError;
use crate::ilp::{
    ExactMode, ExactOptions, ExactSynthesizer, LocalSearchSolver, PlacementModel, PruneOptions,
    SolveStatus, prune_links,
};
use crate::layout::{
    ExactConfig, HeuristicOptions, LayerRange, LayoutMethod, LayoutSolution, MethodKind, Pipeline,
    Stage, VerifyError, homogeneous, seeded_rng, verify,
};

fn bounded(iterations: u64) -> ExactOptions {
    ExactOptions {
        max_iterations: Some(iterations),
        ..ExactOptions::default()
    }
}

fn no_inner_links() -> PruneOptions {
    PruneOptions {
        min_keep: 0,
        max_keep: 0,
        keep_bandwidth_threshold: 0.0,
    }
}

fn homogeneous_layout(fixture: &ClusterFixture) -> LayoutSolution {
    homogeneous(
        &fixture.topology(),
        &fixture.model,
        &HeuristicOptions::default(),
        &mut seeded_rng(0),
    )
    .expect("homogeneous layout")
}

#[test]
fn split_finds_the_max_min_partition() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    let model = PlacementModel::full(&topo, &fixture.model);

    let (pipeline, throughput) = model.split(&[0, 1, 2, 3]).expect("four A100 hold 80 layers");
    assert!(pipeline.stages().iter().all(|s| s.layers.len() == 20));
    assert!((throughput - 1_500.0).abs() < 1e-9);

    // 8 × L4（7 层）+ 6 × T4（4 层）恰好 80 层，瓶颈在 T4
    let chain: Vec<usize> = (4..18).collect();
    let (pipeline, throughput) = model.split(&chain).expect("mixed chain");
    assert_eq!(pipeline.last().map(|s| s.layers.end), Some(80));
    assert!((throughput - 1_000.0).abs() < 1e-9);

    assert!(model.split(&[]).is_none());
    assert!(model.split(&[0, 1, 2]).is_none());
    assert!(model.split(&[0, 99]).is_none());
    // 同一节点在链中出现两次
    assert!(model.split(&[0, 1, 2, 0]).is_none());
}

#[test]
fn verify_only_reports_objective_and_bound() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    let solution = homogeneous_layout(&fixture);

    let synth = ExactSynthesizer::new(&topo, &fixture.model, ExactOptions::default())
        .expect("options");
    let mut solver = LocalSearchSolver::new(0);
    let outcome = synth
        .run(
            ExactMode::VerifyOnly(solution.clone()),
            &mut solver,
            &mut |_, _| panic!("verify-only never solves"),
        )
        .expect("homogeneous layout is feasible");
    assert_eq!(outcome.solution, solution);
    assert_eq!(outcome.report.status, SolveStatus::Verified);
    assert_eq!(outcome.report.iterations, 0);
    assert!((outcome.report.objective - 2_500.0).abs() < 1e-6);
    assert!((outcome.report.bound - 2_900.0).abs() < 1e-6);
}

#[test]
fn fresh_solve_reports_incumbents_and_stays_under_bound() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    let synth = ExactSynthesizer::new(&topo, &fixture.model, bounded(300)).expect("options");

    let mut incumbents = Vec::new();
    let outcome = synth
        .run(
            ExactMode::Fresh,
            &mut LocalSearchSolver::new(11),
            &mut |_, objective| incumbents.push(objective),
        )
        .expect("solve");

    assert!(!incumbents.is_empty());
    assert!(incumbents.windows(2).all(|w| w[0] < w[1]));
    let last = incumbents.last().copied().unwrap_or_default();
    assert_eq!(outcome.report.objective, last);

    assert_eq!(outcome.solution.method(), Some(MethodKind::Exact));
    assert!(verify(&outcome.solution, &topo, &fixture.model).is_ok());
    assert!(outcome.report.objective >= 2_500.0 - 1e-6);
    assert!(outcome.report.objective <= outcome.report.bound + 1e-6);
    assert!(matches!(
        outcome.report.status,
        SolveStatus::IterationLimit | SolveStatus::Converged
    ));
}

#[test]
fn same_seed_same_exact_solution() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    let synth = ExactSynthesizer::new(&topo, &fixture.model, bounded(200)).expect("options");
    let run = |seed| {
        synth
            .run(ExactMode::Fresh, &mut LocalSearchSolver::new(seed), &mut |_, _| {})
            .expect("solve")
            .solution
    };
    assert_eq!(run(3), run(3));
}

#[test]
fn warm_start_never_loses_the_warm_objective() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    let warm = homogeneous_layout(&fixture);

    let method = LayoutMethod::Exact(ExactConfig {
        options: bounded(200),
        mode: ExactMode::WarmStart(warm),
    });
    let mut calls = 0;
    let synthesis = method
        .synthesize_observed(&topo, &fixture.model, &mut seeded_rng(4), &mut |_, _| {
            calls += 1
        })
        .expect("warm start");
    assert!(calls >= 1);
    let report = synthesis.solver.expect("exact report");
    assert!(report.objective >= 2_500.0 - 1e-6);
    assert!(verify(&synthesis.solution, &topo, &fixture.model).is_ok());
}

#[test]
fn warm_start_with_a_repeated_node_only_reports_feasible_incumbents() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    let stage = |node, start, end| Stage {
        node,
        layers: LayerRange::new(start, end),
    };
    let warm = LayoutSolution::from_pipelines(
        MethodKind::HomogeneousBiased,
        vec![Pipeline::new(vec![
            stage(0, 0, 20),
            stage(1, 20, 40),
            stage(2, 40, 60),
            stage(0, 60, 80),
        ])],
    );
    let synth = ExactSynthesizer::new(&topo, &fixture.model, bounded(500)).expect("options");

    let mut incumbents = Vec::new();
    let outcome = synth
        .run(
            ExactMode::WarmStart(warm),
            &mut LocalSearchSolver::new(0),
            &mut |solution, _| incumbents.push(solution.clone()),
        )
        .expect("infeasible warm chain is dropped, not fatal");

    assert!(!incumbents.is_empty());
    for solution in &incumbents {
        assert_eq!(verify(solution, &topo, &fixture.model), Ok(()));
    }
    assert!(verify(&outcome.solution, &topo, &fixture.model).is_ok());
    assert!(outcome.report.objective >= 2_500.0 - 1e-6);
}

#[test]
fn cancel_from_another_thread_stops_a_running_solve() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    // 阈值 1.0 不可达：只有取消能让求解在时间预算内结束
    let options = ExactOptions {
        early_stop_threshold: 1.0,
        early_stop_time: Duration::from_secs(60),
        ..ExactOptions::default()
    };
    let synth = ExactSynthesizer::new(&topo, &fixture.model, options).expect("options");
    let cancel = synth.cancel_handle();

    let outcome = thread::scope(|scope| {
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(200));
            cancel.store(true, Ordering::Relaxed);
        });
        synth.run(ExactMode::Fresh, &mut LocalSearchSolver::new(5), &mut |_, _| {})
    })
    .expect("cancelled run keeps its incumbent");

    assert_eq!(outcome.report.status, SolveStatus::Interrupted);
    assert!(outcome.report.iterations > 0);
    assert!(outcome.report.elapsed_ms < 60_000);
    assert!(outcome.report.objective >= 2_500.0 - 1e-6);
    assert!(verify(&outcome.solution, &topo, &fixture.model).is_ok());
}

#[test]
fn cancelled_run_returns_the_initial_incumbent() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    let synth =
        ExactSynthesizer::new(&topo, &fixture.model, ExactOptions::default()).expect("options");
    synth.cancel_handle().store(true, Ordering::Relaxed);

    let outcome = synth
        .run(ExactMode::Fresh, &mut LocalSearchSolver::new(0), &mut |_, _| {})
        .expect("initial state is feasible");
    assert_eq!(outcome.report.status, SolveStatus::Interrupted);
    assert_eq!(outcome.report.iterations, 0);
    // 贪心初始解：A100 一条，L4 + T4 一条
    assert!((outcome.report.objective - 2_500.0).abs() < 1e-6);
}

#[test]
fn undersized_cluster_is_infeasible() {
    let fixture = ClusterFixture::new(&[T4]);
    let topo = fixture.topology();
    let synth = ExactSynthesizer::new(&topo, &fixture.model, bounded(10)).expect("options");
    let err = synth
        .run(ExactMode::Fresh, &mut LocalSearchSolver::new(0), &mut |_, _| {})
        .err()
        .expect("12 T4 hold only 48 layers");
    assert!(matches!(err, LayoutError::SolverInfeasible(_)));
}

#[test]
fn no_incumbent_before_the_limit_is_a_timeout() {
    let fixture = half_half_cluster();
    let topo = fixture.topology();
    let options = ExactOptions {
        pruning: Some(no_inner_links()),
        ..bounded(0)
    };
    let synth = ExactSynthesizer::new(&topo, &fixture.model, options).expect("options");
    let err = synth
        .run(ExactMode::Fresh, &mut LocalSearchSolver::new(0), &mut |_, _| {})
        .err()
        .expect("no two-node chain survives pruning");
    match err {
        LayoutError::SolverTimeout { status, .. } => assert_eq!(status, "iteration_limit"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn pruned_links_fail_the_constraint_check() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    let solution = homogeneous_layout(&fixture);

    let terminal_only: BTreeSet<(NodeRef, NodeRef)> =
        prune_links(&topo, &no_inner_links()).expect("prune");
    assert_eq!(terminal_only.len(), 48);
    let model = PlacementModel::new(&topo, &fixture.model, Some(terminal_only));
    assert!(model.is_pruned());
    assert!(matches!(
        model.check(&solution),
        Err(VerifyError::PrunedLink { pipeline: 0, .. })
    ));

    let options = ExactOptions {
        pruning: Some(no_inner_links()),
        ..ExactOptions::default()
    };
    let synth = ExactSynthesizer::new(&topo, &fixture.model, options).expect("options");
    let err = synth
        .run(
            ExactMode::VerifyOnly(solution),
            &mut LocalSearchSolver::new(0),
            &mut |_, _| {},
        )
        .err()
        .expect("pipelines cross pruned links");
    assert!(matches!(
        err,
        LayoutError::Infeasible(VerifyError::PrunedLink { .. })
    ));
}

#[test]
fn pruning_keeps_terminals_and_respects_keep_limits() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();

    // 带宽都相同：每个节点按键序保留编号最小的 3 个邻居
    let kept = prune_links(
        &topo,
        &PruneOptions {
            min_keep: 2,
            max_keep: 3,
            keep_bandwidth_threshold: 0.0,
        },
    )
    .expect("prune");
    assert_eq!(kept.len(), 48 + 6 + 20 * 3);
    assert!((0..24).all(|i| kept.contains(&(NodeRef::Source, NodeRef::Compute(i)))));
    assert!((0..24).all(|i| kept.contains(&(NodeRef::Compute(i), NodeRef::Sink))));

    // 所有链路都低于阈值：只保留 min_keep 条
    let kept = prune_links(
        &topo,
        &PruneOptions {
            min_keep: 1,
            max_keep: 5,
            keep_bandwidth_threshold: 1e12,
        },
    )
    .expect("prune");
    assert_eq!(kept.len(), 48 + 23);
}

#[test]
fn invalid_exact_options_are_rejected() {
    let fixture = half_half_cluster();
    let topo = fixture.topology();
    for threshold in [0.0, 1.5, f64::NAN] {
        let options = ExactOptions {
            early_stop_threshold: threshold,
            ..ExactOptions::default()
        };
        assert!(matches!(
            ExactSynthesizer::new(&topo, &fixture.model, options),
            Err(LayoutError::InvalidOptions(_))
        ));
    }
    let options = ExactOptions {
        pruning: Some(PruneOptions {
            min_keep: 4,
            max_keep: 2,
            keep_bandwidth_threshold: 0.0,
        }),
        ..ExactOptions::default()
    };
    assert!(matches!(
        ExactSynthesizer::new(&topo, &fixture.model, options),
        Err(LayoutError::InvalidOptions(_))
    ));
    assert!(prune_links(
        &topo,
        &PruneOptions {
            min_keep: 0,
            max_keep: 1,
            keep_bandwidth_threshold: f64::NAN,
        }
    )
    .is_err());
}
