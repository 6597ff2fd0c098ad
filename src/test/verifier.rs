use std::collections::BTreeMap;

use super::fixtures::{half_half_cluster, mixed_cluster};
use crate::layout::{
    LayerRange, LayoutSolution, MethodKind, Pipeline, Stage, VerifyError, pipeline_throughput,
    verify,
};

fn stage(node: usize, start: usize, end: usize) -> Stage {
    Stage {
        node,
        layers: LayerRange::new(start, end),
    }
}

fn solution(pipelines: Vec<Vec<Stage>>) -> LayoutSolution {
    LayoutSolution::from_pipelines(
        MethodKind::Exact,
        pipelines.into_iter().map(Pipeline::new).collect(),
    )
}

#[test]
fn accepts_a_hand_built_layout() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    let sol = solution(vec![
        vec![stage(0, 0, 20), stage(1, 20, 40), stage(2, 40, 60), stage(3, 60, 80)],
        vec![
            stage(12, 0, 4),
            stage(4, 4, 11),
            stage(5, 11, 18),
            stage(6, 18, 25),
            stage(7, 25, 32),
            stage(8, 32, 39),
            stage(9, 39, 46),
            stage(10, 46, 53),
            stage(11, 53, 60),
            stage(13, 60, 64),
            stage(14, 64, 68),
            stage(15, 68, 72),
            stage(16, 72, 76),
            stage(17, 76, 80),
        ],
    ]);
    assert_eq!(verify(&sol, &topo, &fixture.model), Ok(()));
    assert!((pipeline_throughput(&topo, &sol.pipelines()[0]) - 1_500.0).abs() < 1e-9);
}

#[test]
fn empty_solution_is_rejected() {
    let fixture = half_half_cluster();
    let topo = fixture.topology();
    assert_eq!(
        verify(&solution(Vec::new()), &topo, &fixture.model),
        Err(VerifyError::NoPipelines)
    );
    assert_eq!(
        verify(&solution(vec![Vec::new()]), &topo, &fixture.model),
        Err(VerifyError::EmptyPipeline { pipeline: 0 })
    );
}

#[test]
fn capacity_violations_name_the_node() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    // T4 最多 4 层
    let sol = solution(vec![vec![
        stage(0, 0, 20),
        stage(1, 20, 40),
        stage(2, 40, 60),
        stage(12, 60, 80),
    ]]);
    assert_eq!(
        verify(&sol, &topo, &fixture.model),
        Err(VerifyError::CapacityExceeded {
            pipeline: 0,
            node: 12,
            layers: 20,
            max_layers: 4,
        })
    );
}

#[test]
fn coverage_gaps_and_incomplete_pipelines_are_rejected() {
    let fixture = half_half_cluster();
    let topo = fixture.topology();

    let gap = solution(vec![vec![stage(0, 0, 40), stage(1, 41, 80)]]);
    assert_eq!(
        verify(&gap, &topo, &fixture.model),
        Err(VerifyError::CoverageGap {
            pipeline: 0,
            node: 1,
            expected: 40,
            found: 41,
        })
    );

    let late_start = solution(vec![vec![stage(0, 1, 40)]]);
    assert!(matches!(
        verify(&late_start, &topo, &fixture.model),
        Err(VerifyError::CoverageGap { expected: 0, .. })
    ));

    let short = solution(vec![vec![stage(0, 0, 40), stage(1, 40, 79)]]);
    assert_eq!(
        verify(&short, &topo, &fixture.model),
        Err(VerifyError::IncompletePipeline {
            pipeline: 0,
            covered: 79,
            num_layers: 80,
        })
    );

    let beyond = solution(vec![vec![stage(0, 0, 40), stage(1, 40, 81)]]);
    assert!(matches!(
        verify(&beyond, &topo, &fixture.model),
        Err(VerifyError::RangeOutOfBounds { node: 1, .. })
    ));
}

#[test]
fn unknown_and_reused_nodes_are_rejected() {
    let fixture = half_half_cluster();
    let topo = fixture.topology();

    let unknown = solution(vec![vec![stage(0, 0, 40), stage(7, 40, 80)]]);
    assert_eq!(
        verify(&unknown, &topo, &fixture.model),
        Err(VerifyError::UnknownNode {
            pipeline: 0,
            node: 7,
        })
    );

    let reused = LayoutSolution::from_parts(
        None,
        vec![
            Pipeline::new(vec![stage(0, 0, 40), stage(1, 40, 80)]),
            Pipeline::new(vec![stage(1, 0, 40), stage(0, 40, 80)]),
        ],
        BTreeMap::new(),
    );
    assert_eq!(
        verify(&reused, &topo, &fixture.model),
        Err(VerifyError::NodeReused {
            node: 1,
            first: 0,
            second: 1,
        })
    );
}

#[test]
fn assignments_must_match_pipelines() {
    let fixture = half_half_cluster();
    let topo = fixture.topology();
    let pipeline = Pipeline::new(vec![stage(0, 0, 40), stage(1, 40, 80)]);

    let wrong_range = LayoutSolution::from_parts(
        None,
        vec![pipeline.clone()],
        BTreeMap::from([(0, LayerRange::new(0, 40)), (1, LayerRange::new(40, 79))]),
    );
    assert_eq!(
        verify(&wrong_range, &topo, &fixture.model),
        Err(VerifyError::AssignmentMismatch {
            node: 1,
            assigned: Some(LayerRange::new(40, 79)),
            staged: Some(LayerRange::new(40, 80)),
        })
    );

    let missing = LayoutSolution::from_parts(
        None,
        vec![pipeline],
        BTreeMap::from([(0, LayerRange::new(0, 40))]),
    );
    assert_eq!(
        verify(&missing, &topo, &fixture.model),
        Err(VerifyError::AssignmentMismatch {
            node: 1,
            assigned: None,
            staged: Some(LayerRange::new(40, 80)),
        })
    );
}
