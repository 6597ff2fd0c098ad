//! 随机种子与级数下的布局性质

use proptest::prelude::*;

use super::fixtures::mixed_cluster;
use crate::error::LayoutError;
use crate::ini::IniDocument;
use crate::layout::{
    HeuristicOptions, LayoutMethod, estimated_throughput, flow_upper_bound, seeded_rng, verify,
};
use crate::persist::{DEFAULT_NODE_OFFSET, parse_solution, render_solution};

fn heuristic(which: usize) -> LayoutMethod {
    let options = HeuristicOptions::default();
    match which {
        0 => LayoutMethod::HomogeneousBiased(options),
        1 => LayoutMethod::PerformanceRanked(options),
        _ => LayoutMethod::FixedStageCount {
            options,
            num_stages: 20,
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// 同一种子得到同一方案；方案可行、不超过流量上界，且写出再读回不变
    #[test]
    fn heuristic_layouts_are_feasible_and_reproducible(seed in any::<u64>(), which in 0usize..3) {
        let fixture = mixed_cluster();
        let topo = fixture.topology();
        let method = heuristic(which);

        let first = method.synthesize(&topo, &fixture.model, &mut seeded_rng(seed));
        let second = method.synthesize(&topo, &fixture.model, &mut seeded_rng(seed));
        prop_assert!(first.is_ok());
        let solution = first.unwrap();
        prop_assert_eq!(&solution, &second.unwrap());

        prop_assert!(verify(&solution, &topo, &fixture.model).is_ok());
        prop_assert!(
            estimated_throughput(&topo, &solution) <= flow_upper_bound(&topo, &fixture.model) + 1e-9
        );

        let rendered = render_solution(&solution, &topo, DEFAULT_NODE_OFFSET);
        let doc = IniDocument::parse(&rendered).unwrap();
        let restored = parse_solution(&doc, &topo, &fixture.model).unwrap();
        prop_assert_eq!(restored, solution);
    }

    /// 任意级数要么得到可行方案，要么没有节点能放下一级
    #[test]
    fn any_stage_count_is_feasible_or_reported(num_stages in 1usize..=80, seed in any::<u64>()) {
        let fixture = mixed_cluster();
        let topo = fixture.topology();
        let method = LayoutMethod::FixedStageCount {
            options: HeuristicOptions::default(),
            num_stages,
        };
        match method.synthesize(&topo, &fixture.model, &mut seeded_rng(seed)) {
            Ok(solution) => {
                prop_assert!(verify(&solution, &topo, &fixture.model).is_ok());
                for pipeline in solution.pipelines() {
                    for stage in pipeline.stages() {
                        let start = stage.layers.start;
                        // 每一级都从级边界开始
                        prop_assert!((0..=num_stages).any(|k| k * 80 / num_stages == start));
                    }
                }
            }
            Err(err) => prop_assert!(
                matches!(err, LayoutError::NoFeasibleLayout { .. }),
                "unexpected error: {}",
                err
            ),
        }
    }
}
