use super::fixtures::{half_half_cluster, mixed_cluster};
use crate::error::LayoutError;
use crate::ini::IniDocument;
use crate::layout::{
    HeuristicOptions, LayerRange, MethodKind, VerifyError, homogeneous, seeded_rng, verify,
};
use crate::persist::{
    DEFAULT_NODE_OFFSET, SimulatorParameters, SynthesisSummary, node_name, parse_node_name,
    parse_solution, render_simulator_cluster, render_solution,
};

#[test]
fn node_names_use_the_offset() {
    assert_eq!(node_name(2, 0), "compute_node_2");
    assert_eq!(parse_node_name(2, "compute_node_5"), Some(3));
    assert_eq!(parse_node_name(2, "compute_node_1"), None);
    assert_eq!(parse_node_name(2, "node_5"), None);
}

#[test]
fn solution_file_round_trip_is_identical_and_feasible() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    let solution = homogeneous(
        &topo,
        &fixture.model,
        &HeuristicOptions::default(),
        &mut seeded_rng(0),
    )
    .expect("layout");

    let rendered = render_solution(&solution, &topo, DEFAULT_NODE_OFFSET);
    assert!(rendered.starts_with("[Settings]\noffset=2\nmethod='homogeneous'\n"));
    assert_eq!(rendered.matches("=[]\n").count(), 6);

    let doc = IniDocument::parse(&rendered).expect("parse solution");
    let restored = parse_solution(&doc, &topo, &fixture.model).expect("restore");
    assert_eq!(restored, solution);
    assert!(verify(&restored, &topo, &fixture.model).is_ok());
}

#[test]
fn solution_without_pipelines_section_is_chained() {
    let fixture = half_half_cluster();
    let topo = fixture.topology();
    let raw = format!(
        "[Settings]\noffset=2\n\n[Solution]\ncompute_node_2=[{}]\ncompute_node_3=[{}]\n",
        (40..80).map(|l| l.to_string()).collect::<Vec<_>>().join(", "),
        (0..40).map(|l| l.to_string()).collect::<Vec<_>>().join(", "),
    );
    let doc = IniDocument::parse(&raw).expect("parse");
    let solution = parse_solution(&doc, &topo, &fixture.model).expect("restore");
    assert_eq!(solution.method(), None);
    assert_eq!(solution.pipelines().len(), 1);
    let order: Vec<usize> = solution.pipelines()[0].nodes().collect();
    assert_eq!(order, vec![1, 0]);
    assert_eq!(solution.layer_range(0), Some(LayerRange::new(40, 80)));
    assert!(verify(&solution, &topo, &fixture.model).is_ok());
}

#[test]
fn orphaned_ranges_are_left_for_the_verifier() {
    let fixture = half_half_cluster();
    let topo = fixture.topology();
    let raw = "[Settings]\noffset=2\n\n[Solution]\ncompute_node_2=[0, 1, 2]\ncompute_node_3=[]\n";
    let doc = IniDocument::parse(raw).expect("parse");
    let solution = parse_solution(&doc, &topo, &fixture.model).expect("restore");
    assert!(solution.pipelines().is_empty());
    assert_eq!(
        verify(&solution, &topo, &fixture.model),
        Err(VerifyError::NoPipelines)
    );
}

#[test]
fn over_capacity_solution_file_fails_verification() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    // compute_node_14 是 T4（索引 12），最多 4 层
    let all: Vec<String> = (0..80).map(|l| l.to_string()).collect();
    let raw = format!(
        "[Settings]\noffset=2\n\n[Solution]\ncompute_node_14=[{}]\n\n[Pipelines]\npipeline_0=['compute_node_14']\n",
        all.join(", ")
    );
    let doc = IniDocument::parse(&raw).expect("parse");
    let solution = parse_solution(&doc, &topo, &fixture.model).expect("restore");
    assert!(matches!(
        verify(&solution, &topo, &fixture.model),
        Err(VerifyError::CapacityExceeded {
            node: 12,
            max_layers: 4,
            ..
        })
    ));
}

#[test]
fn malformed_solution_files_are_serialization_errors() {
    let fixture = half_half_cluster();
    let topo = fixture.topology();
    let cases = [
        "[Settings]\noffset=2\n",
        "[Solution]\ncompute_node_2=[0, 2]\n",
        "[Solution]\ncompute_node_9=[0]\n",
        "[Solution]\nnode_a=[0]\n",
        "[Solution]\ncompute_node_2=['x']\n",
        "[Settings]\nmethod='annealing'\n[Solution]\ncompute_node_2=[]\n",
        "[Solution]\ncompute_node_2=[]\n[Pipelines]\npipeline_0=['compute_node_2']\n",
        "[Solution]\ncompute_node_2=[0]\n[Pipelines]\nfirst=['compute_node_2']\n",
    ];
    for raw in cases {
        let doc = IniDocument::parse(raw).expect("parse");
        let err = parse_solution(&doc, &topo, &fixture.model).expect_err(raw);
        assert!(matches!(err, LayoutError::Serialization(_)), "{raw}: {err}");
    }
}

#[test]
fn simulator_cluster_lists_only_used_nodes_and_links() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    let solution = homogeneous(
        &topo,
        &fixture.model,
        &HeuristicOptions::default(),
        &mut seeded_rng(0),
    )
    .expect("layout");
    let rendered =
        render_simulator_cluster(&solution, &topo, &fixture.capacity, DEFAULT_NODE_OFFSET)
            .expect("render");
    let doc = IniDocument::parse(&rendered).expect("parse simulator cluster");

    let coordinator = doc.require("Coordinator").expect("coordinator");
    assert_eq!(
        coordinator.get("inbound_nic_speed"),
        Some("10000 * mbps")
    );
    let types = doc
        .require("MachineTypes")
        .and_then(|s| s.get_list("types"))
        .expect("types");
    assert_eq!(types.len(), 3);

    let names = doc
        .require("ComputeNodes")
        .and_then(|s| s.get_list("names"))
        .expect("names");
    assert_eq!(names.len(), 18);

    // A100 驻留 20 层：KV cache 预算按层数平分
    let first = solution.pipelines()[0].first().expect("stage").node;
    let section = doc
        .require(&node_name(DEFAULT_NODE_OFFSET, first))
        .expect("node section");
    assert_eq!(section.get("kv_cache_capacity"), Some("60000"));
    assert_eq!(section.get("activation_backup_capacity"), Some("12000"));
    assert_eq!(section.get_str("machine_type").expect("type"), "A100");
    assert_eq!(section.get_quantity("vram_size").expect("vram"), 80.0 * 1024.0 * 1024.0 * 1024.0);

    // 两条流水线：2 条源链路、2 条汇链路、3 + 13 条级间链路
    let links = doc
        .require("Links")
        .and_then(|s| s.get_list("names"))
        .expect("links");
    assert_eq!(links.len(), 2 + 2 + 3 + 13);
    let first_link = links[0].as_str().expect("link name");
    assert_eq!(
        first_link,
        format!("link_source_{}", node_name(DEFAULT_NODE_OFFSET, first))
    );
    let link = doc.require(first_link).expect("link section");
    assert_eq!(link.get("in"), Some("source"));
    assert_eq!(link.get_quantity("latency").expect("latency"), 0.001);
    assert_eq!(link.get_quantity("bandwidth").expect("bandwidth"), 1_250_000_000.0);
}

#[test]
fn summary_reports_bound_throughput_and_warmup() {
    let fixture = mixed_cluster();
    let topo = fixture.topology();
    let solution = homogeneous(
        &topo,
        &fixture.model,
        &HeuristicOptions::default(),
        &mut seeded_rng(0),
    )
    .expect("layout");
    let summary = SynthesisSummary::build(
        &solution,
        &topo,
        &fixture.model,
        0,
        DEFAULT_NODE_OFFSET,
        None,
    );
    assert_eq!(summary.method, Some(MethodKind::HomogeneousBiased));
    assert_eq!(summary.unused_nodes, 6);
    assert_eq!(summary.nodes_in_use, 18);
    assert!(summary.estimated_throughput <= summary.flow_upper_bound);

    // 20 层 × 1.71 GB ÷ 1 GB/s
    let expected_load = 20.0 * 1_711_276_032.0 / 1_000_000_000.0;
    assert!((summary.max_load_time - expected_load).abs() < 1e-6);
    assert_eq!(summary.simulator_warmup_secs, expected_load.ceil() as u64 + 1);
    assert_eq!(
        summary.simulator,
        SimulatorParameters {
            token_size: 16_384.0,
            activation_size: 16_384.0,
            total_num_layers: 80,
        }
    );

    let json = serde_json::to_value(&summary).expect("serialize summary");
    assert_eq!(json["method"], "homogeneous");
    assert_eq!(json["pipelines"].as_array().map(Vec::len), Some(2));
    assert!(json.get("solver").is_none());
}
